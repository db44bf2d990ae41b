use std::fmt;

use serde::{Deserialize, Serialize};

/// Tolerance applied when comparing a quality score against a threshold, so
/// weights such as `0.1 + 0.2 + 0.2` still count as half the mass.
const SCORE_EPSILON: f64 = 1e-9;

/// Named predictive factors, listed in the order the model applies them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    Form,
    HomeAdvantage,
    ExpectedGoals,
    Market,
    SquadStrength,
    StrengthRating,
}

pub const FACTOR_COUNT: usize = 6;

impl Factor {
    pub const ALL: [Factor; FACTOR_COUNT] = [
        Factor::Form,
        Factor::HomeAdvantage,
        Factor::ExpectedGoals,
        Factor::Market,
        Factor::SquadStrength,
        Factor::StrengthRating,
    ];

    pub fn index(self) -> usize {
        match self {
            Factor::Form => 0,
            Factor::HomeAdvantage => 1,
            Factor::ExpectedGoals => 2,
            Factor::Market => 3,
            Factor::SquadStrength => 4,
            Factor::StrengthRating => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Factor::Form => "form",
            Factor::HomeAdvantage => "home_advantage",
            Factor::ExpectedGoals => "expected_goals",
            Factor::Market => "market",
            Factor::SquadStrength => "squad_strength",
            Factor::StrengthRating => "strength_rating",
        }
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configured weight per factor. Weights are non-negative and conventionally
/// sum to 1.0, but nothing depends on that.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FactorWeights {
    #[serde(default)]
    pub form: f64,
    #[serde(default)]
    pub home_advantage: f64,
    #[serde(default)]
    pub expected_goals: f64,
    #[serde(default)]
    pub market: f64,
    #[serde(default)]
    pub squad_strength: f64,
    #[serde(default)]
    pub strength_rating: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            form: 0.30,
            home_advantage: 0.10,
            expected_goals: 0.25,
            market: 0.15,
            squad_strength: 0.10,
            strength_rating: 0.10,
        }
    }
}

impl FactorWeights {
    pub fn zero() -> Self {
        Self {
            form: 0.0,
            home_advantage: 0.0,
            expected_goals: 0.0,
            market: 0.0,
            squad_strength: 0.0,
            strength_rating: 0.0,
        }
    }

    pub fn get(&self, factor: Factor) -> f64 {
        match factor {
            Factor::Form => self.form,
            Factor::HomeAdvantage => self.home_advantage,
            Factor::ExpectedGoals => self.expected_goals,
            Factor::Market => self.market,
            Factor::SquadStrength => self.squad_strength,
            Factor::StrengthRating => self.strength_rating,
        }
    }

    pub fn set(&mut self, factor: Factor, weight: f64) {
        let slot = match factor {
            Factor::Form => &mut self.form,
            Factor::HomeAdvantage => &mut self.home_advantage,
            Factor::ExpectedGoals => &mut self.expected_goals,
            Factor::Market => &mut self.market,
            Factor::SquadStrength => &mut self.squad_strength,
            Factor::StrengthRating => &mut self.strength_rating,
        };
        *slot = weight;
    }

    pub fn with(mut self, factor: Factor, weight: f64) -> Self {
        self.set(factor, weight);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (Factor, f64)> + '_ {
        Factor::ALL.into_iter().map(|f| (f, self.get(f)))
    }

    /// Sum of configured weights over all non-zero factors.
    pub fn total(&self) -> f64 {
        self.iter().map(|(_, w)| w).filter(|w| *w > 0.0).sum()
    }

    pub fn validate(&self) -> Result<(), String> {
        for (factor, w) in self.iter() {
            if !w.is_finite() || w < 0.0 {
                return Err(format!("weight for {factor} must be finite and >= 0, got {w}"));
            }
        }
        Ok(())
    }
}

/// Per-factor usability for one prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Availability {
    usable: [bool; FACTOR_COUNT],
}

impl Availability {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            usable: [true; FACTOR_COUNT],
        }
    }

    pub fn set(&mut self, factor: Factor, usable: bool) {
        self.usable[factor.index()] = usable;
    }

    pub fn with(mut self, factor: Factor, usable: bool) -> Self {
        self.set(factor, usable);
        self
    }

    pub fn is_usable(&self, factor: Factor) -> bool {
        self.usable[factor.index()]
    }

    pub fn unusable(&self) -> impl Iterator<Item = Factor> + '_ {
        Factor::ALL.into_iter().filter(|f| !self.is_usable(*f))
    }
}

/// Redistributed weights. Usable factors absorb the mass of unusable ones in
/// proportion to their own configured weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectiveWeights {
    weights: [f64; FACTOR_COUNT],
    total_configured: f64,
    total_available: f64,
    data_quality_score: f64,
}

impl EffectiveWeights {
    pub fn get(&self, factor: Factor) -> f64 {
        self.weights[factor.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Factor, f64)> + '_ {
        Factor::ALL.into_iter().map(|f| (f, self.get(f)))
    }

    pub fn sum(&self) -> f64 {
        self.weights.iter().sum()
    }

    pub fn total_configured(&self) -> f64 {
        self.total_configured
    }

    pub fn total_available(&self) -> f64 {
        self.total_available
    }

    /// Percentage (0..=100) of configured weight backed by usable data.
    pub fn data_quality_score(&self) -> f64 {
        self.data_quality_score
    }

    pub fn meets(&self, threshold: f64) -> bool {
        self.data_quality_score + SCORE_EPSILON >= threshold
    }
}

pub fn calculate_effective_weights(
    configured: &FactorWeights,
    availability: &Availability,
) -> EffectiveWeights {
    let mut total_configured = 0.0;
    let mut total_available = 0.0;
    for (factor, w) in configured.iter() {
        if w <= 0.0 {
            continue;
        }
        total_configured += w;
        if availability.is_usable(factor) {
            total_available += w;
        }
    }

    // Nothing usable: leave the scale at 1.0 so every weight stays zero and
    // the caller falls back.
    let scale = if total_available > 0.0 {
        total_configured / total_available
    } else {
        1.0
    };

    let mut weights = [0.0; FACTOR_COUNT];
    for (factor, w) in configured.iter() {
        if w > 0.0 && availability.is_usable(factor) {
            weights[factor.index()] = w * scale;
        }
    }

    let data_quality_score = if total_configured <= 0.0 || total_available >= total_configured {
        100.0
    } else {
        (100.0 * total_available / total_configured).clamp(0.0, 100.0)
    };

    EffectiveWeights {
        weights,
        total_configured,
        total_available,
        data_quality_score,
    }
}

/// Form is the baseline factor: without it no fused prediction is made,
/// whatever the quality score says.
pub fn can_make_prediction(
    availability: &Availability,
    weights: &EffectiveWeights,
    fallback_threshold: f64,
) -> bool {
    availability.is_usable(Factor::Form) && weights.meets(fallback_threshold)
}

#[derive(Debug, Clone, PartialEq)]
pub struct DegradationWarning {
    pub missing: Vec<(Factor, f64)>,
}

impl fmt::Display for DegradationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("missing data for ")?;
        for (i, (factor, w)) in self.missing.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{factor} ({:.0}%)", w * 100.0)?;
        }
        Ok(())
    }
}

/// Unusable factors whose configured weight exceeds `reporting_threshold`.
pub fn degradation_warning(
    configured: &FactorWeights,
    availability: &Availability,
    reporting_threshold: f64,
) -> Option<DegradationWarning> {
    let missing: Vec<(Factor, f64)> = availability
        .unusable()
        .map(|f| (f, configured.get(f)))
        .filter(|(_, w)| *w > reporting_threshold)
        .collect();
    if missing.is_empty() {
        None
    } else {
        Some(DegradationWarning { missing })
    }
}
