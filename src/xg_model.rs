//! Expected-goals model.
//!
//! Turns the usable factors of a [`PredictionContext`] into expected home and
//! away goals. Adjustments run in a fixed order:
//!
//! 1. league baseline (half the league's mean total goals per side)
//! 2. form
//! 3. home advantage
//! 4. attack/defence rates from expected-goals metrics
//! 5. market consensus from odds
//! 6. squad strength from lineups or absences
//! 7. relative strength rating
//!
//! Every step is scaled by the factor's effective weight, so a factor with
//! zero effective weight leaves the numbers untouched. Optional bounded
//! jitter follows, then clamping and rounding.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::context::PredictionContext;
use crate::elo::rating_edge;
use crate::weights::{EffectiveWeights, Factor};

const RATE_EPS: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingPolicy {
    /// Cautious: never predicts a goal that is not fully expected.
    Floor,
    #[default]
    Round,
    /// Aggressive: any fraction of a goal counts.
    Ceil,
}

impl RoundingPolicy {
    pub fn apply(self, v: f64) -> f64 {
        match self {
            RoundingPolicy::Floor => v.floor(),
            RoundingPolicy::Round => v.round(),
            RoundingPolicy::Ceil => v.ceil(),
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "floor" => Some(RoundingPolicy::Floor),
            "round" => Some(RoundingPolicy::Round),
            "ceil" => Some(RoundingPolicy::Ceil),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    #[serde(default = "default_max_home_goals")]
    pub max_home_goals: u8,
    #[serde(default = "default_max_away_goals")]
    pub max_away_goals: u8,
    #[serde(default)]
    pub rounding: RoundingPolicy,
    /// Half-width of the uniform jitter added to each side. Zero disables it.
    #[serde(default)]
    pub variance: f64,
    /// Points-per-game gap (as a share of 3 points) folded into form.
    #[serde(default = "default_form_points_k")]
    pub form_points_k: f64,
    /// Goals of supremacy implied by a 100% home-minus-away market edge.
    #[serde(default = "default_market_supremacy_goals")]
    pub market_supremacy_goals: f64,
    /// Rating points that make one side a 10:1 favourite.
    #[serde(default = "default_rating_scale")]
    pub rating_scale: f64,
    #[serde(default = "default_rating_k")]
    pub rating_k: f64,
}

fn default_max_home_goals() -> u8 {
    6
}

fn default_max_away_goals() -> u8 {
    5
}

fn default_form_points_k() -> f64 {
    0.25
}

fn default_market_supremacy_goals() -> f64 {
    2.2
}

fn default_rating_scale() -> f64 {
    400.0
}

fn default_rating_k() -> f64 {
    0.5
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            max_home_goals: default_max_home_goals(),
            max_away_goals: default_max_away_goals(),
            rounding: RoundingPolicy::default(),
            variance: 0.0,
            form_points_k: default_form_points_k(),
            market_supremacy_goals: default_market_supremacy_goals(),
            rating_scale: default_rating_scale(),
            rating_k: default_rating_k(),
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<(), (&'static str, String)> {
        if !self.variance.is_finite() || self.variance < 0.0 {
            return Err(("model.variance", format!("must be >= 0, got {}", self.variance)));
        }
        if self.rating_scale <= 0.0 || !self.rating_scale.is_finite() {
            return Err(("model.rating_scale", "must be positive".to_string()));
        }
        for (name, v) in [
            ("model.form_points_k", self.form_points_k),
            ("model.market_supremacy_goals", self.market_supremacy_goals),
            ("model.rating_k", self.rating_k),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err((name, format!("must be >= 0, got {v}")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdjustmentStep {
    pub factor: Factor,
    pub weight: f64,
    pub home: f64,
    pub away: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelOutput {
    pub expected_home_goals: f64,
    pub expected_away_goals: f64,
    pub predicted_home_score: u8,
    pub predicted_away_score: u8,
    /// Running (home, away) after each applied step.
    pub trace: Vec<AdjustmentStep>,
}

/// Pure apart from the injected random source, which is only drawn from
/// when `cfg.variance > 0`.
pub fn expected_goals<R: Rng + ?Sized>(
    ctx: &PredictionContext,
    weights: &EffectiveWeights,
    cfg: &ModelConfig,
    rng: &mut R,
) -> ModelOutput {
    let base = ctx.baseline.per_side();
    let mut home = base;
    let mut away = base;
    let mut trace = Vec::with_capacity(6);
    let mut record = |factor: Factor, w: f64, home: f64, away: f64| {
        trace.push(AdjustmentStep {
            factor,
            weight: w,
            home,
            away,
        });
    };

    let w = weights.get(Factor::Form);
    if let (true, Some((h, a))) = (w > 0.0, ctx.inputs.form.as_ref()) {
        let tilt = cfg.form_points_k * (h.points_per_game - a.points_per_game) / 3.0;
        let mult_h = (rate(h.goals_for_per_game, base) * rate(a.goals_against_per_game, base)
            * (1.0 + tilt))
            .clamp(0.5, 2.0);
        let mult_a = (rate(a.goals_for_per_game, base) * rate(h.goals_against_per_game, base)
            * (1.0 - tilt))
            .clamp(0.5, 2.0);
        home *= 1.0 + w * (mult_h - 1.0);
        away *= 1.0 + w * (mult_a - 1.0);
        record(Factor::Form, w, home, away);
    }

    // No feed behind it, so it is never lost to missing data.
    let w = weights.get(Factor::HomeAdvantage);
    if w > 0.0 {
        let boost = w * ctx.baseline.home_adv_goals / 2.0;
        home = (home + boost).max(0.0);
        away = (away - boost).max(0.0);
        record(Factor::HomeAdvantage, w, home, away);
    }

    let w = weights.get(Factor::ExpectedGoals);
    if let (true, Some((h, a))) = (w > 0.0, ctx.inputs.expected_goals.as_ref()) {
        let mult_h = (rate(h.xg_for_per_game, base) * rate(a.xg_against_per_game, base))
            .clamp(0.4, 2.5);
        let mult_a = (rate(a.xg_for_per_game, base) * rate(h.xg_against_per_game, base))
            .clamp(0.4, 2.5);
        home *= 1.0 + w * (mult_h - 1.0);
        away *= 1.0 + w * (mult_a - 1.0);
        record(Factor::ExpectedGoals, w, home, away);
    }

    let w = weights.get(Factor::Market);
    if let (true, Some((p_home, _, p_away))) = (
        w > 0.0,
        ctx.inputs.odds.as_ref().and_then(|o| o.implied_probabilities()),
    ) {
        let target = (p_home - p_away) * cfg.market_supremacy_goals;
        let delta = w.min(1.0) * (target - (home - away));
        home = (home + delta / 2.0).max(0.0);
        away = (away - delta / 2.0).max(0.0);
        record(Factor::Market, w, home, away);
    }

    let w = weights.get(Factor::SquadStrength);
    if let (true, Some(squad)) = (w > 0.0, ctx.inputs.squad.as_ref()) {
        home *= (1.0 - w * (1.0 - squad.home.clamp(0.5, 1.0))).max(0.0);
        away *= (1.0 - w * (1.0 - squad.away.clamp(0.5, 1.0))).max(0.0);
        record(Factor::SquadStrength, w, home, away);
    }

    let w = weights.get(Factor::StrengthRating);
    if let (true, Some((r_home, r_away))) = (w > 0.0, ctx.inputs.ratings) {
        let edge = rating_edge(r_home, r_away, cfg.rating_scale);
        home *= (1.0 + w * cfg.rating_k * edge).max(0.0);
        away *= (1.0 - w * cfg.rating_k * edge).max(0.0);
        record(Factor::StrengthRating, w, home, away);
    }

    if cfg.variance > 0.0 {
        home += rng.gen_range(-cfg.variance..=cfg.variance);
        away += rng.gen_range(-cfg.variance..=cfg.variance);
    }

    let expected_home_goals = home.clamp(0.0, f64::from(cfg.max_home_goals));
    let expected_away_goals = away.clamp(0.0, f64::from(cfg.max_away_goals));

    ModelOutput {
        expected_home_goals,
        expected_away_goals,
        predicted_home_score: to_score(expected_home_goals, cfg.rounding, cfg.max_home_goals),
        predicted_away_score: to_score(expected_away_goals, cfg.rounding, cfg.max_away_goals),
        trace,
    }
}

/// Per-game rate relative to the league's per-side average.
fn rate(per_game: f64, base: f64) -> f64 {
    (per_game.max(0.0) + RATE_EPS) / (base.max(0.0) + RATE_EPS)
}

fn to_score(v: f64, rounding: RoundingPolicy, max: u8) -> u8 {
    let rounded = rounding.apply(v).clamp(0.0, f64::from(max));
    rounded as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{FactorInputs, SquadBasis, SquadModifiers};
    use crate::fixtures::MatchRef;
    use crate::league_params::LeagueBaseline;
    use crate::payload::{MatchOdds, TeamForm};
    use crate::weights::{Availability, FactorWeights, calculate_effective_weights};
    use chrono::Utc;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn ctx(inputs: FactorInputs, availability: Availability) -> PredictionContext {
        PredictionContext {
            fixture: MatchRef {
                id: "m".to_string(),
                league_id: None,
                home_team_id: 1,
                away_team_id: 2,
                home: "H".to_string(),
                away: "A".to_string(),
                kickoff_utc: Utc::now(),
            },
            configured: FactorWeights::default(),
            baseline: LeagueBaseline::default(),
            inputs,
            availability,
            built_at: Utc::now(),
        }
    }

    fn form(team_id: u32, ppg: f64, gf: f64, ga: f64) -> TeamForm {
        TeamForm {
            team_id,
            matches: 6,
            points_per_game: ppg,
            goals_for_per_game: gf,
            goals_against_per_game: ga,
        }
    }

    #[test]
    fn zero_weights_leave_baseline() {
        let c = ctx(FactorInputs::default(), Availability::none());
        let eff = calculate_effective_weights(&FactorWeights::zero(), &c.availability);
        let out = expected_goals(&c, &eff, &ModelConfig::default(), &mut StdRng::seed_from_u64(1));
        assert!((out.expected_home_goals - 1.3).abs() < 1e-12);
        assert!((out.expected_away_goals - 1.3).abs() < 1e-12);
        assert!(out.trace.is_empty());
        assert_eq!((out.predicted_home_score, out.predicted_away_score), (1, 1));
    }

    #[test]
    fn home_advantage_applies_without_any_feed() {
        let c = ctx(FactorInputs::default(), Availability::none());
        let weights = FactorWeights::zero().with(Factor::HomeAdvantage, 1.0);
        let eff = calculate_effective_weights(&weights, &Availability::none().with(Factor::HomeAdvantage, true));
        let out = expected_goals(&c, &eff, &ModelConfig::default(), &mut StdRng::seed_from_u64(1));
        assert!(out.expected_home_goals > out.expected_away_goals);
        assert_eq!(out.trace[0].factor, Factor::HomeAdvantage);
    }

    #[test]
    fn factor_without_weight_is_as_if_unconfigured() {
        let inputs = FactorInputs {
            form: Some((form(1, 2.5, 2.4, 0.6), form(2, 0.5, 0.7, 2.0))),
            ..FactorInputs::default()
        };
        let availability = Availability::all().with(Factor::Form, false);
        let c = ctx(inputs.clone(), availability);
        let weights = FactorWeights::zero()
            .with(Factor::Form, 0.5)
            .with(Factor::HomeAdvantage, 0.5);
        let eff = calculate_effective_weights(&weights, &availability);
        let with_form_input = expected_goals(&c, &eff, &ModelConfig::default(), &mut StdRng::seed_from_u64(3));

        let c2 = ctx(FactorInputs::default(), availability);
        let without = expected_goals(&c2, &eff, &ModelConfig::default(), &mut StdRng::seed_from_u64(3));
        assert_eq!(with_form_input, without);
    }

    #[test]
    fn steps_follow_documented_order() {
        let inputs = FactorInputs {
            form: Some((form(1, 2.0, 1.8, 1.0), form(2, 1.0, 1.1, 1.5))),
            expected_goals: None,
            odds: Some(MatchOdds {
                match_id: "m".to_string(),
                home: 1.8,
                draw: 3.6,
                away: 4.5,
                bookmakers: 3,
            }),
            squad: Some(SquadModifiers {
                home: 1.0,
                away: 0.7,
                basis: SquadBasis::Lineups,
            }),
            ratings: Some((1650.0, 1500.0)),
        };
        let availability = Availability::all().with(Factor::ExpectedGoals, false);
        let c = ctx(inputs, availability);
        let eff = calculate_effective_weights(&FactorWeights::default(), &availability);
        let out = expected_goals(&c, &eff, &ModelConfig::default(), &mut StdRng::seed_from_u64(9));
        let order: Vec<Factor> = out.trace.iter().map(|s| s.factor).collect();
        assert_eq!(
            order,
            vec![
                Factor::Form,
                Factor::HomeAdvantage,
                Factor::Market,
                Factor::SquadStrength,
                Factor::StrengthRating
            ]
        );
        assert!(out.expected_home_goals > out.expected_away_goals);
    }

    #[test]
    fn output_is_clamped_and_rounded_by_policy() {
        let inputs = FactorInputs {
            form: Some((form(1, 3.0, 9.0, 0.0), form(2, 0.0, 0.0, 9.0))),
            ..FactorInputs::default()
        };
        let availability = Availability::none().with(Factor::Form, true);
        let c = ctx(inputs, availability);
        let weights = FactorWeights::zero().with(Factor::Form, 1.0);
        let eff = calculate_effective_weights(&weights, &availability);
        let cfg = ModelConfig {
            max_home_goals: 2,
            rounding: RoundingPolicy::Ceil,
            ..ModelConfig::default()
        };
        let out = expected_goals(&c, &eff, &cfg, &mut StdRng::seed_from_u64(5));
        assert!(out.expected_home_goals <= 2.0);
        assert_eq!(out.predicted_home_score, 2);

        let floor = ModelConfig {
            rounding: RoundingPolicy::Floor,
            ..ModelConfig::default()
        };
        let out = expected_goals(&c, &eff, &floor, &mut StdRng::seed_from_u64(5));
        assert_eq!(
            f64::from(out.predicted_away_score),
            out.expected_away_goals.floor()
        );
    }

    #[test]
    fn jitter_is_bounded_and_reproducible() {
        let c = ctx(FactorInputs::default(), Availability::none());
        let eff = calculate_effective_weights(&FactorWeights::zero(), &Availability::none());
        let cfg = ModelConfig {
            variance: 0.3,
            ..ModelConfig::default()
        };
        let a = expected_goals(&c, &eff, &cfg, &mut StdRng::seed_from_u64(42));
        let b = expected_goals(&c, &eff, &cfg, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
        assert!((a.expected_home_goals - 1.3).abs() <= 0.3 + 1e-12);
        assert!((a.expected_away_goals - 1.3).abs() <= 0.3 + 1e-12);
    }

    #[test]
    fn rounding_policy_parses() {
        assert_eq!(RoundingPolicy::parse(" CEIL "), Some(RoundingPolicy::Ceil));
        assert_eq!(RoundingPolicy::parse("nearest"), None);
    }
}
