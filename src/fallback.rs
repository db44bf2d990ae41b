use serde::Deserialize;

use crate::win_prob::{Outcome, OutcomeProbabilities};

/// The heuristic served when too little data is usable to fuse factors.
/// Every number is configuration; nothing is read from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FallbackConfig {
    #[serde(default = "default_home_win_prob")]
    pub home_win_prob: f64,
    #[serde(default = "default_draw_prob")]
    pub draw_prob: f64,
    #[serde(default = "default_home_expected_goals")]
    pub home_expected_goals: f64,
    #[serde(default = "default_away_expected_goals")]
    pub away_expected_goals: f64,
    #[serde(default = "default_home_win_score")]
    pub home_win_score: (u8, u8),
    #[serde(default = "default_draw_score")]
    pub draw_score: (u8, u8),
    #[serde(default = "default_away_win_score")]
    pub away_win_score: (u8, u8),
}

fn default_home_win_prob() -> f64 {
    0.45
}

fn default_draw_prob() -> f64 {
    0.27
}

fn default_home_expected_goals() -> f64 {
    1.45
}

fn default_away_expected_goals() -> f64 {
    1.15
}

fn default_home_win_score() -> (u8, u8) {
    (2, 1)
}

fn default_draw_score() -> (u8, u8) {
    (1, 1)
}

fn default_away_win_score() -> (u8, u8) {
    (1, 2)
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            home_win_prob: default_home_win_prob(),
            draw_prob: default_draw_prob(),
            home_expected_goals: default_home_expected_goals(),
            away_expected_goals: default_away_expected_goals(),
            home_win_score: default_home_win_score(),
            draw_score: default_draw_score(),
            away_win_score: default_away_win_score(),
        }
    }
}

impl FallbackConfig {
    pub fn away_win_prob(&self) -> f64 {
        (1.0 - self.home_win_prob - self.draw_prob).max(0.0)
    }

    pub fn validate(&self) -> Result<(), (&'static str, String)> {
        for (name, p) in [
            ("fallback.home_win_prob", self.home_win_prob),
            ("fallback.draw_prob", self.draw_prob),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err((name, format!("must be within [0, 1], got {p}")));
            }
        }
        if self.home_win_prob + self.draw_prob > 1.0 + 1e-9 {
            return Err((
                "fallback.draw_prob",
                "home_win_prob + draw_prob exceeds 1".to_string(),
            ));
        }
        for (name, g) in [
            ("fallback.home_expected_goals", self.home_expected_goals),
            ("fallback.away_expected_goals", self.away_expected_goals),
        ] {
            if !g.is_finite() || g < 0.0 {
                return Err((name, format!("must be >= 0, got {g}")));
            }
        }
        let (h, a) = self.home_win_score;
        if h <= a {
            return Err(("fallback.home_win_score", format!("{h}-{a} is not a home win")));
        }
        let (h, a) = self.draw_score;
        if h != a {
            return Err(("fallback.draw_score", format!("{h}-{a} is not a draw")));
        }
        let (h, a) = self.away_win_score;
        if h >= a {
            return Err(("fallback.away_win_score", format!("{h}-{a} is not an away win")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FallbackPrediction {
    pub expected_home_goals: f64,
    pub expected_away_goals: f64,
    pub predicted_home_score: u8,
    pub predicted_away_score: u8,
    pub outcome: Outcome,
    pub probabilities: OutcomeProbabilities,
}

#[derive(Debug, Clone, Copy)]
pub struct FallbackPolicy {
    cfg: FallbackConfig,
}

impl FallbackPolicy {
    pub fn new(cfg: FallbackConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &FallbackConfig {
        &self.cfg
    }

    /// Picks the most likely outcome of the configured distribution and
    /// returns its scoreline. Same config, same answer.
    pub fn predict(&self) -> FallbackPrediction {
        let probabilities = OutcomeProbabilities::from_fractions(
            self.cfg.home_win_prob,
            self.cfg.draw_prob,
            self.cfg.away_win_prob(),
        );
        let outcome = probabilities.favourite();
        let (home, away) = match outcome {
            Outcome::HomeWin => self.cfg.home_win_score,
            Outcome::Draw => self.cfg.draw_score,
            Outcome::AwayWin => self.cfg.away_win_score,
        };
        FallbackPrediction {
            expected_home_goals: self.cfg.home_expected_goals,
            expected_away_goals: self.cfg.away_expected_goals,
            predicted_home_score: home,
            predicted_away_score: away,
            outcome,
            probabilities,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_leans_home() {
        let p = FallbackPolicy::new(FallbackConfig::default()).predict();
        assert_eq!(p.outcome, Outcome::HomeWin);
        assert_eq!((p.predicted_home_score, p.predicted_away_score), (2, 1));
        assert!((p.probabilities.p_draw - 27.0).abs() < 1e-9);
        assert!((p.probabilities.p_away - 28.0).abs() < 1e-9);
    }

    #[test]
    fn draw_heavy_config_predicts_draw() {
        let cfg = FallbackConfig {
            home_win_prob: 0.30,
            draw_prob: 0.40,
            ..FallbackConfig::default()
        };
        let p = FallbackPolicy::new(cfg).predict();
        assert_eq!(p.outcome, Outcome::Draw);
        assert_eq!((p.predicted_home_score, p.predicted_away_score), (1, 1));
    }

    #[test]
    fn rejects_inconsistent_scorelines_and_probabilities() {
        let bad = FallbackConfig {
            draw_score: (2, 1),
            ..FallbackConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = FallbackConfig {
            home_win_prob: 0.8,
            draw_prob: 0.3,
            ..FallbackConfig::default()
        };
        assert!(bad.validate().is_err());
        assert!(FallbackConfig::default().validate().is_ok());
    }
}
