use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::results::StoredMatch;

/// Sample size at which observed league averages fully replace defaults.
const MIN_N: f64 = 200.0;

/// League-average goal environment the model starts from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LeagueBaseline {
    #[serde(default = "default_goals_total_base")]
    pub goals_total_base: f64,
    /// Mean home-minus-away goal difference.
    #[serde(default = "default_home_adv_goals")]
    pub home_adv_goals: f64,
}

fn default_goals_total_base() -> f64 {
    2.60
}

fn default_home_adv_goals() -> f64 {
    0.30
}

impl Default for LeagueBaseline {
    fn default() -> Self {
        Self {
            goals_total_base: default_goals_total_base(),
            home_adv_goals: default_home_adv_goals(),
        }
    }
}

impl LeagueBaseline {
    pub fn per_side(&self) -> f64 {
        self.goals_total_base / 2.0
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.goals_total_base.is_finite() || self.goals_total_base <= 0.0 {
            return Err(format!(
                "goals_total_base must be positive, got {}",
                self.goals_total_base
            ));
        }
        if !self.home_adv_goals.is_finite() || self.home_adv_goals.abs() >= self.goals_total_base {
            return Err(format!(
                "home_adv_goals must be smaller than goals_total_base, got {}",
                self.home_adv_goals
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct LeagueBaselines {
    default: LeagueBaseline,
    per_league: HashMap<u32, LeagueBaseline>,
}

impl LeagueBaselines {
    pub fn new(default: LeagueBaseline) -> Self {
        Self {
            default,
            per_league: HashMap::new(),
        }
    }

    pub fn insert(&mut self, league_id: u32, baseline: LeagueBaseline) {
        self.per_league.insert(league_id, baseline);
    }

    pub fn for_league(&self, league_id: Option<u32>) -> LeagueBaseline {
        league_id
            .and_then(|id| self.per_league.get(&id).copied())
            .unwrap_or(self.default)
    }

    pub fn len(&self) -> usize {
        self.per_league.len()
    }

    pub fn is_empty(&self) -> bool {
        self.per_league.is_empty()
    }
}

/// Observed averages for one league, shrunk toward `defaults` while the
/// sample is small.
pub fn compute_league_baseline(
    league_id: u32,
    results: &[StoredMatch],
    defaults: LeagueBaseline,
) -> (LeagueBaseline, usize) {
    let mut total_goals = 0.0;
    let mut home_minus_away = 0.0;
    let mut n = 0usize;

    for m in results {
        if m.league_id != league_id {
            continue;
        }
        let Some((home_goals, away_goals)) = m.counted_score() else {
            continue;
        };
        total_goals += f64::from(home_goals) + f64::from(away_goals);
        home_minus_away += f64::from(home_goals) - f64::from(away_goals);
        n += 1;
    }

    if n == 0 {
        return (defaults, 0);
    }

    let observed_total = total_goals / n as f64;
    let observed_adv = home_minus_away / n as f64;
    let w = (n as f64 / MIN_N).clamp(0.0, 1.0);
    let baseline = LeagueBaseline {
        goals_total_base: (1.0 - w) * defaults.goals_total_base + w * observed_total,
        home_adv_goals: (1.0 - w) * defaults.home_adv_goals + w * observed_adv,
    };
    (baseline, n)
}

pub fn baselines_from_results(
    results: &[StoredMatch],
    defaults: LeagueBaseline,
) -> LeagueBaselines {
    let mut out = LeagueBaselines::new(defaults);
    let mut league_ids: Vec<u32> = results.iter().map(|m| m.league_id).collect();
    league_ids.sort_unstable();
    league_ids.dedup();
    for league_id in league_ids {
        let (baseline, n) = compute_league_baseline(league_id, results, defaults);
        if n > 0 && baseline.validate().is_ok() {
            out.insert(league_id, baseline);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::tests::played;
    use chrono::{TimeZone, Utc};

    #[test]
    fn small_samples_stay_near_defaults() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 15, 0, 0).unwrap();
        let results = vec![played("1", t, 1, 2, 6, 4)];
        let (b, n) = compute_league_baseline(47, &results, LeagueBaseline::default());
        assert_eq!(n, 1);
        assert!(b.goals_total_base > 2.60 && b.goals_total_base < 2.70);
    }

    #[test]
    fn unknown_league_uses_default() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 15, 0, 0).unwrap();
        let results: Vec<StoredMatch> = (0..400)
            .map(|i| played(&i.to_string(), t, 1, 2, 2, 1))
            .collect();
        let baselines = baselines_from_results(&results, LeagueBaseline::default());
        let pl = baselines.for_league(Some(47));
        assert!((pl.goals_total_base - 3.0).abs() < 1e-9);
        assert!((pl.home_adv_goals - 1.0).abs() < 1e-9);
        assert_eq!(baselines.for_league(Some(99)), LeagueBaseline::default());
        assert_eq!(baselines.for_league(None), LeagueBaseline::default());
    }
}
