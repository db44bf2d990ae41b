use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::results::StoredMatch;

pub const INITIAL_RATING: f64 = 1500.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EloConfig {
    #[serde(default = "default_k")]
    pub k: f64,
    #[serde(default = "default_home_adv_pts")]
    pub home_adv_pts: f64,
}

fn default_k() -> f64 {
    20.0
}

fn default_home_adv_pts() -> f64 {
    60.0
}

impl Default for EloConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            home_adv_pts: default_home_adv_pts(),
        }
    }
}

/// Replays counted results in kickoff order and returns the final rating per
/// team id.
pub fn compute_elo(results: &[StoredMatch], cfg: EloConfig) -> HashMap<u32, f64> {
    let mut matches: Vec<(&StoredMatch, (i32, i32))> = results
        .iter()
        .filter_map(|m| m.counted_score().map(|score| (m, score)))
        .collect();
    matches.sort_by(|(a, _), (b, _)| {
        a.utc_time
            .cmp(&b.utc_time)
            .then(a.match_id.cmp(&b.match_id))
    });

    let mut elo: HashMap<u32, f64> = HashMap::new();
    for (m, (home_goals, away_goals)) in matches {
        let eh = *elo.entry(m.home_team_id).or_insert(INITIAL_RATING);
        let ea = *elo.entry(m.away_team_id).or_insert(INITIAL_RATING);

        let expected_home = expected_score(eh + cfg.home_adv_pts, ea);
        let s_home = if home_goals > away_goals {
            1.0
        } else if home_goals < away_goals {
            0.0
        } else {
            0.5
        };

        let delta = cfg.k * (s_home - expected_home);
        elo.insert(m.home_team_id, eh + delta);
        elo.insert(m.away_team_id, ea - delta);
    }

    elo
}

/// Probability-like score of `r_a` against `r_b` on the usual 400-point
/// logistic scale.
pub fn expected_score(r_a: f64, r_b: f64) -> f64 {
    expected_score_scaled(r_a, r_b, 400.0)
}

pub fn expected_score_scaled(r_a: f64, r_b: f64, scale: f64) -> f64 {
    let scale = if scale > 0.0 { scale } else { 400.0 };
    1.0 / (1.0 + 10.0_f64.powf(-(r_a - r_b) / scale))
}

/// Rating difference mapped to `(-1, 1)`; zero for equal teams.
pub fn rating_edge(home: f64, away: f64, scale: f64) -> f64 {
    2.0 * expected_score_scaled(home, away, scale) - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::tests::played;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    #[test]
    fn winner_gains_what_loser_drops() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 15, 0, 0).unwrap();
        let results = vec![
            played("1", t, 1, 2, 3, 0),
            played("2", t + ChronoDuration::days(7), 2, 1, 0, 1),
        ];
        let elo = compute_elo(&results, EloConfig::default());
        let (r1, r2) = (elo[&1], elo[&2]);
        assert!(r1 > INITIAL_RATING);
        assert!((r1 + r2 - 2.0 * INITIAL_RATING).abs() < 1e-9);
    }

    #[test]
    fn edge_is_symmetric_and_bounded() {
        assert_eq!(rating_edge(1600.0, 1600.0, 400.0), 0.0);
        let e = rating_edge(1800.0, 1400.0, 400.0);
        assert!(e > 0.0 && e < 1.0);
        assert!((rating_edge(1400.0, 1800.0, 400.0) + e).abs() < 1e-12);
    }
}
