use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::{EntityKey, SourceType};

const REGULAR_STARTERS: f64 = 11.0;
pub const SQUAD_MODIFIER_MIN: f64 = 0.5;
pub const SQUAD_MODIFIER_MAX: f64 = 1.0;

/// Recent results summary for one team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TeamForm {
    pub team_id: u32,
    pub matches: u32,
    pub points_per_game: f64,
    pub goals_for_per_game: f64,
    pub goals_against_per_game: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpectedGoalsMetrics {
    pub team_id: u32,
    pub matches: u32,
    pub xg_for_per_game: f64,
    pub xg_against_per_game: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrengthRating {
    pub team_id: u32,
    pub rating: f64,
}

/// Decimal 1X2 prices for one match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchOdds {
    pub match_id: String,
    pub home: f64,
    pub draw: f64,
    pub away: f64,
    #[serde(default)]
    pub bookmakers: u32,
}

impl MatchOdds {
    /// Implied (home, draw, away) probabilities with the overround removed.
    pub fn implied_probabilities(&self) -> Option<(f64, f64, f64)> {
        if self.home <= 1.0 || self.draw <= 1.0 || self.away <= 1.0 {
            return None;
        }
        let (h, d, a) = (1.0 / self.home, 1.0 / self.draw, 1.0 / self.away);
        let book = h + d + a;
        if !book.is_finite() || book <= 0.0 {
            return None;
        }
        Some((h / book, d / book, a / book))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlayerAbsence {
    pub player_id: u32,
    pub name: String,
    /// Share of the side's strength this player accounts for, 0..=1.
    pub impact: f64,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Absence list for one team. Used for both injuries and suspensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SquadAbsences {
    pub team_id: u32,
    #[serde(default)]
    pub absences: Vec<PlayerAbsence>,
}

impl SquadAbsences {
    pub fn total_impact(&self) -> f64 {
        self.absences.iter().map(|a| a.impact.clamp(0.0, 1.0)).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LineupPlayer {
    pub player_id: u32,
    pub name: String,
    #[serde(default)]
    pub position: Option<String>,
    /// Whether this player is part of the side's usual first eleven.
    pub regular_starter: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LineupSide {
    pub team_id: u32,
    #[serde(default)]
    pub formation: Option<String>,
    pub starters: Vec<LineupPlayer>,
}

impl LineupSide {
    /// Squad-strength modifier in `[0.5, 1.0]` from the share of regular
    /// starters actually fielded.
    pub fn strength_modifier(&self) -> f64 {
        let regulars = self.starters.iter().filter(|p| p.regular_starter).count() as f64;
        let share = (regulars / REGULAR_STARTERS).clamp(0.0, 1.0);
        (SQUAD_MODIFIER_MIN + (1.0 - SQUAD_MODIFIER_MIN) * share)
            .clamp(SQUAD_MODIFIER_MIN, SQUAD_MODIFIER_MAX)
    }
}

/// Confirmed lineups for one match. The player list is an owned value list
/// of the lineup and is only flattened to text at the storage boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchLineup {
    pub match_id: String,
    pub kickoff_utc: DateTime<Utc>,
    pub sides: Vec<LineupSide>,
}

impl MatchLineup {
    pub fn side_for(&self, team_id: u32) -> Option<&LineupSide> {
        self.sides.iter().find(|s| s.team_id == team_id)
    }
}

/// Modifier in `[0.5, 1.0]` from listed absences: every unit of impact
/// costs half the side's strength.
pub fn absence_modifier(injuries: &SquadAbsences, suspensions: Option<&SquadAbsences>) -> f64 {
    let impact = injuries.total_impact() + suspensions.map(|s| s.total_impact()).unwrap_or(0.0);
    (1.0 - (1.0 - SQUAD_MODIFIER_MIN) * impact).clamp(SQUAD_MODIFIER_MIN, SQUAD_MODIFIER_MAX)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SnapshotPayload {
    Form(TeamForm),
    ExpectedGoals(ExpectedGoalsMetrics),
    StrengthRating(StrengthRating),
    MatchOdds(MatchOdds),
    Injuries(SquadAbsences),
    Lineups(MatchLineup),
    Suspensions(SquadAbsences),
}

impl SnapshotPayload {
    pub fn source_type(&self) -> SourceType {
        match self {
            SnapshotPayload::Form(_) => SourceType::Form,
            SnapshotPayload::ExpectedGoals(_) => SourceType::ExpectedGoals,
            SnapshotPayload::StrengthRating(_) => SourceType::StrengthRating,
            SnapshotPayload::MatchOdds(_) => SourceType::MatchOdds,
            SnapshotPayload::Injuries(_) => SourceType::Injuries,
            SnapshotPayload::Lineups(_) => SourceType::Lineups,
            SnapshotPayload::Suspensions(_) => SourceType::Suspensions,
        }
    }

    /// Kickoff the payload is anchored to, for event-anchored feeds.
    pub fn anchor(&self) -> Option<DateTime<Utc>> {
        match self {
            SnapshotPayload::Lineups(l) => Some(l.kickoff_utc),
            _ => None,
        }
    }

    /// The team or match the payload describes.
    pub fn entity(&self) -> EntityKey {
        match self {
            SnapshotPayload::Form(f) => EntityKey::Team(f.team_id),
            SnapshotPayload::ExpectedGoals(x) => EntityKey::Team(x.team_id),
            SnapshotPayload::StrengthRating(r) => EntityKey::Team(r.team_id),
            SnapshotPayload::Injuries(s) | SnapshotPayload::Suspensions(s) => {
                EntityKey::Team(s.team_id)
            }
            SnapshotPayload::MatchOdds(o) => EntityKey::Match(o.match_id.clone()),
            SnapshotPayload::Lineups(l) => EntityKey::Match(l.match_id.clone()),
        }
    }

    /// Decodes a provider body that is already in this crate's normalised
    /// shape for `source`.
    pub fn from_json(source: SourceType, raw: &str) -> serde_json::Result<Self> {
        let trimmed = raw.trim();
        Ok(match source {
            SourceType::Form => SnapshotPayload::Form(serde_json::from_str(trimmed)?),
            SourceType::ExpectedGoals => {
                SnapshotPayload::ExpectedGoals(serde_json::from_str(trimmed)?)
            }
            SourceType::StrengthRating => {
                SnapshotPayload::StrengthRating(serde_json::from_str(trimmed)?)
            }
            SourceType::MatchOdds => SnapshotPayload::MatchOdds(serde_json::from_str(trimmed)?),
            SourceType::Injuries => SnapshotPayload::Injuries(serde_json::from_str(trimmed)?),
            SourceType::Lineups => SnapshotPayload::Lineups(serde_json::from_str(trimmed)?),
            SourceType::Suspensions => {
                SnapshotPayload::Suspensions(serde_json::from_str(trimmed)?)
            }
        })
    }

    /// Rejects values that parse but cannot be meaningful.
    pub fn validate(&self) -> Result<(), String> {
        fn finite_non_negative(name: &str, v: f64) -> Result<(), String> {
            if v.is_finite() && v >= 0.0 {
                Ok(())
            } else {
                Err(format!("{name} must be a finite non-negative number, got {v}"))
            }
        }

        match self {
            SnapshotPayload::Form(f) => {
                finite_non_negative("points_per_game", f.points_per_game)?;
                finite_non_negative("goals_for_per_game", f.goals_for_per_game)?;
                finite_non_negative("goals_against_per_game", f.goals_against_per_game)?;
                if f.points_per_game > 3.0 {
                    return Err(format!("points_per_game {} above 3", f.points_per_game));
                }
            }
            SnapshotPayload::ExpectedGoals(x) => {
                finite_non_negative("xg_for_per_game", x.xg_for_per_game)?;
                finite_non_negative("xg_against_per_game", x.xg_against_per_game)?;
            }
            SnapshotPayload::StrengthRating(r) => {
                if !r.rating.is_finite() {
                    return Err("rating must be finite".to_string());
                }
            }
            SnapshotPayload::MatchOdds(o) => {
                if o.implied_probabilities().is_none() {
                    return Err("odds must all be decimal prices above 1.0".to_string());
                }
            }
            SnapshotPayload::Injuries(s) | SnapshotPayload::Suspensions(s) => {
                for a in &s.absences {
                    finite_non_negative("impact", a.impact)?;
                }
            }
            SnapshotPayload::Lineups(l) => {
                if l.sides.len() != 2 {
                    return Err(format!("lineup needs two sides, got {}", l.sides.len()));
                }
                if l.sides.iter().any(|s| s.starters.is_empty()) {
                    return Err("lineup side without starters".to_string());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn starter(id: u32, regular: bool) -> LineupPlayer {
        LineupPlayer {
            player_id: id,
            name: format!("P{id}"),
            position: None,
            regular_starter: regular,
        }
    }

    #[test]
    fn implied_probabilities_remove_overround() {
        let odds = MatchOdds {
            match_id: "m".to_string(),
            home: 2.0,
            draw: 3.4,
            away: 3.8,
            bookmakers: 4,
        };
        let (h, d, a) = odds.implied_probabilities().unwrap();
        assert!((h + d + a - 1.0).abs() < 1e-12);
        assert!(h > a);
    }

    #[test]
    fn full_strength_lineup_has_unit_modifier() {
        let side = LineupSide {
            team_id: 1,
            formation: None,
            starters: (0..11).map(|i| starter(i, true)).collect(),
        };
        assert!((side.strength_modifier() - 1.0).abs() < 1e-12);

        let weakened = LineupSide {
            team_id: 1,
            formation: None,
            starters: (0..11).map(|i| starter(i, i < 5)).collect(),
        };
        let m = weakened.strength_modifier();
        assert!(m >= SQUAD_MODIFIER_MIN && m < 1.0);
    }

    #[test]
    fn absence_modifier_is_bounded() {
        let heavy = SquadAbsences {
            team_id: 1,
            absences: (0..8)
                .map(|i| PlayerAbsence {
                    player_id: i,
                    name: format!("P{i}"),
                    impact: 0.3,
                    reason: None,
                })
                .collect(),
        };
        assert_eq!(absence_modifier(&heavy, None), SQUAD_MODIFIER_MIN);

        let empty = SquadAbsences {
            team_id: 1,
            absences: Vec::new(),
        };
        assert_eq!(absence_modifier(&empty, Some(&empty)), 1.0);
    }

    #[test]
    fn decodes_normalised_form_body() {
        let raw = r#"{"team_id":9,"matches":6,"points_per_game":2.1,"goals_for_per_game":1.9,"goals_against_per_game":0.8}"#;
        let payload = SnapshotPayload::from_json(SourceType::Form, raw).unwrap();
        assert_eq!(payload.source_type(), SourceType::Form);
        assert!(payload.validate().is_ok());
        assert!(SnapshotPayload::from_json(SourceType::Form, r#"{"team_id":9}"#).is_err());
    }

    #[test]
    fn lineup_requires_two_sides() {
        let payload = SnapshotPayload::Lineups(MatchLineup {
            match_id: "m".to_string(),
            kickoff_utc: Utc::now(),
            sides: vec![LineupSide {
                team_id: 1,
                formation: None,
                starters: vec![starter(1, true)],
            }],
        });
        assert!(payload.validate().is_err());
    }
}
