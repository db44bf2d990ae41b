use chrono::{DateTime, Utc};

use crate::fixtures::MatchRef;
use crate::health::IntegrationHealthMonitor;
use crate::league_params::LeagueBaseline;
use crate::payload::{
    ExpectedGoalsMetrics, MatchOdds, SnapshotPayload, SquadAbsences, TeamForm, absence_modifier,
};
use crate::provider::{CapabilityRegistry, SnapshotKey, SourceType};
use crate::snapshot_cache::{Snapshot, SnapshotCache};
use crate::weights::{Availability, Factor, FactorWeights};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SquadBasis {
    Lineups,
    Absences,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SquadModifiers {
    pub home: f64,
    pub away: f64,
    pub basis: SquadBasis,
}

/// Inputs of usable factors only. A factor that failed any gate has no
/// input here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactorInputs {
    pub form: Option<(TeamForm, TeamForm)>,
    pub expected_goals: Option<(ExpectedGoalsMetrics, ExpectedGoalsMetrics)>,
    pub odds: Option<MatchOdds>,
    pub squad: Option<SquadModifiers>,
    pub ratings: Option<(f64, f64)>,
}

/// Everything known about one match at one instant. Built per request from
/// the cache and health state and thrown away afterwards.
#[derive(Debug, Clone)]
pub struct PredictionContext {
    pub fixture: MatchRef,
    pub configured: FactorWeights,
    pub baseline: LeagueBaseline,
    pub inputs: FactorInputs,
    pub availability: Availability,
    pub built_at: DateTime<Utc>,
}

/// Read-only view over the state a context is built from.
pub struct ContextSources<'a> {
    pub cache: &'a SnapshotCache,
    pub health: &'a IntegrationHealthMonitor,
    pub capabilities: &'a CapabilityRegistry,
}

impl ContextSources<'_> {
    /// A snapshot passes when its source is wired up, the snapshot exists
    /// and is fresh, and the owning provider is not down.
    fn usable(&self, key: &SnapshotKey, now: DateTime<Utc>) -> Option<Snapshot> {
        let provider = self.capabilities.provider_for(key.source)?;
        if !self.health.is_usable(provider) {
            return None;
        }
        self.cache.get_fresh(key, now)
    }

    /// Both sides of a symmetric factor, or nothing.
    fn usable_pair(
        &self,
        source: SourceType,
        fixture: &MatchRef,
        now: DateTime<Utc>,
    ) -> Option<(Snapshot, Snapshot)> {
        let home = self.usable(&SnapshotKey::team(source, fixture.home_team_id), now)?;
        let away = self.usable(&SnapshotKey::team(source, fixture.away_team_id), now)?;
        Some((home, away))
    }
}

impl PredictionContext {
    pub fn build(
        fixture: MatchRef,
        configured: FactorWeights,
        baseline: LeagueBaseline,
        sources: &ContextSources<'_>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut inputs = FactorInputs::default();

        if let Some((h, a)) = sources.usable_pair(SourceType::Form, &fixture, now) {
            if let (SnapshotPayload::Form(h), SnapshotPayload::Form(a)) =
                (h.payload.as_ref(), a.payload.as_ref())
            {
                inputs.form = Some((h.clone(), a.clone()));
            }
        }

        if let Some((h, a)) = sources.usable_pair(SourceType::ExpectedGoals, &fixture, now) {
            if let (SnapshotPayload::ExpectedGoals(h), SnapshotPayload::ExpectedGoals(a)) =
                (h.payload.as_ref(), a.payload.as_ref())
            {
                inputs.expected_goals = Some((h.clone(), a.clone()));
            }
        }

        if let Some((h, a)) = sources.usable_pair(SourceType::StrengthRating, &fixture, now) {
            if let (SnapshotPayload::StrengthRating(h), SnapshotPayload::StrengthRating(a)) =
                (h.payload.as_ref(), a.payload.as_ref())
            {
                inputs.ratings = Some((h.rating, a.rating));
            }
        }

        let odds_key = SnapshotKey::fixture(SourceType::MatchOdds, fixture.id.clone());
        if let Some(snap) = sources.usable(&odds_key, now) {
            if let SnapshotPayload::MatchOdds(odds) = snap.payload.as_ref() {
                if odds.implied_probabilities().is_some() {
                    inputs.odds = Some(odds.clone());
                }
            }
        }

        inputs.squad = squad_modifiers(sources, &fixture, now);

        let mut availability = Availability::none();
        availability.set(Factor::Form, inputs.form.is_some());
        availability.set(Factor::HomeAdvantage, true);
        availability.set(Factor::ExpectedGoals, inputs.expected_goals.is_some());
        availability.set(Factor::Market, inputs.odds.is_some());
        availability.set(Factor::SquadStrength, inputs.squad.is_some());
        availability.set(Factor::StrengthRating, inputs.ratings.is_some());

        Self {
            fixture,
            configured,
            baseline,
            inputs,
            availability,
            built_at: now,
        }
    }
}

/// Lineups win when usable; otherwise injury lists for both sides, with
/// suspensions folded in when those are usable too.
fn squad_modifiers(
    sources: &ContextSources<'_>,
    fixture: &MatchRef,
    now: DateTime<Utc>,
) -> Option<SquadModifiers> {
    let lineup_key = SnapshotKey::fixture(SourceType::Lineups, fixture.id.clone());
    if let Some(snap) = sources.usable(&lineup_key, now) {
        if let SnapshotPayload::Lineups(lineup) = snap.payload.as_ref() {
            let home = lineup.side_for(fixture.home_team_id);
            let away = lineup.side_for(fixture.away_team_id);
            if let (Some(home), Some(away)) = (home, away) {
                return Some(SquadModifiers {
                    home: home.strength_modifier(),
                    away: away.strength_modifier(),
                    basis: SquadBasis::Lineups,
                });
            }
        }
    }

    let (h, a) = sources.usable_pair(SourceType::Injuries, fixture, now)?;
    let (SnapshotPayload::Injuries(h), SnapshotPayload::Injuries(a)) =
        (h.payload.as_ref(), a.payload.as_ref())
    else {
        return None;
    };
    let suspensions = sources.usable_pair(SourceType::Suspensions, fixture, now);
    let (sh, sa) = match suspensions.as_ref() {
        Some((sh, sa)) => (absences_of(sh), absences_of(sa)),
        None => (None, None),
    };
    Some(SquadModifiers {
        home: absence_modifier(h, sh),
        away: absence_modifier(a, sa),
        basis: SquadBasis::Absences,
    })
}

fn absences_of(snapshot: &Snapshot) -> Option<&SquadAbsences> {
    match snapshot.payload.as_ref() {
        SnapshotPayload::Suspensions(s) => Some(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{FailureKind, HealthConfig};
    use crate::payload::{ExpectedGoalsMetrics, StrengthRating};
    use crate::provider::ProviderId;
    use crate::snapshot_cache::TtlTable;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 11, 12, 0, 0).unwrap()
    }

    fn fixture() -> MatchRef {
        MatchRef {
            id: "m1".to_string(),
            league_id: Some(47),
            home_team_id: 1,
            away_team_id: 2,
            home: "LIV".to_string(),
            away: "MCI".to_string(),
            kickoff_utc: now() + ChronoDuration::hours(20),
        }
    }

    fn rating(team_id: u32) -> SnapshotPayload {
        SnapshotPayload::StrengthRating(StrengthRating {
            team_id,
            rating: 1500.0 + team_id as f64,
        })
    }

    fn xg(team_id: u32) -> SnapshotPayload {
        SnapshotPayload::ExpectedGoals(ExpectedGoalsMetrics {
            team_id,
            matches: 8,
            xg_for_per_game: 1.5,
            xg_against_per_game: 1.2,
        })
    }

    #[test]
    fn one_stale_side_makes_symmetric_factor_unusable() {
        let cache = SnapshotCache::new(TtlTable::default());
        let health = IntegrationHealthMonitor::new(HealthConfig::default());
        let caps = CapabilityRegistry::new().with(SourceType::StrengthRating, "clubelo");
        cache
            .put(SnapshotKey::team(SourceType::StrengthRating, 1), rating(1), now())
            .unwrap();
        cache
            .put(
                SnapshotKey::team(SourceType::StrengthRating, 2),
                rating(2),
                now() - ChronoDuration::hours(50),
            )
            .unwrap();
        let sources = ContextSources {
            cache: &cache,
            health: &health,
            capabilities: &caps,
        };
        let ctx = PredictionContext::build(
            fixture(),
            FactorWeights::default(),
            LeagueBaseline::default(),
            &sources,
            now(),
        );
        assert!(!ctx.availability.is_usable(Factor::StrengthRating));
        assert!(ctx.inputs.ratings.is_none());
        assert!(ctx.availability.is_usable(Factor::HomeAdvantage));
    }

    #[test]
    fn down_provider_hides_fresh_snapshots() {
        let cache = SnapshotCache::new(TtlTable::default());
        let health = IntegrationHealthMonitor::new(HealthConfig::default());
        let caps = CapabilityRegistry::new().with(SourceType::ExpectedGoals, "understat");
        for team in [1, 2] {
            cache
                .put(SnapshotKey::team(SourceType::ExpectedGoals, team), xg(team), now())
                .unwrap();
        }
        let sources = ContextSources {
            cache: &cache,
            health: &health,
            capabilities: &caps,
        };
        let build = || {
            PredictionContext::build(
                fixture(),
                FactorWeights::default(),
                LeagueBaseline::default(),
                &sources,
                now(),
            )
        };
        assert!(build().availability.is_usable(Factor::ExpectedGoals));

        let provider = ProviderId::new("understat");
        for _ in 0..5 {
            health.record_failure(&provider, now(), FailureKind::Transport);
        }
        assert!(!build().availability.is_usable(Factor::ExpectedGoals));
    }

    #[test]
    fn unregistered_source_is_unusable_even_when_cached() {
        let cache = SnapshotCache::new(TtlTable::default());
        let health = IntegrationHealthMonitor::new(HealthConfig::default());
        let caps = CapabilityRegistry::new();
        for team in [1, 2] {
            cache
                .put(SnapshotKey::team(SourceType::ExpectedGoals, team), xg(team), now())
                .unwrap();
        }
        let sources = ContextSources {
            cache: &cache,
            health: &health,
            capabilities: &caps,
        };
        let ctx = PredictionContext::build(
            fixture(),
            FactorWeights::default(),
            LeagueBaseline::default(),
            &sources,
            now(),
        );
        assert!(!ctx.availability.is_usable(Factor::ExpectedGoals));
    }
}
