use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use criterion::{Criterion, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::hint::black_box;

use wc26_predictor::context::{ContextSources, FactorInputs, PredictionContext};
use wc26_predictor::fixtures::MatchRef;
use wc26_predictor::health::{HealthConfig, IntegrationHealthMonitor};
use wc26_predictor::league_params::LeagueBaseline;
use wc26_predictor::payload::{
    ExpectedGoalsMetrics, MatchOdds, SnapshotPayload, StrengthRating, TeamForm,
};
use wc26_predictor::provider::{CapabilityRegistry, SnapshotKey, SourceType};
use wc26_predictor::snapshot_cache::{SnapshotCache, TtlTable};
use wc26_predictor::weights::{Availability, Factor, FactorWeights, calculate_effective_weights};
use wc26_predictor::win_prob::outcome_probabilities;
use wc26_predictor::xg_model::{ModelConfig, expected_goals};

fn fixture(id: u32) -> MatchRef {
    MatchRef {
        id: format!("m{id}"),
        league_id: Some(1),
        home_team_id: id * 2,
        away_team_id: id * 2 + 1,
        home: format!("H{id}"),
        away: format!("A{id}"),
        kickoff_utc: Utc.with_ymd_and_hms(2026, 6, 12, 18, 0, 0).unwrap(),
    }
}

fn form(team_id: u32) -> TeamForm {
    TeamForm {
        team_id,
        matches: 6,
        points_per_game: 1.0 + f64::from(team_id % 5) * 0.3,
        goals_for_per_game: 1.2 + f64::from(team_id % 3) * 0.2,
        goals_against_per_game: 1.1,
    }
}

fn xg(team_id: u32) -> ExpectedGoalsMetrics {
    ExpectedGoalsMetrics {
        team_id,
        matches: 6,
        xg_for_per_game: 1.3 + f64::from(team_id % 4) * 0.1,
        xg_against_per_game: 1.2,
    }
}

fn full_inputs() -> FactorInputs {
    FactorInputs {
        form: Some((form(2), form(3))),
        expected_goals: Some((xg(2), xg(3))),
        odds: Some(MatchOdds {
            match_id: "m1".to_string(),
            home: 2.1,
            draw: 3.3,
            away: 3.6,
            bookmakers: 6,
        }),
        squad: None,
        ratings: Some((1720.0, 1655.0)),
    }
}

fn bench_effective_weights(c: &mut Criterion) {
    let weights = FactorWeights::default();
    let masks: Vec<Availability> = (0..64u32)
        .map(|mask| {
            let mut a = Availability::none();
            for f in Factor::ALL {
                a.set(f, mask & (1 << f.index()) != 0);
            }
            a
        })
        .collect();
    c.bench_function("effective_weights_all_masks", |b| {
        b.iter(|| {
            for a in &masks {
                let eff = calculate_effective_weights(black_box(&weights), black_box(a));
                black_box(eff.data_quality_score());
            }
        })
    });
}

fn bench_expected_goals(c: &mut Criterion) {
    let availability = Availability::all().with(Factor::SquadStrength, false);
    let ctx = PredictionContext {
        fixture: fixture(1),
        configured: FactorWeights::default(),
        baseline: LeagueBaseline::default(),
        inputs: full_inputs(),
        availability,
        built_at: Utc.with_ymd_and_hms(2026, 6, 11, 9, 0, 0).unwrap(),
    };
    let eff = calculate_effective_weights(&ctx.configured, &ctx.availability);
    let cfg = ModelConfig {
        variance: 0.15,
        ..ModelConfig::default()
    };
    let mut rng = StdRng::seed_from_u64(7);
    c.bench_function("expected_goals_full_inputs", |b| {
        b.iter(|| {
            let out = expected_goals(black_box(&ctx), &eff, &cfg, &mut rng);
            black_box(out.predicted_home_score);
        })
    });
}

fn bench_outcome_probabilities(c: &mut Criterion) {
    c.bench_function("outcome_probabilities", |b| {
        b.iter(|| {
            let p = outcome_probabilities(black_box(1.62), black_box(1.07));
            black_box(p.p_home);
        })
    });
}

fn bench_context_build(c: &mut Criterion) {
    let now = Utc.with_ymd_and_hms(2026, 6, 11, 9, 0, 0).unwrap();
    let cache = SnapshotCache::new(TtlTable::default());
    let fixtures: Vec<MatchRef> = (1..=48).map(fixture).collect();
    for m in &fixtures {
        for team in [m.home_team_id, m.away_team_id] {
            let at = now - ChronoDuration::hours(1);
            let _ = cache.put(
                SnapshotKey::team(SourceType::Form, team),
                SnapshotPayload::Form(form(team)),
                at,
            );
            let _ = cache.put(
                SnapshotKey::team(SourceType::ExpectedGoals, team),
                SnapshotPayload::ExpectedGoals(xg(team)),
                at,
            );
            let _ = cache.put(
                SnapshotKey::team(SourceType::StrengthRating, team),
                SnapshotPayload::StrengthRating(StrengthRating {
                    team_id: team,
                    rating: 1500.0 + f64::from(team),
                }),
                at,
            );
        }
    }
    let health = IntegrationHealthMonitor::new(HealthConfig::default());
    let capabilities = CapabilityRegistry::new()
        .with(SourceType::Form, "stats")
        .with(SourceType::ExpectedGoals, "stats")
        .with(SourceType::StrengthRating, "elo");
    let sources = ContextSources {
        cache: &cache,
        health: &health,
        capabilities: &capabilities,
    };
    c.bench_function("context_build_48_fixtures", |b| {
        b.iter(|| {
            for m in &fixtures {
                let ctx = PredictionContext::build(
                    m.clone(),
                    FactorWeights::default(),
                    LeagueBaseline::default(),
                    &sources,
                    now,
                );
                black_box(ctx.availability.is_usable(Factor::Form));
            }
        })
    });
}

fn bench_payload_parse(c: &mut Criterion) {
    c.bench_function("form_payload_parse", |b| {
        b.iter(|| {
            let payload = SnapshotPayload::from_json(SourceType::Form, black_box(FORM_JSON)).unwrap();
            black_box(payload.source_type());
        })
    });
}

criterion_group!(
    perf,
    bench_effective_weights,
    bench_expected_goals,
    bench_outcome_probabilities,
    bench_context_build,
    bench_payload_parse
);
criterion_main!(perf);

static FORM_JSON: &str = r#"{
    "team_id": 4,
    "matches": 6,
    "points_per_game": 2.17,
    "goals_for_per_game": 1.83,
    "goals_against_per_game": 0.67
}"#;
