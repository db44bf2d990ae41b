//! The prediction surface.
//!
//! [`PredictionEngine`] owns the shared acquisition state (cache, health,
//! quota) and the scheduler that feeds it. Predictions only read that state:
//! a request never waits on the network and never fails for lack of data.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use rand::Rng;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::clock::{Clock, SystemClock};
use crate::config::{EngineConfig, PredictionConfig, ProviderKind};
use crate::context::{ContextSources, PredictionContext};
use crate::error::{PredictError, RefreshError};
use crate::fallback::FallbackPolicy;
use crate::fetch::{EloRatingFetcher, FeedFetcher, HttpFeedFetcher};
use crate::fixtures::{FixtureSource, InMemoryFixtures, MatchRef};
use crate::health::{IntegrationHealthMonitor, IntegrationStatus};
use crate::league_params::{LeagueBaselines, baselines_from_results};
use crate::provider::{CapabilityRegistry, ProviderId, SnapshotKey, SourceType};
use crate::quota::{QuotaBudgetManager, QuotaState};
use crate::results::ResultsDb;
use crate::scheduler::{AcquisitionScheduler, Feed, FeedSpec, RunReport};
use crate::snapshot_cache::{Snapshot, SnapshotCache, TtlTable};
use crate::snapshot_store::SnapshotStore;
use crate::weights::{
    Factor, FactorWeights, calculate_effective_weights, can_make_prediction, degradation_warning,
};
use crate::win_prob::{OutcomeProbabilities, outcome_probabilities};
use crate::xg_model::{ModelConfig, expected_goals};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScorePrediction {
    pub match_id: String,
    pub home: String,
    pub away: String,
    pub kickoff_utc: DateTime<Utc>,
    pub expected_home_goals: f64,
    pub expected_away_goals: f64,
    pub predicted_home_score: u8,
    pub predicted_away_score: u8,
    /// Share (0..=100) of configured weight backed by usable data.
    pub data_quality_score: f64,
    pub degradation_warning: Option<String>,
    pub used_fallback: bool,
    pub probabilities: OutcomeProbabilities,
    pub effective_weights: BTreeMap<Factor, f64>,
}

pub struct EngineBuilder {
    cfg: EngineConfig,
    clock: Arc<dyn Clock>,
    fixtures: Option<Arc<dyn FixtureSource>>,
    fetchers: HashMap<SourceType, Arc<dyn FeedFetcher>>,
    store: Option<Arc<SnapshotStore>>,
    results: Option<Arc<ResultsDb>>,
}

impl EngineBuilder {
    pub fn new(cfg: EngineConfig) -> Self {
        Self {
            cfg,
            clock: Arc::new(SystemClock),
            fixtures: None,
            fetchers: HashMap::new(),
            store: None,
            results: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Reference data for matches. Defaults to the results database when
    /// one is configured, otherwise an empty in-memory table.
    pub fn fixtures(mut self, fixtures: Arc<dyn FixtureSource>) -> Self {
        self.fixtures = Some(fixtures);
        self
    }

    /// Replaces the fetcher built from configuration for the fetcher's source.
    pub fn fetcher(mut self, fetcher: Arc<dyn FeedFetcher>) -> Self {
        self.fetchers.insert(fetcher.source(), fetcher);
        self
    }

    pub fn snapshot_store(mut self, store: Arc<SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn results(mut self, results: Arc<ResultsDb>) -> Self {
        self.results = Some(results);
        self
    }

    pub fn build(self) -> Result<PredictionEngine> {
        let EngineBuilder {
            cfg,
            clock,
            fixtures,
            mut fetchers,
            store,
            results,
        } = self;
        cfg.validate().context("invalid engine config")?;

        let results = match (results, cfg.storage.results_db.as_ref()) {
            (Some(db), _) => Some(db),
            (None, Some(path)) => Some(Arc::new(
                ResultsDb::open(path)
                    .with_context(|| format!("open results db {}", path.display()))?,
            )),
            (None, None) => None,
        };
        let store = match (store, cfg.storage.snapshot_db.as_ref()) {
            (Some(store), _) => Some(store),
            (None, Some(path)) => Some(
                SnapshotStore::open(path)
                    .with_context(|| format!("open snapshot store {}", path.display()))?
                    .into_shared(),
            ),
            (None, None) => None,
        };

        let fixtures: Arc<dyn FixtureSource> = match (fixtures, results.as_ref()) {
            (Some(f), _) => f,
            (None, Some(db)) => Arc::clone(db) as Arc<dyn FixtureSource>,
            (None, None) => Arc::new(InMemoryFixtures::default()),
        };

        let baselines = match results.as_ref() {
            Some(db) => {
                let finished = db.load_finished(None).context("load results for baselines")?;
                let baselines = baselines_from_results(&finished, cfg.league);
                info!(leagues = baselines.len(), matches = finished.len(), "league baselines ready");
                baselines
            }
            None => LeagueBaselines::new(cfg.league),
        };

        let ttl = TtlTable::from_config(&cfg.ttl);
        let cache = Arc::new(match store {
            Some(store) => SnapshotCache::with_store(ttl, store),
            None => SnapshotCache::new(ttl),
        });
        let warmed = cache.warm_from_store().context("warm snapshot cache")?;
        if warmed > 0 {
            info!(snapshots = warmed, "snapshot cache warmed from store");
        }

        let health = Arc::new(IntegrationHealthMonitor::new(cfg.health));
        let revive = Arc::clone(&health);
        let quota = QuotaBudgetManager::new(Arc::clone(&clock)).with_rollover_hook(move |provider| {
            revive.revive_exhausted(provider);
        });
        for p in cfg.providers.iter().filter(|p| p.enabled) {
            match p.quota {
                Some(q) => quota.register(p.id.clone(), q),
                None => quota.track_unmetered(p.id.clone()),
            }
        }
        let quota = Arc::new(quota);

        let mut capabilities = CapabilityRegistry::new();
        let mut feeds = Vec::new();
        for feed_cfg in cfg.active_feeds() {
            let Some(provider) = cfg.provider(&feed_cfg.provider) else {
                continue;
            };
            let fetcher: Arc<dyn FeedFetcher> = match fetchers.remove(&feed_cfg.source) {
                Some(f) => f,
                None => match provider.kind {
                    ProviderKind::Http => {
                        let Some(template) = feed_cfg.url_template.as_deref() else {
                            bail!("feed {} has no url_template", feed_cfg.source);
                        };
                        let mut f =
                            HttpFeedFetcher::new(provider.id.clone(), feed_cfg.source, template);
                        match provider.api_key_from_env() {
                            Some(key) => f = f.with_auth_header(provider.api_key_header.clone(), key),
                            None if provider.api_key_env.is_some() => {
                                warn!(provider = %provider.id, "api key env var is not set");
                            }
                            None => {}
                        }
                        Arc::new(f)
                    }
                    ProviderKind::LocalElo => {
                        let Some(db) = results.as_ref() else {
                            bail!("provider {} needs a results database", provider.id);
                        };
                        Arc::new(EloRatingFetcher::new(provider.id.clone(), db.clone(), cfg.elo))
                    }
                },
            };
            capabilities.enable(feed_cfg.source, feed_cfg.provider.clone());
            feeds.push(Feed::new(FeedSpec::from_config(feed_cfg), fetcher));
        }
        for source in fetchers.keys() {
            warn!(%source, "fetcher supplied for a source with no active feed; ignored");
        }

        let scheduler = Arc::new(AcquisitionScheduler::new(
            Arc::clone(&cache),
            Arc::clone(&health),
            Arc::clone(&quota),
            Arc::clone(&fixtures),
            Arc::clone(&clock),
            feeds,
        ));

        Ok(PredictionEngine {
            weights: cfg.weights,
            prediction: cfg.prediction,
            model: cfg.model,
            fallback: FallbackPolicy::new(cfg.fallback),
            providers: cfg.providers.iter().map(|p| p.id.clone()).collect(),
            clock,
            cache,
            health,
            quota,
            capabilities,
            fixtures,
            baselines,
            scheduler,
        })
    }
}

pub struct PredictionEngine {
    weights: FactorWeights,
    prediction: PredictionConfig,
    model: ModelConfig,
    fallback: FallbackPolicy,
    providers: Vec<ProviderId>,
    clock: Arc<dyn Clock>,
    cache: Arc<SnapshotCache>,
    health: Arc<IntegrationHealthMonitor>,
    quota: Arc<QuotaBudgetManager>,
    capabilities: CapabilityRegistry,
    fixtures: Arc<dyn FixtureSource>,
    baselines: LeagueBaselines,
    scheduler: Arc<AcquisitionScheduler>,
}

impl PredictionEngine {
    pub fn builder(cfg: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(cfg)
    }

    pub fn predict_scores(&self, match_id: &str) -> Result<ScorePrediction, PredictError> {
        self.predict_scores_with_rng(match_id, &mut rand::thread_rng())
    }

    /// Same as [`predict_scores`](Self::predict_scores) with the jitter drawn
    /// from `rng`.
    pub fn predict_scores_with_rng<R: Rng + ?Sized>(
        &self,
        match_id: &str,
        rng: &mut R,
    ) -> Result<ScorePrediction, PredictError> {
        let fixture = self
            .fixtures
            .get(match_id)
            .ok_or_else(|| PredictError::UnknownMatch(match_id.to_string()))?;
        Ok(self.predict_fixture(fixture, self.clock.now(), rng))
    }

    /// Independent predictions evaluated in parallel, in input order.
    pub fn predict_many(&self, match_ids: &[String]) -> Vec<Result<ScorePrediction, PredictError>> {
        match_ids
            .par_iter()
            .map(|id| self.predict_scores(id))
            .collect()
    }

    /// The inputs a prediction for `match_id` would use right now.
    pub fn context(&self, match_id: &str) -> Result<PredictionContext, PredictError> {
        let fixture = self
            .fixtures
            .get(match_id)
            .ok_or_else(|| PredictError::UnknownMatch(match_id.to_string()))?;
        Ok(self.build_context(fixture, self.clock.now()))
    }

    fn build_context(&self, fixture: MatchRef, now: DateTime<Utc>) -> PredictionContext {
        self.roll_day();
        let sources = ContextSources {
            cache: &self.cache,
            health: &self.health,
            capabilities: &self.capabilities,
        };
        let baseline = self.baselines.for_league(fixture.league_id);
        PredictionContext::build(fixture, self.weights, baseline, &sources, now)
    }

    fn predict_fixture<R: Rng + ?Sized>(
        &self,
        fixture: MatchRef,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> ScorePrediction {
        let ctx = self.build_context(fixture, now);
        let eff = calculate_effective_weights(&ctx.configured, &ctx.availability);
        let warning = degradation_warning(
            &ctx.configured,
            &ctx.availability,
            self.prediction.warning_threshold,
        )
        .map(|w| w.to_string());
        let quality = eff.data_quality_score();
        let match_id = ctx.fixture.id.as_str();
        if let Some(w) = warning.as_deref() {
            warn!(match_id, quality, warning = w, "degraded inputs");
        }

        let effective_weights: BTreeMap<Factor, f64> = eff.iter().collect();

        if !can_make_prediction(&ctx.availability, &eff, self.prediction.fallback_threshold) {
            info!(
                match_id,
                quality,
                threshold = self.prediction.fallback_threshold,
                form_usable = ctx.availability.is_usable(Factor::Form),
                "using fallback prediction"
            );
            let fb = self.fallback.predict();
            return ScorePrediction {
                match_id: ctx.fixture.id.clone(),
                home: ctx.fixture.home.clone(),
                away: ctx.fixture.away.clone(),
                kickoff_utc: ctx.fixture.kickoff_utc,
                expected_home_goals: fb.expected_home_goals,
                expected_away_goals: fb.expected_away_goals,
                predicted_home_score: fb.predicted_home_score,
                predicted_away_score: fb.predicted_away_score,
                data_quality_score: quality,
                degradation_warning: warning,
                used_fallback: true,
                probabilities: fb.probabilities,
                effective_weights,
            };
        }

        let out = expected_goals(&ctx, &eff, &self.model, rng);
        ScorePrediction {
            match_id: ctx.fixture.id.clone(),
            home: ctx.fixture.home.clone(),
            away: ctx.fixture.away.clone(),
            kickoff_utc: ctx.fixture.kickoff_utc,
            expected_home_goals: out.expected_home_goals,
            expected_away_goals: out.expected_away_goals,
            predicted_home_score: out.predicted_home_score,
            predicted_away_score: out.predicted_away_score,
            data_quality_score: quality,
            degradation_warning: warning,
            used_fallback: false,
            probabilities: outcome_probabilities(out.expected_home_goals, out.expected_away_goals),
            effective_weights,
        }
    }

    pub fn integration_status(&self, provider: &ProviderId) -> IntegrationStatus {
        self.quota.roll_if_new_day(provider);
        self.health.status(provider)
    }

    /// Status of every configured provider, seen or not.
    pub fn integration_statuses(&self) -> Vec<IntegrationStatus> {
        self.roll_day();
        self.providers
            .iter()
            .map(|p| self.health.status(p))
            .collect()
    }

    /// Lets the day boundary revive quota-exhausted providers before their
    /// health is read.
    fn roll_day(&self) {
        for provider in &self.providers {
            self.quota.roll_if_new_day(provider);
        }
    }

    pub fn quota_state(&self, provider: &ProviderId) -> Option<QuotaState> {
        self.quota.state(provider)
    }

    pub fn force_refresh(
        &self,
        provider: &ProviderId,
        key: &SnapshotKey,
    ) -> Result<Snapshot, RefreshError> {
        if !self.providers.contains(provider) {
            return Err(RefreshError::UnknownProvider(provider.clone()));
        }
        self.scheduler.force_refresh(provider, key)
    }

    pub fn run_acquisition_once(&self, cancel: &CancelToken) -> Vec<RunReport> {
        self.scheduler.run_all_once(cancel)
    }

    pub fn spawn_schedulers(&self, cancel: &CancelToken) -> Result<Vec<JoinHandle<()>>> {
        self.scheduler.spawn(cancel)
    }

    pub fn scheduler(&self) -> &Arc<AcquisitionScheduler> {
        &self.scheduler
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }
}
