//! Background acquisition.
//!
//! One periodic task per feed. Each run lists the entities of upcoming
//! matches whose snapshot is missing or stale, soonest kickoff first, and
//! fetches them in batches on a bounded pool. Every call is paid for through
//! the provider's daily quota; every outcome is reported to the health
//! monitor. Failures never leave this module.

use std::collections::HashSet;
use std::env;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::config::FeedConfig;
use crate::error::{AcquisitionError, RefreshError};
use crate::fetch::FeedFetcher;
use crate::fixtures::{FixtureSource, MatchRef};
use crate::health::{FailureKind, IntegrationHealthMonitor};
use crate::payload::SnapshotPayload;
use crate::provider::{EntityKey, ProviderId, SnapshotKey, SourceType};
use crate::quota::{QuotaBudgetManager, Tier};
use crate::snapshot_cache::{Snapshot, SnapshotCache};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSpec {
    pub source: SourceType,
    pub provider: ProviderId,
    pub tier: Tier,
    pub interval: Duration,
    pub lookahead: ChronoDuration,
    pub batch_size: usize,
    pub batch_delay: Duration,
}

impl FeedSpec {
    pub fn from_config(cfg: &FeedConfig) -> Self {
        Self {
            source: cfg.source,
            provider: cfg.provider.clone(),
            tier: cfg.tier,
            interval: Duration::from_secs(cfg.interval_secs.max(1)),
            lookahead: ChronoDuration::hours(i64::from(
                cfg.lookahead_hours.min(crate::config::MAX_LOOKAHEAD_HOURS),
            )),
            batch_size: cfg.batch_size.max(1),
            batch_delay: Duration::from_millis(cfg.batch_delay_ms),
        }
    }
}

pub struct Feed {
    pub spec: FeedSpec,
    fetcher: Arc<dyn FeedFetcher>,
}

impl Feed {
    pub fn new(spec: FeedSpec, fetcher: Arc<dyn FeedFetcher>) -> Self {
        Self { spec, fetcher }
    }
}

/// Counts for one scheduler run of one feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub source: SourceType,
    pub provider: ProviderId,
    pub candidates: usize,
    pub fetched: usize,
    pub failed: usize,
    pub skipped_quota: usize,
    pub cancelled: usize,
}

impl RunReport {
    fn new(spec: &FeedSpec) -> Self {
        Self {
            source: spec.source,
            provider: spec.provider.clone(),
            candidates: 0,
            fetched: 0,
            failed: 0,
            skipped_quota: 0,
            cancelled: 0,
        }
    }

    fn tally(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Fetched => self.fetched += 1,
            ItemOutcome::Failed => self.failed += 1,
            ItemOutcome::SkippedQuota => self.skipped_quota += 1,
            ItemOutcome::Cancelled => self.cancelled += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Fetched,
    Failed,
    SkippedQuota,
    Cancelled,
}

pub struct AcquisitionScheduler {
    cache: Arc<SnapshotCache>,
    health: Arc<IntegrationHealthMonitor>,
    quota: Arc<QuotaBudgetManager>,
    fixtures: Arc<dyn FixtureSource>,
    clock: Arc<dyn Clock>,
    feeds: Vec<Arc<Feed>>,
    pool: Option<rayon::ThreadPool>,
}

impl AcquisitionScheduler {
    pub fn new(
        cache: Arc<SnapshotCache>,
        health: Arc<IntegrationHealthMonitor>,
        quota: Arc<QuotaBudgetManager>,
        fixtures: Arc<dyn FixtureSource>,
        clock: Arc<dyn Clock>,
        feeds: Vec<Feed>,
    ) -> Self {
        Self {
            cache,
            health,
            quota,
            fixtures,
            clock,
            feeds: feeds.into_iter().map(Arc::new).collect(),
            pool: build_fetch_pool(),
        }
    }

    pub fn feeds(&self) -> impl Iterator<Item = &FeedSpec> + '_ {
        self.feeds.iter().map(|f| &f.spec)
    }

    pub fn feed_for(&self, source: SourceType) -> Option<&FeedSpec> {
        self.feeds
            .iter()
            .find(|f| f.spec.source == source)
            .map(|f| &f.spec)
    }

    /// Missing or stale keys inside the feed's lookahead, soonest kickoff
    /// first, each key once.
    pub fn candidates(&self, spec: &FeedSpec, now: DateTime<Utc>) -> Vec<SnapshotKey> {
        let until = now
            .checked_add_signed(spec.lookahead)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let upcoming = self.fixtures.upcoming(now, until);
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for fixture in upcoming.iter().filter(|m| m.kickoff_utc > now) {
            for key in keys_for(spec.source, fixture) {
                if seen.contains(&key) || !self.cache.needs_refresh(&key, now) {
                    continue;
                }
                seen.insert(key.clone());
                out.push(key);
            }
        }
        out
    }

    /// Primary-tier entities of `provider` still needing a call.
    fn primary_need(&self, provider: &ProviderId, now: DateTime<Utc>) -> usize {
        self.feeds
            .iter()
            .filter(|f| &f.spec.provider == provider && f.spec.tier == Tier::Primary)
            .map(|f| self.candidates(&f.spec, now).len())
            .sum()
    }

    /// Runs every feed once, in configuration order.
    pub fn run_all_once(&self, cancel: &CancelToken) -> Vec<RunReport> {
        self.feeds
            .iter()
            .map(|feed| self.run_feed(feed, cancel))
            .collect()
    }

    pub fn run_once(&self, source: SourceType, cancel: &CancelToken) -> Option<RunReport> {
        let feed = self.feeds.iter().find(|f| f.spec.source == source)?;
        Some(self.run_feed(feed, cancel))
    }

    fn run_feed(&self, feed: &Feed, cancel: &CancelToken) -> RunReport {
        let spec = &feed.spec;
        let now = self.clock.now();
        let mut report = RunReport::new(spec);

        self.quota.roll_if_new_day(&spec.provider);
        if self.quota.is_metered(&spec.provider) {
            let need = self.primary_need(&spec.provider, now);
            self.quota
                .set_primary_need(&spec.provider, u32::try_from(need).unwrap_or(u32::MAX));
        }

        let candidates = self.candidates(spec, now);
        report.candidates = candidates.len();
        if candidates.is_empty() {
            debug!(source = %spec.source, provider = %spec.provider, "nothing to refresh");
            return report;
        }

        let mut chunks = candidates.chunks(spec.batch_size).peekable();
        while let Some(chunk) = chunks.next() {
            if cancel.is_cancelled() {
                report.cancelled += chunk.len();
                continue;
            }
            let outcomes: Vec<ItemOutcome> = with_fetch_pool(&self.pool, || {
                chunk
                    .par_iter()
                    .map(|key| self.acquire(feed, key, cancel))
                    .collect()
            });
            for outcome in outcomes {
                report.tally(outcome);
            }
            if chunks.peek().is_some() && !spec.batch_delay.is_zero() {
                cancel.sleep(spec.batch_delay);
            }
        }

        info!(
            source = %spec.source,
            provider = %spec.provider,
            candidates = report.candidates,
            fetched = report.fetched,
            failed = report.failed,
            skipped_quota = report.skipped_quota,
            cancelled = report.cancelled,
            "feed run finished"
        );
        report
    }

    fn acquire(&self, feed: &Feed, key: &SnapshotKey, cancel: &CancelToken) -> ItemOutcome {
        let spec = &feed.spec;
        if cancel.is_cancelled() {
            return ItemOutcome::Cancelled;
        }
        if !self.quota.try_reserve(&spec.provider, spec.tier) {
            debug!(provider = %spec.provider, tier = %spec.tier, %key, "quota refused, skipping");
            return ItemOutcome::SkippedQuota;
        }

        let result = fetch_checked(feed, key, cancel);
        let at = self.clock.now();
        match result {
            Ok(payload) => match self.cache.put(key.clone(), payload, at) {
                Ok(_) => {
                    self.health.record_success(&spec.provider, at);
                    ItemOutcome::Fetched
                }
                Err(err) => {
                    // The provider answered; the kickoff passed while we were fetching.
                    debug!(%key, error = %err, "snapshot not stored");
                    self.health.record_success(&spec.provider, at);
                    ItemOutcome::Failed
                }
            },
            Err(err) => match FailureKind::classify(&err) {
                Some(kind) => {
                    warn!(provider = %spec.provider, source = %spec.source, %key, error = %err, "fetch failed");
                    self.health.record_failure(&spec.provider, at, kind);
                    ItemOutcome::Failed
                }
                None => ItemOutcome::Cancelled,
            },
        }
    }

    /// Fetches one key now, ignoring freshness but not the quota.
    pub fn force_refresh(
        &self,
        provider: &ProviderId,
        key: &SnapshotKey,
    ) -> Result<Snapshot, RefreshError> {
        let Some(feed) = self.feeds.iter().find(|f| f.spec.source == key.source) else {
            return Err(self.refresh_refusal(provider, key.source));
        };
        if &feed.spec.provider != provider {
            return Err(self.refresh_refusal(provider, key.source));
        }
        self.quota.roll_if_new_day(provider);
        if !self.quota.try_reserve(provider, Tier::Primary) {
            return Err(RefreshError::QuotaRefused(provider.clone()));
        }

        let result = fetch_checked(feed, key, &CancelToken::new());
        let at = self.clock.now();
        match result {
            Ok(payload) => {
                self.health.record_success(provider, at);
                let snapshot = self.cache.put(key.clone(), payload, at)?;
                info!(%provider, %key, "forced refresh stored");
                Ok(snapshot)
            }
            Err(err) => {
                if let Some(kind) = FailureKind::classify(&err) {
                    self.health.record_failure(provider, at, kind);
                }
                warn!(%provider, %key, error = %err, "forced refresh failed");
                Err(err.into())
            }
        }
    }

    fn refresh_refusal(&self, provider: &ProviderId, source: SourceType) -> RefreshError {
        if self.feeds.iter().any(|f| &f.spec.provider == provider) {
            RefreshError::NotServed {
                provider: provider.clone(),
                feed: source,
            }
        } else {
            RefreshError::UnknownProvider(provider.clone())
        }
    }

    /// Starts one named thread per feed. Each loops run, sleep, run until
    /// `cancel` fires; an in-flight run stops taking new items but keeps what
    /// it already stored.
    pub fn spawn(self: &Arc<Self>, cancel: &CancelToken) -> Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::with_capacity(self.feeds.len());
        for feed in &self.feeds {
            let scheduler = Arc::clone(self);
            let feed = Arc::clone(feed);
            let cancel = cancel.clone();
            let name = format!("feed-{}", feed.spec.source);
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    while !cancel.is_cancelled() {
                        scheduler.run_feed(&feed, &cancel);
                        if !cancel.sleep(feed.spec.interval) {
                            break;
                        }
                    }
                    debug!(source = %feed.spec.source, "feed loop stopped");
                })
                .with_context(|| format!("spawn {name}"))?;
            handles.push(handle);
        }
        Ok(handles)
    }
}

fn keys_for(source: SourceType, fixture: &MatchRef) -> Vec<SnapshotKey> {
    if source.is_team_scoped() {
        vec![
            SnapshotKey::team(source, fixture.home_team_id),
            SnapshotKey::team(source, fixture.away_team_id),
        ]
    } else {
        vec![SnapshotKey::fixture(source, fixture.id.clone())]
    }
}

/// Fetches and checks the payload belongs to `key` and holds sane values.
/// Anything that fails here never reaches the cache.
fn fetch_checked(
    feed: &Feed,
    key: &SnapshotKey,
    cancel: &CancelToken,
) -> Result<SnapshotPayload, AcquisitionError> {
    let payload = feed.fetcher.fetch(&key.entity, cancel)?;
    if payload.source_type() != key.source {
        return Err(AcquisitionError::malformed(
            key.source,
            format!("got a {} payload", payload.source_type()),
        ));
    }
    let entity: EntityKey = payload.entity();
    if entity != key.entity {
        return Err(AcquisitionError::malformed(
            key.source,
            format!("payload describes {entity}, asked for {}", key.entity),
        ));
    }
    payload
        .validate()
        .map_err(|reason| AcquisitionError::malformed(key.source, reason))?;
    Ok(payload)
}

fn build_fetch_pool() -> Option<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(fetch_parallelism())
        .thread_name(|i| format!("fetch-{i}"))
        .build()
        .ok()
}

fn with_fetch_pool<T>(pool: &Option<rayon::ThreadPool>, action: impl FnOnce() -> T + Send) -> T
where
    T: Send,
{
    if let Some(pool) = pool.as_ref() {
        pool.install(action)
    } else {
        action()
    }
}

fn fetch_parallelism() -> usize {
    env::var("PREDICT_FETCH_PARALLELISM")
        .ok()
        .and_then(|val| val.parse::<usize>().ok())
        .unwrap_or(6)
        .clamp(1, 32)
}
