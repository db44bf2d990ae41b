use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SnapshotError;
use crate::payload::SnapshotPayload;
use crate::provider::{SnapshotKey, SourceType};
use crate::snapshot_store::SnapshotStore;

/// Longest accepted TTL, one leap year.
pub const MAX_TTL_HOURS: u32 = 24 * 366;

/// Freshness windows per source, in hours. Lineups are not listed: they are
/// valid until the kickoff they belong to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TtlConfig {
    #[serde(default = "default_form_hours")]
    pub form_hours: u32,
    #[serde(default = "default_medium_hours")]
    pub expected_goals_hours: u32,
    #[serde(default = "default_medium_hours")]
    pub strength_rating_hours: u32,
    #[serde(default = "default_weekly_hours")]
    pub match_odds_hours: u32,
    #[serde(default = "default_on_demand_hours")]
    pub injuries_hours: u32,
    #[serde(default = "default_on_demand_hours")]
    pub suspensions_hours: u32,
}

fn default_form_hours() -> u32 {
    6
}

fn default_medium_hours() -> u32 {
    48
}

fn default_weekly_hours() -> u32 {
    7 * 24
}

fn default_on_demand_hours() -> u32 {
    24
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            form_hours: default_form_hours(),
            expected_goals_hours: default_medium_hours(),
            strength_rating_hours: default_medium_hours(),
            match_odds_hours: default_weekly_hours(),
            injuries_hours: default_on_demand_hours(),
            suspensions_hours: default_on_demand_hours(),
        }
    }
}

impl TtlConfig {
    pub fn validate(&self) -> Result<(), (&'static str, String)> {
        let fields = [
            ("ttl.form_hours", self.form_hours),
            ("ttl.expected_goals_hours", self.expected_goals_hours),
            ("ttl.strength_rating_hours", self.strength_rating_hours),
            ("ttl.match_odds_hours", self.match_odds_hours),
            ("ttl.injuries_hours", self.injuries_hours),
            ("ttl.suspensions_hours", self.suspensions_hours),
        ];
        for (name, hours) in fields {
            if hours == 0 {
                return Err((name, "ttl must be at least one hour".to_string()));
            }
            if hours > MAX_TTL_HOURS {
                return Err((
                    name,
                    format!("ttl must be at most {MAX_TTL_HOURS} hours, got {hours}"),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlPolicy {
    Fixed(ChronoDuration),
    /// Valid until the kickoff carried by the payload, then retired.
    UntilKickoff,
}

#[derive(Debug, Clone)]
pub struct TtlTable {
    policies: HashMap<SourceType, TtlPolicy>,
}

impl TtlTable {
    pub fn from_config(cfg: &TtlConfig) -> Self {
        let hours = |h: u32| {
            TtlPolicy::Fixed(ChronoDuration::hours(i64::from(h.clamp(1, MAX_TTL_HOURS))))
        };
        let mut policies = HashMap::new();
        policies.insert(SourceType::Form, hours(cfg.form_hours));
        policies.insert(SourceType::ExpectedGoals, hours(cfg.expected_goals_hours));
        policies.insert(SourceType::StrengthRating, hours(cfg.strength_rating_hours));
        policies.insert(SourceType::MatchOdds, hours(cfg.match_odds_hours));
        policies.insert(SourceType::Injuries, hours(cfg.injuries_hours));
        policies.insert(SourceType::Suspensions, hours(cfg.suspensions_hours));
        policies.insert(SourceType::Lineups, TtlPolicy::UntilKickoff);
        Self { policies }
    }

    pub fn policy(&self, source: SourceType) -> TtlPolicy {
        self.policies
            .get(&source)
            .copied()
            .unwrap_or(TtlPolicy::Fixed(ChronoDuration::hours(1)))
    }
}

impl Default for TtlTable {
    fn default() -> Self {
        Self::from_config(&TtlConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub key: SnapshotKey,
    pub payload: Arc<SnapshotPayload>,
    pub fetched_at: DateTime<Utc>,
    /// Always strictly after `fetched_at`.
    pub expires_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn ttl(&self) -> ChronoDuration {
        self.expires_at - self.fetched_at
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }

    pub fn age(&self, now: DateTime<Utc>) -> ChronoDuration {
        now - self.fetched_at
    }
}

/// Latest payload per `(source, entity)`. Single writer per key (the owning
/// feed's scheduler), any number of concurrent readers. Stale entries stay
/// readable; staleness is decided at read time.
pub struct SnapshotCache {
    ttl: TtlTable,
    entries: RwLock<HashMap<SnapshotKey, Snapshot>>,
    store: Option<Arc<SnapshotStore>>,
}

impl SnapshotCache {
    pub fn new(ttl: TtlTable) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            store: None,
        }
    }

    /// Every successful `put` is also written through to `store`.
    pub fn with_store(ttl: TtlTable, store: Arc<SnapshotStore>) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            store: Some(store),
        }
    }

    pub fn ttl_table(&self) -> &TtlTable {
        &self.ttl
    }

    pub fn get(&self, key: &SnapshotKey) -> Option<Snapshot> {
        self.entries.read().get(key).cloned()
    }

    pub fn get_fresh(&self, key: &SnapshotKey, now: DateTime<Utc>) -> Option<Snapshot> {
        self.get(key).filter(|s| s.is_fresh(now))
    }

    pub fn is_fresh(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> bool {
        snapshot.is_fresh(now)
    }

    /// True when the key has no snapshot or only a stale one.
    pub fn needs_refresh(&self, key: &SnapshotKey, now: DateTime<Utc>) -> bool {
        match self.entries.read().get(key) {
            Some(s) => !s.is_fresh(now),
            None => true,
        }
    }

    /// Upsert, last write wins. The payload must match the key's source type,
    /// and event-anchored payloads are refused once their kickoff has passed.
    pub fn put(
        &self,
        key: SnapshotKey,
        payload: SnapshotPayload,
        fetched_at: DateTime<Utc>,
    ) -> Result<Snapshot, SnapshotError> {
        let snapshot = self.build_snapshot(key, payload, fetched_at)?;
        self.entries
            .write()
            .insert(snapshot.key.clone(), snapshot.clone());

        if let Some(store) = self.store.as_ref() {
            if let Err(err) = store.save(&snapshot) {
                warn!(key = %snapshot.key, error = %err, "snapshot write-through failed");
            }
        }
        debug!(key = %snapshot.key, expires_at = %snapshot.expires_at, "snapshot stored");
        Ok(snapshot)
    }

    fn build_snapshot(
        &self,
        key: SnapshotKey,
        payload: SnapshotPayload,
        fetched_at: DateTime<Utc>,
    ) -> Result<Snapshot, SnapshotError> {
        if payload.source_type() != key.source {
            return Err(SnapshotError::SourceMismatch {
                payload: payload.source_type(),
                key,
            });
        }
        let expires_at = match self.ttl.policy(key.source) {
            TtlPolicy::Fixed(ttl) => fetched_at
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            TtlPolicy::UntilKickoff => match payload.anchor() {
                Some(kickoff) if kickoff > fetched_at => kickoff,
                _ => return Err(SnapshotError::Retired { key }),
            },
        };
        Ok(Snapshot {
            key,
            payload: Arc::new(payload),
            fetched_at,
            expires_at,
        })
    }

    /// Loads previously persisted snapshots, keeping whichever copy is newer.
    /// Returns how many entries were taken from the store.
    pub fn warm_from_store(&self) -> anyhow::Result<usize> {
        let Some(store) = self.store.as_ref() else {
            return Ok(0);
        };
        let loaded = store.load_all()?;
        let mut entries = self.entries.write();
        let mut taken = 0usize;
        for snapshot in loaded {
            let newer = entries
                .get(&snapshot.key)
                .is_none_or(|existing| existing.fetched_at < snapshot.fetched_at);
            if newer {
                entries.insert(snapshot.key.clone(), snapshot);
                taken += 1;
            }
        }
        Ok(taken)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
