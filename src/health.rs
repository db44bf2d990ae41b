use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::AcquisitionError;
use crate::provider::ProviderId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthConfig {
    /// Consecutive failures that move a provider to `Degraded`.
    #[serde(default = "default_degraded_after")]
    pub degraded_after: u32,
    /// Consecutive failures that move a provider to `Down`.
    #[serde(default = "default_down_after")]
    pub down_after: u32,
}

fn default_degraded_after() -> u32 {
    3
}

fn default_down_after() -> u32 {
    5
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            degraded_after: default_degraded_after(),
            down_after: default_down_after(),
        }
    }
}

impl HealthConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.degraded_after == 0 {
            return Err("degraded_after must be at least 1".to_string());
        }
        if self.down_after < self.degraded_after {
            return Err(format!(
                "down_after ({}) must not be below degraded_after ({})",
                self.down_after, self.degraded_after
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Down,
}

impl HealthState {
    pub fn is_usable(self) -> bool {
        !matches!(self, HealthState::Down)
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Down => "down",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transport,
    Malformed,
    Exhausted,
}

impl FailureKind {
    /// `None` for outcomes that say nothing about the provider.
    pub fn classify(err: &AcquisitionError) -> Option<Self> {
        match err {
            AcquisitionError::ProviderUnavailable { .. } => Some(FailureKind::Transport),
            AcquisitionError::MalformedPayload { .. } => Some(FailureKind::Malformed),
            AcquisitionError::QuotaExhausted { .. } => Some(FailureKind::Exhausted),
            AcquisitionError::Cancelled => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrationStatus {
    pub provider: ProviderId,
    pub state: HealthState,
    pub consecutive_failures: u32,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_failure_kind: Option<FailureKind>,
    /// Every failure of the current streak was an exhausted upstream quota.
    pub exhausted_only: bool,
}

impl IntegrationStatus {
    fn new(provider: ProviderId) -> Self {
        Self {
            provider,
            state: HealthState::Healthy,
            consecutive_failures: 0,
            last_success_at: None,
            last_failure_at: None,
            last_failure_kind: None,
            exhausted_only: false,
        }
    }
}

/// Per-provider trust derived from recent call outcomes. Independent of what
/// the cache holds.
pub struct IntegrationHealthMonitor {
    cfg: HealthConfig,
    statuses: RwLock<HashMap<ProviderId, IntegrationStatus>>,
}

impl IntegrationHealthMonitor {
    pub fn new(cfg: HealthConfig) -> Self {
        Self {
            cfg,
            statuses: RwLock::new(HashMap::new()),
        }
    }

    pub fn record_success(&self, provider: &ProviderId, at: DateTime<Utc>) {
        let mut statuses = self.statuses.write();
        let status = statuses
            .entry(provider.clone())
            .or_insert_with(|| IntegrationStatus::new(provider.clone()));
        let previous = status.state;
        status.consecutive_failures = 0;
        status.exhausted_only = false;
        status.last_success_at = Some(at);
        status.state = HealthState::Healthy;
        if previous != HealthState::Healthy {
            info!(%provider, from = %previous, "provider recovered");
        }
    }

    pub fn record_failure(&self, provider: &ProviderId, at: DateTime<Utc>, kind: FailureKind) {
        let mut statuses = self.statuses.write();
        let status = statuses
            .entry(provider.clone())
            .or_insert_with(|| IntegrationStatus::new(provider.clone()));
        let previous = status.state;
        let streak_start = status.consecutive_failures == 0;
        status.consecutive_failures = status.consecutive_failures.saturating_add(1);
        status.exhausted_only =
            kind == FailureKind::Exhausted && (streak_start || status.exhausted_only);
        status.last_failure_at = Some(at);
        status.last_failure_kind = Some(kind);
        status.state = self.state_for(status.consecutive_failures);
        if status.state != previous {
            warn!(
                %provider,
                from = %previous,
                to = %status.state,
                failures = status.consecutive_failures,
                "provider health changed"
            );
        }
    }

    fn state_for(&self, failures: u32) -> HealthState {
        if failures >= self.cfg.down_after {
            HealthState::Down
        } else if failures >= self.cfg.degraded_after {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        }
    }

    /// Day-boundary hook: a provider that went down only because its daily
    /// quota ran out is eligible again once the quota resets.
    pub fn revive_exhausted(&self, provider: &ProviderId) -> bool {
        let mut statuses = self.statuses.write();
        let Some(status) = statuses.get_mut(provider) else {
            return false;
        };
        if status.state != HealthState::Down || !status.exhausted_only {
            return false;
        }
        status.state = HealthState::Healthy;
        status.consecutive_failures = 0;
        status.exhausted_only = false;
        info!(%provider, "provider revived after quota reset");
        true
    }

    /// Providers never seen are reported healthy.
    pub fn status(&self, provider: &ProviderId) -> IntegrationStatus {
        self.statuses
            .read()
            .get(provider)
            .cloned()
            .unwrap_or_else(|| IntegrationStatus::new(provider.clone()))
    }

    pub fn state(&self, provider: &ProviderId) -> HealthState {
        self.statuses
            .read()
            .get(provider)
            .map(|s| s.state)
            .unwrap_or(HealthState::Healthy)
    }

    pub fn is_usable(&self, provider: &ProviderId) -> bool {
        self.state(provider).is_usable()
    }

    pub fn all(&self) -> Vec<IntegrationStatus> {
        let mut out: Vec<IntegrationStatus> = self.statuses.read().values().cloned().collect();
        out.sort_by(|a, b| a.provider.cmp(&b.provider));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> IntegrationHealthMonitor {
        IntegrationHealthMonitor::new(HealthConfig::default())
    }

    #[test]
    fn failures_walk_healthy_degraded_down_and_one_success_resets() {
        let m = monitor();
        let p = ProviderId::new("xg_feed");
        let now = Utc::now();
        for _ in 0..3 {
            m.record_failure(&p, now, FailureKind::Transport);
        }
        assert_eq!(m.state(&p), HealthState::Degraded);
        assert!(m.is_usable(&p));

        m.record_failure(&p, now, FailureKind::Malformed);
        m.record_failure(&p, now, FailureKind::Transport);
        assert_eq!(m.state(&p), HealthState::Down);
        assert!(!m.is_usable(&p));

        m.record_success(&p, now);
        let status = m.status(&p);
        assert_eq!(status.state, HealthState::Healthy);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.last_success_at, Some(now));
    }

    #[test]
    fn unknown_provider_is_healthy() {
        let m = monitor();
        assert_eq!(m.state(&ProviderId::new("never_called")), HealthState::Healthy);
    }

    #[test]
    fn only_exhaustion_downs_are_revived() {
        let m = monitor();
        let exhausted = ProviderId::new("api_football");
        let broken = ProviderId::new("odds");
        let now = Utc::now();
        for _ in 0..5 {
            m.record_failure(&exhausted, now, FailureKind::Exhausted);
            m.record_failure(&broken, now, FailureKind::Transport);
        }
        assert!(m.revive_exhausted(&exhausted));
        assert_eq!(m.state(&exhausted), HealthState::Healthy);
        assert!(!m.revive_exhausted(&broken));
        assert_eq!(m.state(&broken), HealthState::Down);
    }

    #[test]
    fn mixed_streak_is_not_exhaustion_only() {
        let m = monitor();
        let p = ProviderId::new("api_football");
        let now = Utc::now();
        m.record_failure(&p, now, FailureKind::Transport);
        for _ in 0..4 {
            m.record_failure(&p, now, FailureKind::Exhausted);
        }
        assert_eq!(m.state(&p), HealthState::Down);
        assert!(!m.revive_exhausted(&p));
    }

    #[test]
    fn config_rejects_inverted_thresholds() {
        let cfg = HealthConfig {
            degraded_after: 4,
            down_after: 2,
        };
        assert!(cfg.validate().is_err());
    }
}
