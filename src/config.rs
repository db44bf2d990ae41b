//! Engine configuration.
//!
//! One versioned TOML document carries the whole configuration surface:
//! factor weights, per-source TTLs, provider budgets, feed schedules, model
//! and fallback parameters. Environment variables override a few tuning
//! knobs after the file is read.
//!
//! ```toml
//! version = 1
//!
//! [weights]
//! form = 0.3
//! expected_goals = 0.3
//! market = 0.2
//! home_advantage = 0.2
//!
//! [[providers]]
//! id = "api_football"
//! api_key_env = "API_FOOTBALL_KEY"
//! quota = { hard_limit = 100, operational_cap = 95 }
//!
//! [[feeds]]
//! source = "form"
//! provider = "api_football"
//! url_template = "https://example.test/form/{team_id}"
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::elo::EloConfig;
use crate::error::ConfigError;
use crate::fallback::FallbackConfig;
use crate::health::HealthConfig;
use crate::league_params::LeagueBaseline;
use crate::logging::LoggingConfig;
use crate::provider::{CapabilityRegistry, ProviderId, SourceType};
use crate::quota::{QuotaConfig, Tier};
use crate::snapshot_cache::TtlConfig;
use crate::weights::FactorWeights;
use crate::xg_model::{ModelConfig, RoundingPolicy};

pub const CONFIG_VERSION: u32 = 1;

pub const ENV_FALLBACK_THRESHOLD: &str = "PREDICT_FALLBACK_THRESHOLD";
pub const ENV_VARIANCE: &str = "PREDICT_VARIANCE";
pub const ENV_ROUNDING: &str = "PREDICT_ROUNDING";
pub const ENV_LOG_LEVEL: &str = "PREDICT_LOG_LEVEL";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub version: u32,
    #[serde(default)]
    pub weights: FactorWeights,
    #[serde(default)]
    pub ttl: TtlConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub prediction: PredictionConfig,
    #[serde(default)]
    pub model: ModelConfig,
    /// Baseline used for leagues without enough stored results.
    #[serde(default)]
    pub league: LeagueBaseline,
    #[serde(default)]
    pub elo: EloConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            weights: FactorWeights::default(),
            ttl: TtlConfig::default(),
            health: HealthConfig::default(),
            prediction: PredictionConfig::default(),
            model: ModelConfig::default(),
            league: LeagueBaseline::default(),
            elo: EloConfig::default(),
            fallback: FallbackConfig::default(),
            logging: LoggingConfig::default(),
            storage: StorageConfig::default(),
            providers: Vec::new(),
            feeds: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PredictionConfig {
    /// Minimum data-quality score (0..=100) for a fused prediction.
    #[serde(default = "default_fallback_threshold")]
    pub fallback_threshold: f64,
    /// Configured weight above which a missing factor is reported.
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: f64,
}

fn default_fallback_threshold() -> f64 {
    50.0
}

fn default_warning_threshold() -> f64 {
    0.10
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            fallback_threshold: default_fallback_threshold(),
            warning_threshold: default_warning_threshold(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Write-through snapshot store. Unset keeps snapshots in memory only.
    #[serde(default)]
    pub snapshot_db: Option<PathBuf>,
    /// Historical results used for local ratings, baselines and fixtures.
    #[serde(default)]
    pub results_db: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Http,
    /// Ratings computed from the results database; no network, no quota.
    LocalElo,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    pub id: ProviderId,
    #[serde(default)]
    pub kind: ProviderKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Name of the environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
    /// Daily budget. Unset means unmetered.
    #[serde(default)]
    pub quota: Option<QuotaConfig>,
}

fn default_true() -> bool {
    true
}

fn default_api_key_header() -> String {
    "x-api-key".to_string()
}

impl ProviderConfig {
    pub fn api_key_from_env(&self) -> Option<String> {
        let name = self.api_key_env.as_deref()?;
        std::env::var(name)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedConfig {
    pub source: SourceType,
    pub provider: ProviderId,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_lookahead_hours")]
    pub lookahead_hours: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    /// Required for HTTP providers; `{team_id}` or `{match_id}` is
    /// substituted per entity.
    #[serde(default)]
    pub url_template: Option<String>,
}

fn default_interval_secs() -> u64 {
    900
}

/// Longest accepted feed lookahead, one leap year.
pub const MAX_LOOKAHEAD_HOURS: u32 = 24 * 366;

fn default_lookahead_hours() -> u32 {
    72
}

fn default_batch_size() -> usize {
    4
}

fn default_batch_delay_ms() -> u64 {
    250
}

impl FeedConfig {
    pub fn new(source: SourceType, provider: impl Into<ProviderId>) -> Self {
        Self {
            source,
            provider: provider.into(),
            tier: Tier::Primary,
            enabled: true,
            interval_secs: default_interval_secs(),
            lookahead_hours: default_lookahead_hours(),
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            url_template: None,
        }
    }
}

impl EngineConfig {
    /// Reads, parses, applies environment overrides and validates.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path.as_ref()).map_err(ConfigError::ReadFile)?;
        let mut cfg = Self::from_toml_str(&raw)?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parses and validates without consulting the environment.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let mut cfg: EngineConfig = toml::from_str(raw).map_err(ConfigError::Parse)?;
        for p in &mut cfg.providers {
            p.id = ProviderId::new(p.id.as_str());
        }
        for f in &mut cfg.feeds {
            f.provider = ProviderId::new(f.provider.as_str());
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from any key lookup; blank values are ignored.
    pub fn apply_overrides_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get(ENV_FALLBACK_THRESHOLD) {
            self.prediction.fallback_threshold = v
                .parse()
                .map_err(|_| ConfigError::invalid(ENV_FALLBACK_THRESHOLD, format!("not a number: {v}")))?;
        }
        if let Some(v) = get(ENV_VARIANCE) {
            self.model.variance = v
                .parse()
                .map_err(|_| ConfigError::invalid(ENV_VARIANCE, format!("not a number: {v}")))?;
        }
        if let Some(v) = get(ENV_ROUNDING) {
            self.model.rounding = RoundingPolicy::parse(&v).ok_or_else(|| {
                ConfigError::invalid(ENV_ROUNDING, format!("expected floor, round or ceil, got {v}"))
            })?;
        }
        if let Some(v) = get(ENV_LOG_LEVEL) {
            self.logging.level = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion {
                found: self.version,
                expected: CONFIG_VERSION,
            });
        }
        self.weights
            .validate()
            .map_err(|reason| ConfigError::invalid("weights", reason))?;
        self.ttl
            .validate()
            .map_err(|(field, reason)| ConfigError::invalid(field, reason))?;
        self.health
            .validate()
            .map_err(|reason| ConfigError::invalid("health", reason))?;
        self.model
            .validate()
            .map_err(|(field, reason)| ConfigError::invalid(field, reason))?;
        self.league
            .validate()
            .map_err(|reason| ConfigError::invalid("league", reason))?;
        self.fallback
            .validate()
            .map_err(|(field, reason)| ConfigError::invalid(field, reason))?;
        self.logging
            .validate()
            .map_err(|(field, reason)| ConfigError::invalid(field, reason))?;

        let threshold = self.prediction.fallback_threshold;
        if !(0.0..=100.0).contains(&threshold) {
            return Err(ConfigError::invalid(
                "prediction.fallback_threshold",
                format!("must be within [0, 100], got {threshold}"),
            ));
        }
        let warning = self.prediction.warning_threshold;
        if !warning.is_finite() || warning < 0.0 {
            return Err(ConfigError::invalid(
                "prediction.warning_threshold",
                format!("must be >= 0, got {warning}"),
            ));
        }
        if !self.elo.k.is_finite() || self.elo.k <= 0.0 {
            return Err(ConfigError::invalid("elo.k", "must be positive"));
        }

        let mut provider_ids = HashSet::new();
        for p in &self.providers {
            if !provider_ids.insert(p.id.clone()) {
                return Err(ConfigError::invalid(
                    "providers",
                    format!("duplicate provider {}", p.id),
                ));
            }
            if let Some(q) = p.quota.as_ref() {
                q.validate()
                    .map_err(|reason| ConfigError::invalid(format!("providers.{}.quota", p.id), reason))?;
            }
            if p.kind == ProviderKind::LocalElo && self.storage.results_db.is_none() {
                return Err(ConfigError::invalid(
                    format!("providers.{}.kind", p.id),
                    "local_elo needs storage.results_db",
                ));
            }
        }

        let mut sources = HashSet::new();
        for f in &self.feeds {
            let field = format!("feeds.{}", f.source);
            let Some(provider) = self.providers.iter().find(|p| p.id == f.provider) else {
                return Err(ConfigError::invalid(
                    field,
                    format!("unknown provider {}", f.provider),
                ));
            };
            if !sources.insert(f.source) {
                return Err(ConfigError::invalid(field, "duplicate feed for this source"));
            }
            if f.interval_secs == 0 {
                return Err(ConfigError::invalid(field, "interval_secs must be positive"));
            }
            if f.lookahead_hours == 0 || f.lookahead_hours > MAX_LOOKAHEAD_HOURS {
                return Err(ConfigError::invalid(
                    field,
                    format!(
                        "lookahead_hours must be within [1, {MAX_LOOKAHEAD_HOURS}], got {}",
                        f.lookahead_hours
                    ),
                ));
            }
            if f.batch_size == 0 {
                return Err(ConfigError::invalid(field, "batch_size must be positive"));
            }
            match provider.kind {
                ProviderKind::Http => {
                    let Some(template) = f.url_template.as_deref() else {
                        return Err(ConfigError::invalid(field, "http feeds need url_template"));
                    };
                    let placeholder = if f.source.is_team_scoped() {
                        crate::fetch::TEAM_PLACEHOLDER
                    } else {
                        crate::fetch::MATCH_PLACEHOLDER
                    };
                    if !template.contains(placeholder) {
                        return Err(ConfigError::invalid(
                            field,
                            format!("url_template must contain {placeholder}"),
                        ));
                    }
                }
                ProviderKind::LocalElo => {
                    if f.source != SourceType::StrengthRating {
                        return Err(ConfigError::invalid(
                            field,
                            "local_elo only serves strength_rating",
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn provider(&self, id: &ProviderId) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| &p.id == id)
    }

    /// Feeds whose own flag and provider flag are both on.
    pub fn active_feeds(&self) -> impl Iterator<Item = &FeedConfig> + '_ {
        self.feeds
            .iter()
            .filter(|f| f.enabled && self.provider(&f.provider).is_some_and(|p| p.enabled))
    }

    pub fn capability_registry(&self) -> CapabilityRegistry {
        let mut registry = CapabilityRegistry::new();
        for f in self.active_feeds() {
            registry.enable(f.source, f.provider.clone());
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
version = 1

[weights]
form = 0.3
expected_goals = 0.3
market = 0.2
home_advantage = 0.2

[prediction]
fallback_threshold = 60

[storage]
results_db = "/tmp/results.sqlite"

[[providers]]
id = "API_Football"
api_key_env = "API_FOOTBALL_KEY"
quota = { hard_limit = 100, operational_cap = 95, secondary_cap = 20 }

[[providers]]
id = "elo"
kind = "local_elo"

[[feeds]]
source = "form"
provider = "api_football"
url_template = "https://example.test/form/{team_id}"

[[feeds]]
source = "injuries"
provider = "api_football"
tier = "secondary"
url_template = "https://example.test/injuries/{team_id}"

[[feeds]]
source = "strength_rating"
provider = "elo"
"#;

    #[test]
    fn parses_sample_and_normalises_provider_ids() {
        let cfg = EngineConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.providers[0].id.as_str(), "api_football");
        assert_eq!(cfg.prediction.fallback_threshold, 60.0);
        assert_eq!(cfg.weights.squad_strength, 0.0);
        assert_eq!(cfg.feeds[1].tier, Tier::Secondary);
        let registry = cfg.capability_registry();
        assert_eq!(
            registry.provider_for(SourceType::StrengthRating),
            Some(&ProviderId::new("elo"))
        );
        assert!(!registry.is_enabled(SourceType::MatchOdds));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let raw = "version = 1\n[weights]\nfrom = 0.3\n";
        assert!(matches!(
            EngineConfig::from_toml_str(raw),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn wrong_version_is_rejected() {
        assert!(matches!(
            EngineConfig::from_toml_str("version = 2\n"),
            Err(ConfigError::UnsupportedVersion { found: 2, .. })
        ));
    }

    #[test]
    fn feed_with_unknown_provider_is_rejected() {
        let raw = r#"
version = 1
[[feeds]]
source = "form"
provider = "nobody"
url_template = "https://example.test/{team_id}"
"#;
        assert!(matches!(
            EngineConfig::from_toml_str(raw),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn template_placeholder_must_match_scope() {
        let raw = r#"
version = 1
[[providers]]
id = "odds"
[[feeds]]
source = "match_odds"
provider = "odds"
url_template = "https://example.test/{team_id}"
"#;
        assert!(EngineConfig::from_toml_str(raw).is_err());
    }

    #[test]
    fn overrides_apply_and_reject_garbage() {
        let mut cfg = EngineConfig::default();
        let env: HashMap<&str, &str> = [
            (ENV_FALLBACK_THRESHOLD, "40"),
            (ENV_ROUNDING, "floor"),
            (ENV_VARIANCE, " "),
        ]
        .into_iter()
        .collect();
        cfg.apply_overrides_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.prediction.fallback_threshold, 40.0);
        assert_eq!(cfg.model.rounding, RoundingPolicy::Floor);
        assert_eq!(cfg.model.variance, 0.0);

        let err = cfg.apply_overrides_from(|k| (k == ENV_VARIANCE).then(|| "lots".to_string()));
        assert!(err.is_err());
    }

    #[test]
    fn oversized_ttl_and_lookahead_are_rejected() {
        let raw = "version = 1\n[ttl]\nexpected_goals_hours = 4294967295\n";
        assert!(matches!(
            EngineConfig::from_toml_str(raw),
            Err(ConfigError::InvalidValue { .. })
        ));

        let raw = r#"
version = 1
[[providers]]
id = "stats"
[[feeds]]
source = "form"
provider = "stats"
lookahead_hours = 4294967295
url_template = "https://example.test/{team_id}"
"#;
        assert!(matches!(
            EngineConfig::from_toml_str(raw),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn disabled_provider_drops_its_feeds() {
        let mut cfg = EngineConfig::from_toml_str(SAMPLE).unwrap();
        cfg.providers[0].enabled = false;
        let registry = cfg.capability_registry();
        assert!(!registry.is_enabled(SourceType::Form));
        assert!(registry.is_enabled(SourceType::StrengthRating));
    }
}
