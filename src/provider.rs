use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One kind of external data a feed delivers. Each source type has its own
/// freshness contract in the TTL table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Form,
    ExpectedGoals,
    StrengthRating,
    MatchOdds,
    Injuries,
    Lineups,
    Suspensions,
}

impl SourceType {
    pub const ALL: [SourceType; 7] = [
        SourceType::Form,
        SourceType::ExpectedGoals,
        SourceType::StrengthRating,
        SourceType::MatchOdds,
        SourceType::Injuries,
        SourceType::Lineups,
        SourceType::Suspensions,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Form => "form",
            SourceType::ExpectedGoals => "expected_goals",
            SourceType::StrengthRating => "strength_rating",
            SourceType::MatchOdds => "match_odds",
            SourceType::Injuries => "injuries",
            SourceType::Lineups => "lineups",
            SourceType::Suspensions => "suspensions",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let key = raw.trim().to_ascii_lowercase();
        SourceType::ALL.into_iter().find(|s| s.as_str() == key)
    }

    /// Whether snapshots of this source are stored per team or per match.
    pub fn is_team_scoped(self) -> bool {
        !matches!(self, SourceType::MatchOdds | SourceType::Lineups)
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of an upstream API as it appears in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityKey {
    Team(u32),
    Match(String),
}

impl EntityKey {
    pub fn team_id(&self) -> Option<u32> {
        match self {
            EntityKey::Team(id) => Some(*id),
            EntityKey::Match(_) => None,
        }
    }

    pub fn match_id(&self) -> Option<&str> {
        match self {
            EntityKey::Team(_) => None,
            EntityKey::Match(id) => Some(id),
        }
    }

    /// Stable text form used as the storage key.
    pub fn to_storage_key(&self) -> String {
        match self {
            EntityKey::Team(id) => format!("team:{id}"),
            EntityKey::Match(id) => format!("match:{id}"),
        }
    }

    pub fn from_storage_key(raw: &str) -> Option<Self> {
        let (kind, id) = raw.split_once(':')?;
        match kind {
            "team" => id.parse::<u32>().ok().map(EntityKey::Team),
            "match" if !id.is_empty() => Some(EntityKey::Match(id.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_storage_key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub source: SourceType,
    pub entity: EntityKey,
}

impl SnapshotKey {
    pub fn new(source: SourceType, entity: EntityKey) -> Self {
        Self { source, entity }
    }

    pub fn team(source: SourceType, team_id: u32) -> Self {
        Self::new(source, EntityKey::Team(team_id))
    }

    pub fn fixture(source: SourceType, match_id: impl Into<String>) -> Self {
        Self::new(source, EntityKey::Match(match_id.into()))
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.entity)
    }
}

/// Which sources are wired up right now and which provider serves each of
/// them. Being listed here says nothing about freshness or health.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    routes: HashMap<SourceType, ProviderId>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&mut self, source: SourceType, provider: ProviderId) {
        self.routes.insert(source, provider);
    }

    pub fn disable(&mut self, source: SourceType) {
        self.routes.remove(&source);
    }

    pub fn with(mut self, source: SourceType, provider: impl Into<ProviderId>) -> Self {
        self.enable(source, provider.into());
        self
    }

    pub fn is_enabled(&self, source: SourceType) -> bool {
        self.routes.contains_key(&source)
    }

    pub fn provider_for(&self, source: SourceType) -> Option<&ProviderId> {
        self.routes.get(&source)
    }

    pub fn sources_of(&self, provider: &ProviderId) -> Vec<SourceType> {
        let mut out: Vec<SourceType> = self
            .routes
            .iter()
            .filter(|(_, p)| *p == provider)
            .map(|(s, _)| *s)
            .collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_keys_parse_back() {
        let team = EntityKey::Team(42);
        let fixture = EntityKey::Match("4711".to_string());
        assert_eq!(EntityKey::from_storage_key(&team.to_storage_key()), Some(team));
        assert_eq!(
            EntityKey::from_storage_key(&fixture.to_storage_key()),
            Some(fixture)
        );
        assert_eq!(EntityKey::from_storage_key("team:x"), None);
        assert_eq!(EntityKey::from_storage_key("match:"), None);
        assert_eq!(EntityKey::from_storage_key("league:1"), None);
    }

    #[test]
    fn source_type_names_are_stable() {
        for source in SourceType::ALL {
            assert_eq!(SourceType::parse(source.as_str()), Some(source));
        }
        assert_eq!(SourceType::parse(" Lineups "), Some(SourceType::Lineups));
        assert!(SourceType::Form.is_team_scoped());
        assert!(!SourceType::Lineups.is_team_scoped());
    }

    #[test]
    fn registry_routes_sources_to_providers() {
        let registry = CapabilityRegistry::new()
            .with(SourceType::Lineups, "api_football")
            .with(SourceType::Injuries, "API_Football")
            .with(SourceType::Form, "fotmob");
        let api = ProviderId::new("api_football");
        assert_eq!(
            registry.sources_of(&api),
            vec![SourceType::Injuries, SourceType::Lineups]
        );
        assert!(!registry.is_enabled(SourceType::MatchOdds));
    }
}
