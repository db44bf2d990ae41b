use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Reference data for one upcoming match, owned by the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRef {
    pub id: String,
    pub league_id: Option<u32>,
    pub home_team_id: u32,
    pub away_team_id: u32,
    pub home: String,
    pub away: String,
    pub kickoff_utc: DateTime<Utc>,
}

pub trait FixtureSource: Send + Sync {
    fn get(&self, match_id: &str) -> Option<MatchRef>;

    /// Matches kicking off in `[from, to]`, soonest first.
    fn upcoming(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<MatchRef>;
}

#[derive(Debug, Default)]
pub struct InMemoryFixtures {
    matches: RwLock<Vec<MatchRef>>,
}

impl InMemoryFixtures {
    pub fn new(matches: Vec<MatchRef>) -> Self {
        Self {
            matches: RwLock::new(matches),
        }
    }

    pub fn upsert(&self, m: MatchRef) {
        let mut matches = self.matches.write();
        match matches.iter_mut().find(|x| x.id == m.id) {
            Some(slot) => *slot = m,
            None => matches.push(m),
        }
    }

    pub fn len(&self) -> usize {
        self.matches.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FixtureSource for InMemoryFixtures {
    fn get(&self, match_id: &str) -> Option<MatchRef> {
        self.matches.read().iter().find(|m| m.id == match_id).cloned()
    }

    fn upcoming(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<MatchRef> {
        let mut out: Vec<MatchRef> = self
            .matches
            .read()
            .iter()
            .filter(|m| m.kickoff_utc >= from && m.kickoff_utc <= to)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.kickoff_utc.cmp(&b.kickoff_utc).then(a.id.cmp(&b.id)));
        out
    }
}
