use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::warn;

use crate::fixtures::{FixtureSource, MatchRef};

/// One match row of the historical results table. Unplayed matches live in
/// the same table and double as fixture reference data.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMatch {
    pub match_id: String,
    pub league_id: u32,
    pub utc_time: DateTime<Utc>,
    pub home_team_id: u32,
    pub away_team_id: u32,
    pub home_team: String,
    pub away_team: String,
    pub home_goals: Option<i32>,
    pub away_goals: Option<i32>,
    pub finished: bool,
    pub cancelled: bool,
    pub awarded: bool,
    pub status_reason_key: Option<String>,
}

impl StoredMatch {
    pub fn is_penalty_decided(&self) -> bool {
        self.status_reason_key
            .as_deref()
            .is_some_and(|s| s.to_ascii_lowercase().contains("pen"))
    }

    /// Final score of a match that should feed ratings and baselines.
    pub fn counted_score(&self) -> Option<(i32, i32)> {
        if !self.finished || self.cancelled || self.awarded || self.is_penalty_decided() {
            return None;
        }
        match (self.home_goals, self.away_goals) {
            (Some(h), Some(a)) => Some((h, a)),
            _ => None,
        }
    }

    pub fn as_match_ref(&self) -> MatchRef {
        MatchRef {
            id: self.match_id.clone(),
            league_id: Some(self.league_id),
            home_team_id: self.home_team_id,
            away_team_id: self.away_team_id,
            home: self.home_team.clone(),
            away: self.away_team.clone(),
            kickoff_utc: self.utc_time,
        }
    }
}

pub struct ResultsDb {
    conn: Mutex<Connection>,
}

impl ResultsDb {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let conn =
            Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn upsert_matches(&self, rows: &[StoredMatch]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("begin upsert transaction")?;
        for row in rows {
            upsert_match(&tx, row)?;
        }
        tx.commit().context("commit upsert transaction")?;
        Ok(rows.len())
    }

    /// Finished, counted results ordered oldest first. `None` loads every
    /// league.
    pub fn load_finished(&self, league_id: Option<u32>) -> Result<Vec<StoredMatch>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                r#"
                SELECT
                    match_id, league_id, utc_time,
                    home_team_id, away_team_id, home_team, away_team,
                    home_goals, away_goals, finished, cancelled, awarded,
                    status_reason_key
                FROM matches
                WHERE (?1 IS NULL OR league_id = ?1)
                  AND finished = 1
                  AND cancelled = 0
                  AND awarded = 0
                  AND home_goals IS NOT NULL
                  AND away_goals IS NOT NULL
                ORDER BY utc_time ASC, match_id ASC
                "#,
            )
            .context("prepare load matches query")?;

        let rows = stmt
            .query_map(params![league_id.map(i64::from)], decode_row)
            .context("query load matches")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("decode match row")?);
        }
        Ok(out)
    }

    fn load_unplayed(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StoredMatch>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                r#"
                SELECT
                    match_id, league_id, utc_time,
                    home_team_id, away_team_id, home_team, away_team,
                    home_goals, away_goals, finished, cancelled, awarded,
                    status_reason_key
                FROM matches
                WHERE finished = 0
                  AND cancelled = 0
                  AND utc_time >= ?1
                  AND utc_time <= ?2
                ORDER BY utc_time ASC, match_id ASC
                "#,
            )
            .context("prepare upcoming query")?;
        let rows = stmt
            .query_map(params![format_utc(from), format_utc(to)], decode_row)
            .context("query upcoming")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("decode match row")?);
        }
        Ok(out)
    }

    fn load_one(&self, match_id: &str) -> Result<Option<StoredMatch>> {
        let conn = self.conn.lock();
        conn.query_row(
            r#"
            SELECT
                match_id, league_id, utc_time,
                home_team_id, away_team_id, home_team, away_team,
                home_goals, away_goals, finished, cancelled, awarded,
                status_reason_key
            FROM matches
            WHERE match_id = ?1
            "#,
            params![match_id],
            decode_row,
        )
        .optional()
        .context("query match")
    }
}

impl FixtureSource for ResultsDb {
    fn get(&self, match_id: &str) -> Option<MatchRef> {
        match self.load_one(match_id) {
            Ok(row) => row.map(|m| m.as_match_ref()),
            Err(err) => {
                warn!(match_id, error = %err, "fixture lookup failed");
                None
            }
        }
    }

    fn upcoming(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<MatchRef> {
        match self.load_unplayed(from, to) {
            Ok(rows) => rows.iter().map(StoredMatch::as_match_ref).collect(),
            Err(err) => {
                warn!(error = %err, "upcoming fixtures query failed");
                Vec::new()
            }
        }
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS matches (
            match_id TEXT PRIMARY KEY,
            league_id INTEGER NOT NULL,
            utc_time TEXT NOT NULL,
            home_team_id INTEGER NOT NULL,
            away_team_id INTEGER NOT NULL,
            home_team TEXT NOT NULL,
            away_team TEXT NOT NULL,
            home_goals INTEGER NULL,
            away_goals INTEGER NULL,
            finished INTEGER NOT NULL,
            cancelled INTEGER NOT NULL,
            awarded INTEGER NOT NULL,
            status_reason_key TEXT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_matches_league ON matches(league_id);
        CREATE INDEX IF NOT EXISTS idx_matches_utc_time ON matches(utc_time);
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

fn upsert_match(conn: &Connection, row: &StoredMatch) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO matches(
            match_id, league_id, utc_time, home_team_id, away_team_id, home_team, away_team,
            home_goals, away_goals, finished, cancelled, awarded, status_reason_key, updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        ON CONFLICT(match_id) DO UPDATE SET
            league_id = excluded.league_id,
            utc_time = excluded.utc_time,
            home_team_id = excluded.home_team_id,
            away_team_id = excluded.away_team_id,
            home_team = excluded.home_team,
            away_team = excluded.away_team,
            home_goals = excluded.home_goals,
            away_goals = excluded.away_goals,
            finished = excluded.finished,
            cancelled = excluded.cancelled,
            awarded = excluded.awarded,
            status_reason_key = excluded.status_reason_key,
            updated_at = excluded.updated_at
        "#,
        params![
            row.match_id,
            i64::from(row.league_id),
            format_utc(row.utc_time),
            i64::from(row.home_team_id),
            i64::from(row.away_team_id),
            row.home_team,
            row.away_team,
            row.home_goals,
            row.away_goals,
            row.finished as i64,
            row.cancelled as i64,
            row.awarded as i64,
            row.status_reason_key,
            format_utc(Utc::now()),
        ],
    )
    .with_context(|| format!("upsert match {}", row.match_id))?;
    Ok(())
}

fn decode_row(row: &Row<'_>) -> rusqlite::Result<StoredMatch> {
    let raw_time: String = row.get(2)?;
    let utc_time = DateTime::parse_from_rfc3339(&raw_time)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(err))
        })?;
    Ok(StoredMatch {
        match_id: row.get(0)?,
        league_id: row.get::<_, u32>(1)?,
        utc_time,
        home_team_id: row.get::<_, u32>(3)?,
        away_team_id: row.get::<_, u32>(4)?,
        home_team: row.get(5)?,
        away_team: row.get(6)?,
        home_goals: row.get(7)?,
        away_goals: row.get(8)?,
        finished: row.get::<_, i64>(9)? != 0,
        cancelled: row.get::<_, i64>(10)? != 0,
        awarded: row.get::<_, i64>(11)? != 0,
        status_reason_key: row.get(12)?,
    })
}

/// Fixed-width UTC text so lexical order in SQLite matches time order.
fn format_utc(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}
