use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, params};

use crate::payload::SnapshotPayload;
use crate::provider::{EntityKey, SnapshotKey, SourceType};
use crate::snapshot_cache::Snapshot;

/// Durable copy of the snapshot cache. Payloads are stored as JSON text and
/// only decoded back into typed values when loaded.
pub struct SnapshotStore {
    conn: Mutex<Connection>,
}

impl SnapshotStore {
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

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let payload_json =
            serde_json::to_string(snapshot.payload.as_ref()).context("serialize payload")?;
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO snapshots(source, entity, payload_json, fetched_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(source, entity) DO UPDATE SET
                payload_json = excluded.payload_json,
                fetched_at = excluded.fetched_at,
                expires_at = excluded.expires_at
            "#,
            params![
                snapshot.key.source.as_str(),
                snapshot.key.entity.to_storage_key(),
                payload_json,
                snapshot.fetched_at.to_rfc3339(),
                snapshot.expires_at.to_rfc3339(),
            ],
        )
        .context("upsert snapshot")?;
        Ok(())
    }

    /// Loads every stored snapshot. Rows that no longer decode are skipped
    /// rather than failing the whole load.
    pub fn load_all(&self) -> Result<Vec<Snapshot>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT source, entity, payload_json, fetched_at, expires_at FROM snapshots",
            )
            .context("prepare load snapshots query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .context("query load snapshots")?;

        let mut out = Vec::new();
        for row in rows {
            let (source, entity, payload_json, fetched_at, expires_at) =
                row.context("decode snapshot row")?;
            match decode_row(&source, &entity, &payload_json, &fetched_at, &expires_at) {
                Ok(snapshot) => out.push(snapshot),
                Err(err) => {
                    tracing::warn!(source, entity, error = %err, "skipping unreadable snapshot row")
                }
            }
        }
        Ok(out)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let n = conn
            .query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get::<_, i64>(0))
            .context("count snapshots")?;
        Ok(usize::try_from(n).unwrap_or_default())
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS snapshots (
            source TEXT NOT NULL,
            entity TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            fetched_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            PRIMARY KEY (source, entity)
        );
        CREATE INDEX IF NOT EXISTS idx_snapshots_expires ON snapshots(expires_at);
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

fn decode_row(
    source: &str,
    entity: &str,
    payload_json: &str,
    fetched_at: &str,
    expires_at: &str,
) -> Result<Snapshot> {
    let source = SourceType::parse(source).ok_or_else(|| anyhow!("unknown source {source}"))?;
    let entity =
        EntityKey::from_storage_key(entity).ok_or_else(|| anyhow!("bad entity key {entity}"))?;
    let payload: SnapshotPayload =
        serde_json::from_str(payload_json).context("invalid payload json")?;
    if payload.source_type() != source {
        return Err(anyhow!("payload type does not match source {source}"));
    }
    let fetched_at = parse_utc(fetched_at)?;
    let expires_at = parse_utc(expires_at)?;
    if expires_at <= fetched_at {
        return Err(anyhow!("expiry not after fetch time"));
    }
    Ok(Snapshot {
        key: SnapshotKey::new(source, entity),
        payload: Arc::new(payload),
        fetched_at,
        expires_at,
    })
}

fn parse_utc(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid timestamp {raw}"))?
        .with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{PlayerAbsence, SquadAbsences};
    use chrono::Duration as ChronoDuration;

    fn injuries_snapshot(fetched_at: DateTime<Utc>) -> Snapshot {
        Snapshot {
            key: SnapshotKey::team(SourceType::Injuries, 11),
            payload: Arc::new(SnapshotPayload::Injuries(SquadAbsences {
                team_id: 11,
                absences: vec![PlayerAbsence {
                    player_id: 5,
                    name: "Keeper".to_string(),
                    impact: 0.2,
                    reason: Some("hamstring".to_string()),
                }],
            })),
            fetched_at,
            expires_at: fetched_at + ChronoDuration::hours(24),
        }
    }

    #[test]
    fn open_reports_the_directory_it_could_not_create() {
        let blocker = std::env::temp_dir().join(format!(
            "wc26_predictor_store_blocker_{}",
            std::process::id()
        ));
        std::fs::write(&blocker, b"not a directory").unwrap();
        let path = blocker.join("nested").join("snapshots.sqlite");

        let err = SnapshotStore::open(&path).err().unwrap();
        let message = format!("{err:#}");
        assert!(message.contains("create directory"), "{message}");
        assert!(message.contains("nested"), "{message}");

        std::fs::remove_file(&blocker).unwrap();
    }

    #[test]
    fn upsert_keeps_one_row_per_key() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let t = Utc::now();
        store.save(&injuries_snapshot(t)).unwrap();
        store
            .save(&injuries_snapshot(t + ChronoDuration::hours(1)))
            .unwrap();
        assert_eq!(store.count().unwrap(), 1);

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].key, SnapshotKey::team(SourceType::Injuries, 11));
        assert_eq!(
            loaded[0].fetched_at.timestamp(),
            (t + ChronoDuration::hours(1)).timestamp()
        );
    }

    #[test]
    fn unreadable_rows_are_skipped() {
        let store = SnapshotStore::open_in_memory().unwrap();
        store.save(&injuries_snapshot(Utc::now())).unwrap();
        store
            .conn
            .lock()
            .execute(
                "INSERT INTO snapshots VALUES ('form', 'team:1', '{not json', ?1, ?1)",
                params![Utc::now().to_rfc3339()],
            )
            .unwrap();
        assert_eq!(store.load_all().unwrap().len(), 1);
    }
}
