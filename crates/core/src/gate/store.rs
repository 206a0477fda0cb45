//! Persistence for gate results.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::types::{GateError, GateRecord, QualityGateResult};

/// Store of recorded gate results, one per (episode, revision).
pub trait GateStore: Send + Sync {
    /// Record a result. Re-recording an identical result returns the
    /// existing record; a different result for the same revision is rejected.
    fn record(&self, result: &QualityGateResult) -> Result<GateRecord, GateError>;

    fn get(&self, episode: &str, revision: u32) -> Result<Option<GateRecord>, GateError>;

    /// Most recent revision recorded for an episode.
    fn latest(&self, episode: &str) -> Result<Option<GateRecord>, GateError>;

    /// All revisions for an episode, oldest first.
    fn list(&self, episode: &str) -> Result<Vec<GateRecord>, GateError>;
}

pub struct SqliteGateStore {
    conn: Mutex<Connection>,
}

impl SqliteGateStore {
    pub fn new(path: &Path) -> Result<Self, GateError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, GateError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), GateError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS gate_results (
                episode TEXT NOT NULL,
                revision INTEGER NOT NULL,
                verdict TEXT NOT NULL,
                score REAL NOT NULL,
                result TEXT NOT NULL,
                recorded_at TEXT NOT NULL,
                PRIMARY KEY (episode, revision)
            );
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, GateError> {
        self.conn
            .lock()
            .map_err(|_| GateError::Database("gate store lock poisoned".to_string()))
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<(String, String)> {
        Ok((row.get(0)?, row.get(1)?))
    }

    fn decode((result, recorded_at): (String, String)) -> Result<GateRecord, GateError> {
        let result: QualityGateResult = serde_json::from_str(&result)
            .map_err(|e| GateError::Database(format!("corrupt gate result: {}", e)))?;
        let recorded_at = DateTime::parse_from_rfc3339(&recorded_at)
            .map_err(|e| GateError::Database(format!("corrupt timestamp: {}", e)))?
            .with_timezone(&Utc);
        Ok(GateRecord {
            result,
            recorded_at,
        })
    }
}

impl GateStore for SqliteGateStore {
    fn record(&self, result: &QualityGateResult) -> Result<GateRecord, GateError> {
        let conn = self.conn()?;

        let json = serde_json::to_string(result)
            .map_err(|e| GateError::Database(format!("failed to encode result: {}", e)))?;

        let existing = conn
            .query_row(
                "SELECT result, recorded_at FROM gate_results WHERE episode = ?1 AND revision = ?2",
                params![result.episode, result.revision],
                Self::row_to_record,
            )
            .optional()?;
        if let Some(row) = existing {
            if row.0 == json {
                return Self::decode(row);
            }
            return Err(GateError::AlreadyRecorded {
                episode: result.episode.clone(),
                revision: result.revision,
            });
        }

        let recorded_at = Utc::now();
        conn.execute(
            "INSERT INTO gate_results (episode, revision, verdict, score, result, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                result.episode,
                result.revision,
                result.verdict.as_str(),
                result.score,
                json,
                recorded_at.to_rfc3339(),
            ],
        )?;

        Ok(GateRecord {
            result: result.clone(),
            recorded_at,
        })
    }

    fn get(&self, episode: &str, revision: u32) -> Result<Option<GateRecord>, GateError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT result, recorded_at FROM gate_results WHERE episode = ?1 AND revision = ?2",
                params![episode, revision],
                Self::row_to_record,
            )
            .optional()?;
        row.map(Self::decode).transpose()
    }

    fn latest(&self, episode: &str) -> Result<Option<GateRecord>, GateError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT result, recorded_at FROM gate_results WHERE episode = ?1
                 ORDER BY revision DESC LIMIT 1",
                params![episode],
                Self::row_to_record,
            )
            .optional()?;
        row.map(Self::decode).transpose()
    }

    fn list(&self, episode: &str) -> Result<Vec<GateRecord>, GateError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT result, recorded_at FROM gate_results WHERE episode = ?1 ORDER BY revision",
        )?;
        let rows = stmt
            .query_map(params![episode], Self::row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::decode).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{HardFail, ScoreInputs, Verdict};

    fn result(revision: u32, verdict: Verdict) -> QualityGateResult {
        QualityGateResult {
            episode: "best-air-fryers".to_string(),
            revision,
            verdict,
            score: 91.5,
            threshold: 85.0,
            hard_fails: if verdict.is_pass() {
                vec![]
            } else {
                vec![HardFail::MissingDisclosure]
            },
            inputs: ScoreInputs {
                revision,
                content_accuracy: 91.5,
                compliance: 91.5,
                asset_completeness: 91.5,
                disclosure_present: verdict.is_pass(),
                affiliate_links_resolved: true,
                unsourced_claims: 0,
            },
            asset_complete: true,
            missing_assets: vec![],
        }
    }

    #[test]
    fn test_record_and_get() {
        let store = SqliteGateStore::in_memory().unwrap();
        store.record(&result(1, Verdict::Pass)).unwrap();

        let record = store.get("best-air-fryers", 1).unwrap().unwrap();
        assert_eq!(record.result, result(1, Verdict::Pass));
        assert!(store.get("best-air-fryers", 2).unwrap().is_none());
    }

    #[test]
    fn test_identical_record_is_idempotent() {
        let store = SqliteGateStore::in_memory().unwrap();
        let first = store.record(&result(1, Verdict::Pass)).unwrap();
        let second = store.record(&result(1, Verdict::Pass)).unwrap();
        assert_eq!(first.recorded_at, second.recorded_at);
        assert_eq!(store.list("best-air-fryers").unwrap().len(), 1);
    }

    #[test]
    fn test_recorded_revision_is_immutable() {
        let store = SqliteGateStore::in_memory().unwrap();
        store.record(&result(1, Verdict::Pass)).unwrap();
        let err = store.record(&result(1, Verdict::Fail)).unwrap_err();
        assert!(matches!(err, GateError::AlreadyRecorded { revision: 1, .. }));
    }

    #[test]
    fn test_latest_and_list() {
        let store = SqliteGateStore::in_memory().unwrap();
        store.record(&result(1, Verdict::Fail)).unwrap();
        store.record(&result(2, Verdict::Pass)).unwrap();

        let latest = store.latest("best-air-fryers").unwrap().unwrap();
        assert_eq!(latest.result.revision, 2);
        let all = store.list("best-air-fryers").unwrap();
        assert_eq!(
            all.iter().map(|r| r.result.revision).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(store.latest("other").unwrap().is_none());
    }
}
