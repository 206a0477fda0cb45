//! SQLite-backed job store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::asset::AssetRequest;

use super::{Job, JobError, JobFilter, JobState, JobStore, StateTransition};

const JOB_COLUMNS: &str = "seq, id, request, dedup_key, state, attempts, last_attempt_at, \
     retry_of, cancel_requested, attempt_history, created_at, updated_at";

fn db_err(e: impl std::fmt::Display) -> JobError {
    JobError::Database(e.to_string())
}

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Open (or create) the job database at `path`.
    pub fn new(path: &Path) -> Result<Self, JobError> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")
            .map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory job store (useful for testing).
    pub fn in_memory() -> Result<Self, JobError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), JobError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                episode TEXT NOT NULL,
                backend TEXT NOT NULL,
                dedup_key TEXT NOT NULL,
                request TEXT NOT NULL,
                state TEXT NOT NULL,
                state_type TEXT NOT NULL,
                active INTEGER NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                retry_at_ms INTEGER,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_attempt_at TEXT,
                retry_of TEXT,
                cancel_requested INTEGER NOT NULL DEFAULT 0,
                attempt_history TEXT NOT NULL DEFAULT '[]',
                credits_spent INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_active_dedup
                ON jobs(dedup_key) WHERE active = 1;
            CREATE INDEX IF NOT EXISTS idx_jobs_dispatch
                ON jobs(backend, state_type, priority DESC, seq);
            CREATE INDEX IF NOT EXISTS idx_jobs_episode ON jobs(episode);

            CREATE TABLE IF NOT EXISTS episodes (
                slug TEXT PRIMARY KEY,
                requirements TEXT NOT NULL,
                registered_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .map_err(db_err)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, JobError> {
        self.conn
            .lock()
            .map_err(|_| JobError::Database("job store lock poisoned".to_string()))
    }

    fn build_where_clause(filter: &JobFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref state) = filter.state {
            conditions.push("state_type = ?");
            params.push(Box::new(state.clone()));
        }
        if let Some(ref episode) = filter.episode {
            conditions.push("episode = ?");
            params.push(Box::new(episode.clone()));
        }
        if let Some(ref backend) = filter.backend {
            conditions.push("backend = ?");
            params.push(Box::new(backend.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        fn json<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
            serde_json::from_str(raw).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        }

        let request_json: String = row.get(2)?;
        let state_json: String = row.get(4)?;
        let history_json: String = row.get(9)?;
        let last_attempt_at: Option<String> = row.get(6)?;
        let created_at: String = row.get(10)?;
        let updated_at: String = row.get(11)?;

        Ok(Job {
            queue_seq: row.get(0)?,
            id: row.get(1)?,
            request: json(2, &request_json)?,
            dedup_key: row.get(3)?,
            state: json(4, &state_json)?,
            attempts: row.get(5)?,
            last_attempt_at: last_attempt_at.as_deref().and_then(parse_timestamp),
            retry_of: row.get(7)?,
            cancel_requested: row.get::<_, i64>(8)? != 0,
            attempt_history: json(9, &history_json)?,
            created_at: parse_timestamp(&created_at).unwrap_or_else(Utc::now),
            updated_at: parse_timestamp(&updated_at).unwrap_or_else(Utc::now),
        })
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Option<Job>, JobError> {
        conn.query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS),
            params![id],
            Self::row_to_job,
        )
        .optional()
        .map_err(db_err)
    }

    fn fetch_active(conn: &Connection, dedup_key: &str) -> Result<Option<Job>, JobError> {
        conn.query_row(
            &format!(
                "SELECT {} FROM jobs WHERE dedup_key = ? AND active = 1",
                JOB_COLUMNS
            ),
            params![dedup_key],
            Self::row_to_job,
        )
        .optional()
        .map_err(db_err)
    }

    /// Persist the mutable columns of `job`.
    fn write_state(conn: &Connection, job: &Job, credits_delta: u32) -> Result<(), JobError> {
        let state_json = serde_json::to_string(&job.state).map_err(db_err)?;
        let history_json = serde_json::to_string(&job.attempt_history).map_err(db_err)?;
        let retry_at_ms = job.state.retry_at().map(|t| t.timestamp_millis());

        conn.execute(
            "UPDATE jobs SET state = ?, state_type = ?, active = ?, retry_at_ms = ?, attempts = ?, \
             last_attempt_at = ?, cancel_requested = ?, attempt_history = ?, \
             credits_spent = credits_spent + ?, updated_at = ? WHERE id = ?",
            params![
                state_json,
                job.state.state_type(),
                job.state.is_active() as i64,
                retry_at_ms,
                job.attempts,
                job.last_attempt_at.map(|t| t.to_rfc3339()),
                job.cancel_requested as i64,
                history_json,
                credits_delta,
                job.updated_at.to_rfc3339(),
                job.id,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

impl JobStore for SqliteJobStore {
    fn insert(&self, request: &AssetRequest, retry_of: Option<&str>) -> Result<Job, JobError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        let dedup_key = request.dedup_key().to_string();
        if let Some(existing) = Self::fetch_active(&tx, &dedup_key)? {
            return Err(JobError::Duplicate {
                existing_id: existing.id,
            });
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let state = JobState::Queued;
        let request_json = serde_json::to_string(request).map_err(db_err)?;
        let state_json = serde_json::to_string(&state).map_err(db_err)?;

        let inserted = tx.execute(
            "INSERT INTO jobs (id, episode, backend, dedup_key, request, state, state_type, active, \
             priority, retry_of, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?)",
            params![
                id,
                request.episode,
                request.backend,
                dedup_key,
                request_json,
                state_json,
                state.state_type(),
                request.priority.as_i64(),
                retry_of,
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        );

        if let Err(e) = inserted {
            if is_unique_violation(&e) {
                let existing = Self::fetch_active(&tx, &dedup_key)?
                    .map(|j| j.id)
                    .unwrap_or_default();
                return Err(JobError::Duplicate {
                    existing_id: existing,
                });
            }
            return Err(db_err(e));
        }

        let queue_seq = tx.last_insert_rowid();
        tx.commit().map_err(db_err)?;

        Ok(Job {
            id,
            request: request.clone(),
            dedup_key,
            state,
            attempts: 0,
            last_attempt_at: None,
            queue_seq,
            retry_of: retry_of.map(str::to_string),
            cancel_requested: false,
            attempt_history: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    fn get(&self, id: &str) -> Result<Option<Job>, JobError> {
        let conn = self.conn()?;
        Self::fetch(&conn, id)
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobError> {
        let conn = self.conn()?;
        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT {} FROM jobs {} ORDER BY seq ASC LIMIT ? OFFSET ?",
            JOB_COLUMNS, where_clause
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;

        let mut all_params = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_job)
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    fn count(&self, filter: &JobFilter) -> Result<i64, JobError> {
        let conn = self.conn()?;
        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(db_err)
    }

    fn list_by_episode(&self, episode: &str) -> Result<Vec<Job>, JobError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM jobs WHERE episode = ? ORDER BY seq ASC",
                JOB_COLUMNS
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![episode], Self::row_to_job)
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    fn find_active(&self, dedup_key: &str) -> Result<Option<Job>, JobError> {
        let conn = self.conn()?;
        Self::fetch_active(&conn, dedup_key)
    }

    fn record(&self, id: &str, transition: StateTransition) -> Result<Job, JobError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        let mut job = Self::fetch(&tx, id)?.ok_or_else(|| JobError::NotFound(id.to_string()))?;

        if !job.state.can_transition_to(&transition.to) {
            return Err(JobError::InvalidTransition {
                job_id: id.to_string(),
                from: job.state.state_type().to_string(),
                to: transition.to.state_type().to_string(),
            });
        }

        let credits = transition.attempt.as_ref().map(|a| a.credits).unwrap_or(0);
        if let Some(attempt) = transition.attempt {
            job.attempt_history.push(attempt);
        }
        if transition.to.is_terminal() {
            job.cancel_requested = false;
        }
        job.state = transition.to;
        job.updated_at = Utc::now();

        Self::write_state(&tx, &job, credits)?;
        tx.commit().map_err(db_err)?;
        Ok(job)
    }

    fn claim_next(
        &self,
        backend: &str,
        now: DateTime<Utc>,
        preserve_order: bool,
    ) -> Result<Option<Job>, JobError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        let candidates: Vec<Job> = {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT {} FROM jobs WHERE backend = ? \
                     AND state_type IN ('queued', 'retry_scheduled') \
                     ORDER BY priority DESC, seq ASC",
                    JOB_COLUMNS
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![backend], Self::row_to_job)
                .map_err(db_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_err)?
        };

        let mut claimed = None;
        for job in candidates {
            let due = match job.state.retry_at() {
                Some(retry_at) => retry_at <= now,
                None => true,
            };
            if due {
                claimed = Some(job);
                break;
            }
            if preserve_order {
                break;
            }
        }

        let Some(mut job) = claimed else {
            return Ok(None);
        };

        job.attempts += 1;
        job.last_attempt_at = Some(now);
        job.state = JobState::Dispatched {
            dispatched_at: now,
            submission_key: job.submission_key(),
        };
        job.updated_at = now;

        Self::write_state(&tx, &job, 0)?;
        tx.commit().map_err(db_err)?;
        Ok(Some(job))
    }

    fn request_cancel(&self, id: &str) -> Result<Job, JobError> {
        let conn = self.conn()?;
        let mut job = Self::fetch(&conn, id)?.ok_or_else(|| JobError::NotFound(id.to_string()))?;

        if !matches!(job.state, JobState::Dispatched { .. }) {
            return Err(JobError::InvalidState {
                job_id: id.to_string(),
                current_state: job.state.state_type().to_string(),
                operation: "request cancellation of".to_string(),
            });
        }

        job.cancel_requested = true;
        job.updated_at = Utc::now();
        conn.execute(
            "UPDATE jobs SET cancel_requested = 1, updated_at = ? WHERE id = ?",
            params![job.updated_at.to_rfc3339(), id],
        )
        .map_err(db_err)?;
        Ok(job)
    }

    fn next_retry_at(&self, backend: Option<&str>) -> Result<Option<DateTime<Utc>>, JobError> {
        let conn = self.conn()?;
        let millis: Option<i64> = match backend {
            Some(backend) => conn.query_row(
                "SELECT MIN(retry_at_ms) FROM jobs WHERE state_type = 'retry_scheduled' AND backend = ?",
                params![backend],
                |row| row.get(0),
            ),
            None => conn.query_row(
                "SELECT MIN(retry_at_ms) FROM jobs WHERE state_type = 'retry_scheduled'",
                [],
                |row| row.get(0),
            ),
        }
        .map_err(db_err)?;

        Ok(millis.and_then(|ms| Utc.timestamp_millis_opt(ms).single()))
    }

    fn register_episode(&self, slug: &str, requests: &[AssetRequest]) -> Result<(), JobError> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();
        let requirements = serde_json::to_string(requests).map_err(db_err)?;

        conn.execute(
            "INSERT INTO episodes (slug, requirements, registered_at, updated_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(slug) DO UPDATE SET requirements = excluded.requirements, updated_at = excluded.updated_at",
            params![slug, requirements, now, now],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn episode_requirements(&self, slug: &str) -> Result<Option<Vec<AssetRequest>>, JobError> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT requirements FROM episodes WHERE slug = ?",
                params![slug],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;

        raw.map(|json| serde_json::from_str(&json).map_err(db_err))
            .transpose()
    }

    fn list_episodes(&self) -> Result<Vec<String>, JobError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT slug FROM episodes ORDER BY registered_at ASC")
            .map_err(db_err)?;
        let rows = stmt.query_map([], |row| row.get(0)).map_err(db_err)?;
        rows.collect::<Result<Vec<String>, _>>().map_err(db_err)
    }

    fn total_credits(&self) -> Result<u64, JobError> {
        let conn = self.conn()?;
        let total: i64 = conn
            .query_row("SELECT COALESCE(SUM(credits_spent), 0) FROM jobs", [], |row| {
                row.get(0)
            })
            .map_err(db_err)?;
        Ok(total.max(0) as u64)
    }

    fn count_by_state(&self) -> Result<Vec<(String, i64)>, JobError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT state_type, COUNT(*) FROM jobs GROUP BY state_type")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }
}
