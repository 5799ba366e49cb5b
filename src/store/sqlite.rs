//! SQLite-backed job and media store.
//!
//! One database file holds both tables. All access is serialized through a
//! `Mutex<Connection>`; SQLite serializes writes anyway, and each trait call
//! is a single statement, so conditional updates are atomic.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;
use uuid::Uuid;

use super::{JobStore, MediaStore, StoreError};
use crate::domain::{JobStatus, Meditation, MeditationStatus, TtsJob};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS meditations (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    script TEXT,
    narration_audio_url TEXT,
    ambient_audio_url TEXT,
    final_audio_url TEXT,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tts_jobs (
    id TEXT PRIMARY KEY,
    meditation_id TEXT NOT NULL,
    status TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tts_jobs_status ON tts_jobs (status, created_at);
CREATE INDEX IF NOT EXISTS idx_tts_jobs_meditation ON tts_jobs (meditation_id, status);
"#;

const JOB_COLUMNS: &str = "id, meditation_id, status, attempts, last_error, created_at, updated_at";

const MEDITATION_COLUMNS: &str = "id, title, script, narration_audio_url, ambient_audio_url, \
     final_audio_url, status, created_at, updated_at";

/// Thread-safe SQLite store. Cloning shares the connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and ensure the schema exists
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %path.display(), "Opened job database");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&conn)
    }
}

/// Fixed-width RFC 3339 so text ordering matches time ordering
fn ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{}': {}", value, e)))
}

fn parse_id(value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|e| StoreError::Corrupt(format!("bad id '{}': {}", value, e)))
}

/// Raw job row, converted to a `TtsJob` outside the rusqlite row callback
struct JobRow {
    id: String,
    meditation_id: String,
    status: String,
    attempts: u32,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            meditation_id: row.get("meditation_id")?,
            status: row.get("status")?,
            attempts: row.get("attempts")?,
            last_error: row.get("last_error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn into_job(self) -> Result<TtsJob, StoreError> {
        Ok(TtsJob {
            id: parse_id(&self.id)?,
            meditation_id: parse_id(&self.meditation_id)?,
            status: self.status.parse().map_err(StoreError::Corrupt)?,
            attempts: self.attempts,
            last_error: self.last_error,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

struct MeditationRow {
    id: String,
    title: String,
    script: Option<String>,
    narration_audio_url: Option<String>,
    ambient_audio_url: Option<String>,
    final_audio_url: Option<String>,
    status: String,
    created_at: String,
    updated_at: String,
}

impl MeditationRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            title: row.get("title")?,
            script: row.get("script")?,
            narration_audio_url: row.get("narration_audio_url")?,
            ambient_audio_url: row.get("ambient_audio_url")?,
            final_audio_url: row.get("final_audio_url")?,
            status: row.get("status")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn into_meditation(self) -> Result<Meditation, StoreError> {
        let status: MeditationStatus = self.status.parse().map_err(StoreError::Corrupt)?;
        Ok(Meditation {
            id: parse_id(&self.id)?,
            title: self.title,
            script: self.script,
            narration_audio_url: self.narration_audio_url,
            ambient_audio_url: self.ambient_audio_url,
            final_audio_url: self.final_audio_url,
            status,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

fn collect_jobs(rows: Vec<JobRow>) -> Result<Vec<TtsJob>, StoreError> {
    rows.into_iter().map(JobRow::into_job).collect()
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn insert_job(&self, job: &TtsJob) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                &format!("INSERT INTO tts_jobs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)", JOB_COLUMNS),
                params![
                    job.id.to_string(),
                    job.meditation_id.to_string(),
                    job.status.as_str(),
                    job.attempts,
                    job.last_error,
                    ts(job.created_at),
                    ts(job.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<TtsJob>, StoreError> {
        let row = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM tts_jobs WHERE id = ?1", JOB_COLUMNS),
                    params![id.to_string()],
                    JobRow::from_row,
                )
                .optional()?)
        })?;
        row.map(JobRow::into_job).transpose()
    }

    async fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<TtsJob>, StoreError> {
        let rows = self.with_conn(|conn| {
            let rows = match status {
                Some(status) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM tts_jobs WHERE status = ?1 ORDER BY created_at ASC, rowid ASC",
                        JOB_COLUMNS
                    ))?;
                    let mapped = stmt.query_map(params![status.as_str()], JobRow::from_row)?;
                    mapped.collect::<Result<Vec<_>, _>>()?
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM tts_jobs ORDER BY created_at ASC, rowid ASC",
                        JOB_COLUMNS
                    ))?;
                    let mapped = stmt.query_map([], JobRow::from_row)?;
                    mapped.collect::<Result<Vec<_>, _>>()?
                }
            };
            Ok(rows)
        })?;
        collect_jobs(rows)
    }

    async fn active_job_for(&self, meditation_id: Uuid) -> Result<Option<TtsJob>, StoreError> {
        let row = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {} FROM tts_jobs
                         WHERE meditation_id = ?1 AND status IN ('pending', 'processing')
                         ORDER BY created_at ASC, rowid ASC LIMIT 1",
                        JOB_COLUMNS
                    ),
                    params![meditation_id.to_string()],
                    JobRow::from_row,
                )
                .optional()?)
        })?;
        row.map(JobRow::into_job).transpose()
    }

    async fn update_job_if(
        &self,
        job: &TtsJob,
        expected_status: JobStatus,
        expected_attempts: u32,
    ) -> Result<bool, StoreError> {
        let changed = self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE tts_jobs
                 SET status = ?1, attempts = ?2, last_error = ?3, updated_at = ?4
                 WHERE id = ?5 AND status = ?6 AND attempts = ?7",
                params![
                    job.status.as_str(),
                    job.attempts,
                    job.last_error,
                    ts(job.updated_at),
                    job.id.to_string(),
                    expected_status.as_str(),
                    expected_attempts,
                ],
            )?)
        })?;

        if changed == 0 && self.get_job(job.id).await?.is_none() {
            return Err(StoreError::NotFound {
                entity: "job",
                id: job.id,
            });
        }

        Ok(changed == 1)
    }

    async fn delete_all_jobs(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM tts_jobs", [])?))
    }
}

#[async_trait]
impl MediaStore for SqliteStore {
    async fn insert_meditation(&self, meditation: &Meditation) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO meditations ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    MEDITATION_COLUMNS
                ),
                params![
                    meditation.id.to_string(),
                    meditation.title,
                    meditation.script,
                    meditation.narration_audio_url,
                    meditation.ambient_audio_url,
                    meditation.final_audio_url,
                    meditation.status.as_str(),
                    ts(meditation.created_at),
                    ts(meditation.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    async fn get_meditation(&self, id: Uuid) -> Result<Option<Meditation>, StoreError> {
        let row = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM meditations WHERE id = ?1", MEDITATION_COLUMNS),
                    params![id.to_string()],
                    MeditationRow::from_row,
                )
                .optional()?)
        })?;
        row.map(MeditationRow::into_meditation).transpose()
    }

    async fn list_meditations(&self) -> Result<Vec<Meditation>, StoreError> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM meditations ORDER BY created_at ASC, rowid ASC",
                MEDITATION_COLUMNS
            ))?;
            let mapped = stmt.query_map([], MeditationRow::from_row)?;
            Ok(mapped.collect::<Result<Vec<_>, _>>()?)
        })?;
        rows.into_iter().map(MeditationRow::into_meditation).collect()
    }

    async fn update_meditation(&self, meditation: &Meditation) -> Result<(), StoreError> {
        let changed = self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE meditations
                 SET title = ?1, script = ?2, narration_audio_url = ?3, ambient_audio_url = ?4,
                     final_audio_url = ?5, status = ?6, updated_at = ?7
                 WHERE id = ?8",
                params![
                    meditation.title,
                    meditation.script,
                    meditation.narration_audio_url,
                    meditation.ambient_audio_url,
                    meditation.final_audio_url,
                    meditation.status.as_str(),
                    ts(meditation.updated_at),
                    meditation.id.to_string(),
                ],
            )?)
        })?;

        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "meditation",
                id: meditation.id,
            });
        }
        Ok(())
    }

    async fn set_narration(
        &self,
        id: Uuid,
        narration_url: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let changed = self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE meditations
                 SET narration_audio_url = ?1, final_audio_url = NULL, status = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![
                    narration_url,
                    MeditationStatus::Ready.as_str(),
                    ts(at),
                    id.to_string(),
                ],
            )?)
        })?;

        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "meditation",
                id,
            });
        }
        Ok(())
    }

    async fn set_final(
        &self,
        id: Uuid,
        narration_url: &str,
        final_url: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let changed = self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE meditations
                 SET final_audio_url = ?1, updated_at = ?2
                 WHERE id = ?3 AND narration_audio_url = ?4",
                params![final_url, ts(at), id.to_string(), narration_url],
            )?)
        })?;

        if changed == 0 && self.get_meditation(id).await?.is_none() {
            return Err(StoreError::NotFound {
                entity: "meditation",
                id,
            });
        }
        Ok(changed == 1)
    }

    async fn delete_all_meditations(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM meditations", [])?))
    }
}
