//! Durable keyed job records (C3).
//!
//! [`SqliteStore`] wraps a blocking [`rusqlite::Connection`] with the CRUD
//! surface the spec requires. [`Store`] is the async handle the rest of the
//! system uses: it serializes access to the blocking connection through
//! [`tokio::task::spawn_blocking`] and exposes an async `call` method, so a
//! single connection can be shared across concurrently-orchestrating jobs
//! without the orchestrator ever blocking its executor thread on SQLite I/O.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::StoreError;
use crate::job::{Decision, Job, JobFilter, JobPatch, MetadataBag, NewJob, Page, Segment};

/// Blocking SQLite-backed implementation of the job store.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::OpenFailed {
            path: Path::new(":memory:").to_path_buf(),
            source,
        })?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             CREATE TABLE IF NOT EXISTS jobs (
                 job_id INTEGER PRIMARY KEY AUTOINCREMENT,
                 title TEXT NOT NULL,
                 domain TEXT NOT NULL,
                 division TEXT NOT NULL,
                 proposal_content TEXT NOT NULL,
                 segments TEXT NOT NULL,
                 hitl_stages TEXT NOT NULL,
                 status TEXT NOT NULL,
                 human_decision TEXT NOT NULL,
                 llm_decision TEXT NOT NULL,
                 metadata TEXT NOT NULL,
                 created_at TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);",
        )?;
        Ok(())
    }

    pub fn create_job(&self, fields: NewJob) -> Result<i64, StoreError> {
        let now = Utc::now();
        let segments_json =
            serde_json::to_string(&fields.segments).map_err(StoreError::Metadata)?;
        let hitl_json =
            serde_json::to_string(&fields.hitl_stages).map_err(StoreError::Metadata)?;
        let metadata_json =
            serde_json::to_string(&MetadataBag::default()).map_err(StoreError::Metadata)?;

        self.conn.execute(
            "INSERT INTO jobs (title, domain, division, proposal_content, segments,
                hitl_stages, status, human_decision, llm_decision, metadata,
                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                fields.title,
                fields.domain,
                fields.division,
                fields.proposal_content,
                segments_json,
                hitl_json,
                "pending",
                Decision::Pending.as_str(),
                Decision::Pending.as_str(),
                metadata_json,
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_job(&self, job_id: i64) -> Result<Job, StoreError> {
        self.conn
            .query_row(
                "SELECT job_id, title, domain, division, proposal_content, segments,
                    hitl_stages, status, human_decision, llm_decision, metadata,
                    created_at, updated_at
                 FROM jobs WHERE job_id = ?1",
                params![job_id],
                row_to_job,
            )
            .optional()?
            .ok_or(StoreError::JobNotFound { job_id })
    }

    /// Apply a field-level patch. Scalar fields overwrite; `metadata` is
    /// deep-merged via [`MetadataBag::merge`]. Runs inside a single
    /// connection-exclusive call, so concurrent patches for the same job
    /// are serialized by the caller ([`Store::call`]).
    pub fn update_job(&self, job_id: i64, patch: JobPatch) -> Result<Job, StoreError> {
        let mut job = self.get_job(job_id)?;

        if let Some(title) = patch.title {
            job.title = title;
        }
        if let Some(domain) = patch.domain {
            job.domain = domain;
        }
        if let Some(division) = patch.division {
            job.division = division;
        }
        if let Some(content) = patch.proposal_content {
            job.proposal_content = content;
        }
        if let Some(hitl) = patch.hitl_stages {
            job.hitl_stages = hitl;
        }
        if let Some(status) = patch.status {
            job.status = status;
        }
        if let Some(hd) = patch.human_decision {
            job.human_decision = hd;
        }
        if let Some(ld) = patch.llm_decision {
            job.llm_decision = ld;
        }
        if let Some(metadata_patch) = patch.metadata {
            job.metadata.merge(metadata_patch);
        }
        job.updated_at = Utc::now();

        let segments_json = serde_json::to_string(&job.segments).map_err(StoreError::Metadata)?;
        let hitl_json = serde_json::to_string(&job.hitl_stages).map_err(StoreError::Metadata)?;
        let metadata_json = serde_json::to_string(&job.metadata).map_err(StoreError::Metadata)?;

        self.conn.execute(
            "UPDATE jobs SET title = ?1, domain = ?2, division = ?3, proposal_content = ?4,
                segments = ?5, hitl_stages = ?6, status = ?7, human_decision = ?8,
                llm_decision = ?9, metadata = ?10, updated_at = ?11
             WHERE job_id = ?12",
            params![
                job.title,
                job.domain,
                job.division,
                job.proposal_content,
                segments_json,
                hitl_json,
                job.status,
                job.human_decision.as_str(),
                job.llm_decision.as_str(),
                metadata_json,
                job.updated_at.to_rfc3339(),
                job_id,
            ],
        )?;
        Ok(job)
    }

    pub fn list_jobs(&self, filter: JobFilter, page: Page) -> Result<Vec<Job>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT job_id, title, domain, division, proposal_content, segments,
                hitl_stages, status, human_decision, llm_decision, metadata,
                created_at, updated_at
             FROM jobs ORDER BY job_id DESC",
        )?;
        let rows = stmt.query_map([], row_to_job)?;
        let mut jobs = Vec::new();
        for row in rows {
            let job = row?;
            if let Some(status) = &filter.status {
                if &job.status != status {
                    continue;
                }
            }
            if let Some(hd) = filter.human_decision {
                if job.human_decision != hd {
                    continue;
                }
            }
            if let Some(ld) = filter.llm_decision {
                if job.llm_decision != ld {
                    continue;
                }
            }
            if let Some(q) = &filter.query {
                let haystack = format!("{} {}", job.title, job.proposal_content).to_lowercase();
                if !haystack.contains(&q.to_lowercase()) {
                    continue;
                }
            }
            jobs.push(job);
        }
        let start = page.offset.max(0) as usize;
        let end = (start + page.limit.max(0) as usize).min(jobs.len());
        Ok(if start >= jobs.len() {
            Vec::new()
        } else {
            jobs[start..end].to_vec()
        })
    }

    pub fn delete_job(&self, job_id: i64) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute("DELETE FROM jobs WHERE job_id = ?1", params![job_id])?;
        if changed == 0 {
            return Err(StoreError::JobNotFound { job_id });
        }
        Ok(())
    }
}

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
    let segments_json: String = row.get(5)?;
    let hitl_json: String = row.get(6)?;
    let metadata_json: String = row.get(10)?;
    let human_decision: String = row.get(8)?;
    let llm_decision: String = row.get(9)?;
    let created_at: String = row.get(11)?;
    let updated_at: String = row.get(12)?;

    let segments: Vec<Segment> = serde_json::from_str(&segments_json).unwrap_or_default();
    let hitl_stages: Vec<u8> = serde_json::from_str(&hitl_json).unwrap_or_default();
    let metadata: MetadataBag = serde_json::from_str(&metadata_json).unwrap_or_default();

    Ok(Job {
        job_id: row.get(0)?,
        title: row.get(1)?,
        domain: row.get(2)?,
        division: row.get(3)?,
        proposal_content: row.get(4)?,
        segments,
        hitl_stages,
        status: row.get(7)?,
        human_decision: human_decision.parse().unwrap_or_default(),
        llm_decision: llm_decision.parse().unwrap_or_default(),
        metadata,
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
        updated_at: updated_at.parse().unwrap_or_else(|_| Utc::now()),
    })
}

/// Async handle around a [`SqliteStore`]. Every operation is dispatched to
/// a blocking task and the underlying connection is guarded by a mutex, so
/// `update_job` calls for the same job are serialized (§5 single-writer
/// guarantee) without holding an async lock across an `.await`.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Mutex<SqliteStore>>,
}

impl Store {
    pub fn new(store: SqliteStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    pub async fn call<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&SqliteStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = inner.lock().expect("store mutex poisoned");
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Other(anyhow::anyhow!("store task panicked: {e}")))?
    }

    pub async fn create_job(&self, fields: NewJob) -> Result<i64, StoreError> {
        self.call(move |store| store.create_job(fields.clone()))
            .await
    }

    pub async fn get_job(&self, job_id: i64) -> Result<Job, StoreError> {
        self.call(move |store| store.get_job(job_id)).await
    }

    pub async fn update_job(&self, job_id: i64, patch: JobPatch) -> Result<Job, StoreError> {
        self.call(move |store| store.update_job(job_id, patch.clone()))
            .await
    }

    pub async fn list_jobs(&self, filter: JobFilter, page: Page) -> Result<Vec<Job>, StoreError> {
        self.call(move |store| store.list_jobs(filter.clone(), page))
            .await
    }

    pub async fn delete_job(&self, job_id: i64) -> Result<(), StoreError> {
        self.call(move |store| store.delete_job(job_id)).await
    }
}

// NewJob/JobPatch/JobFilter need to be cloned into the spawn_blocking closure.
impl Clone for NewJob {
    fn clone(&self) -> Self {
        Self {
            title: self.title.clone(),
            domain: self.domain.clone(),
            division: self.division.clone(),
            proposal_content: self.proposal_content.clone(),
            segments: self.segments.clone(),
            hitl_stages: self.hitl_stages.clone(),
        }
    }
}

impl Clone for JobPatch {
    fn clone(&self) -> Self {
        Self {
            title: self.title.clone(),
            domain: self.domain.clone(),
            division: self.division.clone(),
            proposal_content: self.proposal_content.clone(),
            hitl_stages: self.hitl_stages.clone(),
            status: self.status.clone(),
            human_decision: self.human_decision,
            llm_decision: self.llm_decision,
            metadata: self.metadata.clone(),
        }
    }
}

impl Clone for JobFilter {
    fn clone(&self) -> Self {
        Self {
            status: self.status.clone(),
            human_decision: self.human_decision,
            llm_decision: self.llm_decision,
            query: self.query.clone(),
        }
    }
}
