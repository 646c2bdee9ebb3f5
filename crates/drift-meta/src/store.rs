//! [`MetaStore`] implementation wrapping Fjall keyspaces.

use std::path::Path;

use drift_types::{ContentHash, UploadRecord};
use fjall::{Database, Keyspace, KeyspaceCreateOptions};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::MetaError;

type Result<T> = std::result::Result<T, MetaError>;

/// A pipeline job persisted until it reaches a terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredJob {
    /// Registered task name.
    pub task: String,
    /// Caller-supplied deduplication key.
    pub dedup_key: String,
    /// Serialized task arguments.
    pub args: Vec<u8>,
    /// Number of runs already attempted.
    pub attempts: u32,
}

impl StoredJob {
    /// Storage key of this job: `"task/dedup_key"`.
    pub fn storage_key(&self) -> String {
        job_storage_key(&self.task, &self.dedup_key)
    }
}

/// Metadata store backed by Fjall.
pub struct MetaStore {
    /// The underlying Fjall database handle.
    #[allow(dead_code)]
    db: Database,
    /// Kept alive for temporary stores so the directory outlives the database.
    _tmp: Option<tempfile::TempDir>,
    /// ContentHash → serialized UploadRecord.
    uploads: Keyspace,
    /// `task/dedup_key` → serialized StoredJob.
    jobs: Keyspace,
}

impl MetaStore {
    /// Open a persistent MetaStore at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::builder(path).open()?;
        Self::init_keyspaces(db, None)
    }

    /// Open a temporary MetaStore that is cleaned up on drop.
    ///
    /// Useful for tests.
    pub fn open_temporary() -> Result<Self> {
        let tmp = tempfile::tempdir()?;
        let db = Database::builder(tmp.path()).temporary(true).open()?;
        Self::init_keyspaces(db, Some(tmp))
    }

    fn init_keyspaces(db: Database, tmp: Option<tempfile::TempDir>) -> Result<Self> {
        let uploads = db.keyspace("uploads", KeyspaceCreateOptions::default)?;
        let jobs = db.keyspace("jobs", KeyspaceCreateOptions::default)?;
        Ok(Self {
            db,
            _tmp: tmp,
            uploads,
            jobs,
        })
    }

    // ----- Completed uploads -----

    /// Persist a completed upload.
    ///
    /// `confirmed` marks the record as already verified, so the storage
    /// layer's own verification is skipped for it.
    pub fn save_upload(&self, record: &UploadRecord, confirmed: bool) -> Result<()> {
        let mut record = record.clone();
        record.confirmed = confirmed;
        let value = postcard::to_allocvec(&record)?;
        self.uploads
            .insert(record.hash.as_bytes(), value.as_slice())?;
        debug!(hash = %record.hash, user_id = record.user_id, confirmed, "stored upload");
        Ok(())
    }

    /// Retrieve a completed upload by content hash.
    pub fn get_upload(&self, hash: &ContentHash) -> Result<Option<UploadRecord>> {
        match self.uploads.get(hash.as_bytes())? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// List every completed upload.
    pub fn all_uploads(&self) -> Result<Vec<UploadRecord>> {
        let mut uploads = Vec::new();
        for guard in self.uploads.iter() {
            let v = guard.value()?;
            uploads.push(postcard::from_bytes(&v)?);
        }
        Ok(uploads)
    }

    /// Delete a completed upload record.
    pub fn remove_upload(&self, hash: &ContentHash) -> Result<()> {
        self.uploads.remove(hash.as_bytes())?;
        debug!(%hash, "removed upload");
        Ok(())
    }

    // ----- Job queue (local, survives restarts) -----

    /// Insert or overwrite a pending job.
    pub fn put_job(&self, job: &StoredJob) -> Result<()> {
        let value = postcard::to_allocvec(job)?;
        self.jobs
            .insert(job.storage_key().as_bytes(), value.as_slice())?;
        debug!(task = %job.task, key = %job.dedup_key, attempts = job.attempts, "stored job");
        Ok(())
    }

    /// Retrieve a pending job by task and dedup key.
    pub fn get_job(&self, task: &str, dedup_key: &str) -> Result<Option<StoredJob>> {
        match self.jobs.get(job_storage_key(task, dedup_key).as_bytes())? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Remove a job once it reached a terminal outcome.
    pub fn remove_job(&self, task: &str, dedup_key: &str) -> Result<()> {
        self.jobs.remove(job_storage_key(task, dedup_key).as_bytes())?;
        debug!(task, key = dedup_key, "removed job");
        Ok(())
    }

    /// List every pending job, ordered by storage key.
    pub fn list_jobs(&self) -> Result<Vec<StoredJob>> {
        let mut jobs = Vec::new();
        for guard in self.jobs.iter() {
            let v = guard.value()?;
            jobs.push(postcard::from_bytes(&v)?);
        }
        Ok(jobs)
    }
}

/// Build the storage key for the jobs keyspace: `"task/dedup_key"`.
fn job_storage_key(task: &str, dedup_key: &str) -> String {
    format!("{task}/{dedup_key}")
}
