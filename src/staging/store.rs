//! Filesystem job store for staged merges
//!
//! Every job is a directory under the store root named by its id. Uploads
//! are streamed into `<position>.pdf` files and the ordering record is written
//! last. Nothing here locks: two requests that hold the same id see the same
//! directory.

use crate::error::{Error, Result};
use crate::staging::manifest::{
    resolve_merge_order, staged_file_name, MergeInput, OrderingRecord, ORDER_FILE_NAME,
};
use futures_util::{Stream, StreamExt};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Root of all staged merge jobs
#[derive(Debug, Clone)]
pub struct JobStore {
    root: PathBuf,
}

impl JobStore {
    /// Create a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the root directory if it does not exist yet
    pub async fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Generate a new job id (static, no collision check)
    pub fn generate_job_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Create a new, empty job directory with an id that does not collide
    /// with an existing one.
    pub async fn create_job(&self) -> Result<JobWriter> {
        self.ensure_root().await?;
        loop {
            let id = Self::generate_job_id();
            let dir = self.root.join(&id);
            match fs::create_dir(&dir).await {
                Ok(()) => {
                    tracing::debug!(job_id = %id, "created merge job");
                    return Ok(JobWriter {
                        id,
                        dir,
                        record: OrderingRecord::new(),
                        next_position: 0,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Look up an existing job.
    ///
    /// Only canonical UUIDs are accepted, so an id can never name anything
    /// outside the store root.
    pub async fn open_job(&self, id: &str) -> Result<StagedJob> {
        let not_found = || Error::JobNotFound { id: id.to_string() };

        match uuid::Uuid::parse_str(id) {
            Ok(parsed) if parsed.to_string() == id => {}
            _ => return Err(not_found()),
        }

        let dir = self.root.join(id);
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(StagedJob {
                id: id.to_string(),
                dir,
            }),
            Ok(_) => Err(not_found()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found()),
            Err(e) => Err(e.into()),
        }
    }

    /// Ids of every job directory currently on disk, including orphans left
    /// by aborted uploads.
    pub async fn job_ids(&self) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// A job being filled by an upload request
#[derive(Debug)]
pub struct JobWriter {
    id: String,
    dir: PathBuf,
    record: OrderingRecord,
    next_position: u32,
}

impl JobWriter {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stream one upload to disk under the next position.
    ///
    /// Returns the number of bytes written. On error the partially written
    /// file stays where it is.
    pub async fn stage_file<S, B, E>(&mut self, original_name: &str, chunks: S) -> Result<u64>
    where
        S: Stream<Item = std::result::Result<B, E>>,
        B: AsRef<[u8]>,
        Error: From<E>,
    {
        let position = self.next_position;
        let path = self.dir.join(staged_file_name(position));

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;

        let mut chunks = std::pin::pin!(chunks);
        let mut written: u64 = 0;
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            let bytes = chunk.as_ref();
            file.write_all(bytes).await?;
            written += bytes.len() as u64;
        }
        file.flush().await?;

        self.record.push(position, original_name);
        self.next_position += 1;

        tracing::debug!(
            job_id = %self.id,
            position,
            file = %original_name,
            bytes = written,
            "staged upload"
        );
        Ok(written)
    }

    /// Persist the ordering record and hand back the job id.
    pub async fn commit(self) -> Result<String> {
        if self.record.is_empty() {
            return Err(Error::MissingField { field: "files" });
        }

        let data = self.record.to_json()?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.dir.join(ORDER_FILE_NAME))
            .await?;
        file.write_all(&data).await?;
        file.flush().await?;

        tracing::info!(job_id = %self.id, files = self.record.len(), "merge job staged");
        Ok(self.id)
    }
}

/// Files to merge and where their order came from
#[derive(Debug, Clone)]
pub struct MergePlan {
    pub inputs: Vec<MergeInput>,
    /// False when the ordering record was missing or unreadable
    pub from_record: bool,
}

/// A committed job waiting to be merged
#[derive(Debug, Clone)]
pub struct StagedJob {
    id: String,
    dir: PathBuf,
}

impl StagedJob {
    pub fn path_of(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// Names of every entry in the job directory, sorted
    pub async fn listing(&self) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(&self.dir).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                Error::JobNotFound {
                    id: self.id.clone(),
                }
            } else {
                Error::Io(e)
            }
        })?;

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    pub async fn read_record(&self) -> Result<OrderingRecord> {
        let data = fs::read(self.dir.join(ORDER_FILE_NAME)).await?;
        OrderingRecord::from_json(&data)
    }

    /// Decide which staged files get merged, in which order.
    pub async fn merge_plan(&self) -> Result<MergePlan> {
        let listing = self.listing().await?;

        let record = match self.read_record().await {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(
                    job_id = %self.id,
                    error = %e,
                    "ordering record unreadable, falling back to file name order"
                );
                None
            }
        };

        Ok(MergePlan {
            inputs: resolve_merge_order(record.as_ref(), &listing),
            from_record: record.is_some(),
        })
    }

    /// Best-effort removal of every file in the job and the directory itself.
    ///
    /// Failures are logged and counted, never returned.
    pub async fn discard(&self) -> usize {
        let mut failures = 0;

        match self.listing().await {
            Ok(names) => {
                for name in names {
                    if let Err(e) = fs::remove_file(self.dir.join(&name)).await {
                        tracing::warn!(job_id = %self.id, file = %name, error = %e, "cleanup failed");
                        failures += 1;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(job_id = %self.id, error = %e, "cleanup could not list job");
                failures += 1;
            }
        }

        if let Err(e) = fs::remove_dir(&self.dir).await {
            tracing::warn!(job_id = %self.id, error = %e, "cleanup could not remove job directory");
            failures += 1;
        }

        failures
    }
}
