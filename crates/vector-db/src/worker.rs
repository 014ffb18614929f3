//! the async-facing handle and its dedicated worker thread
//!
//! [`VectorDatabase`] is plain synchronous state owned by exactly one OS
//! thread; [`VectorDb`] is the `Send + Sync` handle callers actually hold.
//! every call serializes a job onto an `std::sync::mpsc` queue and awaits a
//! `tokio::sync::oneshot` reply, so the worker thread processes one request
//! at a time in FIFO order and callers never block their executor on disk
//! or compute.

use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use tokio::sync::oneshot;

use crate::db::VectorDatabase;
use crate::error::{Error, Result};

enum Job {
    Insert {
        vector: Vec<i8>,
        reply: oneshot::Sender<Result<(u64, bool)>>,
    },
    Delete {
        id: u64,
        reply: oneshot::Sender<Result<bool>>,
    },
    SearchTopK {
        query: Vec<i8>,
        k: usize,
        reply: oneshot::Sender<Result<Vec<u64>>>,
    },
    Compact {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// a live handle to a vector database owned by its worker thread.
///
/// cloning shares the same worker: every clone's calls interleave into the
/// same FIFO queue. dropping the last handle closes the job channel, which
/// ends the worker thread's loop and drops the database.
#[derive(Clone)]
pub struct VectorDb {
    jobs: mpsc::Sender<Job>,
}

impl VectorDb {
    /// spawn the worker thread, opening (or creating) the database at
    /// `path`. the worker panics on unrecoverable I/O state rather than
    /// silently wedging — per the design, a dead worker is fatal and the
    /// host should treat it as such.
    pub fn spawn(path: impl Into<PathBuf>, dimension: usize, wal_soft_limit: Option<u64>) -> Result<(Self, bool)> {
        let path = path.into();
        let (db, newly_created) = VectorDatabase::load_or_create(path, dimension, wal_soft_limit)?;
        let (jobs_tx, jobs_rx) = mpsc::channel::<Job>();

        thread::Builder::new()
            .name("vector-db-worker".into())
            .spawn(move || run_worker(db, jobs_rx))
            .map_err(|e| Error::Fatal(format!("failed to spawn vector db worker thread: {e}")))?;

        Ok((Self { jobs: jobs_tx }, newly_created))
    }

    pub async fn insert(&self, vector: Vec<i8>) -> Result<(u64, bool)> {
        let (reply, rx) = oneshot::channel();
        self.send(Job::Insert { vector, reply })?;
        rx.await
            .map_err(|_| Error::Fatal("vector db worker thread died before replying".into()))?
    }

    pub async fn delete(&self, id: u64) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Job::Delete { id, reply })?;
        rx.await
            .map_err(|_| Error::Fatal("vector db worker thread died before replying".into()))?
    }

    pub async fn search_top_k(&self, query: Vec<i8>, k: usize) -> Result<Vec<u64>> {
        let (reply, rx) = oneshot::channel();
        self.send(Job::SearchTopK { query, k, reply })?;
        rx.await
            .map_err(|_| Error::Fatal("vector db worker thread died before replying".into()))?
    }

    pub async fn compact(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Job::Compact { reply })?;
        rx.await
            .map_err(|_| Error::Fatal("vector db worker thread died before replying".into()))?
    }

    fn send(&self, job: Job) -> Result<()> {
        self.jobs
            .send(job)
            .map_err(|_| Error::Fatal("vector db worker thread is gone".into()))
    }
}

fn run_worker(mut db: VectorDatabase, jobs: mpsc::Receiver<Job>) {
    while let Ok(job) = jobs.recv() {
        match job {
            Job::Insert { vector, reply } => {
                let result = db.insert(&vector);
                if let Err(ref err) = result {
                    tracing::warn!(error = %err, "vector db insert failed");
                }
                let _ = reply.send(result);
            }
            Job::Delete { id, reply } => {
                let result = db.delete(id);
                if let Err(ref err) = result {
                    tracing::warn!(error = %err, "vector db delete failed");
                }
                let _ = reply.send(result);
            }
            Job::SearchTopK { query, k, reply } => {
                let result = db.search_top_k(&query, k);
                let _ = reply.send(result);
            }
            Job::Compact { reply } => {
                let result = db.compact();
                if let Err(ref err) = result {
                    tracing::warn!(error = %err, "vector db compaction failed");
                }
                let _ = reply.send(result);
            }
        }
    }
    tracing::debug!("vector db worker thread shutting down: job channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_search_round_trips_through_the_worker() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, newly_created) = VectorDb::spawn(dir.path().join("v.db"), 4, None).unwrap();
        assert!(newly_created);

        let (id, _) = handle.insert(vec![1, 1, 1, 1]).await.unwrap();
        let results = handle.search_top_k(vec![1, 1, 1, 1], 1).await.unwrap();
        assert_eq!(results, vec![id]);
    }

    #[tokio::test]
    async fn delete_then_search_excludes_the_id() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, _) = VectorDb::spawn(dir.path().join("v.db"), 4, None).unwrap();

        let (id, _) = handle.insert(vec![2, 2, 2, 2]).await.unwrap();
        handle.delete(id).await.unwrap();
        let results = handle.search_top_k(vec![2, 2, 2, 2], 5).await.unwrap();
        assert!(!results.contains(&id));
    }

    #[tokio::test]
    async fn compact_is_callable_through_the_handle() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, _) = VectorDb::spawn(dir.path().join("v.db"), 4, None).unwrap();
        handle.insert(vec![1, 2, 3, 4]).await.unwrap();
        handle.compact().await.unwrap();
        let results = handle.search_top_k(vec![1, 2, 3, 4], 1).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn cloned_handles_share_the_same_worker() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, _) = VectorDb::spawn(dir.path().join("v.db"), 4, None).unwrap();
        let other = handle.clone();

        let (id, _) = handle.insert(vec![5, 5, 5, 5]).await.unwrap();
        let results = other.search_top_k(vec![5, 5, 5, 5], 1).await.unwrap();
        assert_eq!(results, vec![id]);
    }
}
