//! Asynchronous reindex jobs with polling-based status.
//!
//! `start` returns a job id immediately; the work runs on the tokio
//! runtime behind a semaphore-bounded worker pool. Job records live in an
//! in-memory table and move through exactly one transition out of
//! `Running`. Failures, including panics inside the job body, are
//! captured into the record and never propagated to the spawner.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Finished,
    Failed,
}

/// Counters reported by a completed reindex pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReindexReport {
    pub reindexed_documents: usize,
    pub reindexed_chunks: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<ReindexReport>,
    pub error: Option<String>,
}

pub struct ReindexJobManager {
    jobs: Arc<RwLock<HashMap<String, JobRecord>>>,
    permits: Arc<Semaphore>,
}

impl ReindexJobManager {
    /// `workers` bounds how many jobs execute concurrently; queued jobs
    /// stay in `Running` until a permit frees up.
    pub fn new(workers: usize) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Registers a job and schedules it, returning the job id without
    /// waiting for the work to start.
    pub fn start<F, Fut>(&self, job: F) -> String
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<ReindexReport>> + Send + 'static,
    {
        let job_id = Uuid::new_v4().to_string();
        let record = JobRecord {
            job_id: job_id.clone(),
            status: JobStatus::Running,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        };
        {
            let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
            jobs.insert(job_id.clone(), record);
        }

        let jobs = Arc::clone(&self.jobs);
        let permits = Arc::clone(&self.permits);
        let task_id = job_id.clone();
        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return, // semaphore closed, process shutting down
            };
            {
                let mut jobs = jobs.write().unwrap_or_else(|e| e.into_inner());
                if let Some(record) = jobs.get_mut(&task_id) {
                    record.started_at = Some(Utc::now());
                }
            }
            tracing::info!(job_id = %task_id, "Reindex job started");

            // Run the body in its own task so a panic surfaces as a
            // JoinError instead of tearing down this supervisor.
            let outcome = match tokio::spawn(job()).await {
                Ok(Ok(report)) => Ok(report),
                Ok(Err(e)) => Err(e.to_string()),
                Err(join_err) => Err(format!("reindex job panicked: {join_err}")),
            };

            let mut jobs = jobs.write().unwrap_or_else(|e| e.into_inner());
            if let Some(record) = jobs.get_mut(&task_id) {
                // Terminal states are immutable; only the Running record
                // written above is ever transitioned.
                if record.status != JobStatus::Running {
                    return;
                }
                record.finished_at = Some(Utc::now());
                match outcome {
                    Ok(report) => {
                        tracing::info!(
                            job_id = %task_id,
                            documents = report.reindexed_documents,
                            chunks = report.reindexed_chunks,
                            "Reindex job finished"
                        );
                        record.status = JobStatus::Finished;
                        record.result = Some(report);
                    }
                    Err(message) => {
                        tracing::error!(job_id = %task_id, error = %message, "Reindex job failed");
                        record.status = JobStatus::Failed;
                        record.error = Some(message);
                    }
                }
            }
        });

        job_id
    }

    /// Snapshot of the record, or `None` for an unknown id. Callers map
    /// `None` to a not-found response at the API boundary.
    pub fn get_status(&self, job_id: &str) -> Option<JobRecord> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        jobs.get(job_id).cloned()
    }

    /// Id of any job still in `Running`, used to keep reindexing
    /// single-flight.
    pub fn running_job(&self) -> Option<String> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        jobs.values()
            .find(|record| record.status == JobStatus::Running)
            .map(|record| record.job_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use std::time::Duration;

    async fn wait_terminal(manager: &ReindexJobManager, job_id: &str) -> JobRecord {
        for _ in 0..200 {
            if let Some(record) = manager.get_status(job_id) {
                if record.status != JobStatus::Running {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} never reached a terminal state");
    }

    #[tokio::test]
    async fn successful_job_finishes_with_result() {
        let manager = ReindexJobManager::new(1);
        let job_id = manager.start(|| async {
            Ok(ReindexReport {
                reindexed_documents: 2,
                reindexed_chunks: 9,
            })
        });

        let record = wait_terminal(&manager, &job_id).await;
        assert_eq!(record.status, JobStatus::Finished);
        assert!(record.started_at.is_some());
        assert!(record.finished_at.is_some());
        let report = record.result.unwrap();
        assert_eq!(report.reindexed_documents, 2);
        assert_eq!(report.reindexed_chunks, 9);
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn failing_job_records_the_error() {
        let manager = ReindexJobManager::new(1);
        let job_id = manager
            .start(|| async { Err(EngineError::Embedding("model unavailable".to_string())) });

        let record = wait_terminal(&manager, &job_id).await;
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.result.is_none());
        assert!(record.error.unwrap().contains("model unavailable"));
    }

    #[tokio::test]
    async fn panicking_job_is_captured_as_failed() {
        let manager = ReindexJobManager::new(1);
        let job_id = manager.start(|| async { panic!("boom") });

        let record = wait_terminal(&manager, &job_id).await;
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.error.unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn unknown_job_id_returns_none() {
        let manager = ReindexJobManager::new(1);
        assert!(manager.get_status("no-such-job").is_none());
    }

    #[tokio::test]
    async fn start_returns_before_the_job_completes() {
        let manager = ReindexJobManager::new(1);
        let job_id = manager.start(|| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(ReindexReport::default())
        });

        let record = manager.get_status(&job_id).unwrap();
        assert_eq!(record.status, JobStatus::Running);
        assert!(record.finished_at.is_none());

        let record = wait_terminal(&manager, &job_id).await;
        assert_eq!(record.status, JobStatus::Finished);
    }

    #[tokio::test]
    async fn concurrent_jobs_all_reach_terminal_states() {
        let manager = ReindexJobManager::new(2);
        let ids: Vec<String> = (0..6)
            .map(|i| {
                manager.start(move || async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    if i % 3 == 0 {
                        Err(EngineError::Index(format!("job {i} failed")))
                    } else {
                        Ok(ReindexReport {
                            reindexed_documents: 1,
                            reindexed_chunks: i,
                        })
                    }
                })
            })
            .collect();

        let mut finished = 0;
        let mut failed = 0;
        for id in &ids {
            match wait_terminal(&manager, id).await.status {
                JobStatus::Finished => finished += 1,
                JobStatus::Failed => failed += 1,
                JobStatus::Running => unreachable!(),
            }
        }
        assert_eq!(finished, 4);
        assert_eq!(failed, 2);
    }

    #[tokio::test]
    async fn running_job_is_reported_for_single_flight() {
        let manager = ReindexJobManager::new(1);
        assert!(manager.running_job().is_none());

        let job_id = manager.start(|| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(ReindexReport::default())
        });
        assert_eq!(manager.running_job(), Some(job_id.clone()));

        wait_terminal(&manager, &job_id).await;
        assert!(manager.running_job().is_none());
    }
}
