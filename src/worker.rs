//! Multi-session worker pool
//!
//! Jobs are queued on a crossbeam channel and drained by a fixed number of
//! scoped threads. Each worker owns its session state; the profile store and
//! models are shared read-only. A failing session is reported and the worker
//! moves on to the next job.

use crossbeam::channel;
use log::{info, warn};
use serde::Serialize;
use std::sync::Mutex;
use std::thread;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::estimator::WindowReport;
use crate::models::ModelSet;
use crate::session::{process_session, ProfileStore, SampleSource, SessionContext};

pub const NO_RESULTS: &str = "No results generated from processing";

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    /// Percent of buffered samples already windowed
    Processing { progress: f64 },
    Completed { progress: f64 },
    Failed { error: String },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed { .. } | JobStatus::Failed { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Job {
    pub session_id: String,
    pub subject_id: String,
}

impl Job {
    pub fn new(session_id: &str, subject_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            subject_id: subject_id.to_string(),
        }
    }
}

pub trait StatusSink: Send + Sync {
    fn update(&self, session_id: &str, status: JobStatus);
}

/// Persists the outcomes of one window.
pub trait ResultSink: Send + Sync {
    fn store(&self, session_id: &str, report: &WindowReport) -> Result<()>;
}

/// Sink that keeps every update in memory, in arrival order.
#[derive(Debug, Default)]
pub struct StatusLog {
    entries: Mutex<Vec<(String, JobStatus)>>,
}

impl StatusLog {
    pub fn entries(&self) -> Vec<(String, JobStatus)> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn latest(&self, session_id: &str) -> Option<JobStatus> {
        self.entries()
            .into_iter()
            .rev()
            .find(|(id, _)| id == session_id)
            .map(|(_, status)| status)
    }
}

impl StatusSink for StatusLog {
    fn update(&self, session_id: &str, status: JobStatus) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((session_id.to_string(), status));
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PoolSummary {
    pub completed: usize,
    pub failed: usize,
}

pub struct WorkerPool {
    workers: usize,
    config: PipelineConfig,
    models: ModelSet,
}

impl WorkerPool {
    pub fn new(workers: usize, config: PipelineConfig, models: ModelSet) -> Self {
        Self {
            workers: workers.max(1),
            config,
            models,
        }
    }

    /// Run every job to a terminal status. `open_source` builds a fresh source per job.
    pub fn run<F, S>(
        &self,
        jobs: Vec<Job>,
        profiles: &(dyn ProfileStore + Sync),
        open_source: F,
        status: &dyn StatusSink,
        results: &dyn ResultSink,
    ) -> PoolSummary
    where
        F: Fn(&Job) -> Result<S> + Sync,
        S: SampleSource,
    {
        let (job_tx, job_rx) = channel::unbounded::<Job>();
        let (done_tx, done_rx) = channel::unbounded::<JobStatus>();

        for job in jobs {
            status.update(&job.session_id, JobStatus::Queued);
            job_tx.send(job).ok();
        }
        drop(job_tx);

        info!("Worker pool: {} workers", self.workers);
        thread::scope(|scope| {
            for worker in 0..self.workers {
                let job_rx = job_rx.clone();
                let done_tx = done_tx.clone();
                let open_source = &open_source;
                scope.spawn(move || {
                    for job in job_rx.iter() {
                        info!("Worker {}: session {}", worker, job.session_id);
                        let outcome = self.run_job(&job, profiles, open_source, status, results);
                        done_tx.send(outcome).ok();
                    }
                });
            }
        });
        drop(done_tx);

        let mut summary = PoolSummary::default();
        for outcome in done_rx.iter() {
            match outcome {
                JobStatus::Completed { .. } => summary.completed += 1,
                _ => summary.failed += 1,
            }
        }
        summary
    }

    fn run_job<F, S>(
        &self,
        job: &Job,
        profiles: &(dyn ProfileStore + Sync),
        open_source: &F,
        status: &dyn StatusSink,
        results: &dyn ResultSink,
    ) -> JobStatus
    where
        F: Fn(&Job) -> Result<S>,
        S: SampleSource,
    {
        status.update(&job.session_id, JobStatus::Processing { progress: 0.0 });

        let produced = (|| -> Result<usize> {
            let ctx = SessionContext::for_subject(
                profiles,
                &job.subject_id,
                self.config.clone(),
                self.models.clone(),
            )?;
            let source = open_source(job)?;
            let mut run = process_session(&ctx, &job.session_id, source).on_progress(|p| {
                if p < 1.0 {
                    status.update(&job.session_id, JobStatus::Processing { progress: p * 100.0 });
                }
            });

            let mut produced = 0;
            while let Some(report) = run.next_report() {
                let report = report?;
                results.store(&job.session_id, &report)?;
                produced += report.outcomes.len();
            }
            Ok(produced)
        })();

        let final_status = match produced {
            Ok(n) if n > 0 => JobStatus::Completed { progress: 100.0 },
            Ok(_) => JobStatus::Failed {
                error: NO_RESULTS.to_string(),
            },
            Err(e) => {
                warn!("Session {} failed: {}", job.session_id, e);
                JobStatus::Failed {
                    error: e.to_string(),
                }
            }
        };
        status.update(&job.session_id, final_status.clone());
        final_status
    }
}
