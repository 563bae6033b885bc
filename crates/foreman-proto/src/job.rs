//! Job: a user-owned, persistent template for runs.

use crate::ids::{JobId, RunId};
use serde::{Deserialize, Serialize};

/// Status of a job, derived from the terminal event of its latest run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Draft,
    Running,
    Completed,
    Error,
    Interrupted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub prompt: String,
    pub status: JobStatus,
    #[serde(rename = "runId")]
    pub run_id: Option<RunId>,
    #[serde(rename = "runIds")]
    pub run_ids: Vec<RunId>,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

impl Job {
    pub fn new(prompt: impl Into<String>, created_at: i64) -> Self {
        Self {
            id: JobId::new(),
            prompt: prompt.into(),
            status: JobStatus::Draft,
            run_id: None,
            run_ids: Vec::new(),
            created_at,
        }
    }

    /// Records that `run_id` has been submitted for this job and flips it
    /// to `running`. Append-only: `run_ids` never shrinks.
    pub fn record_run(&mut self, run_id: RunId) {
        self.run_ids.push(run_id.clone());
        self.run_id = Some(run_id);
        self.status = JobStatus::Running;
    }

    /// Only running jobs are protected from deletion.
    pub fn is_deletable(&self) -> bool {
        self.status != JobStatus::Running
    }
}
