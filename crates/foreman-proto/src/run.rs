//! Run: a single worker/boss iteration campaign.

use crate::ids::{JobId, RunId};
use serde::{Deserialize, Serialize};

/// The one of three terminal events a run may end on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalEventType {
    Completed,
    Error,
    Interrupted,
}

impl TerminalEventType {
    /// The `Job.status` this terminal event maps a job to.
    pub fn as_job_status(self) -> crate::job::JobStatus {
        match self {
            TerminalEventType::Completed => crate::job::JobStatus::Completed,
            TerminalEventType::Error => crate::job::JobStatus::Error,
            TerminalEventType::Interrupted => crate::job::JobStatus::Interrupted,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    #[serde(rename = "jobId")]
    pub job_id: Option<JobId>,
    #[serde(rename = "branchName")]
    pub branch_name: String,
    #[serde(rename = "worktreePath")]
    pub worktree_path: String,
    pub iteration: u32,
    pub done: bool,
    #[serde(rename = "terminalEventType", skip_serializing_if = "Option::is_none")]
    pub terminal_event_type: Option<TerminalEventType>,
}

/// Derives the branch name for a run id: `task/<first 8 chars>`.
///
/// Invariant (spec.md §3): branch name maps one-to-one to the worktree
/// directory; `branch_to_dir_name` performs the companion mapping
/// (`/` replaced with `-`) so the worktree directory is a valid path
/// component.
pub fn branch_name(run_id: &RunId) -> String {
    format!("task/{}", run_id.short())
}

/// `task/ABC` -> `task-ABC`, used as the worktree's directory name.
pub fn branch_to_dir_name(branch: &str) -> String {
    branch.replace('/', "-")
}

impl Run {
    pub fn new(id: RunId, job_id: Option<JobId>, worktrees_dir: &std::path::Path) -> Self {
        let branch = branch_name(&id);
        let dir = branch_to_dir_name(&branch);
        let worktree_path = worktrees_dir.join(dir).to_string_lossy().into_owned();
        Self {
            id,
            job_id,
            branch_name: branch,
            worktree_path,
            iteration: 0,
            done: false,
            terminal_event_type: None,
        }
    }
}
