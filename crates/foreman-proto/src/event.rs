//! The closed event-tag vocabulary (spec.md §4.1, §6) as a Rust sum type.
//!
//! `EventKind` is the tagged union; `Event` wraps it with the two fields
//! common to every tag (`timestamp`, optional `runId`). Persisting an event
//! to `runs/<runId>/events.jsonl` and fanning it out over SSE use the same
//! `Event` serialization, matching the wire formats in spec.md §6.

use crate::ids::RunId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptReason {
    UserStop,
    UserQuit,
}

/// Which phase of a run an agent-session event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Executor,
    Validator,
    Resolver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Running,
    Completed,
    Error,
}

/// Which of a run's two Agent Server Handles (spec.md §4.4) an event
/// concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerRole {
    Worker,
    Boss,
}

/// The closed, exhaustive set of event tags (spec.md §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    #[serde(rename = "ralph.started")]
    RalphStarted {
        workspace: String,
        #[serde(rename = "agentModel")]
        agent_model: String,
        #[serde(rename = "evalModel")]
        eval_model: String,
    },
    #[serde(rename = "ralph.completed")]
    RalphCompleted { iterations: u32, done: bool },
    #[serde(rename = "ralph.error")]
    RalphError { error: String },
    #[serde(rename = "ralph.interrupted")]
    RalphInterrupted { reason: InterruptReason },

    #[serde(rename = "loop.iteration.start")]
    LoopIterationStart { iteration: u32 },
    #[serde(rename = "loop.done")]
    LoopDone,
    #[serde(rename = "loop.not_done")]
    LoopNotDone { iteration: u32, feedback: String },
    #[serde(rename = "loop.max_iterations")]
    LoopMaxIterations {
        #[serde(rename = "maxIterations")]
        max_iterations: u32,
    },

    #[serde(rename = "worker.start")]
    WorkerStart {
        #[serde(rename = "commitHash")]
        commit_hash: String,
    },
    #[serde(rename = "worker.complete")]
    WorkerComplete {
        #[serde(rename = "commitHash")]
        commit_hash: String,
        #[serde(rename = "logPath", skip_serializing_if = "Option::is_none")]
        log_path: Option<String>,
    },
    #[serde(rename = "boss.start")]
    BossStart {
        #[serde(rename = "commitHash")]
        commit_hash: String,
    },
    #[serde(rename = "boss.complete")]
    BossComplete {
        #[serde(rename = "commitHash")]
        commit_hash: String,
        done: bool,
        #[serde(rename = "logPath", skip_serializing_if = "Option::is_none")]
        log_path: Option<String>,
    },

    #[serde(rename = "resolver.start")]
    ResolverStart { conflicts: Vec<String> },
    #[serde(rename = "resolver.complete")]
    ResolverComplete,

    #[serde(rename = "session.text.delta")]
    SessionTextDelta { phase: Phase, delta: String },
    #[serde(rename = "session.tool.status")]
    SessionToolStatus {
        phase: Phase,
        tool: String,
        status: ToolStatus,
        detail: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        input: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<serde_json::Value>,
        #[serde(rename = "durationSecs", skip_serializing_if = "Option::is_none")]
        duration_secs: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
    #[serde(rename = "session.permission")]
    SessionPermission {
        phase: Phase,
        permission: String,
        description: String,
    },

    #[serde(rename = "server.ready")]
    ServerReady { role: ServerRole },
    #[serde(rename = "server.cleanup")]
    ServerCleanup { role: ServerRole },

    #[serde(rename = "worktree.created")]
    WorktreeCreated {
        #[serde(rename = "branchName")]
        branch_name: String,
        #[serde(rename = "worktreePath")]
        worktree_path: String,
    },
    #[serde(rename = "worktree.merged")]
    WorktreeMerged {
        #[serde(rename = "branchName")]
        branch_name: String,
    },
    #[serde(rename = "worktree.merge_conflict")]
    WorktreeMergeConflict {
        #[serde(rename = "branchName")]
        branch_name: String,
        conflicts: Vec<String>,
    },
    #[serde(rename = "worktree.removed")]
    WorktreeRemoved {
        #[serde(rename = "branchName")]
        branch_name: String,
    },
}

impl EventKind {
    /// The wire tag for this variant, e.g. `"worktree.merge_conflict"`.
    pub fn tag(&self) -> &'static str {
        match self {
            EventKind::RalphStarted { .. } => "ralph.started",
            EventKind::RalphCompleted { .. } => "ralph.completed",
            EventKind::RalphError { .. } => "ralph.error",
            EventKind::RalphInterrupted { .. } => "ralph.interrupted",
            EventKind::LoopIterationStart { .. } => "loop.iteration.start",
            EventKind::LoopDone => "loop.done",
            EventKind::LoopNotDone { .. } => "loop.not_done",
            EventKind::LoopMaxIterations { .. } => "loop.max_iterations",
            EventKind::WorkerStart { .. } => "worker.start",
            EventKind::WorkerComplete { .. } => "worker.complete",
            EventKind::BossStart { .. } => "boss.start",
            EventKind::BossComplete { .. } => "boss.complete",
            EventKind::ResolverStart { .. } => "resolver.start",
            EventKind::ResolverComplete => "resolver.complete",
            EventKind::SessionTextDelta { .. } => "session.text.delta",
            EventKind::SessionToolStatus { .. } => "session.tool.status",
            EventKind::SessionPermission { .. } => "session.permission",
            EventKind::ServerReady { .. } => "server.ready",
            EventKind::ServerCleanup { .. } => "server.cleanup",
            EventKind::WorktreeCreated { .. } => "worktree.created",
            EventKind::WorktreeMerged { .. } => "worktree.merged",
            EventKind::WorktreeMergeConflict { .. } => "worktree.merge_conflict",
            EventKind::WorktreeRemoved { .. } => "worktree.removed",
        }
    }

    /// True for exactly the three terminal tags (spec.md §3, §8).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::RalphCompleted { .. }
                | EventKind::RalphError { .. }
                | EventKind::RalphInterrupted { .. }
        )
    }
}

/// An immutable record on the bus and in the JSONL log (spec.md §3).
///
/// Events with `run_id: None` are broadcast-only and never persisted;
/// events carrying a `run_id` are both fanned out on the bus and appended
/// to that run's JSONL log (spec.md §3 invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub kind: EventKind,
    pub timestamp: i64,
    #[serde(rename = "runId", skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
}

impl Event {
    pub fn new(kind: EventKind, timestamp: i64) -> Self {
        Self {
            kind,
            timestamp,
            run_id: None,
        }
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn tag(&self) -> &'static str {
        self.kind.tag()
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}
