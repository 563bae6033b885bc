//! Resolver phase: a bounded sub-loop that asks the worker agent to resolve
//! merge conflicts and (optionally) a boss agent to judge, but always trusts
//! deterministic git state over any agent's claimed verdict (spec.md §4.5).
//!
//! Open question, resolved per spec.md §9: the resolver accepts both a
//! worker client and an optional boss client, falling back to the worker
//! client for boss duties when no boss client is supplied.

use std::path::{Path, PathBuf};
use std::time::Duration;

use foreman_proto::EventKind;

use super::boss_done;
use crate::bus::TaggedPublisher;
use crate::git_ops;
use crate::session_transport::{
    run_session, AgentServerClient, ModelRef, SessionRequest, SessionTransportError,
};

/// Default bound on resolver sub-iterations (spec.md §4.5).
pub const DEFAULT_MAX_ITERATIONS: u32 = 4;

pub struct ResolverOutcome {
    pub done: bool,
    pub iterations: u32,
}

fn conflict_prompt(conflicts: &[String], porcelain: &str, has_markers: bool) -> String {
    format!(
        "Resolve the following merge conflicts.\n\nConflicted files:\n{}\n\n\
         Current `git status --porcelain`:\n{}\n\n\
         Conflict markers present: {}\n\n\
         Edit the conflicted files to resolve all markers, stage the resolution, and commit.",
        conflicts.join("\n"),
        porcelain,
        has_markers,
    )
}

fn judge_prompt(conflicts: &[String], porcelain: &str, has_markers: bool) -> String {
    format!(
        "A worker agent attempted to resolve merge conflicts in the following files:\n{}\n\n\
         Current `git status --porcelain`:\n{}\n\n\
         Conflict markers present: {}\n\n\
         Reply `VERDICT: DONE` if and only if the conflicts are fully resolved; otherwise \
         reply `VERDICT: NOT DONE` with feedback for the worker.",
        conflicts.join("\n"),
        porcelain,
        has_markers,
    )
}

#[allow(clippy::too_many_arguments)]
pub async fn run_resolver(
    worker_client: &dyn AgentServerClient,
    boss_client: Option<&dyn AgentServerClient>,
    worktree_path: &Path,
    conflicts: Vec<String>,
    worker_model: ModelRef,
    boss_model: ModelRef,
    log_path: Option<PathBuf>,
    timeout: Duration,
    max_iterations: u32,
    publisher: &TaggedPublisher,
) -> Result<ResolverOutcome, SessionTransportError> {
    publisher.publish(EventKind::ResolverStart {
        conflicts: conflicts.clone(),
    });

    let boss_client = boss_client.unwrap_or(worker_client);

    for iteration in 1..=max_iterations {
        let conflicts = git_ops::conflicted_paths(worktree_path).unwrap_or_default();
        let porcelain = git_ops::porcelain_status(worktree_path).unwrap_or_default();
        let has_markers = git_ops::has_conflict_markers(worktree_path);

        run_session(
            worker_client,
            SessionRequest {
                prompt: &conflict_prompt(&conflicts, &porcelain, has_markers),
                title: "resolver phase (worker)",
                model: worker_model.clone(),
                phase: foreman_proto::Phase::Resolver,
                log_path: log_path.clone(),
                timeout,
            },
            publisher,
        )
        .await?;

        if git_ops::is_merge_resolved(worktree_path) {
            publisher.publish(EventKind::ResolverComplete);
            return Ok(ResolverOutcome {
                done: true,
                iterations: iteration,
            });
        }

        let conflicts = git_ops::conflicted_paths(worktree_path).unwrap_or_default();
        let porcelain = git_ops::porcelain_status(worktree_path).unwrap_or_default();
        let has_markers = git_ops::has_conflict_markers(worktree_path);

        let verdict = run_session(
            boss_client,
            SessionRequest {
                prompt: &judge_prompt(&conflicts, &porcelain, has_markers),
                title: "resolver phase (boss)",
                model: boss_model.clone(),
                phase: foreman_proto::Phase::Resolver,
                log_path: log_path.clone(),
                timeout,
            },
            publisher,
        )
        .await?;

        if boss_done(&verdict.output) && git_ops::is_merge_resolved(worktree_path) {
            publisher.publish(EventKind::ResolverComplete);
            return Ok(ResolverOutcome {
                done: true,
                iterations: iteration,
            });
        }
    }

    publisher.publish(EventKind::ResolverComplete);
    Ok(ResolverOutcome {
        done: false,
        iterations: max_iterations,
    })
}
