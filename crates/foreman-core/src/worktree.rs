//! Worktree Manager (C3): git worktree lifecycle and mainline integration.
//!
//! Branch naming differs from a generic `ralph/<loop-id>` scheme: branches
//! here are always of the form `task/<shortId>` (see
//! `foreman_proto::run::branch_name`), and worktrees are always created
//! fresh off an existing branch tip — there is no "sync uncommitted local
//! files into the new worktree" step, because a run's worktree is born from
//! a committed ref, not from a developer's dirty working copy.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::git_ops::GitOpsError;

#[derive(Debug, thiserror::Error)]
pub enum WorktreeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("git operation failed: {0}")]
    Git(#[from] GitOpsError),

    #[error("failed to create worktree for branch {branch}: {stderr}")]
    WorktreeCreate { branch: String, stderr: String },

    #[error("failed to merge branch {branch} into main: {stderr}")]
    MergeIntoMain { branch: String, stderr: String },
}

fn run(dir: &Path, args: &[&str]) -> std::io::Result<std::process::Output> {
    Command::new("git").args(args).current_dir(dir).output()
}

/// Result of attempting to merge `main` into a worktree.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub clean: bool,
    pub conflicts: Vec<String>,
}

/// Result of removing a worktree: both outcomes are reported, never thrown
/// (spec.md §4.3).
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOutcome {
    pub worktree_removed: bool,
    pub branch_deleted: bool,
}

/// Creates a git worktree at `<worktrees_dir>/<branch-as-dir-name>` on a new
/// branch `branch_name`. If the branch already exists (a crash-leftover),
/// prunes and force-deletes it first, then proceeds.
pub fn create_worktree(
    repo_path: &Path,
    worktrees_dir: &Path,
    branch_name: &str,
) -> Result<PathBuf, WorktreeError> {
    std::fs::create_dir_all(worktrees_dir)?;

    if branch_exists(repo_path, branch_name)? {
        let _ = run(repo_path, &["worktree", "prune"]);
        let _ = run(repo_path, &["branch", "-D", branch_name]);
    }

    let dir_name = foreman_proto::run::branch_to_dir_name(branch_name);
    let worktree_path = worktrees_dir.join(dir_name);

    let output = run(
        repo_path,
        &[
            "worktree",
            "add",
            worktree_path.to_str().expect("worktree path is valid UTF-8"),
            "-b",
            branch_name,
        ],
    )?;
    if !output.status.success() {
        return Err(WorktreeError::WorktreeCreate {
            branch: branch_name.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    Ok(worktree_path)
}

fn branch_exists(repo_path: &Path, branch_name: &str) -> Result<bool, WorktreeError> {
    let output = run(
        repo_path,
        &["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch_name}")],
    )?;
    Ok(output.status.success())
}

/// `git merge main --no-edit` inside the worktree.
pub fn merge_main_into_worktree(worktree_path: &Path) -> Result<MergeOutcome, WorktreeError> {
    let output = run(worktree_path, &["merge", "main", "--no-edit"])?;
    if output.status.success() {
        return Ok(MergeOutcome {
            clean: true,
            conflicts: Vec::new(),
        });
    }
    let conflicts = crate::git_ops::conflicted_paths(worktree_path)?;
    Ok(MergeOutcome {
        clean: false,
        conflicts,
    })
}

/// `git merge <branch> --no-edit` inside `repo_path` (the main checkout).
pub fn merge_worktree_into_main(repo_path: &Path, branch_name: &str) -> Result<(), WorktreeError> {
    let output = run(repo_path, &["merge", branch_name, "--no-edit"])?;
    if !output.status.success() {
        return Err(WorktreeError::MergeIntoMain {
            branch: branch_name.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(())
}

/// `git merge --abort`; exit code is ignored since it legitimately fails
/// when no merge is in progress (spec.md §4.3).
pub fn abort_merge(worktree_path: &Path) {
    let _ = run(worktree_path, &["merge", "--abort"]);
}

/// Force-removes the worktree directory and force-deletes its branch. Both
/// outcomes are reported; this function never returns an error (spec.md
/// §4.3: "both outcomes reported but never throw").
pub fn remove_worktree(repo_path: &Path, worktree_path: &Path, branch_name: &str) -> RemoveOutcome {
    let worktree_removed = run(
        repo_path,
        &[
            "worktree",
            "remove",
            "--force",
            worktree_path.to_str().unwrap_or_default(),
        ],
    )
    .map(|o| o.status.success())
    .unwrap_or(false);

    let branch_deleted = run(repo_path, &["branch", "-D", branch_name])
        .map(|o| o.status.success())
        .unwrap_or(false);

    let _ = run(repo_path, &["worktree", "prune"]);

    RemoveOutcome {
        worktree_removed,
        branch_deleted,
    }
}

struct PorcelainWorktree {
    path: PathBuf,
    branch: Option<String>,
}

fn parse_worktree_list(porcelain: &str) -> Vec<PorcelainWorktree> {
    let mut result = Vec::new();
    let mut current_path: Option<PathBuf> = None;
    let mut current_branch: Option<String> = None;

    for line in porcelain.lines() {
        if let Some(p) = line.strip_prefix("worktree ") {
            if let Some(path) = current_path.take() {
                result.push(PorcelainWorktree {
                    path,
                    branch: current_branch.take(),
                });
            }
            current_path = Some(PathBuf::from(p));
        } else if let Some(b) = line.strip_prefix("branch ") {
            current_branch = Some(b.trim_start_matches("refs/heads/").to_string());
        } else if line.is_empty() {
            if let Some(path) = current_path.take() {
                result.push(PorcelainWorktree {
                    path,
                    branch: current_branch.take(),
                });
            }
        }
    }
    if let Some(path) = current_path.take() {
        result.push(PorcelainWorktree {
            path,
            branch: current_branch.take(),
        });
    }
    result
}

/// Startup-only sweep (spec.md §4.3): parses `git worktree list --porcelain`
/// and force-removes every worktree living under `worktrees_dir`, deleting
/// its branch too. Restores the invariant "a worktree directory exists iff
/// its branch exists" after an unclean daemon shutdown.
pub fn prune_stale_worktrees(repo_path: &Path, worktrees_dir: &Path) -> Result<(), WorktreeError> {
    let output = run(repo_path, &["worktree", "list", "--porcelain"])?;
    let porcelain = String::from_utf8_lossy(&output.stdout);
    let worktrees = parse_worktree_list(&porcelain);

    let worktrees_dir = worktrees_dir
        .canonicalize()
        .unwrap_or_else(|_| worktrees_dir.to_path_buf());

    for wt in worktrees {
        let canon = wt.path.canonicalize().unwrap_or_else(|_| wt.path.clone());
        if !canon.starts_with(&worktrees_dir) {
            continue;
        }
        let _ = run(
            repo_path,
            &["worktree", "remove", "--force", wt.path.to_str().unwrap_or_default()],
        );
        if let Some(branch) = wt.branch {
            let _ = run(repo_path, &["branch", "-D", &branch]);
        }
    }
    let _ = run(repo_path, &["worktree", "prune"]);
    Ok(())
}
