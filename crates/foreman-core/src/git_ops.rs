//! Deterministic git-state helpers used by the Worktree Manager (C3) and the
//! Resolver phase (C5) to decide whether a worktree is "clean" without ever
//! trusting an agent's claimed verdict.

use std::path::Path;
use std::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum GitOpsError {
    #[error("IO error running git: {0}")]
    Io(#[from] std::io::Error),

    #[error("git command failed: {command}\n{stderr}")]
    Git { command: String, stderr: String },
}

fn run(repo: &Path, args: &[&str]) -> Result<std::process::Output, GitOpsError> {
    Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .map_err(GitOpsError::Io)
}

fn run_ok(repo: &Path, args: &[&str]) -> Result<String, GitOpsError> {
    let output = run(repo, args)?;
    if !output.status.success() {
        return Err(GitOpsError::Git {
            command: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// `git status --porcelain` with trailing whitespace trimmed.
pub fn porcelain_status(repo: &Path) -> Result<String, GitOpsError> {
    run_ok(repo, &["status", "--porcelain"])
}

pub fn has_uncommitted_changes(repo: &Path) -> Result<bool, GitOpsError> {
    Ok(!porcelain_status(repo)?.trim().is_empty())
}

pub fn is_working_tree_clean(repo: &Path) -> Result<bool, GitOpsError> {
    Ok(!has_uncommitted_changes(repo)?)
}

pub fn get_head_sha(repo: &Path) -> Result<String, GitOpsError> {
    Ok(run_ok(repo, &["rev-parse", "HEAD"])?.trim().to_string())
}

/// Short (8-char) commit hash of HEAD, the form used in worker/boss event
/// payloads (spec.md §6).
pub fn get_head_short_sha(repo: &Path) -> Result<String, GitOpsError> {
    Ok(run_ok(repo, &["rev-parse", "--short=8", "HEAD"])?
        .trim()
        .to_string())
}

/// `MERGE_HEAD` existing in `.git/` means a merge is in progress.
pub fn has_merge_head(repo: &Path) -> bool {
    // `git rev-parse --git-dir` handles worktrees, where .git is a file
    // pointing at the real git-dir rather than a directory.
    match run_ok(repo, &["rev-parse", "--git-dir"]) {
        Ok(git_dir) => {
            let git_dir = git_dir.trim();
            let path = if Path::new(git_dir).is_absolute() {
                Path::new(git_dir).to_path_buf()
            } else {
                repo.join(git_dir)
            };
            path.join("MERGE_HEAD").exists()
        }
        Err(_) => false,
    }
}

/// Paths still marked unmerged (`U`) by git, via `--diff-filter=U`.
pub fn conflicted_paths(repo: &Path) -> Result<Vec<String>, GitOpsError> {
    let out = run_ok(repo, &["diff", "--name-only", "--diff-filter=U"])?;
    Ok(out.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
}

/// True if any tracked file contains a conflict marker line
/// (`<<<<<<<`, `=======`, `>>>>>>>` at the start of a line).
///
/// `git grep` exits 1 (not an error) when there are no matches; any other
/// non-zero exit (e.g. no commits yet) is treated as "no markers found"
/// since git grep only operates on tracked content.
pub fn has_conflict_markers(repo: &Path) -> bool {
    match run(repo, &["grep", "-I", "-l", "-E", "^(<<<<<<<|=======|>>>>>>>)"]) {
        Ok(output) => output.status.success() && !output.stdout.is_empty(),
        Err(_) => false,
    }
}

/// Deterministic "clean" check used by the Resolver (spec.md §4.5): no
/// merge in progress, no uncommitted changes, no conflict markers.
pub fn is_merge_resolved(repo: &Path) -> bool {
    !has_merge_head(repo)
        && porcelain_status(repo).map(|s| s.trim().is_empty()).unwrap_or(false)
        && !has_conflict_markers(repo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn init_git_repo() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let repo = tmp.path();
        Command::new("git")
            .args(["init", "--initial-branch=main"])
            .current_dir(repo)
            .output()
            .unwrap();
        Command::new("git")
            .args(["config", "user.email", "test@example.com"])
            .current_dir(repo)
            .output()
            .unwrap();
        Command::new("git")
            .args(["config", "user.name", "Test"])
            .current_dir(repo)
            .output()
            .unwrap();
        std::fs::write(repo.join("README.md"), "hello\n").unwrap();
        Command::new("git")
            .args(["add", "-A"])
            .current_dir(repo)
            .output()
            .unwrap();
        Command::new("git")
            .args(["commit", "-m", "initial"])
            .current_dir(repo)
            .output()
            .unwrap();
        tmp
    }

    #[test]
    fn clean_repo_has_no_uncommitted_changes() {
        let tmp = init_git_repo();
        assert!(!has_uncommitted_changes(tmp.path()).unwrap());
        assert!(is_working_tree_clean(tmp.path()).unwrap());
        assert!(is_merge_resolved(tmp.path()));
    }

    #[test]
    fn dirty_repo_has_uncommitted_changes() {
        let tmp = init_git_repo();
        std::fs::write(tmp.path().join("new.txt"), "x").unwrap();
        assert!(has_uncommitted_changes(tmp.path()).unwrap());
        assert!(!is_merge_resolved(tmp.path()));
    }

    #[test]
    fn head_sha_is_stable_and_short_is_prefix() {
        let tmp = init_git_repo();
        let full = get_head_sha(tmp.path()).unwrap();
        let short = get_head_short_sha(tmp.path()).unwrap();
        assert_eq!(full.len(), 40);
        assert!(full.starts_with(&short));
    }

    #[test]
    fn no_merge_in_progress_by_default() {
        let tmp = init_git_repo();
        assert!(!has_merge_head(tmp.path()));
    }

    #[test]
    fn conflict_markers_detected_in_tracked_file() {
        let tmp = init_git_repo();
        std::fs::write(
            tmp.path().join("README.md"),
            "<<<<<<< HEAD\nours\n=======\ntheirs\n>>>>>>> branch\n",
        )
        .unwrap();
        Command::new("git")
            .args(["add", "-A"])
            .current_dir(tmp.path())
            .output()
            .unwrap();
        assert!(has_conflict_markers(tmp.path()));
        assert!(!is_merge_resolved(tmp.path()));
    }

    #[test]
    fn no_conflict_markers_in_clean_repo() {
        let tmp = init_git_repo();
        assert!(!has_conflict_markers(tmp.path()));
    }
}
