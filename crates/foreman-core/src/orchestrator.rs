//! Run Orchestrator (C6): the worker↔boss iteration loop with context
//! carry-over, the conflict-resolution sub-loop, and the worktree lifecycle
//! bracketing every run (spec.md §4.6).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use foreman_proto::{EventKind, RunId};

use crate::bus::TaggedPublisher;
use crate::git_ops;
use crate::merge_lock::MergeLock;
use crate::phases::{run_boss, run_resolver, run_worker};
use crate::session_transport::{AgentServerClient, ModelRef, SessionTransportError};
use crate::worktree;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("worktree error: {0}")]
    Worktree(#[from] crate::worktree::WorktreeError),

    #[error("session transport error: {0}")]
    Session(#[from] SessionTransportError),
}

pub struct RunRequest<'a> {
    pub run_id: RunId,
    pub repo_path: PathBuf,
    pub worktrees_dir: PathBuf,
    pub prompt: String,
    pub worker_model: ModelRef,
    pub boss_model: ModelRef,
    pub log_dir: Option<PathBuf>,
    pub max_iterations: u32,
    pub merge_retry_max: u32,
    pub resolver_max_iterations: u32,
    pub session_timeout: Duration,
    pub worker_client: &'a dyn AgentServerClient,
    pub boss_client: &'a dyn AgentServerClient,
    pub merge_lock: &'a MergeLock,
    pub publisher: &'a TaggedPublisher,
}

pub struct RunOutcome {
    pub iterations: u32,
    pub done: bool,
}

/// Subscribes a fresh flag to this run's `ralph.interrupted` tag so
/// `run_iterations` can observe an externally published interrupt (e.g. via
/// `POST /runs/:runId/interrupt`) and stop before starting its next
/// iteration, instead of running to completion and publishing a second
/// terminal event after the one the interrupt already wrote (spec.md §4.6
/// line 167, §5 line 220). The subscription itself never blocks: it only
/// flips an `AtomicBool`, matching the bus's "subscribers must not block"
/// rule.
fn watch_for_interrupt(publisher: &TaggedPublisher) -> Arc<AtomicBool> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_for_closure = interrupted.clone();
    let run_id = publisher.run_id().clone();
    publisher.bus().subscribe_tag("ralph.interrupted", move |event| {
        if event.run_id.as_ref() == Some(&run_id) {
            interrupted_for_closure.store(true, Ordering::SeqCst);
        }
    });
    interrupted
}

/// Runs the full worker↔boss campaign for one run: worktree bracketing
/// happens unconditionally, so cleanup always fires even if the loop body
/// errors out with `ralph.error` or panics partway through.
pub async fn run(request: RunRequest<'_>) -> RunOutcome {
    let interrupted = watch_for_interrupt(request.publisher);
    let branch_name = foreman_proto::run::branch_name(&request.run_id);
    let log_path = request
        .log_dir
        .as_ref()
        .map(|dir| dir.join(format!("{}.log", request.run_id)));

    let worktree_path = match worktree::create_worktree(
        &request.repo_path,
        &request.worktrees_dir,
        &branch_name,
    ) {
        Ok(path) => path,
        Err(err) => {
            request.publisher.publish(EventKind::RalphError {
                error: err.to_string(),
            });
            return RunOutcome {
                iterations: 0,
                done: false,
            };
        }
    };
    request.publisher.publish(EventKind::WorktreeCreated {
        branch_name: branch_name.clone(),
        worktree_path: worktree_path.to_string_lossy().into_owned(),
    });

    // Guards the worktree/branch removal so it still fires if `run_iterations`
    // panics partway through, not just when it returns normally.
    let _cleanup = scopeguard::guard(
        (request.repo_path.clone(), worktree_path.clone(), branch_name.clone()),
        |(repo_path, worktree_path, branch_name)| {
            let removed = worktree::remove_worktree(&repo_path, &worktree_path, &branch_name);
            if !removed.worktree_removed || !removed.branch_deleted {
                tracing::warn!(
                    branch = branch_name,
                    worktree_removed = removed.worktree_removed,
                    branch_deleted = removed.branch_deleted,
                    "worktree cleanup incomplete"
                );
            }
        },
    );

    let outcome = run_iterations(&request, &worktree_path, &branch_name, log_path.clone(), &interrupted).await;

    drop(_cleanup);
    request.publisher.publish(EventKind::WorktreeRemoved {
        branch_name: branch_name.clone(),
    });

    outcome
}

async fn run_iterations(
    request: &RunRequest<'_>,
    worktree_path: &Path,
    branch_name: &str,
    log_path: Option<PathBuf>,
    interrupted: &AtomicBool,
) -> RunOutcome {
    let mut previous_feedback: Option<String> = None;
    let mut done = false;
    let mut iterations = 0;

    for iteration in 1..=request.max_iterations {
        // An externally published `ralph.interrupted` means no further
        // iteration is initiated; the run winds down with whatever
        // iteration count it already reached, and publishes nothing more
        // here, since the interrupt itself is the run's one terminal event.
        if interrupted.load(Ordering::SeqCst) {
            return RunOutcome { iterations, done: false };
        }

        iterations = iteration;
        request
            .publisher
            .publish(EventKind::LoopIterationStart { iteration });

        let worker_outcome = match run_worker(
            request.worker_client,
            worktree_path,
            &request.prompt,
            previous_feedback.as_deref(),
            request.worker_model.clone(),
            log_path.clone(),
            request.session_timeout,
            request.publisher,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                request.publisher.publish(EventKind::RalphError {
                    error: err.to_string(),
                });
                return RunOutcome { iterations, done: false };
            }
        };

        let boss_outcome = match run_boss(
            request.boss_client,
            &request.prompt,
            &worker_outcome.commit_hash,
            request.boss_model.clone(),
            log_path.clone(),
            request.session_timeout,
            request.publisher,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                request.publisher.publish(EventKind::RalphError {
                    error: err.to_string(),
                });
                return RunOutcome { iterations, done: false };
            }
        };

        if boss_outcome.done {
            request.publisher.publish(EventKind::LoopDone);
            done = true;
            break;
        }

        request.publisher.publish(EventKind::LoopNotDone {
            iteration,
            feedback: boss_outcome.transcript.clone(),
        });
        previous_feedback = Some(boss_outcome.transcript);
    }

    if !done {
        // The interrupt may have landed while the last iteration's worker or
        // boss session was still in flight (which is left to finish
        // normally); check once more before declaring our own terminal
        // event so that event isn't written after an `ralph.interrupted`
        // that arrived just past the last per-iteration check.
        if interrupted.load(Ordering::SeqCst) {
            return RunOutcome { iterations, done: false };
        }
        request.publisher.publish(EventKind::LoopMaxIterations {
            max_iterations: request.max_iterations,
        });
        request.publisher.publish(EventKind::RalphCompleted {
            iterations,
            done: false,
        });
        return RunOutcome { iterations, done: false };
    }

    match integrate(request, worktree_path, branch_name, log_path).await {
        Ok(()) => {
            request
                .publisher
                .publish(EventKind::RalphCompleted { iterations, done: true });
            RunOutcome { iterations, done: true }
        }
        Err(err) => {
            request.publisher.publish(EventKind::RalphError {
                error: err.to_string(),
            });
            RunOutcome { iterations, done: false }
        }
    }
}

async fn integrate(
    request: &RunRequest<'_>,
    worktree_path: &Path,
    branch_name: &str,
    log_path: Option<PathBuf>,
) -> Result<(), OrchestratorError> {
    let mut merge = worktree::merge_main_into_worktree(worktree_path)?;
    let mut retries = 0;

    while !merge.clean && retries < request.merge_retry_max {
        request.publisher.publish(EventKind::WorktreeMergeConflict {
            branch_name: branch_name.to_string(),
            conflicts: merge.conflicts.clone(),
        });

        let resolved = run_resolver(
            request.worker_client,
            Some(request.boss_client),
            worktree_path,
            merge.conflicts.clone(),
            request.worker_model.clone(),
            request.boss_model.clone(),
            log_path.clone(),
            request.session_timeout,
            request.resolver_max_iterations,
            request.publisher,
        )
        .await?;

        if resolved.done {
            merge.clean = true;
            break;
        }

        worktree::abort_merge(worktree_path);
        merge = worktree::merge_main_into_worktree(worktree_path)?;
        retries += 1;
    }

    if !merge.clean {
        return Err(OrchestratorError::Worktree(
            crate::worktree::WorktreeError::MergeIntoMain {
                branch: branch_name.to_string(),
                stderr: format!(
                    "could not resolve merge conflicts after {retries} retries"
                ),
            },
        ));
    }

    let repo_path = request.repo_path.clone();
    let branch = branch_name.to_string();
    request
        .merge_lock
        .with_lock(|| async move { worktree::merge_worktree_into_main(&repo_path, &branch) })
        .await?;

    request.publisher.publish(EventKind::WorktreeMerged {
        branch_name: branch_name.to_string(),
    });

    Ok(())
}

/// Source-of-truth re-check performed before declaring a merge clean after a
/// resolver pass — exposed for the orchestrator's own tests and reused by
/// callers that want to confirm resolver state independent of its reported
/// verdict.
pub fn verify_clean(worktree_path: &Path) -> bool {
    git_ops::is_merge_resolved(worktree_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use futures::stream::{self, BoxStream, StreamExt};
    use std::process::Command;
    use std::sync::{Arc, Mutex as StdMutex};
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .expect("git invocation");
        assert!(status.status.success(), "git {args:?} failed: {status:?}");
    }

    fn init_git_repo() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let repo = tmp.path();
        git(repo, &["init", "--initial-branch=main"]);
        git(repo, &["config", "user.email", "test@example.com"]);
        git(repo, &["config", "user.name", "Test"]);
        std::fs::write(repo.join("README.md"), "hello\n").unwrap();
        git(repo, &["add", "-A"]);
        git(repo, &["commit", "-m", "initial"]);
        tmp
    }

    /// A step in a [`ScriptedClient`]'s script: the text a session "says",
    /// plus an optional side effect run while the prompt is submitted (used
    /// to simulate an agent editing and committing files in the worktree).
    struct Step {
        text: String,
        effect: Option<Box<dyn Fn() + Send + Sync>>,
    }

    impl Step {
        fn text(text: &str) -> Self {
            Self { text: text.to_string(), effect: None }
        }

        fn with_effect(text: &str, effect: impl Fn() + Send + Sync + 'static) -> Self {
            Self { text: text.to_string(), effect: Some(Box::new(effect)) }
        }
    }

    /// An [`AgentServerClient`] that plays back one [`Step`] per
    /// `create_session` call, running that step's side effect (if any)
    /// during `prompt_async` so the effect lands before the consuming loop
    /// observes `SessionIdle`.
    struct ScriptedClient {
        steps: StdMutex<std::collections::VecDeque<Step>>,
        prompts_seen: Arc<StdMutex<Vec<String>>>,
    }

    impl ScriptedClient {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: StdMutex::new(steps.into()),
                prompts_seen: Arc::new(StdMutex::new(Vec::new())),
            }
        }
    }

    #[async_trait::async_trait]
    impl AgentServerClient for ScriptedClient {
        async fn create_session(&self, _title: &str) -> Result<String, SessionTransportError> {
            Ok("sess".to_string())
        }

        fn subscribe(&self, _session_id: &str) -> BoxStream<'static, crate::session_transport::SessionStreamEvent> {
            use crate::session_transport::SessionStreamEvent;
            let text = self
                .steps
                .lock()
                .unwrap()
                .front()
                .map(|step| step.text.clone())
                .unwrap_or_default();
            stream::iter(vec![
                SessionStreamEvent::TextDelta { delta: text },
                SessionStreamEvent::SessionIdle,
            ])
            .boxed()
        }

        async fn reply_permission(
            &self,
            _request_id: &str,
            _reply: &str,
        ) -> Result<(), SessionTransportError> {
            Ok(())
        }

        async fn prompt_async(
            &self,
            _session_id: &str,
            _model: &ModelRef,
            text: &str,
        ) -> Result<(), SessionTransportError> {
            self.prompts_seen.lock().unwrap().push(text.to_string());
            if let Some(step) = self.steps.lock().unwrap().pop_front() {
                if let Some(effect) = step.effect {
                    effect();
                }
            }
            Ok(())
        }

        async fn dispose(&self, _session_id: &str) {}
    }

    fn model() -> ModelRef {
        ModelRef { provider_id: "anthropic".into(), model_id: "claude-sonnet-4-5".into() }
    }

    fn commit_file(dir: &Path, name: &str, contents: &str) {
        std::fs::write(dir.join(name), contents).unwrap();
        git(dir, &["add", "-A"]);
        git(dir, &["commit", "-m", "scripted commit"]);
    }

    fn collect_tags(bus: &Arc<EventBus>) -> Arc<StdMutex<Vec<String>>> {
        let tags = Arc::new(StdMutex::new(Vec::new()));
        let tags_for_closure = tags.clone();
        bus.subscribe_all(move |event| {
            tags_for_closure.lock().unwrap().push(event.kind.tag().to_string());
        });
        tags
    }

    fn base_request<'a>(
        repo: &Path,
        worktrees_dir: &Path,
        worker_client: &'a dyn AgentServerClient,
        boss_client: &'a dyn AgentServerClient,
        merge_lock: &'a MergeLock,
        publisher: &'a TaggedPublisher,
        max_iterations: u32,
    ) -> RunRequest<'a> {
        RunRequest {
            run_id: RunId::new(),
            repo_path: repo.to_path_buf(),
            worktrees_dir: worktrees_dir.to_path_buf(),
            prompt: "fix the bug".to_string(),
            worker_model: model(),
            boss_model: model(),
            log_dir: None,
            max_iterations,
            merge_retry_max: 3,
            resolver_max_iterations: 2,
            session_timeout: Duration::from_secs(5),
            worker_client,
            boss_client,
            merge_lock,
            publisher,
        }
    }

    #[tokio::test]
    async fn happy_path_completes_in_one_iteration_and_cleans_up() {
        let repo = init_git_repo();
        let worktrees_dir = repo.path().join(".worktrees");

        let boss = ScriptedClient::new(vec![Step::text("VERDICT: DONE")]);

        let bus = Arc::new(EventBus::new());
        let tags = collect_tags(&bus);
        let run_id = RunId::new();
        let publisher = TaggedPublisher::new(bus, run_id.clone());
        let merge_lock = MergeLock::new();

        let branch = foreman_proto::run::branch_name(&run_id);
        let worktree_path = worktrees_dir.join(foreman_proto::run::branch_to_dir_name(&branch));

        let worker = ScriptedClient::new(vec![Step::with_effect("ok", {
            let worktree_path = worktree_path.clone();
            move || {
                if worktree_path.exists() {
                    commit_file(&worktree_path, "feature.txt", "done\n");
                }
            }
        })]);

        let mut request = base_request(repo.path(), &worktrees_dir, &worker, &boss, &merge_lock, &publisher, 5);
        request.run_id = run_id;

        let outcome = run(request).await;

        assert_eq!(outcome.iterations, 1);
        assert!(outcome.done);
        assert!(!worktree_path.exists(), "worktree must be removed after a completed run");
        let branch_ref = Command::new("git")
            .args(["rev-parse", "--verify", &format!("refs/heads/{branch}")])
            .current_dir(repo.path())
            .output()
            .unwrap();
        assert!(!branch_ref.status.success(), "branch must be deleted after a completed run");

        let tags = tags.lock().unwrap();
        assert!(tags.contains(&"worktree.created".to_string()));
        assert!(tags.contains(&"loop.done".to_string()));
        assert!(tags.contains(&"worktree.merged".to_string()));
        assert!(tags.contains(&"ralph.completed".to_string()));
        assert!(tags.contains(&"worktree.removed".to_string()));
        assert_eq!(
            tags.iter().filter(|t| matches!(t.as_str(), "ralph.completed" | "ralph.error")).count(),
            1,
            "exactly one terminal event per run"
        );
    }

    #[tokio::test]
    async fn boss_feedback_carries_into_the_next_worker_prompt() {
        let repo = init_git_repo();
        let worktrees_dir = repo.path().join(".worktrees");
        let run_id = RunId::new();
        let branch = foreman_proto::run::branch_name(&run_id);
        let worktree_path = worktrees_dir.join(foreman_proto::run::branch_to_dir_name(&branch));

        let worker = ScriptedClient::new(vec![
            Step::with_effect("first pass", {
                let worktree_path = worktree_path.clone();
                move || {
                    if worktree_path.exists() {
                        commit_file(&worktree_path, "a.txt", "one\n");
                    }
                }
            }),
            Step::with_effect("second pass", {
                let worktree_path = worktree_path.clone();
                move || {
                    if worktree_path.exists() {
                        commit_file(&worktree_path, "b.txt", "two\n");
                    }
                }
            }),
        ]);
        let worker_prompts = worker.prompts_seen.clone();
        let boss = ScriptedClient::new(vec![
            Step::text("VERDICT: NOT DONE\nadd a test for the new file"),
            Step::text("VERDICT: DONE"),
        ]);

        let bus = Arc::new(EventBus::new());
        let tags = collect_tags(&bus);
        let publisher = TaggedPublisher::new(bus, run_id.clone());
        let merge_lock = MergeLock::new();

        let mut request = base_request(repo.path(), &worktrees_dir, &worker, &boss, &merge_lock, &publisher, 5);
        request.run_id = run_id;

        let outcome = run(request).await;

        assert_eq!(outcome.iterations, 2);
        assert!(outcome.done);

        let prompts = worker_prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(!prompts[0].contains("add a test for the new file"));
        assert!(prompts[1].contains("add a test for the new file"));

        let tags = tags.lock().unwrap();
        assert!(tags.contains(&"loop.not_done".to_string()));
    }

    #[tokio::test]
    async fn stops_after_max_iterations_without_attempting_a_merge() {
        let repo = init_git_repo();
        let worktrees_dir = repo.path().join(".worktrees");

        let worker = ScriptedClient::new(vec![Step::text("ok"), Step::text("ok"), Step::text("ok")]);
        let boss = ScriptedClient::new(vec![
            Step::text("VERDICT: NOT DONE\nkeep trying"),
            Step::text("VERDICT: NOT DONE\nkeep trying"),
            Step::text("VERDICT: NOT DONE\nkeep trying"),
        ]);

        let bus = Arc::new(EventBus::new());
        let tags = collect_tags(&bus);
        let run_id = RunId::new();
        let branch = foreman_proto::run::branch_name(&run_id);
        let worktree_path = worktrees_dir.join(foreman_proto::run::branch_to_dir_name(&branch));
        let publisher = TaggedPublisher::new(bus, run_id.clone());
        let merge_lock = MergeLock::new();

        let mut request = base_request(repo.path(), &worktrees_dir, &worker, &boss, &merge_lock, &publisher, 3);
        request.run_id = run_id;

        let outcome = run(request).await;

        assert_eq!(outcome.iterations, 3);
        assert!(!outcome.done);
        assert!(!worktree_path.exists(), "cleanup still runs when the loop never reaches done");

        let tags = tags.lock().unwrap();
        assert!(tags.contains(&"loop.max_iterations".to_string()));
        assert!(!tags.contains(&"worktree.merged".to_string()), "never merges when the loop bails out on max iterations");
        assert_eq!(
            tags.iter().filter(|t| matches!(t.as_str(), "ralph.completed" | "ralph.error")).count(),
            1
        );
    }

    #[tokio::test]
    async fn resolver_clears_a_merge_conflict_before_integrating() {
        let repo = init_git_repo();
        let worktrees_dir = repo.path().join(".worktrees");
        let run_id = RunId::new();
        let branch = foreman_proto::run::branch_name(&run_id);
        let worktree_path = worktrees_dir.join(foreman_proto::run::branch_to_dir_name(&branch));

        let repo_path_for_worker = repo.path().to_path_buf();
        let worker = ScriptedClient::new(vec![
            // Iteration 1: diverge both the worktree and main on the same
            // line of README.md, so integrating will conflict.
            Step::with_effect("ok", {
                let worktree_path = worktree_path.clone();
                let repo_path = repo_path_for_worker.clone();
                move || {
                    if worktree_path.exists() {
                        std::fs::write(worktree_path.join("README.md"), "worktree change\n").unwrap();
                        git(&worktree_path, &["add", "-A"]);
                        git(&worktree_path, &["commit", "-m", "worktree change"]);

                        std::fs::write(repo_path.join("README.md"), "main change\n").unwrap();
                        git(&repo_path, &["add", "-A"]);
                        git(&repo_path, &["commit", "-m", "main change"]);
                    }
                }
            }),
            // Resolver's worker attempt: resolve the conflict and commit.
            Step::with_effect("resolved", {
                let worktree_path = worktree_path.clone();
                move || {
                    std::fs::write(worktree_path.join("README.md"), "resolved\n").unwrap();
                    git(&worktree_path, &["add", "-A"]);
                    git(&worktree_path, &["commit", "--no-edit"]);
                }
            }),
        ]);
        let boss = ScriptedClient::new(vec![Step::text("VERDICT: DONE")]);

        let bus = Arc::new(EventBus::new());
        let tags = collect_tags(&bus);
        let publisher = TaggedPublisher::new(bus, run_id.clone());
        let merge_lock = MergeLock::new();

        let mut request = base_request(repo.path(), &worktrees_dir, &worker, &boss, &merge_lock, &publisher, 5);
        request.run_id = run_id;

        let outcome = run(request).await;

        assert!(outcome.done, "run must still complete once the resolver clears the conflict");
        assert!(!worktree_path.exists());

        let tags = tags.lock().unwrap();
        assert!(tags.contains(&"worktree.merge_conflict".to_string()));
        assert!(tags.contains(&"resolver.start".to_string()));
        assert!(tags.contains(&"resolver.complete".to_string()));
        assert!(tags.contains(&"worktree.merged".to_string()));
        assert_eq!(
            tags.iter().filter(|t| matches!(t.as_str(), "ralph.completed" | "ralph.error")).count(),
            1
        );
    }

    #[test]
    fn verify_clean_reports_true_for_a_repo_with_no_merge_in_progress() {
        let repo = init_git_repo();
        assert!(verify_clean(repo.path()));
    }

    /// An externally published `ralph.interrupted` (the same event
    /// `POST /runs/:runId/interrupt` publishes) must stop the loop before it
    /// starts a second iteration, and must not be followed by a second
    /// terminal event (spec.md §4.6 line 167, §5 line 220, §8 Scenario 5).
    #[tokio::test]
    async fn external_interrupt_stops_before_the_next_iteration() {
        let repo = init_git_repo();
        let worktrees_dir = repo.path().join(".worktrees");
        let run_id = RunId::new();

        let bus = Arc::new(EventBus::new());
        let tags = collect_tags(&bus);
        let publisher = TaggedPublisher::new(bus, run_id.clone());
        let merge_lock = MergeLock::new();

        // The worker's first step stands in for a concurrent actor (the
        // interrupt endpoint) publishing `ralph.interrupted` on the bus
        // while the first iteration is still in flight.
        let interrupt_publisher = publisher.clone();
        let worker = ScriptedClient::new(vec![
            Step::with_effect("ok", move || {
                interrupt_publisher.publish(EventKind::RalphInterrupted {
                    reason: foreman_proto::InterruptReason::UserStop,
                });
            }),
            Step::text("ok"),
            Step::text("ok"),
        ]);
        // The boss keeps saying NOT DONE on every iteration it's asked
        // about; without the interrupt this run would go on to iteration 2.
        let boss = ScriptedClient::new(vec![
            Step::text("VERDICT: NOT DONE\nkeep going"),
            Step::text("VERDICT: NOT DONE\nkeep going"),
            Step::text("VERDICT: NOT DONE\nkeep going"),
        ]);

        let mut request = base_request(repo.path(), &worktrees_dir, &worker, &boss, &merge_lock, &publisher, 5);
        request.run_id = run_id;

        let outcome = run(request).await;

        assert_eq!(outcome.iterations, 1, "no further iteration is initiated once the interrupt is observed");
        assert!(!outcome.done);

        let tags = tags.lock().unwrap();
        assert_eq!(
            tags.iter().filter(|t| t.as_str() == "loop.iteration.start").count(),
            1,
            "must not start a second iteration after the interrupt lands"
        );
        assert!(tags.contains(&"ralph.interrupted".to_string()));
        assert!(!tags.contains(&"ralph.completed".to_string()));
        assert!(!tags.contains(&"ralph.error".to_string()));
        assert_eq!(
            tags.iter()
                .filter(|t| matches!(t.as_str(), "ralph.completed" | "ralph.error" | "ralph.interrupted"))
                .count(),
            1,
            "exactly one terminal event, and it is the interrupt that was already published"
        );
    }
}
