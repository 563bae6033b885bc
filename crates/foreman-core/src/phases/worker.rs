//! Worker phase: edits files and commits, reporting its transcript and the
//! resulting commit hash (spec.md §4.5).

use std::path::{Path, PathBuf};
use std::time::Duration;

use foreman_proto::{EventKind, Phase};

use crate::bus::TaggedPublisher;
use crate::git_ops;
use crate::session_transport::{
    run_session, AgentServerClient, ModelRef, SessionRequest, SessionTransportError,
};

pub struct WorkerOutcome {
    pub transcript: String,
    pub commit_hash: String,
}

/// Builds the worker-phase prompt (base task, plus a feedback block carried
/// over from the previous boss iteration if present), runs a Session
/// Transport session with `phase=executor`, and reports the resulting HEAD
/// commit hash.
pub async fn run_worker(
    client: &dyn AgentServerClient,
    repo_path: &Path,
    prompt: &str,
    previous_feedback: Option<&str>,
    model: ModelRef,
    log_path: Option<PathBuf>,
    timeout: Duration,
    publisher: &TaggedPublisher,
) -> Result<WorkerOutcome, SessionTransportError> {
    let commit_hash_before = git_ops::get_head_short_sha(repo_path).unwrap_or_default();
    publisher.publish(EventKind::WorkerStart {
        commit_hash: commit_hash_before,
    });

    let full_prompt = match previous_feedback {
        Some(feedback) => format!(
            "{prompt}\n\n---\nFeedback from the previous review:\n{feedback}"
        ),
        None => prompt.to_string(),
    };

    let outcome = run_session(
        client,
        SessionRequest {
            prompt: &full_prompt,
            title: "worker phase",
            model,
            phase: Phase::Executor,
            log_path: log_path.clone(),
            timeout,
        },
        publisher,
    )
    .await?;

    let commit_hash = git_ops::get_head_short_sha(repo_path).unwrap_or_default();
    publisher.publish(EventKind::WorkerComplete {
        commit_hash: commit_hash.clone(),
        log_path: log_path.and_then(|p| p.to_str().map(str::to_string)),
    });

    Ok(WorkerOutcome {
        transcript: outcome.output,
        commit_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::session_transport::SessionStreamEvent;
    use foreman_proto::RunId;
    use futures::stream::{self, BoxStream, StreamExt};
    use std::process::Command;
    use std::sync::{Arc, Mutex as StdMutex};
    use tempfile::TempDir;

    fn init_git_repo() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let repo = tmp.path();
        for args in [
            vec!["init", "--initial-branch=main"],
            vec!["config", "user.email", "test@example.com"],
            vec!["config", "user.name", "Test"],
        ] {
            Command::new("git").args(&args).current_dir(repo).output().unwrap();
        }
        std::fs::write(repo.join("README.md"), "hello\n").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(repo).output().unwrap();
        Command::new("git").args(["commit", "-m", "initial"]).current_dir(repo).output().unwrap();
        tmp
    }

    struct ScriptedClient {
        prompts_seen: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl AgentServerClient for ScriptedClient {
        async fn create_session(&self, _title: &str) -> Result<String, SessionTransportError> {
            Ok("sess".to_string())
        }

        fn subscribe(&self, _session_id: &str) -> BoxStream<'static, SessionStreamEvent> {
            stream::iter(vec![
                SessionStreamEvent::TextDelta { delta: "edited the file".into() },
                SessionStreamEvent::SessionIdle,
            ])
            .boxed()
        }

        async fn reply_permission(&self, _id: &str, _reply: &str) -> Result<(), SessionTransportError> {
            Ok(())
        }

        async fn prompt_async(
            &self,
            _session_id: &str,
            _model: &ModelRef,
            text: &str,
        ) -> Result<(), SessionTransportError> {
            self.prompts_seen.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn dispose(&self, _session_id: &str) {}
    }

    fn model() -> ModelRef {
        ModelRef { provider_id: "anthropic".into(), model_id: "claude-sonnet-4-5".into() }
    }

    fn publisher() -> TaggedPublisher {
        TaggedPublisher::new(Arc::new(EventBus::new()), RunId::from("abcdefgh1234"))
    }

    #[tokio::test]
    async fn no_feedback_block_on_the_first_iteration() {
        let repo = init_git_repo();
        let prompts = Arc::new(StdMutex::new(Vec::new()));
        let client = ScriptedClient { prompts_seen: prompts.clone() };
        let publisher = publisher();

        let outcome = run_worker(
            &client,
            repo.path(),
            "fix the bug",
            None,
            model(),
            None,
            Duration::from_secs(5),
            &publisher,
        )
        .await
        .unwrap();

        assert_eq!(outcome.transcript, "edited the file");
        assert_eq!(prompts.lock().unwrap()[0], "fix the bug");
    }

    #[tokio::test]
    async fn previous_feedback_is_appended_to_the_base_prompt() {
        let repo = init_git_repo();
        let prompts = Arc::new(StdMutex::new(Vec::new()));
        let client = ScriptedClient { prompts_seen: prompts.clone() };
        let publisher = publisher();

        run_worker(
            &client,
            repo.path(),
            "fix the bug",
            Some("tests are still failing"),
            model(),
            None,
            Duration::from_secs(5),
            &publisher,
        )
        .await
        .unwrap();

        let sent = prompts.lock().unwrap()[0].clone();
        assert!(sent.starts_with("fix the bug"));
        assert!(sent.contains("tests are still failing"));
    }

    #[tokio::test]
    async fn reports_head_short_sha_as_the_commit_hash() {
        let repo = init_git_repo();
        let client = ScriptedClient { prompts_seen: Arc::new(StdMutex::new(Vec::new())) };
        let publisher = publisher();

        let expected = git_ops::get_head_short_sha(repo.path()).unwrap();
        let outcome = run_worker(
            &client,
            repo.path(),
            "fix the bug",
            None,
            model(),
            None,
            Duration::from_secs(5),
            &publisher,
        )
        .await
        .unwrap();

        assert_eq!(outcome.commit_hash, expected);
    }
}
