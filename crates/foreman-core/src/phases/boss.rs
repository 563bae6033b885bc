//! Boss phase: judges whether the worker's work is done, by searching its
//! transcript for the literal line `VERDICT: DONE` (spec.md §4.5).

use std::path::PathBuf;
use std::time::Duration;

use foreman_proto::{EventKind, Phase};

use super::boss_done;
use crate::bus::TaggedPublisher;
use crate::session_transport::{
    run_session, AgentServerClient, ModelRef, SessionRequest, SessionTransportError,
};

/// A fixed grading rubric appended to the base task, matching spec.md's
/// "the base task appended to a fixed grading rubric".
const GRADING_RUBRIC: &str = "\n\n---\nReview the work done above against the task description. \
Check out the diff, run any tests, and verify the requirements are fully met. \
Reply with the single literal line `VERDICT: DONE` if and only if the task is complete. \
Otherwise reply `VERDICT: NOT DONE` followed by specific, actionable feedback.";

pub struct BossOutcome {
    pub transcript: String,
    pub done: bool,
}

pub async fn run_boss(
    client: &dyn AgentServerClient,
    prompt: &str,
    commit_hash: &str,
    model: ModelRef,
    log_path: Option<PathBuf>,
    timeout: Duration,
    publisher: &TaggedPublisher,
) -> Result<BossOutcome, SessionTransportError> {
    publisher.publish(EventKind::BossStart {
        commit_hash: commit_hash.to_string(),
    });

    let full_prompt = format!("{prompt}{GRADING_RUBRIC}");

    let outcome = run_session(
        client,
        SessionRequest {
            prompt: &full_prompt,
            title: "boss phase",
            model,
            phase: Phase::Validator,
            log_path: log_path.clone(),
            timeout,
        },
        publisher,
    )
    .await?;

    let done = boss_done(&outcome.output);
    publisher.publish(EventKind::BossComplete {
        commit_hash: commit_hash.to_string(),
        done,
        log_path: log_path.and_then(|p| p.to_str().map(str::to_string)),
    });

    Ok(BossOutcome {
        transcript: outcome.output,
        done,
    })
}
