//! Session Transport (C2): drives one agent session against an external
//! agent server and normalizes its stream into bus events.
//!
//! The event-consumption loop and the prompt submission run concurrently
//! (the prompt is submitted only after subscribing, so no early events are
//! lost); they coordinate only through the stream itself, matching the
//! "no locks; the subscription is the only mutator of local state" rule in
//! spec.md §4.2.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use foreman_proto::{EventKind, Phase, ToolStatus};
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::bus::TaggedPublisher;

#[derive(Debug, Clone)]
pub struct ModelRef {
    pub provider_id: String,
    pub model_id: String,
}

impl ModelRef {
    pub fn as_wire(&self) -> String {
        format!("{}/{}", self.provider_id, self.model_id)
    }
}

/// A stream event as delivered by the external agent server's subscription
/// (spec.md §6, "Stream events consumed").
#[derive(Debug, Clone)]
pub enum SessionStreamEvent {
    PermissionAsked {
        request_id: String,
        permission: String,
        description: String,
    },
    TextDelta {
        delta: String,
    },
    ToolStatus {
        tool: String,
        status: ToolStatus,
        detail: String,
        input: Option<serde_json::Value>,
        output: Option<serde_json::Value>,
        duration_secs: Option<f64>,
        metadata: Option<serde_json::Value>,
    },
    SessionIdle,
    SessionError {
        message: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SessionTransportError {
    #[error("agent server refused to create session: {0}")]
    CreateFailed(String),
    #[error("session error: {0}")]
    SessionError(String),
    #[error("session timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The client contract consumed from the external agent server (spec.md §6,
/// "Agent-server contract (consumed)"). Abstracted behind a trait so
/// Session Transport can be tested without a live agent-server process; the
/// production implementation lives in [`crate::agent_server`]'s HTTP client.
#[async_trait::async_trait]
pub trait AgentServerClient: Send + Sync {
    async fn create_session(&self, title: &str) -> Result<String, SessionTransportError>;
    fn subscribe(&self, session_id: &str) -> BoxStream<'static, SessionStreamEvent>;
    async fn reply_permission(
        &self,
        request_id: &str,
        reply: &str,
    ) -> Result<(), SessionTransportError>;
    async fn prompt_async(
        &self,
        session_id: &str,
        model: &ModelRef,
        text: &str,
    ) -> Result<(), SessionTransportError>;
    async fn dispose(&self, session_id: &str);
}

pub struct SessionRequest<'a> {
    pub prompt: &'a str,
    pub title: &'a str,
    pub model: ModelRef,
    pub phase: Phase,
    pub log_path: Option<PathBuf>,
    pub timeout: Duration,
}

pub struct SessionOutcome {
    pub session_id: String,
    pub output: String,
}

/// Default Session Transport timeout (spec.md §4.2).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

pub async fn run_session(
    client: &dyn AgentServerClient,
    request: SessionRequest<'_>,
    publisher: &TaggedPublisher,
) -> Result<SessionOutcome, SessionTransportError> {
    let session_id = client
        .create_session(request.title)
        .await
        .map_err(|e| SessionTransportError::CreateFailed(e.to_string()))?;

    let mut stream = client.subscribe(&session_id);
    let mut log_file = match &request.log_path {
        Some(path) => Some(
            tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?,
        ),
        None => None,
    };

    // Submit the prompt only after subscribing, so no early events are lost.
    client
        .prompt_async(&session_id, &request.model, request.prompt)
        .await?;

    let mut output = String::new();
    let mut tool_started: HashMap<String, Instant> = HashMap::new();

    let consume = async {
        while let Some(event) = stream.next().await {
            match event {
                SessionStreamEvent::PermissionAsked {
                    request_id,
                    permission,
                    description,
                } => {
                    if let Err(err) = client.reply_permission(&request_id, "once").await {
                        warn!(%err, "failed to auto-approve permission request");
                    }
                    publisher.publish(EventKind::SessionPermission {
                        phase: request.phase,
                        permission,
                        description,
                    });
                }
                SessionStreamEvent::TextDelta { delta } => {
                    output.push_str(&delta);
                    if let Some(file) = log_file.as_mut() {
                        let _ = file.write_all(delta.as_bytes()).await;
                        let _ = file.flush().await;
                    }
                    publisher.publish(EventKind::SessionTextDelta {
                        phase: request.phase,
                        delta,
                    });
                }
                SessionStreamEvent::ToolStatus {
                    tool,
                    status,
                    detail,
                    input,
                    output: tool_output,
                    duration_secs,
                    metadata,
                } => {
                    let duration_secs = duration_secs.or_else(|| match status {
                        ToolStatus::Running => {
                            tool_started.insert(tool.clone(), Instant::now());
                            None
                        }
                        _ => tool_started.remove(&tool).map(|start| start.elapsed().as_secs_f64()),
                    });
                    if let Some(file) = log_file.as_mut() {
                        let line = format!("[tool:{tool}] {status:?} {detail}\n");
                        let _ = file.write_all(line.as_bytes()).await;
                        let _ = file.flush().await;
                    }
                    publisher.publish(EventKind::SessionToolStatus {
                        phase: request.phase,
                        tool,
                        status,
                        detail,
                        input,
                        output: tool_output,
                        duration_secs,
                        metadata,
                    });
                }
                SessionStreamEvent::SessionIdle => return Ok(()),
                SessionStreamEvent::SessionError { message } => {
                    return Err(SessionTransportError::SessionError(message));
                }
            }
        }
        Ok(())
    };

    let result = tokio::time::timeout(request.timeout, consume).await;
    client.dispose(&session_id).await;

    match result {
        Ok(Ok(())) => Ok(SessionOutcome { session_id, output }),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(SessionTransportError::Timeout(request.timeout)),
    }
}
