//! The HTTP client for the agent-server contract Session Transport consumes
//! (spec.md §6: "Agent-server contract (consumed)"). The agent-server
//! binary itself is out of scope; this is only the narrow client surface
//! Session Transport drives it through.
//!
//! Stream events arrive as newline-delimited JSON over a chunked HTTP
//! response, the same framing the Job/Run Service's own `/events` endpoint
//! uses internally before SSE-wrapping (see [`crate`]'s `foreman-service`
//! sibling), read here with `reqwest`'s streaming body and `futures`' byte
//! stream combinators rather than introducing a second HTTP client stack.

use std::time::Duration;

use foreman_proto::ToolStatus;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;

use crate::session_transport::{
    AgentServerClient, ModelRef, SessionStreamEvent, SessionTransportError,
};

pub struct HttpAgentServerClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAgentServerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .expect("reqwest client builds with default TLS backend"),
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[derive(Deserialize)]
struct CreateSessionResponse {
    id: String,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum WireStreamEvent {
    #[serde(rename = "permission.asked")]
    PermissionAsked {
        #[serde(rename = "requestID")]
        request_id: String,
        permission: String,
        description: String,
    },
    #[serde(rename = "message.part.updated")]
    MessagePartUpdated { part: WirePart },
    #[serde(rename = "session.idle")]
    SessionIdle,
    #[serde(rename = "session.error")]
    SessionError { message: String },
}

#[derive(Deserialize)]
#[serde(tag = "subtype")]
enum WirePart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool")]
    Tool {
        tool: String,
        status: ToolStatus,
        detail: String,
        #[serde(default)]
        input: Option<serde_json::Value>,
        #[serde(default)]
        output: Option<serde_json::Value>,
        #[serde(default, rename = "durationSecs")]
        duration_secs: Option<f64>,
        #[serde(default)]
        metadata: Option<serde_json::Value>,
    },
}

fn into_session_event(wire: WireStreamEvent) -> SessionStreamEvent {
    match wire {
        WireStreamEvent::PermissionAsked {
            request_id,
            permission,
            description,
        } => SessionStreamEvent::PermissionAsked {
            request_id,
            permission,
            description,
        },
        WireStreamEvent::MessagePartUpdated { part } => match part {
            WirePart::Text { text } => SessionStreamEvent::TextDelta { delta: text },
            WirePart::Tool {
                tool,
                status,
                detail,
                input,
                output,
                duration_secs,
                metadata,
            } => SessionStreamEvent::ToolStatus {
                tool,
                status,
                detail,
                input,
                output,
                duration_secs,
                metadata,
            },
        },
        WireStreamEvent::SessionIdle => SessionStreamEvent::SessionIdle,
        WireStreamEvent::SessionError { message } => SessionStreamEvent::SessionError { message },
    }
}

/// Reassembles a stream of raw byte chunks into complete newline-delimited
/// lines, carrying any partial line forward into the next chunk instead of
/// parsing it prematurely.
fn ndjson_lines<B>(chunks: impl futures::Stream<Item = B> + Send + 'static) -> BoxStream<'static, Vec<u8>>
where
    B: AsRef<[u8]> + Send + 'static,
{
    futures::stream::unfold(
        (Box::pin(chunks), Vec::<u8>::new(), false),
        |(mut chunks, mut carry, mut finished)| async move {
            loop {
                if let Some(pos) = carry.iter().position(|b| *b == b'\n') {
                    let mut line = carry.drain(..=pos).collect::<Vec<u8>>();
                    line.pop();
                    return Some((line, (chunks, carry, finished)));
                }
                if finished {
                    if carry.is_empty() {
                        return None;
                    }
                    let line = std::mem::take(&mut carry);
                    return Some((line, (chunks, carry, finished)));
                }
                match chunks.next().await {
                    Some(bytes) => carry.extend_from_slice(bytes.as_ref()),
                    None => finished = true,
                }
            }
        },
    )
    .boxed()
}

#[async_trait::async_trait]
impl AgentServerClient for HttpAgentServerClient {
    async fn create_session(&self, title: &str) -> Result<String, SessionTransportError> {
        let resp = self
            .http
            .post(self.url("/session.create"))
            .json(&serde_json::json!({ "title": title }))
            .send()
            .await
            .map_err(|e| SessionTransportError::SessionError(e.to_string()))?;
        let body: CreateSessionResponse = resp
            .json()
            .await
            .map_err(|e| SessionTransportError::SessionError(e.to_string()))?;
        Ok(body.id)
    }

    fn subscribe(&self, session_id: &str) -> BoxStream<'static, SessionStreamEvent> {
        let http = self.http.clone();
        let url = self.url(&format!("/event.subscribe?sessionID={session_id}"));

        // Dispatch the GET from a spawned task right away rather than from a
        // lazy combinator, so the subscription is live on the wire as soon
        // as `subscribe` returns instead of only once the returned stream is
        // first polled (which, without this, would happen after the caller
        // has already awaited `prompt_async`, reversing the subscribe-then-
        // prompt ordering spec.md §4.2 requires).
        let (tx, rx) = futures::channel::mpsc::unbounded();
        tokio::spawn(async move {
            let resp = match http.get(url).send().await {
                Ok(resp) => resp,
                Err(_) => return,
            };
            let mut byte_chunks = resp.bytes_stream();
            while let Some(chunk) = byte_chunks.next().await {
                let Ok(chunk) = chunk else { break };
                if tx.unbounded_send(chunk).is_err() {
                    break;
                }
            }
        });

        // NDJSON lines can split across chunk boundaries, so the tail of
        // each chunk is held back until a newline completes it rather than
        // parsed as-is.
        ndjson_lines(rx)
            .filter_map(|line| async move {
                if line.is_empty() {
                    return None;
                }
                match serde_json::from_slice::<WireStreamEvent>(&line) {
                    Ok(wire) => Some(into_session_event(wire)),
                    Err(_) => None,
                }
            })
            .boxed()
    }

    async fn reply_permission(
        &self,
        request_id: &str,
        reply: &str,
    ) -> Result<(), SessionTransportError> {
        self.http
            .post(self.url("/permission.reply"))
            .json(&serde_json::json!({ "requestID": request_id, "reply": reply }))
            .send()
            .await
            .map_err(|e| SessionTransportError::SessionError(e.to_string()))?;
        Ok(())
    }

    async fn prompt_async(
        &self,
        session_id: &str,
        model: &ModelRef,
        text: &str,
    ) -> Result<(), SessionTransportError> {
        self.http
            .post(self.url("/session.promptAsync"))
            .json(&serde_json::json!({
                "sessionID": session_id,
                "model": { "providerID": model.provider_id, "modelID": model.model_id },
                "parts": [{ "type": "text", "text": text }],
            }))
            .send()
            .await
            .map_err(|e| SessionTransportError::SessionError(e.to_string()))?;
        Ok(())
    }

    async fn dispose(&self, session_id: &str) {
        let _ = self
            .http
            .post(self.url("/instance.dispose"))
            .json(&serde_json::json!({ "sessionID": session_id }))
            .send()
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_text_part_maps_to_text_delta() {
        let wire = WireStreamEvent::MessagePartUpdated {
            part: WirePart::Text {
                text: "hello".into(),
            },
        };
        match into_session_event(wire) {
            SessionStreamEvent::TextDelta { delta } => assert_eq!(delta, "hello"),
            _ => panic!("expected TextDelta"),
        }
    }

    #[test]
    fn wire_tool_part_maps_to_tool_status() {
        let wire = WireStreamEvent::MessagePartUpdated {
            part: WirePart::Tool {
                tool: "bash".into(),
                status: ToolStatus::Running,
                detail: "ls -la".into(),
                input: None,
                output: None,
                duration_secs: None,
                metadata: None,
            },
        };
        match into_session_event(wire) {
            SessionStreamEvent::ToolStatus { tool, status, .. } => {
                assert_eq!(tool, "bash");
                assert_eq!(status, ToolStatus::Running);
            }
            _ => panic!("expected ToolStatus"),
        }
    }
}
