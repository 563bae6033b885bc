//! `/events` SSE stream: live event fan-out with an optional `runId` filter,
//! 5-second keepalive comments, and auto-close on that run's terminal event
//! (spec.md §4.7, §6).

use std::time::Duration;

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use foreman_proto::{Event, RunId};
use futures::stream::{Stream, StreamExt};
use tokio::sync::broadcast;

/// Keepalive interval (spec.md §6: "keepalive `:\n\n` every 5 s").
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Turns a broadcast receiver into a plain event stream, silently skipping
/// over lag (a slow subscriber just misses the events it fell behind on;
/// the channel then resumes from where it picks back up) and ending the
/// stream once the channel closes.
fn broadcast_stream(receiver: broadcast::Receiver<Event>) -> impl Stream<Item = Event> {
    futures::stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => return Some((event, receiver)),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}

pub fn stream(
    receiver: broadcast::Receiver<Event>,
    run_filter: Option<RunId>,
) -> Sse<impl Stream<Item = Result<SseEvent, std::convert::Infallible>>> {
    let auto_close = run_filter.is_some();
    let filtered = broadcast_stream(receiver).filter(move |event| {
        let keep = match &run_filter {
            Some(run_id) => event.run_id.as_ref() == Some(run_id),
            None => true,
        };
        futures::future::ready(keep)
    });

    // Once the filtered run's terminal event is yielded, stop the stream
    // right after (the client observes connection close), matching
    // "auto-close when the filtered run emits a terminal event". Only
    // applies when a runId filter narrows the stream to one run — an
    // unfiltered stream multiplexes many runs and must not close just
    // because one of them finished.
    let stream: std::pin::Pin<Box<dyn Stream<Item = Event> + Send>> = if auto_close {
        Box::pin(stop_after_terminal(filtered))
    } else {
        Box::pin(filtered)
    };

    let stream = stream.map(|event| {
        let payload = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().data(payload))
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEPALIVE_INTERVAL).text(""))
}

fn stop_after_terminal(
    inner: impl Stream<Item = Event>,
) -> impl Stream<Item = Event> {
    let mut done = false;
    inner.take_while(move |event| {
        let keep = !done;
        if event.is_terminal() {
            done = true;
        }
        futures::future::ready(keep)
    })
}
