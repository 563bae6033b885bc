//! The persistence subscriber (spec.md §4.7): a single bus subscriber that
//! appends every `runId`-carrying event to its JSONL log and keeps job
//! status in sync with the terminal event of its latest run.

use std::collections::HashMap;
use std::sync::Mutex;

use foreman_core::EventBus;
use foreman_proto::{Event, JobId, RunId, TerminalEventType};
use tracing::warn;

use crate::persistence::{JobStore, RunEventStore};

/// Maps an in-flight run back to the job that submitted it, so a terminal
/// event can be translated into a job-status rewrite. Entries are removed
/// once the terminal event is processed.
pub struct RunJobMap {
    inner: Mutex<HashMap<RunId, JobId>>,
}

impl RunJobMap {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, run_id: RunId, job_id: JobId) {
        self.inner.lock().expect("run/job map poisoned").insert(run_id, job_id);
    }

    fn take(&self, run_id: &RunId) -> Option<JobId> {
        self.inner.lock().expect("run/job map poisoned").remove(run_id)
    }
}

impl Default for RunJobMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Registers the persistence subscriber on `bus`. Call once at startup.
pub fn install(
    bus: &EventBus,
    events: std::sync::Arc<RunEventStore>,
    jobs: std::sync::Arc<JobStore>,
    run_job_map: std::sync::Arc<RunJobMap>,
) {
    bus.subscribe_all(move |event: &Event| {
        let Some(run_id) = event.run_id.clone() else {
            return;
        };

        if let Err(err) = events.append(&run_id, event) {
            warn!(%run_id, %err, "failed to persist event");
        }

        if !event.is_terminal() {
            return;
        }

        let Some(job_id) = run_job_map.take(&run_id) else {
            return;
        };

        let terminal = match event.tag() {
            "ralph.completed" => TerminalEventType::Completed,
            "ralph.error" => TerminalEventType::Error,
            "ralph.interrupted" => TerminalEventType::Interrupted,
            other => {
                warn!(tag = other, "unexpected terminal tag");
                return;
            }
        };

        match jobs.get(&job_id) {
            Ok(mut job) => {
                job.status = terminal.as_job_status();
                if let Err(err) = jobs.save(&job) {
                    warn!(%job_id, %err, "failed to persist job after terminal event");
                }
            }
            Err(err) => warn!(%job_id, %err, "job for terminated run no longer exists"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_core::EventBus;
    use foreman_proto::{EventKind, Job};
    use tempfile::TempDir;

    #[test]
    fn terminal_event_rewrites_job_status_and_clears_mapping() {
        let tmp = TempDir::new().unwrap();
        let jobs = std::sync::Arc::new(JobStore::new(tmp.path()));
        let events = std::sync::Arc::new(RunEventStore::new(tmp.path()));
        let run_job_map = std::sync::Arc::new(RunJobMap::new());

        let mut job = Job::new("do it", 0);
        let run_id = RunId::new();
        job.record_run(run_id.clone());
        jobs.save(&job).unwrap();
        run_job_map.insert(run_id.clone(), job.id.clone());

        let bus = EventBus::new();
        install(&bus, events.clone(), jobs.clone(), run_job_map.clone());

        bus.publish(
            Event::new(
                EventKind::RalphCompleted {
                    iterations: 1,
                    done: true,
                },
                0,
            )
            .with_run_id(run_id.clone()),
        );

        let reloaded = jobs.get(&job.id).unwrap();
        assert_eq!(reloaded.status, foreman_proto::JobStatus::Completed);
        assert!(run_job_map.take(&run_id).is_none());

        let persisted = events.read_all(&run_id).unwrap();
        assert_eq!(persisted.len(), 1);
    }

    #[test]
    fn broadcast_only_events_are_not_persisted() {
        let tmp = TempDir::new().unwrap();
        let jobs = std::sync::Arc::new(JobStore::new(tmp.path()));
        let events = std::sync::Arc::new(RunEventStore::new(tmp.path()));
        let run_job_map = std::sync::Arc::new(RunJobMap::new());

        let bus = EventBus::new();
        install(&bus, events, jobs, run_job_map);

        bus.publish(Event::new(EventKind::LoopDone, 0));
        // No run_id -> nothing should be written; just assert no panic occurred.
    }
}
