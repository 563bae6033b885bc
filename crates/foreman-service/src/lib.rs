//! Job/Run Service (C7): a single-binary HTTP + SSE server exposing job
//! CRUD, run submission, event streaming, replay, interruption, and a
//! caffeinated-shutdown protocol (spec.md §4.7).

pub mod persistence;
pub mod routes;
pub mod sse;
pub mod subscriber;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use foreman_core::EventBus;
use foreman_proto::{JobId, RunId};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use persistence::{JobStore, RunEventStore};
use subscriber::RunJobMap;

/// Callback wired by the daemon bootstrap (C8): given a freshly minted run
/// id, optional owning job id, and prompt text, spawns the Run Orchestrator
/// asynchronously. Must not block the calling HTTP handler.
pub type OnPrompt = Arc<dyn Fn(RunId, Option<JobId>, String) + Send + Sync>;

/// Invoked once, either immediately (`/caffinate` called with no runs in
/// flight) or after the in-flight run set drains to empty, and again (after
/// a short deferral) by `/shutdown`. Typically calls `std::process::exit`.
pub type OnExit = Arc<dyn Fn() + Send + Sync>;

struct CaffeinateState {
    armed: AtomicBool,
    fired: AtomicBool,
}

pub struct AppState {
    pub prefix: PathBuf,
    pub bus: Arc<EventBus>,
    pub jobs: Arc<JobStore>,
    pub events: Arc<RunEventStore>,
    pub run_job_map: Arc<RunJobMap>,
    pub live: Arc<broadcast::Sender<foreman_proto::Event>>,
    pub on_prompt: OnPrompt,
    on_exit: OnExit,
    active_runs: Mutex<HashSet<RunId>>,
    caffeinate: CaffeinateState,
}

impl AppState {
    pub fn new(prefix: impl Into<PathBuf>, on_prompt: OnPrompt, on_exit: OnExit) -> Arc<Self> {
        let prefix = prefix.into();
        let bus = Arc::new(EventBus::new());
        let jobs = Arc::new(JobStore::new(&prefix));
        let events = Arc::new(RunEventStore::new(&prefix));
        let run_job_map = Arc::new(RunJobMap::new());
        let (live_tx, _) = broadcast::channel(1024);
        let live = Arc::new(live_tx);

        subscriber::install(&bus, events.clone(), jobs.clone(), run_job_map.clone());

        let live_for_forward = live.clone();
        bus.subscribe_all(move |event| {
            let _ = live_for_forward.send(event.clone());
        });

        let state = Arc::new(Self {
            prefix,
            bus,
            jobs,
            events,
            run_job_map,
            live,
            on_prompt,
            on_exit,
            active_runs: Mutex::new(HashSet::new()),
            caffeinate: CaffeinateState {
                armed: AtomicBool::new(false),
                fired: AtomicBool::new(false),
            },
        });

        let watcher_state = state.clone();
        state.bus.subscribe_all(move |event| {
            let Some(run_id) = event.run_id.clone() else {
                return;
            };
            if !event.is_terminal() {
                return;
            }
            watcher_state.untrack_active_run(&run_id);
        });

        state
    }

    pub fn track_active_run(&self, run_id: RunId) {
        self.active_runs.lock().expect("active runs mutex poisoned").insert(run_id);
    }

    fn untrack_active_run(&self, run_id: &RunId) {
        self.active_runs.lock().expect("active runs mutex poisoned").remove(run_id);
        self.maybe_fire_caffeinate_exit();
    }

    fn active_run_count(&self) -> usize {
        self.active_runs.lock().expect("active runs mutex poisoned").len()
    }

    /// Enters the "caffinated" state: fires `on_exit` immediately if no jobs
    /// are running, otherwise arms the exit to fire once the in-flight run
    /// set drains to empty (spec.md §4.7, `POST /caffinate`).
    pub fn enter_caffeinated(&self) {
        self.caffeinate.armed.store(true, Ordering::SeqCst);
        self.maybe_fire_caffeinate_exit();
    }

    fn maybe_fire_caffeinate_exit(&self) {
        if !self.caffeinate.armed.load(Ordering::SeqCst) {
            return;
        }
        if self.active_run_count() > 0 {
            return;
        }
        if self
            .caffeinate
            .fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!("caffeinated run set drained; invoking exit callback");
            (self.on_exit)();
        }
    }

    /// `POST /shutdown`: respond 200 first, then after a short deferral
    /// invoke process exit (spec.md §4.7).
    pub fn schedule_shutdown(&self) {
        let on_exit = self.on_exit.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            on_exit();
        });
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/jobs", get(routes::list_jobs).post(routes::create_job))
        .route(
            "/jobs/{id}",
            get(routes::get_job).put(routes::update_job).delete(routes::delete_job),
        )
        .route("/prompt", post(routes::prompt))
        .route("/runs/status", post(routes::runs_status))
        .route("/runs/{runId}/interrupt", post(routes::interrupt_run))
        .route("/runs/{runId}/events", get(routes::run_events))
        .route("/events", get(routes::events_sse))
        .route("/caffinate", post(routes::caffinate))
        .route("/shutdown", post(routes::shutdown))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Startup repair (spec.md §4.7): for every job on disk whose status is
/// `running`, rewrite it to `interrupted` (its prior process died without
/// emitting a terminal event), then prune any stale worktrees left behind.
pub fn startup_repair(
    jobs: &JobStore,
    repo_path: &Path,
    worktrees_dir: &Path,
) -> Result<(), persistence::PersistenceError> {
    for mut job in jobs.list()? {
        if job.status == foreman_proto::JobStatus::Running {
            job.status = foreman_proto::JobStatus::Interrupted;
            jobs.save(&job)?;
        }
    }
    if let Err(err) = foreman_core::worktree::prune_stale_worktrees(repo_path, worktrees_dir) {
        tracing::warn!(%err, "failed to prune stale worktrees during startup repair");
    }
    Ok(())
}
