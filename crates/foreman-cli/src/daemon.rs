//! Daemon Bootstrap (C8, spec.md §4.8): wires the Event Bus, Job/Run
//! Service, Worktree Manager, Agent Server Handles and Run Orchestrator
//! into one running process.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use foreman_core::bus::TaggedPublisher;
use foreman_core::http_agent_client::HttpAgentServerClient;
use foreman_core::orchestrator::{self, RunRequest};
use foreman_core::session_transport::ModelRef;
use foreman_core::{EventBus, ForemanConfig, MergeLock};
use foreman_proto::{EventKind, JobId, RunId, ServerRole};
use tokio::sync::OnceCell;
use tracing::{error, info};

fn model_ref(wire: &str) -> ModelRef {
    match wire.split_once('/') {
        Some((provider, model)) => ModelRef {
            provider_id: provider.to_string(),
            model_id: model.to_string(),
        },
        None => ModelRef {
            provider_id: "anthropic".to_string(),
            model_id: wire.to_string(),
        },
    }
}

/// Runs one worker/boss campaign end to end: acquires fresh worker/boss
/// Agent Server Handles scoped to this run, invokes the Run Orchestrator,
/// then tears the handles down (spec.md §4.8).
async fn spawn_run(
    config: Arc<ForemanConfig>,
    bus: Arc<EventBus>,
    merge_lock: Arc<MergeLock>,
    next_port: Arc<AtomicU16>,
    run_id: RunId,
    prompt: String,
) {
    let publisher = TaggedPublisher::new(bus, run_id.clone());
    publisher.publish(EventKind::RalphStarted {
        workspace: config.workspace.clone(),
        agent_model: config.worker_model.clone(),
        eval_model: config.boss_model.clone(),
    });

    let prefix = PathBuf::from(&config.prefix);
    let worker_port = next_port.fetch_add(1, Ordering::SeqCst);
    let boss_port = next_port.fetch_add(1, Ordering::SeqCst);

    let worker_handle = foreman_core::agent_server::acquire(
        &prefix,
        &format!("worker-{run_id}"),
        Path::new(&config.workspace),
        &config.agent_server_command,
        &[],
        worker_port,
    )
    .await;
    let boss_handle = foreman_core::agent_server::acquire(
        &prefix,
        &format!("boss-{run_id}"),
        Path::new(&config.workspace),
        &config.agent_server_command,
        &[],
        boss_port,
    )
    .await;

    let (mut worker_handle, mut boss_handle) = match (worker_handle, boss_handle) {
        (Ok(w), Ok(b)) => (w, b),
        (w, b) => {
            let failure = w
                .as_ref()
                .err()
                .map(ToString::to_string)
                .or_else(|| b.as_ref().err().map(ToString::to_string))
                .expect("one side failed to acquire");
            if let Ok(mut w) = w {
                w.kill().await;
            }
            if let Ok(mut b) = b {
                b.kill().await;
            }
            error!(%run_id, error = %failure, "failed to acquire agent server handles");
            publisher.publish(EventKind::RalphError { error: failure });
            return;
        }
    };
    publisher.publish(EventKind::ServerReady {
        role: ServerRole::Worker,
    });
    publisher.publish(EventKind::ServerReady {
        role: ServerRole::Boss,
    });

    let worker_client = HttpAgentServerClient::new(worker_handle.base_url());
    let boss_client = HttpAgentServerClient::new(boss_handle.base_url());

    let request = RunRequest {
        run_id: run_id.clone(),
        repo_path: PathBuf::from(&config.workspace),
        worktrees_dir: PathBuf::from(&config.worktrees_dir),
        prompt,
        worker_model: model_ref(&config.worker_model),
        boss_model: model_ref(&config.boss_model),
        log_dir: Some(prefix.join("logs")),
        max_iterations: config.max_iterations,
        merge_retry_max: config.merge_retry_max,
        resolver_max_iterations: config.resolver_max_iterations,
        session_timeout: Duration::from_secs(config.session_timeout_secs),
        worker_client: &worker_client,
        boss_client: &boss_client,
        merge_lock: &*merge_lock,
        publisher: &publisher,
    };

    let _outcome = orchestrator::run(request).await;

    publisher.publish(EventKind::ServerCleanup {
        role: ServerRole::Worker,
    });
    worker_handle.kill().await;
    publisher.publish(EventKind::ServerCleanup {
        role: ServerRole::Boss,
    });
    boss_handle.kill().await;
}

/// Parses flags, initializes directories, starts the Job/Run Service, wires
/// `onPrompt`, and blocks until `SIGTERM`/`SIGINT` or `/shutdown` fires
/// (spec.md §4.8).
pub async fn run(config: ForemanConfig) -> Result<()> {
    let prefix = PathBuf::from(&config.prefix);
    std::fs::create_dir_all(prefix.join("jobs")).context("creating jobs directory")?;
    std::fs::create_dir_all(prefix.join("runs")).context("creating runs directory")?;
    std::fs::create_dir_all(prefix.join("run")).context("creating pidfile directory")?;
    std::fs::create_dir_all(&config.worktrees_dir).context("creating worktrees directory")?;

    let config = Arc::new(config);
    let merge_lock = Arc::new(MergeLock::new());
    let next_port = Arc::new(AtomicU16::new(config.agent_server_base_port));

    let (exit_tx, mut exit_rx) = tokio::sync::watch::channel(false);
    let exit_tx_for_callback = exit_tx.clone();
    let on_exit: foreman_service::OnExit = Arc::new(move || {
        let _ = exit_tx_for_callback.send(true);
    });

    // `on_prompt` needs a handle to the bus `AppState::new` creates
    // internally, so the real closure is installed into this cell right
    // after construction; the dispatcher below defers to it. `/prompt`
    // cannot be reached before the HTTP listener is bound, which happens
    // after the cell is set.
    let real_on_prompt: Arc<OnceCell<foreman_service::OnPrompt>> = Arc::new(OnceCell::new());
    let dispatch_on_prompt: foreman_service::OnPrompt = {
        let real_on_prompt = real_on_prompt.clone();
        Arc::new(move |run_id: RunId, job_id: Option<JobId>, prompt: String| {
            let real_on_prompt = real_on_prompt.clone();
            tokio::spawn(async move {
                if let Some(f) = real_on_prompt.get() {
                    f(run_id, job_id, prompt);
                }
            });
        })
    };

    let state = foreman_service::AppState::new(&config.prefix, dispatch_on_prompt, on_exit);

    foreman_service::startup_repair(
        &state.jobs,
        Path::new(&config.workspace),
        Path::new(&config.worktrees_dir),
    )
    .context("startup repair")?;

    let bus = state.bus.clone();
    let config_for_runs = config.clone();
    let merge_lock_for_runs = merge_lock.clone();
    let next_port_for_runs = next_port.clone();
    let real_on_prompt_impl: foreman_service::OnPrompt = Arc::new(move |run_id, _job_id, prompt| {
        tokio::spawn(spawn_run(
            config_for_runs.clone(),
            bus.clone(),
            merge_lock_for_runs.clone(),
            next_port_for_runs.clone(),
            run_id,
            prompt,
        ));
    });
    if real_on_prompt.set(real_on_prompt_impl).is_err() {
        panic!("on_prompt cell set exactly once at startup");
    }

    let router = foreman_service::build_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("binding primary listener on port {}", config.port))?;
    info!(port = config.port, "foreman daemon listening");

    let secondary_listener = match config.secondary_port {
        Some(port) => Some(
            tokio::net::TcpListener::bind(("0.0.0.0", port))
                .await
                .with_context(|| format!("binding secondary listener on port {port}"))?,
        ),
        None => None,
    };

    let primary_router = router.clone();
    let primary = tokio::spawn(async move {
        axum::serve(listener, primary_router)
            .await
            .expect("primary HTTP listener failed");
    });
    let secondary = secondary_listener.map(|listener| {
        tokio::spawn(async move {
            axum::serve(listener, router)
                .await
                .expect("secondary HTTP listener failed");
        })
    });

    wait_for_shutdown(&mut exit_rx).await;

    primary.abort();
    if let Some(secondary) = secondary {
        secondary.abort();
    }

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown(exit_rx: &mut tokio::sync::watch::Receiver<bool>) {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down");
        }
        _ = exit_rx.changed() => {
            info!("exit callback fired (caffinate drain or /shutdown), shutting down");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(exit_rx: &mut tokio::sync::watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
        }
        _ = exit_rx.changed() => {
            info!("exit callback fired (caffinate drain or /shutdown), shutting down");
        }
    }
}
