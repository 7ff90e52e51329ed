use std::sync::Arc;
use std::time::{Duration, Instant};

use dispatchflow::api::{self, ApiState};
use dispatchflow::config::{BackendKind, Config};
use dispatchflow::jobs::registry::HandlerRegistry;
use dispatchflow::jobs::runner::JobRunner;
use dispatchflow::jobs::submission::SubmissionGate;
use dispatchflow::{telemetry, Backend};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

mod handlers;

const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env()?;
    telemetry::init(cfg.log_format);

    if cfg.backend == BackendKind::Redis && !cfg!(feature = "redis") {
        anyhow::bail!(
            "redis backend requested but the worker was built without the `redis` feature"
        );
    }

    info!(
        worker_id = %cfg.worker_id,
        backend = ?cfg.backend,
        loops = cfg.worker_loops,
        poll_interval_ms = cfg.poll_interval_ms,
        backoff_unit_ms = cfg.backoff_unit_ms,
        api = %cfg.api_addr.as_deref().unwrap_or("disabled"),
        "dispatchflow worker starting"
    );

    let backend = tokio::select! {
        backend = connect(&cfg) => backend,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested before the backend came up");
            return Ok(());
        }
    };

    let registry = handlers::build_registry(cfg.email_failure_rate);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();

    for n in 0..cfg.worker_loops {
        tasks.spawn(supervise(
            cfg.clone(),
            backend.clone(),
            Arc::clone(&registry),
            n,
            shutdown_rx.clone(),
        ));
    }

    if let Some(addr) = cfg.api_addr.clone() {
        let state = ApiState {
            gate: SubmissionGate::new(&backend, cfg.gate_config()),
        };
        tasks.spawn(serve_api(addr, state, shutdown_rx.clone()));
    }

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("ctrl-c received, shutting down");
        }
        Some(joined) = tasks.join_next() => {
            joined??;
            warn!("a worker task exited before shutdown was requested");
        }
    }

    let _ = shutdown_tx.send(true);
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "task failed during shutdown"),
            Err(e) => error!(error = %e, "task panicked during shutdown"),
        }
    }

    info!("dispatchflow worker stopped");
    Ok(())
}

/// Build the backend, retrying with a doubling delay until it answers.
async fn connect(cfg: &Config) -> Backend {
    let mut delay = Duration::from_millis(cfg.reconnect_delay_ms);
    loop {
        match Backend::from_config(cfg).await {
            Ok(backend) => return backend,
            Err(e) => {
                warn!(
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "backend unavailable, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_RECONNECT_DELAY);
            }
        }
    }
}

/// Keep one worker loop alive. Any store error tears the loop down and
/// restarts it after a doubling delay; an unreachable store also gets a
/// fresh backend.
async fn supervise(
    cfg: Config,
    mut backend: Backend,
    registry: Arc<HandlerRegistry>,
    n: usize,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let base = Duration::from_millis(cfg.reconnect_delay_ms);
    let mut delay = base;

    loop {
        let runner = JobRunner::new(&backend, Arc::clone(&registry), cfg.worker_config(n));
        let started = Instant::now();

        let err = match runner.run(shutdown.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        if started.elapsed() >= MAX_RECONNECT_DELAY {
            delay = base;
        }
        if err.is_unavailable() {
            warn!(
                worker_id = %runner.worker_id(),
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "store unavailable, reconnecting"
            );
        } else {
            error!(
                worker_id = %runner.worker_id(),
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "worker loop failed, restarting"
            );
        }

        if wait_or_shutdown(delay, &mut shutdown).await {
            return Ok(());
        }
        delay = (delay * 2).min(MAX_RECONNECT_DELAY);

        if err.is_unavailable() {
            match Backend::from_config(&cfg).await {
                Ok(fresh) => backend = fresh,
                Err(e) => warn!(worker_id = %runner.worker_id(), error = %e, "reconnect failed"),
            }
        }
    }
}

/// Sleep for `delay`; true when shutdown was requested meanwhile.
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

async fn serve_api(
    addr: String,
    state: ApiState,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "api listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;
    Ok(())
}
