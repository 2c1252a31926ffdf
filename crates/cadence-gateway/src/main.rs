use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cadence_broker::TokenBroker;
use cadence_core::{config::CadenceConfig, Clock, SystemClock};
use cadence_executor::ScriptRunner;
use cadence_scheduler::{Dispatcher, JobRegistry, SchedulerEngine};
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

mod app;
mod error;
mod http;

/// Cron job daemon with a task token broker and a JSON control API.
#[derive(Debug, Parser)]
#[command(name = "cadence-gateway", version)]
struct Cli {
    /// Path to cadence.toml. Falls back to $CADENCE_CONFIG, then ~/.cadence/cadence.toml.
    #[arg(short, long, env = "CADENCE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cadence_gateway=info,cadence_scheduler=info,cadence_broker=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    // load config: --config > CADENCE_CONFIG env > ~/.cadence/cadence.toml
    let cli = Cli::parse();
    let config_path = cli.config.as_ref().map(|p| p.to_string_lossy().into_owned());
    let config = CadenceConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        CadenceConfig::default()
    });

    let bind = config.server.bind.clone();
    let port = config.server.port;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // scheduler: registry + dispatcher + completion loop + polling engine
    let registry = Arc::new(JobRegistry::from_config(&config));
    let runner = Arc::new(ScriptRunner::from_config(&config.scheduler));
    info!(
        script_dir = %config.scheduler.script_dir,
        shell = %config.scheduler.shell,
        "script runner ready"
    );
    let (dispatcher, completion) =
        Dispatcher::new(Arc::clone(&registry), runner, Arc::clone(&clock));
    let engine = SchedulerEngine::new(
        registry,
        dispatcher,
        Arc::clone(&clock),
        Duration::from_millis(config.scheduler.poll_interval_ms.max(1)),
    );

    let broker = Arc::new(TokenBroker::new(&config.broker, Arc::clone(&clock)));
    if !broker.is_enabled() {
        info!("token broker disabled by configuration");
    }

    let state = Arc::new(app::AppState::new(engine.handle(), Arc::clone(&broker)));
    let router = app::build_router(state);

    // background tasks share one shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(completion.run());
    tokio::spawn(engine.run(shutdown_rx.clone()));
    if broker.is_enabled() {
        tokio::spawn(Arc::clone(&broker).run_sweeper(shutdown_rx));
    }

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Cadence gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // signal scheduler and sweeper to stop; in-flight runs are left to finish
    let _ = shutdown_tx.send(true);
    info!("Cadence gateway stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
