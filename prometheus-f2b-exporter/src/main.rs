//! Prometheus exporter for Fail2ban.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use prometheus_f2b_exporter::exit::{StartupError, codes, exit_code};
use prometheus_f2b_exporter::logging::init_tracing;
use prometheus_f2b_exporter::{
    ExporterConfig, Fail2banClient, HttpServer, JailClient, JailFilter, PollScheduler, Renderer,
    SnapshotBuilder, SnapshotStore,
};

/// Prometheus exporter for Fail2ban.
#[derive(Parser, Debug)]
#[command(name = "prometheus-f2b-exporter")]
#[command(about = "Export Fail2ban jail state as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long, env = "F2B_EXPORTER_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP listen address (overrides config).
    #[arg(long, env = "F2B_EXPORTER_LISTEN")]
    listen: Option<String>,

    /// Poll interval in seconds (overrides config).
    #[arg(long, env = "F2B_EXPORTER_INTERVAL")]
    interval: Option<u64>,

    /// Timeout for each Fail2ban query in milliseconds (overrides config).
    #[arg(long, env = "F2B_EXPORTER_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Fail2ban control socket (overrides config).
    #[arg(long, env = "F2B_EXPORTER_SOCKET")]
    socket: Option<String>,

    /// Path to the fail2ban-client executable (overrides config).
    #[arg(long, env = "F2B_EXPORTER_CLIENT")]
    client: Option<String>,

    /// Exit if Fail2ban is unreachable at startup.
    #[arg(long, env = "F2B_EXPORTER_FAIL_FAST")]
    fail_fast: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    /// Load the config file (or defaults) and apply CLI overrides.
    fn resolve_config(&self) -> Result<ExporterConfig, StartupError> {
        let mut config = match &self.config {
            Some(path) => ExporterConfig::load_from_file(path)?,
            None => ExporterConfig::default(),
        };

        if let Some(listen) = &self.listen {
            config.prometheus.listen = listen.clone();
        }
        if let Some(interval) = self.interval {
            config.fail2ban.poll_interval_secs = interval;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.fail2ban.timeout_ms = timeout_ms;
        }
        if let Some(socket) = &self.socket {
            config.fail2ban.socket = Some(socket.clone());
        }
        if let Some(client) = &self.client {
            config.fail2ban.client_path = client.clone();
        }
        if self.fail_fast {
            config.startup.fail_fast = true;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::from(codes::SUCCESS),
        Err(e) => {
            error!(error = %e, "Exporter failed");
            eprintln!("error: {}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn run(args: Args) -> Result<(), StartupError> {
    let config = args.resolve_config()?;
    init_tracing(&config.logging).map_err(|e| StartupError::Logging(e.to_string()))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Fail2ban Prometheus Exporter"
    );

    let client: Arc<dyn JailClient> = Arc::new(Fail2banClient::new(&config.fail2ban));

    // Startup validation of the control channel
    let startup_jails = match client.list_jails().await {
        Ok(jails) => {
            info!(jails = jails.len(), "Fail2ban reachable");
            Some(jails)
        }
        Err(e) if config.startup.fail_fast => return Err(e.into()),
        Err(e) => {
            warn!(
                error = %e,
                "Fail2ban unreachable at startup, serving fail2ban_up=0 until it recovers"
            );
            None
        }
    };

    // Bind before spawning anything so that a bad address is fatal
    let listen_addr: SocketAddr = config
        .prometheus
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;
    let listener = TcpListener::bind(listen_addr)
        .await
        .map_err(|source| StartupError::Bind {
            addr: listen_addr,
            source,
        })?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let store = Arc::new(SnapshotStore::new());
    let builder = SnapshotBuilder::new(client, JailFilter::new(&config.filters));
    let mut scheduler =
        PollScheduler::new(builder, store.clone(), config.fail2ban.poll_interval());
    // The startup listing doubles as the first poll
    if let Some(jails) = startup_jails {
        scheduler.seed(jails).await;
    }
    let http_server = HttpServer::new(
        store.clone(),
        Renderer::new(&config.prometheus, &config.staleness),
        config.prometheus.path.clone(),
    );

    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx.clone()));

    let http_shutdown = shutdown_rx.clone();
    let mut http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(listener, http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
        _ = &mut http_task => {
            warn!("HTTP server exited, shutting down...");
        }
    }

    // Receivers may already be gone if the HTTP task exited
    let _ = shutdown_tx.send(true);

    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = scheduler_task.await;
        if !http_task.is_finished() {
            let _ = http_task.await;
        }
    })
    .await;

    let status = store.status();
    info!(
        polls_succeeded = status.polls_succeeded,
        polls_failed = status.polls_failed,
        ticks_skipped = status.ticks_skipped,
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
