//! Sandbox gateway binary.
//!
//! # Environment Variables
//!
//! - `PORT`: HTTP listen port (default 8080)
//! - `MFN_ENTRYTOPIC`: topic new invocations are published to
//! - `MFN_RESULTTOPIC`: topic this gateway receives results on
//! - `MFN_INTERNAL_ENDPOINT` / `MFN_EXTERNAL_ENDPOINT`: this gateway's addresses
//! - `MFN_QUEUE`: queue backend `host:port`
//! - `MFN_DATALAYER`: datalayer backend `host:port`
//! - `SANDBOXID`, `USERID`, `WORKFLOWNAME`: sandbox identity
//! - `GATEWAY_QUEUE_TRANSPORT`: `stream` or `framed`
//! - `GATEWAY_DATALAYER`: `redis` or `memory`
//! - `GATEWAY_CHECKPOINT`: `datalayer` or `audit-log`
//! - `GATEWAY_LOG_FORMAT`: `text` or `json`
//! - `RUST_LOG`: log filter (default `info`)

use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use gateway_server::network::{NetworkConfig, NetworkModule};
use gateway_server::service::{
    CheckpointMode, DatalayerBackend, GatewayConfig, QueueTransport, ShutdownError,
};
use gateway_server::{Gateway, GatewayPorts};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Sandbox gateway: HTTP front door for workflow invocations.
#[derive(Parser, Debug)]
#[command(name = "gateway")]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    #[arg(long, env = "GATEWAY_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "MFN_ENTRYTOPIC")]
    entry_topic: String,

    #[arg(long, env = "MFN_RESULTTOPIC")]
    result_topic: String,

    #[arg(long, env = "MFN_INTERNAL_ENDPOINT", default_value = "")]
    internal_endpoint: String,

    #[arg(long, env = "MFN_EXTERNAL_ENDPOINT", default_value = "")]
    external_endpoint: String,

    #[arg(long, env = "SANDBOXID", default_value = "")]
    sandbox_id: String,

    #[arg(long, env = "USERID", default_value = "")]
    user_id: String,

    #[arg(long, env = "WORKFLOWNAME", default_value = "")]
    workflow_name: String,

    /// Queue backend address (`host:port`)
    #[arg(long, env = "MFN_QUEUE", default_value = "127.0.0.1:6379")]
    queue: String,

    /// Datalayer backend address (`host:port`)
    #[arg(long, env = "MFN_DATALAYER", default_value = "127.0.0.1:6379")]
    datalayer: String,

    #[arg(long, env = "GATEWAY_QUEUE_TRANSPORT", default_value = "stream")]
    queue_transport: QueueTransport,

    #[arg(long, env = "GATEWAY_DATALAYER", default_value = "redis")]
    datalayer_backend: DatalayerBackend,

    #[arg(long, env = "GATEWAY_CHECKPOINT", default_value = "datalayer")]
    checkpoint: CheckpointMode,

    /// Seconds a synchronous request waits for its result; 0 waits forever
    #[arg(long, env = "GATEWAY_RESULT_TIMEOUT_SECS", default_value_t = 300)]
    result_timeout_secs: u64,

    /// Seconds one blocking receive on the result topic may take
    #[arg(long, env = "GATEWAY_RECEIVE_TIMEOUT_SECS", default_value_t = 10)]
    receive_timeout_secs: u64,

    #[arg(long, env = "GATEWAY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Args {
    fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            ..NetworkConfig::default()
        }
    }

    fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            entry_topic: self.entry_topic.clone(),
            result_topic: self.result_topic.clone(),
            internal_endpoint: self.internal_endpoint.clone(),
            external_endpoint: self.external_endpoint.clone(),
            sandbox_id: self.sandbox_id.clone(),
            user_id: self.user_id.clone(),
            workflow_name: self.workflow_name.clone(),
            queue_transport: self.queue_transport,
            queue_addr: self.queue.clone(),
            datalayer_backend: self.datalayer_backend,
            datalayer_addr: self.datalayer.clone(),
            checkpoint_mode: self.checkpoint,
            result_timeout: (self.result_timeout_secs > 0)
                .then(|| Duration::from_secs(self.result_timeout_secs)),
            receive_timeout: Duration::from_secs(self.receive_timeout_secs),
            ..GatewayConfig::default()
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().flatten_event(true))
            .init(),
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn termination_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for SIGINT");
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
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("SIGINT received"),
        () = terminate => info!("SIGTERM received"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);
    info!("sandbox gateway v{}", env!("CARGO_PKG_VERSION"));

    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "metrics recorder not installed");
            None
        }
    };

    let config = args.gateway_config();
    let ports = GatewayPorts::connect(&config).await?;
    let gateway = Gateway::start(config, ports);

    let mut network = NetworkModule::new(args.network_config(), gateway.router(), gateway.stats());
    if let Some(handle) = metrics {
        network = network.with_metrics(handle);
    }
    network.start().await?;
    let controller = network.shutdown_controller();
    let mut server = tokio::spawn(network.serve());

    let server_exited = tokio::select! {
        () = termination_signal() => false,
        joined = &mut server => {
            match joined {
                Ok(Ok(())) => warn!("HTTP server exited on its own"),
                Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
                Err(e) => error!(error = %e, "HTTP server task panicked"),
            }
            true
        }
    };

    let http = async move {
        controller.trigger_shutdown();
        if !server_exited {
            server.await??;
        }
        anyhow::Ok(())
    };
    match gateway.shutdown_sequence(http).run().await {
        Ok(()) => Ok(()),
        Err(e @ ShutdownError::StepTimedOut { .. }) => {
            error!(error = %e, "shutdown aborted");
            std::process::exit(1);
        }
    }
}
