//! caelus
//!
//! ## Architecture
//!
//! ```text
//! Gmail ─▶ ingest ─▶ Qdrant + NATS "mails"
//!                         ↓
//!                      process ─▶ S3 prompts + NATS "prompts"
//!                                      ↓
//!                                    feed ─▶ OpenAI ─▶ S3 responses
//! ```
//!
//! Each stage can run as its own process (`ingest`, `process`, `feed`) or
//! all together in one (`run`), which is the only way the in-memory
//! connectors can hand work from one stage to the next.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use core_config::Environment;
use core_config::tracing::{init_tracing, install_color_eyre};
use domain_pipeline::{Components, PipelineConfig};
use eyre::{Result, WrapErr};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "caelus")]
#[command(about = "Turn mailing-list traffic into LLM prompts under a daily token budget")]
pub struct Cli {
    /// Pipeline configuration document
    #[arg(short, long, env = "CAELUS_CONFIG", default_value = "config.yaml")]
    pub config: PathBuf,

    /// Serve Prometheus metrics on this port
    #[arg(long, env = "CAELUS_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Harvest every source once, embed the records and queue their ids
    Ingest,
    /// Assemble prompts from queued record ids until stopped
    Process,
    /// Send prompts to the language model until stopped, pausing when the
    /// daily budget is spent
    Feed,
    /// Ingest once, then process and feed in this process
    Run,
}

/// Parse the command line and run the selected stage.
pub async fn run() -> Result<()> {
    install_color_eyre();
    let cli = Cli::parse();

    let environment = Environment::from_env();
    init_tracing(&environment);
    info!(command = ?cli.command, config = %cli.config.display(), "Starting caelus");

    if let Some(port) = cli.metrics_port {
        install_metrics(port)?;
    }

    let config = PipelineConfig::load(&cli.config)
        .wrap_err_with(|| format!("Failed to load {}", cli.config.display()))?;
    let components = Components::new(config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Error waiting for shutdown signal: {}", e);
        }
        let _ = shutdown_tx.send(true);
    });

    match cli.command {
        Command::Ingest => ingest(&components).await?,
        Command::Process => process(&components, shutdown_rx).await?,
        Command::Feed => feed(&components, shutdown_rx).await?,
        Command::Run => {
            ingest(&components).await?;
            let (processed, fed) = tokio::join!(
                process(&components, shutdown_rx.clone()),
                feed(&components, shutdown_rx)
            );
            processed?;
            fed?;
        }
    }

    info!("caelus stopped");
    Ok(())
}

async fn ingest(components: &Components) -> Result<()> {
    let manager = components
        .ingestion_manager()
        .await
        .wrap_err("Failed to set up ingestion")?;
    let report = manager.run().await;
    info!(
        listed = report.listed,
        upserted = report.upserted,
        enqueued = report.enqueued,
        batches_failed = report.batches_failed,
        sources_failed = report.sources_failed,
        "Ingestion complete"
    );
    Ok(())
}

async fn process(components: &Components, shutdown: watch::Receiver<bool>) -> Result<()> {
    let pool = components
        .processor_pool()
        .await
        .wrap_err("Failed to set up the prompt processor")?;
    pool.run(shutdown).await;
    Ok(())
}

async fn feed(components: &Components, shutdown: watch::Receiver<bool>) -> Result<()> {
    let pool = components
        .dispatch_pool()
        .await
        .wrap_err("Failed to set up the prompt feeder")?;
    let budget = pool.budget();
    let exhausted = pool.run(shutdown).await;
    info!(
        exhausted_workers = exhausted,
        used = budget.used(),
        limit = budget.limit(),
        "Feeder finished"
    );
    Ok(())
}

/// Install the Prometheus recorder with an HTTP listener on `port`.
fn install_metrics(port: u16) -> Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .wrap_err_with(|| format!("Failed to start metrics listener on {addr}"))?;
    info!(port, "Metrics listener started");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.wrap_err("Failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install signal handler")?
            .recv()
            .await;
        Ok::<_, eyre::Report>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating shutdown...");
        },
        result = terminate => {
            result?;
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subcommands_parse() {
        let cli = Cli::try_parse_from(["caelus", "--config", "pipeline.yaml", "feed"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("pipeline.yaml"));
        assert_eq!(cli.command, Command::Feed);
        assert_eq!(cli.metrics_port, None);

        let cli = Cli::try_parse_from(["caelus", "--metrics-port", "9100", "run"]).unwrap();
        assert_eq!(cli.metrics_port, Some(9100));
        assert_eq!(cli.command, Command::Run);
    }

    #[test]
    fn test_config_path_from_env() {
        temp_env::with_vars(
            [("CAELUS_CONFIG", Some("/etc/caelus.yaml")), ("CAELUS_METRICS_PORT", None)],
            || {
                let cli = Cli::try_parse_from(["caelus", "process"]).unwrap();
                assert_eq!(cli.config, PathBuf::from("/etc/caelus.yaml"));
            },
        );
    }

    #[test]
    fn test_sample_config_loads() {
        let secrets = [
            "GMAIL_CLIENT_ID",
            "GMAIL_CLIENT_SECRET",
            "GMAIL_REFRESH_TOKEN",
            "MINIO_ACCESS_KEY",
            "MINIO_SECRET_KEY",
            "OPENAI_API_KEY",
        ]
        .map(|key| (key, Some("secret")));

        temp_env::with_vars(secrets, || {
            let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config.yaml");
            let config = PipelineConfig::load(&path).unwrap();
            assert_eq!(config.sources.len(), 1);
            assert_eq!(config.buffer.type_name(), "nats");
            assert_eq!(config.storage.len(), 2);
            assert!(config.llm.is_some());
        });
    }

    #[test]
    fn test_default_config_and_missing_command() {
        temp_env::with_var_unset("CAELUS_CONFIG", || {
            let cli = Cli::try_parse_from(["caelus", "ingest"]).unwrap();
            assert_eq!(cli.config, PathBuf::from("config.yaml"));
        });
        assert!(Cli::try_parse_from(["caelus"]).is_err());
    }
}
