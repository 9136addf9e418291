//! aiko-gateway command line
//!
//! Usage:
//!   aiko-gateway                 # same as `serve`
//!   aiko-gateway serve
//!   aiko-gateway check
//!   aiko-gateway render-report --input report.json --output rapport.docx

use std::path::PathBuf;
use std::sync::Arc;

use aiko_gateway::clients::{LangGraphClient, WorkflowEngine};
use aiko_gateway::config::Config;
use aiko_gateway::http::start_http_server;
use aiko_gateway::log_filter;
use aiko_gateway::report::{ReportData, render_docx_with};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "aiko-gateway")]
#[command(about = "HTTP gateway for the AI needs-analysis workflow", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway (default)
    Serve,
    /// Probe the workflow engine and exit non-zero when it is down
    Check,
    /// Render a report JSON file to .docx without a running engine
    RenderReport {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(&config.runtime.log_level))
        .with_target(false)
        .init();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Check => check(&config).await,
        Commands::RenderReport { input, output } => render_report(&config, input, output),
    }
}

async fn serve(config: Config) -> Result<()> {
    info!(
        "Starting aiko-gateway (engine {} assistant {})",
        config.engine.base_url, config.engine.assistant_id
    );
    let engine: Arc<dyn WorkflowEngine> = Arc::new(LangGraphClient::new(&config.engine)?);
    if !engine.health().await {
        tracing::warn!(
            "Workflow engine at {} is not reachable yet; requests will fail until it is",
            config.engine.base_url
        );
    }

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested, cancelling in-flight polls");
                signal.cancel();
            }
            Err(e) => tracing::warn!("Could not listen for Ctrl-C: {}", e),
        }
    });

    start_http_server(Arc::new(config), engine, shutdown).await
}

async fn check(config: &Config) -> Result<()> {
    let client = LangGraphClient::new(&config.engine)?;
    if client.health().await {
        println!("✅ Workflow engine reachable at {}", client.base_url());
        Ok(())
    } else {
        eprintln!("❌ Workflow engine unreachable at {}", client.base_url());
        std::process::exit(1);
    }
}

fn render_report(config: &Config, input: PathBuf, output: PathBuf) -> Result<()> {
    let raw = std::fs::read_to_string(&input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let data: ReportData = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid report JSON in {}", input.display()))?;
    let bytes = render_docx_with(&data, &config.report)?;
    std::fs::write(&output, &bytes)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("✅ Wrote {} ({} bytes)", output.display(), bytes.len());
    Ok(())
}
