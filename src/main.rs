//! Weaver CLI
//!
//! Thin front-end over the library: run the daemon, sync or inspect the
//! index, call a surface tool. Exit codes follow the consumer contract
//! (`WeaverError::exit_code`).

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;

use weaver::cache::ShadowCache;
use weaver::config::WeaverConfig;
use weaver::error::{Result, WeaverError};
use weaver::surface::ToolRequest;
use weaver::Weaver;

#[derive(Parser)]
#[command(name = "weaver", version, about = "Always-on agent for Markdown knowledge vaults")]
struct Cli {
    /// Path to weaver.toml (defaults to <vault>/weaver.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Vault root (overrides the config file)
    #[arg(long, global = true)]
    vault: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent until interrupted
    Serve,
    /// One full index sync, then exit
    Sync,
    /// Invoke one surface tool and print its envelope
    Query {
        /// Tool name (query_files, search_tags, ...)
        tool: String,
        /// JSON object of parameters
        #[arg(long, default_value = "{}")]
        params: String,
    },
    /// Print vault statistics
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("weaver=info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::from(e.exit_code().clamp(0, 255) as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    match cli.command {
        Command::Serve => serve(config).await,
        Command::Sync => sync(config),
        Command::Query { tool, params } => query(config, &tool, &params).await,
        Command::Status => status(config),
    }
}

fn load_config(cli: &Cli) -> Result<WeaverConfig> {
    let explicit_vault = cli.vault.clone();
    let config_path = match (&cli.config, &explicit_vault) {
        (Some(path), _) => path.clone(),
        (None, Some(vault)) => vault.join("weaver.toml"),
        (None, None) => PathBuf::from("weaver.toml"),
    };
    let mut config = WeaverConfig::load(&config_path)?.with_env();
    if let Some(vault) = explicit_vault {
        config.vault.root = vault;
    }
    if !config.vault.root.as_os_str().is_empty() && config.vault.root.is_relative() {
        config.vault.root = std::fs::canonicalize(&config.vault.root)
            .map_err(|e| WeaverError::Config {
                reason: format!("cannot resolve vault root: {}", e),
            })?;
    }
    Ok(config)
}

async fn serve(config: WeaverConfig) -> Result<()> {
    let weaver = Weaver::start(config).await?;
    println!("{}", "weaver is watching the vault (ctrl-c to stop)".green());
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| WeaverError::internal(format!("signal handler: {}", e)))?;
    weaver.shutdown().await
}

fn sync(config: WeaverConfig) -> Result<()> {
    config.validate()?;
    let cache = ShadowCache::open(&config.db_path(), &config.vault.root)?;
    let report = cache.sync_vault()?;
    println!(
        "{} scanned {}, updated {}, deleted {} in {} ms",
        "sync:".green().bold(),
        report.scanned,
        report.updated,
        report.deleted,
        report.duration_ms
    );
    Ok(())
}

async fn query(config: WeaverConfig, tool: &str, params: &str) -> Result<()> {
    config.validate()?;
    let params: serde_json::Value = serde_json::from_str(params)
        .map_err(|e| WeaverError::validation(format!("--params must be JSON: {}", e)))?;

    let cache = Arc::new(ShadowCache::open(&config.db_path(), &config.vault.root)?);
    let workflows = Arc::new(weaver::workflow::WorkflowEngine::open(
        &config.workflow_store_path(),
        &config.workflow,
        &tokio_util::sync::CancellationToken::new(),
    )?);
    // Offline-friendly: fall back to a canned transport when no key is set
    // (reads never touch the model anyway).
    let llm = match weaver::llm::LlmClient::new(&config.llm) {
        Ok(client) => Arc::new(client),
        Err(_) => Arc::new(weaver::llm::LlmClient::with_transport(
            &config.llm,
            Arc::new(weaver::llm::StaticTransport::new("")),
        )),
    };

    let registry = weaver::surface::ToolRegistry::new();
    weaver::surface::register_builtin_tools(
        &registry,
        cache,
        workflows,
        llm,
        config.vault.root.clone(),
    );
    let dispatcher = weaver::surface::Dispatcher::new(
        registry,
        &config.surface,
        Arc::new(weaver::activity::ActivityLogger::disabled()),
    );

    let response = dispatcher.dispatch(ToolRequest::new(tool, params)).await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    if response.success {
        Ok(())
    } else {
        Err(WeaverError::validation(
            response.error.unwrap_or_else(|| "tool call failed".to_string()),
        ))
    }
}

fn status(config: WeaverConfig) -> Result<()> {
    config.validate()?;
    let cache = ShadowCache::open(&config.db_path(), &config.vault.root)?;
    let stats = cache.get_stats()?;
    println!("{}", "vault".bold());
    println!("  files: {}", stats.total_files);
    println!("  tags:  {}", stats.total_tags);
    println!("  links: {}", stats.total_links);
    println!("  size:  {} bytes", stats.vault_size_bytes);
    if let Some(updated) = stats.last_updated {
        println!("  last sync: {}", updated.to_rfc3339());
    }
    if !stats.top_tags.is_empty() {
        println!("{}", "top tags".bold());
        for tag in &stats.top_tags {
            println!("  {} ({})", tag.tag.cyan(), tag.count);
        }
    }
    Ok(())
}
