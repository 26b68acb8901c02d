#![deny(unsafe_code)]

//! sonarbridge CLI: drive the engine and HTTP bridges from a terminal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use sonarbridge_config::{AppConfig, EngineTransportKind, Token};
use sonarbridge_core::api::ServerApi;
use sonarbridge_core::build_info;
use sonarbridge_core::engine::Language;
use sonarbridge_core::{BridgeContext, HttpClientProvider};
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// sonarbridge: engine and HTTP plumbing for a SonarQube MCP server.
#[derive(Parser)]
#[command(name = "sonarbridge", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "sonarbridge.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the engine and wait for Ctrl-C.
    Start,

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },

    /// Check that the server answers `api/system/ping`.
    Ping,

    /// Show server status and version.
    Status,

    /// Analyze a file with the engine and print the raw issues as JSON.
    Analyze {
        file: PathBuf,

        /// Language key or name, e.g. `py` or `PYTHON`.
        #[arg(short, long)]
        language: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, found) = load_config(&cli.config).await?;

    // RUST_LOG wins, then -v, then the configured level.
    let filter = match cli.verbose {
        0 => config.logging.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    if !found {
        info!(path = %cli.config.display(), "Config file not found, using defaults");
    }
    info!(version = %build_info::version_string(), "sonarbridge");

    match cli.command {
        Commands::Start => cmd_start(config).await?,
        Commands::Config { show } => cmd_config(&cli.config, &config, show)?,
        Commands::Ping => cmd_ping(&config).await?,
        Commands::Status => cmd_status(&config).await?,
        Commands::Analyze { file, language } => {
            cmd_analyze(config, &file, language.as_deref()).await?
        }
    }

    Ok(())
}

async fn cmd_start(config: AppConfig) -> Result<()> {
    let context = engine_context(config)?;
    context.start().await?;
    info!("Engine started, press Ctrl-C to stop");
    context.run_until_shutdown().await;
    Ok(())
}

fn cmd_config(config_path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    if show {
        let mut shown = config.clone();
        if shown.server.token.is_some() {
            shown.server.token = Some(Token::new("********"));
        }
        let toml_str =
            toml::to_string_pretty(&shown).map_err(|e| anyhow::anyhow!("TOML error: {e}"))?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

async fn cmd_ping(config: &AppConfig) -> Result<()> {
    let api = server_api(config)?;
    let pong = api.system().ping().await?;
    println!("{pong}");
    Ok(())
}

async fn cmd_status(config: &AppConfig) -> Result<()> {
    let api = server_api(config)?;
    let status = api.system().status().await?;
    println!("id:      {}", status.id);
    println!("version: {}", status.version);
    println!("status:  {}", status.status);
    if api.is_authentication_set() {
        match api.system().health().await {
            Ok(health) => println!("health:  {}", health.health),
            Err(e) => warn!(error = %e, "Health check failed"),
        }
    }
    Ok(())
}

async fn cmd_analyze(config: AppConfig, file: &Path, language: Option<&str>) -> Result<()> {
    let language = match language {
        Some(input) => match Language::from_input(input) {
            Some(lang) => Some(lang),
            None => bail!("unknown language {input:?}"),
        },
        None => language_for(file),
    };
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("cannot read {}", file.display()))?;

    let context = engine_context(config)?;
    context.start().await?;
    let result = context.analyze_snippet(&content, language).await;
    context
        .engine()
        .notify_tool_called("analyze_code_snippet", result.is_ok());
    context.shutdown().await;

    let result = result?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn language_for(file: &Path) -> Option<Language> {
    let ext = file.extension()?.to_str()?;
    Language::ALL
        .into_iter()
        .find(|lang| lang.default_suffix().trim_start_matches('.') == ext)
}

fn engine_context(config: AppConfig) -> Result<BridgeContext> {
    if config.engine.transport == EngineTransportKind::Loopback {
        bail!("this binary has no embedded engine; set engine.transport = \"process\"");
    }
    Ok(BridgeContext::new(config, Handle::current(), None)?)
}

fn server_api(config: &AppConfig) -> Result<ServerApi> {
    let user_agent = config
        .http
        .user_agent
        .clone()
        .unwrap_or_else(build_info::default_user_agent);
    let provider = Arc::new(HttpClientProvider::new(
        &config.http,
        &user_agent,
        Handle::current(),
    )?);
    Ok(ServerApi::from_config(&config.server, &provider))
}

/// Read the config file if present, overlay the environment, then validate.
/// The flag tells whether the file existed.
async fn load_config(path: &Path) -> Result<(AppConfig, bool)> {
    let found = path.exists();
    let mut config = if found {
        AppConfig::read(path).await?
    } else {
        AppConfig::default()
    };
    let vars: HashMap<String, String> = std::env::vars().collect();
    config.apply_env(&vars);
    config
        .validate()
        .with_context(|| format!("invalid configuration ({})", path.display()))?;
    Ok((config, found))
}
