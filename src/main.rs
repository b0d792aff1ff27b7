use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rand::Rng;
use rand::distributions::Alphanumeric;
use secrecy::ExposeSecret;

use willforge::channels::web::server::{AppState, RateLimiter, start_server};
use willforge::config::AppConfig;
use willforge::legal::compliance;
use willforge::settings::Settings;
use willforge::{audit, db, llm};

/// Document generation can fan out to a hosted LLM; keep it throttled.
const DOCGEN_MAX_PER_MINUTE: u64 = 10;

#[derive(Parser)]
#[command(name = "willforge", version, about = "Estate documents and practice management for an Ontario practice")]
struct Cli {
    /// Path to a settings TOML file. Defaults to the platform config dir.
    #[arg(long, global = true, env = "WILLFORGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API server.
    Serve,
    /// Open the database, apply migrations, and exit.
    Migrate,
    /// Validate configuration and the compliance rule table, then exit.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
    let config = AppConfig::resolve(&settings).context("failed to resolve configuration")?;

    init_tracing(config.log_json);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Migrate => migrate(config).await,
        Command::Check => check(config),
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,willforge=debug"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let db = db::connect(&config.database.path)
        .await
        .with_context(|| format!("failed to open database at {:?}", config.database.path))?;

    audit::init(&config.audit);

    let llm = llm::build_provider(&config.llm).context("failed to configure LLM provider")?;
    match &llm {
        Some(provider) => tracing::info!(
            provider = provider.provider_name(),
            model = provider.model_name(),
            "clause drafting enabled"
        ),
        None => tracing::info!("clause drafting disabled; documents render template-only"),
    }

    let auth_token = match &config.server.auth_token {
        Some(token) => token.expose_secret().to_string(),
        None => {
            let token: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(48)
                .map(char::from)
                .collect();
            tracing::warn!(
                "no auth token configured; generated one for this run: {}",
                token
            );
            token
        }
    };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;

    let state = Arc::new(AppState {
        db,
        llm,
        practice: config.practice,
        audit: config.audit,
        docgen_limiter: RateLimiter::new(DOCGEN_MAX_PER_MINUTE, 60),
        shutdown_tx: tokio::sync::RwLock::new(None),
        started_at: Instant::now(),
    });

    let bound = start_server(addr, state.clone(), auth_token)
        .await
        .context("failed to start HTTP server")?;
    tracing::info!("willforge API listening on http://{}", bound);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");
    if let Some(tx) = state.shutdown_tx.write().await.take() {
        let _ = tx.send(());
    }

    Ok(())
}

async fn migrate(config: AppConfig) -> anyhow::Result<()> {
    // connect() runs migrations as part of opening the backend.
    db::connect(&config.database.path)
        .await
        .with_context(|| format!("failed to migrate database at {:?}", config.database.path))?;
    println!("database ready at {}", config.database.path.display());
    Ok(())
}

fn check(config: AppConfig) -> anyhow::Result<()> {
    let rules = compliance::all_rules()
        .map_err(|e| anyhow::anyhow!(e))
        .context("compliance rule table failed to parse")?;
    println!("compliance rules: {} loaded", rules.len());
    println!("database path:    {}", config.database.path.display());
    println!("llm provider:     {}", config.llm.provider.as_str());
    println!(
        "audit log:        {}",
        if config.audit.enabled {
            config.audit.path.display().to_string()
        } else {
            "disabled".to_string()
        }
    );
    println!("configuration ok");
    Ok(())
}
