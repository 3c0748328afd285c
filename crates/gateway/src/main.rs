use std::sync::Arc;

use anyhow::Context;
use axum::http::HeaderValue;
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use cs_domain::config::{Config, ConfigSeverity};
use cs_gateway::api;
use cs_gateway::bootstrap;
use cs_gateway::cli::{self, Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    match args.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _path) = cli::load_config(args.config.as_ref())?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, path) = cli::load_config(args.config.as_ref())?;
            if !cli::validate(&config, &path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _path) = cli::load_config(args.config.as_ref())?;
            cli::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("coachscribe {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing for the serve command.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,cs_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("CoachScribe starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Error)
    {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Composition root ─────────────────────────────────────────────
    let runtime = bootstrap::build(config.clone())?;
    let state = runtime.state.clone();

    // ── CORS ─────────────────────────────────────────────────────────
    let cors = if config.server.cors_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = config
            .server
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any)
    };

    let app = api::router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    tracing::info!(bind = %config.server.bind, "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;

    runtime.worker.abort();
    runtime.reaper.abort();
    tracing::info!("CoachScribe stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
