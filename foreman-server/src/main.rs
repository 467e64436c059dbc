use clap::Parser;
use foreman_core::ForemanConfig;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use foreman_server::pipeline::Engine;
use foreman_server::server;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "foreman.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience — production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Init logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Load config
    let config = match ForemanConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Build the engine (providers, memory, session registry, storage)
    let engine = match Engine::from_config(config) {
        Ok(e) => Arc::new(e),
        Err(e) => {
            eprintln!("Failed to build engine: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        let providers = engine.provider_names();
        if providers.is_empty() {
            println!("❌ No usable providers configured");
            std::process::exit(1);
        }
        println!("✅ Providers configured: {}", providers.join(", "));
        println!("✅ Storage reachable");
        println!("✅ Foreman health check passed");
        return Ok(());
    }

    // Shutdown plumbing
    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    // Spawn session reaper loop
    tokio::spawn(foreman_server::session::run_reaper_loop(
        Arc::clone(&engine.sessions),
        Arc::clone(&engine.storage),
        engine.config.session.clone(),
        tx.subscribe(),
    ));

    // Spawn memory eviction sweep loop
    tokio::spawn(foreman_server::subsystems::memory::run_eviction_loop(
        Arc::clone(&engine.memory),
        engine.config.memory.eviction_interval_minutes,
        tx.subscribe(),
    ));

    // Spawn HTTP API server if enabled
    if engine.config.http.enabled {
        let http_engine = Arc::clone(&engine);
        let http_shutdown = tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = foreman_server::http::start_http_server(http_engine, http_shutdown).await
            {
                tracing::error!("HTTP server error: {}", e);
            }
        });
    }

    let socket_path = engine.config.service.socket_path.clone();
    server::run_unix_server(&socket_path, engine, tx.subscribe()).await?;

    Ok(())
}
