mod catalog;
mod config_store;
mod consumer;
mod cursor;
mod decoder;
mod encoder;
mod entity;
mod env;
mod error;
mod gateway;
mod producer;
mod registry;
mod trace;
mod util;

use anyhow::Context;
use clap::Parser;
use env::Env;
use gateway::AppState;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Optional CLI overrides for the process environment. Any flag supplied here is applied before
/// [`Env::from_environment`] runs, so `Env` stays the single source of truth for configuration
/// resolution.
#[derive(Parser, Debug)]
#[command()]
struct Cli {
    #[arg(long)]
    server_port: Option<u16>,
    #[arg(long)]
    config_location: Option<String>,
    #[arg(long)]
    bootstrap_servers: Option<String>,
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply_to_environment(&self) {
        if let Some(v) = &self.server_port {
            unsafe { std::env::set_var("SERVER_PORT", v.to_string()) };
        }
        if let Some(v) = &self.config_location {
            unsafe { std::env::set_var("CONFIG_LOCATION", v) };
        }
        if let Some(v) = &self.bootstrap_servers {
            unsafe { std::env::set_var("BOOTSTRAP_SERVERS", v) };
        }
        if let Some(v) = &self.log_level {
            unsafe { std::env::set_var("LOG_LEVEL", v) };
        }
    }
}

/// Main entry point for the gateway service.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match dotenvy::dotenv() {
        Ok(path) => eprintln!(".env file loaded from {}", path.display()),
        Err(dotenvy::Error::Io(io)) if io.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => eprintln!("failed to load .env file: {e}"),
    }

    let cli = Cli::parse();
    cli.apply_to_environment();

    let env = Env::from_environment().context("resolve process environment")?;

    trace::init(&env.log_level).context("initialize tracing")?;

    tracing::info!(service = %env.service_name, "starting entity gateway");

    let config_store = Arc::new(
        config_store::ConfigStore::load(env.config_location.clone(), None)
            .await
            .context("load initial dataset catalog")?,
    );

    let consumer_engine = Arc::new(consumer::ConsumerEngine::new(env.bootstrap_servers.clone()));
    let producer_engine = Arc::new(producer::ProducerEngine::new(env.bootstrap_servers.clone()));

    producer_engine
        .ensure_topics(&config_store.current().await)
        .await
        .context("ensure configured topics exist")?;

    {
        let producer_engine = producer_engine.clone();
        let config_store_for_listener = config_store.clone();
        config_store
            .on_change(Box::new(move |_digest| {
                let producer_engine = producer_engine.clone();
                let config_store = config_store_for_listener.clone();
                tokio::spawn(async move {
                    let catalog = config_store.current().await;
                    if let Err(e) = producer_engine.ensure_topics(&catalog).await {
                        tracing::error!("ensure topics after catalog reload failed: {:#}", e);
                    }
                });
            }))
            .await;
    }

    config_store.clone().spawn_reload_ticker(env.refresh_interval);

    let state = AppState {
        config_store,
        consumer_engine,
        producer_engine,
        auth_mode: env.auth_mode,
    };

    let router = gateway::router(state);

    let listener = TcpListener::bind(("0.0.0.0", env.server_port))
        .await
        .with_context(|| format!("bind HTTP listener on port {}", env.server_port))?;

    tracing::info!(port = env.server_port, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve HTTP")
}

/// Waits for either Ctrl+C or, on Unix, SIGTERM, so the server drains in-flight connections
/// before exiting.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
