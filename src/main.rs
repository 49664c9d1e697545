// Copyright 2026 BadCompany
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Main entry point for the uniproxy gateway
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

use uniproxy::adapters::{FileAdapterStore, InMemoryAdapterStore};
use uniproxy::api::{create_router, AppState};
use uniproxy::config::Config;
use uniproxy::gateway::Gateway;
use uniproxy::gateway_core::traits::AdapterStore;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Address to listen on (e.g. "0.0.0.0:8911")
    #[arg(long)]
    bind: Option<String>,

    /// Path to the adapter definitions (YAML or JSON)
    #[arg(long)]
    adapters: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error
    #[arg(long)]
    log_level: Option<String>,

    /// Log format: text or json
    #[arg(long)]
    log_format: Option<String>,

    /// Per-dispatch backend timeout in seconds
    #[arg(long)]
    dispatch_timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env().context("Failed to load configuration from environment")?;
    if let Some(bind) = cli.bind {
        config.bind_address = bind;
    }
    if let Some(path) = cli.adapters {
        config.adapters_file = Some(path);
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }
    if let Some(secs) = cli.dispatch_timeout_secs {
        config.dispatch_timeout_secs = secs;
    }
    config.validate().context("Invalid configuration")?;

    init_tracing(&config)?;
    info!(bind_address = %config.bind_address, "Starting uniproxy");

    let adapters: Arc<dyn AdapterStore> = match &config.adapters_file {
        Some(path) => Arc::new(
            FileAdapterStore::from_file(path)
                .with_context(|| format!("Failed to load adapters from {}", path.display()))?,
        ),
        None => {
            warn!("No adapters file configured, every adapter lookup will fail");
            Arc::new(InMemoryAdapterStore::new())
        }
    };

    let gateway = Gateway::new(&config, adapters).context("Failed to build gateway")?;
    gateway.start();
    let app = create_router(AppState::new(gateway.clone()));

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    info!(address = %listener.local_addr()?, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    gateway.shutdown();
    info!("Shutdown complete");
    Ok(())
}

fn init_tracing(config: &Config) -> Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("Invalid log level")?;

    let subscriber = fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(filter);

    if config.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
