//! # wyoming-whisper
//!
//! Wyoming protocol speech-to-text server. Clients stream raw PCM audio over
//! TCP or a Unix socket and get back one transcript per utterance, produced
//! by a Whisper model running on candle.
//!
//! ## Startup:
//! 1. Read `.env`, flags, config file and environment into `AppConfig`
//! 2. Set up tracing
//! 3. Build the shared `ServerContext` (model guard, worker pool, info document)
//! 4. Optionally load the model up front and start the health endpoint
//! 5. Accept Wyoming connections until SIGINT/SIGTERM

mod audio;
mod cli;
mod config;
mod device;
mod error;
mod handler;
mod health;
mod protocol;
mod server;
mod state;
mod transcription;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use config::AppConfig;
use device::DevicePreference;
use handler::ServerContext;
use server::{ServerUri, WyomingServer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::WhisperLoader;

/// Set once SIGINT or SIGTERM arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.debug)?;

    let config = AppConfig::load(&cli)?;
    config.validate()?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting wyoming-whisper");
    info!(
        uri = %config.server.uri,
        model = %config.model.name,
        language = ?config.transcription.language,
        beam_size = config.transcription.beam_size,
        "Configuration loaded"
    );

    let uri: ServerUri = config.server.uri.parse()?;
    let device = config.model.device.parse::<DevicePreference>()?.resolve();
    let dtype = WhisperLoader::parse_dtype(&config.model.dtype)?;

    std::fs::create_dir_all(&config.model.cache_dir).with_context(|| {
        format!("Failed to create model directory {}", config.model.cache_dir.display())
    })?;

    let loader = Arc::new(WhisperLoader::new(device, dtype, config.model.download_dir.clone()));
    let ctx = Arc::new(ServerContext::from_config(&config, loader));

    if config.model.preload {
        ctx.guard
            .ensure_loaded()
            .await
            .context("Preloading the model failed")?;
    }

    setup_signal_handlers();

    let health_handle = if config.health.enabled {
        let server = health::build_server(ctx.clone(), &config.health)?;
        let handle = server.handle();
        tokio::spawn(async move {
            if let Err(e) = server.await {
                error!(error = %e, "Health endpoint stopped");
            }
        });
        Some(handle)
    } else {
        None
    };

    let server = WyomingServer::new(ctx, config.server.frame_limits());
    let result = server.run(&uri, wait_for_shutdown()).await;

    if let Some(handle) = health_handle {
        handle.stop(true).await;
    }

    match &result {
        Ok(()) => info!("Server stopped gracefully"),
        Err(e) => error!(error = %e, "Server stopped with an error"),
    }
    result
}

/// `RUST_LOG` wins when set; otherwise `--debug` picks between info and debug.
fn init_tracing(debug: bool) -> Result<()> {
    let default_filter = if debug {
        "wyoming_whisper=debug,actix_web=info"
    } else {
        "wyoming_whisper=info,actix_web=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

fn setup_signal_handlers() {
    tokio::spawn(async {
        use tokio::signal::unix::{signal, SignalKind};

        let handlers = (signal(SignalKind::terminate()), signal(SignalKind::interrupt()));
        let (mut sigterm, mut sigint) = match handlers {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "Failed to install signal handlers");
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
