//! # Lyrics Relay Server
//!
//! Polls a Holyrics presentation server for the text on screen and pushes
//! every change to the subscribers connected on `/ws`. Late joiners get the
//! current slide as soon as they connect.
//!
//! Two tasks run under `tokio-graceful`:
//! - the poller, ticking until the shutdown signal;
//! - the HTTP server (`/ws`, `/health`, `/status`, static UI), which stops
//!   accepting on the signal and then drops every subscriber.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use static_init::dynamic;
use tokio::net::TcpListener;
use tokio_graceful::Shutdown;
use tracing::{error, info};

use lib_relay::core::{Relay, SourceHealth};
use lib_relay::gateway::{self, AppState};
use lib_relay::ingestors::HolyricsPoller;
use lib_relay::loggers::setup_logging;

mod lyrics_logic;
use lyrics_logic::config::load_settings;

// load .env files before anything else
#[dynamic]
static DOTENV_INIT: () = {
    let dotenv_os: &str = if cfg!(target_os = "windows") {
        ".env.windows"
    } else {
        ".env.linux"
    };
    dotenvy::dotenv().ok();
    dotenvy::from_filename(dotenv_os).ok();
};

#[tokio::main]
async fn main() -> Result<()> {
    // Touch the static so the .env files are loaded before clap reads the environment.
    let _ = &*DOTENV_INIT;

    let settings = load_settings().context("loading configuration")?;
    let _log_guard = setup_logging(&settings.logging_options("server_lyrics"))?;
    info!("Configuration: {:?}", settings);

    let relay = Arc::new(Relay::new(settings.subscriber_buffer));
    let health = Arc::new(SourceHealth::new());

    let poller = HolyricsPoller::new(settings.poller_options(), Arc::clone(&relay), Arc::clone(&health))
        .context("building the source client")?;

    let bind_addr = format!("0.0.0.0:{}", settings.port);
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", bind_addr, e);
            return Err(e).with_context(|| format!("binding {}", bind_addr));
        }
    };
    info!("Server is running on {}", listener.local_addr()?);

    let public_dir = settings.public_dir.is_dir().then(|| settings.public_dir.clone());
    if public_dir.is_none() {
        info!("No static assets at {}, serving API routes only", settings.public_dir.display());
    }
    let app = gateway::router(
        AppState {
            relay: Arc::clone(&relay),
            health,
        },
        public_dir.as_deref(),
    );

    let shutdown: Shutdown = Shutdown::default();

    shutdown.spawn_task_fn(move |guard| async move {
        poller.run(guard.cancelled()).await;
    });

    shutdown.spawn_task_fn(move |guard| async move {
        let signal = {
            let guard = guard.clone();
            async move { guard.cancelled().await }
        };
        if let Err(e) = gateway::serve(listener, app, signal).await {
            error!("Server error: {}", e);
        }
        let dropped = relay.disconnect_all();
        info!("Closed {} subscriber connection(s)", dropped);
    });

    match shutdown.shutdown_with_limit(Duration::from_secs(10)).await {
        Ok(elapsed) => {
            info!(
                "shutdown: gracefully {}s after shutdown signal received",
                elapsed.as_secs_f64()
            );
        }
        Err(e) => {
            info!("shutdown: forcefully due to timeout: {}", e);
        }
    }

    info!("Bye!");
    Ok(())
}
