//! Live-streaming origin core binary: loads configuration, starts the
//! registry's reaper, and serves the ambient health/debug control plane.
//! Transport sockets (RTMP/RTSP/SRT listeners) are external collaborators
//! per spec §6 — this binary wires the library, it doesn't bind them.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use live_origin::config::ServerConfig;
use live_origin::config_file::ConfigFile;
use live_origin::http::create_router;
use live_origin::http::handlers::AppState;
use live_origin::registry::Registry;

const APP_NAME: &str = "live-origin";
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    init_logging();
    tracing::info!("{} v{} starting", APP_NAME, VERSION);

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = load_config(&config_path);
    tracing::info!(vhosts = config.vhosts.len(), "configuration loaded");

    let registry = Arc::new(Registry::new(config.clone()));
    let _reaper = registry.clone().spawn_reaper();

    let state = Arc::new(AppState::new(registry));
    let app = create_router(state);

    let addr: SocketAddr = config
        .socket_addr()
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 3000)));
    tracing::info!(%addr, "starting control-plane HTTP server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind control-plane listener");
    axum::serve(listener, app)
        .await
        .expect("control-plane server exited unexpectedly");
}

fn load_config(path: &str) -> ServerConfig {
    if std::path::Path::new(path).exists() {
        match ConfigFile::from_file(path) {
            Ok(cf) => return cf.into_server_config(),
            Err(e) => tracing::warn!(path, error = %e, "failed to load config file, using defaults"),
        }
    }
    ServerConfig::default()
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "live_origin=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
