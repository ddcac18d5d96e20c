use anyhow::{Context, Result};
use clap::Parser;
use proctor_capture::capture::traits::MediaDevices;
use proctor_capture::render::page::VirtualPage;
use proctor_capture::session::WebSocketTransport;
use proctor_capture::{Session, SessionConfig};
use std::path::PathBuf;
use std::sync::Arc;

/// Headless capture agent serving a coordinator over WebSocket
#[derive(Debug, Parser)]
#[command(name = "proctor-agent", version)]
struct Args {
    /// Session config file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Coordinator WebSocket URL
    #[arg(long, default_value = "ws://127.0.0.1:9321")]
    coordinator: String,
}

#[cfg(feature = "native-camera")]
fn media_devices() -> Arc<dyn MediaDevices> {
    use proctor_capture::capture::webcam::{get_cameras, NativeCameraDevices};

    for camera in get_cameras() {
        tracing::info!("Found camera {} ({})", camera.name, camera.id);
    }
    Arc::new(NativeCameraDevices::new())
}

#[cfg(not(feature = "native-camera"))]
fn media_devices() -> Arc<dyn MediaDevices> {
    tracing::info!("Using synthetic capture devices");
    Arc::new(proctor_capture::capture::SyntheticDevices::new())
}

#[tokio::main]
async fn main() -> Result<()> {
    proctor_capture::init_tracing();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => SessionConfig::default(),
    };

    let page = Arc::new(VirtualPage::new());
    let transport = Arc::new(WebSocketTransport::new(&args.coordinator));
    let mut session = Session::new(&config, media_devices(), page, transport);

    session
        .start()
        .await
        .context("Coordinator is unreachable")?;

    let outcome = tokio::select! {
        result = session.run() => result.context("Session ended"),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
            Ok(())
        }
    };

    session.shutdown().await;
    outcome
}
