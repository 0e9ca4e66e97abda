//! firewatchd - fire/smoke detection HTTP service
//!
//! This daemon:
//! 1. Loads configuration (JSON file, environment, flags)
//! 2. Registers detector backends and selects the configured one
//! 3. Serves /predict, /history, /results and /live_feed until Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use firewatch::{
    api::{ApiConfig, ApiServer, AppState},
    config::FirewatchConfig,
    detect::{BackendRegistry, StubBackend},
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON config file (takes the place of FIREWATCH_CONFIG).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Listen address, overriding config and FIREWATCH_API_ADDR.
    #[arg(long, value_name = "HOST:PORT")]
    addr: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => FirewatchConfig::load_from(Some(path))?,
        None => FirewatchConfig::load()?,
    };
    if let Some(addr) = args.addr {
        config.api_addr = addr;
    }

    let registry = build_registry(&config)?;
    let detector = registry
        .default_backend()
        .ok_or_else(|| anyhow!("no detector backend registered"))?;
    log::info!(
        "detector backend '{}' selected (available: {})",
        config.detector.backend,
        registry.list().join(", ")
    );

    let state = Arc::new(AppState::open(&config, detector)?);
    let api_handle = ApiServer::new(ApiConfig::from_config(&config), state).spawn()?;
    log::info!("firewatchd listening on {}", api_handle.addr);
    log::info!(
        "results under {}, history at {}",
        config.storage.result_dir.display(),
        config.storage.history_path.display()
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("firewatchd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}

fn build_registry(config: &FirewatchConfig) -> Result<BackendRegistry> {
    let detector = &config.detector;
    let mut registry = BackendRegistry::new();
    registry.register(StubBackend::new(detector.class_names.as_slice()));

    #[cfg(feature = "backend-tract")]
    if detector.backend == "tract" {
        registry.register(firewatch::detect::TractBackend::new(
            &detector.model_path,
            detector.inference_size,
            detector.class_names.as_slice(),
        )?);
    }

    registry.set_default(&detector.backend)?;
    if let Some(backend) = registry.default_backend() {
        backend
            .lock()
            .map_err(|_| anyhow!("detector lock poisoned"))?
            .warm_up()?;
    }
    Ok(registry)
}
