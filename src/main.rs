use acciwatch::api::{AppState, RestApi};
use acciwatch::config::{self, PipelineMode};
use acciwatch::db::repositories::CamerasRepository;
use acciwatch::db::DatabaseService;
use acciwatch::detection::DetectionService;
use acciwatch::messaging::BroadcastNotifier;
use anyhow::Result;
use gstreamer as gst;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;

const CONFIG_ENV: &str = "ACCIWATCH_CONFIG";

fn config_path() -> Option<PathBuf> {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
}

async fn run_app() -> Result<()> {
    let config = config::load_config(config_path().as_deref())?;

    // Initialize logging; RUST_LOG wins over the configured level
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.api.log_level.as_str()),
    )
    .init();
    info!("Starting accident detection dashboard");
    info!("Configuration loaded");

    let database = DatabaseService::new(&config.database).await?;
    let db_pool = database.pool.clone();

    // Only client-capture sessions decode video locally
    if config.detection.mode == PipelineMode::ClientCapture {
        gst::init()?;
        info!("GStreamer initialized successfully");
    }

    let notifier = BroadcastNotifier::new(64);
    let (detection, detection_task) =
        DetectionService::spawn(config.detection.clone(), Arc::new(notifier.clone()))?;

    let state = AppState {
        db_pool: db_pool.clone(),
        catalog: Arc::new(CamerasRepository::new(db_pool)),
        detection: detection.clone(),
        notifier,
    };
    let http_server = RestApi::new(&config.api, config.detection.public_dir.clone(), state);

    tokio::select! {
        result = http_server.run() => {
            if let Err(e) = result {
                error!("API server stopped: {}", e);
            }
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutting down...");
        }
    }

    detection.shutdown();
    if let Err(e) = detection_task.await {
        error!("Detection service did not stop cleanly: {}", e);
    }

    Ok(())
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run_app()) {
        eprintln!("Application error: {}", e);
        std::process::exit(1);
    }
}
