use anyhow::{Context, Result};
use rollcall_core::{AttendanceLedger, ColourRatioClassifier, IdentityMatcher, RegistryStore, Roster};
use rollcall_hw::SourceHandle;
use rollcall_vision::{FaceBodyLocator, OnnxFaceAnalyzer};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

mod attendance;
mod config;
mod http;
mod pipeline;

use attendance::AttendanceDesk;
use config::Config;
use pipeline::{Pipeline, PipelineSettings};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %format!("{e:#}"), "rollcalld failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(
        data_dir = %config.data_dir.display(),
        model_dir = %config.model_dir.display(),
        camera = %config.camera_device,
        "rollcalld starting"
    );

    let ledger = AttendanceLedger::open(config.ledger_dir()).context("failed to open attendance ledger")?;
    tracing::info!(path = %ledger.path().display(), format = %ledger.format(), "ledger ready");
    let roster = Roster::open(config.roster_path()).context("failed to open roster")?;
    let store = RegistryStore::open(&config.registry_path()).context("failed to open registry store")?;
    let analyzer = OnnxFaceAnalyzer::load(&config.model_dir).context("failed to load face models")?;
    let desk = AttendanceDesk::new(
        Box::new(analyzer),
        store,
        roster,
        ledger,
        IdentityMatcher::new(config.match_threshold),
    )
    .context("failed to load identity registry")?;

    let source = open_camera(&config)?;
    discard_warmup(&source, config.warmup_frames);

    let locator = FaceBodyLocator::load(&config.model_dir).context("failed to load subject locator")?;
    let pipeline = Pipeline::start(
        Arc::new(source),
        Box::new(locator),
        Box::new(ColourRatioClassifier::default()),
        PipelineSettings {
            buffer_capacity: config.buffer_capacity,
            pop_timeout: config.pop_timeout(),
            stability: config.stability(),
            required_hits: config.required_hits,
            locate_every: config.locate_every,
            ..PipelineSettings::default()
        },
    )
    .context("failed to start pipeline")?;

    let shutdown = Arc::new(Notify::new());
    let state = http::AppState {
        desk: Arc::new(desk),
        gate: pipeline.status(),
        shutdown: Arc::clone(&shutdown),
    };

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "rollcalld ready");

    let served = axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await;

    tracing::info!(
        dropped_frames = pipeline.dropped_frames(),
        handed_off = pipeline.source().is_released(),
        "stopping pipeline"
    );
    tokio::task::spawn_blocking(move || pipeline.shutdown())
        .await
        .context("pipeline shutdown task failed")?;
    served.context("HTTP server error")?;

    tracing::info!("rollcalld stopped");
    Ok(())
}

async fn shutdown_signal(requested: Arc<Notify>) {
    tokio::select! {
        _ = requested.notified() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "failed to listen for ctrl-c");
                requested.notified().await;
            } else {
                tracing::info!("received ctrl-c");
            }
        }
    }
    tracing::info!("shutting down");
}

#[cfg(feature = "v4l2")]
fn open_camera(config: &Config) -> Result<SourceHandle> {
    let camera = rollcall_hw::Camera::open(&config.camera_device, config.frame_width, config.frame_height)
        .with_context(|| format!("failed to open camera {}", config.camera_device))?;
    tracing::info!(
        device = %config.camera_device,
        width = camera.width,
        height = camera.height,
        format = ?camera.pixel_format(),
        "camera opened"
    );
    Ok(SourceHandle::new(camera))
}

#[cfg(not(feature = "v4l2"))]
fn open_camera(_config: &Config) -> Result<SourceHandle> {
    anyhow::bail!("rollcalld was built without the v4l2 feature; no camera backend available")
}

/// Drop the first frames while exposure settles.
fn discard_warmup(source: &SourceHandle, frames: usize) {
    if frames == 0 {
        return;
    }
    tracing::info!(count = frames, "discarding warmup frames");
    for _ in 0..frames {
        if let Err(e) = source.grab() {
            tracing::debug!(error = %e, "warmup grab failed");
        }
    }
}
