use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use plotforge_core::{
    ConfigState, DestinationProvider, FileMover, MoveRegistry, MoveScheduler, PlotOrchestrator,
    PlotSupervisor, ProcessPlotLauncher, StatsLog, StopSignal, SysinfoSpaceProbe,
    SysinfoVolumeSource, VolumeSource, STATS_LOG_NAME, STOP_FILE_NAME, TRANSCRIPT_DIR_NAME,
};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path: env var, first argument, then default
    let config_path = std::env::var("PLOTFORGE_CONFIG")
        .map(PathBuf::from)
        .ok()
        .or_else(|| std::env::args().nth(1).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("plotforge.toml"));

    info!("Loading settings from {:?}", config_path);
    let config = Arc::new(
        ConfigState::load(&config_path)
            .with_context(|| format!("Failed to load settings from {:?}", config_path))?,
    );

    let plotter_exe = config
        .settings()
        .plotter_exe
        .context("plotter_exe must be set in the settings file")?;
    info!("Using plotter executable: {:?}", plotter_exe);

    let registry = Arc::new(MoveRegistry::new());
    let volume_source: Arc<dyn VolumeSource> = Arc::new(SysinfoVolumeSource::new());
    let provider = Arc::new(DestinationProvider::new(
        volume_source,
        Arc::clone(&registry),
    ));
    let mover = Arc::new(FileMover::new(Arc::new(SysinfoSpaceProbe::new())));
    let scheduler = Arc::new(MoveScheduler::new(Arc::clone(&registry), mover));
    let launcher = Arc::new(ProcessPlotLauncher::new(plotter_exe));
    let supervisor = Arc::new(PlotSupervisor::new(launcher, TRANSCRIPT_DIR_NAME));
    let stats = Arc::new(StatsLog::new(STATS_LOG_NAME));
    let stop = Arc::new(StopSignal::new(STOP_FILE_NAME));

    let orchestrator = PlotOrchestrator::new(
        config,
        provider,
        Arc::clone(&scheduler),
        supervisor,
        stats,
        Arc::clone(&stop),
    );

    // First Ctrl-C stops new launches and lets running work drain; a
    // second one cancels in-flight transfers.
    {
        let stop = Arc::clone(&stop);
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C: no new jobs will launch; running work drains");
                stop.request();
                if signal::ctrl_c().await.is_ok() {
                    info!("Second Ctrl-C: cancelling in-flight transfers");
                    scheduler.cancel_active_transfers();
                }
            }
        });
    }

    orchestrator.run().await;
    Ok(())
}
