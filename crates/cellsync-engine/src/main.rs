//! Cellsync engine binary.
//!
//! Builds a grid of goo cells, seeds it, and ticks it until the goo has
//! settled or the tick limit is reached, logging every settled tick.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `cellsync.yaml` (or the path given as the
//!    first argument)
//! 2. Initialize structured logging (tracing)
//! 3. Build and wire the grid, then seed it
//! 4. Create the tick coordinator and the observation ledger
//! 5. Start every cell
//! 6. Run the simulation loop
//! 7. Stop the cells and log the result

mod error;
mod goo;
mod render_callback;

use std::path::{Path, PathBuf};

use cellsync_core::config::{CellsyncConfig, LogFormat, LoggingConfig};
use cellsync_core::{Grid, Ledger, TickCoordinator, runner};
use cellsync_types::Observation;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::goo::Goo;
use crate::render_callback::RenderCallback;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "cellsync.yaml";

/// Application entry point for the engine.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config_path = std::env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let (config, loaded_from_file) = load_config(&config_path)?;

    // 2. Initialize structured logging.
    init_logging(&config.logging)?;
    info!("cellsync-engine starting");
    if loaded_from_file {
        info!(path = %config_path.display(), "Configuration loaded");
    } else {
        info!(path = %config_path.display(), "Config file not found, using defaults");
    }
    info!(
        width = config.grid.width,
        height = config.grid.height,
        seeds = config.grid.seeds.len(),
        propagation = ?config.coordinator.propagation,
        dispatch_timeout_ms = config.coordinator.dispatch_timeout_ms,
        settle_timeout_ms = config.coordinator.settle_timeout_ms,
        "Engine configured"
    );

    // 3. Build and seed the grid.
    let mut grid = Grid::<Goo>::rectangular(config.grid.width, config.grid.height)
        .map_err(EngineError::from)?;
    for seed in &config.grid.seeds {
        grid.set_state(seed.x, seed.y, Goo::Gooed)
            .map_err(EngineError::from)?;
    }

    // 4. Coordinator and ledger.
    let mut coordinator = TickCoordinator::new(config.coordinator.clone());
    let ledger = config
        .observer
        .enabled
        .then(|| Ledger::<Goo>::new(config.observer.ledger_capacity));
    let observer = ledger
        .as_ref()
        .map(|ledger| tokio::spawn(log_observations(ledger.subscribe())));

    // 5. Start every cell.
    grid.start(&mut coordinator, ledger.as_ref())
        .map_err(EngineError::from)?;

    // 6. Run.
    let mut callback = RenderCallback::new();
    let outcome =
        runner::run_simulation(&mut coordinator, &grid, &config.run, &mut callback).await;

    // 7. Shut down after the last settled tick, then report.
    grid.stop().await;
    drop(ledger);
    if let Some(observer) = observer {
        if let Err(err) = observer.await {
            warn!(%err, "Observation logger ended abnormally");
        }
    }

    let result = outcome.map_err(EngineError::from)?;
    runner::log_simulation_end(&result);
    info!(
        end_reason = ?result.end_reason,
        total_ticks = result.total_ticks,
        final_grid = ?callback.last(),
        "cellsync-engine shutdown complete"
    );

    Ok(())
}

/// Load configuration from `path`, falling back to defaults when the file
/// does not exist. Returns whether the file was read.
fn load_config(path: &Path) -> Result<(CellsyncConfig, bool), EngineError> {
    if path.exists() {
        Ok((CellsyncConfig::from_file(path)?, true))
    } else {
        Ok((CellsyncConfig::parse("")?, false))
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_logging(logging: &LoggingConfig) -> Result<(), EngineError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = match logging.format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| EngineError::Logging {
        message: format!("{e}"),
    })
}

/// Log every committed change until the ledger closes.
async fn log_observations(mut observations: broadcast::Receiver<Observation<Goo>>) {
    loop {
        match observations.recv().await {
            Ok(observation) => match serde_json::to_string(&observation) {
                Ok(json) => debug!(observation = %json, "State committed"),
                Err(e) => warn!(error = %e, "failed to serialize observation"),
            },
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Observation logger fell behind, entries dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
