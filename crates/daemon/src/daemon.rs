//! Daemon startup and main loop for the kiosk player
//!
//! Provides the daemon entry point, startup sequence, and the dispatch loop
//! that turns recipe ticks into running supervisors.

use crate::catalog::{Catalog, CatalogError};
use crate::config::{Config, ConfigError, DispatchMode};
use crate::layers::LayerAllocator;
use crate::probe::{DurationProbe, FfprobeDuration};
use crate::process::{sweep_by_name, ProcessRegistry};
use crate::sequencer::{Recipe, RecipeError, RecipeSequencer, Tick};
use crate::startup::{run_startup_checks, StartupError};
use crate::supervisor::{PlaybackContext, Supervisor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Catalog could not be loaded
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Recipe error: {0}")]
    Recipe(#[from] RecipeError),

    /// A background task panicked or was cancelled
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Counts reported when the dispatch loop stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub skipped: u64,
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Config,
    catalog: Arc<Catalog>,
    recipe: Recipe,
    context: Arc<PlaybackContext>,
}

impl Daemon {
    /// Initialize the daemon with configuration from file
    ///
    /// This performs the full startup sequence:
    /// 1. Load config from file, apply environment overrides, validate
    /// 2. Run startup checks (player, media root, probe)
    /// 3. Load and probe the catalog
    pub async fn new<P: AsRef<Path>>(config_path: P) -> Result<Self, DaemonError> {
        let config = Config::load(config_path)?;
        run_startup_checks(&config)?;
        Self::from_config(config).await
    }

    /// Initialize the daemon from an already loaded configuration
    ///
    /// Skips startup checks. Catalog probing runs on the blocking pool.
    pub async fn from_config(config: Config) -> Result<Self, DaemonError> {
        let probe: Arc<dyn DurationProbe> =
            Arc::new(FfprobeDuration::new(config.probe.executable.clone()));

        let catalog = {
            let probe = Arc::clone(&probe);
            let path = config.media.catalog_path();
            let root = config.media.root.clone();
            tokio::task::spawn_blocking(move || Catalog::load(&path, &root, probe.as_ref()))
                .await
                .map_err(|e| DaemonError::Runtime(format!("catalog load task: {}", e)))??
        };

        Self::with_catalog(config, catalog, probe)
    }

    /// Assemble the daemon around an existing catalog
    ///
    /// Useful for testing when no catalog file or probe is available.
    pub fn with_catalog(
        config: Config,
        catalog: Catalog,
        probe: Arc<dyn DurationProbe>,
    ) -> Result<Self, DaemonError> {
        let recipe = Recipe::from_config(&config.recipe)?;
        if catalog.is_empty() {
            warn!("catalog has no playable clips; every recipe step will be skipped");
        }

        let context = Arc::new(PlaybackContext {
            player: config.player.clone(),
            timing: config.timing.clone(),
            allocator: Arc::new(LayerAllocator::new(&config.layers)),
            registry: Arc::new(ProcessRegistry::new(config.player.process_names.clone())),
            probe,
        });

        Ok(Self {
            config,
            catalog: Arc::new(catalog),
            recipe,
            context,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn registry(&self) -> Arc<ProcessRegistry> {
        Arc::clone(&self.context.registry)
    }

    fn dispatch_delay(&self) -> Duration {
        Duration::from_secs_f64(self.config.timing.dispatch_delay_secs.max(0.0))
    }

    /// Run the dispatch loop until the registry is aborted
    pub async fn run(&self) -> Result<DispatchStats, DaemonError> {
        self.run_with_rng(StdRng::from_entropy()).await
    }

    /// Run the dispatch loop with a caller-supplied random source
    pub async fn run_with_rng<R: Rng + Send>(&self, mut rng: R) -> Result<DispatchStats, DaemonError> {
        let registry = Arc::clone(&self.context.registry);
        let stop = registry.child_token();

        if self.config.player.sweep_on_start {
            let names = self.config.player.process_names.clone();
            tokio::task::spawn_blocking(move || sweep_by_name(&names))
                .await
                .map_err(|e| DaemonError::Runtime(format!("startup sweep task: {}", e)))?;
        }

        let mut sequencer = RecipeSequencer::new(self.recipe.clone(), Arc::clone(&self.catalog));
        let mut stats = DispatchStats::default();
        let mode = self.config.timing.dispatch_mode;
        info!(
            steps = self.recipe.len(),
            clips = self.catalog.len(),
            ?mode,
            delay_secs = self.config.timing.dispatch_delay_secs,
            "dispatch loop started"
        );

        while !stop.is_cancelled() {
            match sequencer.tick(&mut rng) {
                Tick::Dispatch { step, playlist } => {
                    stats.dispatched += 1;
                    let supervisor = Supervisor::start(Arc::clone(&self.context), playlist);
                    debug!(step, id = %supervisor.id(), "dispatched");
                    if mode == DispatchMode::Paced {
                        supervisor.await_completion().await;
                        continue;
                    }
                }
                Tick::Skip { .. } => stats.skipped += 1,
            }

            let delay = self.dispatch_delay();
            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    _ = stop.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        info!(
            dispatched = stats.dispatched,
            skipped = stats.skipped,
            "dispatch loop stopped"
        );
        Ok(stats)
    }

    /// Run until an operator interrupt, then kill every player
    ///
    /// Races the dispatch loop with SIGINT (and SIGTERM on Unix). On
    /// interrupt the registry is aborted, which cancels every supervisor,
    /// SIGKILLs their process groups and sweeps stray players by name.
    pub async fn run_until_interrupted(&self) -> Result<(), DaemonError> {
        tokio::select! {
            result = self.run() => {
                result?;
            }
            signal = shutdown_signal() => {
                info!(signal, "interrupted, stopping all players");
                let registry = self.registry();
                let killed = tokio::task::spawn_blocking(move || registry.abort_all())
                    .await
                    .map_err(|e| DaemonError::Runtime(format!("abort task: {}", e)))?;
                info!(killed, "shutdown complete");
            }
        }
        Ok(())
    }
}

async fn interrupt_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "could not listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await
}

/// Resolves with the name of the first shutdown signal received.
async fn shutdown_signal() -> &'static str {
    tokio::select! {
        _ = interrupt_signal() => "SIGINT",
        _ = terminate_signal() => "SIGTERM",
    }
}
