//! Host bootstrap and the serve loop.

use std::panic;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use ortho_config::{OrthoConfig as _, OrthoError};
use thiserror::Error;
use tracing::info;

use liveplugin_config::Config;
use liveplugin_runner::{
    DisposeError, HostContext, LivePluginEngine, OutcomeSink, RunHandle, UiDispatcher, UiLoop,
};

use crate::HOST_TARGET;
use crate::health::HealthReporter;
use crate::shutdown::{ShutdownError, ShutdownSignal};
use crate::telemetry::{self, TelemetryError, TelemetryHandle};

/// How often the UI loop re-checks for shutdown while idle.
const UI_TICK: Duration = Duration::from_millis(50);

/// Loads the host configuration.
pub trait ConfigLoader: Send + Sync {
    /// Loads the configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that reads defaults, files, environment and command line.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader that hands out a fixed configuration.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps an already resolved configuration.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
}

/// A bootstrapped host.
///
/// The thread that called [`bootstrap_with`] is the UI thread: scripts that
/// show messages block until [`Host::serve`] (or [`Host::pump_ui`]) runs their
/// action there.
pub struct Host {
    config: Config,
    engine: LivePluginEngine,
    telemetry: TelemetryHandle,
    reporter: Arc<dyn HealthReporter>,
    ui_loop: UiLoop,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("config", &self.config)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl Host {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Accessor for the engine, for triggering runs.
    #[must_use]
    pub const fn engine(&self) -> &LivePluginEngine {
        &self.engine
    }

    /// Accessor for the telemetry handle.
    #[must_use]
    pub const fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Queues a run of every enabled plugin when the configuration asks for
    /// it. Returns the handles of the queued runs.
    ///
    /// Do not wait on the handles from the UI thread without pumping it.
    pub fn run_startup_plugins(&self) -> Vec<RunHandle> {
        if !self.config.run_all_plugins_on_startup() {
            info!(target: HOST_TARGET, "running plugins on startup is disabled");
            return Vec::new();
        }
        let handles = self
            .engine
            .run_all_plugins(true, &HostContext::without_project());
        self.reporter.startup_runs_queued(handles.len());
        handles
    }

    /// Runs queued UI actions without blocking. Returns how many ran.
    pub fn pump_ui(&self) -> usize {
        self.ui_loop.pump()
    }

    /// Services the UI thread until `shutdown` fires, then drains every lane
    /// and disposes all bindings.
    ///
    /// The UI loop keeps running while the lanes drain, so a script that is
    /// mid-way through showing a message can still finish.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError`] when the listener could not be installed.
    /// The engine is shut down in that case too.
    pub fn serve(self, shutdown: &dyn ShutdownSignal) -> Result<Vec<DisposeError>, ShutdownError> {
        let stop = AtomicBool::new(false);
        let waited = thread::scope(|scope| {
            let listener = scope.spawn(|| {
                let outcome = shutdown.wait();
                stop.store(true, Ordering::SeqCst);
                outcome
            });
            self.ui_loop
                .run_until(&|| stop.load(Ordering::SeqCst), UI_TICK);
            match listener.join() {
                Ok(outcome) => outcome,
                Err(payload) => panic::resume_unwind(payload),
            }
        });

        info!(target: HOST_TARGET, "shutting down live plugin engine");
        let engine = self.engine.clone();
        let failures = thread::scope(|scope| {
            let draining = scope.spawn(move || engine.shutdown());
            self.ui_loop.run_until(&|| draining.is_finished(), UI_TICK);
            match draining.join() {
                Ok(failures) => failures,
                Err(payload) => panic::resume_unwind(payload),
            }
        });
        self.reporter.shutdown_completed(&failures);
        waited.map(|()| failures)
    }
}

/// Bootstraps the host using the supplied collaborators.
///
/// Must be called on the thread that will act as the UI thread.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    sink: Arc<dyn OutcomeSink>,
) -> Result<Host, BootstrapError> {
    reporter.bootstrap_starting();

    let config = match loader.load() {
        Ok(config) => config,
        Err(source) => {
            let error = BootstrapError::Configuration { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let telemetry = match telemetry::initialise(&config) {
        Ok(handle) => handle,
        Err(source) => {
            let error = BootstrapError::Telemetry { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let (dispatcher, ui_loop) = UiDispatcher::channel();
    let engine = LivePluginEngine::builder(config.plugins_root().into_std_path_buf())
        .disabled_plugins(config.disabled_plugins())
        .ui(Arc::new(dispatcher))
        .sink(sink)
        .build();
    reporter.bootstrap_succeeded(&config);

    Ok(Host {
        config,
        engine,
        telemetry,
        reporter,
        ui_loop,
    })
}
