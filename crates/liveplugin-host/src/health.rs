//! Structured health reporting for host lifecycle events.

use std::sync::Arc;

use liveplugin_config::Config;
use liveplugin_runner::DisposeError;

use crate::bootstrap::BootstrapError;

/// Observer notified as the host starts, serves and stops.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked after the startup runs have been queued.
    fn startup_runs_queued(&self, count: usize);

    /// Invoked once every binding has been disposed at shutdown.
    fn shutdown_completed(&self, failures: &[DisposeError]);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter + ?Sized,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn startup_runs_queued(&self, count: usize) {
        (**self).startup_runs_queued(count);
    }

    fn shutdown_completed(&self, failures: &[DisposeError]) {
        (**self).shutdown_completed(failures);
    }
}

/// Reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: "liveplugin_host::health",
            event = "bootstrap_starting",
            "starting host bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: "liveplugin_host::health",
            event = "bootstrap_succeeded",
            plugins_root = %config.plugins_root(),
            disabled_plugins = ?config.disabled_plugins(),
            log_filter = %config.log_filter(),
            log_format = %config.log_format(),
            "host bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: "liveplugin_host::health",
            event = "bootstrap_failed",
            error = %error,
            "host bootstrap failed"
        );
    }

    fn startup_runs_queued(&self, count: usize) {
        tracing::info!(
            target: "liveplugin_host::health",
            event = "startup_runs_queued",
            count,
            "queued startup plugin runs"
        );
    }

    fn shutdown_completed(&self, failures: &[DisposeError]) {
        if failures.is_empty() {
            tracing::info!(
                target: "liveplugin_host::health",
                event = "shutdown_completed",
                "host shut down cleanly"
            );
            return;
        }
        for failure in failures {
            tracing::warn!(
                target: "liveplugin_host::health",
                event = "shutdown_completed",
                plugin = %failure.name,
                error = %failure,
                "binding disposal failed during shutdown"
            );
        }
    }
}
