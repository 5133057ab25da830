//! Long-lived host process for live plugins.
//!
//! The host loads [`liveplugin_config::Config`], installs structured
//! telemetry, builds a [`liveplugin_runner::LivePluginEngine`] whose UI
//! hand-offs land on the bootstrapping thread, optionally runs every plugin
//! once, and then services that thread until a termination signal arrives.
//! Shutdown drains the per-plugin lanes and disposes every live binding
//! before the process exits.

mod bootstrap;
mod health;
mod shutdown;
mod telemetry;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Host, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use shutdown::{ShutdownError, ShutdownSignal, SystemShutdownSignal};
pub use telemetry::{TelemetryError, TelemetryHandle};

const HOST_TARGET: &str = "liveplugin_host";

#[cfg(test)]
mod tests;
