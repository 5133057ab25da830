//! Entry point for the `liveplugin-host` binary.

use std::process::ExitCode;
use std::sync::Arc;

use liveplugin_host::{
    StructuredHealthReporter, SystemConfigLoader, SystemShutdownSignal, bootstrap_with,
};
use liveplugin_runner::TracingOutcomeSink;

fn main() -> ExitCode {
    let Ok(host) = bootstrap_with(
        &SystemConfigLoader,
        Arc::new(StructuredHealthReporter::new()),
        Arc::new(TracingOutcomeSink::new()),
    ) else {
        return ExitCode::FAILURE;
    };
    drop(host.run_startup_plugins());
    match host.serve(&SystemShutdownSignal::new()) {
        Ok(failures) if failures.is_empty() => ExitCode::SUCCESS,
        Ok(_) | Err(_) => ExitCode::FAILURE,
    }
}
