//! Run states and the observer that receives them.

use std::fmt;
use std::sync::Arc;

use crate::error::{AnError, RunOutcome};

const REPORT_TARGET: &str = "liveplugin_runner::report";

/// Lifecycle of one run attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    /// The attempt has been queued but its lane has not picked it up.
    NotStarted,
    /// The entry script is being located, resolved and compiled.
    SettingUp,
    /// Setup succeeded; the binding is being issued.
    Ready,
    /// The script body is executing.
    Running,
    /// The script body completed.
    Succeeded,
    /// The script body raised an error.
    Failed,
    /// Setup failed; the script body never started.
    SetupFailed,
}

impl RunState {
    /// Returns the state's stable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::SettingUp => "setting_up",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::SetupFailed => "setup_failed",
        }
    }

    /// Returns `true` for states that end an attempt.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::SetupFailed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observer notified about every run attempt.
pub trait OutcomeSink: Send + Sync {
    /// Invoked on every state transition of an attempt.
    fn run_state_changed(&self, plugin_id: &str, state: RunState);

    /// Invoked exactly once per attempt with its outcome.
    fn run_finished(&self, plugin_id: &str, outcome: &RunOutcome);

    /// Invoked when disposing a superseded binding failed.
    fn disposal_failed(&self, plugin_id: &str, error: &AnError);

    /// Invoked when a script shows a message to the user.
    fn plugin_message(&self, plugin_id: &str, message: &str);
}

impl<T> OutcomeSink for Arc<T>
where
    T: OutcomeSink + ?Sized,
{
    fn run_state_changed(&self, plugin_id: &str, state: RunState) {
        (**self).run_state_changed(plugin_id, state);
    }

    fn run_finished(&self, plugin_id: &str, outcome: &RunOutcome) {
        (**self).run_finished(plugin_id, outcome);
    }

    fn disposal_failed(&self, plugin_id: &str, error: &AnError) {
        (**self).disposal_failed(plugin_id, error);
    }

    fn plugin_message(&self, plugin_id: &str, message: &str) {
        (**self).plugin_message(plugin_id, message);
    }
}

/// Default sink that records every event using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingOutcomeSink;

impl TracingOutcomeSink {
    /// Builds a new sink.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl OutcomeSink for TracingOutcomeSink {
    fn run_state_changed(&self, plugin_id: &str, state: RunState) {
        tracing::debug!(
            target: REPORT_TARGET,
            event = "run_state_changed",
            plugin = plugin_id,
            state = state.as_str(),
            "plugin run state changed"
        );
    }

    fn run_finished(&self, plugin_id: &str, outcome: &RunOutcome) {
        match outcome {
            Ok(()) => tracing::info!(
                target: REPORT_TARGET,
                event = "run_finished",
                plugin = plugin_id,
                "plugin run succeeded"
            ),
            Err(error) if error.is_loading() => tracing::warn!(
                target: REPORT_TARGET,
                event = "run_finished",
                plugin = plugin_id,
                error = %error,
                "plugin failed to load"
            ),
            Err(error) => tracing::error!(
                target: REPORT_TARGET,
                event = "run_finished",
                plugin = plugin_id,
                error = %error,
                "plugin run failed"
            ),
        }
    }

    fn disposal_failed(&self, plugin_id: &str, error: &AnError) {
        tracing::warn!(
            target: REPORT_TARGET,
            event = "disposal_failed",
            plugin = plugin_id,
            error = %error,
            "disposing previous binding failed"
        );
    }

    fn plugin_message(&self, plugin_id: &str, message: &str) {
        tracing::info!(
            target: REPORT_TARGET,
            event = "plugin_message",
            plugin = plugin_id,
            text = message,
            "plugin message"
        );
    }
}
