//! Failure values produced by every stage of a plugin run.
//!
//! There are two kinds of failure. Anything that goes wrong before the
//! script body starts is an [`AnError::Loading`], anything raised while the
//! body executes (or while a superseded binding is disposed) is an
//! [`AnError::Running`] tagged with the plugin id. Underlying causes are kept
//! behind an `Arc` so outcomes can be cloned and fanned out to several
//! observers.

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// Shared, thread-safe handle to the original cause of a failure.
pub type ErrorSource = Arc<dyn StdError + Send + Sync>;

/// Result of one run attempt. Produced exactly once per attempt.
pub type RunOutcome = Result<(), AnError>;

/// Errors surfaced by the plugin runner.
#[derive(Debug, Clone, Error)]
pub enum AnError {
    /// The plugin could not be prepared for execution.
    #[error("{message}")]
    Loading {
        /// Human-readable description of the failure.
        message: String,
        /// Optional underlying cause.
        #[source]
        source: Option<ErrorSource>,
    },

    /// The plugin failed while its script body was executing.
    #[error("plugin '{plugin_id}' failed: {message}")]
    Running {
        /// Id of the plugin that failed.
        plugin_id: String,
        /// Human-readable description of the failure.
        message: String,
        /// Optional underlying cause.
        #[source]
        source: Option<ErrorSource>,
    },
}

impl AnError {
    /// Builds a loading error without an underlying cause.
    #[must_use]
    pub fn loading(message: impl Into<String>) -> Self {
        Self::Loading {
            message: message.into(),
            source: None,
        }
    }

    /// Builds a loading error that keeps the original cause.
    #[must_use]
    pub fn loading_with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::Loading {
            message: message.into(),
            source: Some(Arc::from(source.into())),
        }
    }

    /// Builds a running error whose message is taken from the cause.
    #[must_use]
    pub fn running(
        plugin_id: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        let source: ErrorSource = Arc::from(source.into());
        Self::Running {
            plugin_id: plugin_id.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Builds a running error from a plain message.
    #[must_use]
    pub fn running_message(plugin_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Running {
            plugin_id: plugin_id.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Returns the human-readable message without the plugin prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Loading { message, .. } | Self::Running { message, .. } => message.as_str(),
        }
    }

    /// Returns the id of the failing plugin for running errors.
    #[must_use]
    pub fn plugin_id(&self) -> Option<&str> {
        match self {
            Self::Loading { .. } => None,
            Self::Running { plugin_id, .. } => Some(plugin_id.as_str()),
        }
    }

    /// Returns `true` for failures raised before the script body started.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading { .. })
    }

    /// Returns the preserved cause, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&ErrorSource> {
        match self {
            Self::Loading { source, .. } | Self::Running { source, .. } => source.as_ref(),
        }
    }
}
