//! Shared configuration for the live plugin host.
//!
//! Values are layered by [`ortho_config`]: built-in defaults, then a
//! `.liveplugin.toml` file (or the file named by `--config-path`), then
//! `LIVEPLUGIN_*` environment variables, then command-line flags.
//!
//! ```toml
//! plugins_root = "/home/me/.local/share/liveplugin/live-plugins"
//! disabled_plugins = ["experimental"]
//! run_all_plugins_on_startup = false
//! log_filter = "liveplugin_runner=debug,info"
//! log_format = "json"
//! ```

mod defaults;
mod logging;

use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    APPLICATION_DIR, DEFAULT_LOG_FILTER, PLUGINS_DIR, default_log_filter,
    default_log_filter_string, default_log_format, default_plugins_root,
    default_run_all_plugins_on_startup,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Resolved host configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "LIVEPLUGIN")]
pub struct Config {
    /// Directory whose immediate sub-directories are live plugins.
    #[serde(default)]
    pub plugins_root: Option<Utf8PathBuf>,
    /// Plugin ids that are never run, whether triggered directly or by a
    /// run-all, and that may not be used as dependencies of other plugins.
    #[serde(default)]
    #[ortho_config(merge_strategy = "append")]
    pub disabled_plugins: Vec<String>,
    /// Runs every discovered plugin when the host starts.
    #[serde(default = "default_run_all_plugins_on_startup")]
    #[ortho_config(default = true)]
    pub run_all_plugins_on_startup: bool,
    /// `tracing` filter expression applied by the host.
    #[serde(default = "default_log_filter_string")]
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Output format used by the host subscriber.
    #[serde(default = "default_log_format")]
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            plugins_root: None,
            disabled_plugins: Vec::new(),
            run_all_plugins_on_startup: default_run_all_plugins_on_startup(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Directory scanned for plugins, falling back to [`default_plugins_root`].
    #[must_use]
    pub fn plugins_root(&self) -> Utf8PathBuf {
        self.plugins_root
            .clone()
            .unwrap_or_else(default_plugins_root)
    }

    /// Ids of administratively disabled plugins.
    #[must_use]
    pub fn disabled_plugins(&self) -> BTreeSet<String> {
        self.disabled_plugins
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// Whether the host runs every plugin at startup.
    #[must_use]
    pub const fn run_all_plugins_on_startup(&self) -> bool {
        self.run_all_plugins_on_startup
    }

    /// Filter expression for the tracing subscriber.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Output format for the tracing subscriber.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Returns a copy pointing at a different plugins root.
    #[must_use]
    pub fn with_plugins_root(mut self, root: impl AsRef<Utf8Path>) -> Self {
        self.plugins_root = Some(root.as_ref().to_path_buf());
        self
    }
}
