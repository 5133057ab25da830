use camino::Utf8PathBuf;
use std::env;

use crate::logging::LogFormat;

/// Directory name created under the user data directory.
pub const APPLICATION_DIR: &str = "liveplugin";

/// Name of the directory holding one sub-directory per live plugin.
pub const PLUGINS_DIR: &str = "live-plugins";

/// Default log filter expression used by the host.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default log filter expression used by the host.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the host.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

/// Plugins are run on host startup unless configured otherwise.
#[must_use]
pub const fn default_run_all_plugins_on_startup() -> bool {
    true
}

/// Computes the default plugins root.
///
/// Uses the platform data directory when one is known and falls back to the
/// temporary directory otherwise.
#[must_use]
pub fn default_plugins_root() -> Utf8PathBuf {
    let mut base = dirs::data_dir()
        .and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
        .unwrap_or_else(fallback_base_directory);
    base.push(APPLICATION_DIR);
    base.push(PLUGINS_DIR);
    base
}

fn fallback_base_directory() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(env::temp_dir()).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}
