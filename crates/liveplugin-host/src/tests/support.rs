//! Shared fixtures for the host test suites.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use ortho_config::{OrthoConfig as _, OrthoError};

use liveplugin_config::Config;
use liveplugin_runner::{AnError, OutcomeSink, RunHandle, RunOutcome, RunState};

use crate::bootstrap::ConfigLoader;
use crate::shutdown::{ShutdownError, ShutdownSignal};

/// Writes a Rhai plugin that shows a greeting, leaves a marker and cleans up
/// on disposal.
pub fn write_greeting_plugin(root: &Path, id: &str) {
    let dir = root.join(id);
    fs::create_dir_all(&dir).expect("create plugin dir");
    fs::write(
        dir.join("plugin.rhai"),
        format!(
            "show(\"hello from {id}\");\n\
             write_file(pluginPath + \"/ran.txt\", \"ran\");\n\
             let dir = pluginPath;\n\
             pluginDisposable.on_dispose(|| write_file(dir + \"/disposed.txt\", \"disposed\"));\n"
        ),
    )
    .expect("write plugin script");
}

/// Builds a configuration rooted at `root`.
pub fn config_for(root: &Path) -> Config {
    Config::default().with_plugins_root(root.to_str().expect("temp path is UTF-8"))
}

/// Sink that records the messages plugins show.
#[derive(Default)]
pub struct MessageSink {
    messages: Mutex<Vec<(String, String)>>,
}

impl MessageSink {
    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().expect("sink lock").clone()
    }
}

impl OutcomeSink for MessageSink {
    fn run_state_changed(&self, _plugin_id: &str, _state: RunState) {}

    fn run_finished(&self, _plugin_id: &str, _outcome: &RunOutcome) {}

    fn disposal_failed(&self, _plugin_id: &str, _error: &AnError) {}

    fn plugin_message(&self, plugin_id: &str, message: &str) {
        self.messages
            .lock()
            .expect("sink lock")
            .push((plugin_id.to_owned(), message.to_owned()));
    }
}

/// Signal that fires once every queued run has finished.
pub struct AfterRuns {
    handles: Mutex<Vec<RunHandle>>,
    outcomes: Mutex<Vec<RunOutcome>>,
}

impl AfterRuns {
    pub fn new(handles: Vec<RunHandle>) -> Self {
        Self {
            handles: Mutex::new(handles),
            outcomes: Mutex::new(Vec::new()),
        }
    }

    pub fn into_outcomes(self) -> Vec<RunOutcome> {
        self.outcomes.into_inner().expect("outcomes lock")
    }
}

impl ShutdownSignal for AfterRuns {
    fn wait(&self) -> Result<(), ShutdownError> {
        let handles = std::mem::take(&mut *self.handles.lock().expect("handles lock"));
        let finished: Vec<RunOutcome> = handles.into_iter().map(RunHandle::wait).collect();
        self.outcomes.lock().expect("outcomes lock").extend(finished);
        Ok(())
    }
}

/// Signal whose listener cannot be installed.
pub struct RefusedSignal;

impl ShutdownSignal for RefusedSignal {
    fn wait(&self) -> Result<(), ShutdownError> {
        Err(ShutdownError::Install {
            source: io::Error::other("signals unavailable"),
        })
    }
}

/// Loader that fails on an unparseable log format.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load_from_iter([
            OsString::from("liveplugin-host"),
            OsString::from("--log-format"),
            OsString::from("yaml"),
        ])
    }
}
