//! Entry points that trigger plugin runs.
//!
//! [`LivePluginEngine`] maps user-selected paths to plugin directories and
//! schedules one attempt per plugin on the [`RunSerializer`]. Everything that
//! touches plugin code happens inside the plugin's lane: the catalog snapshot
//! is taken, the runner is selected and set up, the previous binding is
//! disposed and the script runs. Each attempt produces exactly one
//! [`RunOutcome`], reported to the [`OutcomeSink`] and returned through the
//! attempt's [`RunHandle`].

use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::{ExecutablePlugin, ScriptHost, ScriptRunner, SetupContext, select_runner};
use crate::binding::{BindingManager, HostContext};
use crate::disposable::{DisposeError, panic_message};
use crate::error::{AnError, RunOutcome};
use crate::report::{OutcomeSink, RunState, TracingOutcomeSink};
use crate::resolver::EnvironmentSnapshot;
use crate::serializer::{RunSerializer, SerializerError, Ticket};
use crate::ui::{InlineUi, UiThread};
use crate::unit::{PluginCatalog, PluginUnit, plugin_folder};

const ENGINE_TARGET: &str = "liveplugin_runner::engine";

/// Which entry scripts a trigger runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    /// Main entry scripts (`plugin.*`).
    Main,
    /// Test entry scripts (`plugin-test.*`).
    Tests,
}

impl RunKind {
    fn runners(self) -> Vec<ScriptRunner> {
        match self {
            Self::Main => ScriptRunner::main_runners(),
            Self::Tests => ScriptRunner::test_runners(),
        }
    }
}

/// Result of one triggered attempt.
#[derive(Debug)]
pub struct RunHandle {
    plugin_id: String,
    state: HandleState,
}

#[derive(Debug)]
enum HandleState {
    Pending(Ticket<RunOutcome>),
    Done(RunOutcome),
}

impl RunHandle {
    fn done(plugin_id: impl Into<String>, outcome: RunOutcome) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            state: HandleState::Done(outcome),
        }
    }

    /// Plugin id the attempt was scheduled for. For paths outside the
    /// plugins root this is the path itself.
    #[must_use]
    pub fn plugin_id(&self) -> &str {
        self.plugin_id.as_str()
    }

    /// Blocks until the attempt has finished and returns its outcome.
    ///
    /// # Errors
    ///
    /// Returns the attempt's [`AnError`].
    pub fn wait(self) -> RunOutcome {
        match self.state {
            HandleState::Done(outcome) => outcome,
            HandleState::Pending(ticket) => ticket
                .wait()
                .unwrap_or_else(|error| Err(AnError::running(self.plugin_id, error))),
        }
    }
}

/// Configures a [`LivePluginEngine`].
pub struct EngineBuilder {
    plugins_root: PathBuf,
    disabled: BTreeSet<String>,
    ui: Arc<dyn UiThread>,
    sink: Arc<dyn OutcomeSink>,
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("plugins_root", &self.plugins_root)
            .field("disabled", &self.disabled)
            .finish_non_exhaustive()
    }
}

impl EngineBuilder {
    /// Plugin ids that may not be run or depended upon.
    #[must_use]
    pub fn disabled_plugins<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled = ids.into_iter().map(Into::into).collect();
        self
    }

    /// UI thread used for user-facing hand-offs. Defaults to [`InlineUi`].
    #[must_use]
    pub fn ui(mut self, ui: Arc<dyn UiThread>) -> Self {
        self.ui = ui;
        self
    }

    /// Observer of run events. Defaults to [`TracingOutcomeSink`].
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn OutcomeSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Builds the engine.
    #[must_use]
    pub fn build(self) -> LivePluginEngine {
        let host = ScriptHost::new(Arc::clone(&self.ui), Arc::clone(&self.sink));
        LivePluginEngine {
            shared: Arc::new(Shared {
                plugins_root: self.plugins_root,
                disabled: self.disabled,
                serializer: RunSerializer::new(),
                bindings: BindingManager::new(),
                sink: self.sink,
                host,
            }),
        }
    }
}

struct Shared {
    plugins_root: PathBuf,
    disabled: BTreeSet<String>,
    serializer: RunSerializer,
    bindings: BindingManager,
    sink: Arc<dyn OutcomeSink>,
    host: ScriptHost,
}

/// Runs live plugins found under a plugins root.
///
/// Clones share the same lanes and bindings.
#[derive(Clone)]
pub struct LivePluginEngine {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for LivePluginEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivePluginEngine")
            .field("plugins_root", &self.shared.plugins_root)
            .field("lanes", &self.shared.serializer.lane_count())
            .field("live_bindings", &self.shared.bindings.live_count())
            .finish()
    }
}

impl LivePluginEngine {
    /// Starts configuring an engine for `plugins_root`.
    #[must_use]
    pub fn builder(plugins_root: impl Into<PathBuf>) -> EngineBuilder {
        EngineBuilder {
            plugins_root: plugins_root.into(),
            disabled: BTreeSet::new(),
            ui: Arc::new(InlineUi),
            sink: Arc::new(TracingOutcomeSink::new()),
        }
    }

    /// Root directory holding one subdirectory per plugin.
    #[must_use]
    pub fn plugins_root(&self) -> &Path {
        &self.shared.plugins_root
    }

    /// Snapshot of the plugins currently on disk.
    #[must_use]
    pub fn catalog(&self) -> PluginCatalog {
        PluginCatalog::discover(&self.shared.plugins_root, &self.shared.disabled)
    }

    /// Runs the main entry script of every plugin owning one of `paths`.
    pub fn run_plugins(
        &self,
        paths: &[PathBuf],
        is_startup: bool,
        host_context: &HostContext,
    ) -> Vec<RunHandle> {
        self.trigger(paths, RunKind::Main, is_startup, host_context)
    }

    /// Runs the test entry script of every plugin owning one of `paths`.
    pub fn run_plugin_tests(
        &self,
        paths: &[PathBuf],
        host_context: &HostContext,
    ) -> Vec<RunHandle> {
        self.trigger(paths, RunKind::Tests, false, host_context)
    }

    /// Runs every enabled plugin under the plugins root.
    pub fn run_all_plugins(&self, is_startup: bool, host_context: &HostContext) -> Vec<RunHandle> {
        let catalog = self.catalog();
        let roots: Vec<PathBuf> = catalog
            .units()
            .filter(|unit| catalog.is_enabled(unit.id()))
            .map(|unit| unit.root().to_path_buf())
            .collect();
        info!(
            target: ENGINE_TARGET,
            plugins = roots.len(),
            is_startup,
            "running all plugins"
        );
        self.run_plugins(&roots, is_startup, host_context)
    }

    /// Runs the plugin owning `path` and waits for its outcome.
    ///
    /// # Errors
    ///
    /// Returns the attempt's [`AnError`].
    pub fn execute(&self, path: &Path, is_startup: bool, host_context: &HostContext) -> RunOutcome {
        self.run_plugins(&[path.to_path_buf()], is_startup, host_context)
            .into_iter()
            .next()
            .map_or_else(
                || {
                    Err(AnError::loading(format!(
                        "{} is not inside a live plugin",
                        path.display()
                    )))
                },
                RunHandle::wait,
            )
    }

    /// Returns `true` when at least one of `paths` belongs to a plugin with an
    /// entry script of the requested kind.
    #[must_use]
    pub fn can_handle(&self, paths: &[PathBuf], kind: RunKind) -> bool {
        let runners = kind.runners();
        paths
            .iter()
            .filter_map(|path| plugin_folder(&self.shared.plugins_root, path))
            .filter_map(PluginUnit::from_root)
            .any(|unit| {
                runners
                    .iter()
                    .any(|runner| matches!(unit.find_script(runner.script_name()), Ok(Some(_))))
            })
    }

    /// Disposes the live binding of `plugin_id` inside its lane.
    ///
    /// # Errors
    ///
    /// Returns [`AnError::Running`] when a cleanup callback fails or the lane
    /// cannot accept work.
    pub fn unload_plugin(&self, plugin_id: &str) -> Result<bool, AnError> {
        let shared = Arc::clone(&self.shared);
        let id = plugin_id.to_owned();
        self.shared
            .serializer
            .submit(plugin_id, move || shared.bindings.dispose_binding(&id))
            .and_then(Ticket::wait)
            .map_err(|error| AnError::running(plugin_id, error))?
    }

    /// Drains every lane, then disposes all live bindings.
    ///
    /// Returns the disposal failures, which are also reported to the sink.
    pub fn shutdown(&self) -> Vec<DisposeError> {
        self.shared.serializer.shutdown();
        let failures = self.shared.bindings.dispose_all();
        for failure in &failures {
            let error = AnError::running(failure.name.clone(), failure.clone());
            self.shared.sink.disposal_failed(&failure.name, &error);
        }
        info!(
            target: ENGINE_TARGET,
            failures = failures.len(),
            "live plugin engine shut down"
        );
        failures
    }

    fn trigger(
        &self,
        paths: &[PathBuf],
        kind: RunKind,
        is_startup: bool,
        host_context: &HostContext,
    ) -> Vec<RunHandle> {
        let mut seen = BTreeSet::new();
        let mut handles = Vec::new();
        for path in paths {
            let Some(folder) = plugin_folder(&self.shared.plugins_root, path) else {
                let label = path.display().to_string();
                let error = AnError::loading(format!(
                    "{label} is not inside the plugins root {}",
                    self.shared.plugins_root.display()
                ));
                self.shared.sink.run_finished(&label, &Err(error.clone()));
                handles.push(RunHandle::done(label, Err(error)));
                continue;
            };
            if !seen.insert(folder.clone()) {
                continue;
            }
            let Some(unit) = PluginUnit::from_root(folder.as_path()) else {
                let label = folder.display().to_string();
                let error = AnError::loading(format!("{label} has no usable plugin id"));
                self.shared.sink.run_finished(&label, &Err(error.clone()));
                handles.push(RunHandle::done(label, Err(error)));
                continue;
            };
            handles.push(self.schedule(unit, kind, is_startup, host_context));
        }
        handles
    }

    fn schedule(
        &self,
        unit: PluginUnit,
        kind: RunKind,
        is_startup: bool,
        host_context: &HostContext,
    ) -> RunHandle {
        let plugin_id = unit.id().to_owned();
        self.shared
            .sink
            .run_state_changed(&plugin_id, RunState::NotStarted);

        let shared = Arc::clone(&self.shared);
        let context = host_context.clone();
        let submitted = self.shared.serializer.submit(&plugin_id, move || {
            shared.run_in_lane(&unit, kind, is_startup, &context)
        });
        match submitted {
            Ok(ticket) => RunHandle {
                plugin_id,
                state: HandleState::Pending(ticket),
            },
            Err(error) => self.rejected(plugin_id, &error),
        }
    }

    fn rejected(&self, plugin_id: String, error: &SerializerError) -> RunHandle {
        let outcome = Err(AnError::running(plugin_id.clone(), error.clone()));
        self.shared.sink.run_finished(&plugin_id, &outcome);
        RunHandle::done(plugin_id, outcome)
    }
}

impl Shared {
    fn run_in_lane(
        &self,
        unit: &PluginUnit,
        kind: RunKind,
        is_startup: bool,
        host_context: &HostContext,
    ) -> RunOutcome {
        let outcome = self.attempt(unit, kind, is_startup, host_context);
        self.sink.run_finished(unit.id(), &outcome);
        outcome
    }

    fn attempt(
        &self,
        requested: &PluginUnit,
        kind: RunKind,
        is_startup: bool,
        host_context: &HostContext,
    ) -> RunOutcome {
        let plugin_id = requested.id();
        self.report(plugin_id, RunState::SettingUp);

        let catalog = PluginCatalog::discover(&self.plugins_root, &self.disabled);
        let unit = catalog.get(plugin_id).unwrap_or(requested);
        let prepared = guard_setup(plugin_id, || self.prepare(&catalog, unit, kind));
        let (runner, plugin) = match prepared {
            Ok(prepared) => prepared,
            Err(error) => {
                self.report(plugin_id, RunState::SetupFailed);
                return Err(error);
            }
        };
        self.report(plugin_id, RunState::Ready);

        let issued = self.bindings.create_binding(unit, host_context, is_startup);
        if let Some(error) = &issued.disposal_error {
            self.sink.disposal_failed(plugin_id, error);
        }

        self.report(plugin_id, RunState::Running);
        let outcome = runner.run(plugin, &issued.binding, &self.host);
        let terminal = if outcome.is_ok() {
            RunState::Succeeded
        } else {
            RunState::Failed
        };
        self.report(plugin_id, terminal);
        outcome
    }

    fn prepare(
        &self,
        catalog: &PluginCatalog,
        unit: &PluginUnit,
        kind: RunKind,
    ) -> Result<(ScriptRunner, ExecutablePlugin), AnError> {
        if !catalog.is_enabled(unit.id()) {
            return Err(AnError::loading(format!(
                "Plugin '{}' is disabled",
                unit.id()
            )));
        }
        let runner = select_runner(&kind.runners(), unit)?;
        let environment = EnvironmentSnapshot::from_process();
        let plugin = runner.setup(unit, &SetupContext::new(catalog, &environment))?;
        Ok((runner, plugin))
    }

    fn report(&self, plugin_id: &str, state: RunState) {
        debug!(
            target: ENGINE_TARGET,
            plugin = plugin_id,
            state = state.as_str(),
            "run state"
        );
        self.sink.run_state_changed(plugin_id, state);
    }
}

/// Runs a setup step, turning a panic into a loading error so the attempt
/// still ends in [`RunState::SetupFailed`].
fn guard_setup<T>(
    plugin_id: &str,
    setup: impl FnOnce() -> Result<T, AnError>,
) -> Result<T, AnError> {
    panic::catch_unwind(AssertUnwindSafe(setup)).unwrap_or_else(|payload| {
        Err(AnError::loading(format!(
            "Plugin '{plugin_id}' setup panicked: {}",
            panic_message(payload.as_ref())
        )))
    })
}

#[cfg(test)]
mod tests;
