//! Script runners for the supported scripting backends.
//!
//! Two closed backends exist, tried in priority order: Rhai (`plugin.rhai`)
//! and Lua (`plugin.lua`). Each has a main runner and a test runner that
//! differ only in the entry script they look for. A runner prepares an
//! [`ExecutablePlugin`] in [`ScriptRunner::setup`] and executes it against a
//! fresh [`Binding`] in [`ScriptRunner::run`].

mod lua_script;
mod rhai_script;

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::binding::Binding;
use crate::directive::DirectiveSyntax;
use crate::disposable::panic_message;
use crate::environment::{ArtifactVerifier, EnvironmentBuilder, ExecutionEnvironment};
use crate::error::AnError;
use crate::report::OutcomeSink;
use crate::resolver::{DependencyResolver, EntryPoint, EnvironmentSnapshot};
use crate::ui::{UiError, UiThread};
use crate::unit::{PluginCatalog, PluginUnit};

use lua_script::LuaProgram;
pub use lua_script::LuaVerifier;
use rhai_script::RhaiProgram;
pub use rhai_script::RhaiVerifier;

const BACKEND_TARGET: &str = "liveplugin_runner::backend";

/// Tracing target receiving script `print` output.
pub const SCRIPT_TARGET: &str = "liveplugin::script";

/// Scripting language a plugin is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Rhai scripts using `//` directives.
    Rhai,
    /// Lua scripts using `--` directives.
    Lua,
}

impl Backend {
    /// Every backend in priority order.
    pub const ALL: [Self; 2] = [Self::Rhai, Self::Lua];

    /// Entry script run by the main runner.
    #[must_use]
    pub const fn main_script(self) -> &'static str {
        match self {
            Self::Rhai => "plugin.rhai",
            Self::Lua => "plugin.lua",
        }
    }

    /// Entry script run by the test runner.
    #[must_use]
    pub const fn test_script(self) -> &'static str {
        match self {
            Self::Rhai => "plugin-test.rhai",
            Self::Lua => "plugin-test.lua",
        }
    }

    /// Directive markers for the backend's comment syntax.
    #[must_use]
    pub const fn syntax(self) -> DirectiveSyntax {
        match self {
            Self::Rhai => DirectiveSyntax::SLASH_COMMENT,
            Self::Lua => DirectiveSyntax::DASH_COMMENT,
        }
    }

    /// File extension of the backend's modules.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Rhai => "rhai",
            Self::Lua => "lua",
        }
    }

    /// Main entry points of every backend, used when scanning dependencies.
    #[must_use]
    pub fn main_entry_points() -> Vec<EntryPoint> {
        Self::ALL
            .iter()
            .map(|backend| EntryPoint::new(backend.main_script(), backend.syntax()))
            .collect()
    }

    fn verifier(self) -> Box<dyn ArtifactVerifier> {
        match self {
            Self::Rhai => Box::new(RhaiVerifier::new()),
            Self::Lua => Box::new(LuaVerifier::new()),
        }
    }
}

/// Inputs shared by every setup performed for one run.
#[derive(Debug, Clone, Copy)]
pub struct SetupContext<'a> {
    catalog: &'a PluginCatalog,
    environment: &'a EnvironmentSnapshot,
}

impl<'a> SetupContext<'a> {
    /// Creates a context from a catalog snapshot and environment snapshot.
    #[must_use]
    pub const fn new(catalog: &'a PluginCatalog, environment: &'a EnvironmentSnapshot) -> Self {
        Self {
            catalog,
            environment,
        }
    }
}

/// Host facilities reachable from scripts.
#[derive(Clone)]
pub struct ScriptHost {
    ui: Arc<dyn UiThread>,
    sink: Arc<dyn OutcomeSink>,
}

impl std::fmt::Debug for ScriptHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptHost").finish_non_exhaustive()
    }
}

impl ScriptHost {
    /// Creates a host over a UI thread and an outcome sink.
    #[must_use]
    pub const fn new(ui: Arc<dyn UiThread>, sink: Arc<dyn OutcomeSink>) -> Self {
        Self { ui, sink }
    }

    /// Shows `message` to the user from the UI thread.
    ///
    /// # Errors
    ///
    /// Returns [`UiError`] when the UI thread cannot run the hand-off.
    pub fn show(&self, plugin_id: &str, message: &str) -> Result<(), UiError> {
        let sink = Arc::clone(&self.sink);
        let id = plugin_id.to_owned();
        let text = message.to_owned();
        self.ui
            .invoke_and_wait(Box::new(move || sink.plugin_message(&id, &text)))
    }
}

enum Compiled {
    Rhai(RhaiProgram),
    Lua(LuaProgram),
}

/// Plugin prepared for execution: compiled entry script plus its
/// environment. Owned by exactly one run.
pub struct ExecutablePlugin {
    plugin_id: String,
    script: PathBuf,
    environment: ExecutionEnvironment,
    compiled: Compiled,
}

impl std::fmt::Debug for ExecutablePlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutablePlugin")
            .field("plugin_id", &self.plugin_id)
            .field("script", &self.script)
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}

impl ExecutablePlugin {
    /// Id of the prepared plugin.
    #[must_use]
    pub fn plugin_id(&self) -> &str {
        self.plugin_id.as_str()
    }

    /// Path of the compiled entry script.
    #[must_use]
    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Module search environment built for this run.
    #[must_use]
    pub const fn environment(&self) -> &ExecutionEnvironment {
        &self.environment
    }
}

/// Locates, prepares and runs one kind of entry script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptRunner {
    backend: Backend,
    script_name: &'static str,
}

impl ScriptRunner {
    /// Runner executing the backend's main entry script.
    #[must_use]
    pub const fn main(backend: Backend) -> Self {
        Self {
            backend,
            script_name: backend.main_script(),
        }
    }

    /// Runner executing the backend's test entry script.
    #[must_use]
    pub const fn test(backend: Backend) -> Self {
        Self {
            backend,
            script_name: backend.test_script(),
        }
    }

    /// Main runners in priority order.
    #[must_use]
    pub fn main_runners() -> Vec<Self> {
        Backend::ALL.into_iter().map(Self::main).collect()
    }

    /// Test runners in priority order.
    #[must_use]
    pub fn test_runners() -> Vec<Self> {
        Backend::ALL.into_iter().map(Self::test).collect()
    }

    /// Backend the runner drives.
    #[must_use]
    pub const fn backend(&self) -> Backend {
        self.backend
    }

    /// Entry script name the runner looks for.
    #[must_use]
    pub const fn script_name(&self) -> &'static str {
        self.script_name
    }

    /// Prepares `unit` for execution.
    ///
    /// Locates the entry script, resolves its directives, builds the module
    /// environment and compiles the entry script against it.
    ///
    /// # Errors
    ///
    /// Every failure is an [`AnError::Loading`].
    pub fn setup(
        &self,
        unit: &PluginUnit,
        context: &SetupContext<'_>,
    ) -> Result<ExecutablePlugin, AnError> {
        let script = unit.find_script(self.script_name)?.ok_or_else(|| {
            AnError::loading(format!(
                "Plugin: \"{}\". Startup script {} was not found.",
                unit.id(),
                self.script_name
            ))
        })?;

        let entry_points = Backend::main_entry_points();
        let resolved = DependencyResolver::new(context.catalog, context.environment, &entry_points)
            .resolve(unit, &script, self.backend.syntax())?;
        let verifier = self.backend.verifier();
        let environment = EnvironmentBuilder::build(unit, &resolved, verifier.as_ref())?;

        let source = fs::read_to_string(&script).map_err(|error| {
            AnError::loading_with_source(format!("Error reading {}", script.display()), error)
        })?;
        let compiled = match self.backend {
            Backend::Rhai => Compiled::Rhai(RhaiProgram::compile(&environment, &script, &source)?),
            Backend::Lua => Compiled::Lua(LuaProgram::compile(&environment, &script, &source)?),
        };

        debug!(
            target: BACKEND_TARGET,
            plugin = unit.id(),
            script = %script.display(),
            backend = ?self.backend,
            "plugin ready"
        );
        Ok(ExecutablePlugin {
            plugin_id: unit.id().to_owned(),
            script,
            environment,
            compiled,
        })
    }

    /// Runs a prepared plugin with `binding` exposed as script globals.
    ///
    /// # Errors
    ///
    /// Script errors and panics become [`AnError::Running`] tagged with the
    /// plugin id.
    pub fn run(
        &self,
        plugin: ExecutablePlugin,
        binding: &Binding,
        host: &ScriptHost,
    ) -> Result<(), AnError> {
        let plugin_id = plugin.plugin_id.clone();
        let execution = panic::catch_unwind(AssertUnwindSafe(move || match plugin.compiled {
            Compiled::Rhai(program) => program.run(binding, host),
            Compiled::Lua(program) => program.run(binding, host),
        }));
        match execution {
            Ok(Ok(())) => Ok(()),
            Ok(Err(cause)) => Err(AnError::running(plugin_id, cause)),
            Err(payload) => Err(AnError::running_message(
                plugin_id,
                format!("script panicked: {}", panic_message(payload.as_ref())),
            )),
        }
    }
}

/// Returns the first runner whose entry script exists under `unit`.
///
/// # Errors
///
/// Returns an [`AnError::Loading`] naming every tried script when none
/// exists, or when a script name matches several files.
pub fn select_runner(runners: &[ScriptRunner], unit: &PluginUnit) -> Result<ScriptRunner, AnError> {
    for runner in runners {
        if unit.find_script(runner.script_name())?.is_some() {
            return Ok(*runner);
        }
    }
    let tried = runners
        .iter()
        .map(ScriptRunner::script_name)
        .collect::<Vec<_>>()
        .join(", ");
    Err(AnError::loading(format!(
        "Plugin: \"{}\". Startup script was not found. Tried: [{tried}]",
        unit.id()
    )))
}
