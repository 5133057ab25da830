//! Per-plugin bindings and their lifecycle.
//!
//! Each run receives a fresh [`Binding`]: the values a script sees as
//! globals plus a [`Disposable`] that owns the resources the script
//! registers. Issuing a binding for a plugin first disposes the one issued
//! for its previous run, so a rerun never leaks listeners or timers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::disposable::{DisposeError, Disposable, ResourceScope};
use crate::error::AnError;
use crate::unit::PluginUnit;

const BINDING_TARGET: &str = "liveplugin_runner::binding";

/// Script-visible name of the host project.
pub const PROJECT_KEY: &str = "project";
/// Script-visible flag telling whether the run is part of host startup.
pub const IS_IDE_STARTUP_KEY: &str = "isIdeStartup";
/// Script-visible absolute path of the plugin root.
pub const PLUGIN_PATH_KEY: &str = "pluginPath";
/// Script-visible disposable handle.
pub const PLUGIN_DISPOSABLE_KEY: &str = "pluginDisposable";

/// Project the host has open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRef {
    /// Display name of the project.
    pub name: String,
    /// Root directory of the project.
    pub base_path: PathBuf,
}

impl ProjectRef {
    /// Creates a project reference.
    #[must_use]
    pub fn new(name: impl Into<String>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            base_path: base_path.into(),
        }
    }
}

/// Host state available when a run is triggered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostContext {
    /// Current project, absent when the host has none open.
    pub project: Option<ProjectRef>,
}

impl HostContext {
    /// Context without an open project.
    #[must_use]
    pub const fn without_project() -> Self {
        Self { project: None }
    }

    /// Context with `project` open.
    #[must_use]
    pub const fn with_project(project: ProjectRef) -> Self {
        Self {
            project: Some(project),
        }
    }
}

/// Values exposed to one run of a plugin script.
#[derive(Debug, Clone)]
pub struct Binding {
    plugin_id: String,
    project: Option<ProjectRef>,
    is_ide_startup: bool,
    plugin_path: PathBuf,
    disposable: Disposable,
}

impl Binding {
    /// Id of the plugin the binding was issued for.
    #[must_use]
    pub fn plugin_id(&self) -> &str {
        self.plugin_id.as_str()
    }

    /// Current project, if any.
    #[must_use]
    pub const fn project(&self) -> Option<&ProjectRef> {
        self.project.as_ref()
    }

    /// Whether the run happens during host startup.
    #[must_use]
    pub const fn is_ide_startup(&self) -> bool {
        self.is_ide_startup
    }

    /// Absolute path of the plugin root.
    #[must_use]
    pub fn plugin_path(&self) -> &Path {
        &self.plugin_path
    }

    /// Handle owning resources registered by the script.
    #[must_use]
    pub const fn disposable(&self) -> &Disposable {
        &self.disposable
    }
}

/// A freshly issued binding together with the fail-open disposal outcome of
/// the binding it replaced.
#[derive(Debug)]
pub struct IssuedBinding {
    /// Binding for the new run.
    pub binding: Binding,
    /// Failure raised while disposing the previous binding, if any.
    pub disposal_error: Option<AnError>,
}

/// Issues bindings and disposes superseded ones.
#[derive(Debug, Default)]
pub struct BindingManager {
    live: Mutex<HashMap<String, Binding>>,
    scope: ResourceScope,
}

impl BindingManager {
    /// Creates a manager with no live bindings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Disposes the previous binding of `unit` and issues a new one.
    ///
    /// Disposal failures do not prevent the new binding; they are returned in
    /// [`IssuedBinding::disposal_error`].
    pub fn create_binding(
        &self,
        unit: &PluginUnit,
        host_context: &HostContext,
        is_startup: bool,
    ) -> IssuedBinding {
        let previous = self.lock().remove(unit.id());
        let disposal_error = previous.and_then(|old| self.retire(&old).err());

        let binding = Binding {
            plugin_id: unit.id().to_owned(),
            project: host_context.project.clone(),
            is_ide_startup: is_startup,
            plugin_path: unit.root().to_path_buf(),
            disposable: Disposable::new(unit.id()),
        };
        self.scope.register(&binding.disposable);
        self.lock()
            .insert(binding.plugin_id.clone(), binding.clone());
        debug!(
            target: BINDING_TARGET,
            plugin = unit.id(),
            is_startup,
            "issued binding"
        );

        IssuedBinding {
            binding,
            disposal_error,
        }
    }

    /// Disposes the live binding of `plugin_id`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`AnError::Running`] when a cleanup callback fails.
    pub fn dispose_binding(&self, plugin_id: &str) -> Result<bool, AnError> {
        let Some(binding) = self.lock().remove(plugin_id) else {
            return Ok(false);
        };
        self.retire(&binding)?;
        Ok(true)
    }

    /// Live binding of `plugin_id`, if one exists.
    #[must_use]
    pub fn current(&self, plugin_id: &str) -> Option<Binding> {
        self.lock().get(plugin_id).cloned()
    }

    /// Number of live bindings.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.lock().len()
    }

    /// Disposes every live binding. Used at host shutdown.
    pub fn dispose_all(&self) -> Vec<DisposeError> {
        self.lock().clear();
        self.scope.dispose_all()
    }

    fn retire(&self, binding: &Binding) -> Result<(), AnError> {
        self.scope.release(&binding.disposable);
        binding.disposable.dispose().map_err(|error| {
            warn!(
                target: BINDING_TARGET,
                plugin = binding.plugin_id.as_str(),
                error = %error,
                "disposing previous binding failed"
            );
            AnError::running(binding.plugin_id.clone(), error)
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Binding>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
