//! Dependency resolution for a plugin's entry script.
//!
//! The resolver scans the entry script for directives, expands every
//! classpath token against an [`EnvironmentSnapshot`], and follows
//! `depends-on-plugin` declarations through the [`PluginCatalog`] until the
//! closure is complete. Each plugin id is visited at most once, so dependency
//! cycles terminate.
//!
//! Ordering is first-discovered-wins and depth first: a plugin contributes
//! its own classpath entries in declaration order, then each of its
//! dependencies in declaration order. Duplicate paths keep their first
//! position.

mod expand;

use std::collections::{BTreeMap, HashSet};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::directive::{Directive, DirectiveSyntax};
use crate::error::AnError;
use crate::unit::{PluginCatalog, PluginUnit};

pub use expand::{expand_classpath_token, expand_variables};

const RESOLVER_TARGET: &str = "liveplugin_runner::resolver";

/// Synthetic variable holding the root of the plugin that declared a token.
pub const PLUGIN_PATH_VAR: &str = "PLUGIN_PATH";

/// Environment variables captured when a resolution pass starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvironmentSnapshot {
    /// Captures the current process environment.
    ///
    /// Variables whose name or value is not valid UTF-8 are left out.
    #[must_use]
    pub fn from_process() -> Self {
        Self::from_vars_os(std::env::vars_os())
    }

    /// Builds a snapshot from platform strings, skipping pairs that are not
    /// valid UTF-8.
    #[must_use]
    pub fn from_vars_os(vars: impl IntoIterator<Item = (OsString, OsString)>) -> Self {
        let pairs = vars.into_iter().filter_map(|(key, value)| {
            match (key.into_string(), value.into_string()) {
                (Ok(name), Ok(text)) => Some((name, text)),
                (name, _) => {
                    debug!(
                        target: RESOLVER_TARGET,
                        variable = %name.unwrap_or_else(|raw| raw.to_string_lossy().into_owned()),
                        "skipping non UTF-8 environment variable"
                    );
                    None
                }
            }
        });
        Self::from_vars(pairs)
    }

    /// Builds a snapshot from explicit pairs.
    #[must_use]
    pub fn from_vars<K, V>(vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    /// Returns a copy with [`PLUGIN_PATH_VAR`] pointing at `plugin_root`.
    #[must_use]
    pub fn with_plugin_path(&self, plugin_root: &Path) -> Self {
        let mut vars = self.vars.clone();
        vars.insert(
            PLUGIN_PATH_VAR.to_owned(),
            plugin_root.to_string_lossy().into_owned(),
        );
        Self { vars }
    }

    /// Looks up a variable.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}

/// Entry script name and directive syntax of one scripting backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    script_name: String,
    syntax: DirectiveSyntax,
}

impl EntryPoint {
    /// Creates an entry point description.
    #[must_use]
    pub fn new(script_name: impl Into<String>, syntax: DirectiveSyntax) -> Self {
        Self {
            script_name: script_name.into(),
            syntax,
        }
    }

    /// File name of the entry script.
    #[must_use]
    pub fn script_name(&self) -> &str {
        self.script_name.as_str()
    }

    /// Directive markers used by scripts of this kind.
    #[must_use]
    pub const fn syntax(&self) -> DirectiveSyntax {
        self.syntax
    }
}

/// Transitively closed dependencies of one plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDependencySet {
    root_id: String,
    classpath_entries: Vec<PathBuf>,
    plugin_dependencies: Vec<PluginUnit>,
}

impl ResolvedDependencySet {
    /// Assembles a set from already-resolved parts.
    #[must_use]
    pub fn new(
        root_id: impl Into<String>,
        classpath_entries: Vec<PathBuf>,
        plugin_dependencies: Vec<PluginUnit>,
    ) -> Self {
        Self {
            root_id: root_id.into(),
            classpath_entries,
            plugin_dependencies,
        }
    }

    /// Id of the plugin that was resolved.
    #[must_use]
    pub fn root_id(&self) -> &str {
        self.root_id.as_str()
    }

    /// Expanded classpath entries, de-duplicated, in resolution order.
    #[must_use]
    pub fn classpath_entries(&self) -> &[PathBuf] {
        &self.classpath_entries
    }

    /// Plugins reachable through `depends-on-plugin`, excluding the root.
    #[must_use]
    pub fn plugin_dependencies(&self) -> &[PluginUnit] {
        &self.plugin_dependencies
    }

    /// Ids of every visited plugin: the root first, then its dependencies.
    pub fn plugin_ids(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.root_id.as_str())
            .chain(self.plugin_dependencies.iter().map(PluginUnit::id))
    }
}

/// Resolves directives against a catalog snapshot.
#[derive(Debug, Clone, Copy)]
pub struct DependencyResolver<'a> {
    catalog: &'a PluginCatalog,
    environment: &'a EnvironmentSnapshot,
    entry_points: &'a [EntryPoint],
}

#[derive(Default)]
struct Resolution {
    classpath_entries: Vec<PathBuf>,
    seen_paths: HashSet<PathBuf>,
    plugin_dependencies: Vec<PluginUnit>,
    visited: HashSet<String>,
}

impl Resolution {
    fn push_path(&mut self, path: PathBuf) {
        if self.seen_paths.insert(path.clone()) {
            self.classpath_entries.push(path);
        }
    }
}

impl<'a> DependencyResolver<'a> {
    /// Creates a resolver.
    ///
    /// `entry_points` lists the entry scripts tried, in priority order, when
    /// a dependency's own directives are scanned.
    #[must_use]
    pub const fn new(
        catalog: &'a PluginCatalog,
        environment: &'a EnvironmentSnapshot,
        entry_points: &'a [EntryPoint],
    ) -> Self {
        Self {
            catalog,
            environment,
            entry_points,
        }
    }

    /// Resolves the dependencies declared by `entry_script` of `unit`.
    pub fn resolve(
        &self,
        unit: &PluginUnit,
        entry_script: &Path,
        syntax: DirectiveSyntax,
    ) -> Result<ResolvedDependencySet, AnError> {
        let mut resolution = Resolution::default();
        resolution.visited.insert(unit.id().to_owned());
        self.visit(unit, entry_script, syntax, &mut resolution)?;

        debug!(
            target: RESOLVER_TARGET,
            plugin = unit.id(),
            classpath_entries = resolution.classpath_entries.len(),
            plugin_dependencies = resolution.plugin_dependencies.len(),
            "resolved plugin dependencies"
        );

        Ok(ResolvedDependencySet {
            root_id: unit.id().to_owned(),
            classpath_entries: resolution.classpath_entries,
            plugin_dependencies: resolution.plugin_dependencies,
        })
    }

    fn visit(
        &self,
        unit: &PluginUnit,
        script: &Path,
        syntax: DirectiveSyntax,
        resolution: &mut Resolution,
    ) -> Result<(), AnError> {
        let text = fs::read_to_string(script).map_err(|error| {
            AnError::loading_with_source(
                format!("Couldn't read script {}", script.display()),
                error,
            )
        })?;
        let directives = syntax.scan(&text);
        let environment = self.environment.with_plugin_path(unit.root());

        for directive in &directives {
            if let Directive::ClasspathAddition(token) = directive {
                let paths = expand_classpath_token(token, &environment, unit.root())?;
                if paths.is_empty() {
                    return Err(AnError::loading(format!(
                        "Couldn't find dependency '{token}'"
                    )));
                }
                for path in paths {
                    resolution.push_path(path);
                }
            }
        }

        for directive in &directives {
            if let Directive::PluginDependency(id) = directive {
                if !resolution.visited.insert(id.clone()) {
                    continue;
                }
                let dependency = self.lookup(id)?;
                resolution.plugin_dependencies.push(dependency.clone());
                if let Some((script, dependency_syntax)) = self.entry_script_of(dependency)? {
                    self.visit(dependency, &script, dependency_syntax, resolution)?;
                }
            }
        }
        Ok(())
    }

    fn lookup(&self, id: &str) -> Result<&'a PluginUnit, AnError> {
        let catalog: &'a PluginCatalog = self.catalog;
        let Some(unit) = catalog.get(id) else {
            return Err(AnError::loading(format!(
                "Couldn't find dependent plugin '{id}'"
            )));
        };
        if !catalog.is_enabled(id) {
            return Err(AnError::loading(format!(
                "Dependent plugin '{id}' is disabled"
            )));
        }
        Ok(unit)
    }

    fn entry_script_of(
        &self,
        unit: &PluginUnit,
    ) -> Result<Option<(PathBuf, DirectiveSyntax)>, AnError> {
        for entry_point in self.entry_points {
            if let Some(script) = unit.find_script(entry_point.script_name())? {
                return Ok(Some((script, entry_point.syntax())));
            }
        }
        Ok(None)
    }
}
