//! Construction of the per-run module search environment.
//!
//! An [`ExecutionEnvironment`] is the ordered list of places a script engine
//! consults when the entry script imports another module. Layers are ordered
//! from most to least specific: the plugin's own directory, the explicit
//! classpath entries, then the directories of every plugin it depends on. A
//! plugin can therefore shadow modules provided by its dependencies but not
//! the other way round.
//!
//! Every module file reachable through a classpath entry or a dependency is
//! read and handed to the backend's [`ArtifactVerifier`] while the
//! environment is built, so syntax errors in dependencies surface as loading
//! errors before the entry script runs.

use std::error::Error as StdError;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::AnError;
use crate::resolver::ResolvedDependencySet;
use crate::unit::PluginUnit;

const ENVIRONMENT_TARGET: &str = "liveplugin_runner::environment";

/// How deep below a classpath directory module files are verified.
pub const MODULE_SEARCH_DEPTH: usize = 6;

/// Backend hook used to validate module files while an environment is built.
pub trait ArtifactVerifier {
    /// File extension (without the dot) of modules understood by the backend.
    fn extension(&self) -> &'static str;

    /// Checks that `source`, read from `path`, can be loaded.
    ///
    /// # Errors
    ///
    /// Returns the backend's compile error when the module is invalid.
    fn verify(&self, path: &Path, source: &str) -> Result<(), Box<dyn StdError + Send + Sync>>;
}

/// Where a layer came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerOrigin {
    /// The plugin's own directory.
    PluginRoot,
    /// An explicit `add-to-classpath` entry.
    Classpath,
    /// The directory of a plugin this one depends on.
    Dependency(String),
}

/// What a layer contributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerSource {
    /// A directory searched for modules by name.
    Directory(PathBuf),
    /// A single module file exposed under its file stem.
    Module {
        /// Import name of the module.
        name: String,
        /// Path of the module file.
        path: PathBuf,
    },
}

/// One entry of the module search order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    origin: LayerOrigin,
    source: LayerSource,
}

impl Layer {
    /// Origin of the layer.
    #[must_use]
    pub const fn origin(&self) -> &LayerOrigin {
        &self.origin
    }

    /// Contribution of the layer.
    #[must_use]
    pub const fn source(&self) -> &LayerSource {
        &self.source
    }
}

/// Module search environment owned by a single run.
///
/// Not `Clone`: every run builds its own environment, so code edited between
/// runs is always reloaded.
#[derive(Debug, PartialEq, Eq)]
pub struct ExecutionEnvironment {
    plugin_id: String,
    layers: Vec<Layer>,
}

impl ExecutionEnvironment {
    /// Id of the plugin the environment was built for.
    #[must_use]
    pub fn plugin_id(&self) -> &str {
        self.plugin_id.as_str()
    }

    /// Layers in priority order.
    #[must_use]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Directories in priority order.
    pub fn search_directories(&self) -> impl Iterator<Item = &Path> {
        self.layers.iter().filter_map(|layer| match &layer.source {
            LayerSource::Directory(path) => Some(path.as_path()),
            LayerSource::Module { .. } => None,
        })
    }

    /// Single-file modules in priority order.
    pub fn modules(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.layers.iter().filter_map(|layer| match &layer.source {
            LayerSource::Module { name, path } => Some((name.as_str(), path.as_path())),
            LayerSource::Directory(_) => None,
        })
    }
}

/// Assembles execution environments.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvironmentBuilder;

impl EnvironmentBuilder {
    /// Builds an [`ExecutionEnvironment`] from resolved dependencies.
    ///
    /// # Errors
    ///
    /// Returns [`AnError::Loading`] when a layer path is missing or unreadable,
    /// when a classpath file is not a module of the backend's language, or when
    /// the verifier rejects any module reachable through a classpath entry or a
    /// dependency.
    pub fn build(
        unit: &PluginUnit,
        resolved: &ResolvedDependencySet,
        verifier: &dyn ArtifactVerifier,
    ) -> Result<ExecutionEnvironment, AnError> {
        let mut layers = Vec::with_capacity(
            1 + resolved.classpath_entries().len() + resolved.plugin_dependencies().len(),
        );

        require_directory(unit.root(), unit.id())?;
        layers.push(Layer {
            origin: LayerOrigin::PluginRoot,
            source: LayerSource::Directory(unit.root().to_path_buf()),
        });

        for entry in resolved.classpath_entries() {
            layers.push(classpath_layer(entry, verifier)?);
        }

        for dependency in resolved.plugin_dependencies() {
            require_directory(dependency.root(), dependency.id())?;
            verify_tree(dependency.root(), verifier)?;
            layers.push(Layer {
                origin: LayerOrigin::Dependency(dependency.id().to_owned()),
                source: LayerSource::Directory(dependency.root().to_path_buf()),
            });
        }

        debug!(
            target: ENVIRONMENT_TARGET,
            plugin = unit.id(),
            layers = layers.len(),
            "built execution environment"
        );

        Ok(ExecutionEnvironment {
            plugin_id: unit.id().to_owned(),
            layers,
        })
    }
}

fn require_directory(path: &Path, plugin_id: &str) -> Result<(), AnError> {
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(AnError::loading(format!(
            "Plugin '{plugin_id}' path {} is not a directory",
            path.display()
        ))),
        Err(error) => Err(AnError::loading_with_source(
            format!("Plugin '{plugin_id}' directory {} is missing", path.display()),
            error,
        )),
    }
}

fn classpath_layer(entry: &Path, verifier: &dyn ArtifactVerifier) -> Result<Layer, AnError> {
    let metadata = fs::metadata(entry).map_err(|error| {
        AnError::loading_with_source(
            format!("Couldn't find dependency '{}'", entry.display()),
            error,
        )
    })?;

    if metadata.is_dir() {
        verify_tree(entry, verifier)?;
        return Ok(Layer {
            origin: LayerOrigin::Classpath,
            source: LayerSource::Directory(entry.to_path_buf()),
        });
    }

    if !has_extension(entry, verifier.extension()) {
        return Err(AnError::loading(format!(
            "Unsupported classpath entry {}: expected a *.{} module",
            entry.display(),
            verifier.extension()
        )));
    }
    let name = entry
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| {
            AnError::loading(format!("Invalid module file name {}", entry.display()))
        })?
        .to_owned();
    verify_file(entry, verifier)?;
    Ok(Layer {
        origin: LayerOrigin::Classpath,
        source: LayerSource::Module {
            name,
            path: entry.to_path_buf(),
        },
    })
}

fn verify_tree(directory: &Path, verifier: &dyn ArtifactVerifier) -> Result<(), AnError> {
    let walker = WalkDir::new(directory)
        .max_depth(MODULE_SEARCH_DEPTH)
        .sort_by_file_name();
    for walked in walker {
        let entry = match walked {
            Ok(entry) => entry,
            Err(error) if error.depth() > 0 => {
                warn!(
                    target: ENVIRONMENT_TARGET,
                    directory = %directory.display(),
                    %error,
                    "skipping unreadable classpath entry"
                );
                continue;
            }
            Err(error) => {
                return Err(AnError::loading_with_source(
                    format!("Error reading {}", directory.display()),
                    error,
                ));
            }
        };
        if entry.file_type().is_file() && has_extension(entry.path(), verifier.extension()) {
            verify_file(entry.path(), verifier)?;
        }
    }
    Ok(())
}

fn verify_file(path: &Path, verifier: &dyn ArtifactVerifier) -> Result<(), AnError> {
    let source = fs::read_to_string(path).map_err(|error| {
        AnError::loading_with_source(format!("Error reading {}", path.display()), error)
    })?;
    verifier.verify(path, &source).map_err(|error| {
        AnError::Loading {
            message: format!("Error linking {}: {error}", path.display()),
            source: Some(error.into()),
        }
    })
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(extension)
}
