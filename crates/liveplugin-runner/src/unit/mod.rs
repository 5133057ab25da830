//! Plugin identities and the discovery snapshot.
//!
//! A [`PluginUnit`] is a directory directly under the plugins root; its id is
//! the directory name. The [`PluginCatalog`] is a point-in-time listing of
//! those directories together with the set of administratively disabled ids.
//! Catalogs are cheap to rebuild and the runner takes a fresh one for every
//! resolution pass.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use crate::error::AnError;

const UNIT_TARGET: &str = "liveplugin_runner::unit";

/// Project metadata directory that is never treated as a plugin.
const PROJECT_METADATA_DIR: &str = ".idea";

/// Build output directory skipped when the root is itself an IDE project.
const PROJECT_OUTPUT_DIR: &str = "out";

/// A directory containing one live plugin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginUnit {
    id: String,
    root: PathBuf,
}

impl PluginUnit {
    /// Creates a unit with an explicit id.
    #[must_use]
    pub fn new(id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            root: root.into(),
        }
    }

    /// Creates a unit whose id is the last component of `root`.
    ///
    /// Directory names that are not valid UTF-8 are converted lossily.
    #[must_use]
    pub fn from_root(root: impl Into<PathBuf>) -> Option<Self> {
        let path: PathBuf = root.into();
        let id = path.file_name()?.to_string_lossy().into_owned();
        Some(Self { id, root: path })
    }

    /// Plugin id (the directory name).
    #[must_use]
    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    /// Absolute path of the plugin directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    /// Locates `script_name` inside the plugin directory.
    ///
    /// A file directly under the root wins; otherwise the whole tree is
    /// searched. Several matches in the tree are ambiguous and reported as a
    /// loading error.
    pub fn find_script(&self, script_name: &str) -> Result<Option<PathBuf>, AnError> {
        let direct = self.root.join(script_name);
        if direct.is_file() {
            return Ok(Some(direct));
        }

        let mut matches: Vec<PathBuf> = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| entry.file_name().to_str() == Some(script_name))
            .map(walkdir::DirEntry::into_path)
            .collect();

        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            _ => {
                let listing = matches
                    .iter()
                    .map(|path| path.display().to_string())
                    .collect::<Vec<_>>()
                    .join(";\n");
                Err(AnError::loading(format!(
                    "Found several scripts files under {}:\n{listing}",
                    self.root.display()
                )))
            }
        }
    }
}

/// Snapshot of the plugins visible under a plugins root.
#[derive(Debug, Clone, Default)]
pub struct PluginCatalog {
    plugins_root: PathBuf,
    units: BTreeMap<String, PluginUnit>,
    disabled: BTreeSet<String>,
}

impl PluginCatalog {
    /// Lists the plugin directories under `plugins_root`.
    ///
    /// A missing or unreadable root yields an empty catalog.
    #[must_use]
    pub fn discover(plugins_root: impl Into<PathBuf>, disabled: &BTreeSet<String>) -> Self {
        let root: PathBuf = plugins_root.into();
        let units = match fs::read_dir(&root) {
            Ok(entries) => {
                let skip_output = root.join(PROJECT_METADATA_DIR).exists();
                entries
                    .filter_map(Result::ok)
                    .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_dir()))
                    .filter_map(|entry| PluginUnit::from_root(entry.path()))
                    .filter(|unit| unit.id() != PROJECT_METADATA_DIR)
                    .filter(|unit| !(skip_output && unit.id() == PROJECT_OUTPUT_DIR))
                    .map(|unit| (unit.id().to_owned(), unit))
                    .collect()
            }
            Err(error) => {
                warn!(
                    target: UNIT_TARGET,
                    root = %root.display(),
                    %error,
                    "plugins root is not readable"
                );
                BTreeMap::new()
            }
        };
        Self {
            plugins_root: root,
            units,
            disabled: disabled.clone(),
        }
    }

    /// Builds a catalog from known units, bypassing the filesystem scan.
    #[must_use]
    pub fn from_units(
        plugins_root: impl Into<PathBuf>,
        units: impl IntoIterator<Item = PluginUnit>,
        disabled: BTreeSet<String>,
    ) -> Self {
        Self {
            plugins_root: plugins_root.into(),
            units: units
                .into_iter()
                .map(|unit| (unit.id().to_owned(), unit))
                .collect(),
            disabled,
        }
    }

    /// The directory the catalog was built from.
    #[must_use]
    pub fn plugins_root(&self) -> &Path {
        self.plugins_root.as_path()
    }

    /// Looks up a plugin by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&PluginUnit> {
        self.units.get(id)
    }

    /// Returns `false` for ids listed as disabled.
    #[must_use]
    pub fn is_enabled(&self, id: &str) -> bool {
        !self.disabled.contains(id)
    }

    /// All plugins ordered by id.
    pub fn units(&self) -> impl Iterator<Item = &PluginUnit> {
        self.units.values()
    }

    /// Number of discovered plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Returns `true` when no plugin was discovered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Maps any path inside a plugin to the plugin that owns it.
    ///
    /// The owner is the nearest ancestor (or the path itself) whose parent is
    /// the plugins root.
    #[must_use]
    pub fn owning_unit(&self, path: &Path) -> Option<PluginUnit> {
        plugin_folder(&self.plugins_root, path).and_then(PluginUnit::from_root)
    }
}

/// Returns the ancestor of `path` sitting directly under `plugins_root`.
#[must_use]
pub fn plugin_folder(plugins_root: &Path, path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|candidate| candidate.parent() == Some(plugins_root))
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests;
