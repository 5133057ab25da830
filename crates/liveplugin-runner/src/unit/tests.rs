//! Unit tests for plugin discovery.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;

fn touch(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(path, "").expect("write file");
}

#[fixture]
fn plugins_root() -> TempDir {
    let dir = TempDir::new().expect("temp dir");
    touch(&dir.path().join("hello-world/plugin.rhai"));
    touch(&dir.path().join("lua-plugin/plugin.lua"));
    touch(&dir.path().join("loose-file.txt"));
    dir
}

#[rstest]
fn discovers_directories_only(plugins_root: TempDir) {
    let catalog = PluginCatalog::discover(plugins_root.path(), &BTreeSet::new());
    let ids: Vec<&str> = catalog.units().map(PluginUnit::id).collect();
    assert_eq!(ids, vec!["hello-world", "lua-plugin"]);
    assert_eq!(catalog.len(), 2);
}

#[rstest]
fn skips_project_metadata_and_output(plugins_root: TempDir) {
    fs::create_dir_all(plugins_root.path().join(".idea")).expect("create .idea");
    fs::create_dir_all(plugins_root.path().join("out")).expect("create out");
    let catalog = PluginCatalog::discover(plugins_root.path(), &BTreeSet::new());
    assert!(catalog.get(".idea").is_none());
    assert!(catalog.get("out").is_none());
    assert!(catalog.get("hello-world").is_some());
}

#[rstest]
fn keeps_output_directory_without_project_metadata(plugins_root: TempDir) {
    fs::create_dir_all(plugins_root.path().join("out")).expect("create out");
    let catalog = PluginCatalog::discover(plugins_root.path(), &BTreeSet::new());
    assert!(catalog.get("out").is_some());
}

#[test]
fn missing_root_yields_empty_catalog() {
    let dir = TempDir::new().expect("temp dir");
    let catalog = PluginCatalog::discover(dir.path().join("absent"), &BTreeSet::new());
    assert!(catalog.is_empty());
}

#[rstest]
fn disabled_ids_are_reported(plugins_root: TempDir) {
    let disabled = BTreeSet::from(["lua-plugin".to_owned()]);
    let catalog = PluginCatalog::discover(plugins_root.path(), &disabled);
    assert!(!catalog.is_enabled("lua-plugin"));
    assert!(catalog.is_enabled("hello-world"));
}

#[rstest]
fn maps_nested_paths_to_owning_plugin(plugins_root: TempDir) {
    let catalog = PluginCatalog::discover(plugins_root.path(), &BTreeSet::new());
    let nested = plugins_root.path().join("hello-world/src/deep/file.rhai");
    let unit = catalog.owning_unit(&nested).expect("owner");
    assert_eq!(unit.id(), "hello-world");
    assert_eq!(unit.root(), plugins_root.path().join("hello-world"));

    let itself = catalog
        .owning_unit(&plugins_root.path().join("hello-world"))
        .expect("plugin dir maps to itself");
    assert_eq!(itself.id(), "hello-world");
}

#[rstest]
fn paths_outside_root_have_no_owner(plugins_root: TempDir) {
    let catalog = PluginCatalog::discover(plugins_root.path(), &BTreeSet::new());
    assert!(catalog.owning_unit(Path::new("/definitely/elsewhere")).is_none());
    assert!(catalog.owning_unit(plugins_root.path()).is_none());
}

#[test]
fn prefers_script_at_plugin_root() {
    let dir = TempDir::new().expect("temp dir");
    touch(&dir.path().join("p/plugin.rhai"));
    touch(&dir.path().join("p/nested/plugin.rhai"));
    let unit = PluginUnit::from_root(dir.path().join("p")).expect("unit");
    let found = unit.find_script("plugin.rhai").expect("lookup");
    assert_eq!(found, Some(dir.path().join("p/plugin.rhai")));
}

#[test]
fn finds_single_nested_script() {
    let dir = TempDir::new().expect("temp dir");
    touch(&dir.path().join("p/src/plugin.lua"));
    let unit = PluginUnit::from_root(dir.path().join("p")).expect("unit");
    let found = unit.find_script("plugin.lua").expect("lookup");
    assert_eq!(found, Some(dir.path().join("p/src/plugin.lua")));
}

#[test]
fn several_nested_scripts_are_ambiguous() {
    let dir = TempDir::new().expect("temp dir");
    touch(&dir.path().join("p/a/plugin.lua"));
    touch(&dir.path().join("p/b/plugin.lua"));
    let unit = PluginUnit::from_root(dir.path().join("p")).expect("unit");
    let error = unit.find_script("plugin.lua").expect_err("ambiguous");
    assert!(error.is_loading());
    assert!(error.message().contains("several"));
}

#[test]
fn absent_script_is_none() {
    let dir = TempDir::new().expect("temp dir");
    fs::create_dir_all(dir.path().join("p")).expect("create plugin");
    let unit = PluginUnit::from_root(dir.path().join("p")).expect("unit");
    assert_eq!(unit.find_script("plugin.rhai").expect("lookup"), None);
}
