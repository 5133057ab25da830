//! Behavioural tests covering the plugin run lifecycle.

use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

use crate::{AnError, HostContext, LivePluginEngine, RunOutcome};

struct LifecycleWorld {
    root: TempDir,
    disabled: Vec<String>,
    last_outcome: Option<RunOutcome>,
}

impl LifecycleWorld {
    fn new() -> Self {
        Self {
            root: TempDir::new().expect("temp dir"),
            disabled: Vec::new(),
            last_outcome: None,
        }
    }

    fn plugin_path(&self, id: &str) -> PathBuf {
        self.root.path().join(id)
    }

    fn write(&self, relative: &str, contents: &str) {
        let path = self.root.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, contents).expect("write file");
    }

    fn engine(&self) -> LivePluginEngine {
        LivePluginEngine::builder(self.root.path())
            .disabled_plugins(self.disabled.iter().cloned())
            .build()
    }

    fn run(&mut self, id: &str, times: usize) {
        let engine = self.engine();
        for _ in 0..times {
            self.last_outcome =
                Some(engine.execute(&self.plugin_path(id), false, &HostContext::default()));
        }
    }

    fn loading_error(&self) -> &AnError {
        let outcome = self.last_outcome.as_ref().expect("a run was attempted");
        let error = outcome.as_ref().expect_err("the run should fail");
        assert!(error.is_loading(), "expected a loading error, got {error}");
        error
    }
}

#[fixture]
fn world() -> RefCell<LifecycleWorld> {
    RefCell::new(LifecycleWorld::new())
}

#[given("an empty plugins root")]
fn given_empty_root(world: &RefCell<LifecycleWorld>) {
    assert!(
        fs::read_dir(world.borrow().root.path())
            .expect("read root")
            .next()
            .is_none()
    );
}

#[given("a rhai plugin \"{id}\" that writes its binding to a marker")]
fn given_marker_plugin(world: &RefCell<LifecycleWorld>, id: String) {
    world.borrow().write(
        &format!("{id}/plugin.rhai"),
        "write_file(pluginPath + \"/marker.txt\", `hello:${isIdeStartup}`);",
    );
}

#[given("a lua plugin \"{id}\" that counts its disposals")]
fn given_counting_plugin(world: &RefCell<LifecycleWorld>, id: String) {
    let borrowed = world.borrow();
    borrowed.write(&format!("{id}/disposals.txt"), "");
    borrowed.write(
        &format!("{id}/plugin.lua"),
        concat!(
            "local log = pluginPath .. '/disposals.txt'\n",
            "pluginDisposable:on_dispose(function()\n",
            "  write_file(log, read_file(log) .. 'x')\n",
            "end)\n",
        ),
    );
}

#[given("a plugin directory \"{id}\" without scripts")]
fn given_plugin_without_scripts(world: &RefCell<LifecycleWorld>, id: String) {
    world.borrow().write(&format!("{id}/README.md"), "nothing to run");
}

#[given("a rhai plugin \"{id}\" adding \"{token}\" to its classpath")]
fn given_classpath_plugin(world: &RefCell<LifecycleWorld>, id: String, token: String) {
    world.borrow().write(
        &format!("{id}/plugin.rhai"),
        &format!("// add-to-classpath {token}\nprint(\"unreachable\");"),
    );
}

#[given("a rhai plugin \"{id}\" depending on \"{dependency}\"")]
fn given_dependent_plugin(world: &RefCell<LifecycleWorld>, id: String, dependency: String) {
    let borrowed = world.borrow();
    borrowed.write(
        &format!("{id}/plugin.rhai"),
        &format!("// depends-on-plugin {dependency}\n"),
    );
    borrowed.write(&format!("{dependency}/plugin.rhai"), "");
}

#[given("the plugin \"{id}\" is disabled")]
fn given_disabled(world: &RefCell<LifecycleWorld>, id: String) {
    world.borrow_mut().disabled.push(id);
}

#[when("the plugin \"{id}\" is run")]
fn when_run_once(world: &RefCell<LifecycleWorld>, id: String) {
    world.borrow_mut().run(&id, 1);
}

#[when("the plugin \"{id}\" is run {times} times")]
fn when_run_repeatedly(world: &RefCell<LifecycleWorld>, id: String, times: usize) {
    world.borrow_mut().run(&id, times);
}

#[then("the run succeeds")]
fn then_run_succeeds(world: &RefCell<LifecycleWorld>) {
    let borrowed = world.borrow();
    let outcome = borrowed.last_outcome.as_ref().expect("a run was attempted");
    assert!(outcome.is_ok(), "run should succeed: {outcome:?}");
}

#[then("the marker of \"{id}\" reads \"{expected}\"")]
fn then_marker_reads(world: &RefCell<LifecycleWorld>, id: String, expected: String) {
    let marker = world.borrow().plugin_path(&id).join("marker.txt");
    assert_eq!(fs::read_to_string(marker).expect("marker"), expected);
}

#[then("the plugin \"{id}\" was disposed {count} times")]
fn then_disposed(world: &RefCell<LifecycleWorld>, id: String, count: usize) {
    let log = world.borrow().plugin_path(&id).join("disposals.txt");
    assert_eq!(fs::read_to_string(log).expect("disposal log").len(), count);
}

#[then("the run fails to load mentioning \"{fragment}\"")]
fn then_fails_to_load(world: &RefCell<LifecycleWorld>, fragment: String) {
    let borrowed = world.borrow();
    let error = borrowed.loading_error();
    assert!(
        error.message().contains(&fragment),
        "'{}' should mention '{fragment}'",
        error.message()
    );
}

#[scenario(
    path = "tests/features/plugin_lifecycle.feature",
    name = "A plugin runs with its binding"
)]
fn plugin_runs_with_binding(world: RefCell<LifecycleWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/plugin_lifecycle.feature",
    name = "Rerunning a plugin disposes the previous binding once"
)]
fn rerun_disposes_previous_binding(world: RefCell<LifecycleWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/plugin_lifecycle.feature",
    name = "A plugin without an entry script fails to load"
)]
fn missing_entry_script(world: RefCell<LifecycleWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/plugin_lifecycle.feature",
    name = "A missing classpath entry is named in the loading error"
)]
fn missing_classpath_entry(world: RefCell<LifecycleWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/plugin_lifecycle.feature",
    name = "A disabled dependency blocks setup"
)]
fn disabled_dependency(world: RefCell<LifecycleWorld>) {
    drop(world);
}
