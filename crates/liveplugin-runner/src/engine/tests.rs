//! Unit tests for the engine façade.

use std::fs;
use std::sync::Mutex;

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    State(String, RunState),
    Finished(String, bool),
    DisposalFailed(String),
    Message(String, String),
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    fn push(&self, event: Event) {
        self.events.lock().expect("events lock").push(event);
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().expect("events lock").clone()
    }

    fn states_of(&self, plugin_id: &str) -> Vec<RunState> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::State(id, state) if id == plugin_id => Some(state),
                _ => None,
            })
            .collect()
    }

    fn finished(&self) -> Vec<(String, bool)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Finished(id, ok) => Some((id, ok)),
                _ => None,
            })
            .collect()
    }
}

impl OutcomeSink for RecordingSink {
    fn run_state_changed(&self, plugin_id: &str, state: RunState) {
        self.push(Event::State(plugin_id.to_owned(), state));
    }

    fn run_finished(&self, plugin_id: &str, outcome: &RunOutcome) {
        self.push(Event::Finished(plugin_id.to_owned(), outcome.is_ok()));
    }

    fn disposal_failed(&self, plugin_id: &str, _error: &AnError) {
        self.push(Event::DisposalFailed(plugin_id.to_owned()));
    }

    fn plugin_message(&self, plugin_id: &str, message: &str) {
        self.push(Event::Message(plugin_id.to_owned(), message.to_owned()));
    }
}

struct Fixture {
    dir: TempDir,
    sink: Arc<RecordingSink>,
    engine: LivePluginEngine,
}

impl Fixture {
    fn write(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, contents).expect("write file");
        path
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }
}

#[fixture]
fn fixture() -> Fixture {
    let dir = TempDir::new().expect("temp dir");
    let sink = Arc::new(RecordingSink::default());
    let engine = LivePluginEngine::builder(dir.path())
        .disabled_plugins(["sleeping"])
        .sink(sink.clone())
        .build();
    Fixture { dir, sink, engine }
}

#[rstest]
fn successful_run_reports_every_state(fixture: Fixture) {
    let script = fixture.write("hello/plugin.rhai", "print(\"hi\");");

    fixture
        .engine
        .execute(&script, false, &HostContext::default())
        .expect("run succeeds");

    assert_eq!(
        fixture.sink.states_of("hello"),
        vec![
            RunState::NotStarted,
            RunState::SettingUp,
            RunState::Ready,
            RunState::Running,
            RunState::Succeeded,
        ]
    );
    assert_eq!(fixture.sink.finished(), vec![("hello".to_owned(), true)]);
}

#[rstest]
fn setup_failure_never_issues_a_binding(fixture: Fixture) {
    fixture.write("empty/readme.md", "no script");

    let error = fixture
        .engine
        .execute(&fixture.path("empty"), false, &HostContext::default())
        .expect_err("setup fails");

    assert!(error.is_loading());
    assert_eq!(
        fixture.sink.states_of("empty"),
        vec![RunState::NotStarted, RunState::SettingUp, RunState::SetupFailed]
    );
    assert_eq!(fixture.engine.shared.bindings.live_count(), 0);
}

#[rstest]
fn paths_outside_the_root_fail_without_scheduling(fixture: Fixture) {
    let outside = TempDir::new().expect("second temp dir");

    let handles = fixture.engine.run_plugins(
        &[outside.path().join("plugin.rhai")],
        false,
        &HostContext::default(),
    );

    assert_eq!(handles.len(), 1);
    let error = handles
        .into_iter()
        .next()
        .expect("one handle")
        .wait()
        .expect_err("not a plugin");
    assert!(error.message().contains("is not inside the plugins root"));
    assert_eq!(fixture.engine.shared.serializer.lane_count(), 0);
}

#[rstest]
fn paths_of_one_plugin_collapse_into_one_run(fixture: Fixture) {
    let script = fixture.write("multi/plugin.rhai", "");
    let helper = fixture.write("multi/lib/helper.rhai", "");

    let handles = fixture.engine.run_plugins(
        &[script, helper, fixture.path("multi")],
        false,
        &HostContext::default(),
    );

    assert_eq!(handles.len(), 1);
    for handle in handles {
        assert_eq!(handle.plugin_id(), "multi");
        handle.wait().expect("run succeeds");
    }
}

#[rstest]
fn disabled_plugins_do_not_run(fixture: Fixture) {
    let script = fixture.write("sleeping/plugin.rhai", "");

    let error = fixture
        .engine
        .execute(&script, false, &HostContext::default())
        .expect_err("disabled");

    assert_eq!(error.message(), "Plugin 'sleeping' is disabled");
}

#[rstest]
fn rerun_disposes_the_previous_binding_before_running(fixture: Fixture) {
    fixture.write("counter/disposed.log", "");
    let script = fixture.write(
        "counter/plugin.rhai",
        concat!(
            "let log = pluginPath + \"/disposed.log\";\n",
            "pluginDisposable.on_dispose(|| write_file(log, read_file(log) + \"x\"));\n",
        ),
    );

    for _ in 0..3 {
        fixture
            .engine
            .execute(&script, false, &HostContext::default())
            .expect("run succeeds");
    }

    assert_eq!(
        fs::read_to_string(fixture.path("counter/disposed.log")).expect("log"),
        "xx"
    );
    assert_eq!(fixture.engine.shutdown().len(), 0);
    assert_eq!(
        fs::read_to_string(fixture.path("counter/disposed.log")).expect("log"),
        "xxx"
    );
}

#[rstest]
fn failing_disposal_is_reported_and_the_rerun_proceeds(fixture: Fixture) {
    let script = fixture.write(
        "grumpy/plugin.rhai",
        "pluginDisposable.on_dispose(|| { throw \"cannot let go\"; });",
    );

    fixture
        .engine
        .execute(&script, false, &HostContext::default())
        .expect("first run");
    fixture
        .engine
        .execute(&script, false, &HostContext::default())
        .expect("second run");

    assert!(
        fixture
            .sink
            .events()
            .contains(&Event::DisposalFailed("grumpy".to_owned()))
    );
}

#[rstest]
fn test_scripts_run_through_run_plugin_tests(fixture: Fixture) {
    fixture.write("checked/plugin.rhai", "throw \"main should not run\";");
    fixture.write(
        "checked/plugin-test.rhai",
        "write_file(pluginPath + \"/tested.txt\", `${isIdeStartup}`);",
    );

    let handles = fixture
        .engine
        .run_plugin_tests(&[fixture.path("checked")], &HostContext::default());

    for handle in handles {
        handle.wait().expect("tests pass");
    }
    assert_eq!(
        fs::read_to_string(fixture.path("checked/tested.txt")).expect("marker"),
        "false"
    );
}

#[rstest]
fn can_handle_requires_an_entry_script_of_the_requested_kind(fixture: Fixture) {
    let script = fixture.write("able/plugin.lua", "");
    fixture.write("unable/notes.txt", "");

    assert!(fixture.engine.can_handle(&[script.clone()], RunKind::Main));
    assert!(!fixture.engine.can_handle(&[script], RunKind::Tests));
    assert!(!fixture.engine.can_handle(&[fixture.path("unable")], RunKind::Main));
    assert!(!fixture.engine.can_handle(&[PathBuf::from("/elsewhere")], RunKind::Main));
}

#[rstest]
fn unload_plugin_disposes_its_binding(fixture: Fixture) {
    let script = fixture.write(
        "unloadable/plugin.rhai",
        "let dir = pluginPath; pluginDisposable.on_dispose(|| write_file(dir + \"/bye.txt\", \"bye\"));",
    );
    fixture
        .engine
        .execute(&script, false, &HostContext::default())
        .expect("run succeeds");

    assert!(fixture.engine.unload_plugin("unloadable").expect("unload"));
    assert!(!fixture.engine.unload_plugin("unloadable").expect("nothing left"));
    assert_eq!(
        fs::read_to_string(fixture.path("unloadable/bye.txt")).expect("marker"),
        "bye"
    );
}

#[rstest]
fn run_all_plugins_skips_disabled_plugins(fixture: Fixture) {
    fixture.write("one/plugin.rhai", "");
    fixture.write("two/plugin.lua", "");
    fixture.write("sleeping/plugin.rhai", "throw \"disabled plugins stay asleep\";");

    let handles = fixture.engine.run_all_plugins(true, &HostContext::default());

    let mut ids: Vec<String> = handles.iter().map(|handle| handle.plugin_id().to_owned()).collect();
    ids.sort();
    assert_eq!(ids, vec!["one".to_owned(), "two".to_owned()]);
    for handle in handles {
        handle.wait().expect("run succeeds");
    }
}

#[rstest]
fn runs_after_shutdown_are_rejected(fixture: Fixture) {
    let script = fixture.write("late/plugin.rhai", "");
    fixture.engine.shutdown();

    let error = fixture
        .engine
        .execute(&script, false, &HostContext::default())
        .expect_err("rejected");

    assert_eq!(error.plugin_id(), Some("late"));
    assert_eq!(fixture.sink.finished(), vec![("late".to_owned(), false)]);
}

#[test]
fn setup_panics_become_loading_errors() {
    let outcome: Result<(), AnError> = guard_setup("boom", || panic!("snapshot exploded"));

    let error = outcome.expect_err("panic is caught");
    assert!(error.is_loading());
    assert!(error.message().contains("Plugin 'boom' setup panicked"));
    assert!(error.message().contains("snapshot exploded"));
}

#[test]
fn setup_results_pass_through_unchanged() {
    assert_eq!(guard_setup("calm", || Ok::<_, AnError>(7)).ok(), Some(7));
    let error = guard_setup("calm", || Err::<(), _>(AnError::loading("no script")))
        .expect_err("error kept");
    assert_eq!(error.message(), "no script");
}

#[cfg(unix)]
#[rstest]
fn plugins_with_non_utf8_directory_names_still_run(fixture: Fixture) {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt as _;

    let folder = fixture.dir.path().join(OsStr::from_bytes(b"pl\xffg"));
    fs::create_dir_all(&folder).expect("create plugin");
    fs::write(folder.join("plugin.rhai"), "print(\"hi\");").expect("write script");

    let handles = fixture
        .engine
        .run_plugins(&[folder.join("plugin.rhai")], false, &HostContext::default());

    assert_eq!(handles.len(), 1);
    for handle in handles {
        assert_eq!(handle.plugin_id(), "pl\u{fffd}g");
        handle.wait().expect("run succeeds");
    }
    assert_eq!(fixture.sink.finished(), vec![("pl\u{fffd}g".to_owned(), true)]);
}
