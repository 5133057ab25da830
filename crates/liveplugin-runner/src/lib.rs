//! Live plugin runner.
//!
//! The `liveplugin-runner` crate loads, runs and reloads small script plugins
//! while the host keeps running. A live plugin is a directory under the
//! plugins root whose entry script (`plugin.rhai` or `plugin.lua`) is
//! compiled and executed on demand. Re-running a plugin disposes everything
//! the previous run registered before the new code starts.
//!
//! # Architecture
//!
//! A trigger maps paths to [`PluginUnit`]s and hands one attempt per plugin
//! to the [`RunSerializer`], which runs attempts for the same plugin strictly
//! one after another. Inside its lane an attempt:
//!
//! 1. snapshots the [`PluginCatalog`] and selects a [`ScriptRunner`];
//! 2. resolves `add-to-classpath` and `depends-on-plugin` directives with the
//!    [`DependencyResolver`];
//! 3. builds a fresh [`ExecutionEnvironment`] and compiles the entry script;
//! 4. asks the [`BindingManager`] for a new [`Binding`], disposing the
//!    previous one;
//! 5. runs the script and reports the [`RunOutcome`] to the [`OutcomeSink`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//!
//! use liveplugin_runner::{HostContext, LivePluginEngine};
//!
//! let engine = LivePluginEngine::builder("/home/me/.local/share/liveplugin/live-plugins")
//!     .build();
//! let handles = engine.run_plugins(
//!     &[PathBuf::from("/home/me/.local/share/liveplugin/live-plugins/hello")],
//!     false,
//!     &HostContext::default(),
//! );
//! for handle in handles {
//!     if let Err(error) = handle.wait() {
//!         eprintln!("{error}");
//!     }
//! }
//! engine.shutdown();
//! ```

pub mod backend;
pub mod binding;
pub mod directive;
pub mod disposable;
pub mod engine;
pub mod environment;
pub mod error;
pub mod report;
pub mod resolver;
pub mod serializer;
pub mod ui;
pub mod unit;

#[cfg(test)]
mod tests;

pub use self::backend::{
    Backend, ExecutablePlugin, ScriptHost, ScriptRunner, SetupContext, select_runner,
};
pub use self::binding::{Binding, BindingManager, HostContext, IssuedBinding, ProjectRef};
pub use self::directive::{Directive, DirectiveSyntax};
pub use self::disposable::{DisposeError, Disposable, ResourceScope};
pub use self::engine::{EngineBuilder, LivePluginEngine, RunHandle, RunKind};
pub use self::environment::{
    ArtifactVerifier, EnvironmentBuilder, ExecutionEnvironment, Layer, LayerOrigin, LayerSource,
};
pub use self::error::{AnError, RunOutcome};
pub use self::report::{OutcomeSink, RunState, TracingOutcomeSink};
pub use self::resolver::{
    DependencyResolver, EntryPoint, EnvironmentSnapshot, ResolvedDependencySet,
};
pub use self::serializer::{RunSerializer, SerializerError, Ticket};
pub use self::ui::{InlineUi, UiAction, UiDispatcher, UiError, UiLoop, UiThread};
pub use self::unit::{PluginCatalog, PluginUnit};
