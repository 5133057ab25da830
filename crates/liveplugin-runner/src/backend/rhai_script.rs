//! Rhai backend.

use std::error::Error as StdError;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use rhai::module_resolvers::{FileModuleResolver, ModuleResolversCollection, StaticModuleResolver};
use rhai::{AST, Dynamic, Engine, EvalAltResult, FnPtr, Map, Module, Scope};
use tracing::{debug, info};

use super::{SCRIPT_TARGET, ScriptHost};
use crate::binding::{
    Binding, IS_IDE_STARTUP_KEY, PLUGIN_DISPOSABLE_KEY, PLUGIN_PATH_KEY, PROJECT_KEY, ProjectRef,
};
use crate::disposable::Disposable;
use crate::environment::{ArtifactVerifier, ExecutionEnvironment, LayerSource};
use crate::error::AnError;

type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

/// Verifies Rhai modules by parsing them.
#[derive(Debug)]
pub struct RhaiVerifier {
    engine: Engine,
}

impl Default for RhaiVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl RhaiVerifier {
    /// Creates a verifier.
    #[must_use]
    pub fn new() -> Self {
        Self {
            engine: Engine::new(),
        }
    }
}

impl ArtifactVerifier for RhaiVerifier {
    fn extension(&self) -> &'static str {
        "rhai"
    }

    fn verify(&self, _path: &Path, source: &str) -> Result<(), Box<dyn StdError + Send + Sync>> {
        self.engine.compile(source)?;
        Ok(())
    }
}

/// Compiled Rhai entry script and the engine it was compiled for.
pub(super) struct RhaiProgram {
    engine: Engine,
    ast: AST,
}

impl RhaiProgram {
    pub(super) fn compile(
        environment: &ExecutionEnvironment,
        script: &Path,
        source: &str,
    ) -> Result<Self, AnError> {
        let mut engine = Engine::new();
        register_base_api(&mut engine, environment.plugin_id());
        engine.set_module_resolver(module_resolvers(environment)?);

        let mut ast = engine
            .compile_into_self_contained(&Scope::new(), source)
            .map_err(|error| {
                AnError::loading_with_source(
                    format!("Error compiling {}: {error}", script.display()),
                    *error,
                )
            })?;
        ast.set_source(script.to_string_lossy().into_owned());
        Ok(Self { engine, ast })
    }

    pub(super) fn run(
        self,
        binding: &Binding,
        host: &ScriptHost,
    ) -> Result<(), Box<dyn StdError + Send + Sync>> {
        let Self { mut engine, ast } = self;
        let plugin_id = binding.plugin_id().to_owned();
        let show_host = host.clone();
        engine.register_fn("show", move |message: &str| -> ScriptResult<()> {
            show_host
                .show(&plugin_id, message)
                .map_err(|error| error.to_string().into())
        });
        engine
            .register_type_with_name::<ScriptDisposable>("Disposable")
            .register_fn("on_dispose", ScriptDisposable::on_dispose)
            .register_fn("on_dispose", ScriptDisposable::on_dispose_named)
            .register_get("is_disposed", |this: &mut ScriptDisposable| {
                this.handle.is_disposed()
            });

        let shared_engine = Arc::new(engine);
        let shared_ast = Arc::new(ast);
        let mut scope = Scope::new();
        scope.push_constant_dynamic(PROJECT_KEY, project_value(binding.project()));
        scope.push_constant(IS_IDE_STARTUP_KEY, binding.is_ide_startup());
        scope.push_constant(
            PLUGIN_PATH_KEY,
            binding.plugin_path().to_string_lossy().into_owned(),
        );
        scope.push(
            PLUGIN_DISPOSABLE_KEY,
            ScriptDisposable {
                handle: binding.disposable().clone(),
                engine: Arc::clone(&shared_engine),
                ast: Arc::clone(&shared_ast),
            },
        );

        shared_engine.run_ast_with_scope(&mut scope, &shared_ast)?;
        Ok(())
    }
}

/// Script view of the binding's disposable handle.
#[derive(Clone)]
struct ScriptDisposable {
    handle: Disposable,
    engine: Arc<Engine>,
    ast: Arc<AST>,
}

impl ScriptDisposable {
    fn on_dispose(this: &mut Self, callback: FnPtr) -> ScriptResult<()> {
        let engine = Arc::clone(&this.engine);
        let ast = Arc::clone(&this.ast);
        this.handle
            .register(move || {
                let returned: Dynamic = callback.call(&engine, &ast, ())?;
                drop(returned);
                Ok(())
            })
            .map_err(|error| error.to_string().into())
    }

    fn on_dispose_named(this: &mut Self, function_name: &str) -> ScriptResult<()> {
        Self::on_dispose(this, FnPtr::new(function_name)?)
    }
}

fn register_base_api(engine: &mut Engine, plugin_id: &str) {
    let print_id = plugin_id.to_owned();
    engine.on_print(move |text| {
        info!(target: SCRIPT_TARGET, plugin = print_id.as_str(), "{text}");
    });
    let debug_id = plugin_id.to_owned();
    engine.on_debug(move |text, source, position| {
        debug!(
            target: SCRIPT_TARGET,
            plugin = debug_id.as_str(),
            source = source.unwrap_or_default(),
            position = %position,
            "{text}"
        );
    });
    engine.register_fn("read_file", |path: &str| -> ScriptResult<String> {
        fs::read_to_string(path).map_err(|error| format!("read_file({path}): {error}").into())
    });
    engine.register_fn("write_file", |path: &str, text: &str| -> ScriptResult<()> {
        fs::write(path, text).map_err(|error| format!("write_file({path}): {error}").into())
    });
}

fn module_resolvers(
    environment: &ExecutionEnvironment,
) -> Result<ModuleResolversCollection, AnError> {
    let mut collection = ModuleResolversCollection::new();
    for layer in environment.layers() {
        match layer.source() {
            LayerSource::Directory(directory) => {
                collection.push(FileModuleResolver::new_with_path(directory.clone()));
            }
            LayerSource::Module { name, path } => {
                let mut resolver = StaticModuleResolver::new();
                resolver.insert(name.as_str(), load_module(path)?);
                collection.push(resolver);
            }
        }
    }
    Ok(collection)
}

fn load_module(path: &Path) -> Result<Module, AnError> {
    let source = fs::read_to_string(path).map_err(|error| {
        AnError::loading_with_source(format!("Error reading {}", path.display()), error)
    })?;
    let mut engine = Engine::new();
    if let Some(parent) = path.parent() {
        engine.set_module_resolver(FileModuleResolver::new_with_path(parent));
    }
    let ast = engine.compile(&source).map_err(|error| {
        AnError::loading_with_source(format!("Error linking {}: {error}", path.display()), error)
    })?;
    Module::eval_ast_as_new(Scope::new(), &ast, &engine).map_err(|error| {
        AnError::loading_with_source(
            format!("Error linking {}: {error}", path.display()),
            *error,
        )
    })
}

fn project_value(project: Option<&ProjectRef>) -> Dynamic {
    project.map_or(Dynamic::UNIT, |reference| {
        let mut map = Map::new();
        map.insert("name".into(), Dynamic::from(reference.name.clone()));
        map.insert(
            "basePath".into(),
            Dynamic::from(reference.base_path.to_string_lossy().into_owned()),
        );
        Dynamic::from_map(map)
    })
}
