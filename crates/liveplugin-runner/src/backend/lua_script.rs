//! Lua backend.

use std::error::Error as StdError;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Weak};

use mlua::{Function, Lua, MultiValue, Table, UserData, UserDataMethods, Value};
use tracing::info;

use super::{SCRIPT_TARGET, ScriptHost};
use crate::binding::{
    Binding, IS_IDE_STARTUP_KEY, PLUGIN_DISPOSABLE_KEY, PLUGIN_PATH_KEY, PROJECT_KEY, ProjectRef,
};
use crate::disposable::Disposable;
use crate::environment::{ArtifactVerifier, ExecutionEnvironment, LayerSource};
use crate::error::AnError;

/// Verifies Lua modules by loading them without executing.
pub struct LuaVerifier {
    lua: Lua,
}

impl std::fmt::Debug for LuaVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuaVerifier").finish_non_exhaustive()
    }
}

impl Default for LuaVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl LuaVerifier {
    /// Creates a verifier.
    #[must_use]
    pub fn new() -> Self {
        Self { lua: Lua::new() }
    }
}

impl ArtifactVerifier for LuaVerifier {
    fn extension(&self) -> &'static str {
        "lua"
    }

    fn verify(&self, path: &Path, source: &str) -> Result<(), Box<dyn StdError + Send + Sync>> {
        self.lua
            .load(source)
            .set_name(chunk_name(path))
            .into_function()?;
        Ok(())
    }
}

/// Compiled Lua entry chunk and the state it belongs to.
pub(super) struct LuaProgram {
    lua: Arc<Lua>,
    entry: Function,
}

impl LuaProgram {
    pub(super) fn compile(
        environment: &ExecutionEnvironment,
        script: &Path,
        source: &str,
    ) -> Result<Self, AnError> {
        let lua = Lua::new();
        configure_search_path(&lua, environment)?;
        register_base_api(&lua, environment.plugin_id()).map_err(|error| {
            AnError::loading_with_source("Error preparing the Lua host API", error)
        })?;
        let entry = lua
            .load(source)
            .set_name(chunk_name(script))
            .into_function()
            .map_err(|error| {
                AnError::loading_with_source(
                    format!("Error compiling {}: {error}", script.display()),
                    error,
                )
            })?;
        Ok(Self {
            lua: Arc::new(lua),
            entry,
        })
    }

    pub(super) fn run(
        self,
        binding: &Binding,
        host: &ScriptHost,
    ) -> Result<(), Box<dyn StdError + Send + Sync>> {
        let Self { lua, entry } = self;
        let globals = lua.globals();

        let plugin_id = binding.plugin_id().to_owned();
        let show_host = host.clone();
        let show = lua.create_function(move |_, message: String| {
            show_host
                .show(&plugin_id, &message)
                .map_err(mlua::Error::external)
        })?;
        globals.set("show", show)?;

        globals.set(PROJECT_KEY, project_value(&lua, binding.project())?)?;
        globals.set(IS_IDE_STARTUP_KEY, binding.is_ide_startup())?;
        globals.set(
            PLUGIN_PATH_KEY,
            binding.plugin_path().to_string_lossy().into_owned(),
        )?;
        let disposable = lua.create_userdata(ScriptDisposable {
            handle: binding.disposable().clone(),
            lua: Arc::downgrade(&lua),
        })?;
        globals.set(PLUGIN_DISPOSABLE_KEY, disposable)?;

        entry.call::<()>(())?;
        Ok(())
    }
}

/// Script view of the binding's disposable handle.
struct ScriptDisposable {
    handle: Disposable,
    lua: Weak<Lua>,
}

impl ScriptDisposable {
    fn on_dispose(&self, callback: Function) -> mlua::Result<()> {
        let Some(lua) = self.lua.upgrade() else {
            return Err(mlua::Error::RuntimeError(
                "Lua state is no longer available".to_owned(),
            ));
        };
        let key = lua.create_registry_value(callback)?;
        self.handle
            .register(move || {
                let function: Function = lua.registry_value(&key)?;
                let outcome = function.call::<()>(());
                lua.remove_registry_value(key)?;
                outcome?;
                Ok(())
            })
            .map_err(mlua::Error::external)
    }
}

impl UserData for ScriptDisposable {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("on_dispose", |_, this, callback: Function| {
            this.on_dispose(callback)
        });
        methods.add_method("is_disposed", |_, this, ()| Ok(this.handle.is_disposed()));
    }
}

fn chunk_name(path: &Path) -> String {
    format!("@{}", path.display())
}

fn register_base_api(lua: &Lua, plugin_id: &str) -> mlua::Result<()> {
    let globals = lua.globals();

    let print_id = plugin_id.to_owned();
    let print = lua.create_function(move |_, args: MultiValue| {
        let parts = args
            .iter()
            .map(Value::to_string)
            .collect::<mlua::Result<Vec<_>>>()?;
        let text = parts.join("\t");
        info!(target: SCRIPT_TARGET, plugin = print_id.as_str(), "{text}");
        Ok(())
    })?;
    globals.set("print", print)?;

    let read_file = lua.create_function(|_, path: String| {
        fs::read_to_string(&path).map_err(mlua::Error::external)
    })?;
    globals.set("read_file", read_file)?;

    let write_file = lua.create_function(|_, (path, text): (String, String)| {
        fs::write(&path, text).map_err(mlua::Error::external)
    })?;
    globals.set("write_file", write_file)?;
    Ok(())
}

fn configure_search_path(lua: &Lua, environment: &ExecutionEnvironment) -> Result<(), AnError> {
    let search_path = environment
        .search_directories()
        .flat_map(|directory| {
            [
                format!("{}/?.lua", directory.display()),
                format!("{}/?/init.lua", directory.display()),
            ]
        })
        .collect::<Vec<_>>()
        .join(";");
    let loading = |error: mlua::Error| {
        AnError::loading_with_source("Error configuring the Lua module search path", error)
    };

    let package: Table = lua.globals().get("package").map_err(loading)?;
    package.set("path", search_path).map_err(loading)?;
    package.set("cpath", "").map_err(loading)?;
    let preload: Table = package.get("preload").map_err(loading)?;

    let mut earlier_directories: Vec<&Path> = Vec::new();
    for layer in environment.layers() {
        match layer.source() {
            LayerSource::Directory(directory) => earlier_directories.push(directory),
            LayerSource::Module { name, path } => {
                let preloaded = preload.contains_key(name.as_str()).map_err(loading)?;
                if preloaded || shadowed(&earlier_directories, name) {
                    continue;
                }
                let source = fs::read_to_string(path).map_err(|error| {
                    AnError::loading_with_source(format!("Error reading {}", path.display()), error)
                })?;
                let loader = lua
                    .load(source)
                    .set_name(chunk_name(path))
                    .into_function()
                    .map_err(|error| {
                        AnError::loading_with_source(
                            format!("Error linking {}: {error}", path.display()),
                            error,
                        )
                    })?;
                preload.set(name.as_str(), loader).map_err(loading)?;
            }
        }
    }
    Ok(())
}

fn shadowed(directories: &[&Path], module: &str) -> bool {
    directories.iter().any(|directory| {
        directory.join(format!("{module}.lua")).is_file()
            || directory.join(module).join("init.lua").is_file()
    })
}

fn project_value(lua: &Lua, project: Option<&ProjectRef>) -> mlua::Result<Value> {
    let Some(reference) = project else {
        return Ok(Value::Nil);
    };
    let table = lua.create_table()?;
    table.set("name", reference.name.as_str())?;
    table.set(
        "basePath",
        reference.base_path.to_string_lossy().into_owned(),
    )?;
    Ok(Value::Table(table))
}
