//! Script host - the Lua state, its limits, and the class registry

use std::cell::Cell;
use std::rc::Rc;

use mlua::{Function, HookTriggers, Lua, MultiValue, StdLib, Table, Value, VmState};
use thiserror::Error;
use tracing::info;

use super::bridge;
use crate::objects::{ClassBuilder, ClassDescriptor, ClassError, ClassRegistry, ObjectRef};
use crate::Config;

/// Errors that can occur while hosting scripts
#[derive(Debug, Error)]
pub enum HostError {
    #[error("instruction limit exceeded ({0} > {1})")]
    InstructionLimitExceeded(u64, u64),

    #[error(transparent)]
    Class(#[from] ClassError),

    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Lua error: {0}")]
    Lua(#[from] mlua::Error),
}

/// A Lua state together with the classes published into it.
///
/// The Lua state is declared first so it is torn down, and every object
/// collected, before the registry goes away.
pub struct Host {
    lua: Lua,
    registry: ClassRegistry,
    config: Config,
    instruction_count: Rc<Cell<u64>>,
}

impl Host {
    /// Create a host with the given configuration
    pub fn new(config: Config) -> Result<Self, HostError> {
        // Only the libraries scripts can't escape through
        let lua = Lua::new_with(
            StdLib::STRING | StdLib::TABLE | StdLib::MATH | StdLib::UTF8 | StdLib::COROUTINE,
            mlua::LuaOptions::default(),
        )?;

        // Cap Lua allocations
        if config.memory_limit > 0 {
            lua.set_memory_limit(config.memory_limit)?;
        }

        // Count instructions and abort the chunk once over budget
        let instruction_count = Rc::new(Cell::new(0));
        if config.instruction_limit > 0 {
            let count = instruction_count.clone();
            let limit = config.instruction_limit;
            let interval = config.hook_interval.max(1);

            lua.set_hook(
                HookTriggers::new().every_nth_instruction(interval),
                move |_lua, _debug| {
                    let current = count.get() + u64::from(interval);
                    count.set(current);
                    if current > limit {
                        Err(mlua::Error::RuntimeError(format!(
                            "instruction limit exceeded ({current} > {limit})"
                        )))
                    } else {
                        Ok(VmState::Continue)
                    }
                },
            );
        }

        // Strip file, process and loader access
        Self::remove_unsafe_globals(&lua)?;

        // print goes to the log instead of stdout
        Self::route_print(&lua)?;

        Ok(Self {
            lua,
            registry: ClassRegistry::new(),
            config,
            instruction_count,
        })
    }

    /// Create a host from `classbridge.toml` and the environment
    pub fn from_env() -> Result<Self, HostError> {
        Self::new(Config::load()?)
    }

    fn remove_unsafe_globals(lua: &Lua) -> mlua::Result<()> {
        let globals = lua.globals();
        for name in [
            "os",
            "io",
            "loadfile",
            "dofile",
            "load",
            "loadstring",
            "require",
            "package",
            "debug",
            "collectgarbage",
        ] {
            globals.set(name, Value::Nil)?;
        }
        Ok(())
    }

    /// Scripts print into the log
    fn route_print(lua: &Lua) -> mlua::Result<()> {
        let print = lua.create_function(|lua, args: MultiValue| {
            let tostring: Function = lua.globals().get("tostring")?;
            let parts = args
                .into_iter()
                .map(|v| tostring.call::<String>(v))
                .collect::<mlua::Result<Vec<_>>>()?;
            info!(target: "script", "{}", parts.join("\t"));
            Ok(())
        })?;
        lua.globals().set("print", print)
    }

    /// Register a class and publish it to Lua
    pub fn register<T: Default + 'static>(
        &mut self,
        builder: ClassBuilder<T>,
    ) -> Result<Rc<ClassDescriptor>, ClassError> {
        self.registry.register(&self.lua, builder)
    }

    /// Look up a registered class
    pub fn class(&self, name: &str) -> Option<Rc<ClassDescriptor>> {
        self.registry.get(name)
    }

    /// Create an instance from Rust
    pub fn new_object(
        &self,
        class: &Rc<ClassDescriptor>,
        props: Option<Table>,
    ) -> Result<ObjectRef, HostError> {
        Ok(bridge::new_object(&self.lua, class, props)?)
    }

    /// Run a chunk and return its result
    pub fn execute<R>(&self, code: &str) -> Result<R, HostError>
    where
        R: mlua::FromLuaMulti,
    {
        self.instruction_count.set(0);
        let result = self.lua.load(code).eval::<R>();
        self.finish(result)
    }

    /// Call a Lua function with arguments
    pub fn call<A, R>(&self, func: &Function, args: A) -> Result<R, HostError>
    where
        A: mlua::IntoLuaMulti,
        R: mlua::FromLuaMulti,
    {
        self.instruction_count.set(0);
        let result = func.call::<R>(args);
        self.finish(result)
    }

    fn finish<R>(&self, result: mlua::Result<R>) -> Result<R, HostError> {
        let limit = self.config.instruction_limit;
        let used = self.instruction_count.get();
        if limit > 0 && used > limit {
            return Err(HostError::InstructionLimitExceeded(used, limit));
        }
        Ok(result?)
    }

    /// Run a full collection so unreachable objects get finalized
    pub fn collect_garbage(&self) -> Result<(), HostError> {
        // the first cycle runs finalizers, the second frees what they released
        self.lua.gc_collect()?;
        self.lua.gc_collect()?;
        Ok(())
    }

    /// Instructions counted during the last `execute`/`call`
    pub fn instruction_count(&self) -> u64 {
        self.instruction_count.get()
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
