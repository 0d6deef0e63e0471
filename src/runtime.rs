//! Process-wide script runtime: the compiler, shared standard library, host bindings,
//! bootstrap chunks, chunk cache and the directory of live environments.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Mutex, RwLock};
use rhai::packages::{Package, StandardPackage};
use rhai::{Dynamic, Engine, EvalAltResult, EvalContext, INT};
use tracing::{debug, info};

use crate::bindings::BindingRegistry;
use crate::chunks::{Chunk, ChunkCache};
use crate::config::HostConfig;
use crate::context;
use crate::diagnostics::{ConsoleSink, StderrConsole};
use crate::environment::{EventSource, ScriptEnvironment};
use crate::error::{ScriptError, ScriptResult};

const PRELUDE_SOURCE: &str = include_str!("../system/prelude.rhai");
const RESOURCE_INIT_SOURCE: &str = include_str!("../system/resource_init.rhai");

/// Script variable bound to the source of the event being dispatched.
pub const EVENT_SOURCE_VAR: &str = "source";

/// A bootstrap script run in every namespace before any resource code.
#[derive(Debug, Clone)]
pub struct BootstrapSource {
    pub name: String,
    pub source: String,
}

impl BootstrapSource {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self { name: name.into(), source: source.into() }
    }
}

#[derive(Clone)]
pub struct RuntimeOptions {
    /// Operation budget per script call; 0 disables the limit.
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub chunk_cache_limit: usize,
    pub init_file: String,
    pub bindings: BindingRegistry,
    pub bootstrap: Vec<BootstrapSource>,
    pub console: Arc<dyn ConsoleSink>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            max_operations: 0,
            max_call_levels: 64,
            chunk_cache_limit: 256,
            init_file: "__resource.rhai".to_string(),
            bindings: BindingRegistry::with_host_defaults(),
            bootstrap: vec![
                BootstrapSource::new("system/prelude.rhai", PRELUDE_SOURCE),
                BootstrapSource::new("system/resource_init.rhai", RESOURCE_INIT_SOURCE),
            ],
            console: Arc::new(StderrConsole),
        }
    }
}

impl RuntimeOptions {
    pub fn from_config(config: &HostConfig) -> Self {
        Self {
            max_operations: config.runtime.max_operations,
            max_call_levels: config.runtime.max_call_levels,
            chunk_cache_limit: config.runtime.chunk_cache_limit,
            init_file: config.runtime.init_file.clone(),
            ..Self::default()
        }
    }

    pub fn with_console(mut self, console: Arc<dyn ConsoleSink>) -> Self {
        self.console = console;
        self
    }
}

pub struct ScriptRuntime {
    options: RuntimeOptions,
    std_package: StandardPackage,
    compiler: Engine,
    bootstrap: Vec<Chunk>,
    chunk_cache: ChunkCache,
    environments: RwLock<BTreeMap<u32, Weak<ScriptEnvironment>>>,
}

static RUNTIME: OnceLock<ScriptRuntime> = OnceLock::new();
static INIT_LOCK: Mutex<()> = parking_lot::const_mutex(());

impl ScriptRuntime {
    /// Initializes the process runtime with `options`.
    ///
    /// Fails with [`ScriptError::AlreadyInitialized`] if the runtime already exists.
    pub fn initialize(options: RuntimeOptions) -> ScriptResult<&'static ScriptRuntime> {
        let _init = INIT_LOCK.lock();
        if RUNTIME.get().is_some() {
            return Err(ScriptError::AlreadyInitialized);
        }
        let runtime = Self::build(options)?;
        Ok(RUNTIME.get_or_init(|| runtime))
    }

    /// Returns the process runtime, initializing it with defaults on first use.
    pub fn get() -> ScriptResult<&'static ScriptRuntime> {
        if let Some(runtime) = RUNTIME.get() {
            return Ok(runtime);
        }
        let _init = INIT_LOCK.lock();
        if let Some(runtime) = RUNTIME.get() {
            return Ok(runtime);
        }
        let runtime = Self::build(RuntimeOptions::default())?;
        Ok(RUNTIME.get_or_init(|| runtime))
    }

    pub fn try_get() -> Option<&'static ScriptRuntime> {
        RUNTIME.get()
    }

    fn build(options: RuntimeOptions) -> ScriptResult<Self> {
        let std_package = StandardPackage::new();
        let mut compiler = Engine::new_raw();
        compiler.register_global_module(std_package.as_shared_module());

        let bootstrap = options
            .bootstrap
            .iter()
            .map(|source| Chunk::compile(&compiler, source.name.clone(), &source.source))
            .collect::<ScriptResult<Vec<_>>>()?;

        info!(
            bindings = options.bindings.list().len(),
            bootstrap = bootstrap.len(),
            init_file = %options.init_file,
            "script runtime initialized"
        );
        Ok(Self {
            chunk_cache: ChunkCache::new(options.chunk_cache_limit),
            options,
            std_package,
            compiler,
            bootstrap,
            environments: RwLock::new(BTreeMap::new()),
        })
    }

    /// Builds a namespace engine for one resource: standard library, host bindings, limits,
    /// and `print`/`debug` routed to the log under the `script` target.
    pub fn new_engine(&self, resource_name: &str) -> Engine {
        let mut engine = Engine::new_raw();
        engine.register_global_module(self.std_package.as_shared_module());
        self.options.bindings.install_all(&mut engine);
        if self.options.max_operations > 0 {
            engine.set_max_operations(self.options.max_operations);
        }
        engine.set_max_call_levels(self.options.max_call_levels);
        engine.on_var(resolve_event_source);

        let print_resource = resource_name.to_string();
        engine.on_print(move |text| {
            tracing::info!(target: "script", resource = %print_resource, "{text}");
        });
        let debug_resource = resource_name.to_string();
        engine.on_debug(move |text, source, pos| {
            tracing::debug!(
                target: "script",
                resource = %debug_resource,
                source = source.unwrap_or("<unknown>"),
                "{pos:?} {text}"
            );
        });
        engine
    }

    pub fn compiler(&self) -> &Engine {
        &self.compiler
    }

    pub fn bootstrap_chunks(&self) -> &[Chunk] {
        &self.bootstrap
    }

    pub fn chunk_cache(&self) -> &ChunkCache {
        &self.chunk_cache
    }

    pub fn bindings(&self) -> &BindingRegistry {
        &self.options.bindings
    }

    pub fn init_file(&self) -> &str {
        &self.options.init_file
    }

    pub fn console(&self) -> &dyn ConsoleSink {
        self.options.console.as_ref()
    }

    pub(crate) fn register(&self, env: &Arc<ScriptEnvironment>) {
        self.environments.write().insert(env.instance_id(), Arc::downgrade(env));
    }

    pub(crate) fn unregister(&self, instance_id: u32) {
        self.environments.write().remove(&instance_id);
    }

    /// A live environment by instance id.
    pub fn environment(&self, instance_id: u32) -> Option<Arc<ScriptEnvironment>> {
        self.environments.read().get(&instance_id).and_then(Weak::upgrade)
    }

    pub fn live_environments(&self) -> Vec<Arc<ScriptEnvironment>> {
        let mut environments = self.environments.write();
        environments.retain(|_, env| env.strong_count() > 0);
        environments.values().filter_map(Weak::upgrade).collect()
    }

    /// Triggers `event_name` on every live environment, in instance id order.
    pub fn broadcast_event(&self, event_name: &str, payload: &[u8], source: EventSource) {
        let targets = self.live_environments();
        debug!(event = event_name, targets = targets.len(), "broadcasting event");
        for env in targets {
            env.trigger_event(event_name, payload, source);
        }
    }
}

/// Resolves `source` to the current environment's dispatching event source.
///
/// Variables the script declared itself win. Closures capture at creation, so they only see
/// `source` when created during a dispatch.
fn resolve_event_source(name: &str, index: usize, ctx: EvalContext) -> Result<Option<Dynamic>, Box<EvalAltResult>> {
    if name != EVENT_SOURCE_VAR || index > 0 || ctx.scope().contains(name) {
        return Ok(None);
    }
    Ok(context::current()
        .and_then(|env| env.event_source())
        .map(|source| Dynamic::from(source as INT)))
}
