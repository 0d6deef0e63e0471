//! Per-resource script environments.
//!
//! A [`ScriptEnvironment`] owns one namespace (engine, scope and accumulated function library)
//! guarded by a re-entrant lock. Every operation that runs script code holds that lock and a
//! [`ContextGuard`] for its whole duration; the `RefCell` inside the lock is only ever borrowed
//! briefly and never across script execution, so a script may call back into its own
//! environment on the same thread.

mod events;
mod exports;
mod timers;

use std::cell::RefCell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, ReentrantMutex};
use rand::Rng;
use rhai::{Engine, FnPtr, Scope, AST};
use tracing::{debug, error, info};

use crate::callable::ScriptCallable;
use crate::chunks::Chunk;
use crate::context::{self, ContextGuard};
use crate::diagnostics::report_failure;
use crate::error::{ScriptError, ScriptResult};
use crate::resource::Resource;
use crate::runtime::ScriptRuntime;

pub use exports::ExportHandle;

use events::EventHandlers;
use exports::ExportTable;
use timers::TimerQueue;

/// Origin of a triggered event; negative values are host-originated.
pub type EventSource = i32;

/// Source used for events raised by the host or by scripts through `TriggerEvent`.
pub const SERVER_SOURCE: EventSource = -1;

/// Wraps execution of a resource's init file.
///
/// Receives a thunk that runs the init chunk and the `pre_parse` flag. The handler decides
/// whether (and how) to invoke the thunk.
pub type InitHandler =
    Arc<dyn Fn(&mut dyn FnMut() -> ScriptResult<()>, bool) -> ScriptResult<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentState {
    Uninitialized,
    Created,
    Loaded,
    Disposed,
}

pub(crate) struct Namespace {
    engine: Arc<Engine>,
    scope: Scope<'static>,
    lib: Arc<AST>,
}

impl Namespace {
    fn new(engine: Engine) -> Self {
        Self { engine: Arc::new(engine), scope: Scope::new(), lib: Arc::new(AST::empty()) }
    }
}

type NamespaceSlot = RefCell<Option<Namespace>>;

pub struct ScriptEnvironment {
    instance_id: u32,
    resource: Arc<Resource>,
    namespace: ReentrantMutex<NamespaceSlot>,
    state: Mutex<EnvironmentState>,
    loaded_chunks: Mutex<Vec<Chunk>>,
    events: Mutex<EventHandlers>,
    exports: Mutex<ExportTable>,
    timers: Mutex<TimerQueue>,
    event_source: Mutex<Option<EventSource>>,
    server_scripts: Mutex<Vec<String>>,
    init_handler: Mutex<Option<InitHandler>>,
}

fn next_instance_id() -> u32 {
    static NEXT_ID: OnceLock<AtomicU32> = OnceLock::new();
    NEXT_ID
        .get_or_init(|| AtomicU32::new(rand::thread_rng().gen_range(1..0x4000_0000)))
        .fetch_add(1, Ordering::Relaxed)
}

impl ScriptEnvironment {
    pub fn new(resource: Arc<Resource>) -> Arc<Self> {
        Arc::new(Self {
            instance_id: next_instance_id(),
            resource,
            namespace: ReentrantMutex::new(RefCell::new(None)),
            state: Mutex::new(EnvironmentState::Uninitialized),
            loaded_chunks: Mutex::new(Vec::new()),
            events: Mutex::new(EventHandlers::default()),
            exports: Mutex::new(ExportTable::default()),
            timers: Mutex::new(TimerQueue::default()),
            event_source: Mutex::new(None),
            server_scripts: Mutex::new(Vec::new()),
            init_handler: Mutex::new(None),
        })
    }

    pub fn instance_id(&self) -> u32 {
        self.instance_id
    }

    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }

    pub fn state(&self) -> EnvironmentState {
        *self.state.lock()
    }

    pub fn loaded_chunk_count(&self) -> usize {
        self.loaded_chunks.lock().len()
    }

    pub fn queued_server_scripts(&self) -> Vec<String> {
        self.server_scripts.lock().clone()
    }

    /// Builds the namespace and runs the bootstrap chunks in it.
    pub fn create(self: &Arc<Self>) -> bool {
        self.run_lifecycle("creating script environment", |slot| {
            if self.state() != EnvironmentState::Uninitialized {
                return Err(ScriptError::InvalidState("script environment was already created"));
            }
            let runtime = ScriptRuntime::get()?;
            *slot.borrow_mut() = Some(Namespace::new(runtime.new_engine(self.resource.name())));

            for chunk in runtime.bootstrap_chunks() {
                if let Err(err) = run_chunk(slot, chunk) {
                    let released = slot.borrow_mut().take();
                    drop(released);
                    self.loaded_chunks.lock().clear();
                    return Err(err);
                }
                self.loaded_chunks.lock().push(chunk.clone());
            }

            runtime.register(self);
            *self.state.lock() = EnvironmentState::Created;
            debug!(resource = self.resource.name(), instance = self.instance_id, "script environment created");
            Ok(())
        })
    }

    /// Compiles and runs every server script the resource declares, in order.
    ///
    /// Stops at the first failure; chunks that already ran stay loaded.
    pub fn load_scripts(self: &Arc<Self>) -> bool {
        self.run_lifecycle("loading scripts", |slot| {
            let runtime = ScriptRuntime::get()?;
            for script in self.resource.server_scripts() {
                let path = self.resource.path().join(script);
                let chunk = runtime.chunk_cache().compile_file(runtime.compiler(), &path)?;
                run_chunk(slot, &chunk)?;
                self.loaded_chunks.lock().push(chunk);
            }
            *self.state.lock() = EnvironmentState::Loaded;
            info!(resource = self.resource.name(), chunks = self.loaded_chunk_count(), "resource scripts loaded");
            Ok(())
        })
    }

    /// Queues a script (relative to the resource path) for the next [`Self::do_init_file`].
    pub fn add_server_script(&self, path: &str) {
        let mut queued = self.server_scripts.lock();
        if !queued.iter().any(|script| script == path) {
            queued.push(path.to_string());
        }
    }

    pub fn set_init_handler(&self, handler: InitHandler) {
        *self.init_handler.lock() = Some(handler);
    }

    /// Runs the resource's init file through the init handler and, unless `pre_parse` is set,
    /// every server script it queued.
    pub fn do_init_file(self: &Arc<Self>, pre_parse: bool) -> bool {
        self.run_lifecycle("creating script environment", |slot| {
            let runtime = ScriptRuntime::get()?;
            let init_path = self.resource.path().join(runtime.init_file());
            let init_chunk = runtime.chunk_cache().compile_file(runtime.compiler(), &init_path)?;
            let mut run_init = || run_chunk(slot, &init_chunk);

            let handler = self.init_handler.lock().clone();
            match handler {
                Some(handler) => handler(&mut run_init, pre_parse)?,
                None => run_init()?,
            }

            if !pre_parse {
                let queued = std::mem::take(&mut *self.server_scripts.lock());
                for script in queued {
                    let path = self.resource.path().join(&script);
                    let chunk = runtime.chunk_cache().compile_file(runtime.compiler(), &path)?;
                    run_chunk(slot, &chunk)?;
                    self.loaded_chunks.lock().push(chunk);
                }
            }
            Ok(())
        })
    }

    /// Releases the namespace and every handler, export, timer and loaded chunk.
    ///
    /// Fails if this environment is executing on the calling thread.
    pub fn dispose(&self) -> ScriptResult<()> {
        if context::is_current(self) {
            error!(resource = self.resource.name(), "attempted to dispose the currently executing script environment");
            return Err(ScriptError::InvalidState("cannot dispose the currently executing script environment"));
        }
        if self.state() == EnvironmentState::Disposed {
            return Ok(());
        }

        let namespace = self.namespace.lock();
        let released = namespace.borrow_mut().take();
        drop(released);
        self.loaded_chunks.lock().clear();
        self.events.lock().clear_all();
        self.exports.lock().clear();
        self.timers.lock().clear();
        self.server_scripts.lock().clear();
        drop(namespace);

        if let Some(runtime) = ScriptRuntime::try_get() {
            runtime.unregister(self.instance_id);
        }
        *self.state.lock() = EnvironmentState::Disposed;
        debug!(resource = self.resource.name(), instance = self.instance_id, "script environment disposed");
        Ok(())
    }

    /// Captures `fn_ptr` with its arity resolved against this namespace's function library.
    pub fn resolve_callable(&self, fn_ptr: FnPtr) -> ScriptCallable {
        let namespace = self.namespace.lock();
        let lib = namespace.borrow().as_ref().map(|ns| ns.lib.clone());
        match lib {
            Some(lib) => ScriptCallable::resolve(fn_ptr, &lib),
            None => ScriptCallable::resolve(fn_ptr, &AST::empty()),
        }
    }

    fn run_lifecycle(
        self: &Arc<Self>,
        action: &str,
        op: impl FnOnce(&NamespaceSlot) -> ScriptResult<()>,
    ) -> bool {
        let namespace = self.namespace.lock();
        let _context = ContextGuard::enter(self);
        match op(&*namespace) {
            Ok(()) => true,
            Err(err) => {
                report_failure(self.resource.name(), action, &err);
                false
            }
        }
    }
}

impl std::fmt::Debug for ScriptEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEnvironment")
            .field("instance_id", &self.instance_id)
            .field("resource", &self.resource.name())
            .field("state", &self.state())
            .finish()
    }
}

/// Clones out what a call needs so no borrow outlives the call itself.
fn call_parts(slot: &NamespaceSlot) -> ScriptResult<(Arc<Engine>, Arc<AST>)> {
    slot.borrow()
        .as_ref()
        .map(|ns| (ns.engine.clone(), ns.lib.clone()))
        .ok_or(ScriptError::InvalidState("script environment has no namespace"))
}

/// Runs `chunk` in the namespace, folding its functions into the namespace library first.
fn run_chunk(slot: &NamespaceSlot, chunk: &Chunk) -> ScriptResult<()> {
    let (engine, runnable, mut scope) = {
        let mut borrowed = slot.borrow_mut();
        let ns = borrowed.as_mut().ok_or(ScriptError::InvalidState("script environment has no namespace"))?;
        let runnable = ns.lib.merge(chunk.ast());
        ns.lib = Arc::new(runnable.clone_functions_only());
        (ns.engine.clone(), runnable, std::mem::take(&mut ns.scope))
    };

    let result = engine.run_ast_with_scope(&mut scope, &runnable);

    if let Some(ns) = slot.borrow_mut().as_mut() {
        ns.scope = scope;
    }
    result.map_err(|err| ScriptError::runtime(chunk.name(), err))
}
