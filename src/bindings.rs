//! Host functions bound into every script environment.
//!
//! The list is declared explicitly and fixed once the runtime is initialized; every
//! namespace created afterwards receives the same bindings in registration order.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rhai::{Array, Engine, EvalAltResult, FnPtr, ImmutableString, INT};
use tracing::warn;

use crate::codec;
use crate::context;
use crate::environment::{ExportHandle, ScriptEnvironment, SERVER_SOURCE};
use crate::error::ScriptError;
use crate::runtime::ScriptRuntime;

type NativeResult<T> = Result<T, Box<EvalAltResult>>;

pub type BindingInstaller = Arc<dyn Fn(&mut Engine, &str) + Send + Sync>;

#[derive(Clone)]
pub struct HostBinding {
    name: String,
    install: BindingInstaller,
}

impl HostBinding {
    pub fn new(name: impl Into<String>, install: impl Fn(&mut Engine, &str) + Send + Sync + 'static) -> Self {
        Self { name: name.into(), install: Arc::new(install) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn install(&self, engine: &mut Engine) {
        (self.install)(engine, &self.name);
    }
}

impl fmt::Debug for HostBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HostBinding").field(&self.name).finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BindingRegistry {
    bindings: Vec<HostBinding>,
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self { bindings: Vec::new() }
    }

    pub fn with_host_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("SetTimeout", |engine, name| {
            engine.register_fn(name, set_timeout);
        });
        registry.register("AddEventHandler", |engine, name| {
            engine.register_fn(name, add_event_handler);
        });
        registry.register("GetInstanceId", |engine, name| {
            engine.register_fn(name, get_instance_id);
        });
        registry.register("GetInvokingInstanceId", |engine, name| {
            engine.register_fn(name, get_invoking_instance_id);
        });
        registry.register("GetCurrentResourceName", |engine, name| {
            engine.register_fn(name, get_current_resource_name);
        });
        registry.register("GetInvokingResource", |engine, name| {
            engine.register_fn(name, get_invoking_resource);
        });
        registry.register("AddServerScript", |engine, name| {
            engine.register_fn(name, add_server_script);
        });
        registry.register("GetFunctionReference", |engine, name| {
            engine.register_fn(name, get_function_reference);
        });
        registry.register("TriggerEvent", |engine, name| {
            engine.register_fn(name, trigger_event);
        });
        registry.register("InvokeFunctionReference", |engine, name| {
            engine.register_fn(name, invoke_function_reference);
        });
        registry
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        install: impl Fn(&mut Engine, &str) + Send + Sync + 'static,
    ) -> &mut Self {
        let binding = HostBinding::new(name, install);
        if self.contains(binding.name()) {
            warn!(binding = binding.name(), "host binding registered twice; the later one wins");
        }
        self.bindings.push(binding);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.iter().any(|binding| binding.name == name)
    }

    pub fn list(&self) -> &[HostBinding] {
        &self.bindings
    }

    pub fn install_all(&self, engine: &mut Engine) {
        for binding in &self.bindings {
            binding.install(engine);
        }
    }
}

fn current_environment() -> NativeResult<Arc<ScriptEnvironment>> {
    context::current().ok_or_else(|| ScriptError::NoActiveEnvironment.into_eval())
}

fn invoking_environment() -> NativeResult<Arc<ScriptEnvironment>> {
    context::invoking().ok_or_else(|| ScriptError::NoActiveEnvironment.into_eval())
}

fn set_timeout(milliseconds: INT, callback: FnPtr) -> NativeResult<()> {
    let env = current_environment()?;
    let delay = Duration::from_millis(milliseconds.max(0) as u64);
    let callable = env.resolve_callable(callback);
    env.set_timeout(delay, callable);
    Ok(())
}

fn add_event_handler(event_name: ImmutableString, handler: FnPtr) -> NativeResult<()> {
    let env = current_environment()?;
    let callable = env.resolve_callable(handler);
    env.add_event_handler(event_name.as_str(), callable);
    Ok(())
}

fn get_instance_id() -> NativeResult<INT> {
    Ok(current_environment()?.instance_id() as INT)
}

fn get_invoking_instance_id() -> NativeResult<INT> {
    Ok(invoking_environment()?.instance_id() as INT)
}

fn get_current_resource_name() -> NativeResult<ImmutableString> {
    Ok(current_environment()?.resource().name().into())
}

fn get_invoking_resource() -> NativeResult<ImmutableString> {
    Ok(invoking_environment()?.resource().name().into())
}

fn add_server_script(path: ImmutableString) -> NativeResult<()> {
    current_environment()?.add_server_script(path.as_str());
    Ok(())
}

fn get_function_reference(callback: FnPtr) -> NativeResult<INT> {
    let env = current_environment()?;
    let callable = env.resolve_callable(callback);
    Ok(env.add_ref(callable).to_script())
}

fn trigger_event(event_name: ImmutableString, args: Array) -> NativeResult<()> {
    let payload = codec::encode_args(&args).map_err(ScriptError::into_eval)?;
    let runtime = ScriptRuntime::get().map_err(ScriptError::into_eval)?;
    runtime.broadcast_event(event_name.as_str(), &payload, SERVER_SOURCE);
    Ok(())
}

fn invoke_function_reference(instance_id: INT, handle: INT, args: Array) -> NativeResult<Array> {
    let runtime = ScriptRuntime::get().map_err(ScriptError::into_eval)?;
    let target = u32::try_from(instance_id)
        .ok()
        .and_then(|id| runtime.environment(id))
        .ok_or_else(|| -> Box<EvalAltResult> { format!("no script environment with instance id {instance_id}").into() })?;
    let handle = ExportHandle::from_script(handle)
        .ok_or_else(|| -> Box<EvalAltResult> { format!("invalid function reference {handle}").into() })?;
    let payload = codec::encode_args(&args).map_err(ScriptError::into_eval)?;
    let result = target.call_ref(handle, &payload).map_err(ScriptError::into_eval)?;
    let values = codec::decode_args(&result).map_err(ScriptError::into_eval)?;
    Ok(values.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_defaults_keep_declaration_order() {
        let registry = BindingRegistry::with_host_defaults();
        let names: Vec<_> = registry.list().iter().map(HostBinding::name).collect();
        assert_eq!(names.first(), Some(&"SetTimeout"));
        assert!(names.contains(&"AddEventHandler"));
        assert!(names.contains(&"GetInstanceId"));
        assert_eq!(names.len(), 10);
    }

    #[test]
    fn bindings_without_active_environment_raise_script_errors() {
        let mut engine = Engine::new_raw();
        BindingRegistry::with_host_defaults().install_all(&mut engine);
        let err = engine.eval::<INT>("GetInstanceId()").unwrap_err();
        assert!(err.to_string().contains("no script environment is active"), "unexpected error: {err}");
    }

    #[test]
    fn custom_bindings_are_installed_under_their_name() {
        let mut registry = BindingRegistry::new();
        registry.register("Answer", |engine, name| {
            engine.register_fn(name, || 42 as INT);
        });
        let mut engine = Engine::new_raw();
        registry.install_all(&mut engine);
        assert_eq!(engine.eval::<INT>("Answer()").unwrap(), 42);
    }
}
