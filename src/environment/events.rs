use std::collections::HashMap;
use std::sync::Arc;

use rhai::{Dynamic, Engine, AST};

use super::{call_parts, EventSource, ScriptEnvironment};
use crate::callable::{CallContext, ScriptCallable};
use crate::codec;
use crate::context::ContextGuard;
use crate::diagnostics::report_event_failure;
use crate::runtime::ScriptRuntime;

/// Handlers keyed by event name, kept in registration order.
#[derive(Default)]
pub(crate) struct EventHandlers {
    handlers: HashMap<String, Vec<ScriptCallable>>,
}

impl EventHandlers {
    pub(crate) fn add(&mut self, event_name: &str, handler: ScriptCallable) {
        self.handlers.entry(event_name.to_string()).or_default().push(handler);
    }

    pub(crate) fn snapshot(&self, event_name: &str) -> Option<Vec<ScriptCallable>> {
        self.handlers.get(event_name).filter(|handlers| !handlers.is_empty()).cloned()
    }

    pub(crate) fn count(&self, event_name: &str) -> usize {
        self.handlers.get(event_name).map_or(0, Vec::len)
    }

    pub(crate) fn clear(&mut self, event_name: &str) {
        if let Some(handlers) = self.handlers.get_mut(event_name) {
            handlers.clear();
        }
    }

    pub(crate) fn clear_all(&mut self) {
        self.handlers.clear();
    }
}

impl ScriptEnvironment {
    pub fn add_event_handler(&self, event_name: &str, handler: ScriptCallable) {
        self.events.lock().add(event_name, handler);
    }

    pub fn event_handler_count(&self, event_name: &str) -> usize {
        self.events.lock().count(event_name)
    }

    /// Delivers `payload` to every handler registered for `event_name`, in order.
    ///
    /// While the handlers run, the script variable `source` resolves to `source`. The first
    /// failing handler is reported, every handler for the event is removed, and the remaining
    /// handlers are skipped.
    pub fn trigger_event(self: &Arc<Self>, event_name: &str, payload: &[u8], source: EventSource) {
        let Some(handlers) = self.events.lock().snapshot(event_name) else {
            return;
        };

        let namespace = self.namespace.lock();
        let Ok((engine, lib)) = call_parts(&namespace) else {
            return;
        };
        let _context = ContextGuard::enter(self);
        let previous = self.event_source.lock().replace(source);

        match codec::decode_args(payload) {
            Ok(args) => self.dispatch(event_name, &handlers, &engine, &lib, &args, source),
            Err(err) => report_event_failure(self.resource.name(), event_name, &err),
        }

        *self.event_source.lock() = previous;
    }

    fn dispatch(
        &self,
        event_name: &str,
        handlers: &[ScriptCallable],
        engine: &Engine,
        lib: &AST,
        args: &[Dynamic],
        source: EventSource,
    ) {
        let call_context = CallContext { instance: self.instance_id, source: Some(source) };
        for handler in handlers {
            if let Err(err) = handler.invoke(engine, lib, args, &call_context) {
                report_event_failure(self.resource.name(), event_name, &err);
                if let Some(runtime) = ScriptRuntime::try_get() {
                    runtime.console().print(&format!("Error in resource {}: {err}\n", self.resource.name()));
                }
                self.events.lock().clear(event_name);
                return;
            }
        }
    }

    /// Source of the event being dispatched in this environment, if any.
    pub fn event_source(&self) -> Option<EventSource> {
        *self.event_source.lock()
    }
}
