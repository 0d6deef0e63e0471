use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{call_parts, ScriptEnvironment};
use crate::callable::{CallContext, ScriptCallable};
use crate::context::ContextGuard;
use crate::diagnostics::report_failure;

struct ScriptTimer {
    id: u64,
    callable: ScriptCallable,
    fire_at: Instant,
}

#[derive(Default)]
pub(crate) struct TimerQueue {
    next_id: u64,
    timers: Vec<ScriptTimer>,
}

impl TimerQueue {
    pub(crate) fn schedule(&mut self, callable: ScriptCallable, fire_at: Instant) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.timers.push(ScriptTimer { id, callable, fire_at });
        id
    }

    pub(crate) fn due(&self, now: Instant) -> Vec<(u64, ScriptCallable)> {
        self.timers
            .iter()
            .filter(|timer| timer.fire_at <= now)
            .map(|timer| (timer.id, timer.callable.clone()))
            .collect()
    }

    pub(crate) fn remove(&mut self, id: u64) {
        self.timers.retain(|timer| timer.id != id);
    }

    pub(crate) fn len(&self) -> usize {
        self.timers.len()
    }

    pub(crate) fn clear(&mut self) {
        self.timers.clear();
    }
}

impl ScriptEnvironment {
    pub fn set_timeout(&self, delay: Duration, callable: ScriptCallable) {
        self.timers.lock().schedule(callable, Instant::now() + delay);
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.lock().len()
    }

    /// Fires every timer that is due, returning how many ran.
    ///
    /// Timers scheduled by a callback during this tick wait for the next one. A failing callback
    /// is reported and still removed.
    pub fn tick(self: &Arc<Self>) -> usize {
        let due = self.timers.lock().due(Instant::now());
        let mut fired = 0;
        for (id, callable) in due {
            let namespace = self.namespace.lock();
            let Ok((engine, lib)) = call_parts(&namespace) else {
                break;
            };
            let _context = ContextGuard::enter(self);
            let call_context = CallContext { instance: self.instance_id, source: None };
            if let Err(err) = callable.invoke(&engine, &lib, &[], &call_context) {
                report_failure(self.resource.name(), "executing timer callback", &err);
            }
            self.timers.lock().remove(id);
            fired += 1;
        }
        fired
    }
}
