//! Thread-local record of which script environment is running and which one invoked it.
//!
//! Every entry point that runs script code holds a [`ContextGuard`] for its whole duration.
//! The guard saves the previous `(current, last)` pair on entry and restores it when dropped,
//! so nesting unwinds in strict stack order on success, early return, and panic alike.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::environment::ScriptEnvironment;
use crate::resource::ResourceState;

#[derive(Default)]
struct ContextState {
    current: Option<Arc<ScriptEnvironment>>,
    last: Option<Arc<ScriptEnvironment>>,
    last_refcount: u32,
    depth: u32,
}

impl ContextState {
    fn set_last(&mut self, value: Option<Arc<ScriptEnvironment>>) -> Option<Arc<ScriptEnvironment>> {
        match (&self.last, &value) {
            (None, Some(_)) => self.last_refcount += 1,
            (Some(_), None) => self.last_refcount = self.last_refcount.saturating_sub(1),
            _ => {}
        }
        std::mem::replace(&mut self.last, value)
    }
}

thread_local! {
    static CONTEXT: RefCell<ContextState> = RefCell::new(ContextState::default());
}

/// Scoped push of an environment onto this thread's context stack.
#[must_use = "the environment is only current while the guard is alive"]
pub struct ContextGuard {
    prev_current: Option<Arc<ScriptEnvironment>>,
    prev_last: Option<Arc<ScriptEnvironment>>,
    // The guard restores thread-local state and must be dropped on the thread that made it.
    _not_send: PhantomData<*const ()>,
}

impl ContextGuard {
    pub fn enter(env: &Arc<ScriptEnvironment>) -> Self {
        CONTEXT.with(|cell| {
            let mut state = cell.borrow_mut();
            let prev_current = state.current.replace(env.clone());
            let prev_last = state.set_last(prev_current.clone());
            state.depth += 1;
            Self { prev_current, prev_last, _not_send: PhantomData }
        })
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let prev_current = self.prev_current.take();
        let prev_last = self.prev_last.take();
        // Released outside the borrow so a final drop never runs while the state is locked.
        let _released = CONTEXT.with(|cell| {
            let mut state = cell.borrow_mut();
            let current = std::mem::replace(&mut state.current, prev_current);
            let last = state.set_last(prev_last);
            state.depth = state.depth.saturating_sub(1);
            (current, last)
        });
    }
}

pub fn current() -> Option<Arc<ScriptEnvironment>> {
    CONTEXT.with(|cell| cell.borrow().current.clone())
}

pub fn last() -> Option<Arc<ScriptEnvironment>> {
    CONTEXT.with(|cell| cell.borrow().last.clone())
}

/// Number of guards currently alive on this thread.
pub fn depth() -> u32 {
    CONTEXT.with(|cell| cell.borrow().depth)
}

/// 1 while a "last" environment is recorded, 0 otherwise.
pub fn last_refcount() -> u32 {
    CONTEXT.with(|cell| cell.borrow().last_refcount)
}

pub fn is_current(env: &ScriptEnvironment) -> bool {
    CONTEXT.with(|cell| {
        cell.borrow().current.as_ref().is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), env))
    })
}

/// The environment that actions should be attributed to.
///
/// While the current environment's resource is still parsing its init file, actions belong to
/// that resource itself; otherwise they belong to whichever environment called into the current
/// one, falling back to the current environment when nothing did.
pub fn invoking() -> Option<Arc<ScriptEnvironment>> {
    CONTEXT.with(|cell| {
        let state = cell.borrow();
        let current = state.current.as_ref()?;
        if current.resource().state() == ResourceState::Parsing {
            return Some(current.clone());
        }
        Some(state.last.as_ref().unwrap_or(current).clone())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Resource;

    fn env(name: &str) -> Arc<ScriptEnvironment> {
        let resource = Resource::new(name, format!("resources/{name}"));
        resource.set_state(ResourceState::Running);
        ScriptEnvironment::new(Arc::new(resource))
    }

    fn same(a: &Option<Arc<ScriptEnvironment>>, b: &Arc<ScriptEnvironment>) -> bool {
        a.as_ref().is_some_and(|a| Arc::ptr_eq(a, b))
    }

    #[test]
    fn nested_guards_restore_in_stack_order() {
        let a = env("a");
        let b = env("b");
        assert!(current().is_none());
        {
            let _outer = ContextGuard::enter(&a);
            assert!(same(&current(), &a));
            assert!(last().is_none());
            assert_eq!(last_refcount(), 0);
            {
                let _inner = ContextGuard::enter(&b);
                assert!(same(&current(), &b));
                assert!(same(&last(), &a));
                assert_eq!(last_refcount(), 1);
                assert_eq!(depth(), 2);
                assert!(same(&invoking(), &a));
            }
            assert!(same(&current(), &a));
            assert!(last().is_none());
            assert_eq!(last_refcount(), 0);
            assert!(same(&invoking(), &a));
        }
        assert!(current().is_none());
        assert_eq!(depth(), 0);
    }

    #[test]
    fn parsing_resource_attributes_actions_to_itself() {
        let a = env("a");
        let b = env("b");
        b.resource().set_state(ResourceState::Parsing);
        let _outer = ContextGuard::enter(&a);
        let _inner = ContextGuard::enter(&b);
        assert!(same(&invoking(), &b));
        b.resource().set_state(ResourceState::Running);
        assert!(same(&invoking(), &a));
    }

    #[test]
    fn reentering_the_same_environment_keeps_it_current() {
        let a = env("a");
        let _outer = ContextGuard::enter(&a);
        {
            let _again = ContextGuard::enter(&a);
            assert!(is_current(&a));
            assert!(same(&last(), &a));
        }
        assert!(is_current(&a));
        assert!(last().is_none());
    }

    #[test]
    fn guard_restores_context_when_unwinding() {
        let a = env("a");
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = ContextGuard::enter(&a);
            panic!("script host panicked");
        }));
        assert!(result.is_err());
        assert!(current().is_none());
        assert_eq!(depth(), 0);
    }

    #[test]
    fn context_is_per_thread() {
        let a = env("a");
        let _guard = ContextGuard::enter(&a);
        let seen_elsewhere = std::thread::spawn(|| current().is_none()).join().unwrap();
        assert!(seen_elsewhere);
        assert!(is_current(&a));
    }
}
