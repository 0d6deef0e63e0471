use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rhai::INT;

use super::{call_parts, ScriptEnvironment};
use crate::callable::{CallContext, ScriptCallable};
use crate::codec;
use crate::context::ContextGuard;
use crate::error::{ScriptError, ScriptResult};

/// Handle to a callable exported by an environment. Handles are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExportHandle(u32);

impl ExportHandle {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub fn from_script(value: INT) -> Option<Self> {
        u32::try_from(value).ok().map(Self)
    }

    pub fn to_script(self) -> INT {
        self.0 as INT
    }
}

impl fmt::Display for ExportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Default)]
pub(crate) struct ExportTable {
    next: u32,
    entries: HashMap<ExportHandle, ScriptCallable>,
}

impl ExportTable {
    pub(crate) fn add(&mut self, callable: ScriptCallable) -> ExportHandle {
        let handle = ExportHandle(self.next);
        self.next += 1;
        self.entries.insert(handle, callable);
        handle
    }

    pub(crate) fn get(&self, handle: ExportHandle) -> Option<&ScriptCallable> {
        self.entries.get(&handle)
    }

    pub(crate) fn remove(&mut self, handle: ExportHandle) -> bool {
        self.entries.remove(&handle).is_some()
    }

    /// Drops every mapping; the counter keeps going.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

impl ScriptEnvironment {
    pub fn add_ref(&self, callable: ScriptCallable) -> ExportHandle {
        self.exports.lock().add(callable)
    }

    pub fn has_ref(&self, handle: ExportHandle) -> bool {
        self.exports.lock().get(handle).is_some()
    }

    pub fn get_ref(&self, handle: ExportHandle) -> ScriptResult<ScriptCallable> {
        self.exports.lock().get(handle).cloned().ok_or(ScriptError::HandleNotFound(handle))
    }

    pub fn remove_ref(&self, handle: ExportHandle) -> bool {
        self.exports.lock().remove(handle)
    }

    /// Invokes `callable` with the decoded `payload` and returns its encoded result.
    ///
    /// A unit result encodes as an empty list; any other value as a one-element list.
    pub fn call_export(self: &Arc<Self>, callable: &ScriptCallable, payload: &[u8]) -> ScriptResult<Vec<u8>> {
        let namespace = self.namespace.lock();
        let _context = ContextGuard::enter(self);
        let (engine, lib) = call_parts(&namespace)?;
        let args = codec::decode_args(payload)?;

        let call_context = CallContext { instance: self.instance_id, source: None };
        let result = callable.invoke(&engine, &lib, &args, &call_context)?;
        if result.is_unit() {
            codec::encode_args(&[])
        } else {
            codec::encode_args(std::slice::from_ref(&result))
        }
    }

    pub fn call_ref(self: &Arc<Self>, handle: ExportHandle, payload: &[u8]) -> ScriptResult<Vec<u8>> {
        let callable = self.get_ref(handle)?;
        self.call_export(&callable, payload)
    }
}
