pub mod bindings;
pub mod callable;
pub mod chunks;
pub mod cli;
pub mod codec;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod environment;
pub mod error;
pub mod host;
pub mod resource;
pub mod runtime;

pub use callable::{Arity, CallContext, ScriptCallable};
pub use codec::ScriptValue;
pub use environment::{EnvironmentState, EventSource, ExportHandle, InitHandler, ScriptEnvironment, SERVER_SOURCE};
pub use error::{ScriptError, ScriptResult};
pub use host::ScriptHost;
pub use resource::{Resource, ResourceState};
pub use runtime::{RuntimeOptions, ScriptRuntime};
