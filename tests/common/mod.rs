#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Once, OnceLock};

use kestrel_resources::bindings::BindingRegistry;
use kestrel_resources::diagnostics::ConsoleSink;
use kestrel_resources::{Resource, RuntimeOptions, ScriptRuntime, ScriptValue};
use parking_lot::Mutex;
use rhai::{Dynamic, EvalAltResult, ImmutableString};

static INIT: Once = Once::new();
static RECORDS: Mutex<BTreeMap<String, Vec<ScriptValue>>> = parking_lot::const_mutex(BTreeMap::new());
static CONSOLE: OnceLock<Arc<RecordingConsole>> = OnceLock::new();

#[derive(Default)]
pub struct RecordingConsole {
    lines: Mutex<Vec<String>>,
}

impl ConsoleSink for RecordingConsole {
    fn print(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

fn record(key: ImmutableString, value: Dynamic) -> Result<(), Box<EvalAltResult>> {
    let value = ScriptValue::from_dynamic(&value).map_err(|err| err.into_eval())?;
    RECORDS.lock().entry(key.to_string()).or_default().push(value);
    Ok(())
}

/// The shared runtime with a `Record(key, value)` binding and a recording console.
pub fn runtime() -> &'static ScriptRuntime {
    INIT.call_once(|| {
        let console = CONSOLE.get_or_init(|| Arc::new(RecordingConsole::default())).clone();
        let mut bindings = BindingRegistry::with_host_defaults();
        bindings.register("Record", |engine, name| {
            engine.register_fn(name, record);
        });
        let options = RuntimeOptions { bindings, max_operations: 1_000_000, ..RuntimeOptions::default() }
            .with_console(console);
        ScriptRuntime::initialize(options).expect("runtime initializes once per test binary");
    });
    ScriptRuntime::get().expect("runtime available")
}

pub fn records(key: &str) -> Vec<ScriptValue> {
    RECORDS.lock().get(key).cloned().unwrap_or_default()
}

pub fn console_lines() -> Vec<String> {
    CONSOLE.get().map(|console| console.lines.lock().clone()).unwrap_or_default()
}

pub fn text(value: &str) -> ScriptValue {
    ScriptValue::String(value.to_string())
}

/// Writes `files` into `root/name` and returns a descriptor for that directory.
pub fn write_resource(root: &Path, name: &str, files: &[(&str, &str)]) -> Resource {
    let dir = root.join(name);
    fs::create_dir_all(&dir).expect("resource directory");
    for (file, source) in files {
        fs::write(dir.join(file), source).expect("resource file");
    }
    Resource::new(name, dir)
}
