use tracing::error;

use crate::error::ScriptError;

/// Host-visible console, separate from the process log.
pub trait ConsoleSink: Send + Sync {
    fn print(&self, line: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StderrConsole;

impl ConsoleSink for StderrConsole {
    fn print(&self, line: &str) {
        eprint!("{line}");
    }
}

pub(crate) fn report_failure(resource: &str, action: &str, err: &ScriptError) {
    error!(resource, "Error {action} for resource {resource}: {err}");
    if let Some(inner) = err.inner_cause() {
        error!(resource, "Inner exception: {inner}");
    }
}

pub(crate) fn report_event_failure(resource: &str, event: &str, err: &ScriptError) {
    error!(resource, event, "Error executing event handler for event {event} in resource {resource}: {err}");
    if let Some(inner) = err.inner_cause() {
        error!(resource, event, "Inner exception: {inner}");
    }
}
