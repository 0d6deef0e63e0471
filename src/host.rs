use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{error, info, warn};

use crate::codec::{self, ScriptValue};
use crate::config::HostConfig;
use crate::environment::{EventSource, ExportHandle, InitHandler, ScriptEnvironment, SERVER_SOURCE};
use crate::resource::{Resource, ResourceState};
use crate::runtime::ScriptRuntime;

pub const RESOURCE_START_EVENT: &str = "onResourceStart";
pub const RESOURCE_STOP_EVENT: &str = "onResourceStop";

struct ResourceSlot {
    resource: Arc<Resource>,
    env: Arc<ScriptEnvironment>,
}

/// Starts resources in their own script environments and fans host calls out to them.
pub struct ScriptHost {
    runtime: &'static ScriptRuntime,
    slots: Vec<ResourceSlot>,
    init_handler: Option<InitHandler>,
}

impl ScriptHost {
    pub fn new() -> Result<Self> {
        let runtime = ScriptRuntime::get().context("initializing script runtime")?;
        Ok(Self { runtime, slots: Vec::new(), init_handler: None })
    }

    pub fn runtime(&self) -> &'static ScriptRuntime {
        self.runtime
    }

    /// Installed on every environment started after this call.
    pub fn set_init_handler(&mut self, handler: InitHandler) {
        self.init_handler = Some(handler);
    }

    /// Discovers resources under the configured root and starts the ones selected for autostart.
    pub fn start_configured(&mut self, config: &HostConfig) -> Result<Vec<String>> {
        let root = &config.resources.root;
        let discovered = Resource::discover(root, self.runtime.init_file())
            .with_context(|| format!("discovering resources under '{}'", root.display()))?;
        let mut started = Vec::new();
        for resource in discovered {
            if !config.should_autostart(resource.name()) {
                continue;
            }
            let name = resource.name().to_string();
            match self.start(resource) {
                Ok(_) => started.push(name),
                Err(err) => error!(resource = %name, "failed to start: {err:#}"),
            }
        }
        Ok(started)
    }

    pub fn start(&mut self, resource: Resource) -> Result<Arc<ScriptEnvironment>> {
        if self.slot(resource.name()).is_some() {
            bail!("resource '{}' is already started", resource.name());
        }
        let resource = Arc::new(resource);
        let env = ScriptEnvironment::new(resource.clone());
        if let Some(handler) = &self.init_handler {
            env.set_init_handler(handler.clone());
        }

        if let Err(err) = Self::bring_up(&resource, &env) {
            if let Err(dispose_err) = env.dispose() {
                warn!(resource = resource.name(), "dispose after failed start: {dispose_err}");
            }
            resource.set_state(ResourceState::Stopped);
            return Err(err);
        }

        info!(resource = resource.name(), instance = env.instance_id(), "resource started");
        self.slots.push(ResourceSlot { resource: resource.clone(), env: env.clone() });
        let payload = codec::encode_values(&[ScriptValue::String(resource.name().to_string())])?;
        self.broadcast(RESOURCE_START_EVENT, &payload, SERVER_SOURCE);
        Ok(env)
    }

    fn bring_up(resource: &Resource, env: &Arc<ScriptEnvironment>) -> Result<()> {
        if !env.create() {
            bail!("resource '{}' failed to create its script environment", resource.name());
        }
        resource.set_state(ResourceState::Parsing);
        if !env.do_init_file(false) {
            bail!("resource '{}' failed to run its init file", resource.name());
        }
        resource.set_state(ResourceState::Loaded);
        if !env.load_scripts() {
            bail!("resource '{}' failed to load its scripts", resource.name());
        }
        resource.set_state(ResourceState::Running);
        Ok(())
    }

    pub fn stop(&mut self, name: &str) -> Result<()> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.resource.name() == name)
            .ok_or_else(|| anyhow!("resource '{name}' is not started"))?;
        self.slots[index].resource.set_state(ResourceState::Stopping);
        let payload = codec::encode_values(&[ScriptValue::String(name.to_string())])?;
        self.broadcast(RESOURCE_STOP_EVENT, &payload, SERVER_SOURCE);

        let slot = self.slots.remove(index);
        slot.env.dispose().with_context(|| format!("disposing script environment of '{name}'"))?;
        slot.resource.set_state(ResourceState::Stopped);
        info!(resource = name, "resource stopped");
        Ok(())
    }

    /// Fires due timers in every started resource; returns how many ran.
    pub fn tick(&self) -> usize {
        self.slots.iter().map(|slot| slot.env.tick()).sum()
    }

    pub fn trigger_event(&self, event_name: &str, args: &[ScriptValue], source: EventSource) -> Result<()> {
        let payload = codec::encode_values(args)?;
        self.broadcast(event_name, &payload, source);
        Ok(())
    }

    fn broadcast(&self, event_name: &str, payload: &[u8], source: EventSource) {
        for slot in &self.slots {
            slot.env.trigger_event(event_name, payload, source);
        }
    }

    pub fn call_export(&self, resource: &str, handle: ExportHandle, args: &[ScriptValue]) -> Result<Vec<ScriptValue>> {
        let slot = self.slot(resource).ok_or_else(|| anyhow!("resource '{resource}' is not started"))?;
        let payload = codec::encode_values(args)?;
        let result = slot
            .env
            .call_ref(handle, &payload)
            .with_context(|| format!("calling export {handle} of '{resource}'"))?;
        Ok(codec::decode_values(&result)?)
    }

    pub fn environment(&self, resource: &str) -> Option<Arc<ScriptEnvironment>> {
        self.slot(resource).map(|slot| slot.env.clone())
    }

    pub fn resource_names(&self) -> Vec<&str> {
        self.slots.iter().map(|slot| slot.resource.name()).collect()
    }

    /// Stops every started resource, most recently started first.
    pub fn shutdown(&mut self) {
        while let Some(slot) = self.slots.last() {
            let name = slot.resource.name().to_string();
            if let Err(err) = self.stop(&name) {
                error!(resource = %name, "shutdown failed: {err:#}");
                self.slots.retain(|slot| slot.resource.name() != name);
            }
        }
    }

    fn slot(&self, name: &str) -> Option<&ResourceSlot> {
        self.slots.iter().find(|slot| slot.resource.name() == name)
    }
}

impl Drop for ScriptHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}
