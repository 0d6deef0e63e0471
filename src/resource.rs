use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::error::{ScriptError, ScriptResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Stopped,
    Parsing,
    Loaded,
    Running,
    Stopping,
}

/// Descriptor of a packaged resource as reported by the loader.
#[derive(Debug)]
pub struct Resource {
    name: String,
    path: PathBuf,
    state: RwLock<ResourceState>,
    server_scripts: Vec<String>,
}

impl Resource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            state: RwLock::new(ResourceState::Stopped),
            server_scripts: Vec::new(),
        }
    }

    pub fn with_server_scripts<I, S>(mut self, scripts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.server_scripts = scripts.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> ResourceState {
        *self.state.read()
    }

    pub fn set_state(&self, state: ResourceState) {
        *self.state.write() = state;
    }

    /// Script paths relative to [`Resource::path`].
    pub fn server_scripts(&self) -> &[String] {
        &self.server_scripts
    }

    /// Lists every directory under `root` that carries `init_file`, sorted by name.
    pub fn discover(root: impl AsRef<Path>, init_file: &str) -> ScriptResult<Vec<Resource>> {
        let root = root.as_ref();
        let entries =
            fs::read_dir(root).map_err(|source| ScriptError::Io { path: root.to_path_buf(), source })?;
        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ScriptError::Io { path: root.to_path_buf(), source })?;
            let path = entry.path();
            if !path.is_dir() || !path.join(init_file).is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|name| name.to_str()).map(str::to_string) else {
                continue;
            };
            found.push(Resource::new(name, path));
        }
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }
}
