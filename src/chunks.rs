use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rhai::{Engine, AST};
use tracing::debug;

use crate::error::{ScriptError, ScriptResult};

/// A compiled, executable unit of script source.
#[derive(Clone)]
pub struct Chunk {
    name: Arc<str>,
    ast: Arc<AST>,
}

impl Chunk {
    pub fn compile(engine: &Engine, name: impl Into<String>, source: &str) -> ScriptResult<Self> {
        let name = name.into();
        let mut ast =
            engine.compile(source).map_err(|source| ScriptError::Compile { chunk: name.clone(), source })?;
        ast.set_source(name.as_str());
        Ok(Self { name: name.into(), ast: Arc::new(ast) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ast(&self) -> &AST {
        &self.ast
    }

    pub fn ptr_eq(&self, other: &Chunk) -> bool {
        Arc::ptr_eq(&self.ast, &other.ast)
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk").field("name", &self.name).finish()
    }
}

struct CachedChunk {
    hash: blake3::Hash,
    chunk: Chunk,
    stamp: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<PathBuf, CachedChunk>,
    next_stamp: u64,
    hits: u64,
    misses: u64,
}

/// Compiled resource scripts keyed by path, invalidated when the source hash changes.
pub struct ChunkCache {
    limit: usize,
    state: Mutex<CacheState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl ChunkCache {
    pub fn new(limit: usize) -> Self {
        Self { limit: limit.max(1), state: Mutex::new(CacheState::default()) }
    }

    pub fn compile_file(&self, engine: &Engine, path: &Path) -> ScriptResult<Chunk> {
        let source =
            fs::read_to_string(path).map_err(|source| ScriptError::Io { path: path.to_path_buf(), source })?;
        self.compile_keyed(engine, path, &source)
    }

    /// Compiles in-memory source, cached under `name` like a file of that path.
    pub fn compile_source(&self, engine: &Engine, name: &str, source: &str) -> ScriptResult<Chunk> {
        self.compile_keyed(engine, Path::new(name), source)
    }

    fn compile_keyed(&self, engine: &Engine, key: &Path, source: &str) -> ScriptResult<Chunk> {
        let hash = blake3::hash(source.as_bytes());
        {
            let mut state = self.state.lock();
            let cached = state.entries.get(key).filter(|entry| entry.hash == hash).map(|entry| entry.chunk.clone());
            if let Some(chunk) = cached {
                state.hits += 1;
                return Ok(chunk);
            }
        }

        // Compile outside the lock; a racing compile of the same key just replaces the entry.
        let chunk = Chunk::compile(engine, key.display().to_string(), source)?;
        let mut state = self.state.lock();
        state.misses += 1;
        let stamp = state.next_stamp;
        state.next_stamp += 1;
        state.entries.insert(key.to_path_buf(), CachedChunk { hash, chunk: chunk.clone(), stamp });
        if state.entries.len() > self.limit {
            let oldest = state.entries.iter().min_by_key(|(_, entry)| entry.stamp).map(|(path, _)| path.clone());
            if let Some(oldest) = oldest {
                debug!(path = %oldest.display(), "evicting cached chunk");
                state.entries.remove(&oldest);
            }
        }
        Ok(chunk)
    }

    pub fn invalidate(&self, path: &Path) -> bool {
        self.state.lock().entries.remove(path).is_some()
    }

    pub fn stats(&self) -> ChunkCacheStats {
        let state = self.state.lock();
        ChunkCacheStats { entries: state.entries.len(), hits: state.hits, misses: state.misses }
    }
}
