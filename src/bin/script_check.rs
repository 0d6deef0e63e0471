use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use kestrel_resources::ScriptRuntime;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let root = std::env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("resources"));
    println!("[script-check] compiling scripts under '{}'", root.display());

    let runtime = ScriptRuntime::get().context("initializing script runtime")?;
    let scripts = collect_scripts(&root)?;
    let mut failed = 0usize;
    for script in &scripts {
        if let Err(err) = runtime.chunk_cache().compile_file(runtime.compiler(), script) {
            eprintln!("[script-check] {err}");
            failed += 1;
        }
    }
    println!("[script-check] compiled {} of {} scripts", scripts.len() - failed, scripts.len());
    if failed > 0 {
        bail!("{failed} script(s) failed to compile");
    }
    Ok(())
}

fn collect_scripts(root: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    if root.is_file() {
        if root.extension().and_then(|ext| ext.to_str()) == Some("rhai") {
            out.push(root.to_path_buf());
        }
        return Ok(out);
    }
    for entry in std::fs::read_dir(root).with_context(|| format!("Reading '{}'", root.display()))? {
        let path = entry?.path();
        if path.is_dir() {
            out.extend(collect_scripts(&path)?);
        } else if path.extension().and_then(|ext| ext.to_str()) == Some("rhai") {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}
