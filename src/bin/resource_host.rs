use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use kestrel_resources::cli::CliOverrides;
use kestrel_resources::config::HostConfig;
use kestrel_resources::{RuntimeOptions, ScriptHost, ScriptRuntime};
use tracing::{error, info};

const DEFAULT_CONFIG_PATH: &str = "config/host.json";

fn main() {
    tracing_subscriber::fmt::init();
    let cli = match CliOverrides::parse_from_env() {
        Ok(parsed) => parsed,
        Err(err) => {
            error!("{err}");
            std::process::exit(2);
        }
    };
    if let Err(err) = run(cli) {
        error!("resource host error: {err:?}");
        std::process::exit(1);
    }
}

fn run(cli: CliOverrides) -> Result<()> {
    let mut config = match cli.config_path() {
        Some(path) => HostConfig::load(path)?,
        None => HostConfig::load_or_default(DEFAULT_CONFIG_PATH),
    };
    let overrides = cli.into_config_overrides();
    if !overrides.is_empty() {
        info!(fields = ?overrides.applied_fields(), "applying command-line overrides");
    }
    config.apply_overrides(&overrides);

    ScriptRuntime::initialize(RuntimeOptions::from_config(&config)).context("initializing script runtime")?;
    let mut host = ScriptHost::new()?;
    let started = host.start_configured(&config)?;
    info!(count = started.len(), resources = ?started, "resources started");

    let interval = Duration::from_millis(config.tick.interval_ms);
    let mut ticks = 0u64;
    while config.tick.max_ticks.map_or(true, |max| ticks < max) {
        host.tick();
        ticks += 1;
        thread::sleep(interval);
    }

    host.shutdown();
    info!(ticks, "resource host stopped");
    Ok(())
}
