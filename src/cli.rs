use crate::config::HostConfigOverrides;
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliOverrides {
    config: Option<PathBuf>,
    resources: Option<PathBuf>,
    ticks: Option<u64>,
    tick_ms: Option<u64>,
}

impl CliOverrides {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut overrides = CliOverrides::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // skip program name if present
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            if !flag.starts_with("--") {
                bail!("Unexpected argument '{flag}'. Use --config/--resources/--ticks/--tick-ms with values.");
            }
            let key = &flag[2..];
            let value =
                iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            match key {
                "config" => overrides.config = Some(PathBuf::from(value)),
                "resources" => overrides.resources = Some(PathBuf::from(value)),
                "ticks" => {
                    overrides.ticks =
                        Some(value.parse::<u64>().with_context(|| format!("Invalid tick count '{value}'"))?);
                }
                "tick-ms" => {
                    overrides.tick_ms =
                        Some(value.parse::<u64>().with_context(|| format!("Invalid tick interval '{value}'"))?);
                }
                _ => bail!("Unknown flag '{flag}'. Supported flags: --config, --resources, --ticks, --tick-ms."),
            }
        }
        Ok(overrides)
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config.as_deref()
    }

    pub fn into_config_overrides(self) -> HostConfigOverrides {
        HostConfigOverrides { resources_root: self.resources, max_ticks: self.ticks, tick_interval_ms: self.tick_ms }
    }
}
