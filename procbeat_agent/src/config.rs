//! Agent configuration: defaults, optional JSON file, `PROCBEAT_*` env, CLI flags.
//! Config file: $XDG_CONFIG_HOME/procbeat/agent.json (fallback ~/.config/procbeat/agent.json)

use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::ConfigError;

pub const USAGE: &str = "Usage: procbeat_agent [--endpoint URL|-e URL] [--name NAME|-n NAME] \
[--interval-ms MS] [--flush-every N] [--top-n N] [--proc-root PATH] [--config PATH|-c PATH] \
[--gzip] [--dry-run]";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Collection endpoint; required unless running with `--dry-run`.
    pub endpoint: Option<String>,
    /// Agent identifier sent as the report `name`; host name when unset.
    pub name: Option<String>,
    pub fast_interval_ms: u64,
    /// Fast ticks per report flush (also the batch capacity).
    pub flush_every: u32,
    /// Processes per data point.
    pub top_n: usize,
    pub proc_root: PathBuf,
    pub request_timeout_ms: u64,
    pub gzip: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            name: None,
            fast_interval_ms: 1_000,
            flush_every: 10,
            top_n: 10,
            proc_root: PathBuf::from("/proc"),
            request_timeout_ms: 5_000,
            gzip: false,
        }
    }
}

/// Flags as given on the command line; `None` leaves lower layers alone.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CliArgs {
    pub endpoint: Option<String>,
    pub name: Option<String>,
    pub interval_ms: Option<String>,
    pub flush_every: Option<String>,
    pub top_n: Option<String>,
    pub proc_root: Option<String>,
    pub config: Option<String>,
    pub gzip: bool,
    pub dry_run: bool,
    pub help: bool,
}

pub fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<CliArgs, String> {
    let mut it = args.into_iter();
    let _ = it.next(); // program name
    let mut out = CliArgs::default();

    while let Some(arg) = it.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((f, v)) if f.starts_with("--") => (f.to_string(), Some(v.to_string())),
            _ => (arg.clone(), None),
        };
        let slot = match flag.as_str() {
            "-h" | "--help" => {
                out.help = true;
                continue;
            }
            "--gzip" => {
                out.gzip = true;
                continue;
            }
            "--dry-run" => {
                out.dry_run = true;
                continue;
            }
            "--endpoint" | "-e" => &mut out.endpoint,
            "--name" | "-n" => &mut out.name,
            "--interval-ms" => &mut out.interval_ms,
            "--flush-every" => &mut out.flush_every,
            "--top-n" => &mut out.top_n,
            "--proc-root" => &mut out.proc_root,
            "--config" | "-c" => &mut out.config,
            _ => return Err(format!("Unexpected argument {arg:?}. {USAGE}")),
        };
        let value = match inline {
            Some(v) => v,
            None => it
                .next()
                .ok_or_else(|| format!("Missing value for {flag}. {USAGE}"))?,
        };
        if value.is_empty() {
            return Err(format!("Empty value for {flag}. {USAGE}"));
        }
        *slot = Some(value);
    }
    Ok(out)
}

pub fn config_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join("procbeat")
    } else {
        dirs_next::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("procbeat")
    }
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("agent.json")
}

fn parse_num<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

impl AgentConfig {
    /// Reads a JSON config file. Unknown keys are rejected.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let s = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&s).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies `PROCBEAT_*` overrides; `lookup` is normally `std::env::var`.
    pub fn apply_env<L>(&mut self, lookup: L) -> Result<(), ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PROCBEAT_ENDPOINT").filter(|v| !v.is_empty()) {
            self.endpoint = Some(v);
        }
        if let Some(v) = lookup("PROCBEAT_NAME").filter(|v| !v.is_empty()) {
            self.name = Some(v);
        }
        if let Some(v) = lookup("PROCBEAT_INTERVAL_MS") {
            self.fast_interval_ms = parse_num("PROCBEAT_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("PROCBEAT_FLUSH_EVERY") {
            self.flush_every = parse_num("PROCBEAT_FLUSH_EVERY", &v)?;
        }
        if let Some(v) = lookup("PROCBEAT_TOP_N") {
            self.top_n = parse_num("PROCBEAT_TOP_N", &v)?;
        }
        if let Some(v) = lookup("PROCBEAT_PROC_ROOT").filter(|v| !v.is_empty()) {
            self.proc_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("PROCBEAT_GZIP") {
            self.gzip = parse_bool("PROCBEAT_GZIP", &v)?;
        }
        Ok(())
    }

    pub fn apply_cli(&mut self, cli: &CliArgs) -> Result<(), ConfigError> {
        if let Some(v) = &cli.endpoint {
            self.endpoint = Some(v.clone());
        }
        if let Some(v) = &cli.name {
            self.name = Some(v.clone());
        }
        if let Some(v) = &cli.interval_ms {
            self.fast_interval_ms = parse_num("--interval-ms", v)?;
        }
        if let Some(v) = &cli.flush_every {
            self.flush_every = parse_num("--flush-every", v)?;
        }
        if let Some(v) = &cli.top_n {
            self.top_n = parse_num("--top-n", v)?;
        }
        if let Some(v) = &cli.proc_root {
            self.proc_root = PathBuf::from(v);
        }
        if cli.gzip {
            self.gzip = true;
        }
        Ok(())
    }

    pub fn validate(&self, dry_run: bool) -> Result<(), ConfigError> {
        if self.fast_interval_ms == 0 {
            return Err(ConfigError::Invalid("fast_interval_ms must be > 0".into()));
        }
        if self.flush_every == 0 {
            return Err(ConfigError::Invalid("flush_every must be >= 1".into()));
        }
        if self.top_n == 0 {
            return Err(ConfigError::Invalid("top_n must be >= 1".into()));
        }
        if dry_run {
            return Ok(());
        }
        match self.endpoint.as_deref() {
            None => Err(ConfigError::Invalid(
                "no endpoint configured (use --endpoint, PROCBEAT_ENDPOINT or --dry-run)".into(),
            )),
            Some(u) if !(u.starts_with("http://") || u.starts_with("https://")) => {
                Err(ConfigError::InvalidValue {
                    key: "endpoint",
                    value: u.to_string(),
                })
            }
            Some(_) => Ok(()),
        }
    }

    /// Layers file, environment and CLI, then validates.
    pub fn load<L>(cli: &CliArgs, env: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut cfg = match &cli.config {
            Some(p) => Self::from_file(Path::new(p))?,
            None => {
                let p = default_config_path();
                if p.exists() {
                    Self::from_file(&p)?
                } else {
                    Self::default()
                }
            }
        };
        cfg.apply_env(env)?;
        cfg.apply_cli(cli)?;
        cfg.validate(cli.dry_run)?;
        Ok(cfg)
    }

    pub fn fast_interval(&self) -> Duration {
        Duration::from_millis(self.fast_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Configured name, else the host name, else `"unknown"`.
    pub fn agent_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .filter(|h| !h.is_empty())
                .unwrap_or_else(|| "unknown".into())
        })
    }
}
