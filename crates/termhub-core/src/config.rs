//! Server configuration surface.
//!
//! A `ServerConfig` is assembled once at process start and handed to every
//! other component as a plain value; there is no global mutable settings
//! singleton to thread around.

use serde::{Deserialize, Serialize};

/// The operation-level tuning knobs for the registry, reader loops and reaper.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub max_sessions: usize,
    pub inactivity_timeout_sec: u64,
    pub sweep_interval_sec: u64,
    pub poll_interval_ms: u64,
    pub read_chunk_bytes: usize,
    pub dimension_max: u16,
    pub namespace: String,
    pub bind_host: String,
    pub bind_port: u16,
    pub control_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 20,
            inactivity_timeout_sec: 3600,
            sweep_interval_sec: 60,
            poll_interval_ms: 10,
            read_chunk_bytes: 20_480,
            dimension_max: 10_000,
            namespace: "/pty".to_string(),
            bind_host: "127.0.0.1".to_string(),
            bind_port: 0,
            control_port: 0,
        }
    }
}

/// The process's on-disk footprint: `~/.termhub` by default, overridable
/// with `TERMHUB_HOME`.
pub fn home_dir() -> anyhow::Result<std::path::PathBuf> {
    if let Ok(path) = std::env::var("TERMHUB_HOME") {
        return Ok(std::path::PathBuf::from(path));
    }
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("could not find home directory"))?;
    Ok(home.join(".termhub"))
}

pub fn settings_path() -> anyhow::Result<std::path::PathBuf> {
    Ok(home_dir()?.join("settings.json"))
}

pub fn log_path() -> anyhow::Result<std::path::PathBuf> {
    Ok(home_dir()?.join("termhub.log"))
}

/// Where `serve` records the actually-bound transport/control ports, so
/// CLI subcommands invoked from a separate process can find a running
/// server when `bind_port`/`control_port` were auto-allocated (0).
pub fn runtime_state_path() -> anyhow::Result<std::path::PathBuf> {
    Ok(home_dir()?.join("runtime.json"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeState {
    pub bind_host: String,
    pub bind_port: u16,
    pub control_port: u16,
    pub pid: u32,
}

impl RuntimeState {
    pub fn write(&self) -> anyhow::Result<()> {
        let path = runtime_state_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn read() -> anyhow::Result<Self> {
        let path = runtime_state_path()?;
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("no running server found at {:?}: {e}", path))?;
        Ok(serde_json::from_str(&contents)?)
    }
}

impl ServerConfig {
    /// Load a config file if present, falling back to defaults. A missing
    /// file is not an error.
    pub fn load_from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&contents)?;
        Ok(cfg)
    }

    /// Assemble the full layered config: defaults -> settings file (explicit
    /// override or the per-user config directory) -> environment variables.
    /// CLI flags, the highest-precedence layer, are applied by the caller on
    /// top of the returned value.
    pub fn load(path_override: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let path = match path_override {
            Some(p) => p.to_path_buf(),
            None => settings_path()?,
        };
        Ok(Self::load_from_file(&path)?.apply_env())
    }

    /// Overlay process environment variables onto an existing config.
    pub fn apply_env(mut self) -> Self {
        if let Ok(v) = std::env::var("TERMHUB_MAX_SESSIONS") {
            if let Ok(n) = v.parse() {
                self.max_sessions = n;
            }
        }
        if let Ok(v) = std::env::var("TERMHUB_BIND_HOST") {
            self.bind_host = v;
        }
        if let Ok(v) = std::env::var("TERMHUB_BIND_PORT") {
            if let Ok(n) = v.parse() {
                self.bind_port = n;
            }
        }
        if let Ok(v) = std::env::var("TERMHUB_CONTROL_PORT") {
            if let Ok(n) = v.parse() {
                self.control_port = n;
            }
        }
        if let Ok(v) = std::env::var("TERMHUB_NAMESPACE") {
            self.namespace = v;
        }
        self
    }

    pub fn save_to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(path, perms)?;
        }
        Ok(())
    }
}
