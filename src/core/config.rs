use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings for the collection engine
///
/// Stored as JSON under the user's config directory. Missing or corrupted
/// files fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where running and finished task output is written
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    /// Installation root used by log and dispatch based triggers
    #[serde(default = "default_splunk_home")]
    pub splunk_home: PathBuf,
    #[serde(default = "default_soft_limit")]
    pub threadpool_soft_limit: usize,
    #[serde(default = "default_hard_limit")]
    pub threadpool_hard_limit: usize,
    /// Seconds a trigger waits for its children to start
    #[serde(default = "default_startup_timeout")]
    pub collectors_startup_timeout: f64,
    /// Seconds between subprocess liveness checks
    #[serde(default = "default_poll_interval")]
    pub collectors_poll_interval: f64,
    /// Seconds a process listing stays fresh
    #[serde(default = "default_process_cache_ttl")]
    pub process_cache_ttl: f64,
    #[serde(default = "default_tool_cache_path")]
    pub tool_cache_path: PathBuf,
}

fn default_output_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("rdiag")
        .join("output")
}

fn default_splunk_home() -> PathBuf {
    std::env::var_os("SPLUNK_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/opt/splunk"))
}

fn default_soft_limit() -> usize {
    6
}

fn default_hard_limit() -> usize {
    20
}

fn default_startup_timeout() -> f64 {
    60.0
}

fn default_poll_interval() -> f64 {
    0.5
}

fn default_process_cache_ttl() -> f64 {
    2.0
}

fn default_tool_cache_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("rdiag")
        .join("tools.json")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_root: default_output_root(),
            splunk_home: default_splunk_home(),
            threadpool_soft_limit: default_soft_limit(),
            threadpool_hard_limit: default_hard_limit(),
            collectors_startup_timeout: default_startup_timeout(),
            collectors_poll_interval: default_poll_interval(),
            process_cache_ttl: default_process_cache_ttl(),
            tool_cache_path: default_tool_cache_path(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        let mut config = if !config_path.exists() {
            let config = Config::default();
            if let Err(e) = config.save() {
                log::debug!("Could not write default config {:?}: {}", config_path, e);
            }
            config
        } else {
            let data = fs::read(&config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

            if data.is_empty() {
                Config::default()
            } else {
                serde_json::from_slice(&data).unwrap_or_else(|e| {
                    log::warn!("Ignoring unreadable config {:?}: {}", config_path, e);
                    Config::default()
                })
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment variables win over the stored file
    pub fn apply_env_overrides(&mut self) {
        if let Some(root) = std::env::var_os("RDIAG_OUTPUT_ROOT") {
            self.output_root = PathBuf::from(root);
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let data = serde_json::to_vec_pretty(self).with_context(|| "Failed to serialize config")?;

        fs::write(&config_path, data)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir =
            dirs::config_dir().with_context(|| "Could not determine config directory")?;

        Ok(config_dir.join("rdiag").join("config.json"))
    }

    /// Config rooted in a scratch directory, used by tests and dry runs
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            tool_cache_path: root.join("tools.json"),
            output_root: root.join("output"),
            splunk_home: root.join("splunk"),
            ..Self::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.collectors_poll_interval.max(0.01))
    }

    pub fn process_cache_ttl(&self) -> Duration {
        Duration::from_secs_f64(self.process_cache_ttl.max(0.0))
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.collectors_startup_timeout.max(0.0))
    }

    pub fn running_dir(&self) -> PathBuf {
        self.output_root.join("running")
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.output_root.join("tasks")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.splunk_home.join("var").join("log").join("splunk")
    }

    pub fn dispatch_dir(&self) -> PathBuf {
        self.splunk_home.join("var").join("run").join("splunk").join("dispatch")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = Config::default();
        assert!(config.threadpool_soft_limit <= config.threadpool_hard_limit);
        assert_eq!(config.process_cache_ttl(), Duration::from_secs(2));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"threadpool_soft_limit": 2}"#).unwrap();
        assert_eq!(config.threadpool_soft_limit, 2);
        assert_eq!(config.threadpool_hard_limit, 20);
    }

    #[test]
    fn test_with_root_layout() {
        let config = Config::with_root("/tmp/x");
        assert_eq!(config.running_dir(), PathBuf::from("/tmp/x/output/running"));
        assert_eq!(config.tool_cache_path, PathBuf::from("/tmp/x/tools.json"));
    }
}
