use mcpipe_mcp::ServerCommand;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::ProxyError;

/// Debug proxy configuration, loaded from TOML.
///
/// ```toml
/// log_file = "debug_proxy.log"
/// pretty = true
/// mirror_to_stderr = true
/// shutdown_grace_ms = 2000
///
/// [server]
/// program = "python"
/// args = ["hello_server.py"]
/// env = { PYTHONUNBUFFERED = "1" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Traffic log path, truncated at startup.
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,

    /// Pretty-print JSON frames in the log.
    #[serde(default = "default_true")]
    pub pretty: bool,

    /// Echo every log entry to stderr as well.
    #[serde(default = "default_true")]
    pub mirror_to_stderr: bool,

    /// How long the server gets to exit after its input is closed.
    #[serde(default = "default_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Server to launch when none is given on the command line.
    #[serde(default)]
    pub server: Option<ServerCommand>,
}

fn default_log_file() -> PathBuf {
    PathBuf::from("debug_proxy.log")
}

fn default_true() -> bool {
    true
}

fn default_grace_ms() -> u64 {
    2000
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            log_file: default_log_file(),
            pretty: true,
            mirror_to_stderr: true,
            shutdown_grace_ms: default_grace_ms(),
            server: None,
        }
    }
}

impl ProxyConfig {
    /// `~/.config/mcpipe/proxy.toml` (platform equivalent), if a config
    /// directory exists for this user.
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mcpipe").join("proxy.toml"))
    }

    /// Parse config from a TOML string. Environment overrides are not applied.
    pub fn from_toml(content: &str) -> Result<Self, ProxyError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from an explicit path (which must exist), or from the
    /// default path if present, or defaults. Environment overrides are
    /// applied last.
    pub fn load(path: Option<&Path>) -> Result<Self, ProxyError> {
        let candidate = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_config_path().filter(|p| p.exists()),
        };

        let mut config = match candidate {
            Some(config_path) => {
                debug!(?config_path, "Loading proxy config");
                let content = std::fs::read_to_string(&config_path).map_err(|source| {
                    ProxyError::ConfigIo {
                        path: config_path.clone(),
                        source,
                    }
                })?;
                Self::from_toml(&content)?
            }
            None => {
                debug!("No proxy config file, using defaults");
                Self::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `MCPIPE_PROXY_*` overrides from `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("MCPIPE_PROXY_LOG").filter(|v| !v.is_empty()) {
            self.log_file = PathBuf::from(v);
        }
        if let Some(v) = lookup("MCPIPE_PROXY_MIRROR_STDERR") {
            match parse_flag(&v) {
                Some(flag) => self.mirror_to_stderr = flag,
                None => tracing::warn!(value = %v, "ignoring MCPIPE_PROXY_MIRROR_STDERR"),
            }
        }
    }

    fn validate(&self) -> Result<(), ProxyError> {
        if self.log_file.as_os_str().is_empty() {
            return Err(ProxyError::Config("log_file must not be empty".to_string()));
        }
        if let Some(server) = &self.server {
            if server.program.trim().is_empty() {
                return Err(ProxyError::Config(
                    "server.program must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ProxyConfig::default();
        assert_eq!(config.log_file, PathBuf::from("debug_proxy.log"));
        assert!(config.pretty);
        assert!(config.mirror_to_stderr);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(2));
        assert!(config.server.is_none());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = ProxyConfig::from_toml(
            r#"
            pretty = false

            [server]
            program = "python"
            args = ["hello_server.py"]
            env = { PYTHONUNBUFFERED = "1" }
            "#,
        )
        .unwrap();
        assert!(!config.pretty);
        assert_eq!(config.log_file, PathBuf::from("debug_proxy.log"));
        let server = config.server.unwrap();
        assert_eq!(server.display(), "python hello_server.py");
        assert_eq!(server.env.get("PYTHONUNBUFFERED").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_from_toml_rejects_empty_program() {
        let result = ProxyConfig::from_toml("[server]\nprogram = \"  \"\n");
        assert!(matches!(result, Err(ProxyError::Config(_))));
    }

    #[test]
    fn test_from_toml_rejects_bad_types() {
        let result = ProxyConfig::from_toml("shutdown_grace_ms = \"soon\"\n");
        assert!(matches!(result, Err(ProxyError::ConfigParse(_))));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("MCPIPE_PROXY_LOG", "/tmp/traffic.log"),
            ("MCPIPE_PROXY_MIRROR_STDERR", "off"),
        ]
        .into_iter()
        .collect();

        let mut config = ProxyConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.log_file, PathBuf::from("/tmp/traffic.log"));
        assert!(!config.mirror_to_stderr);
    }

    #[test]
    fn test_env_override_garbage_flag_is_ignored() {
        let mut config = ProxyConfig::default();
        config.apply_overrides(|key| {
            (key == "MCPIPE_PROXY_MIRROR_STDERR").then(|| "maybe".to_string())
        });
        assert!(config.mirror_to_stderr);
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.toml");
        std::fs::write(&path, "shutdown_grace_ms = 250\n").unwrap();

        let config = ProxyConfig::load(Some(&path)).unwrap();
        assert_eq!(config.shutdown_grace(), Duration::from_millis(250));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = ProxyConfig::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(ProxyError::ConfigIo { .. })));
    }
}
