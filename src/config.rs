use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::server::runtime::get_container_cpu_limit;

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_admin_listen() -> Option<String> {
    Some("0.0.0.0:9091".to_string())
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_workers() -> usize {
    get_container_cpu_limit().max(1)
}

/// Top-level gateway configuration. Deserialized from an optional `.toml` or
/// `.json` file; every field has a default so the gateway can start with
/// zero configuration for local development.
///
/// `services` is business configuration — the routing table — and is
/// therefore never touched by [`GatewayConfig::apply_env_overrides`]: only
/// infrastructure knobs (listen addresses, timeouts, worker count) are
/// overridable from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_admin_listen")]
    pub admin_listen: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub services: HashMap<String, String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            admin_listen: default_admin_listen(),
            request_timeout_secs: default_request_timeout_secs(),
            workers: default_workers(),
            services: HashMap::new(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a file (if it exists) and apply environment
    /// variable overrides for infrastructure settings. When the file does
    /// not exist, built-in defaults are used.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: GatewayConfig = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => toml::from_str(&content)?,
                Some("json") => serde_json::from_str(&content)?,
                Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
                None => anyhow::bail!("config file has no extension, use .toml or .json"),
            }
        } else {
            tracing::info!(
                "config file not found at {}, using defaults",
                path.display()
            );
            GatewayConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!("loaded gateway configuration");
        Ok(config)
    }

    /// Apply environment variable overrides for infra-only settings. The
    /// `services` routing table is business config and is never overridden
    /// from the environment.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("GATEWAY_LISTEN") {
            self.listen = v;
        }
        if let Ok(v) = std::env::var("GATEWAY_ADMIN_LISTEN") {
            self.admin_listen = if v.is_empty() { None } else { Some(v) };
        }
        if let Ok(v) = std::env::var("GATEWAY_REQUEST_TIMEOUT_SECS") {
            if let Ok(n) = v.parse::<u64>() {
                self.request_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("GATEWAY_WORKERS") {
            if let Ok(n) = v.parse::<usize>() {
                self.workers = n;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.listen.is_empty() {
            anyhow::bail!("listen address must not be empty");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than zero");
        }
        if self.workers == 0 {
            anyhow::bail!("workers must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_timeout() {
        let mut config = GatewayConfig::default();
        config.request_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_workers() {
        let mut config = GatewayConfig::default();
        config.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_missing_file_falls_back_to_defaults() {
        let config = GatewayConfig::load(Path::new("/nonexistent/gateway.toml")).unwrap();
        assert_eq!(config.listen, default_listen());
    }

    #[test]
    fn load_toml_file() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("gateway-config-test-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
            listen = "127.0.0.1:9000"
            request_timeout_secs = 5

            [services]
            foo = "http://127.0.0.1:7000"
            "#,
        )
        .unwrap();

        let config = GatewayConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.listen, "127.0.0.1:9000");
        assert_eq!(config.request_timeout_secs, 5);
        assert_eq!(
            config.services.get("foo").map(String::as_str),
            Some("http://127.0.0.1:7000")
        );
    }
}
