//! Boot configuration loading.
//!
//! The standalone binary reads an optional TOML file for process-level
//! settings (listener, admin secret, store directory, metrics exporter) and
//! overlays environment variables: `API_SECRET`, `DEFAULT_BACKENDS` (JSON
//! service seed, wildcard hostnames with `$1` back-references allowed) and
//! `NOTIFICATION_WEBHOOK_URL`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::schema::ServiceConfig;
use crate::config::validation::{validate_service_config, ValidationError};

/// Boot failure. Surfaces as process exit code 2.
#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("DEFAULT_BACKENDS is not valid JSON: {0}")]
    DefaultBackends(#[from] serde_json::Error),
    #[error("invalid service '{hostname}': {reasons}")]
    InvalidService { hostname: String, reasons: String },
}

/// Process-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BootConfig {
    pub listener: ListenerConfig,
    pub admin: AdminConfig,
    pub store: StoreConfig,
    pub observability: ProcessObservabilityConfig,

    /// Webhook receiving health-transition events.
    pub notification_webhook_url: Option<String>,

    /// Services defined inline in the boot file; applied through the same
    /// path as admin PUT, including on file reload.
    pub services: Vec<ServiceConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Bearer token for the admin and metrics surfaces.
    pub api_secret: String,

    /// Token-bucket refill per client IP, requests per minute.
    pub rate_limit_per_minute: u32,

    /// Token-bucket burst capacity.
    pub rate_limit_burst: u32,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            api_secret: String::new(),
            rate_limit_per_minute: 100,
            rate_limit_burst: 200,
        }
    }
}

/// Config persistence settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory for per-hostname JSON blobs; in-memory when unset.
    pub path: Option<PathBuf>,
}

/// Process observability settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProcessObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Prometheus exporter bind address.
    pub metrics_address: String,
}

impl Default for ProcessObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Load the boot file (if present) and overlay environment variables.
pub fn load_boot_config(path: Option<&Path>) -> Result<BootConfig, BootError> {
    let mut config = match path {
        Some(path) if path.exists() => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        _ => BootConfig::default(),
    };

    if let Ok(secret) = std::env::var("API_SECRET") {
        config.admin.api_secret = secret;
    }
    if let Ok(url) = std::env::var("NOTIFICATION_WEBHOOK_URL") {
        if !url.is_empty() {
            config.notification_webhook_url = Some(url);
        }
    }
    if let Ok(json) = std::env::var("DEFAULT_BACKENDS") {
        if !json.is_empty() {
            config.services.extend(parse_default_backends(&json)?);
        }
    }

    for service in &mut config.services {
        service.normalize();
        if let Err(errors) = validate_service_config(service) {
            return Err(invalid_service(&service.hostname, errors));
        }
    }

    Ok(config)
}

fn invalid_service(hostname: &str, errors: Vec<ValidationError>) -> BootError {
    BootError::InvalidService {
        hostname: hostname.to_string(),
        reasons: errors
            .iter()
            .map(|e| e.0.clone())
            .collect::<Vec<_>>()
            .join("; "),
    }
}

/// Parse the `DEFAULT_BACKENDS` JSON seed.
///
/// Accepts either a single `{hostname, backends: […]}` object or a
/// `{services: […]}` wrapper.
pub fn parse_default_backends(json: &str) -> Result<Vec<ServiceConfig>, BootError> {
    #[derive(Deserialize)]
    struct Wrapper {
        services: Vec<ServiceConfig>,
    }

    let value: serde_json::Value = serde_json::from_str(json)?;
    if value.get("services").is_some() {
        let wrapper: Wrapper = serde_json::from_value(value)?;
        Ok(wrapper.services)
    } else {
        let service: ServiceConfig = serde_json::from_value(value)?;
        Ok(vec![service])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_service_shape() {
        let services = parse_default_backends(
            r#"{"hostname": "app.example.com",
                "backends": [{"id": "a", "url": "http://10.0.0.1:8080"}]}"#,
        )
        .unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].hostname, "app.example.com");
    }

    #[test]
    fn parses_services_wrapper_with_wildcards() {
        let services = parse_default_backends(
            r#"{"services": [
                {"hostname": "*.example.com",
                 "backends": [{"id": "a", "url": "http://$1.origin.internal:8080"}]},
                {"hostname": "static.example.com",
                 "backends": [{"id": "s", "url": "http://static.origin.internal:8080"}]}
            ]}"#,
        )
        .unwrap();
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].hostname, "*.example.com");
        assert!(services[0].backends[0].url.as_str().contains("$1"));
    }

    #[test]
    fn rejects_malformed_seed() {
        assert!(parse_default_backends("not json").is_err());
    }
}
