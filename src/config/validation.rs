//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic, including unknown keys)
//! - Connect URIs parse and use a supported scheme
//! - Value ranges (limits > 0, addresses parse)
//! - Duplicate service names and accept prefixes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use url::Url;

use super::schema::GatewayConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("no services configured")]
    NoServices,

    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: String, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: String },

    #[error("service {service:?}: no connect URIs")]
    NoConnectTargets { service: String },

    #[error("service {service:?}: invalid connect URI {uri:?}: {reason}")]
    InvalidConnectUri {
        service: String,
        uri: String,
        reason: String,
    },

    #[error("service {service:?}: accept prefix {prefix:?} must start with '/'")]
    InvalidPrefix { service: String, prefix: String },

    #[error("duplicate service name {0:?}")]
    DuplicateService(String),

    #[error("accept prefix {0:?} used by more than one service")]
    DuplicatePrefix(String),

    #[error("service {service:?}: empty cache-control pattern")]
    EmptyPattern { service: String },

    #[error("admin API enabled without an api_key")]
    MissingApiKey,
}

/// Schemes accepted for connect URIs; `ws` is carried over HTTP upgrade.
pub const CONNECT_SCHEMES: &[&str] = &["http", "ws"];

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::Zero {
            field: "listener.max_connections".into(),
        });
    }
    if config.listener.max_header_bytes == 0 {
        errors.push(ValidationError::Zero {
            field: "listener.max_header_bytes".into(),
        });
    }
    if let Some(passthrough) = &config.listener.tls_passthrough {
        if passthrough.target.trim().is_empty() || !passthrough.target.contains(':') {
            errors.push(ValidationError::InvalidAddress {
                field: "listener.tls_passthrough.target".into(),
                value: passthrough.target.clone(),
            });
        }
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::Zero {
            field: "timeouts.connect_secs".into(),
        });
    }
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }
    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::MissingApiKey);
        }
    }

    if config.services.is_empty() {
        errors.push(ValidationError::NoServices);
    }
    let mut names = HashSet::new();
    let mut prefixes = HashSet::new();
    for service in &config.services {
        if !names.insert(service.name.as_str()) {
            errors.push(ValidationError::DuplicateService(service.name.clone()));
        }
        if !service.accept_prefix.starts_with('/') {
            errors.push(ValidationError::InvalidPrefix {
                service: service.name.clone(),
                prefix: service.accept_prefix.clone(),
            });
        } else if !prefixes.insert(service.accept_prefix.as_str()) {
            errors.push(ValidationError::DuplicatePrefix(service.accept_prefix.clone()));
        }
        if service.connect.is_empty() {
            errors.push(ValidationError::NoConnectTargets {
                service: service.name.clone(),
            });
        }
        for uri in &service.connect {
            if let Err(reason) = check_connect_uri(uri) {
                errors.push(ValidationError::InvalidConnectUri {
                    service: service.name.clone(),
                    uri: uri.clone(),
                    reason,
                });
            }
        }
        if service.cache_control.iter().any(|r| r.pattern.is_empty()) {
            errors.push(ValidationError::EmptyPattern {
                service: service.name.clone(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
}

fn check_connect_uri(raw: &str) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    if !CONNECT_SCHEMES.contains(&url.scheme()) {
        return Err(format!("unsupported scheme {:?}", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err("missing host".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ServiceConfig;

    fn service(name: &str, prefix: &str, connect: &[&str]) -> ServiceConfig {
        toml::from_str(&format!(
            "name = {name:?}\naccept_prefix = {prefix:?}\nconnect = {connect:?}\n"
        ))
        .unwrap()
    }

    #[test]
    fn valid_config_passes() {
        let config = GatewayConfig {
            services: vec![service("events", "/events", &["http://127.0.0.1:3000/sse"])],
            ..GatewayConfig::default()
        };
        assert_eq!(validate_config(&config), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = GatewayConfig {
            services: vec![
                service("a", "events", &["ftp://host/x"]),
                service("a", "/b", &[]),
            ],
            ..GatewayConfig::default()
        };
        config.listener.max_connections = 0;
        config.admin.enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::DuplicateService("a".into())));
        assert!(errors.contains(&ValidationError::MissingApiKey));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::InvalidPrefix { .. })));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::InvalidConnectUri { .. })));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::NoConnectTargets { .. })));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::Zero { .. })));
    }

    #[test]
    fn no_services_is_an_error() {
        let errors = validate_config(&GatewayConfig::default()).unwrap_err();
        assert_eq!(errors, vec![ValidationError::NoServices]);
    }
}
