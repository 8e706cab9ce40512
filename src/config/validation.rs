//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference existing upstreams)
//! - Validate value ranges (capacities, intervals and timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::GatewayConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("duplicate upstream name '{0}'")]
    DuplicateUpstream(String),

    #[error("route '{route}' references unknown upstream '{upstream}'")]
    UnknownUpstream { route: String, upstream: String },
}

fn invalid(field: &str, message: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(invalid("listener.bind_address", "not a socket address"));
    }

    let mut names = HashSet::new();
    for upstream in &config.upstreams {
        if !names.insert(upstream.name.as_str()) {
            errors.push(ValidationError::DuplicateUpstream(upstream.name.clone()));
        }
        match Url::parse(&upstream.url) {
            Ok(url) if url.scheme() == "http" => {}
            Ok(_) => errors.push(invalid(
                &format!("upstreams.{}.url", upstream.name),
                "only http upstreams are supported",
            )),
            Err(e) => errors.push(invalid(&format!("upstreams.{}.url", upstream.name), e.to_string())),
        }
    }

    for route in &config.routes {
        if !names.contains(route.upstream.as_str()) {
            errors.push(ValidationError::UnknownUpstream {
                route: route.name.clone(),
                upstream: route.upstream.clone(),
            });
        }
        if let Some(prefix) = &route.path_prefix {
            if !prefix.starts_with('/') {
                errors.push(invalid(&format!("routes.{}.path_prefix", route.name), "must start with '/'"));
            }
        }
        if route.strip_prefix && route.path_prefix.is_none() {
            errors.push(invalid(
                &format!("routes.{}.strip_prefix", route.name),
                "requires path_prefix",
            ));
        }
    }

    let rl = &config.rate_limit;
    if rl.enabled {
        if rl.capacity == 0 {
            errors.push(invalid("rate_limit.capacity", "must be > 0"));
        }
        if rl.refill_tokens == 0 {
            errors.push(invalid("rate_limit.refill_tokens", "must be > 0"));
        }
        if rl.refill_interval_ms == 0 {
            errors.push(invalid("rate_limit.refill_interval_ms", "must be > 0"));
        }
        if rl.sweep_interval_secs == 0 {
            errors.push(invalid("rate_limit.sweep_interval_secs", "must be > 0"));
        }
    }

    if config.timeouts.upstream_ms == 0 {
        errors.push(invalid("timeouts.upstream_ms", "must be > 0"));
    }
    if config.timeouts.connect_ms == 0 {
        errors.push(invalid("timeouts.connect_ms", "must be > 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(invalid("timeouts.request_secs", "must be > 0"));
    }

    if config.retries.enabled && config.retries.max_attempts == 0 {
        errors.push(invalid("retries.max_attempts", "must be >= 1"));
    }
    if config.retries.max_delay_ms < config.retries.base_delay_ms {
        errors.push(invalid("retries.max_delay_ms", "must be >= base_delay_ms"));
    }

    if config.circuit_breaker.enabled && config.circuit_breaker.failure_threshold == 0 {
        errors.push(invalid("circuit_breaker.failure_threshold", "must be > 0"));
    }

    if !matches!(config.observability.log_format.as_str(), "pretty" | "json") {
        errors.push(invalid("observability.log_format", "expected 'pretty' or 'json'"));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(invalid("observability.metrics_address", "not a socket address"));
    }

    if config.admin.enabled {
        if config.admin.api_key.is_empty() {
            errors.push(invalid("admin.api_key", "must not be empty"));
        }
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(invalid("admin.bind_address", "not a socket address"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{RouteConfig, UpstreamConfig};

    fn upstream(name: &str, url: &str) -> UpstreamConfig {
        UpstreamConfig {
            name: name.to_string(),
            url: url.to_string(),
        }
    }

    fn route(name: &str, upstream: &str) -> RouteConfig {
        RouteConfig {
            name: name.to_string(),
            host: None,
            path_prefix: Some("/api".to_string()),
            upstream: upstream.to_string(),
            strip_prefix: false,
            priority: 0,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = GatewayConfig::default();
        config.upstreams = vec![upstream("a", "http://127.0.0.1:1"), upstream("a", "not a url")];
        config.routes = vec![route("r", "missing")];
        config.rate_limit.capacity = 0;

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::DuplicateUpstream("a".to_string())));
        assert!(errors.contains(&ValidationError::UnknownUpstream {
            route: "r".to_string(),
            upstream: "missing".to_string(),
        }));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidValue { field, .. } if field == "rate_limit.capacity")));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidValue { field, .. } if field == "upstreams.a.url")));
    }

    #[test]
    fn test_disabled_limiter_skips_its_checks() {
        let mut config = GatewayConfig::default();
        config.rate_limit.enabled = false;
        config.rate_limit.capacity = 0;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_strip_prefix_needs_prefix() {
        let mut config = GatewayConfig::default();
        config.upstreams = vec![upstream("a", "http://127.0.0.1:1")];
        let mut r = route("r", "a");
        r.path_prefix = None;
        r.strip_prefix = true;
        config.routes = vec![r];
        assert_eq!(validate_config(&config).unwrap_err().len(), 1);
    }
}
