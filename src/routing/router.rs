//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Look up matching route for request
//! - Return matched route or explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction; reloads build a new table
//! - O(n) scan in priority order (acceptable for typical route counts)
//! - Explicit no-match rather than silent default

use std::collections::HashMap;

use axum::http::{HeaderMap, Uri};

use crate::config::validation::ValidationError;
use crate::config::GatewayConfig;
use crate::resilience::client::Upstream;
use crate::routing::matcher::{AndMatcher, HostMatcher, Matcher, PathPrefixMatcher};

/// A compiled route.
#[derive(Debug)]
pub struct Route {
    pub name: String,
    pub upstream: Upstream,
    prefix: Option<PathPrefixMatcher>,
    strip_prefix: bool,
    matcher: AndMatcher,
}

impl Route {
    /// Path and query to send upstream.
    pub fn forward_path(&self, uri: &Uri) -> String {
        let path = uri.path();
        let path = match (&self.prefix, self.strip_prefix) {
            (Some(prefix), true) => path.strip_prefix(prefix.prefix()).unwrap_or(path),
            _ => path,
        };
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };

        match uri.query() {
            Some(query) => format!("{}?{}", path, query),
            None => path,
        }
    }
}

#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn from_config(config: &GatewayConfig) -> Result<Self, ValidationError> {
        let mut upstreams = HashMap::new();
        for upstream in &config.upstreams {
            let parsed = Upstream::new(upstream.name.clone(), &upstream.url).map_err(|e| {
                ValidationError::InvalidValue {
                    field: format!("upstreams.{}.url", upstream.name),
                    message: e.to_string(),
                }
            })?;
            upstreams.insert(upstream.name.as_str(), parsed);
        }

        let mut ordered: Vec<_> = config.routes.iter().collect();
        // Stable sort keeps config order among equal priorities.
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut routes = Vec::with_capacity(ordered.len());
        for route in ordered {
            let upstream = upstreams
                .get(route.upstream.as_str())
                .cloned()
                .ok_or_else(|| ValidationError::UnknownUpstream {
                    route: route.name.clone(),
                    upstream: route.upstream.clone(),
                })?;

            let mut conditions: Vec<Box<dyn Matcher>> = Vec::new();
            if let Some(host) = &route.host {
                conditions.push(Box::new(HostMatcher::new(host.clone())));
            }
            let prefix = route.path_prefix.as_ref().map(PathPrefixMatcher::new);
            if let Some(prefix) = &prefix {
                conditions.push(Box::new(prefix.clone()));
            }

            routes.push(Route {
                name: route.name.clone(),
                upstream,
                prefix,
                strip_prefix: route.strip_prefix,
                matcher: AndMatcher::new(conditions),
            });
        }

        Ok(Self { routes })
    }

    /// First route, by priority, whose conditions all hold.
    pub fn match_request(&self, uri: &Uri, headers: &HeaderMap) -> Option<&Route> {
        self.routes.iter().find(|r| r.matcher.matches(uri, headers))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
