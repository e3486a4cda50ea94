//! The routing document consumed by the gateway's data plane.
//!
//! Every attached route is flattened into one entry per hostname, match, and
//! backend. Entries carry a priority so that the data plane can evaluate the
//! most specific match first.

use crate::{
    attachment::{Gateway, Route},
    hostname::Hostnames,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use varnish_gateway_controller_k8s_api::gateway::{HttpRouteMatch, PathMatchType};

pub const VERSION: u32 = 2;

/// The ConfigMap key the routing document is written to.
pub const CONFIG_KEY: &str = "routing.json";

const DEFAULT_PORT: i32 = 80;
const DEFAULT_WEIGHT: i32 = 100;
const MAX_COUNTED_MATCHES: usize = 16;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub version: u32,
    pub vhosts: BTreeMap<String, VirtualHost>,
    /// Routes without a hostname, served for any Host header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<VirtualHost>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualHost {
    pub routes: Vec<RouteEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_match: Option<PathMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<ValueMatch>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query_params: Vec<ValueMatch>,
    pub service: String,
    pub namespace: String,
    pub port: i32,
    pub weight: i32,
    pub priority: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMatch {
    #[serde(rename = "type")]
    pub type_: PathMatchType,
    pub value: String,
}

/// A header or query parameter match.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueMatch {
    pub name: String,
    pub value: String,
    #[serde(rename = "type")]
    pub type_: MatchType,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchType {
    Exact,
    RegularExpression,
}

// === impl RoutingConfig ===

impl RoutingConfig {
    /// The document written before any route has attached.
    pub fn empty() -> Self {
        Self {
            version: VERSION,
            vhosts: BTreeMap::new(),
            default: None,
        }
    }

    /// Builds the document for a gateway from the routes attached to it.
    ///
    /// Each route's hostnames are narrowed to those its parent references
    /// make reachable through the gateway's listeners. A route that reaches
    /// the gateway through a listener without a hostname keeps its declared
    /// hostnames.
    pub fn for_gateway<'r>(gateway: &Gateway, routes: impl IntoIterator<Item = &'r Route>) -> Self {
        let routes = routes.into_iter().filter_map(|route| {
            let hostnames = match gateway.route_hostnames(route)? {
                Hostnames::Any => route.hostnames.clone(),
                Hostnames::Only(hostnames) => hostnames,
            };
            Some((route, hostnames))
        });
        Self::from_entries(collect(routes, &gateway.namespace))
    }

    /// Groups entries by hostname, preserving their order.
    pub fn from_entries(entries: impl IntoIterator<Item = RouteEntry>) -> Self {
        let mut config = Self::empty();
        for entry in entries {
            let vhost = match &entry.hostname {
                Some(hostname) => config.vhosts.entry(hostname.clone()).or_default(),
                None => config.default.get_or_insert_with(VirtualHost::default),
            };
            vhost.routes.push(entry);
        }
        config
    }

    pub fn route_count(&self) -> usize {
        self.vhosts
            .values()
            .chain(self.default.as_ref())
            .map(|vh| vh.routes.len())
            .sum()
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Flattens routes into prioritized entries.
///
/// Each route is paired with the hostnames it should be served under; a
/// route with no hostnames is served for any host. Backend namespaces
/// default to the route's namespace, or `default_namespace` if the route has
/// none.
pub fn collect<'r>(
    routes: impl IntoIterator<Item = (&'r Route, Vec<String>)>,
    default_namespace: &str,
) -> Vec<RouteEntry> {
    let mut entries = Vec::new();

    for (route, hostnames) in routes {
        let route_ns = if route.namespace.is_empty() {
            default_namespace
        } else {
            route.namespace.as_str()
        };

        let hostnames: Vec<Option<String>> = if hostnames.is_empty() {
            vec![None]
        } else {
            hostnames.into_iter().map(Some).collect()
        };

        for hostname in &hostnames {
            for rule in &route.rules {
                let matches: Vec<Match> = match rule.matches.as_deref() {
                    Some(matches) if !matches.is_empty() => matches.iter().map(Match::from_resource).collect(),
                    _ => vec![Match::catch_all()],
                };

                for m in &matches {
                    let priority = m.priority();
                    for backend in rule.backend_refs.iter().flatten() {
                        if backend.name.is_empty() {
                            continue;
                        }
                        entries.push(RouteEntry {
                            hostname: hostname.clone(),
                            path_match: m.path.clone(),
                            method: m.method.clone(),
                            headers: m.headers.clone(),
                            query_params: m.query_params.clone(),
                            service: backend.name.clone(),
                            namespace: backend
                                .namespace
                                .clone()
                                .unwrap_or_else(|| route_ns.to_string()),
                            port: backend.port.unwrap_or(DEFAULT_PORT),
                            weight: backend.weight.unwrap_or(DEFAULT_WEIGHT),
                            priority,
                        });
                    }
                }
            }
        }
    }

    entries.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.hostname.cmp(&b.hostname))
            .then_with(|| a.service.cmp(&b.service))
            .then_with(|| a.port.cmp(&b.port))
    });
    entries
}

/// Hex-encoded SHA-256 digest of a rendered document.
pub fn content_digest(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// A single route match with defaults applied.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Match {
    path: Option<PathMatch>,
    method: Option<String>,
    headers: Vec<ValueMatch>,
    query_params: Vec<ValueMatch>,
}

impl Match {
    fn catch_all() -> Self {
        Self {
            path: Some(PathMatch {
                type_: PathMatchType::PathPrefix,
                value: "/".to_string(),
            }),
            method: None,
            headers: vec![],
            query_params: vec![],
        }
    }

    fn from_resource(m: &HttpRouteMatch) -> Self {
        let path = m.path.as_ref().map(|p| PathMatch {
            type_: p.type_.unwrap_or(PathMatchType::PathPrefix),
            value: p.value.clone().unwrap_or_else(|| "/".to_string()),
        });
        let headers = m
            .headers
            .iter()
            .flatten()
            .map(|h| ValueMatch::new(&h.name, &h.value, h.type_.as_deref()))
            .collect();
        let query_params = m
            .query_params
            .iter()
            .flatten()
            .map(|q| ValueMatch::new(&q.name, &q.value, q.type_.as_deref()))
            .collect();
        Self {
            path,
            method: m.method.clone(),
            headers,
            query_params,
        }
    }

    /// More specific matches get higher priorities.
    fn priority(&self) -> i32 {
        let path = match &self.path {
            None => 0,
            Some(PathMatch {
                type_: PathMatchType::Exact,
                ..
            }) => 10_000,
            Some(PathMatch {
                type_: PathMatchType::PathPrefix,
                value,
            }) => i32::try_from(value.len())
                .unwrap_or(i32::MAX)
                .saturating_mul(10)
                .saturating_add(1_000),
            Some(PathMatch {
                type_: PathMatchType::RegularExpression,
                ..
            }) => 100,
        };
        let method = if self.method.is_some() { 5_000 } else { 0 };
        let headers = 1_000 * counted(self.headers.len());
        let query_params = 500 * counted(self.query_params.len());
        path + method + headers + query_params
    }
}

fn counted(n: usize) -> i32 {
    // Bounded by MAX_COUNTED_MATCHES, so the cast cannot truncate.
    n.min(MAX_COUNTED_MATCHES) as i32
}

impl ValueMatch {
    fn new(name: &str, value: &str, type_: Option<&str>) -> Self {
        let type_ = match type_ {
            Some("RegularExpression") => MatchType::RegularExpression,
            _ => MatchType::Exact,
        };
        Self {
            name: name.to_string(),
            value: value.to_string(),
            type_,
        }
    }
}

#[cfg(test)]
mod tests;
