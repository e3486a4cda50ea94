//! Decides which routes attach to which gateway listeners.
//!
//! Gateway API resources are converted once into the types in this module,
//! with every optional field defaulted, so that the attachment rules below
//! never need to re-derive defaults.

use crate::hostname::{self, Hostnames};
use anyhow::Result;
use varnish_gateway_controller_k8s_api::{
    gateway::{self as api, RouteGroupKind},
    labels::{Labels, Selector},
    ResourceExt,
};

pub const GATEWAY_KIND: &str = "Gateway";
pub const HTTP_ROUTE_KIND: &str = "HTTPRoute";
pub const HTTPS_PROTOCOL: &str = "HTTPS";

/// Resolves the labels of a namespace, which are needed to evaluate
/// listeners that select routes by namespace label.
#[async_trait::async_trait]
pub trait NamespaceLabels {
    async fn namespace_labels(&self, namespace: &str) -> Result<Labels>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct Gateway {
    pub namespace: String,
    pub name: String,
    pub class_name: String,
    pub listeners: Vec<Listener>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Listener {
    pub name: String,
    pub hostname: Option<String>,
    pub port: i32,
    pub protocol: String,
    pub allowed_namespaces: AllowedNamespaces,
    pub route_kinds: RouteKinds,
    pub tls: Option<ListenerTls>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AllowedNamespaces {
    Same,
    All,
    /// A `Selector` policy without a selector admits no namespace.
    Selector(Option<Selector>),
}

/// The route kinds a listener accepts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteKinds {
    pub supported: Vec<RouteGroupKind>,
    /// Set when the listener names any kind that this controller cannot
    /// serve.
    pub has_invalid: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenerTls {
    pub terminate: bool,
    pub certificate_refs: Vec<CertificateRef>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateRef {
    /// The group and kind as written; validated by the TLS checks.
    pub group: Option<String>,
    pub kind: Option<String>,
    pub name: String,
    pub namespace: String,
    pub cross_namespace: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Route {
    pub namespace: String,
    pub name: String,
    pub hostnames: Vec<String>,
    pub parent_refs: Vec<ParentRef>,
    pub rules: Vec<api::HttpRouteRule>,
}

/// A route's parent reference with its group, kind, and namespace
/// defaulted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParentRef {
    pub group: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub section_name: Option<String>,
    pub port: Option<i32>,
}

/// Why a route may not attach to a gateway.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Denied {
    NoListeners,
    /// No listener admits the route's namespace.
    NotAllowedByListeners,
    /// A listener admits the route's namespace but no such listener's
    /// hostname intersects the route's hostnames.
    NoMatchingListenerHostname,
}

// === impl Gateway ===

impl Gateway {
    pub fn from_resource(gateway: &api::Gateway) -> Self {
        let namespace = gateway.namespace().unwrap_or_default();
        let listeners = gateway
            .spec
            .listeners
            .iter()
            .map(|l| Listener::from_resource(l, &namespace))
            .collect();
        Self {
            name: gateway.name_any(),
            class_name: gateway.spec.gateway_class_name.clone(),
            namespace,
            listeners,
        }
    }

    pub fn listener(&self, name: &str) -> Option<&Listener> {
        self.listeners.iter().find(|l| l.name == name)
    }

    /// Checks whether any listener admits the route, considering namespace
    /// policy and hostname intersection.
    ///
    /// A listener whose namespace policy cannot be evaluated is skipped.
    pub async fn check_route<N>(&self, route: &Route, namespaces: &N) -> Result<(), Denied>
    where
        N: NamespaceLabels + Sync + ?Sized,
    {
        if self.listeners.is_empty() {
            return Err(Denied::NoListeners);
        }

        let mut route_ns_labels = None;
        let mut namespace_allowed = false;
        for listener in &self.listeners {
            let allowed = listener
                .allows_namespace(
                    &route.namespace,
                    &self.namespace,
                    &mut route_ns_labels,
                    namespaces,
                )
                .await;
            match allowed {
                Ok(true) => {}
                Ok(false) => continue,
                Err(error) => {
                    tracing::warn!(
                        gateway.namespace = %self.namespace,
                        gateway.name = %self.name,
                        listener = %listener.name,
                        %error,
                        "Failed to evaluate listener namespace policy",
                    );
                    continue;
                }
            }
            namespace_allowed = true;

            if hostname::intersects(listener.hostname.as_deref(), &route.hostnames) {
                return Ok(());
            }
        }

        if namespace_allowed {
            Err(Denied::NoMatchingListenerHostname)
        } else {
            Err(Denied::NotAllowedByListeners)
        }
    }

    /// Returns the routes that target this gateway and are admitted by at
    /// least one of its listeners.
    pub async fn attached_routes<'r, N>(
        &self,
        routes: impl IntoIterator<Item = &'r Route>,
        namespaces: &N,
    ) -> Vec<&'r Route>
    where
        N: NamespaceLabels + Sync + ?Sized,
    {
        let mut attached = Vec::new();
        for route in routes {
            if route.targets_gateway(self) && self.check_route(route, namespaces).await.is_ok() {
                attached.push(route);
            }
        }
        attached
    }

    /// Counts the routes attached to a listener. Routes are expected to have
    /// been filtered by [`Gateway::attached_routes`].
    pub fn count_attached<'r>(
        &self,
        routes: impl IntoIterator<Item = &'r Route>,
        listener: &Listener,
    ) -> i32 {
        let count = routes
            .into_iter()
            .filter(|r| r.attaches_to_listener(self, listener))
            .count();
        i32::try_from(count).unwrap_or(i32::MAX)
    }

    /// Computes the hostnames a route serves through the listeners selected
    /// by a parent reference's section name.
    pub fn effective_hostnames(&self, route: &Route, section_name: Option<&str>) -> Hostnames {
        let listeners = self
            .listeners
            .iter()
            .filter(|l| section_name.map_or(true, |s| s == l.name))
            .map(|l| l.hostname.as_deref());
        hostname::effective_hostnames(&route.hostnames, listeners)
    }

    /// Computes the hostnames a route serves through this gateway across all
    /// of the route's parent references to it.
    ///
    /// Returns `None` when the route serves no hostname through this gateway
    /// and should be left out of the routing configuration.
    pub fn route_hostnames(&self, route: &Route) -> Option<Hostnames> {
        let mut hostnames = Hostnames::Only(Vec::new());
        for parent_ref in route.parent_refs_to(self) {
            hostnames = hostnames.union(
                self.effective_hostnames(route, parent_ref.section_name.as_deref()),
            );
            if hostnames == Hostnames::Any {
                return Some(Hostnames::Any);
            }
        }
        Some(hostnames).filter(|h| !h.is_empty())
    }

    /// Returns true if the gateway has a listener with a certificate
    /// reference to the named secret.
    pub fn references_secret(&self, namespace: &str, name: &str) -> bool {
        self.certificate_refs()
            .any(|r| r.name == name && r.namespace == namespace)
    }

    /// Returns true if the gateway has a listener with a certificate
    /// reference into another namespace.
    pub fn references_secrets_in(&self, namespace: &str) -> bool {
        self.certificate_refs()
            .any(|r| r.cross_namespace && r.namespace == namespace)
    }

    fn certificate_refs(&self) -> impl Iterator<Item = &CertificateRef> {
        self.listeners
            .iter()
            .filter_map(|l| l.tls.as_ref())
            .flat_map(|tls| tls.certificate_refs.iter())
    }
}

// === impl Listener ===

impl Listener {
    fn from_resource(listener: &api::Listener, gateway_namespace: &str) -> Self {
        let namespaces = listener
            .allowed_routes
            .as_ref()
            .and_then(|ar| ar.namespaces.as_ref());
        let allowed_namespaces = match namespaces.and_then(|ns| ns.from) {
            None | Some(api::FromNamespaces::Same) => AllowedNamespaces::Same,
            Some(api::FromNamespaces::All) => AllowedNamespaces::All,
            Some(api::FromNamespaces::Selector) => {
                AllowedNamespaces::Selector(namespaces.and_then(|ns| ns.selector.clone()))
            }
        };

        let kinds = listener
            .allowed_routes
            .as_ref()
            .and_then(|ar| ar.kinds.as_deref())
            .unwrap_or_default();

        let tls = listener.tls.as_ref().map(|tls| ListenerTls {
            terminate: tls.mode == Some(api::TlsModeType::Terminate),
            certificate_refs: tls
                .certificate_refs
                .iter()
                .flatten()
                .map(|r| CertificateRef::from_resource(r, gateway_namespace))
                .collect(),
        });

        Self {
            name: listener.name.clone(),
            hostname: listener.hostname.clone().filter(|h| !h.is_empty()),
            port: listener.port,
            protocol: listener.protocol.clone(),
            allowed_namespaces,
            route_kinds: RouteKinds::from_resource(kinds),
            tls,
        }
    }

    pub fn is_https(&self) -> bool {
        self.protocol == HTTPS_PROTOCOL
    }

    /// Returns the TLS settings if this is an HTTPS listener that terminates
    /// TLS.
    pub fn terminated_tls(&self) -> Option<&ListenerTls> {
        self.tls.as_ref().filter(|tls| self.is_https() && tls.terminate)
    }

    async fn allows_namespace<N>(
        &self,
        route_namespace: &str,
        gateway_namespace: &str,
        route_ns_labels: &mut Option<Labels>,
        namespaces: &N,
    ) -> Result<bool>
    where
        N: NamespaceLabels + Sync + ?Sized,
    {
        match &self.allowed_namespaces {
            AllowedNamespaces::All => Ok(true),
            AllowedNamespaces::Same => Ok(route_namespace == gateway_namespace),
            AllowedNamespaces::Selector(None) => Ok(false),
            AllowedNamespaces::Selector(Some(selector)) => {
                selector.validate()?;
                let labels = match route_ns_labels.take() {
                    Some(labels) => labels,
                    None => namespaces.namespace_labels(route_namespace).await?,
                };
                let matches = selector.matches(&labels);
                *route_ns_labels = Some(labels);
                Ok(matches)
            }
        }
    }
}

// === impl RouteKinds ===

impl RouteKinds {
    fn from_resource(kinds: &[RouteGroupKind]) -> Self {
        if kinds.is_empty() {
            return Self {
                supported: vec![http_route_kind()],
                has_invalid: false,
            };
        }

        let mut supported = Vec::new();
        let mut has_invalid = false;
        for kind in kinds {
            if api::is_gateway_group(kind.group.as_deref()) && kind.kind == HTTP_ROUTE_KIND {
                supported.push(http_route_kind());
            } else {
                has_invalid = true;
            }
        }
        Self {
            supported,
            has_invalid,
        }
    }
}

/// The only route kind this controller serves.
pub fn http_route_kind() -> RouteGroupKind {
    RouteGroupKind {
        group: Some(api::GROUP.to_string()),
        kind: HTTP_ROUTE_KIND.to_string(),
    }
}

// === impl CertificateRef ===

impl CertificateRef {
    fn from_resource(r: &api::SecretObjectReference, gateway_namespace: &str) -> Self {
        let namespace = r
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| gateway_namespace.to_string());
        Self {
            group: r.group.clone(),
            kind: r.kind.clone(),
            name: r.name.clone(),
            cross_namespace: namespace != gateway_namespace,
            namespace,
        }
    }
}

// === impl Route ===

impl Route {
    pub fn from_resource(route: &api::HttpRoute) -> Self {
        let namespace = route.namespace().unwrap_or_default();
        Self {
            name: route.name_any(),
            hostnames: route.hostnames().to_vec(),
            parent_refs: route
                .parent_refs()
                .iter()
                .map(|r| ParentRef::from_resource(r, &namespace))
                .collect(),
            rules: route.rules().to_vec(),
            namespace,
        }
    }

    /// Returns the parent references that target the given gateway.
    pub fn parent_refs_to<'a>(&'a self, gateway: &'a Gateway) -> impl Iterator<Item = &'a ParentRef> {
        self.parent_refs
            .iter()
            .filter(|r| r.targets(&gateway.namespace, &gateway.name))
    }

    pub fn targets_gateway(&self, gateway: &Gateway) -> bool {
        self.parent_refs_to(gateway).next().is_some()
    }

    /// A route attaches to a listener if one of its references to the
    /// gateway either names no section or names the listener, and its
    /// hostnames intersect the listener's.
    pub fn attaches_to_listener(&self, gateway: &Gateway, listener: &Listener) -> bool {
        self.parent_refs_to(gateway).any(|r| {
            r.section_name.as_ref().map_or(true, |s| *s == listener.name)
                && hostname::intersects(listener.hostname.as_deref(), &self.hostnames)
        })
    }
}

// === impl ParentRef ===

impl ParentRef {
    pub fn from_resource(r: &api::ParentReference, route_namespace: &str) -> Self {
        Self {
            group: r.group.clone().unwrap_or_else(|| api::GROUP.to_string()),
            kind: r.kind.clone().unwrap_or_else(|| GATEWAY_KIND.to_string()),
            namespace: r
                .namespace
                .clone()
                .unwrap_or_else(|| route_namespace.to_string()),
            name: r.name.clone(),
            section_name: r.section_name.clone(),
            port: r.port,
        }
    }

    pub fn is_gateway(&self) -> bool {
        self.kind == GATEWAY_KIND
    }

    pub fn targets(&self, namespace: &str, name: &str) -> bool {
        self.is_gateway() && self.group == api::GROUP && self.namespace == namespace && self.name == name
    }

    /// Converts back to the API representation written to route status.
    pub fn to_resource(&self) -> api::ParentReference {
        api::ParentReference {
            group: Some(self.group.clone()),
            kind: Some(self.kind.clone()),
            namespace: Some(self.namespace.clone()),
            name: self.name.clone(),
            section_name: self.section_name.clone(),
            port: self.port,
        }
    }
}

impl std::fmt::Display for ParentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)?;
        if let Some(section) = &self.section_name {
            write!(f, "#{section}")?;
        }
        Ok(())
    }
}

// === impl Denied ===

impl Denied {
    pub fn reason(&self) -> &'static str {
        match self {
            Denied::NoListeners | Denied::NotAllowedByListeners => "NotAllowedByListeners",
            Denied::NoMatchingListenerHostname => "NoMatchingListenerHostname",
        }
    }

    pub fn message(&self, gateway: &Gateway) -> String {
        match self {
            Denied::NoListeners => "Gateway has no listeners".to_string(),
            Denied::NotAllowedByListeners => format!(
                "Route not allowed by any listener on Gateway {}/{}",
                gateway.namespace, gateway.name
            ),
            Denied::NoMatchingListenerHostname => format!(
                "No matching listener hostname on Gateway {}/{}",
                gateway.namespace, gateway.name
            ),
        }
    }
}

#[cfg(test)]
mod tests;
