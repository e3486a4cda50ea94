use crate::{
    attachment::Route,
    grant::{CrossNamespaceRef, ReferenceAuthorizer},
};
use anyhow::Result;
use varnish_gateway_controller_k8s_api::gateway::HttpBackendRef;

pub const SERVICE_KIND: &str = "Service";

/// Checks that backend Services exist.
#[async_trait::async_trait]
pub trait ServiceLookup {
    async fn service_exists(&self, namespace: &str, name: &str) -> Result<bool>;
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum UnresolvedBackend {
    #[error("BackendRef kind {0:?} is not supported")]
    UnsupportedKind(String),

    #[error("BackendRef group {0:?} is not supported")]
    UnsupportedGroup(String),

    #[error("Cross-namespace backendRef {namespace}/{name} not allowed by any ReferenceGrant")]
    NotPermitted { namespace: String, name: String },

    #[error("Failed to validate cross-namespace backendRef {namespace}/{name}: {error}")]
    GrantLookup {
        namespace: String,
        name: String,
        error: String,
    },

    #[error("Service {name:?} not found in namespace {namespace:?}")]
    NotFound { namespace: String, name: String },

    #[error("Failed to get Service {name:?}: {error}")]
    Lookup { name: String, error: String },
}

impl UnresolvedBackend {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::UnsupportedKind(_) | Self::UnsupportedGroup(_) => "InvalidKind",
            Self::NotPermitted { .. } | Self::GrantLookup { .. } => "RefNotPermitted",
            Self::NotFound { .. } | Self::Lookup { .. } => "BackendNotFound",
        }
    }

    /// Missing backends may appear later and failed lookups may succeed, so
    /// the route should be retried. A missing grant is picked up when one is
    /// created.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Lookup { .. } | Self::GrantLookup { .. }
        )
    }
}

/// Validates every backend reference of a route, stopping at the first one
/// that cannot be resolved.
pub async fn validate<S, A>(route: &Route, services: &S, grants: &A) -> Result<(), UnresolvedBackend>
where
    S: ServiceLookup + Sync + ?Sized,
    A: ReferenceAuthorizer + Sync + ?Sized,
{
    for backend in route.rules.iter().flat_map(|r| r.backend_refs.iter().flatten()) {
        if let Some(kind) = backend.kind.as_ref().filter(|k| *k != SERVICE_KIND) {
            return Err(UnresolvedBackend::UnsupportedKind(kind.clone()));
        }
        if let Some(group) = backend.group.as_ref().filter(|g| !g.is_empty()) {
            return Err(UnresolvedBackend::UnsupportedGroup(group.clone()));
        }

        let namespace = backend.namespace.as_deref().unwrap_or(&route.namespace);
        if let Some(reference) = cross_namespace(route, backend) {
            match grants.is_allowed(&reference).await {
                Ok(true) => {}
                Ok(false) => {
                    return Err(UnresolvedBackend::NotPermitted {
                        namespace: namespace.to_string(),
                        name: backend.name.clone(),
                    })
                }
                Err(error) => {
                    return Err(UnresolvedBackend::GrantLookup {
                        namespace: namespace.to_string(),
                        name: backend.name.clone(),
                        error: error.to_string(),
                    })
                }
            }
        }

        match services.service_exists(namespace, &backend.name).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(UnresolvedBackend::NotFound {
                    namespace: namespace.to_string(),
                    name: backend.name.clone(),
                })
            }
            Err(error) => {
                return Err(UnresolvedBackend::Lookup {
                    name: backend.name.clone(),
                    error: error.to_string(),
                })
            }
        }
    }
    Ok(())
}

/// Returns the route without the backends in other namespaces that no
/// ReferenceGrant permits. A failed grant lookup drops the backend.
pub async fn permitted<A>(route: &Route, grants: &A) -> Route
where
    A: ReferenceAuthorizer + Sync + ?Sized,
{
    let mut permitted = route.clone();
    for rule in &mut permitted.rules {
        let Some(backends) = rule.backend_refs.take() else {
            continue;
        };
        let mut kept = Vec::with_capacity(backends.len());
        for backend in backends {
            let allowed = match cross_namespace(route, &backend) {
                None => true,
                Some(reference) => match grants.is_allowed(&reference).await {
                    Ok(allowed) => allowed,
                    Err(error) => {
                        tracing::warn!(
                            route.namespace = %route.namespace,
                            route.name = %route.name,
                            backend.namespace = %reference.to_namespace,
                            backend.name = %reference.to_name,
                            %error,
                            "Failed to check ReferenceGrants",
                        );
                        false
                    }
                },
            };
            if allowed {
                kept.push(backend);
            }
        }
        rule.backend_refs = Some(kept);
    }
    permitted
}

fn cross_namespace(route: &Route, backend: &HttpBackendRef) -> Option<CrossNamespaceRef> {
    let namespace = backend.namespace.as_deref()?;
    if namespace == route.namespace {
        return None;
    }
    Some(CrossNamespaceRef::route_to_service(
        &route.namespace,
        namespace,
        &backend.name,
    ))
}
