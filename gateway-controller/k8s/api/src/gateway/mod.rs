//! The subset of the Kubernetes Gateway API consumed by this controller.
//!
//! Only the fields that influence attachment, status, or the generated
//! routing configuration are modelled. Unknown fields are ignored when these
//! resources are read, and the controller never writes a spec.

mod class;
mod gateways;
mod grant;
mod httproute;

pub use self::{
    class::{GatewayClass, GatewayClassSpec, GatewayClassStatus, ParametersReference},
    gateways::{
        AllowedRoutes, FromNamespaces, Gateway, GatewaySpec, GatewayStatus, GatewayStatusAddress,
        GatewayTlsConfig, Listener, ListenerStatus, RouteNamespaces, TlsModeType,
    },
    grant::{ReferenceGrant, ReferenceGrantFrom, ReferenceGrantSpec, ReferenceGrantTo},
    httproute::{
        HttpBackendRef, HttpHeaderMatch, HttpPathMatch, HttpQueryParamMatch, HttpRoute,
        HttpRouteMatch, HttpRouteRule, HttpRouteSpec, PathMatchType, RouteParentStatus,
        RouteStatus,
    },
};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;

/// The API group of every resource in this module.
pub const GROUP: &str = "gateway.networking.k8s.io";

/// RouteGroupKind indicates the group and kind of a Route resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
pub struct RouteGroupKind {
    /// Group is the group of the Route. Defaults to the Gateway API group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Kind is the kind of the Route.
    pub kind: String,
}

/// ParentReference identifies an API object (usually a Gateway) that can be
/// considered a parent of a route.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentReference {
    /// Group is the group of the referent. Defaults to the Gateway API group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Kind is the kind of the referent. Defaults to "Gateway".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Namespace is the namespace of the referent. When unspecified, this
    /// refers to the local namespace of the route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Name is the name of the referent.
    pub name: String,

    /// SectionName is the name of a section within the target resource. For
    /// Gateways, this is the name of a listener.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,

    /// Port is the network port this route targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

/// SecretObjectReference identifies an API object including its namespace,
/// defaulting to Secret.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct SecretObjectReference {
    /// Group is the group of the referent. Empty refers to the core API group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Kind is the kind of the referent. Defaults to "Secret".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    pub name: String,

    /// Namespace is the namespace of the referenced object. When unspecified,
    /// the local namespace is inferred.
    ///
    /// Cross-namespace references are only valid if they are explicitly
    /// allowed by a ReferenceGrant in the referent's namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Returns true if the given group refers to the Gateway API group, treating
/// an absent group as the default.
pub fn is_gateway_group(group: Option<&str>) -> bool {
    group.map_or(true, |g| g == GROUP)
}

/// Returns true if the given group refers to the core API group.
pub fn is_core_group(group: Option<&str>) -> bool {
    matches!(group, None | Some("") | Some("core"))
}
