use super::{Condition, RouteGroupKind, SecretObjectReference};
use crate::labels::Selector;

/// Gateway represents an instance of a service-traffic handling
/// infrastructure by binding listeners to a set of IP addresses.
#[derive(Clone, Debug, Default, kube::CustomResource, serde::Deserialize, serde::Serialize)]
#[kube(
    schema = "disabled",
    group = "gateway.networking.k8s.io",
    version = "v1",
    kind = "Gateway",
    status = "GatewayStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    /// GatewayClassName used for this Gateway. This is the name of a
    /// GatewayClass resource.
    pub gateway_class_name: String,

    /// Listeners associated with this Gateway. Listeners define logical
    /// endpoints that are bound on this Gateway's addresses.
    #[serde(default)]
    pub listeners: Vec<Listener>,
}

/// Listener embodies the concept of a logical endpoint where a Gateway
/// accepts network connections.
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Listener {
    /// Name is the name of the Listener. This name MUST be unique within a
    /// Gateway.
    pub name: String,

    /// Hostname specifies the virtual hostname to match for protocol types
    /// that define this concept. When unspecified, all hostnames are matched.
    ///
    /// A hostname may be prefixed with a wildcard label (`*.`). The wildcard
    /// label must appear by itself as the first label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    /// Port is the network port.
    pub port: i32,

    /// Protocol specifies the network protocol this listener expects to
    /// receive (e.g. `HTTP`, `HTTPS`).
    pub protocol: String,

    /// TLS is the TLS configuration for the Listener. This field is required
    /// if the Protocol field is "HTTPS" or "TLS".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<GatewayTlsConfig>,

    /// AllowedRoutes defines the types of routes that MAY be attached to a
    /// Listener and the trusted namespaces where those Route resources MAY be
    /// present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_routes: Option<AllowedRoutes>,
}

/// GatewayTLSConfig describes a TLS configuration.
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayTlsConfig {
    /// Mode defines the TLS behavior for the TLS session initiated by the
    /// client. Defaults to `Terminate`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<TlsModeType>,

    /// CertificateRefs contains a series of references to Kubernetes objects
    /// that contains TLS certificates and private keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_refs: Option<Vec<SecretObjectReference>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum TlsModeType {
    Terminate,
    Passthrough,
}

/// AllowedRoutes defines which Routes may be attached to this Listener.
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AllowedRoutes {
    /// Namespaces indicates namespaces from which Routes may be attached to
    /// this Listener. This is restricted to the namespace of this Gateway by
    /// default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<RouteNamespaces>,

    /// Kinds specifies the groups and kinds of Routes that are allowed to
    /// bind to this Gateway Listener. When unspecified or empty, the kinds of
    /// Routes selected are determined using the Listener protocol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<RouteGroupKind>>,
}

/// RouteNamespaces indicate which namespaces Routes should be selected from.
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct RouteNamespaces {
    /// From indicates where Routes will be selected for this Gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<FromNamespaces>,

    /// Selector must be specified when From is set to "Selector". In that
    /// case, only Routes in Namespaces matching this Selector will be
    /// selected by this Gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Selector>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum FromNamespaces {
    All,
    Same,
    Selector,
}

/// GatewayStatus defines the observed state of Gateway.
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct GatewayStatus {
    /// Addresses lists the network addresses that have been bound to the
    /// Gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addresses: Option<Vec<GatewayStatusAddress>>,

    /// Conditions describe the current conditions of the Gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,

    /// Listeners provide status for each unique listener port defined in the
    /// Spec.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listeners: Option<Vec<ListenerStatus>>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct GatewayStatusAddress {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    pub value: String,
}

/// ListenerStatus is the status associated with a Listener.
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerStatus {
    /// Name is the name of the Listener that this status corresponds to.
    pub name: String,

    /// SupportedKinds is the list indicating the Kinds supported by this
    /// listener.
    #[serde(default)]
    pub supported_kinds: Vec<RouteGroupKind>,

    /// AttachedRoutes represents the total number of Routes that have been
    /// successfully attached to this Listener.
    #[serde(default)]
    pub attached_routes: i32,

    /// Conditions describe the current condition of this listener.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl Gateway {
    /// Returns the status entry for the named listener, if one has been
    /// published.
    pub fn listener_status(&self, name: &str) -> Option<&ListenerStatus> {
        self.status
            .as_ref()?
            .listeners
            .as_ref()?
            .iter()
            .find(|l| l.name == name)
    }

    /// Returns the Gateway-level conditions, which may be empty.
    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.as_deref())
            .unwrap_or_default()
    }
}
