#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod attachment;
pub mod backend;
pub mod grant;
pub mod hostname;
pub mod infra_hash;
pub mod routing;
pub mod tls;
pub mod vcl;

/// The `controllerName` of the GatewayClasses served by this controller.
pub const CONTROLLER_NAME: &str = "varnish-software.com/gateway";

/// Held by every Gateway of our class until its cluster-scoped children have
/// been cleaned up.
pub const FINALIZER: &str = "gateway.varnish-software.com/finalizer";

pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "varnish-gateway-operator";
pub const LABEL_GATEWAY_NAME: &str = "gateway.networking.k8s.io/gateway-name";
pub const LABEL_GATEWAY_NAMESPACE: &str = "gateway.networking.k8s.io/gateway-namespace";
