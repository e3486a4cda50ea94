//! Per-listener attached route counts.
//!
//! Counts are written by the route reconciler under its own field manager.
//! The patch carries no conditions so that the gateway reconciler remains the
//! sole owner of those.

use serde_json::{json, Value};
use varnish_gateway_controller_core::attachment::{Gateway, Route};
use varnish_gateway_controller_k8s_api::Patch;

/// Builds the listener entries for a gateway given the routes attached to it.
pub fn listeners(gateway: &Gateway, attached: &[&Route]) -> Vec<Value> {
    gateway
        .listeners
        .iter()
        .map(|listener| {
            json!({
                "name": listener.name,
                "attachedRoutes": gateway.count_attached(attached.iter().copied(), listener),
                "supportedKinds": listener.route_kinds.supported,
            })
        })
        .collect()
}

pub fn patch(gateway: &Gateway, attached: &[&Route]) -> Patch<Value> {
    Patch::Apply(json!({
        "apiVersion": "gateway.networking.k8s.io/v1",
        "kind": "Gateway",
        "metadata": {
            "name": gateway.name,
            "namespace": gateway.namespace,
        },
        "status": {
            "listeners": listeners(gateway, attached),
        },
    }))
}
