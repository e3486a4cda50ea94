use crate::conditions::{self, reason, type_};
use varnish_gateway_controller_core::{
    attachment::{Gateway, Listener},
    tls::{InvalidCertificateRef, Resolved},
};
use varnish_gateway_controller_k8s_api::{
    self as k8s,
    gateway::{self as api, GatewayStatus, GatewayStatusAddress, ListenerStatus},
    Condition, Time,
};

const INVALID_ROUTE_KINDS_MESSAGE: &str = "One or more route kinds are not supported";

/// The outcome of resolving a listener's references.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedRefs {
    pub resolved: bool,
    pub reason: &'static str,
    pub message: String,
}

impl ResolvedRefs {
    /// Combines route-kind validation with the listener's TLS validation, if
    /// it has any. Unsupported route kinds take precedence.
    pub fn for_listener(
        listener: &Listener,
        tls: Option<&Result<Resolved, InvalidCertificateRef>>,
    ) -> Self {
        if listener.route_kinds.has_invalid {
            return Self {
                resolved: false,
                reason: reason::INVALID_ROUTE_KINDS,
                message: INVALID_ROUTE_KINDS_MESSAGE.to_string(),
            };
        }

        match tls {
            None => Self {
                resolved: true,
                reason: reason::RESOLVED_REFS,
                message: "References resolved".to_string(),
            },
            Some(Ok(resolved)) => Self {
                resolved: true,
                reason: reason::RESOLVED_REFS,
                message: resolved.message().to_string(),
            },
            Some(Err(invalid)) => Self {
                resolved: false,
                reason: invalid.reason(),
                message: invalid.to_string(),
            },
        }
    }
}

/// Builds the status owned by the gateway reconciler.
///
/// `outcome` is the result of applying the gateway's infrastructure. The
/// attached-route counts are owned by the route reconciler and are copied
/// from the current status so that the field remains populated.
pub fn status(
    current: &api::Gateway,
    gateway: &Gateway,
    outcome: Result<(), &str>,
    resolved_refs: &[ResolvedRefs],
    addresses: Vec<GatewayStatusAddress>,
    now: &Time,
) -> GatewayStatus {
    let generation = current.metadata.generation;

    let gateway_conditions = match outcome {
        Ok(()) => vec![
            conditions::new(
                type_::ACCEPTED,
                true,
                reason::ACCEPTED,
                "Gateway accepted by controller",
                generation,
                now,
            ),
            conditions::new(
                type_::PROGRAMMED,
                true,
                reason::PROGRAMMED,
                "Gateway configuration programmed",
                generation,
                now,
            ),
        ],
        Err(message) => vec![
            conditions::new(type_::ACCEPTED, false, reason::INVALID, message, generation, now),
            conditions::new(type_::PROGRAMMED, false, reason::INVALID, message, generation, now),
        ],
    };

    let listeners = gateway
        .listeners
        .iter()
        .zip(resolved_refs)
        .map(|(listener, refs)| {
            let existing = current.listener_status(&listener.name);
            ListenerStatus {
                name: listener.name.clone(),
                supported_kinds: listener.route_kinds.supported.clone(),
                attached_routes: existing.map_or(0, |s| s.attached_routes),
                conditions: conditions::merge(
                    existing.map_or(&[][..], |s| s.conditions.as_slice()),
                    listener_conditions(refs, generation, now),
                ),
            }
        })
        .collect();

    GatewayStatus {
        addresses: Some(addresses),
        conditions: Some(conditions::merge(current.conditions(), gateway_conditions)),
        listeners: Some(listeners),
    }
}

fn listener_conditions(refs: &ResolvedRefs, generation: Option<i64>, now: &Time) -> [Condition; 3] {
    let accepted = conditions::new(
        type_::ACCEPTED,
        true,
        reason::ACCEPTED,
        "Listener accepted",
        generation,
        now,
    );

    // A listener with unresolved references cannot be programmed.
    let programmed = if refs.resolved {
        conditions::new(
            type_::PROGRAMMED,
            true,
            reason::PROGRAMMED,
            "Listener programmed",
            generation,
            now,
        )
    } else {
        conditions::new(
            type_::PROGRAMMED,
            false,
            reason::INVALID,
            "Listener has unresolved references",
            generation,
            now,
        )
    };

    let resolved_refs = conditions::new(
        type_::RESOLVED_REFS,
        refs.resolved,
        refs.reason,
        refs.message.clone(),
        generation,
        now,
    );

    [accepted, programmed, resolved_refs]
}

/// Converts load balancer ingress points into gateway addresses.
pub fn addresses(service: Option<&k8s::Service>) -> Vec<GatewayStatusAddress> {
    service
        .and_then(|svc| svc.status.as_ref())
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .into_iter()
        .flatten()
        .filter_map(|ingress| {
            if let Some(ip) = ingress.ip.as_ref().filter(|ip| !ip.is_empty()) {
                return Some(GatewayStatusAddress {
                    type_: Some("IPAddress".to_string()),
                    value: ip.clone(),
                });
            }
            ingress
                .hostname
                .as_ref()
                .filter(|h| !h.is_empty())
                .map(|hostname| GatewayStatusAddress {
                    type_: Some("Hostname".to_string()),
                    value: hostname.clone(),
                })
        })
        .collect()
}

/// A server-side apply patch for a gateway's status.
pub fn patch(namespace: &str, name: &str, status: GatewayStatus) -> k8s::Patch<serde_json::Value> {
    k8s::Patch::Apply(serde_json::json!({
        "apiVersion": "gateway.networking.k8s.io/v1",
        "kind": "Gateway",
        "metadata": {
            "name": name,
            "namespace": namespace,
        },
        "status": status,
    }))
}
