use crate::conditions::{self, reason, type_};
use std::collections::HashMap;
use varnish_gateway_controller_core::{
    attachment::{Denied, Gateway, ParentRef},
    backend::UnresolvedBackend,
    CONTROLLER_NAME,
};
use varnish_gateway_controller_k8s_api::{
    self as k8s,
    gateway::{RouteParentStatus, RouteStatus},
    Condition, Time,
};

/// A single condition's desired value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
    pub status: bool,
    pub reason: &'static str,
    pub message: String,
}

/// The `Accepted` and `ResolvedRefs` conditions for one parent reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParentConditions {
    pub accepted: Verdict,
    pub resolved_refs: Verdict,
}

// === impl Verdict ===

impl Verdict {
    fn ok(reason: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: true,
            reason,
            message: message.into(),
        }
    }

    fn failed(reason: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: false,
            reason,
            message: message.into(),
        }
    }
}

// === impl ParentConditions ===

impl ParentConditions {
    /// The referenced gateway or listener does not exist.
    pub fn no_matching_parent(message: impl Into<String>) -> Self {
        Self::not_accepted(reason::NO_MATCHING_PARENT, message)
    }

    /// The route could not be processed yet.
    pub fn pending(message: impl Into<String>) -> Self {
        Self::not_accepted(reason::PENDING, message)
    }

    /// The gateway's listeners refuse the route.
    pub fn denied(denied: Denied, gateway: &Gateway) -> Self {
        Self {
            accepted: Verdict::failed(denied.reason(), denied.message(gateway)),
            resolved_refs: Verdict::ok(reason::RESOLVED_REFS, "All references resolved"),
        }
    }

    /// The route is accepted; its references are reported separately.
    pub fn accepted(backends: &Result<(), UnresolvedBackend>) -> Self {
        let resolved_refs = match backends {
            Ok(()) => Verdict::ok(reason::RESOLVED_REFS, "All references resolved"),
            Err(unresolved) => Verdict::failed(unresolved.reason(), unresolved.to_string()),
        };
        Self {
            accepted: Verdict::ok(reason::ACCEPTED, "Route accepted"),
            resolved_refs,
        }
    }

    fn not_accepted(reason: &'static str, message: impl Into<String>) -> Self {
        Self {
            accepted: Verdict::failed(reason, message),
            resolved_refs: Verdict::ok(reason::RESOLVED_REFS, "References resolved"),
        }
    }

    fn to_conditions(&self, generation: Option<i64>, now: &Time) -> [Condition; 2] {
        let Self {
            accepted,
            resolved_refs,
        } = self;
        [
            conditions::new(
                type_::ACCEPTED,
                accepted.status,
                accepted.reason,
                accepted.message.clone(),
                generation,
                now,
            ),
            conditions::new(
                type_::RESOLVED_REFS,
                resolved_refs.status,
                resolved_refs.reason,
                resolved_refs.message.clone(),
                generation,
                now,
            ),
        ]
    }
}

/// Computes a route's parent statuses.
///
/// Entries written by other controllers are left as they are. Each of our
/// parent references replaces the entry for the same reference, keeping
/// transition times for conditions whose status has not changed, and our
/// entries for references that were not processed are dropped.
pub fn status(
    route_namespace: &str,
    current: &[RouteParentStatus],
    parents: Vec<(ParentRef, ParentConditions)>,
    generation: Option<i64>,
    now: &Time,
) -> RouteStatus {
    let mut pending = parents
        .into_iter()
        .enumerate()
        .map(|(i, (parent_ref, conditions))| (parent_ref, (i, conditions)))
        .collect::<HashMap<_, _>>();

    let mut statuses = Vec::with_capacity(current.len() + pending.len());
    for existing in current {
        if existing.controller_name != CONTROLLER_NAME {
            statuses.push(existing.clone());
            continue;
        }

        let parent_ref = ParentRef::from_resource(&existing.parent_ref, route_namespace);
        if let Some((_, desired)) = pending.remove(&parent_ref) {
            statuses.push(RouteParentStatus {
                parent_ref: parent_ref.to_resource(),
                controller_name: CONTROLLER_NAME.to_string(),
                conditions: conditions::merge(
                    &existing.conditions,
                    desired.to_conditions(generation, now),
                ),
            });
        }
    }

    let mut added = pending.into_iter().collect::<Vec<_>>();
    added.sort_by_key(|(_, (i, _))| *i);
    statuses.extend(added.into_iter().map(|(parent_ref, (_, desired))| RouteParentStatus {
        parent_ref: parent_ref.to_resource(),
        controller_name: CONTROLLER_NAME.to_string(),
        conditions: desired.to_conditions(generation, now).into(),
    }));

    RouteStatus { parents: statuses }
}

/// A server-side apply patch for an HTTPRoute's status.
pub fn patch(namespace: &str, name: &str, status: RouteStatus) -> k8s::Patch<serde_json::Value> {
    k8s::Patch::Apply(serde_json::json!({
        "apiVersion": "gateway.networking.k8s.io/v1",
        "kind": "HTTPRoute",
        "metadata": {
            "name": name,
            "namespace": namespace,
        },
        "status": status,
    }))
}
