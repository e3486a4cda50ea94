use crate::conditions::{self, reason, type_};
use varnish_gateway_controller_k8s_api::{
    self as k8s,
    gateway::{GatewayClass, GatewayClassStatus},
    Time,
};

/// Marks a class as accepted, keeping any other conditions it carries.
pub fn accepted(class: &GatewayClass, now: &Time) -> GatewayClassStatus {
    let mut conditions = class
        .status
        .as_ref()
        .and_then(|s| s.conditions.clone())
        .unwrap_or_default();
    conditions::set(
        &mut conditions,
        conditions::new(
            type_::ACCEPTED,
            true,
            reason::ACCEPTED,
            "GatewayClass is accepted",
            class.metadata.generation,
            now,
        ),
    );
    GatewayClassStatus {
        conditions: Some(conditions),
    }
}

pub fn patch(name: &str, status: GatewayClassStatus) -> k8s::Patch<serde_json::Value> {
    k8s::Patch::Apply(serde_json::json!({
        "apiVersion": "gateway.networking.k8s.io/v1",
        "kind": "GatewayClass",
        "metadata": { "name": name },
        "status": status,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use varnish_gateway_controller_k8s_api::gateway::GatewayClassSpec;

    fn at(secs: i64) -> Time {
        Time(chrono::DateTime::<chrono::Utc>::from_timestamp(secs, 0).unwrap())
    }

    #[test]
    fn accepts_once() {
        let mut class = GatewayClass::new(
            "varnish",
            GatewayClassSpec {
                controller_name: varnish_gateway_controller_core::CONTROLLER_NAME.to_string(),
                parameters_ref: None,
                description: None,
            },
        );
        class.metadata.generation = Some(2);

        let status = accepted(&class, &at(1));
        class.status = Some(status.clone());
        let again = accepted(&class, &at(5));
        assert_eq!(status, again);

        let conditions = again.conditions.unwrap_or_default();
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].message, "GatewayClass is accepted");
        assert_eq!(conditions[0].observed_generation, Some(2));
    }
}
