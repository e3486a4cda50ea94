use varnish_gateway_controller_k8s_api::gateway::{self, ReferenceGrant, ReferenceGrantSpec};

/// A reference from an object in one namespace to an object in another,
/// which must be permitted by a ReferenceGrant in the target namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CrossNamespaceRef {
    pub from_group: String,
    pub from_kind: String,
    pub from_namespace: String,
    pub to_group: String,
    pub to_kind: String,
    pub to_namespace: String,
    pub to_name: String,
}

/// Decides whether cross-namespace references are permitted.
///
/// Implementations list grants in the *target* namespace only; grants in any
/// other namespace never authorize a reference.
#[async_trait::async_trait]
pub trait ReferenceAuthorizer {
    async fn is_allowed(&self, reference: &CrossNamespaceRef) -> anyhow::Result<bool>;
}

// === impl CrossNamespaceRef ===

impl CrossNamespaceRef {
    /// A Gateway's listener referencing a certificate Secret.
    pub fn gateway_to_secret(
        gateway_namespace: impl Into<String>,
        secret_namespace: impl Into<String>,
        secret_name: impl Into<String>,
    ) -> Self {
        Self {
            from_group: gateway::GROUP.to_string(),
            from_kind: "Gateway".to_string(),
            from_namespace: gateway_namespace.into(),
            to_group: String::new(),
            to_kind: "Secret".to_string(),
            to_namespace: secret_namespace.into(),
            to_name: secret_name.into(),
        }
    }

    /// An HTTPRoute's backendRef pointing at a Service.
    pub fn route_to_service(
        route_namespace: impl Into<String>,
        service_namespace: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            from_group: gateway::GROUP.to_string(),
            from_kind: "HTTPRoute".to_string(),
            from_namespace: route_namespace.into(),
            to_group: String::new(),
            to_kind: "Service".to_string(),
            to_namespace: service_namespace.into(),
            to_name: service_name.into(),
        }
    }
}

/// Returns true if any of the grants permits the reference.
///
/// Grants are expected to have been listed from the reference's target
/// namespace.
pub fn any_grant_allows<'g>(
    grants: impl IntoIterator<Item = &'g ReferenceGrant>,
    reference: &CrossNamespaceRef,
) -> bool {
    grants
        .into_iter()
        .any(|grant| grant_allows(&grant.spec, reference))
}

/// A grant permits a reference when at least one `from` entry matches the
/// referrer's group, kind, and namespace exactly, and at least one `to` entry
/// matches the target's group and kind and either omits a name or names the
/// target.
pub fn grant_allows(grant: &ReferenceGrantSpec, reference: &CrossNamespaceRef) -> bool {
    let from = grant.from.iter().any(|from| {
        from.group == reference.from_group
            && from.kind == reference.from_kind
            && from.namespace == reference.from_namespace
    });
    if !from {
        return false;
    }

    grant.to.iter().any(|to| {
        to.group == reference.to_group
            && to.kind == reference.to_kind
            && to.name.as_ref().map_or(true, |n| *n == reference.to_name)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway::{ReferenceGrantFrom, ReferenceGrantTo};
    use rstest::rstest;

    fn from_gateways(ns: &str) -> ReferenceGrantFrom {
        ReferenceGrantFrom {
            group: gateway::GROUP.to_string(),
            kind: "Gateway".to_string(),
            namespace: ns.to_string(),
        }
    }

    fn to_secrets(name: Option<&str>) -> ReferenceGrantTo {
        ReferenceGrantTo {
            group: String::new(),
            kind: "Secret".to_string(),
            name: name.map(ToString::to_string),
        }
    }

    fn reference() -> CrossNamespaceRef {
        CrossNamespaceRef::gateway_to_secret("gateways", "certs", "wildcard-tls")
    }

    #[rstest]
    #[case::any_secret(vec![from_gateways("gateways")], vec![to_secrets(None)], true)]
    #[case::named_secret(vec![from_gateways("gateways")], vec![to_secrets(Some("wildcard-tls"))], true)]
    #[case::other_secret(vec![from_gateways("gateways")], vec![to_secrets(Some("other"))], false)]
    #[case::other_namespace(vec![from_gateways("apps")], vec![to_secrets(None)], false)]
    #[case::any_from_matches(
        vec![from_gateways("apps"), from_gateways("gateways")],
        vec![to_secrets(Some("other")), to_secrets(Some("wildcard-tls"))],
        true
    )]
    #[case::empty_from(vec![], vec![to_secrets(None)], false)]
    #[case::empty_to(vec![from_gateways("gateways")], vec![], false)]
    #[case::wrong_kind(
        vec![from_gateways("gateways")],
        vec![ReferenceGrantTo { group: String::new(), kind: "ConfigMap".to_string(), name: None }],
        false
    )]
    #[case::wrong_from_kind(
        vec![ReferenceGrantFrom {
            group: gateway::GROUP.to_string(),
            kind: "HTTPRoute".to_string(),
            namespace: "gateways".to_string(),
        }],
        vec![to_secrets(None)],
        false
    )]
    fn grant_matching(
        #[case] from: Vec<ReferenceGrantFrom>,
        #[case] to: Vec<ReferenceGrantTo>,
        #[case] allowed: bool,
    ) {
        let grant = ReferenceGrantSpec { from, to };
        assert_eq!(grant_allows(&grant, &reference()), allowed);
    }

    #[test]
    fn adding_a_grant_only_widens() {
        let deny = ReferenceGrant::new(
            "deny",
            ReferenceGrantSpec {
                from: vec![from_gateways("apps")],
                to: vec![to_secrets(None)],
            },
        );
        let allow = ReferenceGrant::new(
            "allow",
            ReferenceGrantSpec {
                from: vec![from_gateways("gateways")],
                to: vec![to_secrets(Some("wildcard-tls"))],
            },
        );

        assert!(!any_grant_allows(Vec::<ReferenceGrant>::new().iter(), &reference()));
        assert!(!any_grant_allows([&deny], &reference()));
        assert!(any_grant_allows([&deny, &allow], &reference()));
    }
}
