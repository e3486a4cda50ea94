/// ReferenceGrant identifies kinds of resources in other namespaces that are
/// trusted to reference the specified kinds of resources in the same
/// namespace as the policy.
///
/// Each ReferenceGrant can be used to represent a unique trust relationship.
/// Additional grants can be used to add to the set of trusted sources of
/// inbound references for the namespace they are defined within.
#[derive(Clone, Debug, Default, kube::CustomResource, serde::Deserialize, serde::Serialize)]
#[kube(
    schema = "disabled",
    group = "gateway.networking.k8s.io",
    version = "v1beta1",
    kind = "ReferenceGrant",
    namespaced
)]
pub struct ReferenceGrantSpec {
    /// From describes the trusted namespaces and kinds that can reference the
    /// resources described in "To".
    #[serde(default)]
    pub from: Vec<ReferenceGrantFrom>,

    /// To describes the resources that may be referenced by the resources
    /// described in "From".
    #[serde(default)]
    pub to: Vec<ReferenceGrantTo>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct ReferenceGrantFrom {
    /// Group is the group of the referent. When empty, the Kubernetes core
    /// API group is inferred.
    #[serde(default)]
    pub group: String,
    pub kind: String,
    pub namespace: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct ReferenceGrantTo {
    /// Group is the group of the referent. When empty, the Kubernetes core
    /// API group is inferred.
    #[serde(default)]
    pub group: String,
    pub kind: String,

    /// Name is the name of the referent. When unspecified, this policy
    /// refers to all resources of the specified Group and Kind in the local
    /// namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}
