#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod gateway;
pub mod labels;
pub mod params;

pub use self::labels::Labels;
pub use k8s_openapi::{
    api::{
        self,
        apps::v1::Deployment,
        core::v1::{ConfigMap, Namespace, Secret, Service, ServiceAccount},
        rbac::v1::ClusterRoleBinding,
    },
    apimachinery::pkg::apis::meta::v1::{Condition, Time},
    ByteString,
};
pub use kube::{
    api::{Api, ObjectMeta, Patch, PatchParams, Resource, ResourceExt},
    error::ErrorResponse,
    runtime::watcher,
    Client, Error,
};

/// Returns true if the error is an API response indicating that the
/// requested object does not exist.
pub fn is_not_found(error: &Error) -> bool {
    matches!(error, Error::Api(ErrorResponse { code: 404, .. }))
}
