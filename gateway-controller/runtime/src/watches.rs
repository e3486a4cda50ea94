//! Maps changes to secondary objects onto the primary objects that must be
//! reconciled again.
//!
//! Every mapping filters a snapshot of a reflector store. There is no reverse
//! index, so each event costs a pass over the snapshot.

use crate::{
    core::{
        attachment::{Gateway, ParentRef},
        backend::SERVICE_KIND,
        tls::SECRET_KIND,
        LABEL_MANAGED_BY, MANAGED_BY,
    },
    k8s::{
        gateway::{self as api, GatewayClass, HttpRoute, ReferenceGrant},
        params::{self, GatewayClassParameters},
        ConfigMap, ResourceExt, Secret, Service,
    },
};
use futures::prelude::*;
use kube::runtime::{predicates, reflector::ObjectRef, watcher, WatchStreamExt};
use std::{collections::BTreeSet, sync::Arc};

/// Drops updates that leave an object's generation unchanged, such as status
/// patches.
pub fn spec_changes<K, S>(objects: S) -> impl Stream<Item = Result<K, watcher::Error>> + Send
where
    K: kube::Resource<DynamicType = ()> + Send + 'static,
    S: Stream<Item = Result<K, watcher::Error>> + Send + 'static,
{
    objects.predicate_filter(predicates::generation)
}

/// Gateways of our class whose class refers to the given parameters.
pub fn gateways_for_params(
    params_name: &str,
    classes: &[Arc<GatewayClass>],
    gateways: &[Arc<api::Gateway>],
    class_name: &str,
) -> Vec<ObjectRef<api::Gateway>> {
    gateways_for_any_params(&BTreeSet::from([params_name]), classes, gateways, class_name)
}

/// Gateways whose parameters read user VCL from the given ConfigMap.
pub fn gateways_for_user_vcl(
    config_map: &ConfigMap,
    params: &[Arc<GatewayClassParameters>],
    classes: &[Arc<GatewayClass>],
    gateways: &[Arc<api::Gateway>],
    class_name: &str,
) -> Vec<ObjectRef<api::Gateway>> {
    let namespace = config_map.namespace().unwrap_or_default();
    let name = config_map.name_any();
    let params_names = params
        .iter()
        .filter(|p| {
            p.spec
                .user_vcl_config_map_ref
                .as_ref()
                .is_some_and(|r| r.namespace == namespace && r.name == name)
        })
        .map(|p| p.name_any())
        .collect::<BTreeSet<_>>();
    if params_names.is_empty() {
        return vec![];
    }

    gateways_for_any_params(
        &params_names.iter().map(String::as_str).collect(),
        classes,
        gateways,
        class_name,
    )
}

fn gateways_for_any_params(
    params_names: &BTreeSet<&str>,
    classes: &[Arc<GatewayClass>],
    gateways: &[Arc<api::Gateway>],
    class_name: &str,
) -> Vec<ObjectRef<api::Gateway>> {
    let uses_params = classes.iter().any(|class| {
        class.name_any() == class_name
            && class.spec.parameters_ref.as_ref().is_some_and(|r| {
                r.group == params::GROUP
                    && r.kind == params::KIND
                    && params_names.contains(r.name.as_str())
            })
    });
    if !uses_params {
        return vec![];
    }

    gateways
        .iter()
        .filter(|gw| gw.spec.gateway_class_name == class_name)
        .map(|gw| ObjectRef::from_obj(&**gw))
        .collect()
}

/// Gateways of our class with a certificate reference to the given Secret.
///
/// Secrets created by this controller are already watched as owned objects
/// and are ignored.
pub fn gateways_for_secret(
    secret: &Secret,
    gateways: &[Arc<api::Gateway>],
    class_name: &str,
) -> Vec<ObjectRef<api::Gateway>> {
    if secret.labels().get(LABEL_MANAGED_BY).map(String::as_str) == Some(MANAGED_BY) {
        return vec![];
    }
    let namespace = secret.namespace().unwrap_or_default();
    let name = secret.name_any();

    gateways
        .iter()
        .filter(|gw| gw.spec.gateway_class_name == class_name)
        .filter(|gw| Gateway::from_resource(gw).references_secret(&namespace, &name))
        .map(|gw| ObjectRef::from_obj(&**gw))
        .collect()
}

/// Gateways whose cross-namespace certificate references may be authorized
/// by the given grant.
pub fn gateways_for_grant(
    grant: &ReferenceGrant,
    gateways: &[Arc<api::Gateway>],
    class_name: &str,
) -> Vec<ObjectRef<api::Gateway>> {
    let grants_secrets = grant
        .spec
        .to
        .iter()
        .any(|to| api::is_core_group(Some(to.group.as_str())) && to.kind == SECRET_KIND);
    if !grants_secrets {
        return vec![];
    }

    let from_namespaces = grant
        .spec
        .from
        .iter()
        .filter(|from| from.group == api::GROUP && from.kind == "Gateway")
        .map(|from| from.namespace.as_str())
        .collect::<BTreeSet<_>>();
    let grant_namespace = grant.namespace().unwrap_or_default();

    gateways
        .iter()
        .filter(|gw| gw.spec.gateway_class_name == class_name)
        .filter(|gw| {
            gw.namespace()
                .is_some_and(|ns| from_namespaces.contains(ns.as_str()))
        })
        .filter(|gw| Gateway::from_resource(gw).references_secrets_in(&grant_namespace))
        .map(|gw| ObjectRef::from_obj(&**gw))
        .collect()
}

/// Routes with a parent reference to the given gateway, if it is of our
/// class.
pub fn routes_for_gateway(
    gateway: &api::Gateway,
    routes: &[Arc<HttpRoute>],
    class_name: &str,
) -> Vec<ObjectRef<HttpRoute>> {
    if gateway.spec.gateway_class_name != class_name {
        return vec![];
    }
    let namespace = gateway.namespace().unwrap_or_default();
    let name = gateway.name_any();

    routes
        .iter()
        .filter(|route| {
            let route_ns = route.namespace().unwrap_or_default();
            route
                .parent_refs()
                .iter()
                .any(|r| ParentRef::from_resource(r, &route_ns).targets(&namespace, &name))
        })
        .map(|route| ObjectRef::from_obj(&**route))
        .collect()
}

/// Routes in any namespace with a backend reference to the given Service.
pub fn routes_for_service(service: &Service, routes: &[Arc<HttpRoute>]) -> Vec<ObjectRef<HttpRoute>> {
    let namespace = service.namespace().unwrap_or_default();
    let name = service.name_any();

    routes
        .iter()
        .filter(|route| {
            let route_ns = route.namespace().unwrap_or_default();
            route
                .rules()
                .iter()
                .flat_map(|rule| rule.backend_refs.iter().flatten())
                .any(|backend| {
                    backend.kind.as_deref().unwrap_or(SERVICE_KIND) == SERVICE_KIND
                        && api::is_core_group(backend.group.as_deref())
                        && backend.namespace.as_deref().unwrap_or(&route_ns) == namespace
                        && backend.name == name
                })
        })
        .map(|route| ObjectRef::from_obj(&**route))
        .collect()
}

/// Routes in a namespace the grant admits with a backend in the grant's
/// namespace.
pub fn routes_for_grant(grant: &ReferenceGrant, routes: &[Arc<HttpRoute>]) -> Vec<ObjectRef<HttpRoute>> {
    let grants_services = grant
        .spec
        .to
        .iter()
        .any(|to| api::is_core_group(Some(to.group.as_str())) && to.kind == SERVICE_KIND);
    if !grants_services {
        return vec![];
    }

    let from_namespaces = grant
        .spec
        .from
        .iter()
        .filter(|from| from.group == api::GROUP && from.kind == "HTTPRoute")
        .map(|from| from.namespace.as_str())
        .collect::<BTreeSet<_>>();
    let grant_namespace = grant.namespace().unwrap_or_default();

    routes
        .iter()
        .filter(|route| {
            let Some(route_ns) = route.namespace() else {
                return false;
            };
            from_namespaces.contains(route_ns.as_str())
                && route
                    .rules()
                    .iter()
                    .flat_map(|rule| rule.backend_refs.iter().flatten())
                    .any(|backend| backend.namespace.as_deref() == Some(grant_namespace.as_str()))
        })
        .map(|route| ObjectRef::from_obj(&**route))
        .collect()
}
