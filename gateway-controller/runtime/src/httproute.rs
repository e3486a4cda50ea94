//! Reconciles HTTPRoutes against the Gateways they name.
//!
//! Each parent reference is processed independently: the route's attachment
//! is decided, the gateway's attached route counts are refreshed, the
//! gateway's routing configuration is rewritten from every route attached to
//! it, and the route's backends are resolved. The outcome for every parent is
//! then published to the route's status in a single patch.

use crate::{
    backoff::Backoff,
    core::{
        attachment::{Gateway, ParentRef, Route},
        backend,
        routing::{self, RoutingConfig},
    },
    error::{Error, Result},
    infra,
    k8s::{
        self,
        gateway::{self as api, HttpRoute},
        ConfigMap, PatchParams, ResourceExt, Time,
    },
    lookup::ClusterLookup,
    metrics::ControllerMetrics,
    status::{self, route::ParentConditions, ResourceId},
};
use futures::prelude::*;
use kube::{
    api::PostParams,
    runtime::{controller::Action, reflector::Store, watcher, WatchStreamExt},
};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tokio::time::Duration;

const CONTROLLER: &str = "httproute";

/// Requeue delay for expected races, which resolve once another reconciler
/// catches up.
const RETRY_DELAY: Duration = Duration::from_secs(2);

pub struct Context {
    client: k8s::Client,
    class_name: String,
    lookup: ClusterLookup,
    routes: Store<HttpRoute>,
    metrics: ControllerMetrics,
    /// The digest of the routing document last written to each ConfigMap.
    routing_digests: Mutex<HashMap<ResourceId, String>>,
    backoff: Backoff,
}

/// The outcome of processing one parent reference.
#[derive(Debug, Default)]
struct Processed {
    /// `None` when the parent is not ours to report on.
    conditions: Option<ParentConditions>,
    retry: Option<Error>,
}

// === impl Context ===

impl Context {
    pub fn new(
        client: k8s::Client,
        class_name: String,
        routes: Store<HttpRoute>,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            lookup: ClusterLookup::new(client.clone()),
            client,
            class_name,
            routes,
            metrics,
            routing_digests: Mutex::new(HashMap::new()),
            backoff: Backoff::default(),
        }
    }

    /// Refreshes attached route counts on every gateway of our class after a
    /// route has been deleted, and rewrites the routing of the gateways the
    /// route was attached to.
    pub async fn refresh_after_deletion(&self, route: &HttpRoute) {
        let deleted = ResourceId::of(route);
        self.backoff.reset(&deleted);
        let model = Route::from_resource(route);
        tracing::debug!(route = %deleted, "Refreshing gateways after route deletion");

        let api = k8s::Api::<api::Gateway>::all(self.client.clone());
        let gateways = match api.list(&Default::default()).await {
            Ok(list) => list.items,
            Err(error) => {
                tracing::warn!(%error, "Failed to list Gateways after route deletion");
                return;
            }
        };

        for resource in gateways
            .iter()
            .filter(|gw| gw.spec.gateway_class_name == self.class_name)
        {
            let gateway = Gateway::from_resource(resource);
            let routes = self.route_snapshot(Some(&deleted));
            let attached = gateway.attached_routes(&routes, &self.lookup).await;
            self.patch_attached(&gateway, &attached).await;

            if model.targets_gateway(&gateway) {
                if let Err(error) = self.write_routing(&gateway, &attached).await {
                    tracing::warn!(
                        gateway = %ResourceId::new(gateway.namespace.clone(), gateway.name.clone()),
                        %error,
                        "Failed to update routing after route deletion",
                    );
                }
            }
        }
    }

    async fn process_parent(&self, route: &Route, parent_ref: &ParentRef) -> Processed {
        if !parent_ref.is_gateway() || parent_ref.group != api::GROUP {
            tracing::debug!(parent = %parent_ref, kind = %parent_ref.kind, "Skipping non-Gateway parent");
            return Processed::default();
        }

        let api = k8s::Api::<api::Gateway>::namespaced(self.client.clone(), &parent_ref.namespace);
        let resource = match api.get_opt(&parent_ref.name).await {
            Ok(Some(gw)) => gw,
            Ok(None) => {
                return Processed::report(ParentConditions::no_matching_parent(format!(
                    "Gateway {} not found",
                    parent_ref.name
                )));
            }
            Err(error) => {
                return Processed {
                    conditions: Some(ParentConditions::pending(format!(
                        "Failed to get Gateway {}: {error}",
                        parent_ref.name
                    ))),
                    retry: Some(error.into()),
                };
            }
        };
        if resource.spec.gateway_class_name != self.class_name {
            tracing::debug!(parent = %parent_ref, "Skipping Gateway of another class");
            return Processed::default();
        }

        let gateway = Gateway::from_resource(&resource);
        if let Some(section) = &parent_ref.section_name {
            if gateway.listener(section).is_none() {
                self.refresh_attached(&gateway).await;
                return Processed::report(ParentConditions::no_matching_parent(format!(
                    "No listener named {section:?} on Gateway {}",
                    gateway.name
                )));
            }
        }

        if let Err(denied) = gateway.check_route(route, &self.lookup).await {
            tracing::debug!(parent = %parent_ref, reason = denied.reason(), "Route not attached");
            self.refresh_attached(&gateway).await;
            return Processed::report(ParentConditions::denied(denied, &gateway));
        }

        let routes = self.route_snapshot(None);
        let attached = gateway.attached_routes(&routes, &self.lookup).await;
        self.patch_attached(&gateway, &attached).await;

        if let Err(error) = self.write_routing(&gateway, &attached).await {
            return Processed {
                conditions: Some(ParentConditions::pending(format!(
                    "Failed to update ConfigMap: {error}"
                ))),
                retry: Some(error),
            };
        }

        let backends = backend::validate(route, &self.lookup, &self.lookup).await;
        let retry = match &backends {
            Err(unresolved) if unresolved.is_retryable() => {
                Some(Error::ExpectedRace(unresolved.to_string()))
            }
            _ => None,
        };
        Processed {
            conditions: Some(ParentConditions::accepted(&backends)),
            retry,
        }
    }

    /// Routes known to the controller's cache, less an optional route that
    /// has just been deleted.
    fn route_snapshot(&self, excluding: Option<&ResourceId>) -> Vec<Route> {
        self.routes
            .state()
            .iter()
            .filter(|r| excluding.map_or(true, |id| ResourceId::of(&***r) != *id))
            .map(|r| Route::from_resource(r))
            .collect()
    }

    async fn refresh_attached(&self, gateway: &Gateway) {
        let routes = self.route_snapshot(None);
        let attached = gateway.attached_routes(&routes, &self.lookup).await;
        self.patch_attached(gateway, &attached).await;
    }

    /// Failures are logged; the counts are refreshed by the next reconcile of
    /// any route attached to the gateway.
    async fn patch_attached(&self, gateway: &Gateway, attached: &[&Route]) {
        let api = k8s::Api::<api::Gateway>::namespaced(self.client.clone(), &gateway.namespace);
        let params = PatchParams::apply(status::ROUTE_FIELD_MANAGER).force();
        let patch = status::attached::patch(gateway, attached);
        let result = api.patch_status(&gateway.name, &params, &patch).await;
        self.metrics.status_patch("Gateway", &result);
        if let Err(error) = result {
            tracing::warn!(
                namespace = %gateway.namespace,
                name = %gateway.name,
                %error,
                "Failed to update attached route counts",
            );
        }
    }

    async fn write_routing(&self, gateway: &Gateway, attached: &[&Route]) -> Result<()> {
        let mut routes = Vec::with_capacity(attached.len());
        for route in attached {
            routes.push(backend::permitted(route, &self.lookup).await);
        }
        let config = RoutingConfig::for_gateway(gateway, &routes);
        let content = config.to_json_pretty()?;

        let name = infra::config_map_name(&gateway.name);
        let api = k8s::Api::<ConfigMap>::namespaced(self.client.clone(), &gateway.namespace);
        let Some(mut cm) = api.get_opt(&name).await? else {
            return Err(Error::ExpectedRace(format!(
                "ConfigMap {}/{name} not found",
                gateway.namespace
            )));
        };

        let digest = routing::content_digest(&content);
        if set_routing(&mut cm, content) {
            api.replace(&name, &PostParams::default(), &cm).await?;
        }

        let id = ResourceId::new(gateway.namespace.clone(), name);
        let previous = self.routing_digests.lock().insert(id.clone(), digest.clone());
        if previous.as_deref() != Some(digest.as_str()) {
            tracing::info!(
                config_map = %id,
                routes = attached.len(),
                entries = config.route_count(),
                "Updated routing",
            );
        } else {
            tracing::debug!(config_map = %id, "Routing unchanged");
        }
        Ok(())
    }

    async fn publish_status(
        &self,
        resource: &HttpRoute,
        route: &Route,
        parents: Vec<(ParentRef, ParentConditions)>,
    ) -> Result<()> {
        let status = status::route::status(
            &route.namespace,
            resource.parent_statuses(),
            parents,
            resource.metadata.generation,
            &Time(chrono::Utc::now()),
        );

        let api = k8s::Api::<HttpRoute>::namespaced(self.client.clone(), &route.namespace);
        let params = PatchParams::apply(status::ROUTE_FIELD_MANAGER).force();
        let patch = status::route::patch(&route.namespace, &route.name, status);
        let result = api.patch_status(&route.name, &params, &patch).await;
        self.metrics.status_patch("HTTPRoute", &result);
        match result {
            Ok(_) => Ok(()),
            Err(error) if k8s::is_not_found(&error) => {
                tracing::debug!(namespace = %route.namespace, name = %route.name, "Route already gone");
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }
}

// === impl Processed ===

impl Processed {
    fn report(conditions: ParentConditions) -> Self {
        Self {
            conditions: Some(conditions),
            retry: None,
        }
    }
}

pub async fn reconcile(route: Arc<HttpRoute>, ctx: Arc<Context>) -> Result<Action> {
    let observer = ctx.metrics.observe(CONTROLLER);
    let result = reconcile_route(&route, &ctx).await;
    observer.finish(&result);
    if result.is_ok() {
        ctx.backoff.reset(&ResourceId::of(route.as_ref()));
    }
    result
}

pub fn error_policy(route: Arc<HttpRoute>, error: &Error, ctx: Arc<Context>) -> Action {
    let delay = ctx.backoff.failed(ResourceId::of(route.as_ref()));
    tracing::warn!(
        namespace = %route.namespace().unwrap_or_default(),
        name = %route.name_any(),
        %error,
        ?delay,
        "Failed to reconcile HTTPRoute",
    );
    Action::requeue(delay)
}

async fn reconcile_route(resource: &HttpRoute, ctx: &Context) -> Result<Action> {
    if resource.namespace().is_none() {
        return Err(Error::MissingObjectKey("metadata.namespace"));
    }
    let route = Route::from_resource(resource);
    if route.parent_refs.is_empty() {
        tracing::debug!(namespace = %route.namespace, name = %route.name, "Route has no parents");
        return Ok(Action::await_change());
    }

    let mut parents = Vec::with_capacity(route.parent_refs.len());
    let mut retry = None;
    for parent_ref in &route.parent_refs {
        let Processed { conditions, retry: error } = ctx.process_parent(&route, parent_ref).await;
        if let Some(conditions) = conditions {
            parents.push((parent_ref.clone(), conditions));
        }
        if let Some(error) = error {
            tracing::info!(
                namespace = %route.namespace,
                name = %route.name,
                parent = %parent_ref,
                %error,
                "Failed to process parent",
            );
            retry = Some(error);
        }
    }

    ctx.publish_status(resource, &route, parents).await?;
    outcome(retry)
}

/// Expected races are retried quietly; any other failure goes through the
/// error policy.
fn outcome(retry: Option<Error>) -> Result<Action> {
    match retry {
        None => Ok(Action::await_change()),
        Some(error) if error.is_expected_race() => Ok(Action::requeue(RETRY_DELAY)),
        Some(error) => Err(error),
    }
}

/// Stores the routing document in the ConfigMap, returning false if it
/// already held the same content. Other keys are left untouched.
fn set_routing(cm: &mut ConfigMap, content: String) -> bool {
    let data = cm.data.get_or_insert_with(Default::default);
    if data.get(routing::CONFIG_KEY) == Some(&content) {
        return false;
    }
    data.insert(routing::CONFIG_KEY.to_string(), content);
    true
}

/// Route deletions are not delivered to the reconciler, so they are observed
/// with a dedicated watch.
pub async fn watch_deletions(ctx: Arc<Context>, api: k8s::Api<HttpRoute>) {
    let deletions = watcher(api, watcher::Config::default())
        .default_backoff()
        .try_filter_map(|event| async move {
            Ok::<_, watcher::Error>(match event {
                watcher::Event::Delete(route) => Some(route),
                _ => None,
            })
        });
    futures::pin_mut!(deletions);

    while let Some(event) = deletions.next().await {
        match event {
            Ok(route) => ctx.refresh_after_deletion(&route).await,
            Err(error) => tracing::info!(%error, "HTTPRoute watch failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::{btreemap, convert_args};
    use pretty_assertions::assert_eq;

    #[test]
    fn routing_replaces_only_its_key() {
        let mut cm = ConfigMap {
            data: Some(convert_args!(btreemap!(
                "main.vcl" => "vcl 4.1;",
                "routing.json" => "{}",
            ))),
            ..Default::default()
        };

        assert!(set_routing(&mut cm, r#"{"version":2}"#.to_string()));
        assert_eq!(
            cm.data,
            Some(convert_args!(btreemap!(
                "main.vcl" => "vcl 4.1;",
                "routing.json" => r#"{"version":2}"#,
            ))),
        );

        assert!(!set_routing(&mut cm, r#"{"version":2}"#.to_string()));
    }

    #[test]
    fn routing_initializes_missing_data() {
        let mut cm = ConfigMap::default();
        assert!(set_routing(&mut cm, "{}".to_string()));
        assert_eq!(
            cm.data,
            Some(convert_args!(btreemap!("routing.json" => "{}"))),
        );
    }

    #[test]
    fn expected_races_requeue_quietly() {
        assert_eq!(outcome(None).ok(), Some(Action::await_change()));
        assert_eq!(
            outcome(Some(Error::ExpectedRace("ConfigMap web/edge-vcl not found".into()))).ok(),
            Some(Action::requeue(RETRY_DELAY)),
        );
        assert!(outcome(Some(Error::MissingObjectKey("metadata.namespace"))).is_err());
    }
}
