//! Reconciles Gateways of our class into the infrastructure that serves them
//! and publishes the gateway-owned part of their status.

use crate::{
    backoff::Backoff,
    core::{attachment::Gateway, tls, vcl, FINALIZER},
    error::{Error, Result},
    infra::{self, Inputs, Settings},
    k8s::{
        self,
        gateway::{self as api, GatewayClass},
        params::{self, GatewayClassParameters, GatewayClassParametersSpec},
        ClusterRoleBinding, ConfigMap, PatchParams, ResourceExt, Service, Time,
    },
    lookup::ClusterLookup,
    metrics::ControllerMetrics,
    status::{self, gateway::ResolvedRefs, ResourceId},
};
use kube::{api::DeleteParams, runtime::controller::Action};
use serde_json::json;
use std::sync::Arc;
use tokio::time::Duration;

const CONTROLLER: &str = "gateway";

pub struct Context {
    client: k8s::Client,
    class_name: String,
    settings: Settings,
    lookup: ClusterLookup,
    metrics: ControllerMetrics,
    backoff: Backoff,
}

impl Context {
    pub fn new(
        client: k8s::Client,
        class_name: String,
        settings: Settings,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            lookup: ClusterLookup::new(client.clone()),
            client,
            class_name,
            settings,
            metrics,
            backoff: Backoff::default(),
        }
    }
}

pub async fn reconcile(gateway: Arc<api::Gateway>, ctx: Arc<Context>) -> Result<Action> {
    let observer = ctx.metrics.observe(CONTROLLER);
    let result = reconcile_gateway(&gateway, &ctx).await;
    observer.finish(&result);
    if result.is_ok() {
        ctx.backoff.reset(&ResourceId::of(gateway.as_ref()));
    }
    result
}

pub fn error_policy(gateway: Arc<api::Gateway>, error: &Error, ctx: Arc<Context>) -> Action {
    let delay = ctx.backoff.failed(ResourceId::of(gateway.as_ref()));
    tracing::warn!(
        namespace = %gateway.namespace().unwrap_or_default(),
        name = %gateway.name_any(),
        %error,
        ?delay,
        "Failed to reconcile Gateway",
    );
    Action::requeue(delay)
}

async fn reconcile_gateway(resource: &api::Gateway, ctx: &Context) -> Result<Action> {
    let namespace = resource
        .namespace()
        .ok_or(Error::MissingObjectKey("metadata.namespace"))?;
    let name = resource.name_any();

    if resource.spec.gateway_class_name != ctx.class_name {
        tracing::debug!(
            %namespace,
            %name,
            class = %resource.spec.gateway_class_name,
            "Ignoring Gateway of another class",
        );
        return Ok(Action::await_change());
    }

    if resource.metadata.deletion_timestamp.is_some() {
        return finalize(resource, &namespace, &name, ctx).await;
    }

    if !resource.finalizers().iter().any(|f| f == FINALIZER) {
        let mut finalizers = resource.finalizers().to_vec();
        finalizers.push(FINALIZER.to_string());
        patch_finalizers(ctx, &namespace, &name, finalizers).await?;
        tracing::debug!(%namespace, %name, "Added finalizer");
        return Ok(Action::requeue(Duration::ZERO));
    }

    let gateway = Gateway::from_resource(resource);
    let applied = apply_infrastructure(resource, &gateway, ctx).await;

    let outcome = applied.as_ref().map(|_| ()).map_err(ToString::to_string);
    let published = publish_status(
        resource,
        &gateway,
        outcome.as_ref().map(|_| ()).map_err(String::as_str),
        ctx,
    )
    .await;

    match applied {
        Err(error) => {
            if let Err(status_error) = published {
                tracing::warn!(%namespace, %name, error = %status_error, "Failed to update status");
            }
            Err(error)
        }
        Ok(()) => {
            published?;
            tracing::debug!(%namespace, %name, "Reconciled");
            Ok(Action::await_change())
        }
    }
}

/// Deletes the cluster-scoped children, which cannot be garbage collected
/// through owner references, and releases the gateway.
async fn finalize(
    resource: &api::Gateway,
    namespace: &str,
    name: &str,
    ctx: &Context,
) -> Result<Action> {
    tracing::info!(%namespace, %name, "Finalizing Gateway");

    let crb = infra::cluster_role_binding_name(namespace, name);
    let api = k8s::Api::<ClusterRoleBinding>::all(ctx.client.clone());
    match api.delete(&crb, &DeleteParams::default()).await {
        Ok(_) => tracing::info!(name = %crb, "Deleted ClusterRoleBinding"),
        Err(error) if k8s::is_not_found(&error) => {}
        Err(error) => return Err(error.into()),
    }

    if resource.finalizers().iter().any(|f| f == FINALIZER) {
        let finalizers = resource
            .finalizers()
            .iter()
            .filter(|f| *f != FINALIZER)
            .cloned()
            .collect();
        match patch_finalizers(ctx, namespace, name, finalizers).await {
            Ok(()) => {}
            // The namespace is being deleted along with the gateway.
            Err(Error::Kube(error)) if k8s::is_not_found(&error) => {
                tracing::info!(%namespace, %name, "Gateway already gone, skipping finalizer removal");
            }
            Err(error) => return Err(error),
        }
    }

    Ok(Action::await_change())
}

async fn patch_finalizers(
    ctx: &Context,
    namespace: &str,
    name: &str,
    finalizers: Vec<String>,
) -> Result<()> {
    let api = k8s::Api::<api::Gateway>::namespaced(ctx.client.clone(), namespace);
    let patch = k8s::Patch::Merge(json!({ "metadata": { "finalizers": finalizers } }));
    api.patch(name, &PatchParams::default(), &patch).await?;
    Ok(())
}

async fn apply_infrastructure(
    resource: &api::Gateway,
    gateway: &Gateway,
    ctx: &Context,
) -> Result<()> {
    let params = class_parameters(ctx, &gateway.class_name)
        .await
        .unwrap_or_default();
    let user_vcl = match &params.user_vcl_config_map_ref {
        Some(reference) => user_vcl(ctx, reference).await.unwrap_or_default(),
        None => String::new(),
    };
    let inputs = Inputs {
        vcl: vcl::merge(&vcl::generate(), &user_vcl),
        tls_bundles: tls::collect_bundles(gateway, &ctx.lookup, &ctx.lookup).await,
        params,
    };

    for child in infra::build(resource, &ctx.settings, &inputs)? {
        let kind = child.kind();
        if let Err(error) = child.apply(&ctx.client, resource).await {
            tracing::warn!(
                namespace = %gateway.namespace,
                name = %gateway.name,
                %kind,
                %error,
                "Failed to apply child",
            );
            return Err(error);
        }
    }
    Ok(())
}

/// Follows the gateway's class to its parameters. Every step may be absent.
async fn class_parameters(ctx: &Context, class_name: &str) -> Option<GatewayClassParametersSpec> {
    let classes = k8s::Api::<GatewayClass>::all(ctx.client.clone());
    let class = match classes.get_opt(class_name).await {
        Ok(class) => class?,
        Err(error) => {
            tracing::warn!(class = %class_name, %error, "Failed to get GatewayClass");
            return None;
        }
    };

    let reference = class.spec.parameters_ref?;
    if reference.group != params::GROUP || reference.kind != params::KIND {
        return None;
    }

    let api = k8s::Api::<GatewayClassParameters>::all(ctx.client.clone());
    match api.get_opt(&reference.name).await {
        Ok(params) => params.map(|p| p.spec),
        Err(error) => {
            tracing::warn!(name = %reference.name, %error, "Failed to get GatewayClassParameters");
            None
        }
    }
}

async fn user_vcl(ctx: &Context, reference: &params::ConfigMapReference) -> Option<String> {
    let api = k8s::Api::<ConfigMap>::namespaced(ctx.client.clone(), &reference.namespace);
    let cm = match api.get_opt(&reference.name).await {
        Ok(Some(cm)) => cm,
        Ok(None) => {
            tracing::warn!(
                namespace = %reference.namespace,
                name = %reference.name,
                "User VCL ConfigMap not found",
            );
            return None;
        }
        Err(error) => {
            tracing::warn!(
                namespace = %reference.namespace,
                name = %reference.name,
                %error,
                "Failed to get user VCL ConfigMap",
            );
            return None;
        }
    };

    let key = reference.key();
    let vcl = cm.data.and_then(|mut data| data.remove(key));
    if vcl.is_none() {
        tracing::warn!(
            namespace = %reference.namespace,
            name = %reference.name,
            %key,
            "User VCL ConfigMap is missing its key",
        );
    }
    vcl
}

async fn publish_status(
    resource: &api::Gateway,
    gateway: &Gateway,
    outcome: Result<(), &str>,
    ctx: &Context,
) -> Result<()> {
    let mut resolved_refs = Vec::with_capacity(gateway.listeners.len());
    for listener in &gateway.listeners {
        let tls = if listener.is_https() {
            Some(tls::validate_listener(gateway, listener, &ctx.lookup, &ctx.lookup).await)
        } else {
            None
        };
        resolved_refs.push(ResolvedRefs::for_listener(listener, tls.as_ref()));
    }

    let services = k8s::Api::<Service>::namespaced(ctx.client.clone(), &gateway.namespace);
    let service = match services.get_opt(&gateway.name).await {
        Ok(service) => service,
        Err(error) => {
            tracing::debug!(%error, "Failed to get Service for addresses");
            None
        }
    };

    let status = status::gateway::status(
        resource,
        gateway,
        outcome,
        &resolved_refs,
        status::gateway::addresses(service.as_ref()),
        &Time(chrono::Utc::now()),
    );

    let api = k8s::Api::<api::Gateway>::namespaced(ctx.client.clone(), &gateway.namespace);
    let params = PatchParams::apply(status::GATEWAY_FIELD_MANAGER).force();
    let patch = status::gateway::patch(&gateway.namespace, &gateway.name, status);
    let result = api.patch_status(&gateway.name, &params, &patch).await;
    ctx.metrics.status_patch("Gateway", &result);
    result?;
    Ok(())
}
