use crate::{
    backoff::Backoff,
    core::CONTROLLER_NAME,
    error::{Error, Result},
    k8s::{self, gateway::GatewayClass, PatchParams, ResourceExt, Time},
    metrics::ControllerMetrics,
    status::{self, ResourceId},
};
use kube::runtime::controller::Action;
use std::sync::Arc;

const CONTROLLER: &str = "gatewayclass";

pub struct Context {
    client: k8s::Client,
    metrics: ControllerMetrics,
    backoff: Backoff,
}

impl Context {
    pub fn new(client: k8s::Client, metrics: ControllerMetrics) -> Self {
        Self {
            client,
            metrics,
            backoff: Backoff::default(),
        }
    }
}

pub async fn reconcile(class: Arc<GatewayClass>, ctx: Arc<Context>) -> Result<Action> {
    let observer = ctx.metrics.observe(CONTROLLER);
    let result = accept(&class, &ctx).await;
    observer.finish(&result);
    if result.is_ok() {
        ctx.backoff.reset(&ResourceId::of(class.as_ref()));
    }
    result
}

pub fn error_policy(class: Arc<GatewayClass>, error: &Error, ctx: Arc<Context>) -> Action {
    let delay = ctx.backoff.failed(ResourceId::of(class.as_ref()));
    tracing::warn!(name = %class.name_any(), %error, ?delay, "Failed to reconcile GatewayClass");
    Action::requeue(delay)
}

async fn accept(class: &GatewayClass, ctx: &Context) -> Result<Action> {
    let name = class.name_any();
    if class.spec.controller_name != CONTROLLER_NAME {
        tracing::debug!(%name, controller = %class.spec.controller_name, "Ignoring GatewayClass");
        return Ok(Action::await_change());
    }

    let status = status::class::accepted(class, &Time(chrono::Utc::now()));
    let api = k8s::Api::<GatewayClass>::all(ctx.client.clone());
    let params = PatchParams::apply(status::GATEWAY_CLASS_FIELD_MANAGER).force();
    let result = api
        .patch_status(&name, &params, &status::class::patch(&name, status))
        .await;
    ctx.metrics.status_patch("GatewayClass", &result);
    match result {
        Ok(_) => tracing::debug!(%name, "Accepted GatewayClass"),
        Err(error) if k8s::is_not_found(&error) => {}
        Err(error) => return Err(error.into()),
    }
    Ok(Action::await_change())
}
