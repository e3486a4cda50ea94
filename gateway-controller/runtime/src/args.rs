use crate::{
    core::{LABEL_MANAGED_BY, MANAGED_BY},
    gateway, gatewayclass, httproute,
    infra::Settings,
    k8s::{
        self,
        gateway::{Gateway, GatewayClass, HttpRoute, ReferenceGrant},
        params::GatewayClassParameters,
        ConfigMap, Deployment, ResourceExt, Secret, Service, ServiceAccount,
    },
    lease,
    metrics::ControllerMetrics,
    watches,
};
use anyhow::{bail, Result};
use clap::Parser;
use futures::prelude::*;
use kube::runtime::{
    controller::{self, Controller},
    reflector, watcher, WatchStreamExt,
};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "varnish-gateway", about = "A Gateway API controller for Varnish")]
pub struct Args {
    #[clap(
        long,
        default_value = "varnish_gateway=info,warn",
        env = "VARNISH_GATEWAY_LOG_LEVEL"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The GatewayClass whose Gateways are managed.
    #[clap(long, default_value = "varnish", env = "GATEWAY_CLASS_NAME")]
    gateway_class_name: String,

    /// The image run by gateway pods.
    #[clap(long, env = "GATEWAY_IMAGE")]
    gateway_image: String,

    /// Comma-separated names of pull secrets for the gateway image.
    #[clap(long, default_value = "", env = "IMAGE_PULL_SECRETS")]
    image_pull_secrets: Names,

    /// Only run the controllers while holding the leader lease.
    #[clap(long)]
    leader_elect: bool,

    #[clap(long, default_value = "varnish-gateway-system", env = "POD_NAMESPACE")]
    controller_namespace: String,

    #[clap(long, default_value = "varnish-gateway-operator")]
    lease_name: String,

    /// The identity used to claim the leader lease.
    #[clap(long, env = "HOSTNAME")]
    hostname: Option<String>,

    /// The ClusterRole bound to each gateway's service account.
    #[clap(long, default_value = "varnish-gateway-chaperone")]
    chaperone_cluster_role: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Names(Vec<String>);

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            gateway_class_name,
            gateway_image,
            image_pull_secrets: Names(image_pull_secrets),
            leader_elect,
            controller_namespace,
            lease_name,
            hostname,
            chaperone_cluster_role,
        } = self;

        let mut prom = <Registry>::default();
        let metrics = ControllerMetrics::register(prom.sub_registry_with_prefix("gateway_controller"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let leadership = if leader_elect {
            let Some(hostname) = hostname else {
                bail!("--hostname must be set for leader election");
            };
            let mut claims =
                lease::init(&runtime, &controller_namespace, &lease_name, &hostname).await?;
            info!(lease = %lease_name, %hostname, "Waiting for leadership");
            lease::acquired(&mut claims, &hostname).await?;
            info!(lease = %lease_name, %hostname, "Acquired leadership");
            Some(lease::lost(claims, hostname))
        } else {
            None
        };

        let client = runtime.client();
        let config = controller::Config::default().concurrency(1);
        let settings = Settings {
            image: gateway_image,
            image_pull_secrets,
            chaperone_cluster_role,
        };
        info!(class = %gateway_class_name, image = %settings.image, "Starting controllers");

        // GatewayClasses
        let classes_ctrl = Controller::new(
            k8s::Api::<GatewayClass>::all(client.clone()),
            watcher::Config::default(),
        )
        .with_config(config.clone());
        let classes = classes_ctrl.store();
        let ctx = Arc::new(gatewayclass::Context::new(client.clone(), metrics.clone()));
        let classes_ctrl = classes_ctrl
            .run(gatewayclass::reconcile, gatewayclass::error_policy, ctx)
            .for_each(|_| future::ready(()));
        tokio::spawn(
            runtime
                .cancel_on_shutdown(classes_ctrl)
                .instrument(info_span!("gatewayclasses")),
        );

        // GatewayClassParameters are only needed to map user VCL changes.
        let (params, writer) = reflector::store::<GatewayClassParameters>();
        let params_watch = reflector(
            writer,
            watcher(
                k8s::Api::<GatewayClassParameters>::all(client.clone()),
                watcher::Config::default(),
            ),
        )
        .default_backoff()
        .touched_objects()
        .for_each(|_| future::ready(()));
        tokio::spawn(
            runtime
                .cancel_on_shutdown(params_watch)
                .instrument(info_span!("gatewayclassparameters")),
        );

        // Gateways
        let gateways_ctrl = Controller::new(
            k8s::Api::<Gateway>::all(client.clone()),
            watcher::Config::default(),
        )
        .with_config(config.clone());
        let gateways = gateways_ctrl.store();
        let owned = watcher::Config::default().labels(&format!("{LABEL_MANAGED_BY}={MANAGED_BY}"));
        let ctx = Arc::new(gateway::Context::new(
            client.clone(),
            gateway_class_name.clone(),
            settings,
            metrics.clone(),
        ));
        let gateways_ctrl = gateways_ctrl
            .owns(k8s::Api::<Deployment>::all(client.clone()), owned.clone())
            .owns(k8s::Api::<Service>::all(client.clone()), owned.clone())
            .owns(k8s::Api::<ConfigMap>::all(client.clone()), owned.clone())
            .owns(k8s::Api::<Secret>::all(client.clone()), owned.clone())
            .owns(k8s::Api::<ServiceAccount>::all(client.clone()), owned.clone())
            .watches(
                k8s::Api::<GatewayClassParameters>::all(client.clone()),
                watcher::Config::default(),
                {
                    let (classes, gateways, class_name) =
                        (classes.clone(), gateways.clone(), gateway_class_name.clone());
                    move |p: GatewayClassParameters| {
                        watches::gateways_for_params(
                            &p.name_any(),
                            &classes.state(),
                            &gateways.state(),
                            &class_name,
                        )
                    }
                },
            )
            .watches(
                k8s::Api::<ConfigMap>::all(client.clone()),
                watcher::Config::default(),
                {
                    let (classes, gateways, class_name) =
                        (classes.clone(), gateways.clone(), gateway_class_name.clone());
                    move |cm: ConfigMap| {
                        watches::gateways_for_user_vcl(
                            &cm,
                            &params.state(),
                            &classes.state(),
                            &gateways.state(),
                            &class_name,
                        )
                    }
                },
            )
            .watches(
                k8s::Api::<Secret>::all(client.clone()),
                watcher::Config::default().fields("type=kubernetes.io/tls"),
                {
                    let (gateways, class_name) = (gateways.clone(), gateway_class_name.clone());
                    move |secret: Secret| {
                        watches::gateways_for_secret(&secret, &gateways.state(), &class_name)
                    }
                },
            )
            .watches(
                k8s::Api::<ReferenceGrant>::all(client.clone()),
                watcher::Config::default(),
                {
                    let (gateways, class_name) = (gateways.clone(), gateway_class_name.clone());
                    move |grant: ReferenceGrant| {
                        watches::gateways_for_grant(&grant, &gateways.state(), &class_name)
                    }
                },
            )
            .run(gateway::reconcile, gateway::error_policy, ctx)
            .for_each(|_| future::ready(()));
        tokio::spawn(
            runtime
                .cancel_on_shutdown(gateways_ctrl)
                .instrument(info_span!("gateways")),
        );

        // HTTPRoutes
        let routes_api = k8s::Api::<HttpRoute>::all(client.clone());
        let routes_ctrl =
            Controller::new(routes_api.clone(), watcher::Config::default()).with_config(config);
        let routes = routes_ctrl.store();
        let ctx = Arc::new(httproute::Context::new(
            client.clone(),
            gateway_class_name.clone(),
            routes.clone(),
            metrics,
        ));
        // Gateway status patches, including the attached route counts written
        // by this controller, must not requeue every attached route.
        let gateway_changes = watches::spec_changes(
            watcher(k8s::Api::<Gateway>::all(client.clone()), watcher::Config::default())
                .default_backoff()
                .touched_objects(),
        );
        let routes_ctrl = routes_ctrl
            .watches_stream(gateway_changes, {
                let (routes, class_name) = (routes.clone(), gateway_class_name);
                move |gw: Gateway| watches::routes_for_gateway(&gw, &routes.state(), &class_name)
            })
            .watches(
                k8s::Api::<ReferenceGrant>::all(client.clone()),
                watcher::Config::default(),
                {
                    let routes = routes.clone();
                    move |grant: ReferenceGrant| watches::routes_for_grant(&grant, &routes.state())
                },
            )
            .watches(
                k8s::Api::<Service>::all(client),
                watcher::Config::default(),
                move |svc: Service| watches::routes_for_service(&svc, &routes.state()),
            )
            .run(httproute::reconcile, httproute::error_policy, ctx.clone())
            .for_each(|_| future::ready(()));
        tokio::spawn(
            runtime
                .cancel_on_shutdown(routes_ctrl)
                .instrument(info_span!("httproutes")),
        );
        tokio::spawn(
            runtime
                .cancel_on_shutdown(httproute::watch_deletions(ctx, routes_api))
                .instrument(info_span!("httproute_deletions")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for
        // the background tasks to complete before exiting.
        match leadership {
            None => {
                if runtime.run().await.is_err() {
                    bail!("Aborted");
                }
            }
            Some(lost) => {
                tokio::select! {
                    res = runtime.run() => if res.is_err() {
                        bail!("Aborted");
                    },
                    () = lost => bail!("Lost leadership"),
                }
            }
        }

        Ok(())
    }
}

impl std::str::FromStr for Names {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(
            s.split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case::empty("", vec![])]
    #[case::single("registry-creds", vec!["registry-creds"])]
    #[case::trimmed(" a , b,,c ", vec!["a", "b", "c"])]
    fn parses_pull_secret_names(#[case] input: &str, #[case] expected: Vec<&str>) {
        let Names(names) = input.parse().expect("parse is infallible");
        assert_eq!(names, expected);
    }

    #[test]
    fn parses_required_flags() {
        let args = Args::try_parse_from([
            "varnish-gateway",
            "--gateway-image=ghcr.io/varnish/gateway-chaperone:v1",
            "--image-pull-secrets=a,b",
            "--leader-elect",
        ])
        .expect("args must parse");
        assert_eq!(args.gateway_image, "ghcr.io/varnish/gateway-chaperone:v1");
        assert_eq!(args.image_pull_secrets, Names(vec!["a".to_string(), "b".to_string()]));
        assert!(args.leader_elect);
        assert_eq!(args.lease_name, "varnish-gateway-operator");
    }
}
