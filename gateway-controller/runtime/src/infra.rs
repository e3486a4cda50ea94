//! The Kubernetes objects that run a gateway.
//!
//! Children are built in creation order. The ConfigMap comes first so that
//! the route reconciler can write routing as soon as possible.

use crate::{
    core::{
        infra_hash::{self, InfraConfig},
        routing, vcl, LABEL_GATEWAY_NAME, LABEL_GATEWAY_NAMESPACE, LABEL_MANAGED_BY, MANAGED_BY,
    },
    error::{Error, Result},
    k8s::{
        self,
        api::{
            apps::v1::{DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment},
            core::v1::{
                Capabilities, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource,
                EnvVar, EnvVarSource, HTTPGetAction, Lifecycle, LifecycleHandler,
                LocalObjectReference, ObjectFieldSelector, PodSpec, PodTemplateSpec, Probe,
                ResourceRequirements, SecretVolumeSource, SecurityContext, ServicePort,
                ServiceSpec, TCPSocketAction, Volume, VolumeMount,
            },
            rbac::v1::{RoleRef, Subject},
        },
        gateway::Gateway,
        params::{GatewayClassParametersSpec, VarnishLogging},
        ByteString, ClusterRoleBinding, ConfigMap, Deployment, ObjectMeta, Resource, ResourceExt,
        Secret, Service, ServiceAccount,
    },
};
use k8s_openapi::apimachinery::pkg::{
    api::resource::Quantity, apis::meta::v1::LabelSelector, util::intstr::IntOrString,
};
use kube::api::PostParams;
use rand::Rng;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;

pub const MAIN_VCL_KEY: &str = "main.vcl";
const ADMIN_SECRET_KEY: &str = "secret";

const CONTAINER_NAME: &str = "varnish-gateway";
const LOG_CONTAINER_NAME: &str = "varnish-log";

const VOLUME_VCL_CONFIG: &str = "vcl-config";
const VOLUME_VARNISH_RUN: &str = "varnish-run";
const VOLUME_TLS_CERTS: &str = "tls-certs";

const VARNISH_RUN_DIR: &str = "/var/run/varnish";
const TLS_CERT_DIR: &str = "/etc/varnish/tls";

const LOGGING_MODES: [&str; 2] = ["varnishlog", "varnishncsa"];

const HTTP_PORT: i32 = 8080;
const HTTPS_PORT: i32 = 8443;
const HEALTH_PORT: i32 = 8081;

/// Controller-wide settings for the objects built for every gateway.
#[derive(Clone, Debug)]
pub struct Settings {
    pub image: String,
    pub image_pull_secrets: Vec<String>,
    pub chaperone_cluster_role: String,
}

/// Inputs resolved for a single gateway.
#[derive(Clone, Debug, Default)]
pub struct Inputs {
    pub vcl: String,
    pub params: GatewayClassParametersSpec,
    pub tls_bundles: BTreeMap<String, Vec<u8>>,
}

/// An object owned by a gateway, with the rule for updating an existing copy.
#[derive(Clone, Debug)]
pub enum Child {
    /// Only the generated VCL is updated; routing is owned by the route
    /// reconciler.
    ConfigMap(ConfigMap),
    /// Created once.
    Secret(Secret),
    ServiceAccount(ServiceAccount),
    ClusterRoleBinding(ClusterRoleBinding),
    /// The pod template is replaced when the image or the infrastructure
    /// digest changes.
    Deployment(Deployment),
    Service(Service),
}

pub fn config_map_name(gateway_name: &str) -> String {
    format!("{gateway_name}-vcl")
}

pub fn tls_secret_name(gateway_name: &str) -> String {
    format!("{gateway_name}-tls")
}

pub fn cluster_role_binding_name(gateway_namespace: &str, gateway_name: &str) -> String {
    format!("{gateway_namespace}-{gateway_name}-chaperone")
}

fn service_account_name(gateway_name: &str) -> String {
    format!("{gateway_name}-chaperone")
}

pub fn labels(gateway: &Gateway) -> BTreeMap<String, String> {
    [
        (LABEL_MANAGED_BY, MANAGED_BY.to_string()),
        (LABEL_GATEWAY_NAME, gateway.name_any()),
        (LABEL_GATEWAY_NAMESPACE, gateway.namespace().unwrap_or_default()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Builds every child of a gateway, in creation order.
pub fn build(gateway: &Gateway, settings: &Settings, inputs: &Inputs) -> Result<Vec<Child>> {
    if let Some(logging) = &inputs.params.logging {
        if !LOGGING_MODES.contains(&logging.mode.as_str()) {
            return Err(Error::Params(format!(
                "unsupported logging mode {:?}",
                logging.mode
            )));
        }
    }

    let has_tls = !inputs.tls_bundles.is_empty();
    let infra = InfraConfig {
        image: settings.image.clone(),
        varnishd_extra_args: inputs.params.varnishd_extra_args.clone(),
        logging: inputs.params.logging.clone(),
        image_pull_secrets: settings.image_pull_secrets.clone(),
        has_tls,
        extra_volumes: inputs.params.extra_volumes.clone(),
        extra_volume_mounts: inputs.params.extra_volume_mounts.clone(),
        extra_init_containers: inputs.params.extra_init_containers.clone(),
    };
    let digest = infra.digest()?;

    let mut children = vec![
        Child::ConfigMap(config_map(gateway, &inputs.vcl)?),
        Child::Secret(admin_secret(gateway)),
    ];
    if has_tls {
        children.push(Child::Secret(tls_secret(gateway, &inputs.tls_bundles)));
    }
    children.extend([
        Child::ServiceAccount(ServiceAccount {
            metadata: metadata(gateway, service_account_name(&gateway.name_any())),
            ..Default::default()
        }),
        Child::ClusterRoleBinding(cluster_role_binding(gateway, settings)),
        Child::Deployment(deployment(gateway, settings, &inputs.params, &digest, has_tls)),
        Child::Service(service(gateway, has_tls)),
    ]);
    Ok(children)
}

fn metadata(gateway: &Gateway, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: gateway.namespace(),
        labels: Some(labels(gateway)),
        ..Default::default()
    }
}

fn config_map(gateway: &Gateway, vcl: &str) -> Result<ConfigMap> {
    let vcl = if vcl.is_empty() {
        vcl::generate()
    } else {
        vcl.to_string()
    };
    let routing = routing::RoutingConfig::empty().to_json_pretty()?;
    Ok(ConfigMap {
        metadata: metadata(gateway, config_map_name(&gateway.name_any())),
        data: Some(
            [
                (MAIN_VCL_KEY.to_string(), vcl),
                (routing::CONFIG_KEY.to_string(), routing),
            ]
            .into_iter()
            .collect(),
        ),
        ..Default::default()
    })
}

fn admin_secret(gateway: &Gateway) -> Secret {
    let secret = hex::encode(rand::thread_rng().gen::<[u8; 32]>());
    Secret {
        metadata: metadata(gateway, format!("{}-secret", gateway.name_any())),
        type_: Some("Opaque".to_string()),
        data: Some(
            [(ADMIN_SECRET_KEY.to_string(), ByteString(secret.into_bytes()))]
                .into_iter()
                .collect(),
        ),
        ..Default::default()
    }
}

fn tls_secret(gateway: &Gateway, bundles: &BTreeMap<String, Vec<u8>>) -> Secret {
    Secret {
        metadata: metadata(gateway, tls_secret_name(&gateway.name_any())),
        type_: Some("Opaque".to_string()),
        data: Some(
            bundles
                .iter()
                .map(|(k, v)| (k.clone(), ByteString(v.clone())))
                .collect(),
        ),
        ..Default::default()
    }
}

fn cluster_role_binding(gateway: &Gateway, settings: &Settings) -> ClusterRoleBinding {
    let name = gateway.name_any();
    let namespace = gateway.namespace().unwrap_or_default();
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(cluster_role_binding_name(&namespace, &name)),
            labels: Some(labels(gateway)),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: settings.chaperone_cluster_role.clone(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: service_account_name(&name),
            namespace: Some(namespace),
            ..Default::default()
        }]),
    }
}

fn deployment(
    gateway: &Gateway,
    settings: &Settings,
    params: &GatewayClassParametersSpec,
    digest: &str,
    has_tls: bool,
) -> Deployment {
    let name = gateway.name_any();
    let labels = labels(gateway);

    let mut containers = vec![gateway_container(settings, params, has_tls)];
    if let Some(logging) = &params.logging {
        containers.push(logging_sidecar(&settings.image, logging));
    }

    let image_pull_secrets = Some(
        settings
            .image_pull_secrets
            .iter()
            .map(|name| LocalObjectReference { name: name.clone() })
            .collect::<Vec<_>>(),
    )
    .filter(|s| !s.is_empty());

    Deployment {
        metadata: metadata(gateway, name.clone()),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            strategy: Some(DeploymentStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateDeployment {
                    max_unavailable: Some(IntOrString::Int(0)),
                    max_surge: Some(IntOrString::Int(1)),
                }),
            }),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(
                        [(infra_hash::ANNOTATION.to_string(), digest.to_string())]
                            .into_iter()
                            .collect(),
                    ),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(service_account_name(&name)),
                    image_pull_secrets,
                    termination_grace_period_seconds: Some(30),
                    init_containers: Some(params.extra_init_containers.clone())
                        .filter(|c| !c.is_empty()),
                    containers,
                    volumes: Some(volumes(&name, has_tls, &params.extra_volumes)),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn env(name: &str, value: impl ToString) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

fn gateway_container(
    settings: &Settings,
    params: &GatewayClassParametersSpec,
    has_tls: bool,
) -> Container {
    let mut env_vars = vec![
        EnvVar {
            name: "NAMESPACE".to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "metadata.namespace".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        env("VARNISH_ADMIN_PORT", 6082),
        env("VARNISH_HTTP_ADDR", format!("localhost:{HTTP_PORT}")),
        env("VARNISH_LISTEN", format!(":{HTTP_PORT},http")),
        env("VARNISH_STORAGE", "malloc,256m"),
        env("VCL_PATH", "/etc/varnish/main.vcl"),
        env("ROUTING_CONFIG_PATH", "/etc/varnish/routing.json"),
        env("GHOST_CONFIG_PATH", vcl::DEFAULT_GHOST_CONFIG_PATH),
        env("WORK_DIR", VARNISH_RUN_DIR),
        env("HEALTH_ADDR", format!(":{HEALTH_PORT}")),
    ];
    let mut ports = vec![
        container_port("http", HTTP_PORT),
        container_port("health", HEALTH_PORT),
    ];
    let mut volume_mounts = vec![
        VolumeMount {
            name: VOLUME_VCL_CONFIG.to_string(),
            mount_path: "/etc/varnish".to_string(),
            read_only: Some(true),
            ..Default::default()
        },
        VolumeMount {
            name: VOLUME_VARNISH_RUN.to_string(),
            mount_path: VARNISH_RUN_DIR.to_string(),
            ..Default::default()
        },
    ];

    if has_tls {
        env_vars.push(env("VARNISH_TLS_LISTEN", format!(":{HTTPS_PORT},https")));
        env_vars.push(env("TLS_CERT_DIR", TLS_CERT_DIR));
        ports.push(container_port("https", HTTPS_PORT));
        volume_mounts.push(VolumeMount {
            name: VOLUME_TLS_CERTS.to_string(),
            mount_path: TLS_CERT_DIR.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }
    if !params.varnishd_extra_args.is_empty() {
        env_vars.push(env("VARNISHD_EXTRA_ARGS", params.varnishd_extra_args.join(";")));
    }
    volume_mounts.extend(params.extra_volume_mounts.iter().cloned());

    Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(settings.image.clone()),
        env: Some(env_vars),
        ports: Some(ports),
        volume_mounts: Some(volume_mounts),
        security_context: Some(SecurityContext {
            capabilities: Some(Capabilities {
                add: Some(vec!["IPC_LOCK".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }),
        lifecycle: Some(Lifecycle {
            pre_stop: Some(LifecycleHandler {
                http_get: Some(http_get("/drain", HEALTH_PORT)),
                ..Default::default()
            }),
            ..Default::default()
        }),
        readiness_probe: Some(Probe {
            http_get: Some(http_get("/health", HEALTH_PORT)),
            initial_delay_seconds: Some(5),
            period_seconds: Some(10),
            ..Default::default()
        }),
        liveness_probe: Some(Probe {
            tcp_socket: Some(TCPSocketAction {
                port: IntOrString::Int(HTTP_PORT),
                ..Default::default()
            }),
            initial_delay_seconds: Some(10),
            period_seconds: Some(15),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn http_get(path: &str, port: i32) -> HTTPGetAction {
    HTTPGetAction {
        path: Some(path.to_string()),
        port: IntOrString::Int(port),
        scheme: Some("HTTP".to_string()),
        ..Default::default()
    }
}

fn logging_sidecar(default_image: &str, logging: &VarnishLogging) -> Container {
    let mut args = vec![
        "-n".to_string(),
        format!("{VARNISH_RUN_DIR}/vsm"),
        "-t".to_string(),
        "off".to_string(),
    ];
    if logging.mode == "varnishncsa" && !logging.format.is_empty() {
        args.push("-F".to_string());
        args.push(logging.format.clone());
    }
    args.extend(logging.extra_args.iter().cloned());

    let image = if logging.image.is_empty() {
        default_image
    } else {
        &logging.image
    };
    let quantity = |q: &str| Quantity(q.to_string());

    Container {
        name: LOG_CONTAINER_NAME.to_string(),
        image: Some(image.to_string()),
        command: Some(vec![logging.mode.clone()]),
        args: Some(args),
        volume_mounts: Some(vec![VolumeMount {
            name: VOLUME_VARNISH_RUN.to_string(),
            mount_path: VARNISH_RUN_DIR.to_string(),
            read_only: Some(true),
            ..Default::default()
        }]),
        resources: Some(ResourceRequirements {
            requests: Some(
                [
                    ("cpu".to_string(), quantity("50m")),
                    ("memory".to_string(), quantity("32Mi")),
                ]
                .into_iter()
                .collect(),
            ),
            limits: Some(
                [("memory".to_string(), quantity("128Mi"))]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn volumes(gateway_name: &str, has_tls: bool, extra: &[Volume]) -> Vec<Volume> {
    let mut volumes = vec![
        Volume {
            name: VOLUME_VCL_CONFIG.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: config_map_name(gateway_name),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: VOLUME_VARNISH_RUN.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
    ];
    if has_tls {
        volumes.push(Volume {
            name: VOLUME_TLS_CERTS.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(tls_secret_name(gateway_name)),
                ..Default::default()
            }),
            ..Default::default()
        });
    }
    volumes.extend(extra.iter().cloned());
    volumes
}

/// Exposes one port per distinct listener port. HTTPS listeners are routed to
/// the TLS port when TLS is served.
fn service(gateway: &Gateway, has_tls: bool) -> Service {
    let labels = labels(gateway);
    let mut ports: Vec<ServicePort> = Vec::new();
    for listener in &gateway.spec.listeners {
        if ports.iter().any(|p| p.port == listener.port) {
            continue;
        }
        let target = if has_tls && listener.protocol == "HTTPS" {
            HTTPS_PORT
        } else {
            HTTP_PORT
        };
        ports.push(ServicePort {
            name: Some(listener.name.clone()),
            port: listener.port,
            target_port: Some(IntOrString::Int(target)),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        });
    }
    if ports.is_empty() {
        ports.push(ServicePort {
            name: Some("http".to_string()),
            port: 80,
            target_port: Some(IntOrString::Int(HTTP_PORT)),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        });
    }

    Service {
        metadata: metadata(gateway, gateway.name_any()),
        spec: Some(ServiceSpec {
            type_: Some("LoadBalancer".to_string()),
            selector: Some(labels),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

// === impl Child ===

impl Child {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigMap(_) => "ConfigMap",
            Self::Secret(_) => "Secret",
            Self::ServiceAccount(_) => "ServiceAccount",
            Self::ClusterRoleBinding(_) => "ClusterRoleBinding",
            Self::Deployment(_) => "Deployment",
            Self::Service(_) => "Service",
        }
    }

    /// Creates the child, or updates an existing copy according to its
    /// update rule. Namespaced children are owned by the gateway.
    pub async fn apply(self, client: &k8s::Client, gateway: &Gateway) -> Result<()> {
        let owner = gateway
            .controller_owner_ref(&())
            .ok_or(Error::MissingObjectKey("metadata.uid"))?;
        let namespace = gateway
            .namespace()
            .ok_or(Error::MissingObjectKey("metadata.namespace"))?;
        let owned = |mut meta: ObjectMeta| {
            meta.owner_references = Some(vec![owner.clone()]);
            meta
        };

        match self {
            Self::ConfigMap(mut desired) => {
                desired.metadata = owned(desired.metadata);
                let api = k8s::Api::namespaced(client.clone(), &namespace);
                create_or_update(api, desired, |mut existing, desired| {
                    let vcl = desired.data.as_ref()?.get(MAIN_VCL_KEY)?;
                    let data = existing.data.get_or_insert_with(Default::default);
                    if data.get(MAIN_VCL_KEY) == Some(vcl) {
                        return None;
                    }
                    data.insert(MAIN_VCL_KEY.to_string(), vcl.clone());
                    Some(existing)
                })
                .await
            }
            Self::Deployment(mut desired) => {
                desired.metadata = owned(desired.metadata);
                let api = k8s::Api::namespaced(client.clone(), &namespace);
                create_or_update(api, desired, |mut existing, desired| {
                    if !needs_rollout(&existing, desired) {
                        return None;
                    }
                    let desired = desired.spec.as_ref()?;
                    let spec = existing.spec.as_mut()?;
                    spec.template = desired.template.clone();
                    spec.strategy = desired.strategy.clone();
                    Some(existing)
                })
                .await
            }
            Self::Secret(mut desired) => {
                desired.metadata = owned(desired.metadata);
                create_only(k8s::Api::namespaced(client.clone(), &namespace), desired).await
            }
            Self::ServiceAccount(mut desired) => {
                desired.metadata = owned(desired.metadata);
                create_only(k8s::Api::namespaced(client.clone(), &namespace), desired).await
            }
            Self::Service(mut desired) => {
                desired.metadata = owned(desired.metadata);
                create_only(k8s::Api::namespaced(client.clone(), &namespace), desired).await
            }
            // Cluster-scoped objects cannot be owned by a namespaced gateway;
            // they are deleted explicitly when the gateway is finalized.
            Self::ClusterRoleBinding(desired) => {
                create_only(k8s::Api::all(client.clone()), desired).await
            }
        }
    }
}

/// Returns true if the first container's image or the infrastructure digest
/// differ.
pub fn needs_rollout(existing: &Deployment, desired: &Deployment) -> bool {
    fn image(d: &Deployment) -> Option<&str> {
        d.spec
            .as_ref()?
            .template
            .spec
            .as_ref()?
            .containers
            .first()?
            .image
            .as_deref()
    }
    fn digest(d: &Deployment) -> Option<&str> {
        d.spec
            .as_ref()?
            .template
            .metadata
            .as_ref()?
            .annotations
            .as_ref()?
            .get(infra_hash::ANNOTATION)
            .map(String::as_str)
    }

    if image(existing).is_none() || image(desired).is_none() {
        return false;
    }
    image(existing) != image(desired) || digest(existing) != digest(desired)
}

async fn create_only<K>(api: k8s::Api<K>, desired: K) -> Result<()>
where
    K: Resource<DynamicType = ()> + Clone + std::fmt::Debug + Serialize + DeserializeOwned,
{
    create_or_update(api, desired, |_, _| None).await
}

async fn create_or_update<K, F>(api: k8s::Api<K>, desired: K, update: F) -> Result<()>
where
    K: Resource<DynamicType = ()> + Clone + std::fmt::Debug + Serialize + DeserializeOwned,
    F: FnOnce(K, &K) -> Option<K>,
{
    let kind = K::kind(&());
    let name = desired
        .meta()
        .name
        .clone()
        .ok_or(Error::MissingObjectKey("metadata.name"))?;
    match api.get_opt(&name).await? {
        None => {
            api.create(&PostParams::default(), &desired).await?;
            tracing::info!(%kind, %name, "Created");
        }
        Some(existing) => {
            // The existing resourceVersion is kept so a concurrent write
            // fails the replace with a conflict.
            if let Some(updated) = update(existing, &desired) {
                api.replace(&name, &PostParams::default(), &updated).await?;
                tracing::info!(%kind, %name, "Updated");
            }
        }
    }
    Ok(())
}
