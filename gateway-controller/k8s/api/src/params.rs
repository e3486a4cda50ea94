use k8s_openapi::api::core::v1::{Container, Volume, VolumeMount};

pub const GROUP: &str = "gateway.varnish-software.com";
pub const KIND: &str = "GatewayClassParameters";

/// The ConfigMap key read for user VCL when a reference omits one.
pub const DEFAULT_USER_VCL_KEY: &str = "user.vcl";

/// GatewayClassParameters carries the Varnish-specific configuration shared
/// by every Gateway of a class. It is referenced from a GatewayClass'
/// `parametersRef`.
#[derive(Clone, Debug, Default, kube::CustomResource, serde::Deserialize, serde::Serialize)]
#[kube(
    schema = "disabled",
    group = "gateway.varnish-software.com",
    version = "v1alpha1",
    kind = "GatewayClassParameters"
)]
#[serde(rename_all = "camelCase")]
pub struct GatewayClassParametersSpec {
    /// References a ConfigMap holding VCL that is appended to the generated
    /// router VCL.
    #[serde(
        default,
        rename = "userVCLConfigMapRef",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_vcl_config_map_ref: Option<ConfigMapReference>,

    /// Additional command-line arguments passed to varnishd, e.g.
    /// `["-p", "thread_pools=4"]`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub varnishd_extra_args: Vec<String>,

    /// Configures a varnishlog or varnishncsa sidecar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<VarnishLogging>,

    /// Additional volumes added to the gateway pod.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_volumes: Vec<Volume>,

    /// Additional volume mounts added to the varnish container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_volume_mounts: Vec<VolumeMount>,

    /// Init containers run before the varnish container starts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_init_containers: Vec<Container>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VarnishLogging {
    /// Either `varnishlog` or `varnishncsa`.
    pub mode: String,

    /// Output format passed to varnishncsa with `-F`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,

    /// Overrides the image used by the logging sidecar. Defaults to the
    /// gateway image.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct ConfigMapReference {
    pub name: String,
    pub namespace: String,

    /// Defaults to `user.vcl`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl ConfigMapReference {
    pub fn key(&self) -> &str {
        self.key
            .as_deref()
            .filter(|k| !k.is_empty())
            .unwrap_or(DEFAULT_USER_VCL_KEY)
    }
}
