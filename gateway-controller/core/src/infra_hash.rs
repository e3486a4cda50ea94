use sha2::{Digest, Sha256};
use varnish_gateway_controller_k8s_api::{
    api::core::v1::{Container, Volume, VolumeMount},
    params::VarnishLogging,
};

/// The pod template annotation holding the infrastructure digest.
pub const ANNOTATION: &str = "varnish.io/infra-hash";

/// Configuration that requires the gateway pods to be restarted when it
/// changes.
///
/// Anything not represented here (VCL, routing, TLS certificate contents) is
/// hot-reloaded by the pods and must not influence the digest.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InfraConfig {
    pub image: String,
    pub varnishd_extra_args: Vec<String>,
    pub logging: Option<VarnishLogging>,
    pub image_pull_secrets: Vec<String>,
    pub has_tls: bool,
    pub extra_volumes: Vec<Volume>,
    pub extra_volume_mounts: Vec<VolumeMount>,
    pub extra_init_containers: Vec<Container>,
}

impl InfraConfig {
    /// Computes a hex-encoded SHA-256 digest of the configuration.
    ///
    /// Argument and secret lists are sorted first so the digest does not
    /// depend on the order in which they were read. Fields are separated by
    /// NUL bytes so that adjacent values cannot be confused.
    pub fn digest(&self) -> Result<String, serde_json::Error> {
        let mut h = Sha256::new();

        h.update(self.image.as_bytes());
        h.update([0u8]);

        h.update(sorted_join(&self.varnishd_extra_args));
        h.update([0u8]);

        if let Some(logging) = &self.logging {
            for field in [&logging.mode, &logging.format, &logging.image] {
                h.update(field.as_bytes());
                h.update([0u8]);
            }
            h.update(sorted_join(&logging.extra_args));
            h.update([0u8]);
        }

        h.update(sorted_join(&self.image_pull_secrets));
        h.update([0u8]);

        if self.has_tls {
            h.update(b"tls");
        }
        h.update([0u8]);

        if !self.extra_volumes.is_empty() {
            h.update(serde_json::to_vec(&self.extra_volumes)?);
        }
        h.update([0u8]);
        if !self.extra_volume_mounts.is_empty() {
            h.update(serde_json::to_vec(&self.extra_volume_mounts)?);
        }
        h.update([0u8]);
        if !self.extra_init_containers.is_empty() {
            h.update(serde_json::to_vec(&self.extra_init_containers)?);
        }

        Ok(hex::encode(h.finalize()))
    }
}

fn sorted_join(values: &[String]) -> Vec<u8> {
    let mut sorted = values.iter().map(String::as_str).collect::<Vec<_>>();
    sorted.sort_unstable();
    sorted.join("\0").into_bytes()
}
