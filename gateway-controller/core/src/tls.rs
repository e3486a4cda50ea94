//! Validation and collection of the TLS certificates referenced by a
//! gateway's HTTPS listeners.
//!
//! Validation is strict and reports the first problem it finds so that it
//! can be surfaced on the listener's `ResolvedRefs` condition. Collection is
//! lenient: a reference that cannot be served is logged and skipped so that
//! one bad certificate does not take down the other listeners.

use crate::{
    attachment::{CertificateRef, Gateway, Listener},
    grant::{CrossNamespaceRef, ReferenceAuthorizer},
};
use anyhow::Result;
use std::collections::BTreeMap;

pub const SECRET_TYPE_TLS: &str = "kubernetes.io/tls";
pub const SECRET_KIND: &str = "Secret";
pub const CERT_KEY: &str = "tls.crt";
pub const PRIVATE_KEY_KEY: &str = "tls.key";

/// Reads TLS secrets.
#[async_trait::async_trait]
pub trait SecretLookup {
    /// Returns `None` if the secret does not exist.
    async fn tls_secret(&self, namespace: &str, name: &str) -> Result<Option<TlsSecret>>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsSecret {
    pub type_: Option<String>,
    pub cert: Option<Vec<u8>>,
    pub key: Option<Vec<u8>>,
}

/// A listener whose certificate references are all usable.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Resolved {
    /// The listener does not terminate TLS, so there is nothing to resolve.
    NotTerminated,
    Certificates,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidCertificateRef {
    #[error("HTTPS listener has no certificateRefs")]
    NoCertificateRefs,

    #[error("Unsupported certificateRef group: {0}")]
    UnsupportedGroup(String),

    #[error("Unsupported certificateRef kind: {0}")]
    UnsupportedKind(String),

    #[error("Cross-namespace certificateRef {namespace}/{name} not allowed by any ReferenceGrant")]
    NotPermitted { namespace: String, name: String },

    #[error("Failed to validate cross-namespace certificateRef {namespace}/{name}: {error}")]
    GrantLookup {
        namespace: String,
        name: String,
        error: String,
    },

    #[error("Secret {namespace}/{name} not found")]
    SecretNotFound { namespace: String, name: String },

    #[error("Failed to get Secret {namespace}/{name}: {error}")]
    SecretLookup {
        namespace: String,
        name: String,
        error: String,
    },

    #[error("Secret {namespace}/{name} has type {type_}, expected kubernetes.io/tls")]
    WrongType {
        namespace: String,
        name: String,
        type_: String,
    },

    #[error("Secret {namespace}/{name} missing tls.crt or tls.key data")]
    MissingData { namespace: String, name: String },

    #[error("Secret {namespace}/{name} tls.crt does not contain valid PEM data")]
    InvalidPem { namespace: String, name: String },
}

// === impl Resolved ===

impl Resolved {
    pub fn message(&self) -> &'static str {
        match self {
            Resolved::NotTerminated => "Refs resolved",
            Resolved::Certificates => "All TLS certificate references resolved",
        }
    }
}

// === impl InvalidCertificateRef ===

impl InvalidCertificateRef {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotPermitted { .. } | Self::GrantLookup { .. } => "RefNotPermitted",
            _ => "InvalidCertificateRef",
        }
    }
}

/// Validates every certificate reference of a listener, stopping at the
/// first one that cannot be used.
pub async fn validate_listener<S, A>(
    gateway: &Gateway,
    listener: &Listener,
    secrets: &S,
    grants: &A,
) -> Result<Resolved, InvalidCertificateRef>
where
    S: SecretLookup + Sync + ?Sized,
    A: ReferenceAuthorizer + Sync + ?Sized,
{
    let tls = match listener.terminated_tls() {
        Some(tls) => tls,
        None => return Ok(Resolved::NotTerminated),
    };
    if tls.certificate_refs.is_empty() {
        return Err(InvalidCertificateRef::NoCertificateRefs);
    }

    for cert_ref in &tls.certificate_refs {
        check_group_kind(cert_ref)?;

        if cert_ref.cross_namespace {
            let allowed = grants
                .is_allowed(&CrossNamespaceRef::gateway_to_secret(
                    &gateway.namespace,
                    &cert_ref.namespace,
                    &cert_ref.name,
                ))
                .await;
            match allowed {
                Ok(true) => {}
                Ok(false) => {
                    return Err(InvalidCertificateRef::NotPermitted {
                        namespace: cert_ref.namespace.clone(),
                        name: cert_ref.name.clone(),
                    })
                }
                Err(error) => {
                    tracing::error!(
                        secret.namespace = %cert_ref.namespace,
                        secret.name = %cert_ref.name,
                        %error,
                        "Failed to check ReferenceGrants",
                    );
                    return Err(InvalidCertificateRef::GrantLookup {
                        namespace: cert_ref.namespace.clone(),
                        name: cert_ref.name.clone(),
                        error: error.to_string(),
                    });
                }
            }
        }

        let secret = secrets
            .tls_secret(&cert_ref.namespace, &cert_ref.name)
            .await
            .map_err(|error| InvalidCertificateRef::SecretLookup {
                namespace: cert_ref.namespace.clone(),
                name: cert_ref.name.clone(),
                error: error.to_string(),
            })?
            .ok_or_else(|| InvalidCertificateRef::SecretNotFound {
                namespace: cert_ref.namespace.clone(),
                name: cert_ref.name.clone(),
            })?;
        check_secret(cert_ref, &secret)?;
    }

    Ok(Resolved::Certificates)
}

fn check_group_kind(cert_ref: &CertificateRef) -> Result<(), InvalidCertificateRef> {
    if let Some(group) = cert_ref.group.as_ref().filter(|g| !g.is_empty()) {
        return Err(InvalidCertificateRef::UnsupportedGroup(group.clone()));
    }
    if let Some(kind) = cert_ref.kind.as_ref().filter(|k| *k != SECRET_KIND) {
        return Err(InvalidCertificateRef::UnsupportedKind(kind.clone()));
    }
    Ok(())
}

fn check_secret(cert_ref: &CertificateRef, secret: &TlsSecret) -> Result<(), InvalidCertificateRef> {
    let type_ = secret.type_.as_deref().unwrap_or_default();
    if type_ != SECRET_TYPE_TLS {
        return Err(InvalidCertificateRef::WrongType {
            namespace: cert_ref.namespace.clone(),
            name: cert_ref.name.clone(),
            type_: type_.to_string(),
        });
    }

    let (cert, _) = match key_pair(secret) {
        Some(pair) => pair,
        None => {
            return Err(InvalidCertificateRef::MissingData {
                namespace: cert_ref.namespace.clone(),
                name: cert_ref.name.clone(),
            })
        }
    };
    if !is_pem(cert) {
        return Err(InvalidCertificateRef::InvalidPem {
            namespace: cert_ref.namespace.clone(),
            name: cert_ref.name.clone(),
        });
    }
    Ok(())
}

fn key_pair(secret: &TlsSecret) -> Option<(&[u8], &[u8])> {
    let cert = secret.cert.as_deref().filter(|c| !c.is_empty())?;
    let key = secret.key.as_deref().filter(|k| !k.is_empty())?;
    Some((cert, key))
}

/// Collects a combined certificate and key bundle for each usable
/// certificate reference of the gateway's terminating HTTPS listeners.
///
/// Bundles are keyed by `{name}.pem`, or `{namespace}-{name}.pem` for
/// secrets in another namespace.
pub async fn collect_bundles<S, A>(
    gateway: &Gateway,
    secrets: &S,
    grants: &A,
) -> BTreeMap<String, Vec<u8>>
where
    S: SecretLookup + Sync + ?Sized,
    A: ReferenceAuthorizer + Sync + ?Sized,
{
    let mut bundles = BTreeMap::new();

    let cert_refs = gateway
        .listeners
        .iter()
        .filter_map(Listener::terminated_tls)
        .flat_map(|tls| tls.certificate_refs.iter());
    for cert_ref in cert_refs {
        if check_group_kind(cert_ref).is_err() {
            continue;
        }

        if cert_ref.cross_namespace {
            let allowed = grants
                .is_allowed(&CrossNamespaceRef::gateway_to_secret(
                    &gateway.namespace,
                    &cert_ref.namespace,
                    &cert_ref.name,
                ))
                .await;
            match allowed {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(
                        secret.namespace = %cert_ref.namespace,
                        secret.name = %cert_ref.name,
                        "Cross-namespace certificate reference is not permitted by any ReferenceGrant; skipping",
                    );
                    continue;
                }
                Err(error) => {
                    tracing::error!(
                        secret.namespace = %cert_ref.namespace,
                        secret.name = %cert_ref.name,
                        %error,
                        "Failed to check ReferenceGrants",
                    );
                    continue;
                }
            }
        }

        let bundle_key = bundle_key(cert_ref);
        if bundles.contains_key(&bundle_key) {
            continue;
        }

        let secret = match secrets.tls_secret(&cert_ref.namespace, &cert_ref.name).await {
            Ok(Some(secret)) => secret,
            Ok(None) => {
                tracing::warn!(
                    secret.namespace = %cert_ref.namespace,
                    secret.name = %cert_ref.name,
                    "TLS secret not found",
                );
                continue;
            }
            Err(error) => {
                tracing::error!(
                    secret.namespace = %cert_ref.namespace,
                    secret.name = %cert_ref.name,
                    %error,
                    "Failed to get TLS secret",
                );
                continue;
            }
        };

        if secret.type_.as_deref() != Some(SECRET_TYPE_TLS) {
            tracing::warn!(
                secret.namespace = %cert_ref.namespace,
                secret.name = %cert_ref.name,
                secret_type = ?secret.type_,
                "TLS secret has the wrong type",
            );
            continue;
        }
        let (cert, key) = match key_pair(&secret) {
            Some(pair) => pair,
            None => {
                tracing::warn!(
                    secret.namespace = %cert_ref.namespace,
                    secret.name = %cert_ref.name,
                    "TLS secret is missing tls.crt or tls.key",
                );
                continue;
            }
        };

        bundles.insert(bundle_key, bundle(cert, key));
    }

    bundles
}

fn bundle_key(cert_ref: &CertificateRef) -> String {
    if cert_ref.cross_namespace {
        format!("{}-{}.pem", cert_ref.namespace, cert_ref.name)
    } else {
        format!("{}.pem", cert_ref.name)
    }
}

/// The certificate followed by the key, separated by a newline if the
/// certificate does not already end with one.
fn bundle(cert: &[u8], key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(cert.len() + key.len() + 1);
    out.extend_from_slice(cert);
    if !cert.ends_with(b"\n") {
        out.push(b'\n');
    }
    out.extend_from_slice(key);
    out
}

/// Returns true if the data contains at least one well-formed PEM block.
/// Text outside of the blocks is ignored.
pub fn is_pem(data: &[u8]) -> bool {
    pem::parse_many(data).is_ok_and(|blocks| !blocks.is_empty())
}

#[cfg(test)]
mod tests;
