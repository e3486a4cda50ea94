//! Live lookups against the API server used while validating gateways and
//! routes.

use crate::{
    core::{
        attachment::NamespaceLabels,
        backend::ServiceLookup,
        grant::{self, CrossNamespaceRef, ReferenceAuthorizer},
        tls::{self, SecretLookup, TlsSecret},
    },
    k8s::{self, gateway::ReferenceGrant, Labels},
};
use anyhow::Result;

#[derive(Clone)]
pub struct ClusterLookup {
    client: k8s::Client,
}

impl ClusterLookup {
    pub fn new(client: k8s::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl NamespaceLabels for ClusterLookup {
    async fn namespace_labels(&self, namespace: &str) -> Result<Labels> {
        let api = k8s::Api::<k8s::Namespace>::all(self.client.clone());
        let ns = api.get(namespace).await?;
        Ok(ns.metadata.labels.into())
    }
}

#[async_trait::async_trait]
impl ReferenceAuthorizer for ClusterLookup {
    async fn is_allowed(&self, reference: &CrossNamespaceRef) -> Result<bool> {
        let api = k8s::Api::<ReferenceGrant>::namespaced(self.client.clone(), &reference.to_namespace);
        let grants = api.list(&Default::default()).await?;
        Ok(grant::any_grant_allows(&grants.items, reference))
    }
}

#[async_trait::async_trait]
impl SecretLookup for ClusterLookup {
    async fn tls_secret(&self, namespace: &str, name: &str) -> Result<Option<TlsSecret>> {
        let api = k8s::Api::<k8s::Secret>::namespaced(self.client.clone(), namespace);
        let Some(secret) = api.get_opt(name).await? else {
            return Ok(None);
        };
        let mut data = secret.data.unwrap_or_default();
        Ok(Some(TlsSecret {
            type_: secret.type_,
            cert: data.remove(tls::CERT_KEY).map(|k8s::ByteString(b)| b),
            key: data.remove(tls::PRIVATE_KEY_KEY).map(|k8s::ByteString(b)| b),
        }))
    }
}

#[async_trait::async_trait]
impl ServiceLookup for ClusterLookup {
    async fn service_exists(&self, namespace: &str, name: &str) -> Result<bool> {
        let api = k8s::Api::<k8s::Service>::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?.is_some())
    }
}
