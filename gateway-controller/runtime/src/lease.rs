use crate::{
    core::{LABEL_MANAGED_BY, MANAGED_BY},
    k8s::{self, ObjectMeta},
};
use anyhow::Result;
use k8s_openapi::api::coordination::v1 as coordv1;
use kube::api::PatchParams;
use std::sync::Arc;
use tokio::{sync::watch, time};

const LEASE_DURATION: time::Duration = time::Duration::from_secs(30);
const RENEW_GRACE_PERIOD: time::Duration = time::Duration::from_secs(1);

pub type Claims = watch::Receiver<Arc<kubert::lease::Claim>>;

pub async fn init<T>(
    runtime: &kubert::Runtime<T>,
    ns: &str,
    lease_name: &str,
    hostname: &str,
) -> Result<Claims> {
    let lease = coordv1::Lease {
        metadata: ObjectMeta {
            name: Some(lease_name.to_string()),
            namespace: Some(ns.to_string()),
            // Specifying a resource version of "0" means that we will
            // only create the Lease if it does not already exist.
            resource_version: Some("0".to_string()),
            labels: Some(
                [(LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string())]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        },
        spec: None,
    };
    let api = k8s::Api::<coordv1::Lease>::namespaced(runtime.client(), ns);
    match api
        .patch(
            lease_name,
            &PatchParams {
                field_manager: Some(MANAGED_BY.to_string()),
                ..Default::default()
            },
            &kube::api::Patch::Apply(lease),
        )
        .await
    {
        Ok(lease) => tracing::info!(?lease, "Created Lease resource"),
        Err(k8s::Error::Api(_)) => tracing::debug!("Lease already exists, no need to create it"),
        Err(error) => {
            return Err(error.into());
        }
    };

    let params = kubert::lease::ClaimParams {
        lease_duration: LEASE_DURATION,
        renew_grace_period: RENEW_GRACE_PERIOD,
    };
    let (claims, _task) = kubert::lease::LeaseManager::init(api, lease_name)
        .await?
        .spawn(hostname, params)
        .await?;
    Ok(claims)
}

/// Waits until the lease is held by this process.
pub async fn acquired(claims: &mut Claims, hostname: &str) -> Result<()> {
    while !claims.borrow_and_update().is_current_for(hostname) {
        claims.changed().await?;
    }
    Ok(())
}

/// Completes once the lease is no longer held by this process.
pub async fn lost(mut claims: Claims, hostname: String) {
    loop {
        if !claims.borrow_and_update().is_current_for(&hostname) {
            return;
        }
        if claims.changed().await.is_err() {
            return;
        }
    }
}
