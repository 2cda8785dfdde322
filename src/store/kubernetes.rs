//! # Kubernetes Store
//!
//! Credential records as `kubernetes.io/tls` Secrets, status through the
//! Certificate status subresource.

use super::{CredentialRecord, CredentialStore, StoreError};
use crate::constants::{
    LAST_APPLIED_ANNOTATION, MANAGED_BY_LABEL, MANAGER_NAME, TLS_CERT, TLS_KEY, TLS_SECRET_TYPE,
};
use crate::crd::{Certificate, CertificateStatus};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Store backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeCredentialStore {
    client: Client,
}

impl std::fmt::Debug for KubeCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCredentialStore").finish_non_exhaustive()
    }
}

impl KubeCredentialStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl CredentialStore for KubeCredentialStore {
    async fn get_record(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        match self.secrets(namespace).get(name).await {
            Ok(secret) => Ok(Some(record_from_secret(&secret))),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_record(
        &self,
        owner: &Certificate,
        record: &CredentialRecord,
    ) -> Result<(), StoreError> {
        let secret = build_secret(owner, record);
        self.secrets(&record.namespace)
            .create(&PostParams::default(), &secret)
            .await?;
        info!(
            secret.name = record.name.as_str(),
            secret.namespace = record.namespace.as_str(),
            "Created TLS secret"
        );
        Ok(())
    }

    async fn delete_record(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        match self
            .secrets(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => {
                debug!(
                    secret.name = name,
                    secret.namespace = namespace,
                    "Deleted TLS secret"
                );
                Ok(())
            }
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_status(
        &self,
        certificate: &Certificate,
        status: &CertificateStatus,
    ) -> Result<(), StoreError> {
        let namespace = certificate.namespace().unwrap_or_else(|| "default".to_string());
        let api: Api<Certificate> = Api::namespaced(self.client.clone(), &namespace);

        let patch = serde_json::json!({ "status": status });
        api.patch_status(
            &certificate.name_any(),
            &PatchParams::default(),
            &Patch::Merge(patch),
        )
        .await?;
        Ok(())
    }
}

/// Build the immutable TLS Secret for a record
///
/// Labels and annotations are inherited from the owner, except the
/// last-applied annotation, and the Secret is controller-owned by the
/// Certificate so deleting the Certificate removes it.
#[must_use]
pub fn build_secret(owner: &Certificate, record: &CredentialRecord) -> Secret {
    let mut labels = owner.labels().clone();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGER_NAME.to_string());

    let annotations: BTreeMap<String, String> = owner
        .annotations()
        .iter()
        .filter(|(k, _)| k.as_str() != LAST_APPLIED_ANNOTATION)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut data = BTreeMap::new();
    data.insert(TLS_KEY.to_string(), ByteString(record.key_pem.clone()));
    data.insert(TLS_CERT.to_string(), ByteString(record.cert_pem.clone()));

    Secret {
        metadata: ObjectMeta {
            name: Some(record.name.clone()),
            namespace: Some(record.namespace.clone()),
            labels: Some(labels),
            annotations: (!annotations.is_empty()).then_some(annotations),
            owner_references: owner.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        immutable: Some(true),
        type_: Some(TLS_SECRET_TYPE.to_string()),
        data: Some(data),
        ..Default::default()
    }
}

/// Read a record out of a Secret; missing keys become empty values
///
/// Ownership comes from the controller owner reference alone. The managed-by
/// label is shared by every Secret this controller writes, including the root.
#[must_use]
pub fn record_from_secret(secret: &Secret) -> CredentialRecord {
    let value = |key: &str| {
        secret
            .data
            .as_ref()
            .and_then(|data| data.get(key))
            .map(|v| v.0.clone())
            .unwrap_or_default()
    };

    CredentialRecord {
        namespace: secret.namespace().unwrap_or_default(),
        name: secret.name_any(),
        key_pem: value(TLS_KEY),
        cert_pem: value(TLS_CERT),
        owner_uid: secret
            .owner_references()
            .iter()
            .find(|r| r.controller == Some(true) && r.kind == "Certificate")
            .map(|r| r.uid.clone()),
    }
}
