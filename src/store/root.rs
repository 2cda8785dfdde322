//! # Root CA Persistence
//!
//! Keeps the root key pair in a Secret in the controller namespace so a
//! restart does not orphan every certificate issued before it.

use super::kubernetes::record_from_secret;
use crate::ca::{CaError, CertificateAuthority};
use crate::config::ControllerConfig;
use crate::constants::{MANAGED_BY_LABEL, MANAGER_NAME, TLS_CERT, TLS_KEY, TLS_SECRET_TYPE};
use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Load the persisted root CA, or bootstrap and persist a new one
///
/// An expired persisted root is replaced. A root that cannot be decoded is a
/// fatal error: replacing it silently would break trust for every issued leaf.
pub async fn load_or_bootstrap_authority(
    client: &Client,
    config: &ControllerConfig,
) -> Result<CertificateAuthority> {
    let days = config.default_validity_days;

    if !config.ca_persist {
        info!("Root CA persistence disabled (CA_PERSIST=false), bootstrapping ephemeral root");
        return CertificateAuthority::bootstrap(days).context("Failed to bootstrap root CA");
    }

    let namespace = config.controller_namespace.as_str();
    let name = config.ca_secret_name.as_str();
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);

    if let Some(secret) = secrets
        .get_opt(name)
        .await
        .with_context(|| format!("Failed to read root CA secret '{namespace}/{name}'"))?
    {
        let authority = authority_from_secret(&secret, days).with_context(|| {
            format!("Root CA secret '{namespace}/{name}' is unusable; delete it to bootstrap a new root")
        })?;

        if !root_expired(&authority)? {
            info!(
                secret.name = name,
                secret.namespace = namespace,
                "✅ Loaded persisted root CA"
            );
            return Ok(authority);
        }

        warn!(
            secret.name = name,
            secret.namespace = namespace,
            "⚠️  Persisted root CA has expired, replacing it; previously issued certificates will no longer chain to the new root"
        );
        match secrets.delete(name, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => {}
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to delete expired root CA secret '{namespace}/{name}'")
                })
            }
        }
    }

    let authority = CertificateAuthority::bootstrap(days).context("Failed to bootstrap root CA")?;
    match secrets
        .create(&PostParams::default(), &root_secret(&authority, namespace, name))
        .await
    {
        Ok(_) => {
            info!(
                secret.name = name,
                secret.namespace = namespace,
                "✅ Persisted new root CA"
            );
            Ok(authority)
        }
        Err(kube::Error::Api(api_err)) if api_err.code == 409 => {
            // Another replica won the race; use its root
            info!(
                secret.name = name,
                secret.namespace = namespace,
                "Root CA secret created concurrently, loading it"
            );
            let secret = secrets
                .get(name)
                .await
                .with_context(|| format!("Failed to read root CA secret '{namespace}/{name}'"))?;
            authority_from_secret(&secret, days)
                .with_context(|| format!("Root CA secret '{namespace}/{name}' is unusable"))
        }
        Err(e) => Err(e)
            .with_context(|| format!("Failed to persist root CA secret '{namespace}/{name}'")),
    }
}

/// Build the Secret that persists a root CA
#[must_use]
pub fn root_secret(authority: &CertificateAuthority, namespace: &str, name: &str) -> Secret {
    let mut data = BTreeMap::new();
    data.insert(
        TLS_KEY.to_string(),
        ByteString(authority.root_key_pem().as_bytes().to_vec()),
    );
    data.insert(
        TLS_CERT.to_string(),
        ByteString(authority.root_certificate_pem().as_bytes().to_vec()),
    );

    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                MANAGED_BY_LABEL.to_string(),
                MANAGER_NAME.to_string(),
            )])),
            ..Default::default()
        },
        immutable: Some(true),
        type_: Some(TLS_SECRET_TYPE.to_string()),
        data: Some(data),
        ..Default::default()
    }
}

/// Reconstruct a root CA from its Secret
pub fn authority_from_secret(
    secret: &Secret,
    default_validity_days: i64,
) -> Result<CertificateAuthority, CaError> {
    let record = record_from_secret(secret);
    let key_pem = String::from_utf8(record.key_pem)
        .map_err(|e| CaError::DecodeFailure(format!("root key is not UTF-8: {e}")))?;
    let cert_pem = String::from_utf8(record.cert_pem)
        .map_err(|e| CaError::DecodeFailure(format!("root certificate is not UTF-8: {e}")))?;
    CertificateAuthority::from_pem(&key_pem, &cert_pem, default_validity_days)
}

fn root_expired(authority: &CertificateAuthority) -> Result<bool> {
    let info = authority.root_info()?;
    Ok(info.is_expired_at(chrono::Utc::now().timestamp()))
}
