//! # Reconciliation Logic
//!
//! Per-Certificate state machine and the driver entry point around it.
//!
//! | Status             | Observed                         | Result                    |
//! |--------------------|----------------------------------|---------------------------|
//! | unset / `Expired`  | record owned by another object   | `InvalidSpec`, no writes  |
//! | unset / `Expired`  | intact record we own             | adopt, `Valid`            |
//! | unset / `Expired`  | anything else                    | issue, create, `Valid`    |
//! | `Valid`            | record missing or past NotAfter  | `Expired`, requeue soon   |
//! | `Valid`            | record from another root         | `Expired`, requeue soon   |
//! | `Valid`            | record unexpired                 | drift condition only      |
//!
//! Detecting expiry and re-issuing happen in separate passes so that each
//! step is idempotent and retried on its own.

use super::drift::detect_drift;
use super::status::{
    expired_status, valid_status, with_subject_condition, ExpiryReason, SUBJECT_IN_SYNC_MESSAGE,
};
use super::types::{Reconciler, ReconcilerError, Requeue};
use crate::ca::{CertificateInfo, IssueRequest, IssuedCredentials};
use crate::config::ControllerConfig;
use crate::crd::{Certificate, CertificateState, CertificateStatus};
use crate::observability::metrics;
use crate::store::{CredentialRecord, StoreError};
use chrono::Utc;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Driver entry point
///
/// Bounds the invocation by the reconcile timeout; dropping the engine future
/// abandons in-flight store calls. Errors are mapped to requeues by the
/// runtime error policy.
pub async fn reconcile(
    certificate: Arc<Certificate>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let start = Instant::now();
    let name = certificate.name_any();
    let namespace = certificate
        .namespace()
        .unwrap_or_else(|| "default".to_string());
    let resource_key = format!("{namespace}/{name}");

    let span = tracing::info_span!(
        "reconcile",
        resource.name = name.as_str(),
        resource.namespace = namespace.as_str(),
        resource.kind = "Certificate"
    );

    metrics::increment_reconciliations();
    let timeout = ctx.config.reconcile_timeout();
    let outcome = tokio::time::timeout(timeout, reconcile_certificate(&certificate, &ctx))
        .instrument(span)
        .await;
    metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

    match outcome {
        Ok(Ok(requeue)) => {
            ctx.clear_errors(&resource_key);
            metrics::increment_requeues_total(requeue.as_str());
            Ok(requeue_action(requeue, &ctx.config))
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(ReconcilerError::Timeout(timeout)),
    }
}

/// Map the engine's requeue answer to a controller action
///
/// A no-op success still comes back after the resync interval when one is
/// configured, so expiry is noticed without a watch event.
#[must_use]
pub fn requeue_action(requeue: Requeue, config: &ControllerConfig) -> Action {
    match requeue {
        Requeue::None => config
            .resync_interval()
            .map_or_else(Action::await_change, Action::requeue),
        Requeue::Shortly => Action::requeue(config.short_requeue_duration()),
        Requeue::Later => Action::requeue(config.error_requeue_duration()),
    }
}

/// Run one pass of the state machine for a Certificate
pub async fn reconcile_certificate(
    certificate: &Certificate,
    ctx: &Reconciler,
) -> Result<Requeue, ReconcilerError> {
    validate(certificate)?;

    let state = certificate.status.as_ref().and_then(|s| s.state);
    debug!(
        state = state.map_or("unset", |s| s.as_str()),
        "Evaluating Certificate"
    );

    match state {
        None | Some(CertificateState::Expired) => ensure_issued(certificate, ctx).await,
        Some(CertificateState::Valid | CertificateState::InProgress) => {
            check_stored(certificate, ctx).await
        }
    }
}

fn validate(certificate: &Certificate) -> Result<(), ReconcilerError> {
    let spec = &certificate.spec;
    let required = [
        ("organization", spec.organization.as_str()),
        ("dnsName", spec.dns_name.as_str()),
        ("secretRef.name", spec.secret_ref.name.as_str()),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(ReconcilerError::InvalidSpec(format!(
                "{field} must not be empty"
            )));
        }
    }
    // Names go into the certificate verbatim and are compared exactly
    IssueRequest::from(spec)
        .validate_names()
        .map_err(|e| ReconcilerError::InvalidSpec(e.to_string()))
}

fn target(certificate: &Certificate) -> (String, &str) {
    (
        certificate
            .namespace()
            .unwrap_or_else(|| "default".to_string()),
        certificate.spec.secret_ref.name.as_str(),
    )
}

/// Unset or `Expired`: make sure a fresh record exists, then mark `Valid`
async fn ensure_issued(
    certificate: &Certificate,
    ctx: &Reconciler,
) -> Result<Requeue, ReconcilerError> {
    let (namespace, secret_name) = target(certificate);

    if let Some(existing) = ctx.store.get_record(&namespace, secret_name).await? {
        if !existing.owned_by(certificate) {
            return Err(ReconcilerError::InvalidSpec(format!(
                "secret '{namespace}/{secret_name}' already exists and is not owned by this Certificate"
            )));
        }

        if let Some(info) = adoptable(certificate, ctx, &existing) {
            info!(
                secret.name = secret_name,
                "Adopting existing secret with an unexpired certificate"
            );
            persist_status(certificate, ctx, valid_status(certificate, &info, Utc::now()))
                .await?;
            return Ok(Requeue::None);
        }

        info!(secret.name = secret_name, "Deleting stale secret before re-issuing");
        ctx.store.delete_record(&namespace, secret_name).await?;
    }

    let credentials = issue_credentials(certificate, ctx).await?;
    let record = CredentialRecord {
        namespace: namespace.clone(),
        name: secret_name.to_string(),
        key_pem: credentials.key_pem.into_bytes(),
        cert_pem: credentials.cert_pem.into_bytes(),
        owner_uid: certificate.uid(),
    };

    let info = match ctx.store.create_record(certificate, &record).await {
        Ok(()) => {
            metrics::increment_certificates_issued();
            CertificateInfo::from_pem(&record.cert_pem)?
        }
        Err(StoreError::AlreadyExists) => {
            // First writer wins; our material is discarded
            info!(
                secret.name = secret_name,
                "Secret created concurrently, keeping the existing one"
            );
            concurrent_winner(certificate, ctx, &namespace, secret_name).await?
        }
        Err(source) => {
            return Err(ReconcilerError::Persist {
                stage: "secret",
                source,
            })
        }
    };

    persist_status(certificate, ctx, valid_status(certificate, &info, Utc::now()))
        .await?;
    info!(
        secret.name = secret_name,
        serial = info.serial_hex.as_str(),
        "✅ Certificate issued, state is now Valid"
    );
    Ok(Requeue::None)
}

/// Inspect the record that beat our create
///
/// A winner we do not own, or one that vanished again, fails the pass as an
/// unpersisted secret so the next pass starts over.
async fn concurrent_winner(
    certificate: &Certificate,
    ctx: &Reconciler,
    namespace: &str,
    secret_name: &str,
) -> Result<CertificateInfo, ReconcilerError> {
    match ctx.store.get_record(namespace, secret_name).await? {
        Some(winner) if winner.owned_by(certificate) => {
            Ok(CertificateInfo::from_pem(&winner.cert_pem)?)
        }
        _ => Err(ReconcilerError::Persist {
            stage: "secret",
            source: StoreError::AlreadyExists,
        }),
    }
}

/// A record left by an earlier pass that can be kept as is
///
/// Requires a key, plus a decodable unexpired certificate signed by the
/// current root with a matching subject.
fn adoptable(
    certificate: &Certificate,
    ctx: &Reconciler,
    record: &CredentialRecord,
) -> Option<CertificateInfo> {
    if record.key_pem.is_empty() {
        return None;
    }
    let info = CertificateInfo::from_pem(&record.cert_pem).ok()?;
    if !matches!(ctx.authority.has_expired(&record.cert_pem), Ok(false)) {
        return None;
    }
    if !matches!(ctx.authority.is_issued_by_root(&record.cert_pem), Ok(true)) {
        return None;
    }
    detect_drift(&certificate.spec, &info)
        .is_empty()
        .then_some(info)
}

async fn issue_credentials(
    certificate: &Certificate,
    ctx: &Reconciler,
) -> Result<IssuedCredentials, ReconcilerError> {
    let authority = Arc::clone(&ctx.authority);
    let request = IssueRequest::from(&certificate.spec);

    let start = Instant::now();
    let credentials = tokio::task::spawn_blocking(move || authority.issue(&request))
        .await
        .map_err(|e| ReconcilerError::Task(e.to_string()))??;
    metrics::observe_issuance_duration(start.elapsed().as_secs_f64());

    Ok(credentials)
}

/// `Valid`: verify the stored record is still there, unexpired and trusted
async fn check_stored(
    certificate: &Certificate,
    ctx: &Reconciler,
) -> Result<Requeue, ReconcilerError> {
    let (namespace, secret_name) = target(certificate);

    let Some(record) = ctx.store.get_record(&namespace, secret_name).await? else {
        metrics::increment_certificates_expired();
        info!(
            secret.name = secret_name,
            "Secret not found, marking Certificate Expired"
        );
        persist_status(
            certificate,
            ctx,
            expired_status(certificate, ExpiryReason::SecretMissing, Utc::now()),
        )
        .await?;
        return Ok(Requeue::Shortly);
    };

    if ctx.authority.has_expired(&record.cert_pem)? {
        metrics::increment_certificates_expired();
        info!(
            secret.name = secret_name,
            "Certificate has expired, marking Certificate Expired"
        );
        persist_status(
            certificate,
            ctx,
            expired_status(certificate, ExpiryReason::CertificateExpired, Utc::now()),
        )
        .await?;
        return Ok(Requeue::Shortly);
    }

    if !ctx.authority.is_issued_by_root(&record.cert_pem)? {
        metrics::increment_certificates_expired();
        warn!(
            secret.name = secret_name,
            "Certificate was not issued by the current root CA, marking Certificate Expired"
        );
        persist_status(
            certificate,
            ctx,
            expired_status(certificate, ExpiryReason::UntrustedIssuer, Utc::now()),
        )
        .await?;
        return Ok(Requeue::Shortly);
    }

    let info = CertificateInfo::from_pem(&record.cert_pem)?;
    let drift = detect_drift(&certificate.spec, &info);
    let in_sync = drift.is_empty();
    let message = if in_sync {
        SUBJECT_IN_SYNC_MESSAGE.to_string()
    } else {
        drift.join("; ")
    };

    let current = certificate.status.clone().unwrap_or_default();
    let mut updated = with_subject_condition(current.clone(), in_sync, message, Utc::now());
    updated.observed_generation = certificate.metadata.generation;

    if updated != current {
        if !in_sync {
            metrics::increment_subject_drift();
            warn!(
                secret.name = secret_name,
                drift = ?drift,
                "Stored certificate no longer matches the spec; delete the secret to re-issue"
            );
        }
        persist_status(certificate, ctx, updated).await?;
    }

    Ok(Requeue::None)
}

async fn persist_status(
    certificate: &Certificate,
    ctx: &Reconciler,
    status: CertificateStatus,
) -> Result<(), ReconcilerError> {
    ctx.store
        .update_status(certificate, &status)
        .await
        .map_err(|source| ReconcilerError::Persist {
            stage: "status",
            source,
        })
}
