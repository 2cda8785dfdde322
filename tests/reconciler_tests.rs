//! # Reconciler Tests
//!
//! Drives the Certificate state machine against the in-memory store and the
//! real certificate authority.

mod common;

use certificate_manager::ca::{CaError, CertAuthority, CertificateAuthority, CertificateInfo};
use certificate_manager::config::ControllerConfig;
use certificate_manager::controller::reconciler::{
    reconcile, reconcile_certificate, ReconcilerError, Requeue,
};
use certificate_manager::crd::CertificateState;
use certificate_manager::runtime::error_policy::handle_reconciliation_error;
use certificate_manager::store::CredentialRecord;
use common::{
    certificate, harness, harness_with_config, managed_record, record_signed_by, NAMESPACE,
};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn state_of(status: Option<&certificate_manager::crd::CertificateStatus>) -> Option<CertificateState> {
    status.and_then(|s| s.state)
}

fn condition_status(
    status: &certificate_manager::crd::CertificateStatus,
    r#type: &str,
) -> Option<String> {
    status.condition(r#type).map(|c| c.status.clone())
}

#[tokio::test]
async fn test_unset_status_converges_to_valid_with_one_record() {
    let h = harness();
    let cert = certificate("api", "api-tls");

    let requeue = reconcile_certificate(&cert, &h.reconciler)
        .await
        .expect("reconcile should succeed");
    assert_eq!(requeue, Requeue::None);

    assert_eq!(h.store.record_count(), 1);
    let record = h.store.record(NAMESPACE, "api-tls").expect("record created");
    assert_eq!(record.owner_uid, cert.uid());
    assert!(!record.key_pem.is_empty());

    let info = CertificateInfo::from_pem(&record.cert_pem).expect("certificate decodes");
    assert_eq!(info.common_name, "api.k8c.io");
    assert_eq!(info.organizations, vec!["k8c".to_string()]);
    assert_eq!(
        info.sorted_dns_names(),
        vec!["api.internal".to_string(), "api.k8c.io".to_string()]
    );
    assert!(!info.is_ca);

    let status = h.store.status(&cert).expect("status written");
    assert_eq!(status.state, Some(CertificateState::Valid));
    assert_eq!(status.serial_number.as_deref(), Some(info.serial_hex.as_str()));
    assert_eq!(condition_status(&status, "Ready").as_deref(), Some("True"));
    assert_eq!(h.authority.issued(), 1);
}

#[tokio::test]
async fn test_valid_certificate_is_idempotent() {
    let h = harness();
    let cert = certificate("api", "api-tls");
    reconcile_certificate(&cert, &h.reconciler)
        .await
        .expect("first pass");

    let writes = h.store.writes();
    let serial = h.store.status(&cert).and_then(|s| s.serial_number);
    for _ in 0..3 {
        let cert = h.store.refresh(&cert);
        let requeue = reconcile_certificate(&cert, &h.reconciler)
            .await
            .expect("no-op pass");
        assert_eq!(requeue, Requeue::None);
    }

    assert_eq!(h.store.writes(), writes, "no-op passes must not write");
    assert_eq!(h.store.record_count(), 1);
    assert_eq!(h.authority.issued(), 1);
    assert_eq!(h.store.status(&cert).and_then(|s| s.serial_number), serial);
}

#[tokio::test]
async fn test_deleted_secret_self_heals_in_two_passes() {
    let h = harness();
    let cert = certificate("api", "api-tls");
    reconcile_certificate(&cert, &h.reconciler)
        .await
        .expect("first pass");

    h.store.remove_record(NAMESPACE, "api-tls");

    let cert = h.store.refresh(&cert);
    let requeue = reconcile_certificate(&cert, &h.reconciler)
        .await
        .expect("detect pass");
    assert_eq!(requeue, Requeue::Shortly);
    let status = h.store.status(&cert).expect("status");
    assert_eq!(status.state, Some(CertificateState::Expired));
    assert_eq!(
        status.condition("Ready").and_then(|c| c.reason.clone()).as_deref(),
        Some("SecretMissing")
    );
    assert_eq!(h.store.record_count(), 0, "detection must not issue");

    let cert = h.store.refresh(&cert);
    let requeue = reconcile_certificate(&cert, &h.reconciler)
        .await
        .expect("re-issue pass");
    assert_eq!(requeue, Requeue::None);
    assert_eq!(
        state_of(h.store.status(&cert).as_ref()),
        Some(CertificateState::Valid)
    );
    assert_eq!(h.store.record_count(), 1);
    assert_eq!(h.authority.issued(), 2);
}

#[tokio::test]
async fn test_expired_certificate_is_replaced() {
    let h = harness();
    let cert = certificate("api", "api-tls");
    reconcile_certificate(&cert, &h.reconciler)
        .await
        .expect("first pass");
    let first = h.store.record(NAMESPACE, "api-tls").expect("record");

    h.authority.force_expired.store(true, Ordering::SeqCst);
    let cert = h.store.refresh(&cert);
    assert_eq!(
        reconcile_certificate(&cert, &h.reconciler).await.expect("detect"),
        Requeue::Shortly
    );
    let status = h.store.status(&cert).expect("status");
    assert_eq!(status.state, Some(CertificateState::Expired));
    assert_eq!(
        status.condition("Ready").and_then(|c| c.reason.clone()).as_deref(),
        Some("CertificateExpired")
    );
    assert_eq!(h.store.record_count(), 1, "expired record stays until re-issue");

    // The expired record is not adoptable and gets replaced
    let cert = h.store.refresh(&cert);
    assert_eq!(
        reconcile_certificate(&cert, &h.reconciler).await.expect("re-issue"),
        Requeue::None
    );
    h.authority.force_expired.store(false, Ordering::SeqCst);

    let second = h.store.record(NAMESPACE, "api-tls").expect("record");
    assert_ne!(first.cert_pem, second.cert_pem);
    assert_ne!(first.key_pem, second.key_pem);
    assert_eq!(h.authority.issued(), 2);
    assert_eq!(
        state_of(h.store.status(&cert).as_ref()),
        Some(CertificateState::Valid)
    );
}

#[tokio::test]
async fn test_lost_create_race_is_success() {
    let h = harness();
    let cert = certificate("api", "api-tls");
    let winner = managed_record(&h.authority, &cert);
    let winner_serial = CertificateInfo::from_pem(&winner.cert_pem)
        .expect("winner decodes")
        .serial_hex;
    *h.store.race_winner.lock().expect("race lock") = Some(winner.clone());

    let requeue = reconcile_certificate(&cert, &h.reconciler)
        .await
        .expect("AlreadyExists is not an error");
    assert_eq!(requeue, Requeue::None);

    assert_eq!(h.store.record(NAMESPACE, "api-tls"), Some(winner));
    let status = h.store.status(&cert).expect("status");
    assert_eq!(status.state, Some(CertificateState::Valid));
    assert_eq!(status.serial_number, Some(winner_serial));
}

#[tokio::test]
async fn test_intact_record_is_adopted_without_issuing() {
    let h = harness();
    let cert = certificate("api", "api-tls");
    let existing = managed_record(&h.authority, &cert);
    h.store.insert_record(existing.clone());

    let requeue = reconcile_certificate(&cert, &h.reconciler)
        .await
        .expect("adopt");
    assert_eq!(requeue, Requeue::None);
    assert_eq!(h.authority.issued(), 0);
    assert_eq!(h.store.record(NAMESPACE, "api-tls"), Some(existing));
    assert_eq!(
        state_of(h.store.status(&cert).as_ref()),
        Some(CertificateState::Valid)
    );
}

#[tokio::test]
async fn test_stale_record_with_other_subject_is_reissued() {
    let h = harness();
    let cert = certificate("api", "api-tls");
    let mut previous = cert.clone();
    previous.spec.dns_name = "old.k8c.io".to_string();
    h.store.insert_record(managed_record(&h.authority, &previous));

    reconcile_certificate(&cert, &h.reconciler)
        .await
        .expect("re-issue");

    let record = h.store.record(NAMESPACE, "api-tls").expect("record");
    let info = CertificateInfo::from_pem(&record.cert_pem).expect("decodes");
    assert_eq!(info.common_name, "api.k8c.io");
    assert_eq!(h.authority.issued(), 1);
}

#[tokio::test]
async fn test_record_create_failure_requeues_shortly() {
    let h = harness();
    let cert = certificate("api", "api-tls");
    h.store.fail_create.store(true, Ordering::SeqCst);

    let err = reconcile_certificate(&cert, &h.reconciler)
        .await
        .expect_err("create fails");
    assert!(matches!(err, ReconcilerError::Persist { stage: "secret", .. }));
    assert_eq!(err.requeue(), Requeue::Shortly);
    assert_eq!(h.store.record_count(), 0);
    assert!(h.store.status(&cert).is_none());

    h.store.fail_create.store(false, Ordering::SeqCst);
    assert_eq!(
        reconcile_certificate(&cert, &h.reconciler).await.expect("retry"),
        Requeue::None
    );
    assert_eq!(h.authority.issued(), 2, "retry issues fresh material");
}

#[tokio::test]
async fn test_status_write_failure_adopts_record_on_retry() {
    let h = harness();
    let cert = certificate("api", "api-tls");
    h.store.fail_status.store(true, Ordering::SeqCst);

    let err = reconcile_certificate(&cert, &h.reconciler)
        .await
        .expect_err("status write fails");
    assert_eq!(err.requeue(), Requeue::Shortly);
    assert_eq!(h.store.record_count(), 1);

    h.store.fail_status.store(false, Ordering::SeqCst);
    let cert = h.store.refresh(&cert);
    assert_eq!(
        reconcile_certificate(&cert, &h.reconciler).await.expect("retry"),
        Requeue::None
    );
    assert_eq!(h.authority.issued(), 1);
    assert_eq!(
        state_of(h.store.status(&cert).as_ref()),
        Some(CertificateState::Valid)
    );
}

#[tokio::test]
async fn test_store_outage_requeues_later_without_writes() {
    let h = harness();
    let cert = certificate("api", "api-tls");
    h.store.fail_get.store(true, Ordering::SeqCst);

    let err = reconcile_certificate(&cert, &h.reconciler)
        .await
        .expect_err("store unavailable");
    assert!(matches!(err, ReconcilerError::Store(_)));
    assert_eq!(err.requeue(), Requeue::Later);
    assert_eq!(h.store.writes(), 0);
}

#[tokio::test]
async fn test_crypto_failure_requeues_later() {
    let h = harness();
    let cert = certificate("api", "api-tls");
    h.authority.fail_issue.store(true, Ordering::SeqCst);

    let err = reconcile_certificate(&cert, &h.reconciler)
        .await
        .expect_err("issue fails");
    assert!(matches!(
        err,
        ReconcilerError::Authority(CaError::CryptoFailure(_))
    ));
    assert_eq!(err.requeue(), Requeue::Later);
    assert_eq!(h.store.record_count(), 0);
}

#[tokio::test]
async fn test_malformed_record_is_decode_failure() {
    let h = harness();
    let cert = certificate("api", "api-tls");
    reconcile_certificate(&cert, &h.reconciler)
        .await
        .expect("first pass");

    h.store.remove_record(NAMESPACE, "api-tls");
    h.store.insert_record(CredentialRecord {
        namespace: NAMESPACE.to_string(),
        name: "api-tls".to_string(),
        key_pem: b"key".to_vec(),
        cert_pem: b"not a certificate".to_vec(),
        owner_uid: cert.uid(),
    });

    let cert = h.store.refresh(&cert);
    let writes = h.store.writes();
    let err = reconcile_certificate(&cert, &h.reconciler)
        .await
        .expect_err("decode fails");
    assert!(matches!(
        err,
        ReconcilerError::Authority(CaError::DecodeFailure(_))
    ));
    assert_eq!(err.requeue(), Requeue::Later);
    assert_eq!(h.store.writes(), writes, "status stays unchanged");
}

#[tokio::test]
async fn test_subject_drift_sets_condition_once() {
    let h = harness();
    let cert = certificate("api", "api-tls");
    reconcile_certificate(&cert, &h.reconciler)
        .await
        .expect("first pass");

    let mut changed = h.store.refresh(&cert);
    changed.spec.alt_names.push("extra.k8c.io".to_string());
    changed.metadata.generation = Some(2);

    let writes = h.store.writes();
    assert_eq!(
        reconcile_certificate(&changed, &h.reconciler).await.expect("drift pass"),
        Requeue::None
    );
    assert_eq!(h.store.writes(), writes + 1);

    let status = h.store.status(&cert).expect("status");
    assert_eq!(status.state, Some(CertificateState::Valid));
    assert_eq!(status.observed_generation, Some(2));
    let condition = status.condition("SubjectInSync").expect("condition");
    assert_eq!(condition.status, "False");
    assert_eq!(condition.reason.as_deref(), Some("SubjectDrift"));

    let changed = h.store.refresh(&changed);
    reconcile_certificate(&changed, &h.reconciler)
        .await
        .expect("second drift pass");
    assert_eq!(h.store.writes(), writes + 1, "unchanged drift is not rewritten");
    assert_eq!(h.authority.issued(), 1, "drift never re-issues");
}

#[tokio::test]
async fn test_unowned_secret_is_never_deleted() {
    let h = harness();
    let cert = certificate("api", "api-tls");
    let foreign = CredentialRecord {
        namespace: NAMESPACE.to_string(),
        name: "api-tls".to_string(),
        key_pem: b"foreign key".to_vec(),
        cert_pem: b"foreign cert".to_vec(),
        owner_uid: None,
    };
    h.store.insert_record(foreign.clone());

    let err = reconcile_certificate(&cert, &h.reconciler)
        .await
        .expect_err("unowned secret");
    assert!(matches!(err, ReconcilerError::InvalidSpec(_)));
    assert_eq!(err.requeue(), Requeue::Later);
    assert_eq!(h.store.record(NAMESPACE, "api-tls"), Some(foreign));
    assert_eq!(h.store.writes(), 0);
}

#[tokio::test]
async fn test_root_ca_secret_name_is_never_taken_over() {
    let h = harness();
    let cert = certificate("api", "certificate-manager-ca");
    let root = CredentialRecord {
        namespace: NAMESPACE.to_string(),
        name: "certificate-manager-ca".to_string(),
        key_pem: h.authority.inner.root_key_pem().as_bytes().to_vec(),
        cert_pem: h.authority.inner.root_certificate_pem().as_bytes().to_vec(),
        owner_uid: None,
    };
    h.store.insert_record(root.clone());

    let err = reconcile_certificate(&cert, &h.reconciler)
        .await
        .expect_err("root secret is not ours");
    assert!(matches!(err, ReconcilerError::InvalidSpec(_)));
    assert_eq!(h.store.record(NAMESPACE, "certificate-manager-ca"), Some(root));
    assert_eq!(h.authority.issued(), 0);
}

#[tokio::test]
async fn test_shared_secret_ref_keeps_first_owner() {
    let h = harness();
    let first = certificate("a", "shared-tls");
    let second = certificate("b", "shared-tls");

    reconcile_certificate(&first, &h.reconciler)
        .await
        .expect("first owner issues");
    let owned = h.store.record(NAMESPACE, "shared-tls").expect("record");

    let err = reconcile_certificate(&second, &h.reconciler)
        .await
        .expect_err("second Certificate does not own the secret");
    assert!(matches!(err, ReconcilerError::InvalidSpec(_)));
    assert_eq!(h.store.record(NAMESPACE, "shared-tls"), Some(owned.clone()));
    assert!(h.store.status(&second).is_none());

    // The first owner still sees its own subject
    let first = h.store.refresh(&first);
    assert_eq!(
        reconcile_certificate(&first, &h.reconciler).await.expect("no-op"),
        Requeue::None
    );
    let info = CertificateInfo::from_pem(&owned.cert_pem).expect("decodes");
    assert_eq!(info.common_name, "a.k8c.io");
    let status = h.store.status(&first).expect("status");
    assert_eq!(status.state, Some(CertificateState::Valid));
    assert_eq!(status.serial_number, Some(info.serial_hex));
    assert_eq!(h.authority.issued(), 1);
}

#[tokio::test]
async fn test_record_from_foreign_root_is_not_adopted() {
    let h = harness();
    let cert = certificate("api", "api-tls");
    let foreign_root = CertificateAuthority::bootstrap(365).expect("bootstrap other root");
    let stale = record_signed_by(&foreign_root, &cert);
    h.store.insert_record(stale.clone());

    reconcile_certificate(&cert, &h.reconciler)
        .await
        .expect("re-issue");

    assert_eq!(h.authority.issued(), 1);
    let record = h.store.record(NAMESPACE, "api-tls").expect("record");
    assert_ne!(record.cert_pem, stale.cert_pem);
    assert!(h
        .authority
        .inner
        .is_issued_by_root(&record.cert_pem)
        .expect("decodes"));
}

#[tokio::test]
async fn test_valid_record_from_replaced_root_expires_and_reissues() {
    let h = harness();
    let cert = certificate("api", "api-tls");
    reconcile_certificate(&cert, &h.reconciler)
        .await
        .expect("first pass");

    // Same owner and subject, signed by a root that has since been replaced
    let foreign_root = CertificateAuthority::bootstrap(365).expect("bootstrap other root");
    h.store.remove_record(NAMESPACE, "api-tls");
    h.store.insert_record(record_signed_by(&foreign_root, &cert));

    let cert = h.store.refresh(&cert);
    assert_eq!(
        reconcile_certificate(&cert, &h.reconciler).await.expect("detect"),
        Requeue::Shortly
    );
    let status = h.store.status(&cert).expect("status");
    assert_eq!(status.state, Some(CertificateState::Expired));
    assert_eq!(
        status.condition("Ready").and_then(|c| c.reason.clone()).as_deref(),
        Some("UntrustedIssuer")
    );

    let cert = h.store.refresh(&cert);
    assert_eq!(
        reconcile_certificate(&cert, &h.reconciler).await.expect("re-issue"),
        Requeue::None
    );
    let record = h.store.record(NAMESPACE, "api-tls").expect("record");
    assert!(h
        .authority
        .inner
        .is_issued_by_root(&record.cert_pem)
        .expect("decodes"));
    assert_eq!(
        state_of(h.store.status(&cert).as_ref()),
        Some(CertificateState::Valid)
    );
    assert_eq!(h.authority.issued(), 2);
}

#[tokio::test]
async fn test_lost_race_to_other_owner_fails_pass() {
    let h = harness();
    let cert = certificate("api", "api-tls");
    let other = certificate("web", "api-tls");
    *h.store.race_winner.lock().expect("race lock") = Some(managed_record(&h.authority, &other));

    let err = reconcile_certificate(&cert, &h.reconciler)
        .await
        .expect_err("winner belongs to another Certificate");
    assert!(matches!(err, ReconcilerError::Persist { stage: "secret", .. }));
    assert!(h.store.status(&cert).is_none());
}

#[tokio::test]
async fn test_lost_race_to_vanished_record_fails_pass() {
    let h = harness();
    let cert = certificate("api", "api-tls");
    h.store.conflict_on_create.store(true, Ordering::SeqCst);

    let err = reconcile_certificate(&cert, &h.reconciler)
        .await
        .expect_err("winner is gone");
    assert!(matches!(err, ReconcilerError::Persist { stage: "secret", .. }));
    assert_eq!(err.requeue(), Requeue::Shortly);
    assert!(h.store.status(&cert).is_none(), "no Valid status without a serial");
}

#[tokio::test]
async fn test_lost_race_refetch_failure_is_propagated() {
    let h = harness();
    let cert = certificate("api", "api-tls");
    h.store.conflict_on_create.store(true, Ordering::SeqCst);
    h.store.outage_after_conflict.store(true, Ordering::SeqCst);

    let err = reconcile_certificate(&cert, &h.reconciler)
        .await
        .expect_err("refetch fails");
    assert!(matches!(err, ReconcilerError::Store(_)));
    assert_eq!(err.requeue(), Requeue::Later);
    assert!(h.store.status(&cert).is_none());
}

#[tokio::test]
async fn test_padded_dns_name_is_rejected_before_store_access() {
    let h = harness();
    let mut cert = certificate("api", "api-tls");
    cert.spec.alt_names = vec![" api.internal".to_string()];

    let err = reconcile_certificate(&cert, &h.reconciler)
        .await
        .expect_err("padded name");
    assert!(matches!(err, ReconcilerError::InvalidSpec(_)));
    assert_eq!(h.store.record_count(), 0);
    assert_eq!(h.authority.issued(), 0);
}

#[tokio::test]
async fn test_invalid_spec_touches_nothing() {
    let h = harness();
    let mut cert = certificate("api", "api-tls");
    cert.spec.dns_name = String::new();
    h.store.fail_get.store(true, Ordering::SeqCst);

    let err = reconcile_certificate(&cert, &h.reconciler)
        .await
        .expect_err("invalid spec");
    assert!(matches!(err, ReconcilerError::InvalidSpec(_)));
    assert_eq!(err.requeue(), Requeue::Later);
}

#[tokio::test]
async fn test_driver_maps_requeue_to_action() {
    let h = harness();
    let cert = certificate("api", "api-tls");
    let ctx = Arc::new(h.reconciler.clone());

    let action = reconcile(Arc::new(cert.clone()), ctx.clone())
        .await
        .expect("issue pass");
    assert_eq!(action, Action::requeue(Duration::from_secs(3600)));

    h.store.remove_record(NAMESPACE, "api-tls");
    let action = reconcile(Arc::new(h.store.refresh(&cert)), ctx)
        .await
        .expect("detect pass");
    assert_eq!(action, Action::requeue(Duration::from_secs(5)));
}

#[tokio::test]
async fn test_error_policy_counts_and_success_clears() {
    let h = harness();
    let cert = Arc::new(certificate("api", "api-tls"));
    let ctx = Arc::new(h.reconciler.clone());
    h.store.fail_create.store(true, Ordering::SeqCst);

    let err = reconcile(cert.clone(), ctx.clone())
        .await
        .expect_err("create fails");
    let action = handle_reconciliation_error(cert.clone(), &err, ctx.clone());
    assert_eq!(action, Action::requeue(Duration::from_secs(5)));
    assert_eq!(ctx.error_count("default/api"), 1);

    let err = ReconcilerError::Store(certificate_manager::store::StoreError::Unavailable(
        "timeout".to_string(),
    ));
    let action = handle_reconciliation_error(cert.clone(), &err, ctx.clone());
    assert_eq!(action, Action::requeue(Duration::from_secs(60)));
    assert_eq!(ctx.error_count("default/api"), 2);

    h.store.fail_create.store(false, Ordering::SeqCst);
    reconcile(cert, ctx.clone()).await.expect("recovered");
    assert_eq!(ctx.error_count("default/api"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_driver_times_out_slow_store() {
    let h = harness_with_config(ControllerConfig {
        reconcile_timeout_secs: 1,
        ..ControllerConfig::default()
    });
    *h.store.get_delay.lock().expect("delay lock") = Some(Duration::from_secs(10));

    let err = reconcile(
        Arc::new(certificate("api", "api-tls")),
        Arc::new(h.reconciler.clone()),
    )
    .await
    .expect_err("times out");
    assert!(matches!(err, ReconcilerError::Timeout(_)));
    assert_eq!(err.requeue(), Requeue::Later);
    assert_eq!(h.store.writes(), 0);
}
