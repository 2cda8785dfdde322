//! Common test utilities for reconciler tests
//!
//! Provides an in-memory [`CredentialStore`] with failure injection and a
//! [`CertAuthority`] double wrapping the real authority.

#![allow(dead_code)]

use async_trait::async_trait;
use certificate_manager::ca::{
    CaError, CertAuthority, CertificateAuthority, IssueRequest, IssuedCredentials, RenewRequest,
};
use certificate_manager::config::ControllerConfig;
use certificate_manager::controller::reconciler::Reconciler;
use certificate_manager::crd::{Certificate, CertificateSpec, CertificateStatus, SecretRef};
use certificate_manager::store::{CredentialRecord, CredentialStore, StoreError};
use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const NAMESPACE: &str = "default";

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// Store keeping records and statuses in maps
#[derive(Default)]
pub struct InMemoryStore {
    records: Mutex<HashMap<Key, CredentialRecord>>,
    statuses: Mutex<HashMap<Key, CertificateStatus>>,
    writes: AtomicUsize,
    /// Every `get_record` fails with `Unavailable`
    pub fail_get: AtomicBool,
    /// Every `create_record` fails with `Unavailable`
    pub fail_create: AtomicBool,
    /// Every `update_status` fails with `Unavailable`
    pub fail_status: AtomicBool,
    /// Record written by a competing writer just before our create
    pub race_winner: Mutex<Option<CredentialRecord>>,
    /// `create_record` reports `AlreadyExists` without storing anything
    pub conflict_on_create: AtomicBool,
    /// The store goes down right after a create conflict
    pub outage_after_conflict: AtomicBool,
    /// Delay applied to `get_record`
    pub get_delay: Mutex<Option<Duration>>,
}

impl InMemoryStore {
    /// Number of create, delete and status writes so far
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn record(&self, namespace: &str, name: &str) -> Option<CredentialRecord> {
        self.records
            .lock()
            .expect("records lock")
            .get(&key(namespace, name))
            .cloned()
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().expect("records lock").len()
    }

    pub fn insert_record(&self, record: CredentialRecord) {
        self.records
            .lock()
            .expect("records lock")
            .insert(key(&record.namespace, &record.name), record);
    }

    /// Out-of-band deletion, not counted as a write
    pub fn remove_record(&self, namespace: &str, name: &str) {
        self.records
            .lock()
            .expect("records lock")
            .remove(&key(namespace, name));
    }

    pub fn status(&self, certificate: &Certificate) -> Option<CertificateStatus> {
        self.statuses
            .lock()
            .expect("statuses lock")
            .get(&status_key(certificate))
            .cloned()
    }

    fn conflict(&self) -> StoreError {
        if self.outage_after_conflict.load(Ordering::SeqCst) {
            self.fail_get.store(true, Ordering::SeqCst);
        }
        StoreError::AlreadyExists
    }

    /// The Certificate as the watch would deliver it next, with the stored status
    pub fn refresh(&self, certificate: &Certificate) -> Certificate {
        let mut refreshed = certificate.clone();
        refreshed.status = self.status(certificate);
        refreshed
    }
}

fn status_key(certificate: &Certificate) -> Key {
    key(
        &certificate
            .namespace()
            .unwrap_or_else(|| NAMESPACE.to_string()),
        &certificate.name_any(),
    )
}

fn unavailable() -> StoreError {
    StoreError::Unavailable("injected failure".to_string())
}

#[async_trait]
impl CredentialStore for InMemoryStore {
    async fn get_record(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        let delay = *self.get_delay.lock().expect("delay lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(self.record(namespace, name))
    }

    async fn create_record(
        &self,
        _owner: &Certificate,
        record: &CredentialRecord,
    ) -> Result<(), StoreError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        if let Some(winner) = self.race_winner.lock().expect("race lock").take() {
            self.insert_record(winner);
            return Err(self.conflict());
        }
        if self.conflict_on_create.load(Ordering::SeqCst) {
            return Err(self.conflict());
        }
        let mut records = self.records.lock().expect("records lock");
        let k = key(&record.namespace, &record.name);
        if records.contains_key(&k) {
            return Err(StoreError::AlreadyExists);
        }
        records.insert(k, record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_record(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.records
            .lock()
            .expect("records lock")
            .remove(&key(namespace, name));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update_status(
        &self,
        certificate: &Certificate,
        status: &CertificateStatus,
    ) -> Result<(), StoreError> {
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.statuses
            .lock()
            .expect("statuses lock")
            .insert(status_key(certificate), status.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Real authority with counters and injectable failures
pub struct MockAuthority {
    pub inner: CertificateAuthority,
    pub issued: AtomicUsize,
    /// `issue` fails with `CryptoFailure`
    pub fail_issue: AtomicBool,
    /// `has_expired` reports every decodable certificate as expired
    pub force_expired: AtomicBool,
}

impl MockAuthority {
    pub fn new() -> Self {
        Self {
            inner: CertificateAuthority::bootstrap(365).expect("bootstrap root CA"),
            issued: AtomicUsize::new(0),
            fail_issue: AtomicBool::new(false),
            force_expired: AtomicBool::new(false),
        }
    }

    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

impl CertAuthority for MockAuthority {
    fn issue(&self, request: &IssueRequest) -> Result<IssuedCredentials, CaError> {
        if self.fail_issue.load(Ordering::SeqCst) {
            return Err(CaError::CryptoFailure("injected failure".to_string()));
        }
        let credentials = self.inner.issue(request)?;
        self.issued.fetch_add(1, Ordering::SeqCst);
        Ok(credentials)
    }

    fn renew(&self, request: &RenewRequest) -> Result<IssuedCredentials, CaError> {
        self.inner.renew(request)
    }

    fn has_expired(&self, cert_pem: &[u8]) -> Result<bool, CaError> {
        let expired = self.inner.has_expired(cert_pem)?;
        Ok(expired || self.force_expired.load(Ordering::SeqCst))
    }

    fn is_issued_by_root(&self, cert_pem: &[u8]) -> Result<bool, CaError> {
        self.inner.is_issued_by_root(cert_pem)
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub authority: Arc<MockAuthority>,
    pub reconciler: Reconciler,
}

pub fn harness() -> Harness {
    harness_with_config(ControllerConfig::default())
}

pub fn harness_with_config(config: ControllerConfig) -> Harness {
    let store = Arc::new(InMemoryStore::default());
    let authority = Arc::new(MockAuthority::new());
    let reconciler = Reconciler::new(authority.clone(), store.clone(), Arc::new(config));
    Harness {
        store,
        authority,
        reconciler,
    }
}

pub fn certificate(name: &str, secret: &str) -> Certificate {
    let mut cert = Certificate::new(
        name,
        CertificateSpec {
            organization: "k8c".to_string(),
            dns_name: format!("{name}.k8c.io"),
            alt_names: vec![format!("{name}.internal")],
            valid_for_days: 30,
            renew_before_days: 15,
            secret_ref: SecretRef {
                name: secret.to_string(),
            },
        },
    );
    cert.metadata.namespace = Some(NAMESPACE.to_string());
    cert.metadata.uid = Some(format!("uid-{name}"));
    cert.metadata.generation = Some(1);
    cert
}

/// Credentials for `certificate` issued outside the reconciler and owned by it
pub fn managed_record(authority: &MockAuthority, certificate: &Certificate) -> CredentialRecord {
    record_signed_by(&authority.inner, certificate)
}

/// Credentials owned by `certificate` but signed by an arbitrary root
pub fn record_signed_by(
    root: &CertificateAuthority,
    certificate: &Certificate,
) -> CredentialRecord {
    let credentials = root
        .issue(&IssueRequest::from(&certificate.spec))
        .expect("issue credentials");
    CredentialRecord {
        namespace: NAMESPACE.to_string(),
        name: certificate.spec.secret_ref.name.clone(),
        key_pem: credentials.key_pem.into_bytes(),
        cert_pem: credentials.cert_pem.into_bytes(),
        owner_uid: certificate.uid(),
    }
}
