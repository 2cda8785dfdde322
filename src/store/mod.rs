//! # Credential Store
//!
//! Persistence boundary for issued credentials and Certificate status.
//!
//! The reconciler is written against [`CredentialStore`]; production uses
//! [`KubeCredentialStore`], which keeps each record in an immutable
//! `kubernetes.io/tls` Secret owned by its Certificate.
//!
//! ## Module Structure
//!
//! - `kubernetes.rs` - Secret and status persistence through the Kubernetes API
//! - `root.rs` - Loading or bootstrapping the persisted root CA

mod kubernetes;
mod root;

pub use kubernetes::{build_secret, record_from_secret, KubeCredentialStore};
pub use root::load_or_bootstrap_authority;

use crate::crd::{Certificate, CertificateStatus};
use async_trait::async_trait;
use thiserror::Error;

/// Store errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The addressed object does not exist
    #[error("object not found")]
    NotFound,

    /// A create raced with another writer
    #[error("object already exists")]
    AlreadyExists,

    /// The store could not be reached or rejected the request
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(api_err) if api_err.code == 404 => StoreError::NotFound,
            kube::Error::Api(api_err) if api_err.code == 409 && api_err.reason == "AlreadyExists" => {
                StoreError::AlreadyExists
            }
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Key and certificate stored for one Certificate
///
/// Missing keys in the backing object surface as empty byte vectors so that
/// decoding reports them instead of the store guessing.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub namespace: String,
    pub name: String,
    pub key_pem: Vec<u8>,
    pub cert_pem: Vec<u8>,
    /// UID from the backing object's controller owner reference
    ///
    /// Only the Certificate with this UID may replace or adopt the record.
    pub owner_uid: Option<String>,
}

impl CredentialRecord {
    /// Whether `certificate` is the controller owner of this record
    ///
    /// A Certificate without a UID owns nothing.
    #[must_use]
    pub fn owned_by(&self, certificate: &Certificate) -> bool {
        match (&self.owner_uid, certificate.metadata.uid.as_ref()) {
            (Some(owner), Some(uid)) => owner == uid,
            _ => false,
        }
    }
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("key_pem", &"***")
            .field("cert_pem_len", &self.cert_pem.len())
            .field("owner_uid", &self.owner_uid)
            .finish()
    }
}

/// Persistence capability used by the reconciler
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch a record; `Ok(None)` when it does not exist
    async fn get_record(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CredentialRecord>, StoreError>;

    /// Create a record owned by `owner` in a single write
    ///
    /// Returns `StoreError::AlreadyExists` when another writer got there first.
    async fn create_record(
        &self,
        owner: &Certificate,
        record: &CredentialRecord,
    ) -> Result<(), StoreError>;

    /// Delete a record; deleting a missing record succeeds
    async fn delete_record(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    /// Replace the status of `certificate`
    async fn update_status(
        &self,
        certificate: &Certificate,
        status: &CertificateStatus,
    ) -> Result<(), StoreError>;
}
