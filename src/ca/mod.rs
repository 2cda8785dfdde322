//! # Certificate Authority
//!
//! Private CA used to issue the credentials stored for each `Certificate`.
//!
//! The reconciler only sees the [`CertAuthority`] capability, so tests can
//! swap in a double without generating real keys.
//!
//! ## Module Structure
//!
//! - `authority.rs` - Root bootstrap, leaf issuance and expiry checks
//! - `x509.rs` - PEM decoding and certificate inspection
//! - `error.rs` - Error taxonomy

mod authority;
mod error;
mod x509;

pub use authority::CertificateAuthority;
pub use error::{CaError, Result};
pub use x509::{is_signed_by, parse_pem, CertificateInfo};

use crate::crd::CertificateSpec;

/// Capability exposed by the certificate authority
///
/// All operations are synchronous and CPU-bound; async callers should run
/// them on a blocking thread.
pub trait CertAuthority: Send + Sync {
    /// Generate a fresh key pair and a leaf signed by the root
    ///
    /// Never returns partial output.
    fn issue(&self, request: &IssueRequest) -> Result<IssuedCredentials>;

    /// Replace existing credentials with fresh key material
    ///
    /// The current certificate must decode; the result is equivalent to a new
    /// issuance for `request.request`.
    fn renew(&self, request: &RenewRequest) -> Result<IssuedCredentials>;

    /// Whether the PEM certificate's `NotAfter` lies strictly in the past
    ///
    /// Malformed input is a `DecodeFailure`, never `false`.
    fn has_expired(&self, cert_pem: &[u8]) -> Result<bool>;

    /// Whether the PEM certificate chains to this authority's root
    ///
    /// Malformed input is a `DecodeFailure`. A leaf from a replaced or foreign
    /// root is `Ok(false)`.
    fn is_issued_by_root(&self, cert_pem: &[u8]) -> Result<bool>;
}

/// Subject and validity requested for a leaf certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRequest {
    pub organization: String,
    pub dns_name: String,
    pub alt_names: Vec<String>,
    /// Zero or negative means the authority default
    pub valid_for_days: i64,
}

impl IssueRequest {
    /// Alternate names plus the primary name, deduplicated, in declaration order
    ///
    /// Names are taken verbatim; [`IssueRequest::validate_names`] rejects the
    /// ones that cannot be used as is.
    #[must_use]
    pub fn dns_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::with_capacity(self.alt_names.len() + 1);
        for name in self.alt_names.iter().chain(std::iter::once(&self.dns_name)) {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }

    /// Reject empty names and names with surrounding whitespace
    ///
    /// # Errors
    ///
    /// `InvalidRequest` naming the first offending field.
    pub fn validate_names(&self) -> Result<()> {
        let fields = std::iter::once(("dnsName", &self.dns_name))
            .chain(self.alt_names.iter().map(|name| ("altNames", name)));
        for (field, name) in fields {
            if name.is_empty() {
                return Err(CaError::InvalidRequest(format!("{field} must not be empty")));
            }
            if name.trim() != name {
                return Err(CaError::InvalidRequest(format!(
                    "{field} '{name}' has surrounding whitespace"
                )));
            }
        }
        Ok(())
    }
}

impl From<&CertificateSpec> for IssueRequest {
    fn from(spec: &CertificateSpec) -> Self {
        Self {
            organization: spec.organization.clone(),
            dns_name: spec.dns_name.clone(),
            alt_names: spec.alt_names.clone(),
            valid_for_days: spec.valid_for_days,
        }
    }
}

/// Input to [`CertAuthority::renew`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewRequest {
    pub request: IssueRequest,
    /// PEM certificate currently stored for the resource
    pub current_cert_pem: Vec<u8>,
}

/// PEM key and certificate produced by the authority
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedCredentials {
    pub key_pem: String,
    pub cert_pem: String,
}

impl std::fmt::Debug for IssuedCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCredentials")
            .field("key_pem", &"***")
            .field("cert_pem", &self.cert_pem)
            .finish()
    }
}
