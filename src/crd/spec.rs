//! # Certificate Spec
//!
//! Main CRD specification types and default values.

use crate::constants::{DEFAULT_RENEW_BEFORE_DAYS, DEFAULT_VALID_FOR_DAYS};
use serde::{Deserialize, Serialize};

/// Certificate Custom Resource Definition
///
/// Declares a TLS certificate that the controller issues from its private
/// certificate authority and stores in a `kubernetes.io/tls` Secret.
///
/// # Example
///
/// ```yaml
/// apiVersion: certs.k8c.io/v1
/// kind: Certificate
/// metadata:
///   name: api
///   namespace: default
/// spec:
///   organization: k8c
///   dnsName: api.k8c.io
///   altNames:
///     - localhost
///   validForDays: 30
///   secretRef:
///     name: api-tls
/// ```
#[derive(kube::CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Certificate",
    group = "certs.k8c.io",
    version = "v1",
    namespaced,
    status = "crate::crd::CertificateStatus",
    shortname = "cert",
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}, {"name":"DNS Name", "type":"string", "jsonPath":".spec.dnsName"}, {"name":"Secret", "type":"string", "jsonPath":".spec.secretRef.name"}, {"name":"Not After", "type":"string", "jsonPath":".status.notAfter"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSpec {
    /// Organization placed in the certificate subject (O)
    pub organization: String,
    /// Primary DNS name, used as the subject common name and as a SAN
    pub dns_name: String,
    /// Additional DNS names. Order is not significant.
    #[serde(default)]
    pub alt_names: Vec<String>,
    /// Requested validity in days
    /// Zero or negative values fall back to the authority default
    /// Default: 365
    #[serde(default = "default_valid_for_days")]
    #[schemars(range(min = 7))]
    pub valid_for_days: i64,
    /// Days before expiry at which the certificate is considered due for renewal
    /// Reported as `status.renewalTime`; re-issue itself is driven by expiry
    /// Default: 15
    #[serde(default = "default_renew_before_days")]
    #[schemars(range(min = 7))]
    pub renew_before_days: i64,
    /// Secret the issued key and certificate are written to
    pub secret_ref: SecretRef,
}

/// Reference to the Secret holding the issued credentials
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    /// Secret name, in the Certificate's namespace
    pub name: String,
}

#[must_use]
pub fn default_valid_for_days() -> i64 {
    DEFAULT_VALID_FOR_DAYS
}

#[must_use]
pub fn default_renew_before_days() -> i64 {
    DEFAULT_RENEW_BEFORE_DAYS
}
