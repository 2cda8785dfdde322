//! # Subject Drift
//!
//! Compares a stored certificate with the spec it was issued for.

use crate::ca::{CertificateInfo, IssueRequest};
use crate::crd::CertificateSpec;

/// Differences between the declared subject and the stored certificate
///
/// Empty when they match. Alternate names compare as a sorted set, name for
/// name, without case or trailing-dot normalization.
#[must_use]
pub fn detect_drift(spec: &CertificateSpec, info: &CertificateInfo) -> Vec<String> {
    let mut differences = Vec::new();

    let dns_name = spec.dns_name.as_str();
    if info.common_name != dns_name {
        differences.push(format!(
            "dnsName '{dns_name}' does not match common name '{}'",
            info.common_name
        ));
    }

    let organization = spec.organization.as_str();
    if !info.organizations.iter().any(|o| o == organization) {
        differences.push(format!(
            "organization '{organization}' does not match {:?}",
            info.organizations
        ));
    }

    let mut declared = IssueRequest::from(spec).dns_names();
    declared.sort();
    let stored = info.sorted_dns_names();
    if declared != stored {
        differences.push(format!(
            "DNS names {declared:?} do not match certificate names {stored:?}"
        ));
    }

    differences
}
