//! # X.509 Inspection
//!
//! PEM decoding and read-only views over issued certificates.

use super::error::{CaError, Result};
use std::net::IpAddr;
use x509_parser::prelude::*;

const CERTIFICATE_TAG: &str = "CERTIFICATE";

/// Parse PEM-encoded data and return the DER bytes of a certificate block
pub fn parse_pem(pem_data: &[u8]) -> Result<Vec<u8>> {
    let pem_obj = ::pem::parse(pem_data)
        .map_err(|e| CaError::DecodeFailure(format!("failed to parse PEM: {e}")))?;
    if pem_obj.tag() != CERTIFICATE_TAG {
        return Err(CaError::DecodeFailure(format!(
            "expected a {CERTIFICATE_TAG} PEM block, found {}",
            pem_obj.tag()
        )));
    }
    Ok(pem_obj.contents().to_vec())
}

/// Subject, names and validity of a certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    /// Subject common name, empty when absent
    pub common_name: String,
    /// Issuer distinguished name in RFC 4514 form
    pub issuer: String,
    /// Subject organizations
    pub organizations: Vec<String>,
    /// DNS subject alternative names in certificate order
    pub dns_names: Vec<String>,
    /// IP subject alternative names
    pub ip_addresses: Vec<IpAddr>,
    /// When the certificate becomes valid (Unix timestamp)
    pub not_before: i64,
    /// When the certificate expires (Unix timestamp)
    pub not_after: i64,
    /// Serial number as lowercase hex
    pub serial_hex: String,
    /// Basic constraints mark this certificate as a CA
    pub is_ca: bool,
}

impl CertificateInfo {
    /// Parse certificate info from PEM-encoded certificate
    pub fn from_pem(pem_data: &[u8]) -> Result<Self> {
        let der = parse_pem(pem_data)?;
        Self::from_der(&der)
    }

    /// Parse certificate info from DER-encoded certificate
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = decode_der(der)?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or("")
            .to_string();

        let organizations = cert
            .subject()
            .iter_organization()
            .filter_map(|o| o.as_str().ok())
            .map(str::to_string)
            .collect();

        let mut dns_names = Vec::new();
        let mut ip_addresses = Vec::new();
        let san = cert
            .subject_alternative_name()
            .map_err(|e| CaError::DecodeFailure(format!("invalid SAN extension: {e}")))?;
        if let Some(san) = san {
            for name in &san.value.general_names {
                match name {
                    GeneralName::DNSName(dns) => dns_names.push((*dns).to_string()),
                    GeneralName::IPAddress(bytes) => {
                        if let Some(ip) = ip_from_bytes(bytes) {
                            ip_addresses.push(ip);
                        }
                    }
                    _ => {}
                }
            }
        }

        let serial_hex = cert
            .raw_serial()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();

        Ok(Self {
            common_name,
            issuer: cert.issuer().to_string(),
            organizations,
            dns_names,
            ip_addresses,
            not_before: cert.validity().not_before.timestamp(),
            not_after: cert.validity().not_after.timestamp(),
            serial_hex,
            is_ca: cert.is_ca(),
        })
    }

    /// Whether `NotAfter` lies strictly before `now` (Unix timestamp)
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.not_after < now
    }

    /// DNS names sorted for order-insensitive comparison
    #[must_use]
    pub fn sorted_dns_names(&self) -> Vec<String> {
        let mut names = self.dns_names.clone();
        names.sort();
        names
    }

    /// Validity window length in whole days
    #[must_use]
    pub fn validity_days(&self) -> i64 {
        (self.not_after - self.not_before) / (24 * 60 * 60)
    }
}

fn decode_der(der: &[u8]) -> Result<(&[u8], X509Certificate<'_>)> {
    X509Certificate::from_der(der)
        .map_err(|e| CaError::DecodeFailure(format!("failed to parse certificate: {e}")))
}

/// Whether the PEM certificate was signed by the key of `issuer_pem`
///
/// Roots bootstrapped by this controller all share one subject, so the
/// signature is checked rather than the issuer name. Either input failing to
/// decode is a `DecodeFailure`; a certificate from another root is `Ok(false)`.
pub fn is_signed_by(cert_pem: &[u8], issuer_pem: &[u8]) -> Result<bool> {
    let cert_der = parse_pem(cert_pem)?;
    let issuer_der = parse_pem(issuer_pem)?;
    let (_, cert) = decode_der(&cert_der)?;
    let (_, issuer) = decode_der(&issuer_der)?;
    Ok(cert.verify_signature(Some(issuer.public_key())).is_ok())
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(bytes).ok().map(IpAddr::from),
        _ => None,
    }
}
