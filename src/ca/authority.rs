//! # Certificate Authority
//!
//! The embedded private CA: one root key pair, created or loaded once at
//! process start, that signs every leaf the controller hands out.
//!
//! Keys are ECDSA P-384. Leaves get a random 128-bit serial, the declared
//! subject and DNS names, and the loopback address as an IP SAN.

use super::error::{CaError, Result};
use super::x509::{is_signed_by, CertificateInfo};
use super::{CertAuthority, IssueRequest, IssuedCredentials, RenewRequest};
use crate::constants::{
    DEFAULT_VALIDITY_DAYS, ROOT_COMMON_NAME, ROOT_ORGANIZATION, SUBJECT_COUNTRIES,
};
use rand::{rngs::OsRng, RngCore};
use rcgen::{
    string::{Ia5String, PrintableString},
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue, IsCa, Issuer,
    KeyPair, KeyUsagePurpose, SanType, SerialNumber, PKCS_ECDSA_P384_SHA384,
};
use std::net::{IpAddr, Ipv4Addr};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

/// Loopback address embedded in every leaf
const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Certificate authority holding the root key and certificate as PEM
///
/// `KeyPair` is not `Clone`, so the root key is re-parsed for each signature.
#[derive(Clone)]
pub struct CertificateAuthority {
    root_key_pem: String,
    root_cert_pem: String,
    default_validity_days: i64,
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("root_key_pem", &"***")
            .field("default_validity_days", &self.default_validity_days)
            .finish_non_exhaustive()
    }
}

impl CertificateAuthority {
    /// Generate a fresh self-signed root
    ///
    /// # Errors
    ///
    /// `CryptoFailure` when the random source, key generation or signing fails.
    pub fn bootstrap(default_validity_days: i64) -> Result<Self> {
        let default_validity_days = normalize_days(default_validity_days, DEFAULT_VALIDITY_DAYS);

        let mut params = CertificateParams::default();
        params.distinguished_name = subject(ROOT_COMMON_NAME, ROOT_ORGANIZATION)?;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
            KeyUsagePurpose::KeyCertSign,
        ];
        params.serial_number = Some(random_serial()?);

        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + Duration::days(default_validity_days);

        let key_pair = generate_key()?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| CaError::CryptoFailure(format!("failed to self-sign root: {e}")))?;

        info!(
            validity_days = default_validity_days,
            "Bootstrapped root certificate authority"
        );

        Ok(Self {
            root_key_pem: key_pair.serialize_pem(),
            root_cert_pem: cert.pem(),
            default_validity_days,
        })
    }

    /// Load a persisted root
    ///
    /// # Errors
    ///
    /// `DecodeFailure` when either PEM cannot be parsed, `InvalidRoot` when the
    /// certificate is not a CA.
    pub fn from_pem(key_pem: &str, cert_pem: &str, default_validity_days: i64) -> Result<Self> {
        KeyPair::from_pem(key_pem)
            .map_err(|e| CaError::DecodeFailure(format!("failed to parse root key: {e}")))?;

        let info = CertificateInfo::from_pem(cert_pem.as_bytes())?;
        if !info.is_ca {
            return Err(CaError::InvalidRoot(format!(
                "certificate '{}' is not a CA",
                info.common_name
            )));
        }

        Ok(Self {
            root_key_pem: key_pem.to_string(),
            root_cert_pem: cert_pem.to_string(),
            default_validity_days: normalize_days(default_validity_days, DEFAULT_VALIDITY_DAYS),
        })
    }

    /// Root certificate in PEM format, for distribution to clients
    #[must_use]
    pub fn root_certificate_pem(&self) -> &str {
        &self.root_cert_pem
    }

    /// Root private key in PEM format, for persistence
    #[must_use]
    pub fn root_key_pem(&self) -> &str {
        &self.root_key_pem
    }

    /// Parsed view of the root certificate
    pub fn root_info(&self) -> Result<CertificateInfo> {
        CertificateInfo::from_pem(self.root_cert_pem.as_bytes())
    }

    #[must_use]
    pub fn default_validity_days(&self) -> i64 {
        self.default_validity_days
    }

    /// Issue a leaf with an explicit validity window
    pub(crate) fn issue_window(
        &self,
        request: &IssueRequest,
        not_before: OffsetDateTime,
        not_after: OffsetDateTime,
    ) -> Result<IssuedCredentials> {
        request.validate_names()?;
        let dns_name = request.dns_name.as_str();

        let mut params = CertificateParams::default();
        params.distinguished_name = subject(dns_name, &request.organization)?;
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.subject_alt_names = subject_alt_names(request)?;
        params.serial_number = Some(random_serial()?);
        params.not_before = not_before;
        params.not_after = not_after;

        let leaf_key = generate_key()?;

        let root_key = KeyPair::from_pem(&self.root_key_pem)
            .map_err(|e| CaError::CryptoFailure(format!("failed to load root key: {e}")))?;
        let issuer = Issuer::from_ca_cert_pem(&self.root_cert_pem, &root_key)
            .map_err(|e| CaError::CryptoFailure(format!("failed to create issuer: {e}")))?;

        let cert = params
            .signed_by(&leaf_key, &issuer)
            .map_err(|e| CaError::CryptoFailure(format!("failed to sign certificate: {e}")))?;

        debug!(
            dns_name = dns_name,
            not_after = %not_after,
            "Signed leaf certificate"
        );

        Ok(IssuedCredentials {
            key_pem: leaf_key.serialize_pem(),
            cert_pem: cert.pem(),
        })
    }

    /// Expiry check against an explicit clock
    pub fn has_expired_at(&self, cert_pem: &[u8], now: OffsetDateTime) -> Result<bool> {
        let info = CertificateInfo::from_pem(cert_pem)?;
        Ok(info.is_expired_at(now.unix_timestamp()))
    }
}

impl CertAuthority for CertificateAuthority {
    fn issue(&self, request: &IssueRequest) -> Result<IssuedCredentials> {
        let days = normalize_days(request.valid_for_days, self.default_validity_days);
        let now = OffsetDateTime::now_utc();
        self.issue_window(request, now, now + Duration::days(days))
    }

    fn renew(&self, request: &RenewRequest) -> Result<IssuedCredentials> {
        let current = CertificateInfo::from_pem(&request.current_cert_pem)?;
        debug!(
            serial = current.serial_hex.as_str(),
            "Renewing certificate with fresh key material"
        );
        self.issue(&request.request)
    }

    fn has_expired(&self, cert_pem: &[u8]) -> Result<bool> {
        self.has_expired_at(cert_pem, OffsetDateTime::now_utc())
    }

    fn is_issued_by_root(&self, cert_pem: &[u8]) -> Result<bool> {
        is_signed_by(cert_pem, self.root_cert_pem.as_bytes())
    }
}

/// Zero or negative day counts mean "use the fallback window"
fn normalize_days(days: i64, fallback: i64) -> i64 {
    if days > 0 {
        days
    } else {
        fallback
    }
}

fn generate_key() -> Result<KeyPair> {
    KeyPair::generate_for(&PKCS_ECDSA_P384_SHA384)
        .map_err(|e| CaError::CryptoFailure(format!("failed to generate key pair: {e}")))
}

/// Uniformly random 128-bit serial from the OS random source
fn random_serial() -> Result<SerialNumber> {
    let mut bytes = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| CaError::CryptoFailure(format!("random source unavailable: {e}")))?;
    Ok(SerialNumber::from_slice(&bytes))
}

fn subject(common_name: &str, organization: &str) -> Result<DistinguishedName> {
    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(common_name.to_string()),
    );
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String(organization.to_string()),
    );
    // rcgen keeps one value per attribute type, so only the first allowed
    // country makes it into the subject
    let country = PrintableString::try_from(SUBJECT_COUNTRIES[0].to_string())
        .map_err(|e| CaError::InvalidRequest(format!("invalid country code: {e}")))?;
    dn.push(DnType::CountryName, DnValue::PrintableString(country));
    Ok(dn)
}

fn subject_alt_names(request: &IssueRequest) -> Result<Vec<SanType>> {
    let mut sans = request
        .dns_names()
        .into_iter()
        .map(|name| {
            Ia5String::try_from(name.clone())
                .map(SanType::DnsName)
                .map_err(|e| CaError::InvalidRequest(format!("invalid DNS name '{name}': {e}")))
        })
        .collect::<Result<Vec<_>>>()?;
    sans.push(SanType::IpAddress(LOOPBACK));
    Ok(sans)
}
