//! # Status
//!
//! Builders for the Certificate status written by the reconciler.
//!
//! Builders are pure so that repeated passes over an unchanged world produce
//! byte-identical status and the reconciler can skip the write.

use crate::ca::CertificateInfo;
use crate::crd::{Certificate, CertificateState, CertificateStatus, Condition};
use chrono::{DateTime, Duration, Utc};

/// Condition reporting whether usable credentials exist
pub const READY_CONDITION: &str = "Ready";

/// Condition reporting whether the stored subject matches the spec
pub const SUBJECT_CONDITION: &str = "SubjectInSync";

/// Message of a satisfied subject condition
pub const SUBJECT_IN_SYNC_MESSAGE: &str = "Stored certificate matches the declared subject";

/// Why a Certificate was marked `Expired`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryReason {
    SecretMissing,
    CertificateExpired,
    /// Signed by a root other than the one currently loaded
    UntrustedIssuer,
}

impl ExpiryReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpiryReason::SecretMissing => "SecretMissing",
            ExpiryReason::CertificateExpired => "CertificateExpired",
            ExpiryReason::UntrustedIssuer => "UntrustedIssuer",
        }
    }
}

/// Status after a successful issue-and-persist (or adoption)
#[must_use]
pub fn valid_status(
    certificate: &Certificate,
    info: &CertificateInfo,
    now: DateTime<Utc>,
) -> CertificateStatus {
    let secret = certificate.spec.secret_ref.name.as_str();
    let mut status = base_status(certificate, CertificateState::Valid, now);
    status.description = Some(format!("Certificate issued and stored in secret '{secret}'"));

    set_condition(
        &mut status.conditions,
        condition(
            READY_CONDITION,
            true,
            "Issued",
            format!("Credentials stored in secret '{secret}'"),
            now,
        ),
    );
    set_condition(
        &mut status.conditions,
        condition(
            SUBJECT_CONDITION,
            true,
            "SubjectMatchesSpec",
            SUBJECT_IN_SYNC_MESSAGE.to_string(),
            now,
        ),
    );

    let not_after = DateTime::<Utc>::from_timestamp(info.not_after, 0);
    status.not_after = not_after.map(|t| t.to_rfc3339());
    status.renewal_time = not_after
        .map(|t| t - Duration::days(certificate.spec.renew_before_days.max(0)))
        .map(|t| t.to_rfc3339());
    status.serial_number = Some(info.serial_hex.clone());
    status
}

/// Status once the stored credentials are missing, past `NotAfter` or no
/// longer chain to the current root
#[must_use]
pub fn expired_status(
    certificate: &Certificate,
    reason: ExpiryReason,
    now: DateTime<Utc>,
) -> CertificateStatus {
    let secret = certificate.spec.secret_ref.name.as_str();
    let message = match reason {
        ExpiryReason::SecretMissing => format!("Secret '{secret}' not found, re-issuing"),
        ExpiryReason::CertificateExpired => {
            format!("Certificate in secret '{secret}' has expired, re-issuing")
        }
        ExpiryReason::UntrustedIssuer => format!(
            "Certificate in secret '{secret}' was not issued by the current root CA, re-issuing"
        ),
    };

    let mut status = base_status(certificate, CertificateState::Expired, now);
    status.description = Some(message.clone());
    if reason != ExpiryReason::SecretMissing {
        // Keep the stale expiry and serial visible until re-issue replaces them
        if let Some(previous) = certificate.status.as_ref() {
            status.not_after.clone_from(&previous.not_after);
            status.serial_number.clone_from(&previous.serial_number);
        }
    }
    set_condition(
        &mut status.conditions,
        condition(READY_CONDITION, false, reason.as_str(), message, now),
    );
    status
}

/// Current status with the subject condition updated
///
/// Returns the input unchanged when the condition already has this value.
#[must_use]
pub fn with_subject_condition(
    mut status: CertificateStatus,
    in_sync: bool,
    message: String,
    now: DateTime<Utc>,
) -> CertificateStatus {
    let reason = if in_sync {
        "SubjectMatchesSpec"
    } else {
        "SubjectDrift"
    };
    set_condition(
        &mut status.conditions,
        condition(SUBJECT_CONDITION, in_sync, reason, message, now),
    );
    status
}

fn base_status(
    certificate: &Certificate,
    state: CertificateState,
    now: DateTime<Utc>,
) -> CertificateStatus {
    let previous = certificate.status.as_ref();
    let last_transition_time = match previous {
        Some(p) if p.state == Some(state) => p.last_transition_time.clone(),
        _ => Some(now.to_rfc3339()),
    };
    CertificateStatus {
        state: Some(state),
        conditions: previous.map(|p| p.conditions.clone()).unwrap_or_default(),
        observed_generation: certificate.metadata.generation,
        last_transition_time,
        ..CertificateStatus::default()
    }
}

fn condition(
    r#type: &str,
    status: bool,
    reason: &str,
    message: String,
    now: DateTime<Utc>,
) -> Condition {
    Condition {
        r#type: r#type.to_string(),
        status: if status { "True" } else { "False" }.to_string(),
        last_transition_time: Some(now.to_rfc3339()),
        reason: Some(reason.to_string()),
        message: Some(message),
    }
}

/// Insert or replace a condition by type
///
/// The transition time only moves when the condition status flips.
fn set_condition(conditions: &mut Vec<Condition>, mut new: Condition) {
    match conditions.iter_mut().find(|c| c.r#type == new.r#type) {
        Some(existing) => {
            if existing.status == new.status {
                new.last_transition_time.clone_from(&existing.last_transition_time);
            }
            *existing = new;
        }
        None => conditions.push(new),
    }
}
