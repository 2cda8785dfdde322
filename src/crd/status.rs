//! # Certificate Status
//!
//! Status types for tracking certificate state and conditions.

use serde::{Deserialize, Serialize};

/// Lifecycle state reported in `status.state`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum CertificateState {
    /// Credentials exist and have not expired
    Valid,
    /// Credentials are missing or past `NotAfter` and will be re-issued
    Expired,
    /// Reserved; never written by this controller
    InProgress,
}

impl CertificateState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateState::Valid => "Valid",
            CertificateState::Expired => "Expired",
            CertificateState::InProgress => "InProgress",
        }
    }
}

impl std::fmt::Display for CertificateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of the Certificate resource
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertificateStatus {
    /// Current certificate state; unset until the first issuance
    #[serde(default)]
    pub state: Option<CertificateState>,
    /// Human-readable description of the current state
    #[serde(default)]
    pub description: Option<String>,
    /// Conditions represent the latest available observations
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Generation of the spec the status was computed from
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// When `state` last changed (RFC3339)
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Expiry of the stored certificate (RFC3339)
    #[serde(default)]
    pub not_after: Option<String>,
    /// `notAfter` minus `spec.renewBeforeDays` (RFC3339)
    #[serde(default)]
    pub renewal_time: Option<String>,
    /// Serial number of the stored certificate, hex encoded
    #[serde(default)]
    pub serial_number: Option<String>,
}

impl CertificateStatus {
    /// Look up a condition by type
    #[must_use]
    pub fn condition(&self, r#type: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == r#type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,
    pub status: String,
    #[serde(default)]
    pub last_transition_time: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
