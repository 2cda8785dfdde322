//! # Custom Resource Definitions
//!
//! CRD types for the certificate manager.
//!
//! ## Module Structure
//!
//! - `spec.rs` - `Certificate` specification and default values
//! - `status.rs` - Status types for tracking certificate state

mod spec;
mod status;

pub use spec::{
    default_renew_before_days, default_valid_for_days, Certificate, CertificateSpec, SecretRef,
};
pub use status::{CertificateState, CertificateStatus, Condition};
