//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use certificate_manager::prelude::*;
//! ```

// CRD types
pub use crate::crd::*;

// Certificate authority capability and its production implementation
pub use crate::ca::{
    CaError, CertAuthority, CertificateAuthority, CertificateInfo, IssueRequest,
    IssuedCredentials, RenewRequest,
};

// Credential persistence
pub use crate::store::{CredentialRecord, CredentialStore, KubeCredentialStore, StoreError};

// Reconciler types
pub use crate::controller::reconciler::{
    reconcile, reconcile_certificate, Reconciler, ReconcilerError, Requeue,
};

// Config types
pub use crate::config::{
    ControllerConfig, ServerConfig, SharedControllerConfig, SharedServerConfig,
};
