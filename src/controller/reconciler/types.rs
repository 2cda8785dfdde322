//! # Types
//!
//! Core types for the reconciler.

use crate::ca::{CaError, CertAuthority};
use crate::config::SharedControllerConfig;
use crate::store::{CredentialStore, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    /// The declared resource cannot be acted on
    #[error("invalid Certificate: {0}")]
    InvalidSpec(String),

    /// Issuance or decoding failed
    #[error("certificate authority error: {0}")]
    Authority(#[from] CaError),

    /// A read or delete against the store failed
    #[error("credential store error: {0}")]
    Store(#[from] StoreError),

    /// A write failed after credentials were generated
    #[error("failed to persist {stage}: {source}")]
    Persist {
        stage: &'static str,
        #[source]
        source: StoreError,
    },

    /// The blocking issuance task panicked or was cancelled
    #[error("issuance task failed: {0}")]
    Task(String),

    /// The driver gave up on the invocation
    #[error("reconciliation timed out after {0:?}")]
    Timeout(Duration),
}

impl ReconcilerError {
    /// Requeue policy for this error class
    ///
    /// Failed writes retry quickly: the next pass issues fresh material.
    /// Everything else waits for the long backoff.
    #[must_use]
    pub fn requeue(&self) -> Requeue {
        match self {
            ReconcilerError::Persist { .. } => Requeue::Shortly,
            _ => Requeue::Later,
        }
    }

    /// Short label used for metrics and structured logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcilerError::InvalidSpec(_) => "invalid_spec",
            ReconcilerError::Authority(e) => e.kind(),
            ReconcilerError::Store(_) => "store_unavailable",
            ReconcilerError::Persist { .. } => "persist_failure",
            ReconcilerError::Task(_) => "task_failure",
            ReconcilerError::Timeout(_) => "timeout",
        }
    }
}

/// How soon a resource should be reconciled again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Nothing to do until something changes
    None,
    /// Short backoff, after a state transition or failed write
    Shortly,
    /// Long backoff, after an unexpected error
    Later,
}

impl Requeue {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Requeue::None => "none",
            Requeue::Shortly => "shortly",
            Requeue::Later => "later",
        }
    }
}

/// Shared reconciliation context
#[derive(Clone)]
pub struct Reconciler {
    pub authority: Arc<dyn CertAuthority>,
    pub store: Arc<dyn CredentialStore>,
    pub config: SharedControllerConfig,
    // Consecutive error count per resource (namespace/name), for logs and metrics
    pub error_counts: Arc<Mutex<HashMap<String, u32>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(
        authority: Arc<dyn CertAuthority>,
        store: Arc<dyn CredentialStore>,
        config: SharedControllerConfig,
    ) -> Self {
        Self {
            authority,
            store,
            config,
            error_counts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record a failed reconciliation and return the consecutive error count
    pub fn record_error(&self, resource_key: &str) -> u32 {
        match self.error_counts.lock() {
            Ok(mut counts) => {
                let count = counts.entry(resource_key.to_string()).or_insert(0);
                *count += 1;
                *count
            }
            Err(e) => {
                warn!("Failed to lock error_counts: {}", e);
                0
            }
        }
    }

    /// Forget errors after a successful reconciliation
    pub fn clear_errors(&self, resource_key: &str) {
        match self.error_counts.lock() {
            Ok(mut counts) => {
                counts.remove(resource_key);
            }
            Err(e) => warn!("Failed to lock error_counts: {}", e),
        }
    }

    /// Consecutive error count for a resource
    #[must_use]
    pub fn error_count(&self, resource_key: &str) -> u32 {
        self.error_counts
            .lock()
            .map(|counts| counts.get(resource_key).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}
