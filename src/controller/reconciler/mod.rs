//! # Reconciler
//!
//! Reconciliation logic for `Certificate` resources.
//!
//! The reconciler:
//! - Issues a leaf certificate for every new or expired `Certificate`
//! - Stores it in an immutable, owner-referenced TLS Secret
//! - Marks the `Certificate` `Expired` when the Secret disappears or expires
//! - Reports subject drift through the `SubjectInSync` condition

pub mod drift;
pub mod reconcile;
pub mod status;
pub mod types;

pub use reconcile::{reconcile, reconcile_certificate, requeue_action};
pub use types::{Reconciler, ReconcilerError, Requeue};
