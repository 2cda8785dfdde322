//! Certificate Manager Library
//!
//! A private certificate authority and the Kubernetes controller that keeps
//! one TLS Secret fresh for every `Certificate` resource.
//!
//! ## Quick Start
//!
//! ```rust
//! use certificate_manager::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod ca;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod store;
