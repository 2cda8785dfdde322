//! # Controller
//!
//! Core controller modules for the Certificate Manager.
//!
//! - `reconciler`: Certificate state machine
//! - `server`: HTTP server for metrics and health checks

pub mod reconciler;
pub mod server;
