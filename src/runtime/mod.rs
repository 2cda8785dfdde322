//! # Runtime
//!
//! Process bootstrap and the kube-runtime watch loop that drives the
//! reconciler.
//!
//! - `initialization`: rustls, tracing, metrics, HTTP server, client, root CA
//! - `watch_loop`: `Controller` setup with restart on stream end
//! - `error_policy`: requeue policy for failed reconciliations and stream errors

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;

pub use initialization::{initialize, InitializationResult};
pub use watch_loop::run_watch_loop;
