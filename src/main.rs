//! # Certificate Manager
//!
//! Kubernetes controller issuing TLS credentials from a private CA for
//! `Certificate` resources.
//!
//! ## Overview
//!
//! 1. Loads the root CA from its Secret, or bootstraps and persists a new one
//! 2. Watches `Certificate` resources across all namespaces, and the Secrets they own
//! 3. Issues a leaf certificate into an immutable TLS Secret for each one
//! 4. Marks a `Certificate` `Expired` when its Secret is deleted or expires,
//!    then re-issues on the next pass
//!
//! Metrics and probes are served on `METRICS_PORT` (default 5000).

use anyhow::Result;
use certificate_manager::runtime::{initialize, run_watch_loop};
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;

    let secrets: Api<Secret> = Api::all(init.client.clone());
    run_watch_loop(
        init.certificates,
        secrets,
        init.reconciler,
        init.server_state,
        init.controller_config,
    )
    .await?;

    Ok(())
}
