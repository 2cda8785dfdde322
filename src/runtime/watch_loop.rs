//! # Watch Loop
//!
//! Controller watch loop that monitors `Certificate` resources and the Secrets
//! they own, triggering reconciliation when either changes.

use crate::config::SharedControllerConfig;
use crate::constants::{MANAGED_BY_LABEL, MANAGER_NAME};
use crate::controller::reconciler::{reconcile, Reconciler};
use crate::controller::server::ServerState;
use crate::crd::Certificate;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube_runtime::{controller, watcher, Controller};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Run the controller watch loop
///
/// Deleting a managed Secret or changing a Certificate triggers a
/// reconciliation. The loop restarts the watch when the stream ends and exits
/// once a shutdown signal has been received.
pub async fn run_watch_loop(
    certificates: Api<Certificate>,
    secrets: Api<Secret>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    controller_config: SharedControllerConfig,
) -> Result<(), anyhow::Error> {
    info!("Starting controller watch loop...");

    let backoff_duration_ms = Arc::new(AtomicU64::new(controller_config.backoff_start_ms));

    // Mark the server not ready on SIGINT/SIGTERM so the pod leaves the endpoints
    // and the loop below stops instead of restarting the controller
    spawn_shutdown_listener(server_state.clone());

    let managed_secrets =
        watcher::Config::default().labels(&format!("{MANAGED_BY_LABEL}={MANAGER_NAME}"));
    let controller_settings = controller::Config::default()
        .concurrency(controller_config.max_concurrent_reconciliations);

    loop {
        if !server_state.ready() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let backoff = backoff_duration_ms.clone();
        let config = controller_config.clone();
        let watch_span = tracing::span!(
            tracing::Level::INFO,
            "controller.watch",
            operation = "watch_loop"
        );

        Controller::new(certificates.clone(), watcher::Config::default().any_semantic())
            .owns(secrets.clone(), managed_secrets.clone())
            .with_config(controller_settings.clone())
            .shutdown_on_signal()
            .run(reconcile, handle_reconciliation_error, reconciler.clone())
            .filter_map(move |x| {
                let backoff = backoff.clone();
                let config = config.clone();
                async move {
                    match &x {
                        Ok((object, action)) => {
                            backoff.store(config.backoff_start_ms, Ordering::Relaxed);
                            debug!(
                                resource.name = object.name.as_str(),
                                action = ?action,
                                "watch.event.reconciled"
                            );
                            Some(x)
                        }
                        Err(e) => {
                            let error_string = format!("{e:?}");
                            handle_watch_stream_error(
                                &error_string,
                                &backoff,
                                config.backoff_max_ms,
                                config.watch_restart_delay_duration(),
                            )
                            .await
                            .map(|()| x)
                        }
                    }
                }
            })
            .for_each(|_| futures::future::ready(()))
            .instrument(watch_span)
            .await;

        if !server_state.ready() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let delay = controller_config.watch_restart_delay_after_end_duration();
        warn!(
            "Controller watch stream ended, restarting in {} seconds...",
            delay.as_secs()
        );
        tokio::time::sleep(delay).await;
    }

    info!("Controller stopped gracefully");
    Ok(())
}

/// Flip readiness off once SIGINT or SIGTERM arrives
///
/// The SIGTERM handler is installed before returning, so a signal sent right
/// after this call is not lost.
fn spawn_shutdown_listener(server_state: Arc<ServerState>) -> JoinHandle<()> {
    let sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => Some(stream),
        Err(e) => {
            warn!("Failed to install SIGTERM handler, listening for SIGINT only: {e}");
            None
        }
    };

    tokio::spawn(async move {
        let received = shutdown_signal(sigterm).await;
        info!("Received {received}, initiating graceful shutdown...");
        server_state.set_ready(false);
        info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
    })
}

/// Kubernetes stops pods with SIGTERM; SIGINT covers local runs
async fn shutdown_signal(sigterm: Option<Signal>) -> &'static str {
    match sigterm {
        Some(mut sigterm) => tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = tokio::signal::ctrl_c() => "SIGINT",
        },
        None => {
            let _ = tokio::signal::ctrl_c().await;
            "SIGINT"
        }
    }
}
