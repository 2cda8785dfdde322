//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loop.
//! This module handles reconciliation errors and watch stream errors.

use crate::constants::{DEFAULT_CONTROLLER_NAMESPACE, MANAGER_NAME};
use crate::controller::reconciler::{requeue_action, Reconciler, ReconcilerError, Requeue};
use crate::crd::Certificate;
use crate::observability;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Handle reconciliation errors with a fixed backoff per error class
///
/// Failed writes come back after the short backoff, everything else after
/// the long one. There is no retry ceiling; the consecutive error count is
/// only reported.
pub fn handle_reconciliation_error(
    obj: Arc<Certificate>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.name = name.as_str(),
        resource.namespace = namespace.as_str(),
        error.kind = error.kind(),
        error = %error
    );
    let _error_guard = error_span.enter();

    let resource_key = format!("{namespace}/{name}");
    let error_count = ctx.record_error(&resource_key);

    error!("Reconciliation error for {}: {}", resource_key, error);
    observability::metrics::increment_reconciliation_errors(error.kind());

    let requeue = error.requeue();
    let action = requeue_action(requeue, &ctx.config);
    let delay = match requeue {
        Requeue::Shortly => ctx.config.short_requeue_secs,
        _ => ctx.config.error_requeue_secs,
    };
    info!(
        "🔄 Retrying in {}s (error count: {}, reason: {})",
        delay,
        error_count,
        requeue.as_str()
    );

    observability::metrics::increment_requeues_total(requeue.as_str());
    action
}

/// Handle watch stream errors with appropriate classification and backoff
///
/// Classifies watch errors (401, 410, 429, not found) and applies the matching
/// handling strategy.
///
/// Returns `None` to filter out the error (allow restart) or `Some(())` to continue.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff: &Arc<AtomicU64>,
    max_backoff_ms: u64,
    watch_restart_delay: Duration,
) -> Option<()> {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error_string
    );
    let _error_guard = error_span.enter();

    match classify_watch_error(error_string) {
        WatchErrorClass::Unauthorized => {
            log_rbac_diagnostics();
            warn!(
                "⏳ Waiting {}s before retrying watch (RBAC may need time to propagate)...",
                watch_restart_delay.as_secs()
            );
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
        WatchErrorClass::Gone => {
            warn!(
                error_type = "410",
                "Watch resource version expired (410) - this is normal during pod restarts, watch will restart"
            );
            None
        }
        WatchErrorClass::TooManyRequests => {
            let current_backoff = backoff.load(Ordering::Relaxed);
            warn!(
                "API server storage reinitializing (429), backing off for {}ms before restart...",
                current_backoff
            );
            tokio::time::sleep(Duration::from_millis(current_backoff)).await;
            backoff.store(
                next_backoff_ms(current_backoff, max_backoff_ms),
                Ordering::Relaxed,
            );
            None
        }
        WatchErrorClass::NotFound => {
            let resource_info = if error_string.contains("integer `404`") {
                "CRD or resource may have been deleted (404 returned as plain text)"
            } else if error_string.contains("Certificate") {
                "Certificate resource"
            } else if error_string.contains("Secret") {
                "Secret resource"
            } else {
                "Resource"
            };
            warn!(
                "{} not found (404) - this may be normal if resource was deleted or CRD is missing. Error: {}",
                resource_info, error_string
            );
            Some(())
        }
        WatchErrorClass::Other => {
            error!("Controller stream error: {}", error_string);
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchErrorClass {
    Unauthorized,
    Gone,
    TooManyRequests,
    NotFound,
    Other,
}

/// Classify a controller stream error by its rendered text
///
/// 404 is checked before 401: a plain-text 404 surfaces as a serde error
/// that also mentions `WatchFailed`.
pub(crate) fn classify_watch_error(error_string: &str) -> WatchErrorClass {
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");
    let is_401 =
        (error_string.contains("401") || error_string.contains("Unauthorized")) && !is_not_found;
    let is_410 = error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Gone");
    let is_429 = error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests");

    if is_401 {
        WatchErrorClass::Unauthorized
    } else if is_410 {
        WatchErrorClass::Gone
    } else if is_429 {
        WatchErrorClass::TooManyRequests
    } else if is_not_found {
        WatchErrorClass::NotFound
    } else {
        WatchErrorClass::Other
    }
}

fn next_backoff_ms(current_ms: u64, max_ms: u64) -> u64 {
    current_ms.saturating_mul(2).min(max_ms)
}

fn log_rbac_diagnostics() {
    let namespace = std::env::var("POD_NAMESPACE")
        .unwrap_or_else(|_| DEFAULT_CONTROLLER_NAMESPACE.to_string());
    error!(
        "❌ Watch authentication failed (401 Unauthorized) - RBAC may have been revoked or token expired"
    );
    error!("🔍 SRE Diagnostics:");
    error!("   1. Verify ClusterRole '{MANAGER_NAME}' still exists:");
    error!("      kubectl get clusterrole {MANAGER_NAME}");
    error!("   2. Verify ClusterRoleBinding still binds ServiceAccount:");
    error!("      kubectl get clusterrolebinding {MANAGER_NAME} -o yaml");
    error!("   3. Verify ServiceAccount still exists:");
    error!("      kubectl get sa {MANAGER_NAME} -n {namespace}");
    error!("   4. Verify RBAC permissions are still active:");
    error!(
        "      kubectl auth can-i list certificates.certs.k8c.io --as=system:serviceaccount:{namespace}:{MANAGER_NAME} --all-namespaces"
    );
    error!(
        "      kubectl auth can-i create secrets --as=system:serviceaccount:{namespace}:{MANAGER_NAME} --all-namespaces"
    );
    error!("   5. If RBAC was recently changed, restart the controller pod:");
    error!("      kubectl delete pod -n {namespace} -l app={MANAGER_NAME}");
}
