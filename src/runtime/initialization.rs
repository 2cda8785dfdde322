//! # Initialization
//!
//! Controller initialization logic including rustls setup, tracing, metrics,
//! server startup, Kubernetes client setup and loading the root CA.

use crate::config::{load_shared_config, SharedControllerConfig, SharedServerConfig};
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::crd::Certificate;
use crate::observability;
use crate::store::{load_or_bootstrap_authority, KubeCredentialStore};
use anyhow::{Context, Result};
use kube::{api::Api, Client};
use std::sync::Arc;
use tracing::{error, info};

/// Initialization result containing all necessary components for the controller
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// API for the Certificate CRD across all namespaces
    pub certificates: Api<Certificate>,
    /// Reconciler context
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
    pub controller_config: SharedControllerConfig,
    pub server_config: SharedServerConfig,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.ready())
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Kubernetes client creation
/// - Loading or bootstrapping the root CA (fatal on failure)
/// - Reconciler setup
pub async fn initialize() -> Result<InitializationResult> {
    // Required for rustls 0.23+ when no default provider is set via features
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("Failed to install rustls crypto provider");
    }

    let (controller_config, server_config) = load_shared_config();

    observability::logging::init_tracing(&controller_config);

    info!("Starting Certificate Manager");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::new());

    // Start server in background task
    let server_state_clone = server_state.clone();
    let server_port = server_config.metrics_port;
    let request_tracing = server_config.request_tracing;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone, request_tracing).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Readiness probes should pass as soon as the watch starts
    wait_for_server_ready(&server_state, &server_handle, &server_config).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let authority = load_or_bootstrap_authority(&client, &controller_config)
        .await
        .context("Failed to initialize root CA")?;
    let root = authority.root_info()?;
    info!(
        root.serial = root.serial_hex.as_str(),
        root.not_after = root.not_after,
        "🔐 Root CA ready"
    );

    let store = KubeCredentialStore::new(client.clone());
    let reconciler = Arc::new(Reconciler::new(
        Arc::new(authority),
        Arc::new(store),
        controller_config.clone(),
    ));

    let certificates: Api<Certificate> = Api::all(client.clone());

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        certificates,
        reconciler,
        server_state,
        controller_config,
        server_config,
    })
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    server_config: &SharedServerConfig,
) -> Result<()> {
    let startup_timeout = server_config.startup_timeout();
    let poll_interval = server_config.poll_interval();
    let start_time = std::time::Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state.ready() {
            info!("HTTP server is ready and accepting connections");
            break;
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }

    Ok(())
}
