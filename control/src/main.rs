use anyhow::{anyhow, Result};
use control::apis::gateway::store::{watch_gateway_config, ConfigStore};
use control::apis::ingress::child_index::ChildIndex;
use control::apis::ingress::{IngressReconciler, KubeRouteClient};
use control::config::ControllerConfig;
use control::server;
use futures::channel::mpsc;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// netgate ingress controller
///
/// Watches Ingress resources and programs the configured Gateway API
/// implementation through HTTPRoutes and ReferenceGrants.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize rustls crypto provider (needed for Kubernetes TLS client)
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok(); // Ignore error if already installed

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config =
        ControllerConfig::from_env().map_err(|e| anyhow!("Invalid configuration: {}", e))?;

    info!("netgate ingress controller starting");
    info!("   Ingress class: {}", config.ingress_class);
    info!(
        "   Gateway config: {}/{}",
        config.system_namespace, config.config_map_name
    );

    let client = kube::Client::try_default().await?;

    // Config reloads and gateway address changes both reconcile every Ingress
    let (trigger_tx, trigger_rx) = mpsc::unbounded();

    let store = ConfigStore::new();
    let (route_client, watch_tasks) = KubeRouteClient::new(
        client.clone(),
        &config.controller_name,
        ChildIndex::new(),
        trigger_tx.clone(),
    );

    let mut handles = vec![];
    for task in watch_tasks {
        handles.push(tokio::spawn(task));
    }

    let cm_client = client.clone();
    let cm_namespace = config.system_namespace.clone();
    let cm_name = config.config_map_name.clone();
    let cm_store = store.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) =
            watch_gateway_config(cm_client, cm_namespace, cm_name, cm_store, trigger_tx).await
        {
            error!("Gateway configuration watcher error: {}", e);
        }
    }));

    let metrics_addr = config.metrics_addr.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = server::serve(&metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    }));

    let reconciler = IngressReconciler::new(Arc::new(route_client.clone()), store, config);
    let controller = async move {
        route_client
            .wait_until_ready()
            .await
            .map_err(|e| anyhow!("Cache never synced: {}", e))?;
        reconciler.run(client, trigger_rx).await?;
        Ok::<_, anyhow::Error>(())
    };

    info!("Press Ctrl-C to exit.");

    tokio::select! {
        result = controller => {
            if let Err(e) = result {
                error!("Ingress controller error: {}", e);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    for handle in handles {
        handle.abort();
    }

    Ok(())
}
