//! Active gateway configuration
//!
//! Holds the last successfully resolved configuration as an immutable,
//! versioned snapshot. Reconcile passes take one snapshot and use it for the
//! whole pass; updates build a new snapshot and swap it in.

use super::config::{resolve, ConfigError, GatewayConfigs};
use crate::apis::metrics::record_config_reload;
use crate::sync::{safe_read, safe_write};
use futures::channel::mpsc::UnboundedSender;
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::runtime::watcher;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{api::Api, Client, ResourceExt};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

/// Immutable view of the configuration at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Incremented on every swap; 0 means nothing was ever loaded
    pub version: u64,
    pub configs: GatewayConfigs,
}

/// Shared handle to the active configuration
///
/// Clones share the same underlying snapshot.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    current: Arc<RwLock<Arc<Snapshot>>>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-loaded with `configs` at version 1
    pub fn with_configs(configs: GatewayConfigs) -> Self {
        let store = Self::new();
        store.replace(configs);
        store
    }

    /// Current snapshot. Never blocks on a reconcile pass.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&safe_read(&self.current))
    }

    /// Resolve `data` and swap it in
    ///
    /// Returns `Ok(None)` when the document resolves to the configuration
    /// already in effect. On error the active snapshot is left untouched.
    pub fn update(&self, data: &BTreeMap<String, String>) -> Result<Option<Arc<Snapshot>>, ConfigError> {
        let configs = resolve(data)?;
        if self.snapshot().configs == configs {
            return Ok(None);
        }
        Ok(Some(self.replace(configs)))
    }

    fn replace(&self, configs: GatewayConfigs) -> Arc<Snapshot> {
        let mut guard = safe_write(&self.current);
        let next = Arc::new(Snapshot {
            version: guard.version + 1,
            configs,
        });
        *guard = Arc::clone(&next);
        next
    }
}

/// Apply one ConfigMap to the store and notify the reconciler on change
fn apply_config_map(store: &ConfigStore, cm: &ConfigMap, trigger: &UnboundedSender<()>) {
    let empty = BTreeMap::new();
    let data = cm.data.as_ref().unwrap_or(&empty);

    match store.update(data) {
        Ok(Some(snapshot)) => {
            info!(
                configmap = %cm.name_any(),
                version = snapshot.version,
                external = snapshot.configs.external.is_some(),
                local = snapshot.configs.cluster_local.is_some(),
                "Gateway configuration updated"
            );
            record_config_reload("success");
            if trigger.unbounded_send(()).is_err() {
                warn!("Ingress controller is gone, configuration change not propagated");
            }
        }
        Ok(None) => {
            debug!(configmap = %cm.name_any(), "Gateway configuration unchanged");
        }
        Err(e) => {
            error!(
                configmap = %cm.name_any(),
                error = %e,
                "Rejected gateway configuration, keeping previous"
            );
            record_config_reload("invalid");
        }
    }
}

/// Watch the gateway ConfigMap and keep `store` current
///
/// Runs until the watch stream ends. Every accepted change sends one
/// message on `trigger` so all Ingresses are reconciled against it.
pub async fn watch_gateway_config(
    client: Client,
    namespace: String,
    name: String,
    store: ConfigStore,
    trigger: UnboundedSender<()>,
) -> Result<(), kube::Error> {
    let api: Api<ConfigMap> = Api::namespaced(client, &namespace);
    let config = WatcherConfig::default().fields(&format!("metadata.name={}", name));
    let watcher = watcher(api, config);

    futures::pin_mut!(watcher);

    info!(namespace = %namespace, name = %name, "Starting gateway configuration watcher");

    while let Some(event) = watcher.next().await {
        match event {
            Ok(watcher::Event::Apply(cm)) | Ok(watcher::Event::InitApply(cm)) => {
                apply_config_map(&store, &cm, &trigger);
            }
            Ok(watcher::Event::Delete(cm)) => {
                warn!(
                    configmap = %cm.name_any(),
                    "Gateway configuration deleted, keeping last known configuration"
                );
            }
            Ok(watcher::Event::Init) => {
                debug!("Gateway configuration watcher initialized");
            }
            Ok(watcher::Event::InitDone) => {
                info!("Gateway configuration watcher initial sync complete");
            }
            Err(e) => {
                warn!("Gateway configuration watcher error: {}", e);
            }
        }
    }

    Ok(())
}
