//! Configuration for the netgate controller
//!
//! Process-level settings only. Gateway bindings come from the
//! `config-gateway` ConfigMap and live in `apis::gateway::store`.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Controller configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    /// Field manager and identity used for writes
    #[serde(default = "default_controller_name")]
    pub controller_name: String,

    /// Ingresses annotated with a different class are ignored
    #[serde(default = "default_ingress_class")]
    pub ingress_class: String,

    /// Namespace holding the gateway ConfigMap
    #[serde(default = "default_system_namespace")]
    pub system_namespace: String,

    #[serde(default = "default_config_map_name")]
    pub config_map_name: String,

    /// Suffix for service-reference addresses
    #[serde(default = "default_cluster_domain")]
    pub cluster_domain: String,

    /// Bind address of the metrics and health server
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// Requeue and retry policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Periodic resync of healthy Ingresses (default: 300s)
    #[serde(default = "default_requeue_interval")]
    pub requeue_interval_secs: u64,

    /// Requeue while waiting on asynchronous acceptance (default: 5s)
    #[serde(default = "default_pending_requeue")]
    pub pending_requeue_secs: u64,

    /// Consecutive transient failures before the Ingress is marked failed
    #[serde(default = "default_retry_limit")]
    pub limit: u32,

    /// First backoff delay in milliseconds (default: 500ms)
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// Backoff cap in seconds (default: 60s)
    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,
}

fn default_controller_name() -> String {
    "netgate.dev/ingress-controller".to_string()
}

fn default_ingress_class() -> String {
    "netgate.ingress.networking.knative.dev".to_string()
}

fn default_system_namespace() -> String {
    "netgate-system".to_string()
}

fn default_config_map_name() -> String {
    "config-gateway".to_string()
}

fn default_cluster_domain() -> String {
    "cluster.local".to_string()
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_requeue_interval() -> u64 {
    300
}

fn default_pending_requeue() -> u64 {
    5
}

fn default_retry_limit() -> u32 {
    8
}

fn default_backoff_base() -> u64 {
    500
}

fn default_backoff_max() -> u64 {
    60
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            requeue_interval_secs: default_requeue_interval(),
            pending_requeue_secs: default_pending_requeue(),
            limit: default_retry_limit(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_secs: default_backoff_max(),
        }
    }
}

impl RetryConfig {
    /// Exponential backoff for the given consecutive failure count (1-based)
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        let delay = self.backoff_base_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay).min(Duration::from_secs(self.backoff_max_secs))
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            controller_name: default_controller_name(),
            ingress_class: default_ingress_class(),
            system_namespace: default_system_namespace(),
            config_map_name: default_config_map_name(),
            cluster_domain: default_cluster_domain(),
            metrics_addr: default_metrics_addr(),
            retry: RetryConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let mut config = Self::default();

        if let Ok(val) = env::var("NETGATE_CONTROLLER_NAME") {
            config.controller_name = val;
        }
        if let Ok(val) = env::var("NETGATE_INGRESS_CLASS") {
            config.ingress_class = val;
        }
        if let Ok(val) = env::var("SYSTEM_NAMESPACE") {
            config.system_namespace = val;
        }
        if let Ok(val) = env::var("NETGATE_CONFIG_MAP") {
            config.config_map_name = val;
        }
        if let Ok(val) = env::var("NETGATE_CLUSTER_DOMAIN") {
            config.cluster_domain = val;
        }
        if let Ok(val) = env::var("NETGATE_METRICS_ADDR") {
            config.metrics_addr = val;
        }

        if let Ok(val) = env::var("NETGATE_REQUEUE_INTERVAL_SECS") {
            config.retry.requeue_interval_secs = val.parse()?;
        }
        if let Ok(val) = env::var("NETGATE_RETRY_LIMIT") {
            config.retry.limit = val.parse()?;
        }
        if let Ok(val) = env::var("NETGATE_BACKOFF_MAX_SECS") {
            config.retry.backoff_max_secs = val.parse()?;
        }

        Ok(config)
    }

    pub fn requeue_interval(&self) -> Duration {
        Duration::from_secs(self.retry.requeue_interval_secs)
    }

    pub fn pending_requeue(&self) -> Duration {
        Duration::from_secs(self.retry.pending_requeue_secs)
    }
}
