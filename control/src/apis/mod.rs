//! Kubernetes API integrations
//!
//! Gateway configuration, the Ingress reconciler and controller metrics.

pub mod gateway;
pub mod ingress;
pub mod metrics;
