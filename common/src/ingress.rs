//! Neutral Ingress resource
//!
//! The vendor-neutral routing intent written by serving systems. The control
//! plane reads `spec` and owns `status`.

use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Ingress specification
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[kube(
    group = "networking.internal.knative.dev",
    version = "v1alpha1",
    kind = "Ingress",
    plural = "ingresses",
    shortname = "kingress",
    namespaced,
    status = "IngressStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct IngressSpec {
    #[serde(default)]
    pub rules: Vec<IngressRule>,

    /// Plain HTTP handling for External rules
    #[serde(default)]
    pub http_option: HttpOption,
}

/// Whether a rule is reachable from outside the cluster or only within it
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Visibility {
    #[default]
    External,
    ClusterLocal,
}

impl Visibility {
    pub const ALL: [Visibility; 2] = [Visibility::External, Visibility::ClusterLocal];

    /// Short form used in child resource names and log fields
    pub fn short_name(&self) -> &'static str {
        match self {
            Visibility::External => "ext",
            Visibility::ClusterLocal => "local",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::External => write!(f, "External"),
            Visibility::ClusterLocal => write!(f, "ClusterLocal"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HttpOption {
    /// Serve plain HTTP traffic
    #[default]
    Enabled,
    /// Redirect plain HTTP traffic to HTTPS
    Redirected,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngressRule {
    /// Hostnames served by this rule (set semantics, order is not significant)
    #[serde(default)]
    pub hosts: Vec<String>,

    #[serde(default)]
    pub visibility: Visibility,

    #[serde(default)]
    pub paths: Vec<PathRule>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PathRule {
    /// Path prefix to match; `/` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Headers set on every request before the split decision
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub append_headers: BTreeMap<String, String>,

    #[serde(default)]
    pub splits: Vec<Split>,

    /// Routing tag; requests carrying it in the tag header match this rule first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    /// Request timeout in Gateway API duration format (e.g. `30s`, `1h`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite_host: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Split {
    pub backend_ref: BackendRef,

    /// Traffic share in percent (0-100)
    #[serde(default)]
    pub percent: u32,

    /// Headers set only on traffic sent to this backend
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub append_headers: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_protocol: Option<AppProtocol>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackendRef {
    pub namespace: String,
    pub name: String,
    pub port: i32,
}

impl fmt::Display for BackendRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.name, self.port)
    }
}

/// Protocol spoken by a backend when it is not plain HTTP/1.1
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AppProtocol {
    H2c,
    Websocket,
}

// =============================================================================
// Status
// =============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngressStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Addresses serving External rules
    #[serde(default)]
    pub public_addresses: Vec<LoadBalancerAddress>,

    /// Addresses serving ClusterLocal rules
    #[serde(default)]
    pub private_addresses: Vec<LoadBalancerAddress>,
}

impl IngressStatus {
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// True when the Ready condition is present and True
    pub fn is_ready(&self) -> bool {
        self.condition(CONDITION_READY)
            .map(|c| c.status == ConditionStatus::True)
            .unwrap_or(false)
    }
}

pub const CONDITION_NETWORK_CONFIGURED: &str = "NetworkConfigured";
pub const CONDITION_LOAD_BALANCER_READY: &str = "LoadBalancerReady";
pub const CONDITION_READY: &str = "Ready";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,

    pub status: ConditionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// RFC 3339 timestamp of the last status change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl Condition {
    pub fn new(type_: &str, status: ConditionStatus) -> Self {
        Self {
            type_: type_.to_string(),
            status,
            reason: None,
            message: None,
            last_transition_time: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>, message: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self.message = Some(message.into());
        self
    }

    /// Equality on everything except the transition timestamp
    pub fn same_state(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

/// One reachable address of a load balancer
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerAddress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Cluster-internal DNS name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_internal: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ingress_spec_deserializes_defaults() {
        let spec: IngressSpec = serde_json::from_value(json!({
            "rules": [{
                "hosts": ["hello.default.example.com"],
                "paths": [{
                    "splits": [{
                        "backendRef": {"namespace": "default", "name": "hello", "port": 80},
                        "percent": 100
                    }]
                }]
            }]
        }))
        .unwrap();

        assert_eq!(spec.http_option, HttpOption::Enabled);
        assert_eq!(spec.rules[0].visibility, Visibility::External);
        assert!(spec.rules[0].paths[0].path.is_none());
        assert!(spec.rules[0].paths[0].append_headers.is_empty());
    }

    #[test]
    fn test_visibility_wire_names() {
        assert_eq!(
            serde_json::to_value(Visibility::ClusterLocal).unwrap(),
            json!("ClusterLocal")
        );
        assert_eq!(
            serde_json::from_value::<Visibility>(json!("External")).unwrap(),
            Visibility::External
        );
    }

    #[test]
    fn test_condition_same_state_ignores_timestamp() {
        let mut a = Condition::new(CONDITION_READY, ConditionStatus::True);
        let mut b = a.clone();
        a.last_transition_time = Some("2024-01-01T00:00:00Z".to_string());
        b.last_transition_time = Some("2025-06-01T12:00:00Z".to_string());
        assert!(a.same_state(&b));

        b.status = ConditionStatus::False;
        assert!(!a.same_state(&b));
    }

    #[test]
    fn test_status_is_ready() {
        let mut status = IngressStatus::default();
        assert!(!status.is_ready(), "Missing Ready condition is not ready");

        status
            .conditions
            .push(Condition::new(CONDITION_READY, ConditionStatus::True));
        assert!(status.is_ready());
    }
}
