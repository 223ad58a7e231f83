//! Gateway configuration resolver
//!
//! Turns the `config-gateway` document into one optional gateway binding per
//! visibility. Each key holds a YAML list with at most one entry:
//!
//! ```yaml
//! external-gateways: |
//!   - class: istio
//!     gateway: istio-system/knative-gateway
//!     service: istio-system/istio-ingressgateway
//!     http-listener-name: http
//!     supported-features:
//!     - HTTPRouteRequestTimeout
//! ```

use common::Visibility;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;
use tracing::warn;

pub const EXTERNAL_GATEWAYS_KEY: &str = "external-gateways";
pub const LOCAL_GATEWAYS_KEY: &str = "local-gateways";

/// Configuration document errors. None of them are retryable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unable to parse {key}: {cause}")]
    Parse { key: &'static str, cause: String },

    #[error("only a single {visibility} gateway is supported")]
    MultipleGateways { visibility: &'static str },

    #[error("{key}: missing required field \"{field}\"")]
    MissingField {
        key: &'static str,
        field: &'static str,
    },

    #[error("{key}: failed to parse \"{field}\" value {value:?}, expected namespace/name")]
    InvalidReference {
        key: &'static str,
        field: &'static str,
        value: String,
    },
}

/// Optional capabilities of a backing proxy, named after the Gateway API
/// conformance features
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Feature {
    RequestTimeout,
    HostRewrite,
    SchemeRedirect,
    BackendProtocolH2C,
    BackendProtocolWebSocket,
    BackendHeaderModifier,
}

impl Feature {
    pub const ALL: [Feature; 6] = [
        Feature::RequestTimeout,
        Feature::HostRewrite,
        Feature::SchemeRedirect,
        Feature::BackendProtocolH2C,
        Feature::BackendProtocolWebSocket,
        Feature::BackendHeaderModifier,
    ];

    /// Conformance feature name, as listed in `supported-features`
    pub fn wire_name(&self) -> &'static str {
        match self {
            Feature::RequestTimeout => "HTTPRouteRequestTimeout",
            Feature::HostRewrite => "HTTPRouteHostRewrite",
            Feature::SchemeRedirect => "HTTPRouteSchemeRedirect",
            Feature::BackendProtocolH2C => "HTTPRouteBackendProtocolH2C",
            Feature::BackendProtocolWebSocket => "HTTPRouteBackendProtocolWebSocket",
            Feature::BackendHeaderModifier => "HTTPRouteBackendRequestHeaderModification",
        }
    }

    pub fn from_wire(name: &str) -> Option<Feature> {
        Feature::ALL.into_iter().find(|f| f.wire_name() == name)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// `namespace/name` reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Both segments must be present and non-empty
    fn parse(value: &str) -> Option<Self> {
        let (namespace, name) = value.split_once('/')?;
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::new(namespace, name))
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Resolved binding of one visibility to a gateway listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub class: String,
    pub gateway: NamespacedName,
    pub listener_name: String,
    /// Service fronting the gateway; when absent the Gateway's own status
    /// addresses are used
    pub service: Option<NamespacedName>,
    pub supported_features: BTreeSet<Feature>,
}

impl GatewayConfig {
    #[inline]
    pub fn supports(&self, feature: Feature) -> bool {
        self.supported_features.contains(&feature)
    }
}

/// Per-visibility bindings; `None` means no gateway serves that visibility
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayConfigs {
    pub external: Option<GatewayConfig>,
    pub cluster_local: Option<GatewayConfig>,
}

impl GatewayConfigs {
    pub fn get(&self, visibility: Visibility) -> Option<&GatewayConfig> {
        match visibility {
            Visibility::External => self.external.as_ref(),
            Visibility::ClusterLocal => self.cluster_local.as_ref(),
        }
    }

    fn slot(&mut self, visibility: Visibility) -> &mut Option<GatewayConfig> {
        match visibility {
            Visibility::External => &mut self.external,
            Visibility::ClusterLocal => &mut self.cluster_local,
        }
    }
}

fn document_key(visibility: Visibility) -> &'static str {
    match visibility {
        Visibility::External => EXTERNAL_GATEWAYS_KEY,
        Visibility::ClusterLocal => LOCAL_GATEWAYS_KEY,
    }
}

fn visibility_label(visibility: Visibility) -> &'static str {
    match visibility {
        Visibility::External => "external",
        Visibility::ClusterLocal => "local",
    }
}

/// One list entry as written in the document
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
struct RawEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    class: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    gateway: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    service: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    http_listener_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    supported_features: Vec<String>,
}

impl RawEntry {
    fn resolve(self, key: &'static str) -> Result<GatewayConfig, ConfigError> {
        let class = self
            .class
            .filter(|c| !c.is_empty())
            .ok_or(ConfigError::MissingField { key, field: "class" })?;

        let gateway = self.gateway.ok_or(ConfigError::MissingField {
            key,
            field: "gateway",
        })?;
        let gateway =
            NamespacedName::parse(&gateway).ok_or_else(|| ConfigError::InvalidReference {
                key,
                field: "gateway",
                value: gateway.clone(),
            })?;

        let service = match self.service {
            Some(service) => Some(NamespacedName::parse(&service).ok_or_else(|| {
                ConfigError::InvalidReference {
                    key,
                    field: "service",
                    value: service.clone(),
                }
            })?),
            None => None,
        };

        let listener_name = self
            .http_listener_name
            .filter(|l| !l.is_empty())
            .ok_or(ConfigError::MissingField {
                key,
                field: "http-listener-name",
            })?;

        let mut supported_features = BTreeSet::new();
        for name in &self.supported_features {
            match Feature::from_wire(name) {
                Some(feature) => {
                    supported_features.insert(feature);
                }
                None => warn!(key = key, feature = %name, "Ignoring unknown supported feature"),
            }
        }

        Ok(GatewayConfig {
            class,
            gateway,
            listener_name,
            service,
            supported_features,
        })
    }

    fn from_config(config: &GatewayConfig) -> Self {
        Self {
            class: Some(config.class.clone()),
            gateway: Some(config.gateway.to_string()),
            service: config.service.as_ref().map(NamespacedName::to_string),
            http_listener_name: Some(config.listener_name.clone()),
            supported_features: config
                .supported_features
                .iter()
                .map(|f| f.wire_name().to_string())
                .collect(),
        }
    }
}

/// Resolve the configuration document into per-visibility bindings
///
/// All-or-nothing: any error leaves the caller with nothing to apply.
pub fn resolve(data: &BTreeMap<String, String>) -> Result<GatewayConfigs, ConfigError> {
    let mut configs = GatewayConfigs::default();

    for visibility in Visibility::ALL {
        let key = document_key(visibility);
        let Some(raw) = data.get(key) else {
            continue;
        };
        if raw.trim().is_empty() {
            continue;
        }

        let entries: Option<Vec<RawEntry>> =
            serde_yaml::from_str(raw).map_err(|e| ConfigError::Parse {
                key,
                cause: e.to_string(),
            })?;
        let mut entries = entries.unwrap_or_default();

        if entries.len() > 1 {
            return Err(ConfigError::MultipleGateways {
                visibility: visibility_label(visibility),
            });
        }

        if let Some(entry) = entries.pop() {
            *configs.slot(visibility) = Some(entry.resolve(key)?);
        }
    }

    Ok(configs)
}

/// Serialize bindings back into document form
pub fn to_document(configs: &GatewayConfigs) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut data = BTreeMap::new();

    for visibility in Visibility::ALL {
        let key = document_key(visibility);
        if let Some(config) = configs.get(visibility) {
            let entries = vec![RawEntry::from_config(config)];
            let yaml = serde_yaml::to_string(&entries).map_err(|e| ConfigError::Parse {
                key,
                cause: e.to_string(),
            })?;
            data.insert(key.to_string(), yaml);
        }
    }

    Ok(data)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn doc(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    const EXTERNAL: &str = r#"
- class: istio
  gateway: istio-system/knative-gateway
  service: istio-system/istio-ingressgateway
  http-listener-name: http
  supported-features:
  - HTTPRouteRequestTimeout
  - HTTPRouteHostRewrite
"#;

    const LOCAL: &str = r#"
- class: istio
  gateway: istio-system/knative-local-gateway
  http-listener-name: http
"#;

    #[test]
    fn test_resolve_both_visibilities() {
        let configs = resolve(&doc(&[
            (EXTERNAL_GATEWAYS_KEY, EXTERNAL),
            (LOCAL_GATEWAYS_KEY, LOCAL),
        ]))
        .unwrap();

        let external = configs.external.as_ref().unwrap();
        assert_eq!(external.class, "istio");
        assert_eq!(
            external.gateway,
            NamespacedName::new("istio-system", "knative-gateway")
        );
        assert_eq!(external.listener_name, "http");
        assert_eq!(
            external.service,
            Some(NamespacedName::new("istio-system", "istio-ingressgateway"))
        );
        assert!(external.supports(Feature::RequestTimeout));
        assert!(external.supports(Feature::HostRewrite));
        assert!(!external.supports(Feature::SchemeRedirect));

        let local = configs.cluster_local.as_ref().unwrap();
        assert_eq!(local.service, None, "Service reference is optional");
        assert!(local.supported_features.is_empty());
    }

    #[test]
    fn test_missing_keys_mean_no_binding() {
        let configs = resolve(&doc(&[("_example", "ignored")])).unwrap();
        assert_eq!(configs, GatewayConfigs::default());

        let configs = resolve(&doc(&[(EXTERNAL_GATEWAYS_KEY, "[]")])).unwrap();
        assert!(configs.external.is_none(), "Empty list means no binding");
    }

    #[test]
    fn test_multiple_entries_rejected() {
        let two = format!("{}{}", EXTERNAL, LOCAL);

        let err = resolve(&doc(&[(EXTERNAL_GATEWAYS_KEY, &two)])).unwrap_err();
        assert_eq!(err.to_string(), "only a single external gateway is supported");

        let err = resolve(&doc(&[(LOCAL_GATEWAYS_KEY, &two)])).unwrap_err();
        assert_eq!(err.to_string(), "only a single local gateway is supported");
    }

    #[test]
    fn test_missing_class_names_field() {
        let err = resolve(&doc(&[(
            EXTERNAL_GATEWAYS_KEY,
            "- gateway: ns/gw\n  http-listener-name: http\n",
        )]))
        .unwrap_err();

        assert!(err.to_string().contains("\"class\""), "got: {}", err);
    }

    #[test]
    fn test_missing_listener_names_field() {
        let err = resolve(&doc(&[(
            LOCAL_GATEWAYS_KEY,
            "- class: istio\n  gateway: ns/gw\n",
        )]))
        .unwrap_err();

        assert!(
            err.to_string().contains("\"http-listener-name\""),
            "got: {}",
            err
        );
    }

    #[test]
    fn test_malformed_references() {
        for (field, entry) in [
            ("gateway", "- class: c\n  gateway: /gw\n  http-listener-name: http\n"),
            ("gateway", "- class: c\n  gateway: ns/\n  http-listener-name: http\n"),
            ("gateway", "- class: c\n  gateway: gw\n  http-listener-name: http\n"),
            (
                "service",
                "- class: c\n  gateway: ns/gw\n  service: ns\n  http-listener-name: http\n",
            ),
            (
                "service",
                "- class: c\n  gateway: ns/gw\n  service: /svc\n  http-listener-name: http\n",
            ),
        ] {
            let err = resolve(&doc(&[(EXTERNAL_GATEWAYS_KEY, entry)])).unwrap_err();
            let msg = err.to_string();
            assert!(msg.contains("failed to parse"), "got: {}", msg);
            assert!(msg.contains(&format!("\"{}\"", field)), "got: {}", msg);
        }
    }

    #[test]
    fn test_syntax_error_names_key() {
        let err = resolve(&doc(&[(LOCAL_GATEWAYS_KEY, "- class: [unterminated")])).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { key: LOCAL_GATEWAYS_KEY, .. }));
        assert!(err.to_string().starts_with("unable to parse local-gateways"));
    }

    #[test]
    fn test_unknown_features_ignored() {
        let configs = resolve(&doc(&[(
            EXTERNAL_GATEWAYS_KEY,
            "- class: c\n  gateway: ns/gw\n  http-listener-name: http\n  supported-features: [HTTPRouteMirror, HTTPRouteSchemeRedirect]\n",
        )]))
        .unwrap();

        let features = &configs.external.unwrap().supported_features;
        assert_eq!(features.len(), 1);
        assert!(features.contains(&Feature::SchemeRedirect));
    }

    #[test]
    fn test_round_trip() {
        let original = resolve(&doc(&[
            (EXTERNAL_GATEWAYS_KEY, EXTERNAL),
            (LOCAL_GATEWAYS_KEY, LOCAL),
        ]))
        .unwrap();

        let document = to_document(&original).unwrap();
        assert_eq!(resolve(&document).unwrap(), original);
    }

    #[test]
    fn test_feature_wire_names_round_trip() {
        let names: BTreeSet<&str> = Feature::ALL.iter().map(Feature::wire_name).collect();
        assert_eq!(names.len(), Feature::ALL.len(), "Wire names are distinct");

        for feature in Feature::ALL {
            assert_eq!(Feature::from_wire(feature.wire_name()), Some(feature));
            assert_eq!(feature.to_string(), feature.wire_name());
        }
        assert_eq!(Feature::from_wire("RequestTimeout"), None, "Variant names are not wire names");
        assert_eq!(Feature::from_wire("httproutehostrewrite"), None);
    }
}
