//! Gateway API HTTPRoute (v1)
//!
//! Types come from the `gateway-api` crate. The helpers here build the
//! fully-qualified values the synthesizer writes, so that a round trip
//! through the API server compares equal to the desired spec, and read back
//! what implementations report in status.

pub use gateway_api::apis::standard::httproutes::{
    HTTPRoute, HTTPRouteParentRefs, HTTPRouteRules, HTTPRouteRulesBackendRefs,
    HTTPRouteRulesBackendRefsFilters, HTTPRouteRulesBackendRefsFiltersRequestHeaderModifier,
    HTTPRouteRulesBackendRefsFiltersRequestHeaderModifierSet,
    HTTPRouteRulesBackendRefsFiltersType, HTTPRouteRulesFilters,
    HTTPRouteRulesFiltersRequestHeaderModifier, HTTPRouteRulesFiltersRequestHeaderModifierSet,
    HTTPRouteRulesFiltersRequestRedirect, HTTPRouteRulesFiltersRequestRedirectScheme,
    HTTPRouteRulesFiltersType, HTTPRouteRulesFiltersUrlRewrite, HTTPRouteRulesMatches,
    HTTPRouteRulesMatchesHeaders, HTTPRouteRulesMatchesHeadersType, HTTPRouteRulesMatchesPath,
    HTTPRouteRulesMatchesPathType, HTTPRouteRulesTimeouts, HTTPRouteSpec, HTTPRouteStatus,
    HTTPRouteStatusParents, HTTPRouteStatusParentsParentRef,
};
use serde::Deserialize;

pub const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";

/// Fully-qualified reference to a listener of a Gateway
pub fn parent_ref(namespace: &str, name: &str, section_name: &str) -> HTTPRouteParentRefs {
    HTTPRouteParentRefs {
        group: Some(GATEWAY_API_GROUP.to_string()),
        kind: Some("Gateway".to_string()),
        name: name.to_string(),
        namespace: Some(namespace.to_string()),
        port: None,
        section_name: Some(section_name.to_string()),
    }
}

/// Whether a reported status entry names the same Gateway listener
///
/// Implementations may omit group/kind, so only namespace, name and
/// section are compared. A missing namespace resolves to `route_namespace`.
pub fn refers_to_same(
    desired: &HTTPRouteParentRefs,
    reported: &HTTPRouteStatusParentsParentRef,
    route_namespace: &str,
) -> bool {
    let ours = desired.namespace.as_deref().unwrap_or(route_namespace);
    let theirs = reported.namespace.as_deref().unwrap_or(route_namespace);
    ours == theirs && desired.name == reported.name && desired.section_name == reported.section_name
}

/// metav1.Condition as reported on a route parent
#[derive(Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReportedCondition {
    #[serde(rename = "type")]
    pub type_: String,

    /// "True", "False" or "Unknown"
    pub status: String,

    #[serde(default)]
    pub reason: String,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub observed_generation: Option<i64>,
}

/// Conditions of one parent entry; malformed entries read as none
pub fn parent_conditions(parent: &HTTPRouteStatusParents) -> Vec<ReportedCondition> {
    parent
        .conditions
        .as_ref()
        .and_then(|c| serde_json::to_value(c).ok())
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

/// Condition of `type_` on one parent entry
pub fn parent_condition(parent: &HTTPRouteStatusParents, type_: &str) -> Option<ReportedCondition> {
    parent_conditions(parent)
        .into_iter()
        .find(|c| c.type_ == type_)
}

/// Route-level RequestHeaderModifier overwriting `headers`
pub fn set_headers_filter(headers: Vec<(String, String)>) -> HTTPRouteRulesFilters {
    HTTPRouteRulesFilters {
        extension_ref: None,
        request_header_modifier: Some(HTTPRouteRulesFiltersRequestHeaderModifier {
            add: None,
            remove: None,
            set: Some(
                headers
                    .into_iter()
                    .map(|(name, value)| HTTPRouteRulesFiltersRequestHeaderModifierSet { name, value })
                    .collect(),
            ),
        }),
        request_mirror: None,
        request_redirect: None,
        response_header_modifier: None,
        r#type: HTTPRouteRulesFiltersType::RequestHeaderModifier,
        url_rewrite: None,
    }
}

/// Backend-level RequestHeaderModifier overwriting `headers`
pub fn backend_set_headers_filter(headers: Vec<(String, String)>) -> HTTPRouteRulesBackendRefsFilters {
    HTTPRouteRulesBackendRefsFilters {
        extension_ref: None,
        request_header_modifier: Some(HTTPRouteRulesBackendRefsFiltersRequestHeaderModifier {
            add: None,
            remove: None,
            set: Some(
                headers
                    .into_iter()
                    .map(|(name, value)| HTTPRouteRulesBackendRefsFiltersRequestHeaderModifierSet {
                        name,
                        value,
                    })
                    .collect(),
            ),
        }),
        request_mirror: None,
        request_redirect: None,
        response_header_modifier: None,
        r#type: HTTPRouteRulesBackendRefsFiltersType::RequestHeaderModifier,
        url_rewrite: None,
    }
}

/// URLRewrite replacing the Host header
pub fn host_rewrite_filter(hostname: &str) -> HTTPRouteRulesFilters {
    HTTPRouteRulesFilters {
        extension_ref: None,
        request_header_modifier: None,
        request_mirror: None,
        request_redirect: None,
        response_header_modifier: None,
        r#type: HTTPRouteRulesFiltersType::UrlRewrite,
        url_rewrite: Some(HTTPRouteRulesFiltersUrlRewrite {
            hostname: Some(hostname.to_string()),
            path: None,
        }),
    }
}

/// RequestRedirect to https with a permanent redirect
pub fn https_redirect_filter() -> HTTPRouteRulesFilters {
    HTTPRouteRulesFilters {
        extension_ref: None,
        request_header_modifier: None,
        request_mirror: None,
        request_redirect: Some(HTTPRouteRulesFiltersRequestRedirect {
            scheme: Some(HTTPRouteRulesFiltersRequestRedirectScheme::Https),
            status_code: Some(301),
            ..Default::default()
        }),
        response_header_modifier: None,
        r#type: HTTPRouteRulesFiltersType::RequestRedirect,
        url_rewrite: None,
    }
}
