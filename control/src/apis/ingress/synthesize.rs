//! Route synthesis: Ingress → HTTPRoutes + ReferenceGrants
//!
//! Pure function of the Ingress and one configuration snapshot. Output is
//! fully defaulted and deterministically ordered so that comparing it with
//! what the API server hands back never reports a spurious change.

use crate::apis::gateway::config::{Feature, GatewayConfig, GatewayConfigs};
use common::grant::{grant_from, service_target, ReferenceGrantSpec};
use common::route::{
    backend_set_headers_filter, host_rewrite_filter, https_redirect_filter, parent_ref,
    set_headers_filter, HTTPRouteRules, HTTPRouteRulesBackendRefs, HTTPRouteRulesMatches,
    HTTPRouteRulesMatchesHeaders, HTTPRouteRulesMatchesHeadersType, HTTPRouteRulesMatchesPath,
    HTTPRouteRulesMatchesPathType, HTTPRouteRulesTimeouts, HTTPRouteSpec,
};
use common::{
    grant_name, route_name, AppProtocol, HttpOption, Ingress, PathRule, ReferenceGrant, Split,
    Visibility, HTTPRoute, OWNER_NAMESPACE_LABEL, OWNER_NAME_LABEL, TAG_HEADER,
};
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("ingress is missing {0}")]
    MissingMetadata(&'static str),

    #[error("split weights for {hosts} path {path} sum to {total}, expected 100")]
    InvalidWeights {
        hosts: String,
        path: String,
        total: u32,
    },
}

/// Non-fatal findings surfaced on the Ingress status
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SynthesisWarning {
    /// Rules of this visibility exist but no gateway is bound to it
    NoGatewayForVisibility(Visibility),

    /// A field was omitted because the bound gateway lacks the feature
    UnsupportedFeature {
        visibility: Visibility,
        feature: Feature,
    },
}

impl fmt::Display for SynthesisWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SynthesisWarning::NoGatewayForVisibility(v) => {
                write!(f, "no gateway configured for {} visibility", v)
            }
            SynthesisWarning::UnsupportedFeature { visibility, feature } => write!(
                f,
                "feature unsupported by backend: {} ({})",
                feature, visibility
            ),
        }
    }
}

/// Target state of one HTTPRoute
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredRoute {
    pub name: String,
    pub namespace: String,
    pub visibility: Visibility,
    pub spec: HTTPRouteSpec,
}

/// Target state of one ReferenceGrant
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredGrant {
    pub name: String,
    pub namespace: String,
    pub spec: ReferenceGrantSpec,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Synthesis {
    pub routes: Vec<DesiredRoute>,
    pub grants: Vec<DesiredGrant>,
    pub warnings: Vec<SynthesisWarning>,
}

impl Synthesis {
    /// Visibilities with at least one desired route
    pub fn visibilities(&self) -> BTreeSet<Visibility> {
        self.routes.iter().map(|r| r.visibility).collect()
    }
}

/// Ownership labels written on every child
pub fn owner_labels(namespace: &str, name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (OWNER_NAMESPACE_LABEL.to_string(), namespace.to_string()),
        (OWNER_NAME_LABEL.to_string(), name.to_string()),
    ])
}

impl DesiredRoute {
    /// Build the HTTPRoute object, owner-referenced to `owner`
    pub fn to_resource(&self, owner: &Ingress) -> HTTPRoute {
        let mut route = HTTPRoute::new(&self.name, self.spec.clone());
        route.metadata = ObjectMeta {
            name: Some(self.name.clone()),
            namespace: Some(self.namespace.clone()),
            labels: Some(owner_labels(
                &owner.namespace().unwrap_or_default(),
                &owner.name_any(),
            )),
            owner_references: owner.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        };
        route
    }
}

impl DesiredGrant {
    /// Build the ReferenceGrant object. Grants may live outside the owner's
    /// namespace, so ownership is carried by labels only.
    pub fn to_resource(&self, owner_namespace: &str, owner_name: &str) -> ReferenceGrant {
        let mut grant = ReferenceGrant::new(&self.name, self.spec.clone());
        grant.metadata = ObjectMeta {
            name: Some(self.name.clone()),
            namespace: Some(self.namespace.clone()),
            labels: Some(owner_labels(owner_namespace, owner_name)),
            ..Default::default()
        };
        grant
    }
}

/// Grant entries of one backend namespace, kept sorted
#[derive(Default)]
struct GrantEntries {
    /// (kind, namespace) allowed to refer into the backend namespace
    from: BTreeSet<(&'static str, String)>,
    services: BTreeSet<String>,
}

/// Accumulates the per-namespace grant entries while routes are built
#[derive(Default)]
struct GrantBuilder {
    by_namespace: BTreeMap<String, GrantEntries>,
}

impl GrantBuilder {
    fn record(&mut self, ingress_ns: &str, gateway_ns: &str, split: &Split) {
        let backend_ns = split.backend_ref.namespace.as_str();
        if backend_ns == ingress_ns && gateway_ns == ingress_ns {
            return;
        }

        let mut from = Vec::new();
        if backend_ns != ingress_ns {
            from.push(("HTTPRoute", ingress_ns.to_string()));
        }
        if gateway_ns != backend_ns {
            from.push(("Gateway", gateway_ns.to_string()));
        }
        if from.is_empty() {
            return;
        }

        let entry = self.by_namespace.entry(backend_ns.to_string()).or_default();
        entry.from.extend(from);
        entry.services.insert(split.backend_ref.name.clone());
    }

    fn build(self, ingress_ns: &str, ingress_name: &str) -> Vec<DesiredGrant> {
        self.by_namespace
            .into_iter()
            .map(|(namespace, entries)| DesiredGrant {
                name: grant_name(ingress_ns, ingress_name),
                namespace,
                spec: ReferenceGrantSpec {
                    from: entries
                        .from
                        .iter()
                        .map(|(kind, ns)| grant_from(kind, ns))
                        .collect(),
                    to: entries.services.iter().map(|s| service_target(s)).collect(),
                },
            })
            .collect()
    }
}

/// Per-route synthesis context
struct RouteContext<'a> {
    visibility: Visibility,
    config: &'a GatewayConfig,
    http_option: HttpOption,
    hosts: &'a [String],
    warnings: &'a mut BTreeSet<SynthesisWarning>,
}

impl RouteContext<'_> {
    /// Whether `feature` may be used; records a warning when it may not
    fn allow(&mut self, feature: Feature) -> bool {
        if self.config.supports(feature) {
            return true;
        }
        self.warnings.insert(SynthesisWarning::UnsupportedFeature {
            visibility: self.visibility,
            feature,
        });
        false
    }

    fn build_rule(&mut self, path_rule: &PathRule) -> Result<HTTPRouteRules, SynthesisError> {
        let path = match path_rule.path.as_deref() {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => "/".to_string(),
        };

        if !path_rule.splits.is_empty() {
            let total: u32 = path_rule
                .splits
                .iter()
                .map(|s| s.percent)
                .fold(0u32, u32::saturating_add);
            if total != 100 {
                return Err(SynthesisError::InvalidWeights {
                    hosts: self.hosts.join(","),
                    path,
                    total,
                });
            }
        }

        let headers = tag_of(path_rule).map(|tag| {
            vec![HTTPRouteRulesMatchesHeaders {
                name: TAG_HEADER.to_string(),
                r#type: Some(HTTPRouteRulesMatchesHeadersType::Exact),
                value: tag.to_string(),
            }]
        });
        let matches = Some(vec![HTTPRouteRulesMatches {
            headers,
            method: None,
            path: Some(HTTPRouteRulesMatchesPath {
                r#type: Some(HTTPRouteRulesMatchesPathType::PathPrefix),
                value: Some(path),
            }),
            query_params: None,
        }]);

        if self.visibility == Visibility::External
            && self.http_option == HttpOption::Redirected
            && self.allow(Feature::SchemeRedirect)
        {
            return Ok(HTTPRouteRules {
                matches,
                filters: Some(vec![https_redirect_filter()]),
                ..Default::default()
            });
        }

        let mut filters = Vec::new();
        if !path_rule.append_headers.is_empty() {
            filters.push(set_headers_filter(to_headers(&path_rule.append_headers)));
        }
        if let Some(host) = &path_rule.rewrite_host {
            if self.allow(Feature::HostRewrite) {
                filters.push(host_rewrite_filter(host));
            }
        }

        let timeouts = match &path_rule.timeout {
            Some(timeout) if self.allow(Feature::RequestTimeout) => Some(HTTPRouteRulesTimeouts {
                backend_request: None,
                request: Some(timeout.clone()),
            }),
            _ => None,
        };

        let backend_refs: Vec<HTTPRouteRulesBackendRefs> = path_rule
            .splits
            .iter()
            .map(|split| self.build_backend(split))
            .collect();

        Ok(HTTPRouteRules {
            matches,
            filters: non_empty(filters),
            backend_refs: non_empty(backend_refs),
            timeouts,
            ..Default::default()
        })
    }

    fn build_backend(&mut self, split: &Split) -> HTTPRouteRulesBackendRefs {
        match split.app_protocol {
            Some(AppProtocol::H2c) => {
                self.allow(Feature::BackendProtocolH2C);
            }
            Some(AppProtocol::Websocket) => {
                self.allow(Feature::BackendProtocolWebSocket);
            }
            None => {}
        }

        let mut filters = Vec::new();
        if !split.append_headers.is_empty() && self.allow(Feature::BackendHeaderModifier) {
            filters.push(backend_set_headers_filter(to_headers(&split.append_headers)));
        }

        // Server-defaulted fields are written out so reads compare equal
        HTTPRouteRulesBackendRefs {
            filters: non_empty(filters),
            group: Some(String::new()),
            kind: Some("Service".to_string()),
            name: split.backend_ref.name.clone(),
            namespace: Some(split.backend_ref.namespace.clone()),
            port: Some(split.backend_ref.port),
            weight: Some(split.percent as i32),
        }
    }
}

/// Empty lists are omitted rather than written as `[]`
fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

fn tag_of(path_rule: &PathRule) -> Option<&str> {
    path_rule.tag.as_deref().filter(|t| !t.is_empty())
}

/// Header map → (name, value) list, ordered by lowercased name
///
/// Header names are case-insensitive and a modifier may set each name only
/// once. Spellings of one name merge into the first in map order, carrying
/// the last value.
fn to_headers(headers: &BTreeMap<String, String>) -> Vec<(String, String)> {
    let mut merged: BTreeMap<String, (String, String)> = BTreeMap::new();
    for (name, value) in headers {
        merged
            .entry(name.to_ascii_lowercase())
            .and_modify(|(_, v)| v.clone_from(value))
            .or_insert_with(|| (name.clone(), value.clone()));
    }
    merged.into_values().collect()
}

/// Compute the desired children of `ingress` under `configs`
pub fn synthesize(ingress: &Ingress, configs: &GatewayConfigs) -> Result<Synthesis, SynthesisError> {
    let namespace = ingress
        .namespace()
        .ok_or(SynthesisError::MissingMetadata(".metadata.namespace"))?;
    let name = ingress
        .meta()
        .name
        .clone()
        .ok_or(SynthesisError::MissingMetadata(".metadata.name"))?;

    // (visibility, sorted hosts) → path rules in input order
    let mut groups: BTreeMap<(Visibility, Vec<String>), Vec<&PathRule>> = BTreeMap::new();
    for rule in &ingress.spec.rules {
        let mut hosts = rule.hosts.clone();
        hosts.sort();
        hosts.dedup();
        groups
            .entry((rule.visibility, hosts))
            .or_default()
            .extend(rule.paths.iter());
    }

    let mut warnings = BTreeSet::new();
    let mut grants = GrantBuilder::default();
    let mut routes = Vec::new();

    for ((visibility, hosts), path_rules) in &groups {
        let Some(config) = configs.get(*visibility) else {
            warnings.insert(SynthesisWarning::NoGatewayForVisibility(*visibility));
            continue;
        };

        // Tagged rules first so tagged requests never fall into a catch-all
        let (tagged, untagged): (Vec<&PathRule>, Vec<&PathRule>) = path_rules
            .iter()
            .copied()
            .partition(|r| tag_of(r).is_some());

        let mut ctx = RouteContext {
            visibility: *visibility,
            config,
            http_option: ingress.spec.http_option,
            hosts,
            warnings: &mut warnings,
        };

        let mut rules = Vec::with_capacity(path_rules.len());
        for path_rule in tagged.into_iter().chain(untagged) {
            let rule = ctx.build_rule(path_rule)?;
            if rule.backend_refs.is_some() {
                for split in &path_rule.splits {
                    grants.record(&namespace, &config.gateway.namespace, split);
                }
            }
            rules.push(rule);
        }

        routes.push(DesiredRoute {
            name: route_name(&name, *visibility, hosts),
            namespace: namespace.clone(),
            visibility: *visibility,
            spec: HTTPRouteSpec {
                hostnames: Some(hosts.clone()),
                parent_refs: Some(vec![parent_ref(
                    &config.gateway.namespace,
                    &config.gateway.name,
                    &config.listener_name,
                )]),
                rules: Some(rules),
            },
        });
    }

    Ok(Synthesis {
        routes,
        grants: grants.build(&namespace, &name),
        warnings: warnings.into_iter().collect(),
    })
}
