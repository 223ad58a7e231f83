//! Status projection
//!
//! Folds one observed snapshot of child routes and gateways into the
//! Ingress status. Pure: the same inputs always give the same status, and
//! nothing is remembered between passes except what the previous status
//! itself carries (transition timestamps).

use super::synthesize::{DesiredRoute, Synthesis, SynthesisWarning};
use crate::apis::gateway::config::{GatewayConfig, GatewayConfigs};
use common::ingress::{
    CONDITION_LOAD_BALANCER_READY, CONDITION_NETWORK_CONFIGURED, CONDITION_READY,
};
use common::gateway::{gateway_addresses, is_hostname};
use common::route::{parent_condition, refers_to_same};
use common::{
    Condition, ConditionStatus, Gateway, HTTPRoute, IngressStatus, LoadBalancerAddress, Visibility,
};
use kube::{Resource, ResourceExt};
use std::collections::BTreeSet;

pub const REASON_ROUTE_MISSING: &str = "RouteNotCreated";
pub const REASON_ROUTE_STALE: &str = "RouteNotPropagated";
pub const REASON_PARENT_PENDING: &str = "ParentNotReported";
pub const REASON_ACCEPTED_STALE: &str = "AcceptanceStale";
pub const REASON_GATEWAY_MISSING: &str = "GatewayNotConfigured";
pub const REASON_FEATURE_UNSUPPORTED: &str = "FeatureUnsupported";
pub const REASON_ADDRESS_PENDING: &str = "AddressNotReady";

/// Live objects the projection reads, taken from one cache snapshot
#[derive(Debug, Clone, Copy)]
pub struct Observed<'a> {
    pub routes: &'a [HTTPRoute],
    pub gateways: &'a [Gateway],
}

/// Why something is not ready yet
#[derive(Debug, Clone, PartialEq, Eq)]
struct Blocker {
    /// `Unknown` while waiting, `False` on a definitive rejection
    status: ConditionStatus,
    reason: String,
    message: String,
}

impl Blocker {
    fn pending(reason: &str, message: String) -> Self {
        Self {
            status: ConditionStatus::Unknown,
            reason: reason.to_string(),
            message,
        }
    }

    fn into_condition(self, type_: &str) -> Condition {
        Condition::new(type_, self.status).with_reason(self.reason, self.message)
    }
}

fn find_route<'a>(observed: &'a [HTTPRoute], desired: &DesiredRoute) -> Option<&'a HTTPRoute> {
    observed.iter().find(|r| {
        r.meta().name.as_deref() == Some(desired.name.as_str())
            && r.namespace().as_deref() == Some(desired.namespace.as_str())
    })
}

/// Readiness of one desired route against its live counterpart
fn route_blocker(desired: &DesiredRoute, observed: Option<&HTTPRoute>) -> Option<Blocker> {
    let Some(live) = observed else {
        return Some(Blocker::pending(
            REASON_ROUTE_MISSING,
            format!("route {} not yet created or not yet propagated", desired.name),
        ));
    };

    if live.spec != desired.spec {
        return Some(Blocker::pending(
            REASON_ROUTE_STALE,
            format!("route {} not yet created or not yet propagated", desired.name),
        ));
    }

    let generation = live.metadata.generation;
    let parents = live
        .status
        .as_ref()
        .map(|s| s.parents.as_slice())
        .unwrap_or_default();

    for parent_ref in desired.spec.parent_refs.iter().flatten() {
        let gateway = format!(
            "{}/{}",
            parent_ref.namespace.as_deref().unwrap_or(&desired.namespace),
            parent_ref.name
        );

        let Some(entry) = parents
            .iter()
            .find(|p| refers_to_same(parent_ref, &p.parent_ref, &desired.namespace))
        else {
            return Some(Blocker::pending(
                REASON_PARENT_PENDING,
                format!("gateway {} has not reported on route {}", gateway, desired.name),
            ));
        };

        let Some(accepted) = parent_condition(entry, "Accepted") else {
            return Some(Blocker::pending(
                REASON_PARENT_PENDING,
                format!("gateway {} has not accepted route {} yet", gateway, desired.name),
            ));
        };

        if let (Some(seen), Some(current)) = (accepted.observed_generation, generation) {
            if seen < current {
                return Some(Blocker::pending(
                    REASON_ACCEPTED_STALE,
                    format!(
                        "gateway {} reported on generation {} of route {}, current is {}",
                        gateway, seen, desired.name, current
                    ),
                ));
            }
        }

        if accepted.status != "True" {
            let status = if accepted.status == "False" {
                ConditionStatus::False
            } else {
                ConditionStatus::Unknown
            };
            let reason = if accepted.reason.is_empty() {
                "NotAccepted".to_string()
            } else {
                accepted.reason.clone()
            };
            return Some(Blocker {
                status,
                reason,
                message: format!(
                    "gateway {} did not accept route {}: {}",
                    gateway, desired.name, accepted.message
                ),
            });
        }
    }

    None
}

/// Addresses under which one visibility is reachable
fn addresses_for(
    config: &GatewayConfig,
    gateways: &[Gateway],
    cluster_domain: &str,
) -> Vec<LoadBalancerAddress> {
    if let Some(service) = &config.service {
        return vec![LoadBalancerAddress {
            domain_internal: Some(format!(
                "{}.{}.svc.{}",
                service.name, service.namespace, cluster_domain
            )),
            ..Default::default()
        }];
    }

    let gateway = gateways.iter().find(|g| {
        g.meta().name.as_deref() == Some(config.gateway.name.as_str())
            && g.namespace().as_deref() == Some(config.gateway.namespace.as_str())
    });

    let mut addresses: Vec<LoadBalancerAddress> = gateway
        .map(gateway_addresses)
        .unwrap_or_default()
        .iter()
        .map(|a| {
            if is_hostname(a) {
                LoadBalancerAddress {
                    domain: Some(a.value.clone()),
                    ..Default::default()
                }
            } else {
                LoadBalancerAddress {
                    ip: Some(a.value.clone()),
                    ..Default::default()
                }
            }
        })
        .collect();
    addresses.sort();
    addresses.dedup();
    addresses
}

/// Project the Ingress status from one observed snapshot
///
/// Timestamps and `observedGeneration` are left unset; see [`finalize`].
pub fn project(
    desired: &Synthesis,
    observed: Observed<'_>,
    configs: &GatewayConfigs,
    cluster_domain: &str,
) -> IngressStatus {
    let mut status = IngressStatus::default();

    // NetworkConfigured: every visibility bound, every route accepted
    let unbound: Vec<&SynthesisWarning> = desired
        .warnings
        .iter()
        .filter(|w| matches!(w, SynthesisWarning::NoGatewayForVisibility(_)))
        .collect();
    let network_blocker = match unbound.first() {
        Some(w) => Some(Blocker {
            status: ConditionStatus::False,
            reason: REASON_GATEWAY_MISSING.to_string(),
            message: w.to_string(),
        }),
        None => desired
            .routes
            .iter()
            .find_map(|route| route_blocker(route, find_route(observed.routes, route))),
    };

    let network = match network_blocker.clone() {
        Some(blocker) => blocker.into_condition(CONDITION_NETWORK_CONFIGURED),
        None => {
            let omitted: Vec<String> = desired
                .warnings
                .iter()
                .filter(|w| matches!(w, SynthesisWarning::UnsupportedFeature { .. }))
                .map(|w| w.to_string())
                .collect();
            let condition = Condition::new(CONDITION_NETWORK_CONFIGURED, ConditionStatus::True);
            if omitted.is_empty() {
                condition
            } else {
                condition.with_reason(REASON_FEATURE_UNSUPPORTED, omitted.join("; "))
            }
        }
    };

    // LoadBalancerReady: an address for every visibility in use
    let mut in_use: BTreeSet<Visibility> = desired.visibilities();
    for w in &unbound {
        if let SynthesisWarning::NoGatewayForVisibility(v) = w {
            in_use.insert(*v);
        }
    }

    let mut lb_blocker = None;
    for visibility in in_use {
        let addresses = configs
            .get(visibility)
            .map(|c| addresses_for(c, observed.gateways, cluster_domain))
            .unwrap_or_default();

        if addresses.is_empty() && lb_blocker.is_none() {
            let message = match configs.get(visibility) {
                Some(c) => format!("gateway {} has no addresses yet", c.gateway),
                None => format!("no gateway configured for {} visibility", visibility),
            };
            lb_blocker = Some(Blocker::pending(REASON_ADDRESS_PENDING, message));
        }

        match visibility {
            Visibility::External => status.public_addresses = addresses,
            Visibility::ClusterLocal => status.private_addresses = addresses,
        }
    }

    let load_balancer = match lb_blocker.clone() {
        Some(blocker) => blocker.into_condition(CONDITION_LOAD_BALANCER_READY),
        None => Condition::new(CONDITION_LOAD_BALANCER_READY, ConditionStatus::True),
    };

    // Ready: both of the above; a definitive failure wins over waiting
    let ready = match (network_blocker, lb_blocker) {
        (None, None) => Condition::new(CONDITION_READY, ConditionStatus::True),
        (Some(n), Some(l)) if n.status != ConditionStatus::False && l.status == ConditionStatus::False => {
            l.into_condition(CONDITION_READY)
        }
        (Some(n), _) => n.into_condition(CONDITION_READY),
        (None, Some(l)) => l.into_condition(CONDITION_READY),
    };

    status.conditions = vec![load_balancer, network, ready];
    status
}

/// Status for an Ingress that cannot be programmed at all
pub fn failed(reason: &str, message: &str) -> IngressStatus {
    let blocker = Blocker {
        status: ConditionStatus::False,
        reason: reason.to_string(),
        message: message.to_string(),
    };
    IngressStatus {
        conditions: vec![
            Condition::new(CONDITION_LOAD_BALANCER_READY, ConditionStatus::Unknown),
            blocker.clone().into_condition(CONDITION_NETWORK_CONFIGURED),
            blocker.into_condition(CONDITION_READY),
        ],
        ..Default::default()
    }
}

/// Stamp generation and transition times onto a projected status
///
/// Conditions whose state did not change keep their previous timestamp.
pub fn finalize(
    mut next: IngressStatus,
    previous: Option<&IngressStatus>,
    generation: Option<i64>,
    now: &str,
) -> IngressStatus {
    next.observed_generation = generation;
    for condition in &mut next.conditions {
        let carried = previous
            .and_then(|p| p.condition(&condition.type_))
            .filter(|old| old.same_state(condition))
            .and_then(|old| old.last_transition_time.clone());
        condition.last_transition_time = Some(carried.unwrap_or_else(|| now.to_string()));
    }
    next
}

/// Whether `next` differs from what is stored, transition times aside
pub fn needs_persist(previous: Option<&IngressStatus>, next: &IngressStatus) -> bool {
    let Some(previous) = previous else {
        return true;
    };
    previous.observed_generation != next.observed_generation
        || previous.public_addresses != next.public_addresses
        || previous.private_addresses != next.private_addresses
        || previous.conditions.len() != next.conditions.len()
        || previous
            .conditions
            .iter()
            .zip(&next.conditions)
            .any(|(a, b)| !a.same_state(b))
}
