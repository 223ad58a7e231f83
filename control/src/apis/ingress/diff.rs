//! Desired vs observed children → change set
//!
//! Comparison is structural on spec, ownership labels and the controller
//! owner reference. Everything else on the live object (status, resource
//! version, managed fields, foreign labels) is server- or user-populated and
//! is carried over untouched on update.

use super::child_index::ObjectKey;
use super::synthesize::{owner_labels, DesiredGrant, DesiredRoute, Synthesis};
use common::{HTTPRoute, Ingress, ReferenceGrant};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use std::collections::{BTreeMap, HashMap};

/// Writes needed to move the cluster to the desired state
///
/// Updates carry the observed `resourceVersion` so they fail on conflict.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub create_routes: Vec<HTTPRoute>,
    pub update_routes: Vec<HTTPRoute>,
    pub delete_routes: Vec<ObjectKey>,
    pub create_grants: Vec<ReferenceGrant>,
    pub update_grants: Vec<ReferenceGrant>,
    pub delete_grants: Vec<ObjectKey>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.create_routes.is_empty()
            && self.update_routes.is_empty()
            && self.delete_routes.is_empty()
            && self.create_grants.is_empty()
            && self.update_grants.is_empty()
            && self.delete_grants.is_empty()
    }

    /// Number of writes, deletes included
    pub fn len(&self) -> usize {
        self.create_routes.len()
            + self.update_routes.len()
            + self.delete_routes.len()
            + self.create_grants.len()
            + self.update_grants.len()
            + self.delete_grants.len()
    }
}

/// Whether `meta` carries every label in `wanted`
fn has_labels(meta: &ObjectMeta, wanted: &BTreeMap<String, String>) -> bool {
    let labels = meta.labels.as_ref();
    wanted
        .iter()
        .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
}

fn has_owner(meta: &ObjectMeta, owner: &OwnerReference) -> bool {
    meta.owner_references
        .as_ref()
        .map(|refs| refs.iter().any(|r| r.uid == owner.uid))
        .unwrap_or(false)
}

/// Merge `wanted` labels into `meta` without dropping foreign ones
fn merge_labels(meta: &mut ObjectMeta, wanted: &BTreeMap<String, String>) {
    let labels = meta.labels.get_or_insert_with(BTreeMap::new);
    for (k, v) in wanted {
        labels.insert(k.clone(), v.clone());
    }
}

fn index_by_key<K: ResourceExt>(objects: &[K]) -> HashMap<ObjectKey, &K> {
    objects
        .iter()
        .filter_map(|o| ObjectKey::of(o).map(|key| (key, o)))
        .collect()
}

fn plan_routes(
    owner: &Ingress,
    desired: &[DesiredRoute],
    observed: &[HTTPRoute],
    labels: &BTreeMap<String, String>,
    changes: &mut ChangeSet,
) {
    let owner_ref = owner.controller_owner_ref(&());
    let mut live = index_by_key(observed);

    for route in desired {
        let key = ObjectKey::new(route.namespace.as_str(), route.name.as_str());
        match live.remove(&key) {
            None => changes.create_routes.push(route.to_resource(owner)),
            Some(current) => {
                let owned = owner_ref
                    .as_ref()
                    .map(|r| has_owner(&current.metadata, r))
                    .unwrap_or(true);
                if current.spec == route.spec && has_labels(&current.metadata, labels) && owned {
                    continue;
                }

                let mut updated = current.clone();
                updated.spec = route.spec.clone();
                updated.status = None;
                merge_labels(&mut updated.metadata, labels);
                if let (false, Some(r)) = (owned, owner_ref.as_ref()) {
                    updated
                        .metadata
                        .owner_references
                        .get_or_insert_with(Vec::new)
                        .push(r.clone());
                }
                updated.metadata.managed_fields = None;
                changes.update_routes.push(updated);
            }
        }
    }

    let mut stale: Vec<ObjectKey> = live.into_keys().collect();
    stale.sort();
    changes.delete_routes = stale;
}

fn plan_grants(
    owner_namespace: &str,
    owner_name: &str,
    desired: &[DesiredGrant],
    observed: &[ReferenceGrant],
    labels: &BTreeMap<String, String>,
    changes: &mut ChangeSet,
) {
    let mut live = index_by_key(observed);

    for grant in desired {
        let key = ObjectKey::new(grant.namespace.as_str(), grant.name.as_str());
        match live.remove(&key) {
            None => changes
                .create_grants
                .push(grant.to_resource(owner_namespace, owner_name)),
            Some(current) => {
                if current.spec == grant.spec && has_labels(&current.metadata, labels) {
                    continue;
                }
                let mut updated = current.clone();
                updated.spec = grant.spec.clone();
                merge_labels(&mut updated.metadata, labels);
                updated.metadata.managed_fields = None;
                changes.update_grants.push(updated);
            }
        }
    }

    let mut stale: Vec<ObjectKey> = live.into_keys().collect();
    stale.sort();
    changes.delete_grants = stale;
}

/// Plan the writes turning `observed` into `desired`
///
/// `observed_*` must be exactly the children owned by `owner`; anything in
/// there that is not desired is deleted.
pub fn plan(
    owner: &Ingress,
    desired: &Synthesis,
    observed_routes: &[HTTPRoute],
    observed_grants: &[ReferenceGrant],
) -> ChangeSet {
    let namespace = owner.namespace().unwrap_or_default();
    let name = owner.name_any();
    let labels = owner_labels(&namespace, &name);

    let mut changes = ChangeSet::default();
    plan_routes(owner, &desired.routes, observed_routes, &labels, &mut changes);
    plan_grants(
        &namespace,
        &name,
        &desired.grants,
        observed_grants,
        &labels,
        &mut changes,
    );
    changes
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use common::grant::{grant_from, service_target, ReferenceGrantSpec};
    use common::route::{parent_ref, HTTPRouteSpec, HTTPRouteStatus};
    use common::{grant_name, IngressSpec, Visibility};
    use pretty_assertions::assert_eq;

    fn owner() -> Ingress {
        let mut ingress = Ingress::new("hello", IngressSpec::default());
        ingress.metadata.namespace = Some("default".to_string());
        ingress.metadata.uid = Some("uid-1".to_string());
        ingress
    }

    fn desired_route(name: &str, host: &str) -> DesiredRoute {
        DesiredRoute {
            name: name.to_string(),
            namespace: "default".to_string(),
            visibility: Visibility::External,
            spec: HTTPRouteSpec {
                hostnames: Some(vec![host.to_string()]),
                parent_refs: Some(vec![parent_ref("ns", "g", "http")]),
                rules: None,
            },
        }
    }

    fn desired_grant(service: &str) -> DesiredGrant {
        DesiredGrant {
            name: grant_name("default", "hello"),
            namespace: "other".to_string(),
            spec: ReferenceGrantSpec {
                from: vec![grant_from("HTTPRoute", "default")],
                to: vec![service_target(service)],
            },
        }
    }

    /// What the API server returns for a previously created route
    fn live(route: &DesiredRoute) -> HTTPRoute {
        let mut obj = route.to_resource(&owner());
        obj.metadata.resource_version = Some("42".to_string());
        obj.metadata.uid = Some("child-uid".to_string());
        obj.status = Some(HTTPRouteStatus { parents: vec![] });
        obj
    }

    #[test]
    fn test_creates_missing() {
        let desired = Synthesis {
            routes: vec![desired_route("r1", "a.example.com")],
            grants: vec![desired_grant("svc")],
            warnings: vec![],
        };

        let changes = plan(&owner(), &desired, &[], &[]);
        assert_eq!(changes.create_routes.len(), 1);
        assert_eq!(changes.create_grants.len(), 1);
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn test_unchanged_is_empty() {
        let route = desired_route("r1", "a.example.com");
        let grant = desired_grant("svc");
        let observed_grant = grant.to_resource("default", "hello");
        let desired = Synthesis {
            routes: vec![route.clone()],
            grants: vec![grant],
            warnings: vec![],
        };

        let changes = plan(&owner(), &desired, &[live(&route)], &[observed_grant]);
        assert!(changes.is_empty(), "Server-populated fields must not cause updates: {:?}", changes);
    }

    #[test]
    fn test_spec_drift_updates_with_resource_version() {
        let route = desired_route("r1", "a.example.com");
        let mut drifted = live(&route);
        drifted.spec.hostnames = Some(vec!["tampered.example.com".to_string()]);

        let desired = Synthesis {
            routes: vec![route.clone()],
            ..Default::default()
        };
        let changes = plan(&owner(), &desired, &[drifted], &[]);

        assert_eq!(changes.update_routes.len(), 1);
        let updated = &changes.update_routes[0];
        assert_eq!(updated.spec, route.spec);
        assert_eq!(
            updated.metadata.resource_version.as_deref(),
            Some("42"),
            "Update must carry the observed resourceVersion"
        );
        assert!(updated.status.is_none());
    }

    #[test]
    fn test_missing_labels_trigger_update_keeping_foreign_labels() {
        let route = desired_route("r1", "a.example.com");
        let mut stripped = live(&route);
        stripped.metadata.labels = Some(BTreeMap::from([(
            "team".to_string(),
            "web".to_string(),
        )]));

        let desired = Synthesis {
            routes: vec![route],
            ..Default::default()
        };
        let changes = plan(&owner(), &desired, &[stripped], &[]);

        let labels = changes.update_routes[0].metadata.labels.as_ref().unwrap();
        assert_eq!(labels["team"], "web");
        assert_eq!(labels[common::OWNER_NAME_LABEL], "hello");
    }

    #[test]
    fn test_missing_owner_reference_restored() {
        let route = desired_route("r1", "a.example.com");
        let mut orphan = live(&route);
        orphan.metadata.owner_references = None;

        let desired = Synthesis {
            routes: vec![route],
            ..Default::default()
        };
        let changes = plan(&owner(), &desired, &[orphan], &[]);

        let refs = changes.update_routes[0]
            .metadata
            .owner_references
            .as_ref()
            .unwrap();
        assert_eq!(refs[0].uid, "uid-1");
    }

    #[test]
    fn test_stale_children_deleted_sorted() {
        let keep = desired_route("r1", "a.example.com");
        let stale_b = live(&desired_route("r3", "c.example.com"));
        let stale_a = live(&desired_route("r2", "b.example.com"));
        let stale_grant = desired_grant("old").to_resource("default", "hello");

        let desired = Synthesis {
            routes: vec![keep.clone()],
            ..Default::default()
        };
        let changes = plan(&owner(), &desired, &[stale_b, live(&keep), stale_a], &[stale_grant]);

        assert_eq!(
            changes.delete_routes,
            vec![ObjectKey::new("default", "r2"), ObjectKey::new("default", "r3")]
        );
        assert_eq!(
            changes.delete_grants,
            vec![ObjectKey::new("other", grant_name("default", "hello"))]
        );
        assert!(changes.create_routes.is_empty());
        assert!(changes.update_routes.is_empty());
    }

    #[test]
    fn test_grant_target_change_updates() {
        let before = desired_grant("a").to_resource("default", "hello");
        let desired = Synthesis {
            grants: vec![desired_grant("b")],
            ..Default::default()
        };

        let changes = plan(&owner(), &desired, &[], &[before]);
        assert_eq!(changes.update_grants.len(), 1);
        assert_eq!(
            changes.update_grants[0].spec.to,
            vec![service_target("b")]
        );
    }
}
