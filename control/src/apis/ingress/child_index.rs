//! Child index: owning Ingress → child resource keys
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          ChildIndex                              │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  Data (Arc<RwLock<HashMap>>)           │  Metrics (Atomics)      │
//! │  ┌──────────────────────────────────┐  │  ┌───────────────────┐  │
//! │  │ owner (ns, name) → Children      │  │  │ lookups, hits     │  │
//! │  │   routes: {(ns, name), ...}      │  │  │ adds, removes     │  │
//! │  │   grants: {(ns, name), ...}      │  │  └───────────────────┘  │
//! │  │ (kind, child) → owner            │  │                         │
//! │  └──────────────────────────────────┘  │                         │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Fed by the HTTPRoute and ReferenceGrant watchers through
//! [`IndexFeeder`]; read by the reconciler to find what an Ingress owns
//! without listing the cluster. Ownership is taken from the labels written
//! on every child, which also covers ReferenceGrants living in namespaces
//! other than their owner's.

use crate::apis::metrics::set_child_index_owners;
use crate::sync::{safe_read, safe_write};
use common::{OWNER_NAME_LABEL, OWNER_NAMESPACE_LABEL};
use kube::runtime::watcher;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

// =============================================================================
// ObjectKey
// =============================================================================

/// (namespace, name) of a namespaced object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    #[inline]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a namespaced resource; `None` if either field is unset
    pub fn of<K: ResourceExt>(obj: &K) -> Option<Self> {
        Some(Self::new(obj.namespace()?, obj.meta().name.clone()?))
    }

    /// Owner key recorded in a child's ownership labels
    pub fn owner_from_labels(labels: &BTreeMap<String, String>) -> Option<Self> {
        let namespace = labels.get(OWNER_NAMESPACE_LABEL)?;
        let name = labels.get(OWNER_NAME_LABEL)?;
        Some(Self::new(namespace.as_str(), name.as_str()))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Kind of child resource tracked by the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildKind {
    Route,
    Grant,
}

impl fmt::Display for ChildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildKind::Route => write!(f, "HTTPRoute"),
            ChildKind::Grant => write!(f, "ReferenceGrant"),
        }
    }
}

/// Children of one owner
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Children {
    pub routes: BTreeSet<ObjectKey>,
    pub grants: BTreeSet<ObjectKey>,
}

impl Children {
    fn set_mut(&mut self, kind: ChildKind) -> &mut BTreeSet<ObjectKey> {
        match kind {
            ChildKind::Route => &mut self.routes,
            ChildKind::Grant => &mut self.grants,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty() && self.grants.is_empty()
    }
}

// =============================================================================
// ChildIndexMetrics - Lock-free atomic counters
// =============================================================================

#[derive(Debug, Default)]
pub struct ChildIndexMetrics {
    lookups: AtomicU64,
    hits: AtomicU64,
    adds: AtomicU64,
    removes: AtomicU64,
}

impl ChildIndexMetrics {
    #[inline(always)]
    fn record_lookup(&self, hit: bool) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline(always)]
    fn record_add(&self) {
        self.adds.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    fn record_remove(&self) {
        self.removes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn adds(&self) -> u64 {
        self.adds.load(Ordering::Relaxed)
    }

    pub fn removes(&self) -> u64 {
        self.removes.load(Ordering::Relaxed)
    }
}

// =============================================================================
// ChildIndex
// =============================================================================

/// Both directions of the ownership relation, kept in step
#[derive(Debug, Default)]
struct IndexData {
    by_owner: HashMap<ObjectKey, Children>,
    owner_of: HashMap<(ChildKind, ObjectKey), ObjectKey>,
}

impl IndexData {
    /// Detach `child` from its current owner, dropping the owner if emptied
    fn detach(&mut self, kind: ChildKind, child: &ObjectKey) -> Option<ObjectKey> {
        let owner = self.owner_of.remove(&(kind, child.clone()))?;
        if let Some(children) = self.by_owner.get_mut(&owner) {
            children.set_mut(kind).remove(child);
            if children.is_empty() {
                self.by_owner.remove(&owner);
            }
        }
        Some(owner)
    }

    fn attach(&mut self, kind: ChildKind, owner: ObjectKey, child: ObjectKey) {
        self.owner_of.insert((kind, child.clone()), owner.clone());
        self.by_owner.entry(owner).or_default().set_mut(kind).insert(child);
    }
}

/// Thread-safe owner → children index
///
/// Clones share the same underlying data.
#[derive(Debug, Clone, Default)]
pub struct ChildIndex {
    inner: Arc<RwLock<IndexData>>,
    metrics: Arc<ChildIndexMetrics>,
}

impl ChildIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `child` as owned by `owner`
    ///
    /// Returns `true` if the child was newly added.
    pub fn insert(&self, kind: ChildKind, owner: ObjectKey, child: ObjectKey) -> bool {
        let mut inner = safe_write(&self.inner);

        // A child belongs to exactly one owner; a relabel moves it
        let previous = inner.owner_of.get(&(kind, child.clone())).cloned();
        let is_new = previous.as_ref() != Some(&owner);
        if is_new {
            inner.detach(kind, &child);
            inner.attach(kind, owner, child);
        }
        self.metrics.record_add();
        set_child_index_owners(inner.by_owner.len());
        is_new
    }

    /// Forget `child`, whoever owned it
    ///
    /// Returns `true` if it was present.
    pub fn remove(&self, kind: ChildKind, child: &ObjectKey) -> bool {
        let mut inner = safe_write(&self.inner);
        let was_present = inner.detach(kind, child).is_some();
        self.metrics.record_remove();
        set_child_index_owners(inner.by_owner.len());
        if was_present {
            debug!("ChildIndex: removed {} {} (owners: {})", kind, child, inner.by_owner.len());
        }
        was_present
    }

    /// Replace every entry of `kind` with `entries` (after a re-list)
    pub fn replace_kind(&self, kind: ChildKind, entries: Vec<(ObjectKey, ObjectKey)>) {
        let mut inner = safe_write(&self.inner);
        let stale: Vec<ObjectKey> = inner
            .owner_of
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, child)| child.clone())
            .collect();
        for child in &stale {
            inner.detach(kind, child);
        }
        for (owner, child) in entries {
            inner.detach(kind, &child);
            inner.attach(kind, owner, child);
        }
        set_child_index_owners(inner.by_owner.len());
        debug!("ChildIndex: resynced {} (owners: {})", kind, inner.by_owner.len());
    }

    /// Snapshot of everything `owner` owns
    pub fn children(&self, owner: &ObjectKey) -> Children {
        let inner = safe_read(&self.inner);
        let found = inner.by_owner.get(owner).cloned();
        self.metrics.record_lookup(found.is_some());
        found.unwrap_or_default()
    }

    /// Number of owners with at least one child
    pub fn len(&self) -> usize {
        safe_read(&self.inner).by_owner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn owners(&self) -> Vec<ObjectKey> {
        let mut owners: Vec<ObjectKey> = safe_read(&self.inner).by_owner.keys().cloned().collect();
        owners.sort();
        owners
    }

    pub fn metrics(&self) -> &ChildIndexMetrics {
        &self.metrics
    }
}

impl fmt::Display for ChildIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let owners = self.owners();
        match owners.len() {
            0 => write!(f, "ChildIndex: empty"),
            n if n <= 3 => {
                let names: Vec<_> = owners.iter().map(ObjectKey::to_string).collect();
                write!(f, "ChildIndex: {} owner(s) [{}]", n, names.join(", "))
            }
            n => {
                let names: Vec<_> = owners.iter().take(3).map(ObjectKey::to_string).collect();
                write!(f, "ChildIndex: {} owner(s) [{}, ...]", n, names.join(", "))
            }
        }
    }
}

// =============================================================================
// IndexFeeder - watcher events → index
// =============================================================================

/// Applies one kind's watcher events to the index
///
/// Objects seen between `Init` and `InitDone` are buffered and swapped in
/// together, so children deleted while the watch was down disappear too.
pub struct IndexFeeder {
    kind: ChildKind,
    index: ChildIndex,
    pending: Option<Vec<(ObjectKey, ObjectKey)>>,
}

impl IndexFeeder {
    pub fn new(kind: ChildKind, index: ChildIndex) -> Self {
        Self {
            kind,
            index,
            pending: None,
        }
    }

    fn entry<K: ResourceExt>(obj: &K) -> Option<(ObjectKey, ObjectKey)> {
        let owner = ObjectKey::owner_from_labels(obj.labels())?;
        let child = ObjectKey::of(obj)?;
        Some((owner, child))
    }

    pub fn handle<K: ResourceExt>(&mut self, event: &watcher::Event<K>) {
        match event {
            watcher::Event::Apply(obj) => {
                if let Some((owner, child)) = Self::entry(obj) {
                    self.index.insert(self.kind, owner, child);
                } else if let Some(child) = ObjectKey::of(obj) {
                    // Ownership labels were stripped
                    self.index.remove(self.kind, &child);
                }
            }
            watcher::Event::Delete(obj) => {
                if let Some(child) = ObjectKey::of(obj) {
                    self.index.remove(self.kind, &child);
                }
            }
            watcher::Event::Init => {
                self.pending = Some(Vec::new());
            }
            watcher::Event::InitApply(obj) => {
                if let (Some(pending), Some(entry)) = (self.pending.as_mut(), Self::entry(obj)) {
                    pending.push(entry);
                }
            }
            watcher::Event::InitDone => {
                if let Some(entries) = self.pending.take() {
                    self.index.replace_kind(self.kind, entries);
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use common::HTTPRoute;
    use kube::api::ObjectMeta;

    fn route(ns: &str, name: &str, owner: Option<(&str, &str)>) -> HTTPRoute {
        let labels = owner.map(|(owner_ns, owner_name)| {
            BTreeMap::from([
                (OWNER_NAMESPACE_LABEL.to_string(), owner_ns.to_string()),
                (OWNER_NAME_LABEL.to_string(), owner_name.to_string()),
            ])
        });
        HTTPRoute {
            metadata: ObjectMeta {
                namespace: Some(ns.to_string()),
                name: Some(name.to_string()),
                labels,
                ..Default::default()
            },
            spec: Default::default(),
            status: None,
        }
    }

    // =========================================================================
    // Index operations
    // =========================================================================

    #[test]
    fn test_insert_and_lookup() {
        let index = ChildIndex::new();
        let owner = ObjectKey::new("default", "hello");

        assert!(index.insert(ChildKind::Route, owner.clone(), ObjectKey::new("default", "r1")));
        assert!(
            !index.insert(ChildKind::Route, owner.clone(), ObjectKey::new("default", "r1")),
            "Second insert of the same child should report existing"
        );
        index.insert(ChildKind::Grant, owner.clone(), ObjectKey::new("backend", "g1"));

        let children = index.children(&owner);
        assert_eq!(children.routes.len(), 1);
        assert!(children.grants.contains(&ObjectKey::new("backend", "g1")));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_remove_drops_empty_owner() {
        let index = ChildIndex::new();
        let owner = ObjectKey::new("default", "hello");
        let child = ObjectKey::new("default", "r1");

        index.insert(ChildKind::Route, owner.clone(), child.clone());
        assert!(index.remove(ChildKind::Route, &child));
        assert!(!index.remove(ChildKind::Route, &child));
        assert!(index.is_empty(), "Owner with no children should be dropped");
        assert!(index.children(&owner).is_empty());
    }

    #[test]
    fn test_relabel_moves_child() {
        let index = ChildIndex::new();
        let child = ObjectKey::new("default", "r1");
        index.insert(ChildKind::Route, ObjectKey::new("default", "a"), child.clone());
        index.insert(ChildKind::Route, ObjectKey::new("default", "b"), child.clone());

        assert!(index.children(&ObjectKey::new("default", "a")).is_empty());
        assert!(index
            .children(&ObjectKey::new("default", "b"))
            .routes
            .contains(&child));
    }

    #[test]
    fn test_relabel_then_remove_leaves_nothing_behind() {
        let index = ChildIndex::new();
        let child = ObjectKey::new("default", "r1");
        let a = ObjectKey::new("default", "a");
        let b = ObjectKey::new("default", "b");

        assert!(index.insert(ChildKind::Route, a.clone(), child.clone()));
        assert!(index.insert(ChildKind::Route, b.clone(), child.clone()), "Moving owners counts as new");
        assert!(!index.insert(ChildKind::Route, b.clone(), child.clone()));
        assert_eq!(index.owners(), vec![b]);

        assert!(index.remove(ChildKind::Route, &child));
        assert!(index.is_empty());
        let inner = safe_read(&index.inner);
        assert!(inner.owner_of.is_empty(), "Reverse entries go with the child");
    }

    #[test]
    fn test_relist_moves_relabelled_child() {
        let index = ChildIndex::new();
        let child = ObjectKey::new("other", "g1");
        index.insert(ChildKind::Grant, ObjectKey::new("default", "a"), child.clone());
        index.insert(ChildKind::Route, ObjectKey::new("default", "a"), ObjectKey::new("default", "r1"));

        index.replace_kind(
            ChildKind::Grant,
            vec![(ObjectKey::new("default", "b"), child.clone())],
        );

        let a = index.children(&ObjectKey::new("default", "a"));
        assert!(a.grants.is_empty());
        assert_eq!(a.routes.len(), 1, "Other kinds survive a re-list");
        assert!(index.children(&ObjectKey::new("default", "b")).grants.contains(&child));
        assert_eq!(safe_read(&index.inner).owner_of.len(), 2);
    }

    #[test]
    fn test_kinds_are_independent() {
        let index = ChildIndex::new();
        let owner = ObjectKey::new("default", "hello");
        let key = ObjectKey::new("default", "same-name");
        index.insert(ChildKind::Route, owner.clone(), key.clone());
        index.insert(ChildKind::Grant, owner.clone(), key.clone());

        index.remove(ChildKind::Route, &key);
        let children = index.children(&owner);
        assert!(children.routes.is_empty());
        assert!(children.grants.contains(&key));
    }

    #[test]
    fn test_clone_shares_data() {
        let index = ChildIndex::new();
        let clone = index.clone();
        index.insert(
            ChildKind::Route,
            ObjectKey::new("default", "hello"),
            ObjectKey::new("default", "r1"),
        );
        assert_eq!(clone.len(), 1);
    }

    #[test]
    fn test_display() {
        let index = ChildIndex::new();
        assert_eq!(index.to_string(), "ChildIndex: empty");

        index.insert(
            ChildKind::Route,
            ObjectKey::new("default", "hello"),
            ObjectKey::new("default", "r1"),
        );
        assert_eq!(index.to_string(), "ChildIndex: 1 owner(s) [default/hello]");
    }

    #[test]
    fn test_lookup_metrics() {
        let index = ChildIndex::new();
        let owner = ObjectKey::new("default", "hello");
        index.insert(ChildKind::Route, owner.clone(), ObjectKey::new("default", "r1"));

        index.children(&owner);
        index.children(&ObjectKey::new("default", "missing"));

        assert_eq!(index.metrics().lookups(), 2);
        assert_eq!(index.metrics().hits(), 1);
        assert_eq!(index.metrics().adds(), 1);
    }

    // =========================================================================
    // Feeding from watcher events
    // =========================================================================

    #[test]
    fn test_feeder_apply_and_delete() {
        let index = ChildIndex::new();
        let mut feeder = IndexFeeder::new(ChildKind::Route, index.clone());
        let owner = ObjectKey::new("default", "hello");

        feeder.handle(&watcher::Event::Apply(route("default", "r1", Some(("default", "hello")))));
        assert_eq!(index.children(&owner).routes.len(), 1);

        feeder.handle(&watcher::Event::Delete(route("default", "r1", None)));
        assert!(index.is_empty());
    }

    #[test]
    fn test_feeder_ignores_unlabelled() {
        let index = ChildIndex::new();
        let mut feeder = IndexFeeder::new(ChildKind::Route, index.clone());

        feeder.handle(&watcher::Event::Apply(route("default", "foreign", None)));
        assert!(index.is_empty());
    }

    #[test]
    fn test_feeder_relist_replaces_entries() {
        let index = ChildIndex::new();
        let mut feeder = IndexFeeder::new(ChildKind::Route, index.clone());
        let owner = ObjectKey::new("default", "hello");

        feeder.handle(&watcher::Event::Apply(route("default", "gone", Some(("default", "hello")))));

        feeder.handle(&watcher::Event::<HTTPRoute>::Init);
        feeder.handle(&watcher::Event::InitApply(route("default", "kept", Some(("default", "hello")))));
        assert!(
            index.children(&owner).routes.contains(&ObjectKey::new("default", "gone")),
            "Entries stay visible until the re-list completes"
        );
        feeder.handle(&watcher::Event::<HTTPRoute>::InitDone);

        let routes = index.children(&owner).routes;
        assert_eq!(routes.len(), 1);
        assert!(routes.contains(&ObjectKey::new("default", "kept")));
    }
}
