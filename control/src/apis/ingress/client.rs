//! Cluster access for the Ingress reconciler
//!
//! Reads come from watch-fed caches (reflector stores plus the child
//! index); writes go straight to the API server with optimistic
//! concurrency. The trait lets the reconciler be tested without a cluster.

use super::child_index::{ChildIndex, ChildKind, IndexFeeder, ObjectKey};
use crate::apis::metrics::record_child_write;
use crate::error::ClientError;
use async_trait::async_trait;
use common::gateway::gateway_addresses;
use common::{Gateway, GatewayStatusAddresses, HTTPRoute, Ingress, IngressStatus, ReferenceGrant};
use common::{FINALIZER, OWNER_NAME_LABEL};
use futures::channel::mpsc::UnboundedSender;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, ResourceExt};
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Cached reads and conditional writes the reconciler depends on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RouteClient: Send + Sync {
    /// HTTPRoutes labelled as owned by `owner`, from cache
    fn owned_routes(&self, owner: &ObjectKey) -> Vec<HTTPRoute>;

    /// ReferenceGrants labelled as owned by `owner`, from cache
    fn owned_grants(&self, owner: &ObjectKey) -> Vec<ReferenceGrant>;

    /// All Gateways, from cache
    fn gateways(&self) -> Vec<Gateway>;

    async fn create_route(&self, route: &HTTPRoute) -> Result<(), ClientError>;

    /// Replace a route; fails with `Conflict` if its resourceVersion is stale
    async fn replace_route(&self, route: &HTTPRoute) -> Result<(), ClientError>;

    /// Delete a route; an already missing route is not an error
    async fn delete_route(&self, key: &ObjectKey) -> Result<(), ClientError>;

    async fn create_grant(&self, grant: &ReferenceGrant) -> Result<(), ClientError>;

    async fn replace_grant(&self, grant: &ReferenceGrant) -> Result<(), ClientError>;

    async fn delete_grant(&self, key: &ObjectKey) -> Result<(), ClientError>;

    /// Write the Ingress status, conditional on `resource_version`
    async fn patch_status(
        &self,
        key: &ObjectKey,
        resource_version: Option<String>,
        status: &IngressStatus,
    ) -> Result<(), ClientError>;

    async fn add_finalizer(&self, ingress: &Ingress) -> Result<(), ClientError>;

    async fn remove_finalizer(&self, ingress: &Ingress) -> Result<(), ClientError>;
}

/// Record the outcome of a child write and pass it through
fn track<T>(kind: &str, verb: &str, result: Result<T, kube::Error>) -> Result<T, ClientError> {
    match result {
        Ok(v) => {
            record_child_write(kind, verb, "success");
            Ok(v)
        }
        Err(e) => {
            let err = ClientError::from(e);
            let label = match &err {
                ClientError::Conflict(_) => "conflict",
                ClientError::Transient(_) => "transient",
                ClientError::Invalid(_) => "invalid",
                ClientError::NotFound(_) => "not_found",
            };
            record_child_write(kind, verb, label);
            Err(err)
        }
    }
}

/// Treat 404 on delete as success
fn ignore_not_found(result: Result<(), ClientError>) -> Result<(), ClientError> {
    match result {
        Err(ClientError::NotFound(_)) => Ok(()),
        other => other,
    }
}

fn finalizers_without(ingress: &Ingress, name: &str) -> Vec<String> {
    ingress
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != name)
        .cloned()
        .collect()
}

/// [`RouteClient`] backed by a kube client and reflector caches
#[derive(Clone)]
pub struct KubeRouteClient {
    client: Client,
    field_manager: String,
    index: ChildIndex,
    routes: Store<HTTPRoute>,
    grants: Store<ReferenceGrant>,
    gateways: Store<Gateway>,
}

impl KubeRouteClient {
    /// Build the client and the watch tasks feeding its caches
    ///
    /// The returned futures must be spawned; they run until their watch
    /// streams end. Gateway address changes are announced on `trigger`.
    pub fn new(
        client: Client,
        field_manager: &str,
        index: ChildIndex,
        trigger: UnboundedSender<()>,
    ) -> (Self, Vec<BoxFuture<'static, ()>>) {
        let children = WatcherConfig::default().labels(OWNER_NAME_LABEL);

        let (routes, routes_writer) = reflector::store();
        let route_stream = watcher(Api::<HTTPRoute>::all(client.clone()), children.clone())
            .default_backoff()
            .reflect(routes_writer);
        let mut route_feeder = IndexFeeder::new(ChildKind::Route, index.clone());
        let route_task = route_stream
            .for_each(move |event| {
                match event {
                    Ok(event) => route_feeder.handle(&event),
                    Err(e) => warn!("HTTPRoute watcher error: {}", e),
                }
                futures::future::ready(())
            })
            .boxed();

        let (grants, grants_writer) = reflector::store();
        let grant_stream = watcher(Api::<ReferenceGrant>::all(client.clone()), children)
            .default_backoff()
            .reflect(grants_writer);
        let mut grant_feeder = IndexFeeder::new(ChildKind::Grant, index.clone());
        let grant_task = grant_stream
            .for_each(move |event| {
                match event {
                    Ok(event) => grant_feeder.handle(&event),
                    Err(e) => warn!("ReferenceGrant watcher error: {}", e),
                }
                futures::future::ready(())
            })
            .boxed();

        let (gateways, gateways_writer) = reflector::store();
        let gateway_stream = watcher(Api::<Gateway>::all(client.clone()), WatcherConfig::default())
            .default_backoff()
            .reflect(gateways_writer);
        let mut announcer = AddressAnnouncer::new(trigger);
        let gateway_task = gateway_stream
            .for_each(move |event| {
                match event {
                    Ok(event) => announcer.handle(&event),
                    Err(e) => warn!("Gateway watcher error: {}", e),
                }
                futures::future::ready(())
            })
            .boxed();

        let this = Self {
            client,
            field_manager: field_manager.to_string(),
            index,
            routes,
            grants,
            gateways,
        };
        (this, vec![route_task, grant_task, gateway_task])
    }

    /// Wait for the initial list of every cache
    pub async fn wait_until_ready(&self) -> Result<(), reflector::store::WriterDropped> {
        self.routes.wait_until_ready().await?;
        self.grants.wait_until_ready().await?;
        self.gateways.wait_until_ready().await?;
        info!("Child and Gateway caches synced ({})", self.index);
        Ok(())
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }

    fn patch_params(&self) -> PatchParams {
        PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }

    async fn patch_finalizers(
        &self,
        ingress: &Ingress,
        finalizers: Vec<String>,
    ) -> Result<(), ClientError> {
        let namespace = ingress.namespace().unwrap_or_default();
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), &namespace);
        let patch = json!({
            "metadata": {
                "resourceVersion": ingress.resource_version(),
                "finalizers": finalizers,
            }
        });
        api.patch(&ingress.name_any(), &self.patch_params(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(ClientError::from)
    }
}

fn cached<K>(store: &Store<K>, keys: impl IntoIterator<Item = ObjectKey>) -> Vec<K>
where
    K: kube::Resource<DynamicType = ()> + Clone + 'static,
{
    keys.into_iter()
        .filter_map(|key| store.get(&ObjectRef::new(&key.name).within(&key.namespace)))
        .map(|obj| (*obj).clone())
        .collect()
}

#[async_trait]
impl RouteClient for KubeRouteClient {
    fn owned_routes(&self, owner: &ObjectKey) -> Vec<HTTPRoute> {
        cached(&self.routes, self.index.children(owner).routes)
    }

    fn owned_grants(&self, owner: &ObjectKey) -> Vec<ReferenceGrant> {
        cached(&self.grants, self.index.children(owner).grants)
    }

    fn gateways(&self) -> Vec<Gateway> {
        self.gateways.state().iter().map(|g| (**g).clone()).collect()
    }

    async fn create_route(&self, route: &HTTPRoute) -> Result<(), ClientError> {
        let api: Api<HTTPRoute> =
            Api::namespaced(self.client.clone(), &route.namespace().unwrap_or_default());
        track("HTTPRoute", "create", api.create(&self.post_params(), route).await).map(|_| ())
    }

    async fn replace_route(&self, route: &HTTPRoute) -> Result<(), ClientError> {
        let api: Api<HTTPRoute> =
            Api::namespaced(self.client.clone(), &route.namespace().unwrap_or_default());
        let result = api
            .replace(&route.name_any(), &self.post_params(), route)
            .await;
        track("HTTPRoute", "update", result).map(|_| ())
    }

    async fn delete_route(&self, key: &ObjectKey) -> Result<(), ClientError> {
        let api: Api<HTTPRoute> = Api::namespaced(self.client.clone(), &key.namespace);
        let result = api.delete(&key.name, &DeleteParams::default()).await;
        ignore_not_found(track("HTTPRoute", "delete", result).map(|_| ()))
    }

    async fn create_grant(&self, grant: &ReferenceGrant) -> Result<(), ClientError> {
        let api: Api<ReferenceGrant> =
            Api::namespaced(self.client.clone(), &grant.namespace().unwrap_or_default());
        track("ReferenceGrant", "create", api.create(&self.post_params(), grant).await)
            .map(|_| ())
    }

    async fn replace_grant(&self, grant: &ReferenceGrant) -> Result<(), ClientError> {
        let api: Api<ReferenceGrant> =
            Api::namespaced(self.client.clone(), &grant.namespace().unwrap_or_default());
        let result = api
            .replace(&grant.name_any(), &self.post_params(), grant)
            .await;
        track("ReferenceGrant", "update", result).map(|_| ())
    }

    async fn delete_grant(&self, key: &ObjectKey) -> Result<(), ClientError> {
        let api: Api<ReferenceGrant> = Api::namespaced(self.client.clone(), &key.namespace);
        let result = api.delete(&key.name, &DeleteParams::default()).await;
        ignore_not_found(track("ReferenceGrant", "delete", result).map(|_| ()))
    }

    async fn patch_status(
        &self,
        key: &ObjectKey,
        resource_version: Option<String>,
        status: &IngressStatus,
    ) -> Result<(), ClientError> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), &key.namespace);
        let patch = json!({
            "metadata": { "resourceVersion": resource_version },
            "status": status,
        });
        api.patch_status(&key.name, &self.patch_params(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(ClientError::from)
    }

    async fn add_finalizer(&self, ingress: &Ingress) -> Result<(), ClientError> {
        let mut finalizers = finalizers_without(ingress, FINALIZER);
        finalizers.push(FINALIZER.to_string());
        self.patch_finalizers(ingress, finalizers).await
    }

    async fn remove_finalizer(&self, ingress: &Ingress) -> Result<(), ClientError> {
        self.patch_finalizers(ingress, finalizers_without(ingress, FINALIZER))
            .await
    }
}

/// Announces Gateway address changes so Ingress addresses follow them
///
/// Gateways also update their status for reasons that do not affect any
/// Ingress; only address changes are announced.
struct AddressAnnouncer {
    trigger: UnboundedSender<()>,
    seen: HashMap<ObjectKey, Vec<GatewayStatusAddresses>>,
}

impl AddressAnnouncer {
    fn new(trigger: UnboundedSender<()>) -> Self {
        Self {
            trigger,
            seen: HashMap::new(),
        }
    }

    fn announce(&self, why: &str) {
        debug!("Gateway addresses changed ({}), reconciling all Ingresses", why);
        if self.trigger.unbounded_send(()).is_err() {
            warn!("Ingress controller is gone, gateway change not propagated");
        }
    }

    fn handle(&mut self, event: &watcher::Event<Gateway>) {
        match event {
            watcher::Event::Apply(gw) | watcher::Event::InitApply(gw) => {
                let Some(key) = ObjectKey::of(gw) else {
                    return;
                };
                let addresses = gateway_addresses(gw).to_vec();
                let changed = self.seen.get(&key) != Some(&addresses);
                self.seen.insert(key.clone(), addresses);
                if changed && matches!(event, watcher::Event::Apply(_)) {
                    self.announce(&key.to_string());
                }
            }
            watcher::Event::Delete(gw) => {
                if let Some(key) = ObjectKey::of(gw) {
                    self.seen.remove(&key);
                    self.announce(&key.to_string());
                }
            }
            watcher::Event::Init => {}
            watcher::Event::InitDone => self.announce("resync"),
        }
    }
}
