//! Ingress reconciler
//!
//! One pass: observe owned children, synthesize the desired ones, apply the
//! difference (creates and updates before deletes), then project and persist
//! the Ingress status from a fresh read of the caches.

use super::child_index::ObjectKey;
use super::client::RouteClient;
use super::diff::{plan, ChangeSet};
use super::status::{self, Observed};
use super::synthesize::{synthesize, Synthesis};
use crate::apis::gateway::config::GatewayConfigs;
use crate::apis::gateway::store::ConfigStore;
use crate::apis::metrics::record_ingress_reconciliation;
use crate::config::ControllerConfig;
use crate::error::{ClientError, Error};
use common::{HTTPRoute, Ingress, IngressStatus, ReferenceGrant};
use common::{FINALIZER, INGRESS_CLASS_ANNOTATION, OWNER_NAME_LABEL};
use futures::{Stream, StreamExt};
use kube::api::Api;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Client, Resource, ResourceExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Consecutive retryable failures per Ingress
///
/// The lock is never held across an await.
#[derive(Debug, Default)]
struct RetryTracker {
    failures: Mutex<HashMap<ObjectKey, u32>>,
}

impl RetryTracker {
    fn record_failure(&self, key: &ObjectKey) -> u32 {
        let mut failures = self.failures.lock().unwrap_or_else(|p| p.into_inner());
        let count = failures.entry(key.clone()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    fn failures(&self, key: &ObjectKey) -> u32 {
        let failures = self.failures.lock().unwrap_or_else(|p| p.into_inner());
        failures.get(key).copied().unwrap_or(0)
    }

    fn reset(&self, key: &ObjectKey) {
        let mut failures = self.failures.lock().unwrap_or_else(|p| p.into_inner());
        failures.remove(key);
    }
}

/// Ingress reconciler
pub struct IngressReconciler {
    client: Arc<dyn RouteClient>,
    store: ConfigStore,
    config: ControllerConfig,
    retries: RetryTracker,
}

impl IngressReconciler {
    pub fn new(client: Arc<dyn RouteClient>, store: ConfigStore, config: ControllerConfig) -> Self {
        Self {
            client,
            store,
            config,
            retries: RetryTracker::default(),
        }
    }

    /// Whether this controller is responsible for `ingress`
    ///
    /// Ingresses without a class annotation are handled.
    fn is_ours(&self, ingress: &Ingress) -> bool {
        ingress
            .annotations()
            .get(INGRESS_CLASS_ANNOTATION)
            .map(|class| class == &self.config.ingress_class)
            .unwrap_or(true)
    }

    /// Reconcile a single Ingress
    pub async fn reconcile(ingress: Arc<Ingress>, ctx: Arc<Self>) -> Result<Action, Error> {
        let start = Instant::now();
        let key = ObjectKey::of(ingress.as_ref())
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;

        info!("Reconciling Ingress: {}", key);

        let result = ctx.reconcile_ingress(&ingress, &key).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) if e.is_retryable() => "retry",
            Err(_) => "error",
        };
        record_ingress_reconciliation(&key.namespace, start.elapsed().as_secs_f64(), outcome);

        match result {
            Ok(action) => {
                ctx.retries.reset(&key);
                Ok(action)
            }
            Err(e) if e.is_retryable() => {
                let failures = ctx.retries.record_failure(&key);
                if failures >= ctx.config.retry.limit {
                    warn!(
                        ingress = %key,
                        failures,
                        error = %e,
                        "Retry limit reached, marking Ingress failed"
                    );
                    ctx.persist_failure(&ingress, &key, &e).await;
                }
                Err(e)
            }
            Err(e) => {
                // Retrying cannot fix it; wait for the Ingress or config to change
                warn!(ingress = %key, error = %e, "Ingress cannot be programmed");
                ctx.persist_failure(&ingress, &key, &e).await;
                Ok(Action::await_change())
            }
        }
    }

    async fn reconcile_ingress(&self, ingress: &Ingress, key: &ObjectKey) -> Result<Action, Error> {
        if !self.is_ours(ingress) {
            debug!("Ingress {} belongs to another ingress class, ignoring", key);
            return Ok(Action::await_change());
        }

        let has_finalizer = ingress.finalizers().iter().any(|f| f == FINALIZER);

        if ingress.meta().deletion_timestamp.is_some() {
            if has_finalizer {
                self.cleanup(ingress, key).await?;
            }
            return Ok(Action::await_change());
        }

        if !has_finalizer {
            // The patch produces a watch event which starts the real pass
            self.client.add_finalizer(ingress).await?;
            debug!("Added finalizer to Ingress {}", key);
            return Ok(Action::await_change());
        }

        let snapshot = self.store.snapshot();
        if snapshot.version == 0 {
            debug!("Gateway configuration not loaded yet, deferring {}", key);
            return Ok(Action::requeue(self.config.pending_requeue()));
        }

        let desired = synthesize(ingress, &snapshot.configs)?;
        for warning in &desired.warnings {
            debug!(ingress = %key, "{}", warning);
        }

        let routes = self.client.owned_routes(key);
        let grants = self.client.owned_grants(key);
        let changes = plan(ingress, &desired, &routes, &grants);
        if !changes.is_empty() {
            info!(
                ingress = %key,
                config_version = snapshot.version,
                writes = changes.len(),
                "Applying child changes"
            );
            self.apply(&changes).await?;
        }

        let next = self.project(ingress, &desired, key, &snapshot.configs);
        let ready = next.is_ready();
        self.persist(ingress, key, next).await?;

        if ready {
            Ok(Action::requeue(self.config.requeue_interval()))
        } else {
            Ok(Action::requeue(self.config.pending_requeue()))
        }
    }

    /// Apply a change set, stopping at the first failed write
    ///
    /// Grants go first so cross-namespace routes are never rejected for a
    /// missing grant; deletes come last so no traffic is dropped while
    /// their replacements are still being written.
    async fn apply(&self, changes: &ChangeSet) -> Result<(), ClientError> {
        for grant in &changes.create_grants {
            self.client.create_grant(grant).await?;
        }
        for grant in &changes.update_grants {
            self.client.replace_grant(grant).await?;
        }
        for route in &changes.create_routes {
            self.client.create_route(route).await?;
        }
        for route in &changes.update_routes {
            self.client.replace_route(route).await?;
        }
        for route in &changes.delete_routes {
            self.client.delete_route(route).await?;
        }
        for grant in &changes.delete_grants {
            self.client.delete_grant(grant).await?;
        }
        Ok(())
    }

    /// Status from a fresh read of the caches
    fn project(
        &self,
        ingress: &Ingress,
        desired: &Synthesis,
        key: &ObjectKey,
        configs: &GatewayConfigs,
    ) -> IngressStatus {
        let routes: Vec<HTTPRoute> = self.client.owned_routes(key);
        let gateways = self.client.gateways();
        let observed = Observed {
            routes: &routes,
            gateways: &gateways,
        };
        let projected = status::project(desired, observed, configs, &self.config.cluster_domain);
        status::finalize(
            projected,
            ingress.status.as_ref(),
            ingress.meta().generation,
            &now(),
        )
    }

    /// Write `next` unless it matches the stored status
    async fn persist(
        &self,
        ingress: &Ingress,
        key: &ObjectKey,
        next: IngressStatus,
    ) -> Result<(), ClientError> {
        if !status::needs_persist(ingress.status.as_ref(), &next) {
            debug!("Ingress {} status unchanged", key);
            return Ok(());
        }
        self.client
            .patch_status(key, ingress.resource_version(), &next)
            .await?;
        info!(ingress = %key, ready = next.is_ready(), "Updated Ingress status");
        Ok(())
    }

    /// Record a terminal failure in status; write errors are only logged
    async fn persist_failure(&self, ingress: &Ingress, key: &ObjectKey, err: &Error) {
        let next = status::finalize(
            status::failed(err.reason(), &err.to_string()),
            ingress.status.as_ref(),
            ingress.meta().generation,
            &now(),
        );
        if let Err(e) = self.persist(ingress, key, next).await {
            warn!(ingress = %key, error = %e, "Failed to record failure in status");
        }
    }

    /// Delete every owned child, then release the Ingress
    async fn cleanup(&self, ingress: &Ingress, key: &ObjectKey) -> Result<(), ClientError> {
        info!("Ingress {} is being deleted, removing children", key);

        for route in self.client.owned_routes(key) {
            if let Some(child) = ObjectKey::of(&route) {
                self.client.delete_route(&child).await?;
            }
        }
        for grant in self.client.owned_grants(key) {
            if let Some(child) = ObjectKey::of(&grant) {
                self.client.delete_grant(&child).await?;
            }
        }
        self.client.remove_finalizer(ingress).await
    }

    /// Error handler for controller
    pub fn error_policy(ingress: Arc<Ingress>, error: &Error, ctx: Arc<Self>) -> Action {
        let failures = ObjectKey::of(ingress.as_ref())
            .map(|key| ctx.retries.failures(&key))
            .unwrap_or(1)
            .max(1);
        let delay = ctx.config.retry.backoff(failures);
        error!(
            ingress = %ingress.name_any(),
            failures,
            reason = error.reason(),
            "Ingress reconciliation error: {}, retrying in {:?}",
            error,
            delay
        );
        Action::requeue(delay)
    }

    /// Start the Ingress controller
    ///
    /// Children wake their owner; every message on `trigger` reconciles all
    /// Ingresses (gateway configuration or address changes).
    pub async fn run<S>(self, client: Client, trigger: S) -> Result<(), kube::Error>
    where
        S: Stream<Item = ()> + Send + Sync + 'static,
    {
        let ingresses: Api<Ingress> = Api::all(client.clone());
        let routes: Api<HTTPRoute> = Api::all(client.clone());
        let grants: Api<ReferenceGrant> = Api::all(client);
        let children = WatcherConfig::default().labels(OWNER_NAME_LABEL);
        let ctx = Arc::new(self);

        info!(
            ingress_class = %ctx.config.ingress_class,
            "Starting Ingress controller"
        );

        // Grants live in backend namespaces and cannot carry an owner
        // reference, so they are mapped back through their labels.
        Controller::new(ingresses, WatcherConfig::default())
            .owns(routes, children.clone())
            .watches(grants, children, |grant| {
                ObjectKey::owner_from_labels(grant.labels())
                    .map(|owner| ObjectRef::<Ingress>::new(&owner.name).within(&owner.namespace))
            })
            .reconcile_all_on(trigger)
            .run(Self::reconcile, Self::error_policy, ctx)
            .for_each(|res| async move {
                match res {
                    Ok(o) => debug!("Reconciled Ingress: {:?}", o),
                    Err(e) => debug!("Reconciliation error: {:?}", e),
                }
            })
            .await;

        Ok(())
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
