//! Ingress to Gateway API translation
//!
//! - synthesize: desired HTTPRoutes and ReferenceGrants for one Ingress
//! - diff: change set between desired and observed children
//! - status: Ingress status projected from observed children and gateways
//! - child_index: owner to children lookup fed by watch events
//! - client: cluster reads and writes behind a mockable trait
//! - ingress: the reconciler tying them together

pub mod child_index;
pub mod client;
pub mod diff;
#[allow(clippy::module_inception)]
pub mod ingress;
pub mod status;
pub mod synthesize;

pub use client::{KubeRouteClient, RouteClient};
pub use ingress::IngressReconciler;
