//! netgate control plane library
//!
//! Compiles neutral Ingress resources into Gateway API HTTPRoutes and
//! ReferenceGrants and reports their readiness back on the Ingress.

pub mod apis;
pub mod config;
pub mod error;
pub mod server;
mod sync;
