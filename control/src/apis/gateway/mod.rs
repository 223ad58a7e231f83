//! Gateway bindings
//!
//! - config: parsing and validation of the `config-gateway` document
//! - store: the active configuration snapshot and its ConfigMap watcher

pub mod config;
pub mod store;
