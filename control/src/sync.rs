//! Lock helpers shared by the in-memory stores

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

/// Safe RwLock read helper that recovers from poisoning
#[inline]
pub(crate) fn safe_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        warn!("RwLock poisoned during read, recovering (data is still valid)");
        poisoned.into_inner()
    })
}

/// Safe RwLock write helper that recovers from poisoning
#[inline]
pub(crate) fn safe_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        warn!("RwLock poisoned during write, recovering (data is still valid)");
        poisoned.into_inner()
    })
}
