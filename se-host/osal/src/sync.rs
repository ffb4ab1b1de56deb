// Licensed under the Apache-2.0 license

//! Synchronization primitives abstraction

use crate::error::{OsalError, OsalResult};

use std::sync as std_sync;

pub type MutexGuard<'a, T> = std_sync::MutexGuard<'a, T>;

/// Mutex abstraction
///
/// A poisoned lock is reported as [`OsalError::ResourceUnavailable`] instead
/// of panicking the caller.
pub struct Mutex<T> {
    inner: std_sync::Mutex<T>,
}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: std_sync::Mutex::new(value),
        }
    }

    pub fn lock(&self) -> OsalResult<MutexGuard<'_, T>> {
        self.inner
            .lock()
            .map_err(|_| OsalError::ResourceUnavailable)
    }

    pub fn into_inner(self) -> OsalResult<T> {
        self.inner
            .into_inner()
            .map_err(|_| OsalError::ResourceUnavailable)
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
