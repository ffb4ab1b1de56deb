// Licensed under the Apache-2.0 license

//! Thread-safe handle to an engine
//!
//! Every call takes the engine lock, so `create`, `destroy` and `invoke` from
//! several threads serialize against the tick thread calling
//! [`SharedEngine::poll`]. Callbacks run with the lock held and must not
//! call back into the handle.

use std::sync::Arc;

use se_host_commands::CommandHandler;
use se_host_osal::{Mutex, MutexGuard, Ticks};

use crate::instance::{Callback, InstanceId, InstanceState};
use crate::{Engine, EngineError, EngineResult, EngineStatistics};

#[derive(Clone)]
pub struct SharedEngine {
    inner: Arc<Mutex<Engine>>,
}

impl SharedEngine {
    pub fn new(engine: Engine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    /// Exclusive access, e.g. for the typed invoke wrappers
    pub fn lock(&self) -> EngineResult<MutexGuard<'_, Engine>> {
        self.inner
            .lock()
            .map_err(|_| EngineError::InvalidInput("engine lock poisoned"))
    }

    pub fn create(&self, callback: Callback) -> EngineResult<InstanceId> {
        self.lock()?.create(callback)
    }

    pub fn destroy(&self, id: InstanceId) -> EngineResult<()> {
        self.lock()?.destroy(id)
    }

    pub fn invoke(&self, id: InstanceId, handler: Box<dyn CommandHandler>) -> EngineResult<()> {
        self.lock()?.invoke(id, handler)
    }

    pub fn poll(&self) -> EngineResult<bool> {
        Ok(self.lock()?.poll())
    }

    pub fn run_until_idle(&self) -> EngineResult<usize> {
        Ok(self.lock()?.run_until_idle())
    }

    pub fn next_deadline(&self) -> EngineResult<Option<Ticks>> {
        Ok(self.lock()?.next_deadline())
    }

    pub fn instance_state(&self, id: InstanceId) -> EngineResult<Option<InstanceState>> {
        Ok(self.lock()?.instance_state(id))
    }

    pub fn statistics(&self) -> EngineResult<EngineStatistics> {
        Ok(self.lock()?.statistics())
    }
}
