// Licensed under the Apache-2.0 license

//! Secure-Element Simulator Client Library
//!
//! Drives a simulated device through the host library. [`UdpTransport`]
//! carries frames to the simulator process; [`SeClient`] owns an engine with
//! one instance and turns each non-blocking invoke into a blocking call by
//! polling the engine until the completion callback fires.

mod udp;
pub mod validator;

pub use udp::UdpTransport;
pub use validator::{ValidationResult, Validator};

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use se_host::osal::{self, Datastore, FileDatastore, MemoryDatastore, Mutex, SlotId, SystemClock};
use se_host::{
    ChannelConfig, CommandOutput, Engine, EngineConfig, EngineResult, InstanceId, Protection,
    Transport,
};
use se_host_sim_config::SimConfig;

/// Longest a blocking call waits for its callback
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: osal::Duration = osal::Duration::from_millis(1);

type Completions = Arc<Mutex<VecDeque<EngineResult<CommandOutput>>>>;

/// Engine configuration matching the simulator configuration
pub fn engine_config(config: &SimConfig) -> EngineConfig {
    let timing = &config.engine;
    let persistence = &config.persistence;
    EngineConfig::new()
        .with_max_instances(timing.max_instances)
        .with_max_sessions(timing.max_sessions)
        .with_comms_buffer_size(timing.comms_buffer_size)
        .with_timing(timing.idle_poll_ms, timing.running_ms)
        .with_context_handle_slot(SlotId(persistence.context_handle_slot))
        .with_channel(
            ChannelConfig::new()
                .with_shared_secret_slot(SlotId(persistence.shared_secret_slot))
                .with_context_slot(SlotId(persistence.context_slot)),
        )
}

/// Host store provisioned with the shared secret
///
/// File backed when the configuration names a directory, so a saved channel
/// context survives the client process.
pub fn datastore(config: &SimConfig) -> Result<Box<dyn Datastore>> {
    let secret = config.device.shared_secret_bytes()?;
    let slot = SlotId(config.persistence.shared_secret_slot);
    let mut store: Box<dyn Datastore> = match &config.persistence.directory {
        Some(directory) => Box::new(
            FileDatastore::new(directory)
                .map_err(|e| anyhow!("Failed to open datastore {}: {}", directory, e))?,
        ),
        None => Box::new(MemoryDatastore::new()),
    };
    store
        .write(slot, &secret)
        .map_err(|e| anyhow!("Failed to provision shared secret: {}", e))?;
    Ok(store)
}

/// Blocking front end over an engine with a single instance
pub struct SeClient {
    engine: Engine,
    id: InstanceId,
    completions: Completions,
    timeout: Duration,
}

impl SeClient {
    pub fn new(mut engine: Engine) -> Result<Self> {
        let completions: Completions = Arc::new(Mutex::new(VecDeque::new()));
        let sink = completions.clone();
        let id = engine.create(Box::new(move |result| {
            if let Ok(mut queue) = sink.lock() {
                queue.push_back(result);
            }
        }))?;
        Ok(Self {
            engine,
            id,
            completions,
            timeout: DEFAULT_CALL_TIMEOUT,
        })
    }

    /// Engine on `transport` with a system clock, configured from `config`
    pub fn from_config(config: &SimConfig, transport: Box<dyn Transport>) -> Result<Self> {
        let engine = Engine::new(
            engine_config(config),
            transport,
            datastore(config)?,
            Box::new(SystemClock::new()),
        )
        .context("Failed to create engine")?;
        Self::new(engine)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn instance(&self) -> InstanceId {
        self.id
    }

    pub fn engine(&mut self) -> &mut Engine {
        &mut self.engine
    }

    pub fn set_protection(&mut self, protection: Protection, re_establish: bool) -> Result<()> {
        self.engine.set_protection(self.id, protection, re_establish)?;
        Ok(())
    }

    /// Queue one operation and wait for its outcome
    ///
    /// ```rust,ignore
    /// let random = client.call(|engine, id| engine.get_random(id, RandomType::Trng, 32))?;
    /// ```
    pub fn call<F>(&mut self, op: F) -> Result<CommandOutput>
    where
        F: FnOnce(&mut Engine, InstanceId) -> EngineResult<()>,
    {
        op(&mut self.engine, self.id)?;

        let started = Instant::now();
        loop {
            let completion = self
                .completions
                .lock()
                .map_err(|e| anyhow!("Completion queue unavailable: {}", e))?
                .pop_front();
            if let Some(result) = completion {
                debug!("Call completed after {:?}", started.elapsed());
                return Ok(result?);
            }
            if started.elapsed() > self.timeout {
                bail!("No completion within {:?}", self.timeout);
            }
            if !self.engine.poll() {
                osal::time::sleep(POLL_INTERVAL);
            }
        }
    }

    /// Close the transport once the instance is idle
    pub fn shutdown(&mut self) -> Result<()> {
        self.engine.shutdown()?;
        Ok(())
    }
}
