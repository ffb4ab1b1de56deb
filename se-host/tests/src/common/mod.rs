// Licensed under the Apache-2.0 license

//! Test bed: an engine wired to a simulated device
//!
//! The device sits behind a shared handle so a test can inject faults,
//! power cycle it or inspect its counters while the engine owns the
//! transport.

use std::sync::{Arc, Mutex};

use se_host::osal::{self, Datastore, ManualClock, MemoryDatastore, MutexGuard, SlotId};
use se_host::{Callback, CommandOutput, Engine, EngineConfig, EngineResult, InstanceId};
use se_host_sim_device::{SimDevice, SimTransport};

pub const SHARED_SECRET: [u8; 64] = [0x6B; 64];
pub const SHARED_SECRET_SLOT: SlotId = SlotId(0x0011);
pub const DEVICE_SEED: u64 = 7;

pub type Results = Arc<Mutex<Vec<EngineResult<CommandOutput>>>>;

/// Callback collecting every completion in order
pub fn recorder() -> (Callback, Results) {
    let results: Results = Arc::new(Mutex::new(Vec::new()));
    let sink = results.clone();
    let callback: Callback = Box::new(move |result| {
        sink.lock().unwrap().push(result);
    });
    (callback, results)
}

pub fn sim_device() -> SimDevice {
    SimDevice::new(&SHARED_SECRET, DEVICE_SEED).unwrap()
}

/// Host store holding only the shared secret
pub fn provisioned_store() -> MemoryDatastore {
    MemoryDatastore::new().with_slot(SHARED_SECRET_SLOT, &SHARED_SECRET)
}

pub struct TestBed {
    pub engine: Engine,
    pub device: Arc<osal::Mutex<SimDevice>>,
    pub clock: ManualClock,
}

impl TestBed {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::new())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::build(config, sim_device(), Box::new(provisioned_store()))
    }

    pub fn build(config: EngineConfig, device: SimDevice, store: Box<dyn Datastore>) -> Self {
        Self::attach(config, Arc::new(osal::Mutex::new(device)), store)
    }

    /// Fresh engine in front of an existing device, e.g. after a host restart
    pub fn attach(
        config: EngineConfig,
        device: Arc<osal::Mutex<SimDevice>>,
        store: Box<dyn Datastore>,
    ) -> Self {
        let clock = ManualClock::new(0);
        let engine = Engine::new(
            config,
            Box::new(SimTransport::new(device.clone())),
            store,
            Box::new(clock.clone()),
        )
        .unwrap();
        Self {
            engine,
            device,
            clock,
        }
    }

    pub fn device(&self) -> MutexGuard<'_, SimDevice> {
        self.device.lock().unwrap()
    }

    pub fn instance(&mut self) -> (InstanceId, Results) {
        let (callback, results) = recorder();
        let id = self.engine.create(callback).unwrap();
        (id, results)
    }

    pub fn run(&mut self) -> usize {
        self.engine.run_until_idle()
    }

    /// Advance the clock so the next request gets a later arrival time
    pub fn tick(&self) {
        self.clock.advance(osal::Duration::from_millis(1));
    }
}

impl Default for TestBed {
    fn default() -> Self {
        Self::new()
    }
}

/// Output of the single completion recorded so far
pub fn only(results: &Results) -> EngineResult<CommandOutput> {
    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1, "expected exactly one completion");
    results[0].clone()
}

/// Data of the most recent completion
pub fn last_data(results: &Results) -> Vec<u8> {
    let results = results.lock().unwrap();
    match results.last() {
        Some(Ok(CommandOutput::Data(data))) => data.clone(),
        other => panic!("expected data, got {:?}", other),
    }
}
