// Licensed under the Apache-2.0 license

//! Engine façade and per-instance state machine
//!
//! All progress is made from [`Engine::poll`] (or [`Engine::step`]): the
//! device's single event timer names either the scheduler or the instance
//! whose state machine should run next. An invoke never blocks; it queues
//! the instance and returns, and the outcome arrives through the instance's
//! callback.

use arrayvec::ArrayVec;
use log::{debug, error, trace, warn};
use se_host_channel::config::PROTOCOL_VERSION_PRE_SHARED_SECRET;
use se_host_channel::{ChannelStatistics, Protection, ProtectionLevel};
use se_host_command_types::{session_oid, ApduCommand, DeviceError, LAST_ERROR_CODE_OID};
use se_host_commands::{
    parse_response, ApduWriter, ApplicationStep, CommandHandler, CommandOutput, ExecContext,
    LockKind, Progress,
};
use se_host_osal::time::is_due;
use se_host_osal::{Clock, Datastore, Duration, OsEvent, Ticks};
use se_host_transport::Transport;

use crate::config::{EngineConfig, MAX_REGISTRATIONS};
use crate::device::DeviceContext;
use crate::instance::{Callback, Instance, InstanceId, InstanceState};
use crate::queue::{self, LockRequest, QueueSlot, QueueTable, SlotState};
use crate::session_pool::SessionPool;
use crate::{EngineError, EngineResult};

/// What the device's event timer runs when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTarget {
    Scheduler,
    Instance(usize),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStatistics {
    pub commands_dispatched: u32,
    pub device_errors: u32,
    pub retransmits: u32,
    pub channel: ChannelStatistics,
}

/// Where the state machine goes after one state has run
enum Flow {
    /// Run the next state right away
    Next(InstanceState),
    /// Return to the event loop and resume after the delay
    Suspend(InstanceState, Duration),
    Stop,
}

pub struct Engine {
    config: EngineConfig,
    device: DeviceContext,
    queue: QueueTable,
    sessions: SessionPool,
    instances: ArrayVec<Option<Instance>, MAX_REGISTRATIONS>,
    event: OsEvent<EventTarget>,
    clock: Box<dyn Clock>,
    /// Arrival time of the last dispatched slot
    watermark: Ticks,
    statistics: EngineStatistics,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        transport: Box<dyn Transport>,
        store: Box<dyn Datastore>,
        clock: Box<dyn Clock>,
    ) -> EngineResult<Self> {
        config.validate().map_err(EngineError::InvalidInput)?;

        let mut queue = QueueTable::new();
        let mut instances = ArrayVec::new();
        for _ in 0..config.max_instances {
            queue.push(QueueSlot::unassigned());
            instances.push(None);
        }

        let mut engine = Self {
            device: DeviceContext::new(&config, transport, store),
            sessions: SessionPool::new(config.max_sessions),
            config,
            queue,
            instances,
            event: OsEvent::new(),
            clock,
            watermark: 0,
            statistics: EngineStatistics::default(),
        };
        let now = engine.clock.now();
        engine
            .event
            .register_oneshot(EventTarget::Scheduler, now, engine.config.idle_poll());
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register a new instance
    pub fn create(&mut self, callback: Callback) -> EngineResult<InstanceId> {
        let index = self
            .queue
            .iter()
            .position(|s| s.state == SlotState::Unassigned)
            .ok_or(EngineError::TableFull)?;

        self.queue[index].reset();
        self.queue[index].holds_session = false;
        self.instances[index] = Some(Instance::new(
            callback,
            self.config.channel.protocol_version,
        ));
        debug!("Created instance #{}", index);
        Ok(InstanceId(index))
    }

    /// Unregister an idle instance, returning its session and queue slot
    pub fn destroy(&mut self, id: InstanceId) -> EngineResult<()> {
        let inst = self.instance_mut(id)?;
        if !inst.is_idle() {
            return Err(EngineError::InstanceBusy);
        }
        let session = inst.session.take();
        if let Some(session) = session {
            self.sessions.release(session);
        }
        self.queue[id.0] = QueueSlot::unassigned();
        self.instances[id.0] = None;
        debug!("Destroyed instance {}", id);
        self.kick_scheduler();
        Ok(())
    }

    /// Select the protection level for the instance's next exchanges
    ///
    /// `re_establish` forces a handshake on the next protected exchange only.
    pub fn set_protection(&mut self, id: InstanceId, protection: Protection, re_establish: bool) -> EngineResult<()> {
        let inst = self.instance_mut(id)?;
        inst.protection = ProtectionLevel::new(protection).with_re_establish(re_establish);
        Ok(())
    }

    pub fn set_protocol_version(&mut self, id: InstanceId, version: u8) -> EngineResult<()> {
        if version != PROTOCOL_VERSION_PRE_SHARED_SECRET {
            return Err(EngineError::InvalidInput("unsupported protocol version"));
        }
        self.instance_mut(id)?.protocol_version = version;
        Ok(())
    }

    /// Queue a command on an instance
    ///
    /// Local precondition failures are returned directly and leave the
    /// instance untouched. Anything else completes through the callback.
    pub fn invoke(&mut self, id: InstanceId, handler: Box<dyn CommandHandler>) -> EngineResult<()> {
        let now = self.clock.now();
        let inst = self.instance_mut(id)?;
        if !inst.is_idle() {
            return Err(EngineError::InstanceBusy);
        }
        if handler.requires_session() && inst.session.is_none() {
            return Err(EngineError::SessionUnavailable);
        }

        let index = id.0;
        let holding = self.queue[index].holds_strict_lock();
        let sequence = handler.strict_sequence();
        let inst = self.instance_slot(index)?;

        match sequence {
            Some(seq) if !seq.step.is_start() => {
                let held = match inst.strict {
                    Some(held) if holding => held,
                    _ => return Err(EngineError::InvalidInput("strict lock not held")),
                };
                if held.command != seq.command || held.mode != seq.mode {
                    warn!(
                        "Instance #{} sent {} inside a {} sequence, releasing strict lock",
                        index,
                        seq.command.name(),
                        held.command.name()
                    );
                    inst.strict = None;
                    self.queue[index].reset();
                    self.kick_scheduler();
                    return Err(EngineError::InvalidInput("strict sequence mismatch"));
                }
                inst.strict = Some(seq);
                if handler.release_only() {
                    inst.handler = Some(handler);
                    inst.result = Some(Ok(CommandOutput::Empty));
                    inst.state = InstanceState::ReleaseLock;
                    self.event
                        .register_oneshot(EventTarget::Instance(index), now, Duration::ZERO);
                    return Ok(());
                }
                inst.handler = Some(handler);
                inst.result = None;
                inst.state = InstanceState::RequestStrictLock;
                self.queue[index].request(LockRequest::StrictLock, now);
            }
            Some(seq) => {
                inst.strict = Some(seq);
                inst.handler = Some(handler);
                inst.result = None;
                inst.state = InstanceState::RequestStrictLock;
                if holding {
                    debug!("Instance #{} restarts its strict sequence", index);
                    self.queue[index].reset();
                }
                self.queue[index].request(LockRequest::StrictLock, now);
            }
            None => {
                if holding {
                    return Err(EngineError::InvalidInput("strict sequence in progress"));
                }
                let (state, request) = match handler.lock_kind() {
                    LockKind::Session => (InstanceState::RequestSession, LockRequest::Session),
                    LockKind::Lock | LockKind::StrictLock => {
                        (InstanceState::RequestLock, LockRequest::Lock)
                    }
                };
                inst.handler = Some(handler);
                inst.result = None;
                inst.state = state;
                self.queue[index].request(request, now);
            }
        }

        trace!("Instance #{} queued at {}", index, now);
        self.kick_scheduler();
        Ok(())
    }

    /// Run the pending event if its deadline has passed
    pub fn poll(&mut self) -> bool {
        let now = self.clock.now();
        match self.event.take_due(now) {
            Some(target) => {
                self.run_event(target);
                true
            }
            None => false,
        }
    }

    /// Run the pending event regardless of its deadline
    pub fn step(&mut self) -> Option<EventTarget> {
        let target = self.event.take()?;
        self.run_event(target);
        Some(target)
    }

    /// Step until every instance is idle or nothing can make progress
    ///
    /// Returns the number of events run.
    pub fn run_until_idle(&mut self) -> usize {
        let mut steps = 0;
        while self.instances.iter().flatten().any(|i| !i.is_idle()) {
            let Some(target) = self.event.take() else {
                break;
            };
            steps += 1;
            if !self.run_event(target) {
                break;
            }
        }
        steps
    }

    /// When the pending event is due
    pub fn next_deadline(&self) -> Option<Ticks> {
        self.event.deadline()
    }

    pub fn pending_event(&self) -> Option<EventTarget> {
        self.event.target()
    }

    pub fn queue_snapshot(&self) -> QueueTable {
        self.queue.clone()
    }

    pub fn sessions_in_use(&self) -> usize {
        self.sessions.in_use()
    }

    /// Session pool index held by an instance
    pub fn session_of(&self, id: InstanceId) -> Option<usize> {
        self.instance(id).ok().and_then(|i| i.session)
    }

    pub fn instance_state(&self, id: InstanceId) -> Option<InstanceState> {
        self.instance(id).ok().map(|i| i.state)
    }

    pub fn statistics(&self) -> EngineStatistics {
        let channel = self.device.channel_statistics();
        EngineStatistics {
            retransmits: channel.retransmits,
            channel,
            ..self.statistics
        }
    }

    pub fn is_channel_negotiated(&self) -> bool {
        self.device.channel().is_negotiated()
    }

    /// Close the transport
    ///
    /// Fails with [`EngineError::InstanceBusy`] while any instance is mid-operation.
    pub fn shutdown(&mut self) -> EngineResult<()> {
        if self.instances.iter().flatten().any(|i| !i.is_idle()) {
            return Err(EngineError::InstanceBusy);
        }
        self.device.close()
    }

    fn instance(&self, id: InstanceId) -> EngineResult<&Instance> {
        self.instances
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(EngineError::InvalidInput("unknown instance"))
    }

    fn instance_mut(&mut self, id: InstanceId) -> EngineResult<&mut Instance> {
        self.instance_slot(id.0)
    }

    fn instance_slot(&mut self, index: usize) -> EngineResult<&mut Instance> {
        self.instances
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or(EngineError::InvalidInput("unknown instance"))
    }

    /// Make sure the scheduler runs soon without disturbing a running instance
    fn kick_scheduler(&mut self) {
        let now = self.clock.now();
        let soon = self.config.running();
        match (self.event.target(), self.event.deadline()) {
            (Some(EventTarget::Instance(_)), _) => {}
            (Some(EventTarget::Scheduler), Some(deadline))
                if is_due(now.wrapping_add(soon.as_ticks()), deadline) => {}
            _ => self.event.register_oneshot(EventTarget::Scheduler, now, soon),
        }
    }

    /// Returns whether the event made progress
    fn run_event(&mut self, target: EventTarget) -> bool {
        match target {
            EventTarget::Scheduler => self.run_scheduler(),
            EventTarget::Instance(index) => {
                self.run_instance(index);
                true
            }
        }
    }

    fn run_scheduler(&mut self) -> bool {
        let now = self.clock.now();
        let idle = self.config.idle_poll();

        let Some(dispatch) = queue::select(&self.queue, self.watermark, self.sessions.is_available())
        else {
            self.event.register_oneshot(EventTarget::Scheduler, now, idle);
            return false;
        };
        if dispatch.wrapped {
            debug!("Tick wraparound, scheduler watermark reset");
        }

        let index = dispatch.index;
        let Some(inst) = self.instances.get_mut(index).and_then(Option::as_mut) else {
            error!("Queue slot {} has no instance", index);
            self.queue[index] = QueueSlot::unassigned();
            self.event.register_oneshot(EventTarget::Scheduler, now, idle);
            return false;
        };

        if dispatch.assign_session {
            match self.sessions.acquire(InstanceId(index)) {
                Some(session) => {
                    debug!("Session {:#06x} assigned to instance #{}", session_oid(session), index);
                    inst.session = Some(session);
                    self.queue[index].holds_session = true;
                }
                None => {
                    self.event.register_oneshot(EventTarget::Scheduler, now, idle);
                    return false;
                }
            }
        }

        self.queue[index].state = SlotState::Processing;
        self.watermark = dispatch.arrival;
        self.statistics.commands_dispatched += 1;
        inst.state = InstanceState::PrepareCommand;
        debug!("Dispatched instance #{} (arrival {})", index, dispatch.arrival);
        self.event
            .register_oneshot(EventTarget::Instance(index), now, self.config.running());
        true
    }

    fn run_instance(&mut self, index: usize) {
        loop {
            let state = match self.instances.get(index).and_then(Option::as_ref) {
                Some(inst) => inst.state,
                None => return,
            };
            let flow = match state {
                InstanceState::PrepareCommand => self.prepare_command(index),
                InstanceState::Transceive => self.transceive(index),
                InstanceState::ProcessResponse => self.process_response(index),
                InstanceState::GetDeviceError => self.get_device_error(index),
                InstanceState::ReleaseSession => self.release_session(index),
                InstanceState::ReleaseLock => self.release_lock(index),
                InstanceState::Exit => self.exit(index),
                // Not runnable until the scheduler dispatches it
                InstanceState::Idle
                | InstanceState::RequestLock
                | InstanceState::RequestSession
                | InstanceState::RequestStrictLock => Flow::Stop,
            };

            match flow {
                Flow::Next(next) => self.set_state(index, next),
                Flow::Suspend(next, delay) => {
                    self.set_state(index, next);
                    let now = self.clock.now();
                    self.event
                        .register_oneshot(EventTarget::Instance(index), now, delay);
                    return;
                }
                Flow::Stop => return,
            }
        }
    }

    fn set_state(&mut self, index: usize, next: InstanceState) {
        if let Some(inst) = self.instances.get_mut(index).and_then(Option::as_mut) {
            trace!("Instance #{}: {:?} -> {:?}", index, inst.state, next);
            inst.state = next;
        }
    }

    /// Record the error and continue at `next`
    fn fail(&mut self, index: usize, err: EngineError, next: InstanceState) -> Flow {
        if let Some(inst) = self.instances.get_mut(index).and_then(Option::as_mut) {
            let command = inst.handler.as_ref().map(|h| h.command().name());
            if err.is_device_error() {
                warn!("Instance #{} {:?} failed: {}", index, command, err);
            } else {
                error!("Instance #{} {:?} failed: {}", index, command, err);
            }
            inst.fail(err);
        }
        Flow::Next(next)
    }

    fn prepare_command(&mut self, index: usize) -> Flow {
        let Some(inst) = self.instances.get_mut(index).and_then(Option::as_mut) else {
            return Flow::Stop;
        };
        let step = inst.handler.as_ref().and_then(|h| h.application_step());
        let slot = self.config.context_handle_slot;

        match step {
            Some(ApplicationStep::Open { restore: true }) if inst.context_handle.is_none() => {
                match self.device.load_context_handle(slot) {
                    Ok(handle) => {
                        inst.context_handle = Some(handle);
                        self.device.request_restore();
                    }
                    Err(err) => return self.fail(index, err, InstanceState::ReleaseLock),
                }
            }
            Some(ApplicationStep::Close { hibernate: true }) if !slot.is_configured() => {
                return self.fail(
                    index,
                    EngineError::InvalidInput("context handle slot not configured"),
                    InstanceState::ReleaseLock,
                );
            }
            _ => {}
        }

        let Some(inst) = self.instances.get_mut(index).and_then(Option::as_mut) else {
            return Flow::Stop;
        };
        let ctx = exec_context(inst, self.config.max_apdu());
        let Some(handler) = inst.handler.as_mut() else {
            return Flow::Next(InstanceState::ReleaseLock);
        };
        match handler.prepare(&ctx, self.device.tx_mut()) {
            Ok(len) => {
                inst.tx_len = len;
                Flow::Next(InstanceState::Transceive)
            }
            Err(err) => self.fail(index, err.into(), InstanceState::ReleaseLock),
        }
    }

    fn transceive(&mut self, index: usize) -> Flow {
        let Some(inst) = self.instances.get_mut(index).and_then(Option::as_mut) else {
            return Flow::Stop;
        };
        let result = self
            .device
            .transceive(inst.protection, inst.protocol_version, inst.tx_len);
        inst.protection.re_establish = false;

        let restoring = matches!(
            inst.handler.as_ref().and_then(|h| h.application_step()),
            Some(ApplicationStep::Open { restore: true })
        );
        if restoring {
            inst.context_handle = None;
        }
        let erased = if restoring {
            self.device.clear_context_handle(self.config.context_handle_slot)
        } else {
            Ok(())
        };

        match result.and_then(|len| erased.map(|_| len)) {
            Ok(len) => {
                if let Some(inst) = self.instances.get_mut(index).and_then(Option::as_mut) {
                    inst.rx_len = len;
                }
                Flow::Suspend(InstanceState::ProcessResponse, Duration::ZERO)
            }
            Err(err) => self.fail(index, err, InstanceState::ReleaseSession),
        }
    }

    fn process_response(&mut self, index: usize) -> Flow {
        let Some(inst) = self.instances.get_mut(index).and_then(Option::as_mut) else {
            return Flow::Stop;
        };
        let ctx = exec_context(inst, self.config.max_apdu());
        let response = match parse_response(self.device.response(inst.rx_len)) {
            Ok(response) => response,
            Err(err) => return self.fail(index, err.into(), InstanceState::ReleaseLock),
        };
        if !response.is_success() {
            self.statistics.device_errors += 1;
            return Flow::Next(InstanceState::GetDeviceError);
        }
        let Some(handler) = inst.handler.as_mut() else {
            return Flow::Next(InstanceState::ReleaseLock);
        };

        match handler.process(&ctx, &response) {
            Ok(Progress::Done) => {
                let output = handler.take_output();
                let step = handler.application_step();
                let result = match step {
                    Some(ApplicationStep::Close { hibernate: true }) => {
                        self.hibernate(output).map(|_| CommandOutput::Empty)
                    }
                    _ => Ok(output),
                };
                match result {
                    Ok(output) => {
                        if let Some(inst) = self.instances.get_mut(index).and_then(Option::as_mut) {
                            inst.result = Some(Ok(output));
                        }
                        Flow::Next(InstanceState::ReleaseLock)
                    }
                    Err(err) => self.fail(index, err, InstanceState::ReleaseLock),
                }
            }
            Ok(Progress::Chain) => {
                trace!("Instance #{} chains another round", index);
                Flow::Suspend(InstanceState::PrepareCommand, self.config.running())
            }
            Ok(Progress::Hold) => {
                inst.result = Some(Ok(handler.take_output()));
                debug!("Instance #{} keeps the strict lock", index);
                self.kick_scheduler();
                Flow::Next(InstanceState::Exit)
            }
            Ok(Progress::ReleaseSession) => {
                inst.result = Some(Ok(handler.take_output()));
                Flow::Next(InstanceState::ReleaseSession)
            }
            Err(err) => self.fail(index, err.into(), InstanceState::ReleaseLock),
        }
    }

    /// Persist the hibernate handle and the secure channel session
    fn hibernate(&mut self, output: CommandOutput) -> EngineResult<()> {
        let handle = output.into_data().ok_or(EngineError::InvalidResponse)?;
        let slot = self.config.context_handle_slot;
        self.device.store_context_handle(slot, &handle)?;
        if self.device.save_channel()? {
            debug!("Secure channel session saved with the application context");
        }
        Ok(())
    }

    /// Read the device's last-error register and surface the cause
    fn get_device_error(&mut self, index: usize) -> Flow {
        let Some(inst) = self.instances.get(index).and_then(Option::as_ref) else {
            return Flow::Stop;
        };
        let level = ProtectionLevel::new(inst.protection.protection);
        let version = inst.protocol_version;
        let next = if inst
            .handler
            .as_ref()
            .map_or(false, |h| h.release_session_on_failure())
        {
            InstanceState::ReleaseSession
        } else {
            InstanceState::ReleaseLock
        };

        let code = self.read_last_error(level, version);
        let Some(inst) = self.instances.get_mut(index).and_then(Option::as_mut) else {
            return Flow::Stop;
        };
        let err = match code {
            Ok(code) => DeviceError::from(code),
            Err(err) => return self.fail(index, err, next),
        };
        match inst.handler.as_mut().and_then(|h| h.recover(err)) {
            Some(output) => {
                debug!("Instance #{} recovered from device error {}", index, err);
                inst.result = Some(Ok(output));
                Flow::Next(next)
            }
            None => self.fail(index, EngineError::Device(err), next),
        }
    }

    fn read_last_error(&mut self, level: ProtectionLevel, version: u8) -> EngineResult<u8> {
        let mut w = ApduWriter::new(self.device.tx_mut())?;
        w.put_u16(LAST_ERROR_CODE_OID)?;
        w.put_u16(0)?;
        w.put_u16(1)?;
        // Plain opcode: the read must not clear the register it reads
        let len = w.finish(ApduCommand::GetDataObject as u8, 0)?;

        let received = self.device.transceive(level, version, len)?;
        let response = parse_response(self.device.response(received))?;
        match response.payload {
            [code] if response.is_success() => Ok(*code),
            _ => Err(EngineError::InvalidResponse),
        }
    }

    fn release_session(&mut self, index: usize) -> Flow {
        let Some(inst) = self.instances.get_mut(index).and_then(Option::as_mut) else {
            return Flow::Stop;
        };
        if let Some(session) = inst.session.take() {
            debug!("Session {:#06x} released by instance #{}", session_oid(session), index);
            self.sessions.release(session);
        }
        self.queue[index].holds_session = false;
        Flow::Next(InstanceState::ReleaseLock)
    }

    fn release_lock(&mut self, index: usize) -> Flow {
        let Some(inst) = self.instances.get_mut(index).and_then(Option::as_mut) else {
            return Flow::Stop;
        };
        inst.strict = None;
        self.queue[index].reset();
        self.kick_scheduler();
        Flow::Next(InstanceState::Exit)
    }

    fn exit(&mut self, index: usize) -> Flow {
        let slot = self.config.context_handle_slot;
        let Some(inst) = self.instances.get_mut(index).and_then(Option::as_mut) else {
            return Flow::Stop;
        };
        let handler = inst.handler.take();
        let result = inst.result.take().unwrap_or(Ok(CommandOutput::Empty));
        inst.context_handle = None;
        inst.state = InstanceState::Idle;

        let hibernating = matches!(
            handler.as_ref().and_then(|h| h.application_step()),
            Some(ApplicationStep::Close { hibernate: true })
        );
        if hibernating && result.is_err() {
            if let Err(err) = self.device.clear_context_handle(slot) {
                warn!("Could not clear context handle: {}", err);
            }
        }

        if let Some(inst) = self.instances.get_mut(index).and_then(Option::as_mut) {
            (inst.callback)(result);
        }
        Flow::Stop
    }
}

fn exec_context(inst: &Instance, max_apdu: usize) -> ExecContext {
    ExecContext {
        session_oid: inst.session.map(session_oid),
        max_apdu,
        context_handle: inst.context_handle,
    }
}
