// Licensed under the Apache-2.0 license

//! Unit-test fixtures: a plain-record device behind the transport trait

use std::sync::{Arc, Mutex};

use se_host_command_types::{ApduCommand, APDU_FAILURE, APDU_HEADER_SIZE, APDU_SUCCESS};
use se_host_commands::{write_response, CommandOutput};
use se_host_osal::{ManualClock, MemoryDatastore};
use se_host_transport::{copy_response, Transport, TransportError, TransportResult};

use crate::config::EngineConfig;
use crate::instance::Callback;
use crate::{Engine, EngineResult};

pub const HIBERNATE_HANDLE: [u8; 8] = [0x48, 0x49, 0x42, 0x45, 0x52, 0x4E, 0x41, 0x54];

const PLAIN_RECORD: u8 = 0x20;
const OUT_OF_BOUNDARY: u8 = 0x08;

/// Device answering unprotected records, recording every APDU it receives
#[derive(Debug, Default)]
pub struct MockDevice {
    pub commands: Vec<Vec<u8>>,
    /// Contents of every readable data object
    pub object: Vec<u8>,
    /// Fail the next command with this error code
    pub fail_next: Option<u8>,
    pub fail_diagnosis: bool,
    pub drop_next: bool,
    last_error: u8,
}

impl MockDevice {
    fn respond(&mut self, apdu: &[u8]) -> (u8, Vec<u8>) {
        let cmd = apdu[0];
        let param = apdu[1];
        let payload = &apdu[APDU_HEADER_SIZE..];

        // Diagnosis read goes out without the clear-last-error bit
        if cmd == ApduCommand::GetDataObject as u8 {
            if self.fail_diagnosis {
                return (APDU_FAILURE, Vec::new());
            }
            return (APDU_SUCCESS, vec![self.last_error]);
        }
        if let Some(code) = self.fail_next.take() {
            self.last_error = code;
            return (APDU_FAILURE, Vec::new());
        }

        let u16_at = |at: usize| u16::from_be_bytes([payload[at], payload[at + 1]]) as usize;
        match ApduCommand::from_code(cmd) {
            Some(ApduCommand::GetRandom) => (APDU_SUCCESS, vec![0xA5; u16_at(0)]),
            Some(ApduCommand::GetDataObject) => {
                let offset = u16_at(2);
                let len = u16_at(4);
                if offset >= self.object.len() {
                    self.last_error = OUT_OF_BOUNDARY;
                    return (APDU_FAILURE, Vec::new());
                }
                let end = (offset + len).min(self.object.len());
                (APDU_SUCCESS, self.object[offset..end].to_vec())
            }
            Some(ApduCommand::EncryptSym) | Some(ApduCommand::DecryptSym) => {
                let len = u16_at(3);
                let data = &payload[5..5 + len];
                let mut out = vec![0x61];
                out.extend_from_slice(&(len as u16).to_be_bytes());
                out.extend_from_slice(data);
                (APDU_SUCCESS, out)
            }
            Some(ApduCommand::CloseApplication) if param == 0x01 => {
                (APDU_SUCCESS, HIBERNATE_HANDLE.to_vec())
            }
            _ => (APDU_SUCCESS, Vec::new()),
        }
    }
}

pub struct MockTransport {
    device: Arc<Mutex<MockDevice>>,
    open: bool,
}

impl Transport for MockTransport {
    fn open(&mut self) -> TransportResult<()> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> TransportResult<()> {
        self.open = false;
        Ok(())
    }

    fn transceive(&mut self, tx: &[u8], rx: &mut [u8]) -> TransportResult<usize> {
        if tx.first() != Some(&PLAIN_RECORD) {
            return Err(TransportError::SendFailed(Some("unexpected record")));
        }
        let mut device = self
            .device
            .lock()
            .map_err(|_| TransportError::Custom("device poisoned"))?;
        let apdu = &tx[1..];
        device.commands.push(apdu.to_vec());
        if device.drop_next {
            device.drop_next = false;
            return Err(TransportError::ReceiveFailed(Some("dropped")));
        }

        let (status, payload) = device.respond(apdu);
        let mut frame = vec![0u8; 1 + APDU_HEADER_SIZE + payload.len()];
        frame[0] = PLAIN_RECORD;
        write_response(status, &payload, &mut frame[1..])
            .map_err(|_| TransportError::Custom("response framing"))?;
        copy_response(&frame, rx)
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

pub type Results = Arc<Mutex<Vec<EngineResult<CommandOutput>>>>;

pub fn recorder() -> (Callback, Results) {
    let results: Results = Arc::new(Mutex::new(Vec::new()));
    let sink = results.clone();
    let callback: Callback = Box::new(move |result| {
        sink.lock().unwrap().push(result);
    });
    (callback, results)
}

pub fn engine_with(config: EngineConfig) -> (Engine, Arc<Mutex<MockDevice>>, ManualClock) {
    let device = Arc::new(Mutex::new(MockDevice::default()));
    let clock = ManualClock::new(0);
    let transport = MockTransport {
        device: device.clone(),
        open: false,
    };
    let engine = Engine::new(
        config,
        Box::new(transport),
        Box::new(MemoryDatastore::new()),
        Box::new(clock.clone()),
    )
    .unwrap();
    (engine, device, clock)
}
