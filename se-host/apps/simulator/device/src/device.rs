// Licensed under the Apache-2.0 license

use anyhow::{bail, Result};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use se_host_channel::record::RECORD_HEADER_SIZE;
use se_host_command_types::Oid;
use se_host_sim_config::{SimConfig, SHARED_SECRET_SIZE};

use crate::faults::FaultPlan;
use crate::processor::ApduProcessor;
use crate::scp::{ScpServer, ScpStatistics};

const UID_SIZE: usize = 27;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStatistics {
    pub frames: u32,
    pub commands: u32,
    pub sealed_responses: u32,
    pub corrupted_responses: u32,
    pub dropped_responses: u32,
    pub injected_errors: u32,
    pub scp: ScpStatistics,
}

/// A secure element: the channel endpoint in front of the APDU processor
pub struct SimDevice {
    scp: ScpServer,
    processor: ApduProcessor,
    faults: FaultPlan,
    statistics: DeviceStatistics,
}

impl SimDevice {
    /// Provision a device bound to `shared_secret`; `seed` makes every
    /// random the device draws reproducible
    pub fn new(shared_secret: &[u8], seed: u64) -> Result<Self> {
        if shared_secret.len() != SHARED_SECRET_SIZE {
            bail!(
                "Shared secret must be {} bytes, found {}",
                SHARED_SECRET_SIZE,
                shared_secret.len()
            );
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let mut uid = [0u8; UID_SIZE];
        rng.fill_bytes(&mut uid);
        let scp_rng = StdRng::seed_from_u64(rng.next_u64());

        Ok(Self {
            scp: ScpServer::new(shared_secret, scp_rng),
            processor: ApduProcessor::new(shared_secret, &uid, rng),
            faults: FaultPlan::none(),
            statistics: DeviceStatistics::default(),
        })
    }

    pub fn from_config(config: &SimConfig) -> Result<Self> {
        let device = Self::new(&config.device.shared_secret_bytes()?, config.device.seed)?
            .with_faults(FaultPlan::from_config(&config.device.faults))
            .with_initial_sequence(config.device.initial_sequence);
        info!("Simulated device provisioned (seed {})", config.device.seed);
        Ok(device)
    }

    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }

    pub fn with_initial_sequence(mut self, seq: Option<u32>) -> Self {
        self.scp = self.scp.with_initial_sequence(seq);
        self
    }

    pub fn set_faults(&mut self, faults: FaultPlan) {
        self.faults = faults;
    }

    pub fn statistics(&self) -> DeviceStatistics {
        DeviceStatistics {
            scp: self.scp.statistics(),
            ..self.statistics
        }
    }

    pub fn has_session(&self) -> bool {
        self.scp.has_session()
    }

    pub fn has_saved_context(&self) -> bool {
        self.scp.has_saved_context()
    }

    pub fn hibernated_contexts(&self) -> usize {
        self.processor.hibernated_contexts()
    }

    /// Contents of a data object, bypassing access conditions
    pub fn object(&self, oid: Oid) -> Option<Vec<u8>> {
        self.processor.objects().get(oid).ok().map(|object| object.data.clone())
    }

    /// Lose power: the live channel session and the application state go,
    /// persistent objects and saved or hibernated contexts stay
    pub fn power_cycle(&mut self) {
        info!("Simulated device power cycle");
        self.scp.power_cycle();
        self.processor.power_cycle();
    }

    /// Answer one frame; `None` when the response is dropped
    pub fn transceive(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        self.statistics.frames += 1;
        let Self {
            scp,
            processor,
            faults,
            statistics,
        } = self;

        if let Some(skip) = faults.jump_for(statistics.sealed_responses + 1) {
            scp.skip_sequence(skip);
        }
        let mut dropped = false;
        let reply = scp.handle(frame, |apdu| {
            statistics.commands += 1;
            let index = statistics.commands;
            let response = match faults.error_for(index) {
                Some(code) => {
                    statistics.injected_errors += 1;
                    processor.fail(apdu, code)
                }
                None => processor.process(apdu),
            };
            dropped = faults.drops(index);
            response
        });

        if dropped {
            warn!("Dropping response to command {}", self.statistics.commands);
            self.statistics.dropped_responses += 1;
            return None;
        }
        let mut out = reply.frame;
        if reply.sealed {
            self.statistics.sealed_responses += 1;
            if self.faults.corrupts(self.statistics.sealed_responses) {
                warn!(
                    "Corrupting sealed response {}",
                    self.statistics.sealed_responses
                );
                if let Some(byte) = out.get_mut(RECORD_HEADER_SIZE) {
                    *byte ^= 0x01;
                }
                self.statistics.corrupted_responses += 1;
            }
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use se_host_command_types::{ApduCommand, ApduHeader};
    use zerocopy::IntoBytes;

    fn plain_record(cmd: ApduCommand, param: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![0x20];
        frame.extend_from_slice(
            ApduHeader::new(cmd.code(), param, payload.len() as u16).as_bytes(),
        );
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn test_rejects_short_secret() {
        assert!(SimDevice::new(&[0u8; 32], 0).is_err());
    }

    #[test]
    fn test_plain_random() {
        let mut device = SimDevice::new(&[0x6B; 64], 1).unwrap();
        let reply = device
            .transceive(&plain_record(ApduCommand::GetRandom, 0, &[0x00, 0x10]))
            .unwrap();
        assert_eq!(&reply[..5], &[0x20, 0x00, 0x00, 0x00, 0x10]);
        assert_eq!(reply.len(), 21);
        assert_eq!(device.statistics().commands, 1);
    }

    #[test]
    fn test_injected_error_then_diagnosis() {
        let mut device = SimDevice::new(&[0x6B; 64], 1)
            .unwrap()
            .with_faults(FaultPlan::none().device_error(1, 0x07));
        let reply = device
            .transceive(&plain_record(ApduCommand::GetRandom, 0, &[0x00, 0x10]))
            .unwrap();
        assert_eq!(reply[1], 0xFF);

        let mut diagnosis = vec![0x20, 0x01, 0x00, 0x00, 0x06];
        diagnosis.extend_from_slice(&[0xF1, 0xC2, 0x00, 0x00, 0x00, 0x01]);
        let reply = device.transceive(&diagnosis).unwrap();
        assert_eq!(&reply[1..], &[0x00, 0x00, 0x00, 0x01, 0x07]);
        assert_eq!(device.statistics().injected_errors, 1);
    }

    #[test]
    fn test_dropped_response_still_executes() {
        let mut device = SimDevice::new(&[0x6B; 64], 1)
            .unwrap()
            .with_faults(FaultPlan::none().drop_response(1));
        let write = plain_record(ApduCommand::SetDataObject, 0, &[0xF1, 0xD1, 0x00, 0x00, 0xAB]);
        assert_eq!(device.transceive(&write), None);
        assert_eq!(device.object(0xF1D1), Some(vec![0xAB]));
        assert_eq!(device.statistics().dropped_responses, 1);
    }

    #[test]
    fn test_power_cycle_keeps_objects() {
        let mut device = SimDevice::new(&[0x6B; 64], 1).unwrap();
        let write = plain_record(ApduCommand::SetDataObject, 0, &[0xF1, 0xD2, 0x00, 0x00, 0x01]);
        device.transceive(&write).unwrap();
        device.power_cycle();
        assert_eq!(device.object(0xF1D2), Some(vec![0x01]));
        assert!(!device.has_session());
    }
}
