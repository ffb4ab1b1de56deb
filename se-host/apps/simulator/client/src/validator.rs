// Licensed under the Apache-2.0 license

//! End-to-end checks against a device
//!
//! Each check runs one operation family through the engine and compares the
//! outcome with what the host can compute on its own.

use anyhow::{anyhow, ensure, Result};
use log::{error, info};
use se_host::command_types::{OID_COPROCESSOR_UID, OID_DATA_OBJECT_BASE, OID_DEVICE_CERTIFICATE};
use se_host::{
    CalcHash, CloseMode, CommandOutput, KeyRef, Oid, OpenMode, Protection, PublicKeySource,
    RandomType, SignatureScheme, WriteMode,
};
use sha2::{Digest, Sha256};

use crate::SeClient;

/// Private key slot holding the device identity key
pub const DEVICE_KEY_OID: Oid = 0xE0F0;

/// Scratch data object written by the data object check
const SCRATCH_OID: Oid = OID_DATA_OBJECT_BASE + 5;

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub test_name: String,
    pub passed: bool,
    pub error_message: Option<String>,
}

type Check = fn(&mut SeClient) -> Result<()>;

pub struct Validator {
    protection: Protection,
    verbose: bool,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator {
    pub fn new() -> Self {
        Self {
            protection: Protection::None,
            verbose: false,
        }
    }

    /// Protection applied to every check after the first handshake
    pub fn with_protection(mut self, protection: Protection) -> Self {
        self.protection = protection;
        self
    }

    pub fn set_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Run every check in order; a failing check does not stop the rest
    pub fn run(&self, client: &mut SeClient) -> Result<Vec<ValidationResult>> {
        client.set_protection(self.protection, false)?;

        let checks: [(&str, Check); 6] = [
            ("GetRandom", validate_random),
            ("DataObject", validate_data_object),
            ("CalcHash", validate_hash),
            ("SignVerify", validate_sign_verify),
            ("ProtectedRead", validate_protected_read),
            ("HibernateRestore", validate_hibernate_restore),
        ];

        let mut results = Vec::with_capacity(checks.len());
        for (name, check) in checks {
            let result = match check(client) {
                Ok(()) => {
                    info!("{} passed", name);
                    ValidationResult {
                        test_name: name.to_string(),
                        passed: true,
                        error_message: None,
                    }
                }
                Err(e) => {
                    error!("{} failed: {:#}", name, e);
                    ValidationResult {
                        test_name: name.to_string(),
                        passed: false,
                        error_message: Some(format!("{:#}", e)),
                    }
                }
            };
            if self.verbose {
                println!(
                    "  {} {}",
                    if result.passed { "PASS" } else { "FAIL" },
                    result.test_name
                );
            }
            results.push(result);
        }
        Ok(results)
    }
}

fn data(output: CommandOutput) -> Result<Vec<u8>> {
    output
        .into_data()
        .ok_or_else(|| anyhow!("Operation returned no data"))
}

fn validate_random(client: &mut SeClient) -> Result<()> {
    let first = data(client.call(|engine, id| engine.get_random(id, RandomType::Trng, 32))?)?;
    let second = data(client.call(|engine, id| engine.get_random(id, RandomType::Trng, 32))?)?;
    ensure!(first.len() == 32, "Expected 32 random bytes, got {}", first.len());
    ensure!(first != second, "Two random draws were identical");
    Ok(())
}

fn validate_data_object(client: &mut SeClient) -> Result<()> {
    let pattern: Vec<u8> = (0..=255u8).cycle().take(700).collect();
    let written = pattern.clone();
    client.call(move |engine, id| {
        engine.write_data(id, SCRATCH_OID, WriteMode::EraseAndWrite, 0, written)
    })?;
    let read = data(client.call(|engine, id| engine.read_data(id, SCRATCH_OID, 0, 700))?)?;
    ensure!(read == pattern, "Read back {} bytes that differ from the write", read.len());
    Ok(())
}

fn validate_hash(client: &mut SeClient) -> Result<()> {
    let message = b"secure element host library".repeat(80);
    let expected = Sha256::digest(&message).to_vec();

    let digest = data(client.call({
        let message = message.clone();
        move |engine, id| engine.calc_hash(id, CalcHash::digest(message))
    })?)?;
    ensure!(digest == expected, "One-shot digest mismatch");

    let (head, tail) = message.split_at(1000);
    let context = data(client.call(|engine, id| engine.calc_hash(id, CalcHash::start()))?)?;
    let context = data(client.call({
        let head = head.to_vec();
        move |engine, id| engine.calc_hash(id, CalcHash::update(context, head))
    })?)?;
    let context = data(client.call({
        let tail = tail.to_vec();
        move |engine, id| engine.calc_hash(id, CalcHash::update(context, tail))
    })?)?;
    let digest = data(client.call(move |engine, id| engine.calc_hash(id, CalcHash::finalize(context)))?)?;
    ensure!(digest == expected, "Streamed digest mismatch");
    Ok(())
}

fn validate_sign_verify(client: &mut SeClient) -> Result<()> {
    let digest = Sha256::digest(b"attestation challenge").to_vec();
    let signature = data(client.call({
        let digest = digest.clone();
        move |engine, id| {
            engine.calc_sign(id, SignatureScheme::Ecdsa, KeyRef::Oid(DEVICE_KEY_OID), digest)
        }
    })?)?;

    client.call({
        let digest = digest.clone();
        let signature = signature.clone();
        move |engine, id| {
            engine.verify_sign(
                id,
                SignatureScheme::Ecdsa,
                digest,
                signature,
                PublicKeySource::Certificate(OID_DEVICE_CERTIFICATE),
            )
        }
    })?;

    let mut tampered = signature;
    tampered[0] ^= 0x80;
    let rejected = client.call(move |engine, id| {
        engine.verify_sign(
            id,
            SignatureScheme::Ecdsa,
            digest,
            tampered,
            PublicKeySource::Certificate(OID_DEVICE_CERTIFICATE),
        )
    });
    ensure!(rejected.is_err(), "Tampered signature verified");
    Ok(())
}

fn validate_protected_read(client: &mut SeClient) -> Result<()> {
    client.set_protection(Protection::Full, false)?;
    let uid = data(client.call(|engine, id| engine.read_data(id, OID_COPROCESSOR_UID, 0, 64))?)?;
    ensure!(!uid.is_empty(), "Empty coprocessor UID");
    ensure!(
        client.engine().is_channel_negotiated(),
        "Protected read completed without a negotiated channel"
    );
    Ok(())
}

fn validate_hibernate_restore(client: &mut SeClient) -> Result<()> {
    client.call(|engine, id| engine.open_application(id, OpenMode::Initialize))?;
    client.call(|engine, id| engine.close_application(id, CloseMode::Hibernate))?;
    client.call(|engine, id| engine.open_application(id, OpenMode::Restore))?;
    let random = data(client.call(|engine, id| engine.get_random(id, RandomType::Drng, 16))?)?;
    ensure!(random.len() == 16, "Restored application did not answer");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use se_host::osal::Mutex;
    use se_host_sim_config::SimConfig;
    use se_host_sim_device::{SimDevice, SimTransport};

    fn client() -> SeClient {
        let mut config = SimConfig::default();
        config.engine.idle_poll_ms = 1;
        config.engine.running_ms = 1;
        let device = SimDevice::from_config(&config).unwrap();
        let transport = SimTransport::new(Arc::new(Mutex::new(device)));
        SeClient::from_config(&config, Box::new(transport)).unwrap()
    }

    #[test]
    fn test_all_checks_pass_unprotected() {
        let results = Validator::new().run(&mut client()).unwrap();
        for result in &results {
            assert!(result.passed, "{}: {:?}", result.test_name, result.error_message);
        }
        assert_eq!(results.len(), 6);
    }

    #[test]
    fn test_all_checks_pass_protected() {
        let results = Validator::new()
            .with_protection(Protection::Full)
            .run(&mut client())
            .unwrap();
        assert!(results.iter().all(|r| r.passed), "{:?}", results);
    }
}
