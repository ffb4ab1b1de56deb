// Licensed under the Apache-2.0 license

//! Session slot assignment and return

use hmac::{Hmac, Mac};
use se_host::commands::GetRandom;
use se_host::engine::SlotState;
use se_host::{
    DeviceError, EngineConfig, EngineError, KeyDerivation, KeyRef, RandomType, SecretTarget,
    SymMode,
};
use se_host_sim_device::{DEFAULT_AUTH_SECRET, OID_AUTH_SECRET, OID_PROTECTED_DATA};
use sha2::Sha256;

use crate::common::{last_data, TestBed};

fn expected_mac(data: &[u8]) -> Vec<u8> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&DEFAULT_AUTH_SECRET).unwrap();
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

#[test]
fn test_pool_exhaustion_defers_until_release() {
    let mut bed = TestBed::with_config(EngineConfig::new().with_max_sessions(2));
    let (a, results_a) = bed.instance();
    let (b, results_b) = bed.instance();
    let (c, results_c) = bed.instance();

    for id in [a, b, c] {
        bed.engine
            .generate_auth_code(id, RandomType::Trng, Vec::new(), 16)
            .unwrap();
        bed.tick();
    }
    bed.run();

    assert_eq!(results_a.lock().unwrap().len(), 1);
    assert_eq!(results_b.lock().unwrap().len(), 1);
    assert!(results_c.lock().unwrap().is_empty());
    assert_eq!(bed.engine.sessions_in_use(), 2);
    assert_eq!(bed.engine.queue_snapshot()[c.index()].state, SlotState::Requested);

    // A successful verify consumes the auth code and returns the session
    let mut data = last_data(&results_a);
    data.extend_from_slice(b"unlock protected data");
    let mac = expected_mac(&data);
    bed.engine
        .hmac_verify(a, SymMode::HmacSha256, OID_AUTH_SECRET, data, mac)
        .unwrap();
    bed.run();

    assert!(results_a.lock().unwrap()[1].is_ok());
    assert_eq!(bed.engine.session_of(a), None);
    assert_eq!(results_c.lock().unwrap().len(), 1);
    assert!(bed.engine.session_of(c).is_some());
    assert_eq!(bed.engine.sessions_in_use(), 2);

    bed.engine
        .read_data(a, OID_PROTECTED_DATA, 0, 64)
        .unwrap();
    bed.run();
    assert_eq!(last_data(&results_a), b"authorized read".to_vec());
}

#[test]
fn test_failed_verify_returns_session() {
    let mut bed = TestBed::new();
    let (id, results) = bed.instance();
    bed.engine
        .generate_auth_code(id, RandomType::Drng, vec![0xA0, 0xA1], 16)
        .unwrap();
    bed.run();
    assert!(bed.engine.session_of(id).is_some());

    let mut data = vec![0xA0, 0xA1];
    data.extend_from_slice(&last_data(&results));
    bed.engine
        .hmac_verify(id, SymMode::HmacSha256, OID_AUTH_SECRET, data, vec![0u8; 32])
        .unwrap();
    bed.run();

    assert_eq!(
        results.lock().unwrap()[1],
        Err(EngineError::Device(DeviceError::AuthorizationFailure))
    );
    assert_eq!(bed.engine.session_of(id), None);
    assert_eq!(bed.engine.sessions_in_use(), 0);
}

#[test]
fn test_destroy_returns_session() {
    let mut bed = TestBed::with_config(EngineConfig::new().with_max_sessions(1));
    let (a, _results_a) = bed.instance();
    let (b, results_b) = bed.instance();

    bed.engine
        .generate_auth_code(a, RandomType::Trng, Vec::new(), 16)
        .unwrap();
    bed.run();
    bed.tick();
    bed.engine
        .generate_auth_code(b, RandomType::Trng, Vec::new(), 16)
        .unwrap();
    bed.run();
    assert!(results_b.lock().unwrap().is_empty());

    bed.engine.destroy(a).unwrap();
    bed.tick();
    bed.run();
    assert_eq!(results_b.lock().unwrap().len(), 1);
    assert_eq!(bed.engine.session_of(b), Some(0));
}

#[test]
fn test_session_secret_feeds_derivation() {
    let mut bed = TestBed::new();
    let (id, results) = bed.instance();

    bed.engine
        .invoke(id, Box::new(GetRandom::pre_master_secret(vec![0x03, 0x03], 48)))
        .unwrap();
    bed.run();
    assert!(results.lock().unwrap()[0].is_ok());

    bed.engine
        .derive_key_from(
            id,
            KeyDerivation::TlsPrfSha256,
            KeyRef::Session,
            b"master secret".to_vec(),
            48,
            SecretTarget::Export,
        )
        .unwrap();
    bed.run();
    assert_eq!(last_data(&results).len(), 48);
    assert!(bed.engine.session_of(id).is_some());
}

#[test]
fn test_session_key_needs_a_session() {
    let mut bed = TestBed::new();
    let (id, _results) = bed.instance();
    assert_eq!(
        bed.engine.derive_key_from(
            id,
            KeyDerivation::TlsPrfSha256,
            KeyRef::Session,
            vec![1, 2, 3],
            32,
            SecretTarget::Export,
        ),
        Err(EngineError::SessionUnavailable)
    );
    assert_eq!(bed.device().statistics().frames, 0);
}
