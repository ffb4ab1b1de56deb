// Licensed under the Apache-2.0 license

//! Protected exchanges: handshake, integrity alerts, renegotiation

use se_host::engine::{STATUS_COMMS_HANDSHAKE, STATUS_COMMS_SESSION};
use se_host::osal::MemoryDatastore;
use se_host::{ChannelError, EngineConfig, EngineError, Protection, RandomType, TransportError};
use se_host_sim_device::FaultPlan;

use crate::common::{provisioned_store, sim_device, TestBed, SHARED_SECRET_SLOT};

#[test]
fn test_first_protected_exchange_negotiates() {
    println!("Testing first protected exchange negotiates...");
    let mut bed = TestBed::new();
    let (id, results) = bed.instance();
    bed.engine.set_protection(id, Protection::Full, false).unwrap();

    for _ in 0..3 {
        bed.engine.get_random(id, RandomType::Trng, 32).unwrap();
        bed.run();
    }
    assert!(results.lock().unwrap().iter().all(Result::is_ok));
    assert!(bed.engine.is_channel_negotiated());

    let stats = bed.engine.statistics().channel;
    assert_eq!(stats.handshakes, 1);
    assert_eq!(stats.records_sent, 3);
    assert_eq!(stats.records_received, 3);
    assert_eq!(bed.device().statistics().scp.handshakes, 1);
}

#[test]
fn test_corrupted_response_recovered_by_alert() {
    println!("Testing corrupted response recovered by alert...");
    let device = sim_device().with_faults(FaultPlan::none().corrupt_response(150));
    let mut bed = TestBed::build(EngineConfig::new(), device, Box::new(provisioned_store()));
    let (id, results) = bed.instance();
    bed.engine.set_protection(id, Protection::Full, false).unwrap();

    for _ in 0..200 {
        bed.engine.get_random(id, RandomType::Drng, 16).unwrap();
        bed.run();
    }

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 200);
    assert!(results.iter().all(Result::is_ok));

    let stats = bed.engine.statistics().channel;
    assert_eq!(stats.handshakes, 1);
    assert_eq!(stats.alerts_sent, 1);
    assert_eq!(stats.decryption_failures, 1);
    assert_eq!(stats.records_received, 200);

    let device = bed.device().statistics();
    assert_eq!(device.corrupted_responses, 1);
    assert_eq!(device.scp.resent, 1);
    assert_eq!(device.commands, 200);
}

#[test]
fn test_command_only_protection_leaves_response_plain() {
    println!("Testing command only protection leaves response plain...");
    let mut bed = TestBed::new();
    let (id, results) = bed.instance();
    bed.engine.set_protection(id, Protection::Master, false).unwrap();
    bed.engine.get_random(id, RandomType::Trng, 16).unwrap();
    bed.run();

    assert!(results.lock().unwrap()[0].is_ok());
    assert_eq!(bed.device().statistics().sealed_responses, 0);
    assert_eq!(bed.engine.statistics().channel.handshakes, 1);
}

#[test]
fn test_unprotected_exchange_skips_handshake() {
    println!("Testing unprotected exchange skips handshake...");
    let mut bed = TestBed::new();
    let (id, results) = bed.instance();
    bed.engine.get_random(id, RandomType::Trng, 16).unwrap();
    bed.run();

    assert!(results.lock().unwrap()[0].is_ok());
    assert!(!bed.engine.is_channel_negotiated());
    assert_eq!(bed.device().statistics().scp.handshakes, 0);
}

#[test]
fn test_re_establish_applies_once() {
    println!("Testing re establish applies once...");
    let mut bed = TestBed::new();
    let (id, results) = bed.instance();
    bed.engine.set_protection(id, Protection::Full, false).unwrap();
    bed.engine.get_random(id, RandomType::Trng, 16).unwrap();
    bed.run();

    bed.engine.set_protection(id, Protection::Full, true).unwrap();
    bed.engine.get_random(id, RandomType::Trng, 16).unwrap();
    bed.run();
    bed.engine.get_random(id, RandomType::Trng, 16).unwrap();
    bed.run();

    assert!(results.lock().unwrap().iter().all(Result::is_ok));
    assert_eq!(bed.engine.statistics().channel.handshakes, 2);
    assert_eq!(bed.device().statistics().scp.handshakes, 2);
}

#[test]
fn test_wrong_secret_fails_handshake() {
    println!("Testing wrong secret fails handshake...");
    let store = MemoryDatastore::new().with_slot(SHARED_SECRET_SLOT, &[0x11; 64]);
    let mut bed = TestBed::build(EngineConfig::new(), sim_device(), Box::new(store));
    let (id, results) = bed.instance();
    bed.engine.set_protection(id, Protection::Full, false).unwrap();
    bed.engine.get_random(id, RandomType::Trng, 16).unwrap();
    bed.run();

    let results = results.lock().unwrap();
    let err = results[0].clone().unwrap_err();
    assert!(matches!(err, EngineError::Channel(ChannelError::Handshake(_))));
    assert_eq!(err.status_code(), STATUS_COMMS_HANDSHAKE);
    assert!(!bed.engine.is_channel_negotiated());
    assert_eq!(bed.device().statistics().commands, 0);
}

#[test]
fn test_missing_secret_fails_handshake() {
    println!("Testing missing secret fails handshake...");
    let mut bed = TestBed::build(
        EngineConfig::new(),
        sim_device(),
        Box::new(MemoryDatastore::new()),
    );
    let (id, results) = bed.instance();
    bed.engine.set_protection(id, Protection::Full, false).unwrap();
    bed.engine.get_random(id, RandomType::Trng, 16).unwrap();
    bed.run();

    assert_eq!(
        results.lock().unwrap()[0],
        Err(EngineError::Channel(ChannelError::Handshake(
            "shared secret unavailable"
        )))
    );
    assert_eq!(bed.device().statistics().frames, 0);
}

#[test]
fn test_lost_response_forces_new_handshake() {
    println!("Testing lost response forces new handshake...");
    let device = sim_device().with_faults(FaultPlan::none().drop_response(2));
    let mut bed = TestBed::build(EngineConfig::new(), device, Box::new(provisioned_store()));
    let (id, results) = bed.instance();
    bed.engine.set_protection(id, Protection::Full, false).unwrap();

    for _ in 0..3 {
        bed.engine.get_random(id, RandomType::Trng, 16).unwrap();
        bed.run();
    }

    let results = results.lock().unwrap();
    assert!(results[0].is_ok());
    assert_eq!(
        results[1],
        Err(EngineError::Transport(TransportError::ReceiveFailed(Some(
            "response dropped"
        ))))
    );
    assert!(results[2].is_ok());
    assert_eq!(bed.engine.statistics().channel.handshakes, 2);
    assert_eq!(bed.device().statistics().scp.handshakes, 2);
}

#[test]
fn test_sequence_jump_forces_new_handshake() {
    println!("Testing sequence jump forces new handshake...");
    let device = sim_device().with_faults(FaultPlan::none().sequence_jump(2, 7));
    let mut bed = TestBed::build(EngineConfig::new(), device, Box::new(provisioned_store()));
    let (id, results) = bed.instance();
    bed.engine.set_protection(id, Protection::Full, false).unwrap();

    for _ in 0..4 {
        bed.engine.get_random(id, RandomType::Trng, 16).unwrap();
        bed.run();
    }

    let results = results.lock().unwrap();
    assert!(results[0].is_ok());
    let err = results[1].clone().unwrap_err();
    assert!(matches!(
        err,
        EngineError::Channel(ChannelError::SequenceOutOfWindow { .. })
    ));
    assert_eq!(err.status_code(), STATUS_COMMS_SESSION);
    assert!(results[2].is_ok());
    assert!(results[3].is_ok());

    assert!(bed.engine.is_channel_negotiated());
    assert_eq!(bed.engine.statistics().channel.handshakes, 2);
    assert_eq!(bed.device().statistics().scp.handshakes, 2);
    assert_eq!(bed.device().statistics().commands, 4);
}
