// Licensed under the Apache-2.0 license

//! Failed device commands are diagnosed through the last-error register

use se_host::{CommandOutput, DeviceError, EngineConfig, EngineError, Protection, RandomType, WriteMode};
use se_host_sim_device::{FaultPlan, OID_PROTECTED_DATA};

use crate::common::{last_data, only, TestBed};

#[test]
fn test_injected_error_is_diagnosed() {
    let mut bed = TestBed::new();
    bed.device().set_faults(FaultPlan::none().device_error(1, 0x07));
    let (id, results) = bed.instance();

    bed.engine.get_random(id, RandomType::Trng, 16).unwrap();
    bed.run();

    assert_eq!(
        only(&results),
        Err(EngineError::Device(DeviceError::AccessConditionNotSatisfied))
    );
    assert_eq!(bed.engine.statistics().device_errors, 1);
    let device = bed.device().statistics();
    assert_eq!(device.injected_errors, 1);
    // The failed command plus the diagnosis read
    assert_eq!(device.commands, 2);
}

#[test]
fn test_engine_continues_after_device_error() {
    let mut bed = TestBed::new();
    bed.device().set_faults(FaultPlan::none().device_error(1, 0x07));
    let (id, results) = bed.instance();

    bed.engine.get_random(id, RandomType::Trng, 16).unwrap();
    bed.run();
    bed.engine.get_random(id, RandomType::Trng, 16).unwrap();
    bed.run();

    let results = results.lock().unwrap();
    assert!(results[0].is_err());
    assert_eq!(results[1].as_ref().map(|out| out.data().map(<[u8]>::len)), Ok(Some(16)));
}

#[test]
fn test_diagnosis_under_full_protection() {
    let mut bed = TestBed::new();
    let (id, results) = bed.instance();
    bed.engine.set_protection(id, Protection::Full, false).unwrap();

    bed.engine.read_data(id, OID_PROTECTED_DATA, 0, 32).unwrap();
    bed.run();

    assert_eq!(
        only(&results),
        Err(EngineError::Device(DeviceError::AccessConditionNotSatisfied))
    );
    let stats = bed.engine.statistics().channel;
    assert_eq!(stats.handshakes, 1);
    assert_eq!(stats.records_sent, 2);
    assert_eq!(stats.decryption_failures, 0);
}

#[test]
fn test_unknown_object() {
    let mut bed = TestBed::new();
    let (id, results) = bed.instance();
    bed.engine.read_data(id, 0xF1DE, 0, 16).unwrap();
    bed.run();
    assert_eq!(only(&results), Err(EngineError::Device(DeviceError::InvalidOid)));
}

#[test]
fn test_read_starting_past_end() {
    let mut bed = TestBed::new();
    let (id, results) = bed.instance();
    bed.engine
        .write_data(id, 0xF1D6, WriteMode::EraseAndWrite, 0, vec![0xA5; 10])
        .unwrap();
    bed.run();
    bed.engine.read_data(id, 0xF1D6, 10, 16).unwrap();
    bed.run();

    let results = results.lock().unwrap();
    assert_eq!(results[0], Ok(CommandOutput::Empty));
    assert_eq!(
        results[1],
        Err(EngineError::Device(DeviceError::DataObjectBoundaryExceeded))
    );
}

#[test]
fn test_chained_read_ending_on_chunk_boundary() {
    // 64 byte buffer: 47 bytes of object data per response
    let config = EngineConfig::new().with_comms_buffer_size(64);
    let mut bed = TestBed::with_config(config);
    let (id, results) = bed.instance();
    let data: Vec<u8> = (0..94u8).collect();

    bed.engine
        .write_data(id, 0xF1D7, WriteMode::EraseAndWrite, 0, data.clone())
        .unwrap();
    bed.run();
    assert_eq!(bed.device().object(0xF1D7), Some(data.clone()));

    bed.engine.read_data(id, 0xF1D7, 0, 200).unwrap();
    bed.run();

    assert_eq!(last_data(&results), data);
    // Third round hit the end of the object and was recovered
    assert_eq!(bed.engine.statistics().device_errors, 1);
}
