// Licensed under the Apache-2.0 license

//! Application hibernation with the secure channel session saved alongside

use se_host::osal::{FileDatastore, SlotId};
use se_host::{
    ChannelConfig, CloseMode, CommandOutput, EngineConfig, EngineError, OpenMode, Protection,
    RandomType,
};

use crate::common::{sim_device, TestBed, SHARED_SECRET, SHARED_SECRET_SLOT};

fn file_store(dir: &std::path::Path) -> Box<FileDatastore> {
    use se_host::osal::Datastore;
    let mut store = FileDatastore::new(dir).unwrap();
    store.write(SHARED_SECRET_SLOT, &SHARED_SECRET).unwrap();
    Box::new(store)
}

#[test]
fn test_restore_after_host_restart_skips_handshake() {
    println!("Testing restore after host restart skips handshake...");
    let dir = tempfile::tempdir().unwrap();
    let mut first = TestBed::build(EngineConfig::new(), sim_device(), file_store(dir.path()));
    let (id, results) = first.instance();
    first.engine.set_protection(id, Protection::Full, false).unwrap();

    first.engine.open_application(id, OpenMode::Initialize).unwrap();
    first.run();
    first.engine.get_random(id, RandomType::Trng, 16).unwrap();
    first.run();
    first.engine.close_application(id, CloseMode::Hibernate).unwrap();
    first.run();
    {
        let results = results.lock().unwrap();
        assert!(results.iter().all(Result::is_ok), "{:?}", results);
        assert_eq!(results[2], Ok(CommandOutput::Empty));
    }
    assert_eq!(first.engine.statistics().channel.contexts_saved, 1);
    assert!(!first.engine.is_channel_negotiated());

    let device = first.device.clone();
    drop(first);
    device.lock().unwrap().power_cycle();
    assert!(device.lock().unwrap().has_saved_context());
    assert_eq!(device.lock().unwrap().hibernated_contexts(), 1);

    let mut second = TestBed::attach(EngineConfig::new(), device, file_store(dir.path()));
    let (id, results) = second.instance();
    second.engine.set_protection(id, Protection::Full, false).unwrap();
    second.engine.open_application(id, OpenMode::Restore).unwrap();
    second.run();
    second.engine.get_random(id, RandomType::Trng, 16).unwrap();
    second.run();

    assert!(results.lock().unwrap().iter().all(Result::is_ok));
    let stats = second.engine.statistics().channel;
    assert_eq!(stats.handshakes, 0);
    assert_eq!(stats.contexts_restored, 1);
    assert!(second.engine.is_channel_negotiated());

    let device = second.device().statistics();
    assert_eq!(device.scp.handshakes, 1);
    assert_eq!(device.scp.contexts_restored, 1);
    assert_eq!(second.device().hibernated_contexts(), 0);
}

#[test]
fn test_restore_handle_is_used_once() {
    println!("Testing restore handle is used once...");
    let mut bed = TestBed::new();
    let (id, results) = bed.instance();
    bed.engine.close_application(id, CloseMode::Hibernate).unwrap();
    bed.run();
    bed.engine.open_application(id, OpenMode::Restore).unwrap();
    bed.run();
    assert!(results.lock().unwrap().iter().all(Result::is_ok));

    let frames = bed.device().statistics().frames;
    bed.engine.open_application(id, OpenMode::Restore).unwrap();
    bed.run();
    assert!(results.lock().unwrap()[2].is_err());
    assert_eq!(bed.device().statistics().frames, frames);
}

#[test]
fn test_hibernate_needs_handle_slot() {
    println!("Testing hibernate needs handle slot...");
    let config = EngineConfig::new().with_context_handle_slot(SlotId::NOT_CONFIGURED);
    let mut bed = TestBed::with_config(config);
    let (id, results) = bed.instance();
    bed.engine.close_application(id, CloseMode::Hibernate).unwrap();
    bed.run();

    assert_eq!(
        results.lock().unwrap()[0],
        Err(EngineError::InvalidInput("context handle slot not configured"))
    );
    assert_eq!(bed.device().statistics().frames, 0);
    assert_eq!(bed.device().hibernated_contexts(), 0);
}

#[test]
fn test_memory_only_channel_context() {
    println!("Testing memory only channel context...");
    let config = EngineConfig::new()
        .with_channel(ChannelConfig::new().with_context_slot(SlotId::NOT_CONFIGURED));
    let mut bed = TestBed::with_config(config);
    let (id, results) = bed.instance();
    bed.engine.set_protection(id, Protection::Full, false).unwrap();

    bed.engine.get_random(id, RandomType::Trng, 16).unwrap();
    bed.run();
    bed.engine.close_application(id, CloseMode::Hibernate).unwrap();
    bed.run();
    bed.device().power_cycle();
    bed.engine.open_application(id, OpenMode::Restore).unwrap();
    bed.run();
    bed.engine.get_random(id, RandomType::Trng, 16).unwrap();
    bed.run();

    assert!(results.lock().unwrap().iter().all(Result::is_ok));
    let stats = bed.engine.statistics().channel;
    assert_eq!(stats.handshakes, 1);
    assert_eq!(stats.contexts_saved, 1);
    assert_eq!(stats.contexts_restored, 1);
}
