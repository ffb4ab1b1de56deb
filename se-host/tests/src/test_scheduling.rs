// Licensed under the Apache-2.0 license

//! Lock ordering against the simulated device

use se_host::engine::SlotState;
use se_host::{EngineError, RandomType, SequenceStep, SetObjectProtected, SymMode};
use se_host_sim_device::keys::OID_SYM_KEY;

use crate::common::{only, TestBed};

#[test]
fn test_strict_sequence_excludes_other_instances() {
    let mut bed = TestBed::new();
    let (a, results_a) = bed.instance();
    let (b, results_b) = bed.instance();
    let block = vec![0x3Cu8; 16];

    bed.engine
        .encrypt_sym(a, SymMode::Ecb, SequenceStep::Start, OID_SYM_KEY, block.clone())
        .unwrap();
    bed.run();
    assert!(bed.engine.queue_snapshot()[a.index()].holds_strict_lock());

    bed.tick();
    bed.engine.get_random(b, RandomType::Trng, 16).unwrap();
    bed.run();
    assert_eq!(bed.engine.queue_snapshot()[b.index()].state, SlotState::Requested);
    assert!(results_b.lock().unwrap().is_empty());

    bed.engine
        .encrypt_sym(a, SymMode::Ecb, SequenceStep::Continue, OID_SYM_KEY, block.clone())
        .unwrap();
    bed.run();
    assert!(results_b.lock().unwrap().is_empty());

    bed.engine
        .encrypt_sym(a, SymMode::Ecb, SequenceStep::Final, OID_SYM_KEY, block)
        .unwrap();
    bed.run();

    let results_a = results_a.lock().unwrap();
    assert_eq!(results_a.len(), 3);
    // Same key, same block, ECB: every step yields the same ciphertext
    let blocks: Vec<_> = results_a
        .iter()
        .map(|r| r.as_ref().unwrap().data().unwrap().to_vec())
        .collect();
    assert_eq!(blocks[0].len(), 16);
    assert!(blocks.iter().all(|b| *b == blocks[0]));
    assert_eq!(only(&results_b).unwrap().data().map(<[u8]>::len), Some(16));
}

#[test]
fn test_plain_invoke_rejected_inside_strict_sequence() {
    let mut bed = TestBed::new();
    let (id, results) = bed.instance();
    bed.engine
        .set_object_protected(id, SetObjectProtected::start(vec![0xF1, 0xD4, 0x00, 0x01]))
        .unwrap();
    bed.run();
    assert_eq!(results.lock().unwrap().len(), 1);

    assert_eq!(
        bed.engine.get_random(id, RandomType::Trng, 16),
        Err(EngineError::InvalidInput("strict sequence in progress"))
    );
    // Still holding: the abort ends the sequence without device contact
    let commands = bed.device().statistics().commands;
    bed.engine
        .set_object_protected(id, SetObjectProtected::abort())
        .unwrap();
    bed.run();
    assert_eq!(bed.device().statistics().commands, commands);
    assert!(!bed.engine.queue_snapshot()[id.index()].holds_strict_lock());
}

#[test]
fn test_dispatch_follows_arrival_not_index() {
    let mut bed = TestBed::new();
    let order = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut ids = Vec::new();
    for n in 0..4u8 {
        let order = order.clone();
        ids.push(
            bed.engine
                .create(Box::new(move |result| {
                    assert!(result.is_ok());
                    order.lock().unwrap().push(n);
                }))
                .unwrap(),
        );
    }
    for id in [ids[2], ids[0], ids[3], ids[1]] {
        bed.engine.get_random(id, RandomType::Drng, 8).unwrap();
        bed.tick();
    }
    bed.run();
    assert_eq!(*order.lock().unwrap(), vec![2, 0, 3, 1]);
}

#[test]
fn test_requeued_instance_waits_behind_earlier_arrivals() {
    let mut bed = TestBed::new();
    let (a, results_a) = bed.instance();
    let (b, results_b) = bed.instance();
    let (c, results_c) = bed.instance();

    bed.engine.get_random(a, RandomType::Trng, 8).unwrap();
    bed.tick();
    bed.engine.get_random(b, RandomType::Trng, 8).unwrap();
    bed.tick();
    bed.engine.get_random(c, RandomType::Trng, 8).unwrap();
    bed.tick();

    // Run only until the first completion
    while results_a.lock().unwrap().is_empty() {
        assert!(bed.engine.step().is_some());
    }
    assert!(results_b.lock().unwrap().is_empty());

    bed.engine.get_random(a, RandomType::Trng, 8).unwrap();
    while results_a.lock().unwrap().len() < 2 {
        assert!(bed.engine.step().is_some());
    }
    assert_eq!(results_b.lock().unwrap().len(), 1);
    assert_eq!(results_c.lock().unwrap().len(), 1);
    assert_eq!(bed.engine.statistics().commands_dispatched, 4);
}

#[test]
fn test_scheduler_idles_with_nothing_queued() {
    let mut bed = TestBed::new();
    let (_id, _results) = bed.instance();
    assert_eq!(bed.run(), 0);
    assert!(!bed.engine.poll());
    assert_eq!(bed.device().statistics().frames, 0);
}
