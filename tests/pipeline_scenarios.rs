//! Integration tests exercising the scenarios named in the testable
//! properties section of the spec: syncio rendezvous across a full
//! plan, start-trigger release on an op-count threshold, a DIO tail
//! fixup, and an E2E end-of-transmission handoff.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use xddr::config::RunConfig;
use xddr::error::Result;
use xddr::io_target::TargetOpener;
use xddr::pipeline::dio;
use xddr::pipeline::e2e::{self, E2eOutcome, E2eSource};
use xddr::pipeline::lockstep::{LockstepBlock, LockstepInterval};
use xddr::pipeline::syncio::Syncio;
use xddr::pipeline::throttle::Throttle;
use xddr::pipeline::trigger::{self, TriggerBlock, TriggerKind, TriggerOutcome};
use xddr::pipeline::{self, PipelineContext, PipelineOutcome};
use xddr::plan::Plan;
use xddr::target::{OpKind, SeekEntry, Target, TargetOptions};
use xddr::wire::FrameHeader;
use xddr::worker::Worker;

fn seek_table(n: u64) -> Vec<SeekEntry> {
    (0..n)
        .map(|i| SeekEntry {
            operation: OpKind::Write,
            block_location: i,
            time1: 0,
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn target(id: u32, ops: u64, options: TargetOptions) -> Target {
    target_with_trigger(id, ops, options, None)
}

#[allow(clippy::too_many_arguments)]
fn target_with_trigger(id: u32, ops: u64, options: TargetOptions, trigger: Option<TriggerBlock>) -> Target {
    Target::new(
        id,
        PathBuf::from(format!("/tmp/xddr-test-{id}")),
        4096,
        1,
        ops,
        ops * 4096,
        1,
        0,
        1,
        options,
        seek_table(ops),
        0,
        trigger,
        None,
        Throttle::none(),
    )
    .unwrap()
}

fn target_with_lockstep(id: u32, ops: u64, lockstep: Arc<LockstepBlock>) -> Target {
    Target::new(
        id,
        PathBuf::from(format!("/tmp/xddr-test-lockstep-{id}")),
        4096,
        1,
        ops,
        ops * 4096,
        1,
        0,
        1,
        TargetOptions::empty(),
        seek_table(ops),
        0,
        None,
        Some(lockstep),
        Throttle::none(),
    )
    .unwrap()
}

fn bare_ctx(is_lockstep_master: bool) -> PipelineContext<'static> {
    PipelineContext {
        syncio: None,
        triggeree: None,
        is_lockstep_master,
        raw_mode: None,
        e2e_source: None,
        timestamp: None,
        opener: None,
    }
}

#[test]
fn plan_rejects_duplicate_target_ids() {
    let a = Arc::new(target(0, 4, TargetOptions::empty()));
    let b = Arc::new(target(0, 4, TargetOptions::empty()));
    assert!(Plan::new(vec![a, b], RunConfig::default()).is_err());
}

#[test]
fn syncio_rendezvous_blocks_until_every_target_reaches_the_period_boundary() {
    let syncio = Arc::new(Syncio::new(4, 3).unwrap());
    let mut handles = Vec::new();
    for id in 0..3u32 {
        let syncio = Arc::clone(&syncio);
        handles.push(thread::spawn(move || {
            let mut worker = Worker::new(id, 0);
            for op in 0..8u64 {
                worker.current_op = op;
                syncio.before_io(&mut worker);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn start_trigger_releases_once_triggeree_crosses_op_threshold() {
    let triggeree = target(1, 20, TargetOptions::empty());
    let waiter = target_with_trigger(
        0,
        20,
        TargetOptions::WAIT_FOR_START,
        Some(TriggerBlock::new(1, TriggerKind::Op(10))),
    );

    assert_eq!(trigger::before_io(&waiter, Some(&triggeree)), TriggerOutcome::Wait);

    for _ in 0..10 {
        triggeree.record_completion(4096);
    }

    assert_eq!(trigger::before_io(&waiter, Some(&triggeree)), TriggerOutcome::Continue);
    assert!(!waiter.options().contains(TargetOptions::WAIT_FOR_START));
}

#[test]
fn dio_tail_operation_falls_back_to_buffered_io() -> Result<()> {
    struct TempOpener;
    impl TargetOpener for TempOpener {
        fn open(&self, _target: &Target, _direct: bool) -> Result<std::fs::File> {
            Ok(tempfile::tempfile()?)
        }
    }

    let t = target(0, 10, TargetOptions::DIO);
    let mut worker = Worker::new(0, 0);
    worker.dio_enabled = true;
    // A full-block, page-aligned op: no fallback.
    worker.current_byte_location = 0;
    worker.current_iosize = 4096;
    dio::before_io(&mut worker, &t, &TempOpener)?;
    assert!(worker.dio_enabled);

    // A short tail op: falls back to buffered I/O.
    worker.current_byte_location = 4096;
    worker.current_iosize = 200;
    dio::before_io(&mut worker, &t, &TempOpener)?;
    assert!(!worker.dio_enabled);
    assert!(worker.file.is_some());
    Ok(())
}

#[test]
fn e2e_end_of_transmission_ends_the_pass_cleanly() {
    struct FixedSource(FrameHeader);
    impl E2eSource for FixedSource {
        fn recv(&self) -> std::io::Result<FrameHeader> {
            Ok(self.0)
        }
    }

    let source = FixedSource(FrameHeader::end_of_transmission(3));
    let mut worker = Worker::new(0, 0);
    worker.current_op = 3;
    assert_eq!(e2e::before_io(&mut worker, &source, false).unwrap(), E2eOutcome::EndOfTransmission);
}

/// Scenario 3: a master target running far ahead of a pacing slave, the
/// two coupled by one shared `LockstepBlock` and driven entirely through
/// `pipeline::run_before_io` rather than by hand-matching barrier
/// indices on each side (which would mask a desync between the two
/// sides' rounds). The master pings once per completed op; the slave
/// must consume exactly as many tasks as the master pinged, and neither
/// side may block forever.
#[test]
fn lockstep_master_and_slave_stay_paired_through_the_pipeline_driver() {
    const OPS: u64 = 40;

    let block = Arc::new(LockstepBlock::new(0, 1, LockstepInterval::Op(1), 1));
    let master_target = Arc::new(target_with_lockstep(0, OPS, Arc::clone(&block)));
    let slave_target = Arc::new(target_with_lockstep(1, OPS, Arc::clone(&block)));

    let master = {
        let master_target = Arc::clone(&master_target);
        let block = Arc::clone(&block);
        thread::spawn(move || {
            let mut worker = Worker::new(0, 0);
            let ctx = bare_ctx(true);
            for op in 0..OPS {
                worker.current_op = op;
                let outcome = pipeline::run_before_io(&mut worker, &master_target, &ctx).unwrap();
                assert_eq!(outcome, PipelineOutcome::Proceed);
                master_target.record_completion(4096);
            }
            block.master_finished();
        })
    };

    let slave = {
        let slave_target = Arc::clone(&slave_target);
        thread::spawn(move || {
            let mut worker = Worker::new(1, 0);
            let ctx = bare_ctx(false);
            let mut consumed = 0u64;
            loop {
                match pipeline::run_before_io(&mut worker, &slave_target, &ctx).unwrap() {
                    PipelineOutcome::Proceed => {
                        consumed += 1;
                        worker.current_op += 1;
                    }
                    PipelineOutcome::EndPass => break,
                    PipelineOutcome::Restart => continue,
                }
            }
            consumed
        })
    };

    master.join().unwrap();
    let consumed = slave.join().unwrap();
    assert_eq!(consumed, OPS);
}
