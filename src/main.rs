use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use xddr::cli::Cli;
use xddr::config::ReportFormat;
use xddr::io_target::{StdTargetOpener, TargetOpener};
use xddr::net::TcpFrameChannel;
use xddr::pipeline::e2e::E2eSource;
use xddr::pipeline::raw::RawMode;
use xddr::pipeline::syncio::Syncio;
use xddr::pipeline::timestamp::{ArmCondition, TimestampRecorder};
use xddr::pipeline::{self, dio, PipelineContext, PipelineOutcome};
use xddr::plan::Plan;
use xddr::run_state::RunState;
use xddr::target::{OpKind, RunStatus, Target, TargetOptions};
use xddr::wire::FrameHeader;
use xddr::worker::Worker;

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();
}

fn print_banner(plan: &Plan) {
    info!("xddr: {} target(s), {} pass(es)", plan.len(), plan.config.passes);
    for target in plan.targets() {
        info!(
            target_id = target.id,
            path = %target.path.display(),
            io_size = target.io_size(),
            ops = target.target_ops,
            "target configured"
        );
    }
}

/// Listener- and dialer-side socket setup for every target's RAW/E2E
/// network channels. Listener setup (RAW message-passing readers, E2E
/// destinations) runs first on background threads, since the dialer side
/// (RAW writers, E2E sources) needs a bound listener to connect into; the
/// two-target pairing convention means the dialer is always the other
/// target in the plan, set up one step later in this same function.
struct NetChannels {
    raw_modes: Vec<Option<RawMode>>,
    raw_writer_channels: Vec<Option<TcpFrameChannel>>,
    e2e_channels: Vec<Option<TcpFrameChannel>>,
}

fn setup_network(plan: &Plan) -> NetChannels {
    let n = plan.len();
    let mut raw_modes: Vec<Option<RawMode>> = (0..n).map(|_| None).collect();
    let mut raw_writer_channels: Vec<Option<TcpFrameChannel>> = (0..n).map(|_| None).collect();
    let mut e2e_channels: Vec<Option<TcpFrameChannel>> = (0..n).map(|_| None).collect();

    let mut listen_handles: Vec<(usize, &'static str, thread::JoinHandle<xddr::Result<TcpFrameChannel>>)> = Vec::new();
    for (i, target) in plan.targets().iter().enumerate() {
        let opts = target.options();
        if opts.contains(TargetOptions::RAW_READER) {
            if let Some(addr) = plan.net.raw_listen {
                listen_handles.push((i, "raw", thread::spawn(move || TcpFrameChannel::accept_one(addr))));
            } else {
                raw_modes[i] = Some(RawMode::FileStatPoll);
            }
        }
        if opts.contains(TargetOptions::E2E_DESTINATION) {
            if let Some(addr) = plan.net.e2e_listen {
                listen_handles.push((i, "e2e", thread::spawn(move || TcpFrameChannel::accept_one(addr))));
            }
        }
    }

    if !listen_handles.is_empty() {
        thread::sleep(Duration::from_millis(50));
    }

    for (i, target) in plan.targets().iter().enumerate() {
        let opts = target.options();
        if opts.contains(TargetOptions::RAW_WRITER) {
            if let Some(addr) = plan.net.raw_connect {
                match TcpFrameChannel::connect(addr) {
                    Ok(chan) => raw_writer_channels[i] = Some(chan),
                    Err(e) => error!(target_id = target.id, error = %e, "failed to connect RAW notification channel"),
                }
            }
        }
        if opts.contains(TargetOptions::E2E_SOURCE) {
            if let Some(addr) = plan.net.e2e_connect {
                match TcpFrameChannel::connect(addr) {
                    Ok(chan) => e2e_channels[i] = Some(chan),
                    Err(e) => error!(target_id = target.id, error = %e, "failed to connect E2E channel"),
                }
            }
        }
    }

    for (i, kind, handle) in listen_handles {
        match handle.join().expect("listener thread panicked") {
            Ok(chan) => match kind {
                "raw" => raw_modes[i] = Some(RawMode::MessagePassing(Box::new(chan))),
                "e2e" => e2e_channels[i] = Some(chan),
                _ => unreachable!(),
            },
            Err(e) => error!(target_id = plan.targets()[i].id, error = %e, "failed to accept network connection"),
        }
    }

    NetChannels {
        raw_modes,
        raw_writer_channels,
        e2e_channels,
    }
}

/// Drives one worker's entire run: every pass, every operation, through
/// the pipeline and then the actual read/write.
///
/// Only the target's queue-slot-0 worker participates in syncio: the
/// barrier's party count is one per target (section 5's "one thread per
/// target acts as the target's coordinator"), so a target run with
/// `queue_depth > 1` nominates its first worker as that coordinator
/// rather than every queue slot entering the cross-target rendezvous.
#[allow(clippy::too_many_arguments)]
fn run_worker(
    target: Arc<Target>,
    mut worker: Worker,
    run_state: Arc<RunState>,
    opener: Arc<dyn TargetOpener>,
    syncio: Option<Arc<Syncio>>,
    plan: Arc<Plan>,
    mut raw_mode: Option<RawMode>,
    mut raw_writer_channel: Option<TcpFrameChannel>,
    mut e2e_channel: Option<TcpFrameChannel>,
    timestamp: Option<Arc<TimestampRecorder>>,
) {
    let dio_requested = target.options().contains(TargetOptions::DIO);

    worker.file = match opener.open(&target, dio_requested) {
        Ok(f) => Some(f),
        Err(e) => {
            error!(target_id = target.id, error = %e, "failed to open target");
            run_state.record_error();
            return;
        }
    };
    worker.dio_enabled = dio_requested;

    let triggeree = target
        .trigger
        .as_ref()
        .and_then(|t| plan.target(t.triggeree_id))
        .map(|a| a.as_ref());
    let is_lockstep_master = target.lockstep.as_ref().map(|b| b.master_id == target.id).unwrap_or(false);
    let is_e2e_source = target.options().contains(TargetOptions::E2E_SOURCE);
    let is_e2e_destination = target.options().contains(TargetOptions::E2E_DESTINATION);

    for pass in 0..target.passes {
        if pass > 0 {
            if let Err(e) = dio::reset_for_new_pass(&mut worker, &target, opener.as_ref()) {
                error!(target_id = target.id, error = %e, "failed to reopen target for new pass");
                run_state.record_error();
                break;
            }
            if let Some(rec) = &timestamp {
                rec.reset_for_new_pass();
            }
        }

        target.set_pass_number(pass as u8);
        target.set_pass_start_time(xddr::clock::pclk_now());
        target.set_run_status(RunStatus::Running);
        worker.current_op = worker.index as u64;
        worker.pass_ring = false;

        while worker.current_op < target.target_ops {
            if run_state.is_aborted() {
                break;
            }

            let ctx = PipelineContext {
                syncio: if worker.index == 0 { syncio.as_deref() } else { None },
                triggeree,
                is_lockstep_master,
                raw_mode: raw_mode.as_ref(),
                e2e_source: e2e_channel.as_ref().map(|c| c as &dyn E2eSource),
                timestamp: timestamp.as_deref(),
                opener: Some(opener.as_ref()),
            };

            match pipeline::run_before_io(&mut worker, &target, &ctx) {
                Ok(PipelineOutcome::Restart) => continue,
                Ok(PipelineOutcome::EndPass) => break,
                Ok(PipelineOutcome::Proceed) => {}
                Err(e) => {
                    warn!(target_id = target.id, op = worker.current_op, error = %e, "pipeline stage failed");
                    run_state.record_error();
                    worker.error_break = true;
                    break;
                }
            }

            let result = if is_e2e_destination {
                issue_e2e_destination_write(&mut worker, e2e_channel.as_mut())
            } else {
                let buf = vec![0u8; worker.current_iosize as usize];
                match target.seek_table[worker.current_op as usize].operation {
                    OpKind::Write => issue_write(&mut worker, &buf).map(|()| {
                        if let Some(chan) = raw_writer_channel.as_mut() {
                            notify_raw_reader(chan, &worker);
                        }
                        if is_e2e_source {
                            if let Some(chan) = e2e_channel.as_mut() {
                                send_e2e_frame(chan, &worker, &buf);
                            }
                        }
                    }),
                    OpKind::Read => issue_read(&mut worker, buf.len()),
                }
            };

            match result {
                Ok(()) => {
                    target.record_completion(worker.current_iosize);
                    worker.last_iosize = worker.current_iosize;
                    worker.current_op += target.queue_depth as u64;
                }
                Err(e) => {
                    warn!(target_id = target.id, op = worker.current_op, error = %e, "I/O error");
                    run_state.record_error();
                    worker.error_break = true;
                    break;
                }
            }
        }

        if is_e2e_source && pass + 1 == target.passes && !worker.error_break && !run_state.is_aborted() {
            if let Some(chan) = e2e_channel.as_mut() {
                if let Err(e) = chan.send_frame(&FrameHeader::end_of_transmission(worker.current_op), &[]) {
                    warn!(target_id = target.id, error = %e, "failed to send E2E end-of-transmission frame");
                }
            }
        }

        if let Some(block) = &target.lockstep {
            block.master_finished();
        }
        target.set_run_status(RunStatus::Finished);

        if worker.error_break || run_state.is_aborted() {
            break;
        }
    }
}

fn notify_raw_reader(chan: &mut TcpFrameChannel, worker: &Worker) {
    let header = FrameHeader {
        magic: 0,
        sequence: worker.current_op,
        location: worker.current_byte_location,
        length: worker.current_iosize,
    };
    if let Err(e) = chan.send_frame(&header, &[]) {
        warn!(target_id = worker.target_id, error = %e, "failed to send RAW notification");
    }
}

fn send_e2e_frame(chan: &mut TcpFrameChannel, worker: &Worker, payload: &[u8]) {
    let header = FrameHeader {
        magic: 1,
        sequence: worker.current_op,
        location: worker.current_byte_location,
        length: worker.current_iosize,
    };
    if let Err(e) = chan.send_frame(&header, payload) {
        warn!(target_id = worker.target_id, error = %e, "failed to send E2E frame");
    }
}

fn issue_write(worker: &mut Worker, buf: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    let Some(file) = &worker.file else {
        return Ok(());
    };
    file.write_all_at(buf, worker.current_byte_location)
}

fn issue_read(worker: &mut Worker, len: usize) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    let Some(file) = &worker.file else {
        return Ok(());
    };
    let mut buf = vec![0u8; len];
    file.read_exact_at(&mut buf, worker.current_byte_location)
}

/// An E2E destination's "write" is the payload received over the socket,
/// not freshly generated bytes: the pipeline's E2E stage already
/// validated the header and sized `worker.current_iosize` to match it.
fn issue_e2e_destination_write(worker: &mut Worker, chan: Option<&mut TcpFrameChannel>) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    let Some(chan) = chan else {
        return Ok(());
    };
    let payload = chan
        .recv_payload(worker.current_iosize as usize)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    let Some(file) = &worker.file else {
        return Ok(());
    };
    file.write_all_at(&payload, worker.current_byte_location)
}

fn print_report(plan: &Plan) {
    let text = match plan.config.report_format {
        ReportFormat::Text => plan
            .targets()
            .iter()
            .map(|t| format!("target {}: {} ops completed, {} bytes transferred", t.id, t.ops_completed(), t.bytes_completed()))
            .collect::<Vec<_>>()
            .join("\n"),
        ReportFormat::Json => {
            let report: Vec<_> = plan
                .targets()
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "target_id": t.id,
                        "ops_completed": t.ops_completed(),
                        "bytes_completed": t.bytes_completed(),
                    })
                })
                .collect();
            serde_json::to_string_pretty(&report).unwrap()
        }
    };

    println!("{text}");
    if let Some(path) = &plan.config.report_path {
        if let Err(e) = std::fs::write(path, &text) {
            error!(path = %path.display(), error = %e, "failed to write report file");
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_filter);

    let plan = match cli.into_plan() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("xddr: {e}");
            std::process::exit(1);
        }
    };

    print_banner(&plan);

    let net = setup_network(&plan);
    let mut raw_modes = net.raw_modes;
    let mut raw_writer_channels = net.raw_writer_channels;
    let mut e2e_channels = net.e2e_channels;

    let timestamp_capacity = plan.config.timestamp_capacity;
    let plan = Arc::new(plan);

    let opener: Arc<dyn TargetOpener> = Arc::new(StdTargetOpener);
    let syncio = Syncio::new(plan.config.syncio_period, plan.len()).map(Arc::new);
    let mut handles = Vec::new();
    for (i, target) in plan.targets().iter().enumerate() {
        let timestamp = timestamp_capacity.map(|cap| Arc::new(TimestampRecorder::new(ArmCondition::All, cap)));
        let mut raw_mode = raw_modes[i].take();
        let mut raw_writer_channel = raw_writer_channels[i].take();
        let mut e2e_channel = e2e_channels[i].take();

        for q in 0..target.queue_depth {
            let target = Arc::clone(target);
            let run_state = Arc::clone(&plan.run_state);
            let opener = Arc::clone(&opener);
            let syncio = syncio.clone();
            let plan = Arc::clone(&plan);
            let worker = Worker::new(target.id, q);
            // Network channels are owned exclusively by one worker per
            // target; `--queue-depth 1` is enforced by the CLI whenever a
            // RAW/E2E network pairing is configured, so only queue slot 0
            // ever receives a channel here.
            let raw_mode = if q == 0 { raw_mode.take() } else { None };
            let raw_writer_channel = if q == 0 { raw_writer_channel.take() } else { None };
            let e2e_channel = if q == 0 { e2e_channel.take() } else { None };
            let timestamp = timestamp.clone();
            handles.push(thread::spawn(move || {
                run_worker(
                    target,
                    worker,
                    run_state,
                    opener,
                    syncio,
                    plan,
                    raw_mode,
                    raw_writer_channel,
                    e2e_channel,
                    timestamp,
                )
            }));
        }
    }

    for h in handles {
        let _ = h.join();
    }
    plan.run_state.mark_complete();

    print_report(&plan);

    if plan.run_state.is_aborted() {
        std::process::exit(1);
    }
}
