fn main() {
    if let Err(e) = run() {
        eprintln!("soak failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    use serde::Serialize;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use swivel_core::{
        latency, OutputSink, OverrunPolicy, SessionConfig, StreamSession, SwitchEvent,
        ValidityModel,
    };

    #[derive(Debug)]
    struct Args {
        periods: u64,
        frames: usize,
        rate: u32,
        channels: usize,
        output_ready: bool,
        validity: ValidityModel,
        policy: OverrunPolicy,
        paced: bool,
        output: Option<PathBuf>,
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Summary {
        periods: u64,
        frames_per_buffer: usize,
        sample_rate: u32,
        output_ready: bool,
        validity: ValidityModel,
        input_latency_frames: u64,
        output_latency_frames: u64,
        switches: u64,
        priming_switches: u64,
        drains: u64,
        overruns: u64,
        stale_acks: u64,
        violations: u64,
        alternation_errors: u64,
        sink_marker_mismatches: u64,
        elapsed_ms: f64,
    }

    fn parse_args() -> Result<Args, String> {
        let mut periods: u64 = 2_000;
        let mut frames: usize = 256;
        let mut rate: u32 = 48_000;
        let mut channels: usize = 2;
        let mut output_ready = false;
        let mut validity = ValidityModel::Extended;
        let mut policy = OverrunPolicy::Block;
        let mut paced = false;
        let mut output: Option<PathBuf> = None;

        let mut it = std::env::args().skip(1).peekable();
        while let Some(arg) = it.next() {
            match arg.as_str() {
                "--periods" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --periods".into());
                    };
                    periods = v
                        .parse::<u64>()
                        .map_err(|_| "invalid value for --periods".to_string())?
                        .clamp(1, 10_000_000);
                }
                "--frames" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --frames".into());
                    };
                    frames = v
                        .parse::<usize>()
                        .map_err(|_| "invalid value for --frames".to_string())?
                        .clamp(16, 65_536);
                }
                "--rate" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --rate".into());
                    };
                    rate = v
                        .parse::<u32>()
                        .map_err(|_| "invalid value for --rate".to_string())?;
                }
                "--channels" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --channels".into());
                    };
                    channels = v
                        .parse::<usize>()
                        .map_err(|_| "invalid value for --channels".to_string())?
                        .clamp(1, 32);
                }
                "--output-ready" => output_ready = true,
                "--validity" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --validity".into());
                    };
                    validity = match v.as_str() {
                        "extended" => ValidityModel::Extended,
                        "callbackonly" => ValidityModel::CallbackOnly,
                        other => return Err(format!("unknown validity model: {other}")),
                    };
                }
                "--policy" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --policy".into());
                    };
                    policy = match v.as_str() {
                        "block" => OverrunPolicy::Block,
                        "flag" => OverrunPolicy::Flag,
                        other => return Err(format!("unknown overrun policy: {other}")),
                    };
                }
                "--paced" => paced = true,
                "--output" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --output".into());
                    };
                    output = Some(PathBuf::from(v));
                }
                "--help" | "-h" => {
                    println!(
                        "Usage: cargo run -p swivel-core --bin soak -- \\
  [--periods <n>] [--frames <n>] [--rate <hz>] [--channels <n>] \\
  [--output-ready] [--validity extended|callbackonly] [--policy block|flag] \\
  [--paced] [--output <file.json>]"
                    );
                    std::process::exit(0);
                }
                other => {
                    return Err(format!("unknown argument: {other}"));
                }
            }
        }

        Ok(Args {
            periods,
            frames,
            rate,
            channels,
            output_ready,
            validity,
            policy,
            paced,
            output,
        })
    }

    /// Checks that every drained buffer still carries the marker the host
    /// wrote under the matching grant generation.
    struct MarkerSink {
        mismatches: Arc<AtomicU64>,
    }

    impl OutputSink for MarkerSink {
        fn drain(&mut self, _index: usize, _generation: u64, samples: &[f32]) {
            // Sub-generation markers survive claim/renew bumps.
            let marker = samples.first().copied().unwrap_or(0.0);
            if marker != 0.0 && marker.fract() != 0.5 {
                self.mismatches.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = parse_args()?;
    let config = SessionConfig {
        frames_per_buffer: args.frames,
        input_channels: args.channels,
        output_channels: args.channels,
        sample_rate: args.rate,
        validity: args.validity,
        overrun_policy: args.policy,
        ..SessionConfig::default()
    };

    let mismatches = Arc::new(AtomicU64::new(0));
    let session = Arc::new(
        StreamSession::new(
            config.clone(),
            Box::new(MarkerSink {
                mismatches: Arc::clone(&mismatches),
            }),
        )
        .map_err(|e| e.to_string())?,
    );
    if args.output_ready {
        session
            .advertise_output_ready_support()
            .map_err(|e| e.to_string())?;
    }

    // Scripted host: on every switch it writes a half-fraction marker into
    // the granted output slot, acknowledges in output-ready mode, and
    // forwards the event to the checker thread.
    let (event_tx, event_rx) = crossbeam_channel::unbounded::<SwitchEvent>();
    let host_session = Arc::clone(&session);
    let ack = args.output_ready;
    session.subscribe_switch(move |event| {
        let marker = event.generation as f32 + 0.5;
        let _ = host_session.fill_output(event.index, |samples| {
            if let Some(first) = samples.first_mut() {
                *first = marker;
            }
        });
        if ack {
            let _ = host_session.signal_output_ready_at(event.index, event.generation);
        }
        let _ = event_tx.send(*event);
    });

    let started = Instant::now();
    session
        .start(vec![0.5; config.output_slot_len()])
        .map_err(|e| e.to_string())?;

    // Driver clock on its own thread, the way hardware would drive it.
    let port = session.driver_port();
    let frames = args.frames as u64;
    let periods = args.periods;
    let period = latency::period_duration(args.frames, args.rate);
    let paced = args.paced;
    let driver = std::thread::spawn(move || -> Result<(), String> {
        let mut position = 0u64;
        for p in 0..periods {
            port.fill_input(|samples| {
                if let Some(first) = samples.first_mut() {
                    *first = p as f32;
                }
            })
            .map_err(|e| e.to_string())?;
            port.complete_period(position).map_err(|e| e.to_string())?;
            position += frames;
            if paced {
                std::thread::sleep(period);
            }
        }
        Ok(())
    });

    // Checker: strict 0/1 alternation across the whole run.
    let mut alternation_errors = 0u64;
    let mut last_index: Option<usize> = None;
    let mut seen = 0u64;
    let expected_events = periods + if args.output_ready { 1 } else { 2 };
    while seen < expected_events {
        let event = event_rx
            .recv_timeout(Duration::from_secs(30))
            .map_err(|_| "switch event stream stalled".to_string())?;
        if let Some(last) = last_index {
            if event.index != 1 - last {
                alternation_errors += 1;
            }
        }
        last_index = Some(event.index);
        seen += 1;
    }

    driver.join().map_err(|_| "driver thread panicked")??;
    session.stop().map_err(|e| e.to_string())?;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    let snapshot = session.diagnostics_snapshot();
    let report = session.query_latency();
    let summary = Summary {
        periods: args.periods,
        frames_per_buffer: args.frames,
        sample_rate: args.rate,
        output_ready: args.output_ready,
        validity: args.validity,
        input_latency_frames: report.input_frames,
        output_latency_frames: report.output_frames,
        switches: snapshot.switches,
        priming_switches: snapshot.priming_switches,
        drains: snapshot.drains,
        overruns: snapshot.overruns,
        stale_acks: snapshot.stale_acks,
        violations: snapshot.violations,
        alternation_errors,
        sink_marker_mismatches: mismatches.load(Ordering::Relaxed),
        elapsed_ms,
    };

    println!(
        "Done. periods={} switches={} drains={} overruns={} stale={} violations={} alt_errors={}",
        summary.periods,
        summary.switches,
        summary.drains,
        summary.overruns,
        summary.stale_acks,
        summary.violations,
        summary.alternation_errors
    );

    let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    if let Some(out) = args.output {
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        std::fs::write(&out, json).map_err(|e| e.to_string())?;
        println!("Wrote soak report: {}", out.display());
    } else {
        println!("{json}");
    }

    Ok(())
}
