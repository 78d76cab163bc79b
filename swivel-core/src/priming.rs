//! Session priming.
//!
//! Startup runs the first switch callback(s) before the driver clock takes
//! over, so the host sees the same grant sequence from its very first
//! callback that it will see in steady state. The shape depends on whether
//! output-ready acknowledgments are available:
//!
//! ```text
//! without acks:  prime → switch(0) → drain out1 → switch(1) → drain out0 → streaming
//! with acks:     prime → switch(0) → drain out1 immediately → streaming
//! ```
//!
//! Two priming switches reproduce the two-period output latency; with
//! acknowledgments a single one suffices because the host hands each buffer
//! back explicitly.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::info;

use crate::error::{Result, SwivelError};
use crate::events::{FaultKind, SessionStatus};
use crate::session::{SessionShared, PENDING_NONE};

/// Run the full priming sequence. On success the session is `Streaming`.
pub(crate) fn run(shared: &Arc<SessionShared>, primed_output_slot1: Vec<f32>) -> Result<()> {
    if shared.active.load(Ordering::SeqCst) {
        return Err(SwivelError::AlreadyRunning);
    }

    let expected = shared.config.output_slot_len();
    if primed_output_slot1.len() != expected {
        let detail = format!(
            "output slot 1 pre-fill holds {} samples, expected {}",
            primed_output_slot1.len(),
            expected
        );
        shared.report_fault(FaultKind::PrimingPrecondition, detail.clone());
        return Err(SwivelError::PrimingPrecondition(detail));
    }

    {
        let mut m = shared.machine.lock();
        m.prime(&primed_output_slot1)?;
        shared.latest_out_gen[0].store(m.output(0).generation(), Ordering::Release);
        shared.latest_out_gen[1].store(m.output(1).generation(), Ordering::Release);
    }
    shared.pending_ready[0].store(PENDING_NONE, Ordering::SeqCst);
    shared.pending_ready[1].store(PENDING_NONE, Ordering::SeqCst);
    shared.active.store(true, Ordering::SeqCst);
    shared.set_status(SessionStatus::Priming, None);

    let output_ready = shared.output_ready_supported.load(Ordering::Acquire);
    info!(
        frames_per_buffer = shared.config.frames_per_buffer,
        output_ready, "priming session"
    );

    // First switch always addresses slot 0, with silence in the input half.
    priming_switch(shared, 0)?;

    if output_ready {
        // The pre-filled slot goes straight to the hardware path; from here
        // every drain is driven by a host acknowledgment.
        let mut m = shared.machine.lock();
        if let Err(err) = m.claim_output(1) {
            drop(m);
            shared.fail(&err);
            return Err(err);
        }
        shared.drain_locked(&m, 1);
    } else {
        // Second priming switch; its post-return step drains slot 0.
        priming_switch(shared, shared.config.frames_per_buffer as u64)?;
    }

    shared.machine.lock().begin_streaming();
    shared.set_status(SessionStatus::Streaming, None);
    info!("priming complete — streaming");
    Ok(())
}

fn priming_switch(shared: &Arc<SessionShared>, position_frames: u64) -> Result<()> {
    let event = {
        let mut m = shared.machine.lock();
        match shared.advance_locked(&mut m, position_frames) {
            Ok(event) => event,
            Err(err) => {
                drop(m);
                shared.fail(&err);
                return Err(err);
            }
        }
    };
    shared.emit_and_settle(&event)
}
