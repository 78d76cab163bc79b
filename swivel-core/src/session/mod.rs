//! `StreamSession` — top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! StreamSession::new()
//!     └─► advertise_output_ready_support()   (optional, before start)
//!         └─► start(prefill)   → priming switches, status = Streaming
//!             └─► stop()       → slots unowned, status = Stopped
//! ```
//!
//! ## Execution contexts
//!
//! Three contexts touch a session: the driver clock (via [`DriverPort`]),
//! the host callback (inside a switch dispatch), and any thread calling the
//! output-ready acknowledgment. The ownership machine sits behind one narrow
//! `parking_lot::Mutex`; the acknowledgment path never takes it — it works
//! on atomic generation mirrors so it can run concurrently with an in-flight
//! switch dispatch without stalling the real-time path.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    config::{SessionConfig, ValidityModel},
    error::{Result, SwivelError},
    events::{FaultKind, ProtocolFaultEvent, SessionStatus, SessionStatusEvent, SwitchEvent},
    latency::{self, LatencyReport},
    machine::{Lifecycle, OwnershipMachine},
    notify::{NotificationChannel, SubscriptionHandle},
    priming,
    slots::{Direction, SlotState},
};

/// Broadcast channel capacity for status/fault observers.
const BROADCAST_CAP: usize = 256;

/// Sentinel for "no acknowledgment pending" in the per-slot atomic.
pub(crate) const PENDING_NONE: u64 = u64::MAX;

/// Downstream consumer of drained output buffers (the hardware path).
///
/// The engine calls `drain` exactly once per output handoff, always from the
/// context that owns the slot at that instant. Implementations should be
/// quick; this runs inside the period boundary.
pub trait OutputSink: Send + 'static {
    fn drain(&mut self, index: usize, generation: u64, samples: &[f32]);
}

/// Sink that discards everything. Useful when only the protocol matters.
pub struct NullSink;

impl OutputSink for NullSink {
    fn drain(&mut self, _index: usize, _generation: u64, _samples: &[f32]) {}
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct SessionDiagnostics {
    pub switches: AtomicU64,
    pub priming_switches: AtomicU64,
    pub drains: AtomicU64,
    pub overruns: AtomicU64,
    pub stale_acks: AtomicU64,
    pub violations: AtomicU64,
}

impl SessionDiagnostics {
    pub fn reset(&self) {
        self.switches.store(0, Ordering::Relaxed);
        self.priming_switches.store(0, Ordering::Relaxed);
        self.drains.store(0, Ordering::Relaxed);
        self.overruns.store(0, Ordering::Relaxed);
        self.stale_acks.store(0, Ordering::Relaxed);
        self.violations.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            switches: self.switches.load(Ordering::Relaxed),
            priming_switches: self.priming_switches.load(Ordering::Relaxed),
            drains: self.drains.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            stale_acks: self.stale_acks.load(Ordering::Relaxed),
            violations: self.violations.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the session counters.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub switches: u64,
    pub priming_switches: u64,
    pub drains: u64,
    pub overruns: u64,
    pub stale_acks: u64,
    pub violations: u64,
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub(crate) struct SessionShared {
    pub(crate) config: SessionConfig,
    pub(crate) machine: Mutex<OwnershipMachine>,
    pub(crate) notify: NotificationChannel,
    pub(crate) sink: Mutex<Box<dyn OutputSink>>,
    pub(crate) output_ready_supported: AtomicBool,
    /// True from a successful `start()` until `stop()`/fault.
    pub(crate) active: AtomicBool,
    /// Pending output-ready acknowledgment per output slot (generation, or
    /// [`PENDING_NONE`]). Written lock-free by the host, consumed by the
    /// driver at the next boundary.
    pub(crate) pending_ready: [AtomicU64; 2],
    /// Lock-free mirror of each output slot's current grant generation.
    pub(crate) latest_out_gen: [AtomicU64; 2],
    pub(crate) diagnostics: SessionDiagnostics,
    status: Mutex<SessionStatus>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    fault_tx: broadcast::Sender<ProtocolFaultEvent>,
    fault_seq: AtomicU64,
}

impl SessionShared {
    pub(crate) fn period_budget(&self) -> Duration {
        latency::period_duration(self.config.frames_per_buffer, self.config.sample_rate)
    }

    pub(crate) fn set_status(&self, status: SessionStatus, detail: Option<String>) {
        *self.status.lock() = status;
        let _ = self.status_tx.send(SessionStatusEvent { status, detail });
    }

    pub(crate) fn report_fault(&self, kind: FaultKind, detail: String) {
        let seq = self.fault_seq.fetch_add(1, Ordering::Relaxed);
        warn!(seq, ?kind, detail = detail.as_str(), "protocol fault");
        let _ = self.fault_tx.send(ProtocolFaultEvent { seq, kind, detail });
    }

    /// Deterministic abort after an ownership violation: every slot forced
    /// to `Unowned`, lifecycle `Stopped`, status `Faulted`.
    pub(crate) fn fail(&self, err: &SwivelError) {
        self.machine.lock().stop();
        self.active.store(false, Ordering::SeqCst);
        self.pending_ready[0].store(PENDING_NONE, Ordering::SeqCst);
        self.pending_ready[1].store(PENDING_NONE, Ordering::SeqCst);
        self.diagnostics.violations.fetch_add(1, Ordering::Relaxed);
        self.report_fault(FaultKind::OwnershipViolation, err.to_string());
        self.set_status(SessionStatus::Faulted, Some(err.to_string()));
    }

    pub(crate) fn drain_locked(&self, m: &MutexGuard<'_, OwnershipMachine>, index: usize) {
        let slot = m.output(index);
        self.sink
            .lock()
            .drain(index, slot.generation(), slot.samples());
        self.diagnostics.drains.fetch_add(1, Ordering::Relaxed);
        debug!(
            index,
            generation = slot.generation(),
            "output slot drained to sink"
        );
    }

    /// Advance one period boundary: complete the incoming input slot,
    /// settle the output side for the mode in effect, and build the switch
    /// event. Caller holds the machine lock and has verified the lifecycle.
    pub(crate) fn advance_locked(
        &self,
        m: &mut MutexGuard<'_, OwnershipMachine>,
        position_frames: u64,
    ) -> Result<SwitchEvent> {
        let index = m.next_index();
        m.complete_input(index)?;

        if self.output_ready_supported.load(Ordering::Acquire) {
            // A slot drained over the previous period returns to the host
            // here — at the boundary, never out of band.
            if m.output(index).state() == SlotState::DriverDraining {
                let generation = m.regrant_output(index)?;
                self.latest_out_gen[index].store(generation, Ordering::Release);
            }
            self.consume_acknowledgments(m, index)?;
        } else if self.config.validity == ValidityModel::CallbackOnly
            && m.output(index).state() == SlotState::DriverDraining
        {
            let generation = m.regrant_output(index)?;
            self.latest_out_gen[index].store(generation, Ordering::Release);
        }

        let generation = m.output(index).generation();
        self.latest_out_gen[index].store(generation, Ordering::Release);
        m.record_switch(index);
        if m.lifecycle() == Lifecycle::Priming {
            self.diagnostics
                .priming_switches
                .fetch_add(1, Ordering::Relaxed);
        } else {
            self.diagnostics.switches.fetch_add(1, Ordering::Relaxed);
        }

        Ok(SwitchEvent {
            index,
            position_frames,
            generation,
        })
    }

    /// Consume acknowledgments recorded since the previous boundary. Each
    /// valid one claims its slot for draining; anything targeting a
    /// superseded grant is counted stale and dropped.
    ///
    /// An ack for the slot this very boundary switches to is drained and
    /// regranted in place, so the callback always finds its output slot
    /// host-owned.
    fn consume_acknowledgments(
        &self,
        m: &mut MutexGuard<'_, OwnershipMachine>,
        switching_index: usize,
    ) -> Result<()> {
        for index in 0..2 {
            let pending = self.pending_ready[index].swap(PENDING_NONE, Ordering::AcqRel);
            if pending == PENDING_NONE {
                continue;
            }
            let slot = m.output(index);
            if slot.state() != SlotState::HostOwned
                || slot.generation().saturating_sub(pending) >= 2
            {
                self.diagnostics.stale_acks.fetch_add(1, Ordering::Relaxed);
                self.report_fault(
                    FaultKind::StaleAcknowledgment,
                    format!(
                        "acknowledgment for output slot {index} targeted generation {pending}, \
                         slot now {:?} at generation {}",
                        slot.state(),
                        slot.generation()
                    ),
                );
                continue;
            }
            m.claim_output(index)?;
            self.drain_locked(m, index);
            if index == switching_index {
                let generation = m.regrant_output(index)?;
                self.latest_out_gen[index].store(generation, Ordering::Release);
            }
        }
        Ok(())
    }

    /// Bookkeeping after a switch callback for `index` returns: input
    /// reclaim per the validity model and, without output-ready support, the
    /// drain of the slot whose extended validity just expired.
    pub(crate) fn after_callback_returns(&self, index: usize) -> Result<()> {
        let mut m = self.machine.lock();
        if m.lifecycle() == Lifecycle::Stopped {
            // stop() landed while the dispatch was in flight; nothing to do.
            return Ok(());
        }

        match self.config.validity {
            ValidityModel::Extended => {
                // The grant from the previous callback expires now; the one
                // from this callback stays valid through the next.
                let other = 1 - index;
                if m.input(other).state() == SlotState::HostOwned {
                    m.reclaim_input(other)?;
                }
            }
            ValidityModel::CallbackOnly => {
                m.reclaim_input(index)?;
            }
        }

        if !self.output_ready_supported.load(Ordering::Acquire) {
            if self.config.validity == ValidityModel::CallbackOnly
                && m.output(index).state() == SlotState::HostOwned
            {
                // Strict model: the host's write grant ends with its own
                // callback; the driver holds the slot until it drains.
                m.claim_output(index)?;
            }

            let expired = 1 - index;
            match m.output(expired).state() {
                SlotState::HostOwned => {
                    // Two-period path: copy out in place, renew the grant
                    // epoch for the next presentation of this slot.
                    self.drain_locked(&m, expired);
                    let generation = m.renew_output_epoch(expired)?;
                    self.latest_out_gen[expired].store(generation, Ordering::Release);
                }
                SlotState::DriverDraining => {
                    self.drain_locked(&m, expired);
                }
                SlotState::Unowned => {}
                state => {
                    return Err(SwivelError::OwnershipViolation {
                        direction: Direction::Output,
                        index: expired,
                        expected: SlotState::HostOwned,
                        found: state,
                        generation: m.output(expired).generation(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Dispatch a switch event and run the post-return bookkeeping.
    pub(crate) fn emit_and_settle(&self, event: &SwitchEvent) -> Result<()> {
        let budget = self.period_budget();
        let outcome = self
            .notify
            .emit(event, budget, || self.active.load(Ordering::SeqCst));

        if !outcome.admitted {
            // A stop() landed between the boundary advance and the dispatch;
            // the event must not reach handlers after that stop returned.
            return Ok(());
        }

        if !outcome.dispatched {
            // Flag policy dropped the dispatch: the grant is revoked at
            // once, as if the callback had returned immediately.
            self.diagnostics.overruns.fetch_add(1, Ordering::Relaxed);
            self.report_fault(
                FaultKind::CallbackOverrun,
                format!(
                    "switch for slot {} dropped — previous dispatch still in flight",
                    event.index
                ),
            );
        } else if latency::is_overrun(outcome.dispatch_elapsed, budget)
            || latency::is_overrun(outcome.blocked_for, budget)
        {
            let err = SwivelError::CallbackOverrun {
                elapsed_us: outcome
                    .dispatch_elapsed
                    .max(outcome.blocked_for)
                    .as_micros(),
                budget_us: budget.as_micros(),
            };
            self.diagnostics.overruns.fetch_add(1, Ordering::Relaxed);
            self.report_fault(FaultKind::CallbackOverrun, err.to_string());
        }

        if let Err(err) = self.after_callback_returns(event.index) {
            self.fail(&err);
            return Err(err);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Driver port
// ---------------------------------------------------------------------------

/// Handle for the hardware-facing context.
///
/// Cloneable and `Send`; the driver clock calls [`complete_period`] once per
/// buffer period and may use [`fill_input`] to write capture data into the
/// slot it currently owns.
///
/// [`complete_period`]: DriverPort::complete_period
/// [`fill_input`]: DriverPort::fill_input
#[derive(Clone)]
pub struct DriverPort {
    shared: Arc<SessionShared>,
}

impl DriverPort {
    /// Advance one period boundary and dispatch the switch event.
    ///
    /// The driver guarantees the input slot is fully written and the
    /// previously claimed output contents have reached the hardware path
    /// before calling this.
    ///
    /// # Errors
    /// - `SwivelError::NotRunning` outside the `Streaming` state.
    /// - `SwivelError::OwnershipViolation` on an illegal transition; the
    ///   session is force-stopped before this returns.
    pub fn complete_period(&self, position_frames: u64) -> Result<SwitchEvent> {
        let event = {
            let mut m = self.shared.machine.lock();
            if m.lifecycle() != Lifecycle::Streaming {
                return Err(SwivelError::NotRunning);
            }
            match self.shared.advance_locked(&mut m, position_frames) {
                Ok(event) => event,
                Err(err) => {
                    drop(m);
                    self.shared.fail(&err);
                    return Err(err);
                }
            }
        };
        self.shared.emit_and_settle(&event)?;
        Ok(event)
    }

    /// Write capture data into the input slot the driver currently owns
    /// (the one addressed by the next switch).
    ///
    /// # Errors
    /// `SwivelError::OwnershipViolation` if that slot is not
    /// `DriverFilling` — e.g. calling this while the host still holds it.
    /// The session is force-stopped, as the write would race the host.
    pub fn fill_input(&self, fill: impl FnOnce(&mut [f32])) -> Result<()> {
        let mut m = self.shared.machine.lock();
        if m.lifecycle() != Lifecycle::Streaming {
            return Err(SwivelError::NotRunning);
        }
        let index = m.next_index();
        let slot = m.input(index);
        if slot.state() != SlotState::DriverFilling {
            let err = SwivelError::OwnershipViolation {
                direction: Direction::Input,
                index,
                expected: SlotState::DriverFilling,
                found: slot.state(),
                generation: slot.generation(),
            };
            drop(m);
            self.shared.fail(&err);
            return Err(err);
        }
        fill(m.input_mut(index).samples_mut());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Stream session
// ---------------------------------------------------------------------------

/// The top-level session handle.
///
/// `StreamSession` is `Send + Sync` — all fields use interior mutability.
/// Wrap in `Arc<StreamSession>` to share between the host, the driver clock,
/// and observability tasks.
pub struct StreamSession {
    shared: Arc<SessionShared>,
}

impl StreamSession {
    /// Create a session around a downstream sink. Does not claim any slot —
    /// call [`start`](Self::start).
    pub fn new(config: SessionConfig, sink: Box<dyn OutputSink>) -> Result<Self> {
        config.validate()?;
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (fault_tx, _) = broadcast::channel(BROADCAST_CAP);
        let machine = OwnershipMachine::new(&config);
        let notify = NotificationChannel::new(config.overrun_policy);
        Ok(Self {
            shared: Arc::new(SessionShared {
                config,
                machine: Mutex::new(machine),
                notify,
                sink: Mutex::new(sink),
                output_ready_supported: AtomicBool::new(false),
                active: AtomicBool::new(false),
                pending_ready: [AtomicU64::new(PENDING_NONE), AtomicU64::new(PENDING_NONE)],
                latest_out_gen: [AtomicU64::new(0), AtomicU64::new(0)],
                diagnostics: SessionDiagnostics::default(),
                status: Mutex::new(SessionStatus::Stopped),
                status_tx,
                fault_tx,
                fault_seq: AtomicU64::new(0),
            }),
        })
    }

    /// Convenience constructor discarding drained output.
    pub fn with_null_sink(config: SessionConfig) -> Result<Self> {
        Self::new(config, Box::new(NullSink))
    }

    /// Declare that the host will acknowledge output buffers, shortening the
    /// output handoff to one period. Must be called before `start()`.
    pub fn advertise_output_ready_support(&self) -> Result<()> {
        if self.shared.active.load(Ordering::SeqCst) {
            return Err(SwivelError::AlreadyRunning);
        }
        self.shared
            .output_ready_supported
            .store(true, Ordering::Release);
        info!("output-ready support advertised");
        Ok(())
    }

    pub fn output_ready_supported(&self) -> bool {
        self.shared.output_ready_supported.load(Ordering::Acquire)
    }

    /// Start the session.
    ///
    /// `primed_output_slot1` is the host's pre-fill for output slot 1 — the
    /// slot *not* addressed by the first switch. It must hold exactly
    /// `frames_per_buffer * output_channels` samples.
    ///
    /// Runs the full priming sequence, including the first switch
    /// callback(s), before returning. On success the session is `Streaming`
    /// and boundary advances come from the [`DriverPort`].
    ///
    /// # Errors
    /// - `SwivelError::PrimingPrecondition` when the pre-fill is missing or
    ///   malformed; no partial session is created.
    /// - `SwivelError::AlreadyRunning` when the session is active.
    pub fn start(&self, primed_output_slot1: Vec<f32>) -> Result<()> {
        priming::run(&self.shared, primed_output_slot1)
    }

    /// Stop the session. Safe to call from the host context while a switch
    /// dispatch is logically in flight; after this returns no further switch
    /// events are emitted and every slot is `Unowned`.
    ///
    /// # Errors
    /// `SwivelError::NotRunning` if the session is not active.
    pub fn stop(&self) -> Result<()> {
        if !self.shared.active.swap(false, Ordering::SeqCst) {
            return Err(SwivelError::NotRunning);
        }
        self.shared.machine.lock().stop();
        self.shared.pending_ready[0].store(PENDING_NONE, Ordering::SeqCst);
        self.shared.pending_ready[1].store(PENDING_NONE, Ordering::SeqCst);
        self.shared.set_status(SessionStatus::Stopped, None);
        info!("session stopped");
        Ok(())
    }

    /// Handle for the hardware-facing driver context.
    pub fn driver_port(&self) -> DriverPort {
        DriverPort {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Register a switch handler. See [`NotificationChannel`] for the
    /// dispatch contract.
    pub fn subscribe_switch(
        &self,
        handler: impl FnMut(&SwitchEvent) + Send + 'static,
    ) -> SubscriptionHandle {
        self.shared.notify.subscribe(handler)
    }

    pub fn unsubscribe_switch(&self, handle: SubscriptionHandle) -> bool {
        self.shared.notify.unsubscribe(handle)
    }

    /// Read capture data from an input slot the host currently owns.
    ///
    /// # Errors
    /// `SwivelError::OwnershipViolation` when the slot is not `HostOwned` —
    /// the read would race the driver's refill, so the session is
    /// force-stopped.
    pub fn read_input(&self, index: usize, read: impl FnOnce(&[f32])) -> Result<()> {
        if index >= 2 {
            return Err(SwivelError::InvalidSlotIndex(index));
        }
        let m = self.shared.machine.lock();
        if m.lifecycle() == Lifecycle::Stopped {
            return Err(SwivelError::NotRunning);
        }
        let slot = m.input(index);
        if slot.state() != SlotState::HostOwned {
            let err = SwivelError::OwnershipViolation {
                direction: Direction::Input,
                index,
                expected: SlotState::HostOwned,
                found: slot.state(),
                generation: slot.generation(),
            };
            drop(m);
            self.shared.fail(&err);
            return Err(err);
        }
        read(slot.samples());
        Ok(())
    }

    /// Write playback data into an output slot the host currently owns.
    ///
    /// # Errors
    /// `SwivelError::OwnershipViolation` when the slot is not `HostOwned` —
    /// the write would race the hardware path, so the session is
    /// force-stopped.
    pub fn fill_output(&self, index: usize, fill: impl FnOnce(&mut [f32])) -> Result<()> {
        if index >= 2 {
            return Err(SwivelError::InvalidSlotIndex(index));
        }
        let mut m = self.shared.machine.lock();
        if m.lifecycle() == Lifecycle::Stopped {
            return Err(SwivelError::NotRunning);
        }
        let slot = m.output(index);
        if slot.state() != SlotState::HostOwned {
            let err = SwivelError::OwnershipViolation {
                direction: Direction::Output,
                index,
                expected: SlotState::HostOwned,
                found: slot.state(),
                generation: slot.generation(),
            };
            drop(m);
            self.shared.fail(&err);
            return Err(err);
        }
        fill(m.output_mut(index).samples_mut());
        Ok(())
    }

    /// Acknowledge the most recently granted epoch of an output slot.
    ///
    /// Non-blocking and safe from any context, including reentrantly from a
    /// switch callback. A no-op when output-ready support was not
    /// advertised, when the session is not active, or when an
    /// acknowledgment for the slot is already pending.
    pub fn signal_output_ready(&self, index: usize) -> Result<()> {
        if index >= 2 {
            return Err(SwivelError::InvalidSlotIndex(index));
        }
        let latest = self.shared.latest_out_gen[index].load(Ordering::Acquire);
        self.signal_output_ready_at(index, latest)
    }

    /// Acknowledge a specific grant generation, as carried by
    /// [`SwitchEvent::generation`].
    ///
    /// # Errors
    /// `SwivelError::StaleAcknowledgment` when the generation has been
    /// superseded by two or more switches. Counted and reported; the
    /// session continues.
    pub fn signal_output_ready_at(&self, index: usize, generation: u64) -> Result<()> {
        if index >= 2 {
            return Err(SwivelError::InvalidSlotIndex(index));
        }
        if !self.shared.output_ready_supported.load(Ordering::Acquire)
            || !self.shared.active.load(Ordering::SeqCst)
        {
            return Ok(());
        }

        let current = self.shared.latest_out_gen[index].load(Ordering::Acquire);
        if current.saturating_sub(generation) >= 2 {
            self.shared
                .diagnostics
                .stale_acks
                .fetch_add(1, Ordering::Relaxed);
            self.shared.report_fault(
                FaultKind::StaleAcknowledgment,
                format!(
                    "output slot {index}: acknowledged generation {generation}, current {current}"
                ),
            );
            return Err(SwivelError::StaleAcknowledgment {
                index,
                acknowledged: generation,
                current,
            });
        }

        // Superseded by at most one switch: apply to the most recent grant.
        // Already-pending is a deliberate no-op.
        let _ = self.shared.pending_ready[index].compare_exchange(
            PENDING_NONE,
            current,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        Ok(())
    }

    /// Reported input/output latency for the current configuration.
    pub fn query_latency(&self) -> LatencyReport {
        latency::report(
            self.shared.config.frames_per_buffer,
            self.output_ready_supported(),
        )
    }

    /// Current lifecycle status (snapshot).
    pub fn status(&self) -> SessionStatus {
        *self.shared.status.lock()
    }

    /// Observable ownership state of a slot, with the pending-release
    /// overlay applied: a host-owned output slot with an unconsumed
    /// acknowledgment reports `PendingRelease`.
    pub fn slot_state(&self, direction: Direction, index: usize) -> Result<SlotState> {
        if index >= 2 {
            return Err(SwivelError::InvalidSlotIndex(index));
        }
        let m = self.shared.machine.lock();
        let slot = match direction {
            Direction::Input => m.input(index),
            Direction::Output => m.output(index),
        };
        let mut state = slot.state();
        if direction == Direction::Output
            && state == SlotState::HostOwned
            && self.shared.pending_ready[index].load(Ordering::Acquire) != PENDING_NONE
        {
            state = SlotState::PendingRelease;
        }
        Ok(state)
    }

    /// Grant generation of a slot, for callers correlating acknowledgments.
    pub fn slot_generation(&self, direction: Direction, index: usize) -> Result<u64> {
        if index >= 2 {
            return Err(SwivelError::InvalidSlotIndex(index));
        }
        let m = self.shared.machine.lock();
        Ok(match direction {
            Direction::Input => m.input(index).generation(),
            Direction::Output => m.output(index).generation(),
        })
    }

    /// Subscribe to lifecycle status changes.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.shared.status_tx.subscribe()
    }

    /// Subscribe to counted protocol faults (stale acks, overruns,
    /// violations, priming failures).
    pub fn subscribe_faults(&self) -> broadcast::Receiver<ProtocolFaultEvent> {
        self.shared.fault_tx.subscribe()
    }

    /// Snapshot of the session counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.shared.diagnostics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(validity: ValidityModel) -> SessionConfig {
        SessionConfig {
            frames_per_buffer: 4,
            input_channels: 1,
            output_channels: 1,
            validity,
            ..SessionConfig::default()
        }
    }

    #[test]
    fn extended_validity_holds_the_previous_grant_through_the_next_callback() {
        let session = StreamSession::with_null_sink(config(ValidityModel::Extended)).unwrap();
        session.start(vec![0.0; 4]).unwrap();

        // The most recent grant (slot 1) survives its own callback return.
        assert_eq!(
            session.slot_state(Direction::Input, 1).unwrap(),
            SlotState::HostOwned
        );
        assert_eq!(
            session.slot_state(Direction::Input, 0).unwrap(),
            SlotState::DriverFilling
        );
    }

    #[test]
    fn callback_only_reclaims_each_grant_at_its_own_return() {
        let session = StreamSession::with_null_sink(config(ValidityModel::CallbackOnly)).unwrap();
        session.start(vec![0.0; 4]).unwrap();

        for index in 0..2 {
            assert_eq!(
                session.slot_state(Direction::Input, index).unwrap(),
                SlotState::DriverFilling
            );
        }

        let port = session.driver_port();
        port.complete_period(0).unwrap();
        assert_eq!(
            session.slot_state(Direction::Input, 0).unwrap(),
            SlotState::DriverFilling
        );
    }

    #[test]
    fn callback_only_output_cycle_drains_once_per_period() {
        let session = StreamSession::with_null_sink(config(ValidityModel::CallbackOnly)).unwrap();
        session.start(vec![0.0; 4]).unwrap();

        let port = session.driver_port();
        for p in 0..4u64 {
            port.complete_period(p * 4).unwrap();
        }

        let snapshot = session.diagnostics_snapshot();
        assert_eq!(snapshot.drains, 6); // 2 priming + 1 per period
        assert_eq!(snapshot.violations, 0);
        assert_eq!(session.status(), SessionStatus::Streaming);
    }

    #[test]
    fn advertising_output_ready_after_start_is_rejected() {
        let session = StreamSession::with_null_sink(config(ValidityModel::Extended)).unwrap();
        session.start(vec![0.0; 4]).unwrap();
        assert!(matches!(
            session.advertise_output_ready_support(),
            Err(SwivelError::AlreadyRunning)
        ));
    }

    #[test]
    fn host_access_on_a_stopped_session_is_not_running_not_a_fault() {
        let session = StreamSession::with_null_sink(config(ValidityModel::Extended)).unwrap();

        assert!(matches!(
            session.read_input(0, |_| {}),
            Err(SwivelError::NotRunning)
        ));
        assert!(matches!(
            session.fill_output(0, |samples| samples[0] = 1.0),
            Err(SwivelError::NotRunning)
        ));
        assert_eq!(session.status(), SessionStatus::Stopped);
        assert_eq!(session.diagnostics_snapshot().violations, 0);

        // Same after an orderly stop.
        session.start(vec![0.0; 4]).unwrap();
        session.stop().unwrap();
        assert!(matches!(
            session.fill_output(1, |_| {}),
            Err(SwivelError::NotRunning)
        ));
        assert_eq!(session.status(), SessionStatus::Stopped);
        assert_eq!(session.diagnostics_snapshot().violations, 0);
    }

    #[test]
    fn acknowledgments_are_no_ops_without_advertised_support() {
        let session = StreamSession::with_null_sink(config(ValidityModel::Extended)).unwrap();
        session.start(vec![0.0; 4]).unwrap();

        session.signal_output_ready(0).unwrap();
        assert_eq!(
            session.slot_state(Direction::Output, 0).unwrap(),
            SlotState::HostOwned
        );
        assert_eq!(session.diagnostics_snapshot().stale_acks, 0);
    }
}
