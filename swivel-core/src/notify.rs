//! Switch notification channel.
//!
//! # Design constraints
//!
//! The emitter runs in the driver's real-time context. The channel is a
//! bounded, single-outstanding-event signal, not a queue: there is never more
//! than one switch dispatch in flight. Emitting while the previous dispatch
//! has not returned either parks the emitter until it does
//! ([`OverrunPolicy::Block`], the single-threaded callback convention) or
//! drops the dispatch and reports it ([`OverrunPolicy::Flag`]).
//!
//! Handlers run synchronously on the emitting thread. A handler may call the
//! output-ready acknowledgment reentrantly — that path takes no locks — but
//! must not subscribe or unsubscribe from inside a dispatch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::config::OverrunPolicy;
use crate::events::SwitchEvent;

type Handler = Box<dyn FnMut(&SwitchEvent) + Send>;

/// Identifies one subscribed switch handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle(u64);

/// Timing report for one `emit` call.
#[derive(Debug, Clone, Copy)]
pub struct EmitOutcome {
    /// False when the admission gate refused the event; nothing ran and the
    /// caller must not classify the outcome as an overrun.
    pub admitted: bool,
    /// False when `OverrunPolicy::Flag` dropped the dispatch.
    pub dispatched: bool,
    /// Time spent parked waiting for the previous dispatch to return.
    pub blocked_for: Duration,
    /// Time the handlers took for this event.
    pub dispatch_elapsed: Duration,
}

impl EmitOutcome {
    fn refused(blocked_for: Duration) -> Self {
        Self {
            admitted: false,
            dispatched: false,
            blocked_for,
            dispatch_elapsed: Duration::ZERO,
        }
    }
}

pub struct NotificationChannel {
    handlers: Mutex<Vec<(u64, Handler)>>,
    next_id: AtomicU64,
    policy: OverrunPolicy,
    in_flight: Mutex<bool>,
    returned: Condvar,
}

impl NotificationChannel {
    pub fn new(policy: OverrunPolicy) -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            policy,
            in_flight: Mutex::new(false),
            returned: Condvar::new(),
        }
    }

    /// Register a switch handler. Handlers run in subscription order.
    pub fn subscribe(
        &self,
        handler: impl FnMut(&SwitchEvent) + Send + 'static,
    ) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.lock().push((id, Box::new(handler)));
        SubscriptionHandle(id)
    }

    /// Remove a handler. Returns false if the handle was already gone.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != handle.0);
        handlers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Dispatch one switch event to all handlers.
    ///
    /// `budget` is the period duration; it bounds each park interval so a
    /// stuck callback shows up as repeated waits rather than a silent hang.
    /// The caller classifies the returned timings against the budget.
    ///
    /// `admit` is evaluated inside the dispatch critical section, before any
    /// handler runs (and again after a `Block` park, which may span a long
    /// time). Returning false refuses the event: a boundary that raced a
    /// concurrent `stop()` must not leak its already-built event to handlers
    /// after the stop returned.
    pub fn emit(
        &self,
        event: &SwitchEvent,
        budget: Duration,
        admit: impl Fn() -> bool,
    ) -> EmitOutcome {
        let parked_at = Instant::now();
        {
            let mut in_flight = self.in_flight.lock();
            if !admit() {
                return EmitOutcome::refused(parked_at.elapsed());
            }
            if *in_flight {
                match self.policy {
                    OverrunPolicy::Flag => {
                        warn!(index = event.index, "switch dispatch still in flight — dropping emit");
                        return EmitOutcome {
                            admitted: true,
                            dispatched: false,
                            blocked_for: parked_at.elapsed(),
                            dispatch_elapsed: Duration::ZERO,
                        };
                    }
                    OverrunPolicy::Block => {
                        while *in_flight {
                            let _ = self.returned.wait_for(&mut in_flight, budget);
                        }
                        if !admit() {
                            return EmitOutcome::refused(parked_at.elapsed());
                        }
                    }
                }
            }
            *in_flight = true;
        }
        let blocked_for = parked_at.elapsed();

        let started = Instant::now();
        {
            let mut handlers = self.handlers.lock();
            for (_, handler) in handlers.iter_mut() {
                handler(event);
            }
        }
        let dispatch_elapsed = started.elapsed();

        let mut in_flight = self.in_flight.lock();
        *in_flight = false;
        self.returned.notify_all();

        EmitOutcome {
            admitted: true,
            dispatched: true,
            blocked_for,
            dispatch_elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    fn event(index: usize) -> SwitchEvent {
        SwitchEvent {
            index,
            position_frames: 0,
            generation: 1,
        }
    }

    const BUDGET: Duration = Duration::from_millis(10);

    #[test]
    fn emit_dispatches_to_all_handlers_in_order() {
        let channel = NotificationChannel::new(OverrunPolicy::Block);
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&log);
        channel.subscribe(move |ev| first.lock().push(("first", ev.index)));
        let second = Arc::clone(&log);
        channel.subscribe(move |ev| second.lock().push(("second", ev.index)));

        let outcome = channel.emit(&event(1), BUDGET, || true);
        assert!(outcome.dispatched);
        assert_eq!(&*log.lock(), &vec![("first", 1), ("second", 1)]);
    }

    #[test]
    fn unsubscribe_removes_exactly_one_handler() {
        let channel = NotificationChannel::new(OverrunPolicy::Block);
        let count = Arc::new(AtomicUsize::new(0));

        let keep = Arc::clone(&count);
        let _kept = channel.subscribe(move |_| {
            keep.fetch_add(1, Ordering::Relaxed);
        });
        let gone = Arc::clone(&count);
        let handle = channel.subscribe(move |_| {
            gone.fetch_add(100, Ordering::Relaxed);
        });

        assert!(channel.unsubscribe(handle));
        assert!(!channel.unsubscribe(handle));
        channel.emit(&event(0), BUDGET, || true);
        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(channel.subscriber_count(), 1);
    }

    #[test]
    fn flag_policy_drops_emit_while_dispatch_in_flight() {
        let channel = Arc::new(NotificationChannel::new(OverrunPolicy::Flag));
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);

        channel.subscribe(move |_| {
            entered_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        });

        let emitter = Arc::clone(&channel);
        let slow = thread::spawn(move || emitter.emit(&event(0), BUDGET, || true));
        entered_rx
            .recv_timeout(Duration::from_secs(1))
            .expect("first dispatch never started");

        // Second emit arrives while the first handler is still running.
        let outcome = channel.emit(&event(1), BUDGET, || true);
        assert!(!outcome.dispatched);

        release_tx.send(()).unwrap();
        assert!(slow.join().unwrap().dispatched);
    }

    #[test]
    fn block_policy_waits_for_previous_dispatch_to_return() {
        let channel = Arc::new(NotificationChannel::new(OverrunPolicy::Block));
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);

        let order = Arc::new(Mutex::new(Vec::new()));
        let inside = Arc::clone(&order);
        channel.subscribe(move |ev| {
            if ev.index == 0 {
                entered_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(30));
            }
            inside.lock().push(ev.index);
        });

        let emitter = Arc::clone(&channel);
        let slow = thread::spawn(move || emitter.emit(&event(0), Duration::from_millis(5), || true));
        entered_rx
            .recv_timeout(Duration::from_secs(1))
            .expect("first dispatch never started");

        let outcome = channel.emit(&event(1), Duration::from_millis(5), || true);
        slow.join().unwrap();

        assert!(outcome.dispatched);
        assert!(outcome.blocked_for >= Duration::from_millis(5));
        assert_eq!(&*order.lock(), &vec![0, 1]);
    }

    #[test]
    fn refused_admission_runs_no_handler_at_all() {
        let channel = NotificationChannel::new(OverrunPolicy::Block);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        channel.subscribe(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        let outcome = channel.emit(&event(0), BUDGET, || false);
        assert!(!outcome.admitted);
        assert!(!outcome.dispatched);
        assert_eq!(hits.load(Ordering::Relaxed), 0);

        // The channel is not poisoned: a later admitted emit goes through.
        let outcome = channel.emit(&event(0), BUDGET, || true);
        assert!(outcome.dispatched);
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }
}
