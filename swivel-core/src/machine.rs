//! Ownership state machine.
//!
//! ## Transition map (per slot)
//!
//! ```text
//! input:   Unowned ─prime─► DriverFilling ─complete─► HostOwned ─reclaim─► DriverFilling
//! output:  Unowned ─prime─► HostOwned ─┬─claim (ack consumed / released)─► DriverDraining ─regrant─► HostOwned
//!                                      └─renew epoch (two-period path: drained in place)─► HostOwned
//! any:     * ─stop─► Unowned
//! ```
//!
//! Every transition checks the slot's current state; a mismatch is an
//! `OwnershipViolation` and the caller must stop the session. The machine is
//! plain data — the session guards it with one narrow `parking_lot::Mutex`
//! and keeps mirrors of the output generations in atomics so the
//! acknowledgment path never takes this lock.

use tracing::{debug, trace};

use crate::config::SessionConfig;
use crate::error::{Result, SwivelError};
use crate::slots::{BufferSlot, Direction, SlotState};

/// Session lifecycle as seen by the protocol engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Stopped,
    Priming,
    Streaming,
}

pub struct OwnershipMachine {
    lifecycle: Lifecycle,
    input: [BufferSlot; 2],
    output: [BufferSlot; 2],
    /// Index of the most recently emitted switch, `None` before the first.
    last_index: Option<usize>,
}

impl OwnershipMachine {
    pub fn new(config: &SessionConfig) -> Self {
        let in_len = config.input_slot_len();
        let out_len = config.output_slot_len();
        Self {
            lifecycle: Lifecycle::Stopped,
            input: [
                BufferSlot::new(Direction::Input, 0, in_len),
                BufferSlot::new(Direction::Input, 1, in_len),
            ],
            output: [
                BufferSlot::new(Direction::Output, 0, out_len),
                BufferSlot::new(Direction::Output, 1, out_len),
            ],
            last_index: None,
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Slot index the next switch will address.
    pub fn next_index(&self) -> usize {
        match self.last_index {
            Some(i) => 1 - i,
            None => 0,
        }
    }

    pub fn last_index(&self) -> Option<usize> {
        self.last_index
    }

    pub fn record_switch(&mut self, index: usize) {
        self.last_index = Some(index);
    }

    pub fn input(&self, index: usize) -> &BufferSlot {
        &self.input[index]
    }

    pub fn output(&self, index: usize) -> &BufferSlot {
        &self.output[index]
    }

    pub(crate) fn input_mut(&mut self, index: usize) -> &mut BufferSlot {
        &mut self.input[index]
    }

    pub(crate) fn output_mut(&mut self, index: usize) -> &mut BufferSlot {
        &mut self.output[index]
    }

    /// Claim all slots for a new session: inputs silence-filled and driver
    /// owned, outputs granted to the host, slot 1 loaded with the pre-fill.
    ///
    /// A wrong-length pre-fill is rejected before any state changes.
    pub fn prime(&mut self, primed_output_slot1: &[f32]) -> Result<()> {
        if self.lifecycle != Lifecycle::Stopped {
            return Err(SwivelError::AlreadyRunning);
        }
        let expected = self.output[1].samples().len();
        if primed_output_slot1.len() != expected {
            return Err(SwivelError::PrimingPrecondition(format!(
                "output slot 1 pre-fill holds {} samples, expected {expected}",
                primed_output_slot1.len()
            )));
        }
        for slot in &mut self.input {
            slot.hand_off(SlotState::DriverFilling);
            slot.fill_silence();
        }
        self.output[0].hand_off(SlotState::HostOwned);
        self.output[1].hand_off(SlotState::HostOwned);
        self.output[1]
            .samples_mut()
            .copy_from_slice(primed_output_slot1);
        self.last_index = None;
        self.lifecycle = Lifecycle::Priming;
        debug!("slots claimed — session priming");
        Ok(())
    }

    /// Priming finished; boundary advances now come from the driver clock.
    pub fn begin_streaming(&mut self) {
        debug_assert_eq!(self.lifecycle, Lifecycle::Priming);
        self.lifecycle = Lifecycle::Streaming;
    }

    /// The driver finished writing an input slot: `DriverFilling → HostOwned`.
    ///
    /// The driver must never call this before the hardware has finished
    /// writing — a host reading the slot afterwards sees fully-written data.
    pub fn complete_input(&mut self, index: usize) -> Result<u64> {
        let slot = checked(&mut self.input, index)?;
        expect(slot, SlotState::DriverFilling)?;
        let generation = slot.hand_off(SlotState::HostOwned);
        trace!(index, generation, "input completed — host owned");
        Ok(generation)
    }

    /// The host's callback validity for an input slot ended: the driver
    /// reclaims it for refilling. `HostOwned → DriverFilling`.
    pub fn reclaim_input(&mut self, index: usize) -> Result<u64> {
        let slot = checked(&mut self.input, index)?;
        expect(slot, SlotState::HostOwned)?;
        let generation = slot.hand_off(SlotState::DriverFilling);
        trace!(index, generation, "input reclaimed — driver filling");
        Ok(generation)
    }

    /// The driver takes an output slot for the hardware path, either because
    /// the host acknowledged it ready or because its callback validity
    /// ended. `HostOwned → DriverDraining`.
    pub fn claim_output(&mut self, index: usize) -> Result<u64> {
        let slot = checked(&mut self.output, index)?;
        expect(slot, SlotState::HostOwned)?;
        let generation = slot.hand_off(SlotState::DriverDraining);
        trace!(index, generation, "output claimed — driver draining");
        Ok(generation)
    }

    /// A drained output slot goes back to the host at a switch boundary,
    /// never out of band. `DriverDraining → HostOwned`.
    pub fn regrant_output(&mut self, index: usize) -> Result<u64> {
        let slot = checked(&mut self.output, index)?;
        expect(slot, SlotState::DriverDraining)?;
        let generation = slot.hand_off(SlotState::HostOwned);
        trace!(index, generation, "output regranted — host owned");
        Ok(generation)
    }

    /// Two-period path: the slot's contents were copied out while the host
    /// keeps ownership, so only the grant epoch advances.
    pub fn renew_output_epoch(&mut self, index: usize) -> Result<u64> {
        let slot = checked(&mut self.output, index)?;
        expect(slot, SlotState::HostOwned)?;
        let generation = slot.renew_epoch();
        trace!(index, generation, "output epoch renewed in place");
        Ok(generation)
    }

    /// Force every slot back to `Unowned` and the lifecycle to `Stopped`.
    ///
    /// Used both for an orderly `stop()` and for the deterministic abort
    /// after an ownership violation.
    pub fn stop(&mut self) {
        for slot in self.input.iter_mut().chain(self.output.iter_mut()) {
            if slot.state() != SlotState::Unowned {
                slot.hand_off(SlotState::Unowned);
            }
        }
        self.last_index = None;
        self.lifecycle = Lifecycle::Stopped;
        debug!("all slots unowned — session stopped");
    }
}

fn checked(slots: &mut [BufferSlot; 2], index: usize) -> Result<&mut BufferSlot> {
    slots
        .get_mut(index)
        .ok_or(SwivelError::InvalidSlotIndex(index))
}

fn expect(slot: &BufferSlot, expected: SlotState) -> Result<()> {
    if slot.state() == expected {
        Ok(())
    } else {
        Err(SwivelError::OwnershipViolation {
            direction: slot.direction(),
            index: slot.index(),
            expected,
            found: slot.state(),
            generation: slot.generation(),
        })
    }
}
