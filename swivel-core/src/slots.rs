//! Buffer slots: one half of a double-buffer pair for one stream direction.
//!
//! A slot is plain data — all cross-context synchronization lives in the
//! ownership machine that guards these values. The generation counter is
//! bumped on every ownership change and is what distinguishes successive
//! ownership epochs when a late acknowledgment arrives.

use serde::{Deserialize, Serialize};

/// Stream direction of a buffer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

/// Ownership state of a single buffer slot.
///
/// Exactly one party — driver, host, or nobody — holds a slot at any
/// instant; the enum makes two simultaneous holders unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    /// No session is active, or the session was force-stopped.
    Unowned,
    /// The driver is writing capture data into the slot (input only).
    DriverFilling,
    /// The driver is sending the slot's contents to the hardware path
    /// (output only).
    DriverDraining,
    /// The host holds the slot: reading input or writing output.
    HostOwned,
    /// The host signalled output-ready; the driver has not yet consumed the
    /// acknowledgment (output only, with output-ready support).
    PendingRelease,
}

impl SlotState {
    /// Which party currently holds the slot.
    pub fn holder(self) -> Holder {
        match self {
            SlotState::Unowned => Holder::Nobody,
            SlotState::DriverFilling | SlotState::DriverDraining => Holder::Driver,
            // PendingRelease is still host-held: the driver must not touch
            // the data until it consumes the acknowledgment at a boundary.
            SlotState::HostOwned | SlotState::PendingRelease => Holder::Host,
        }
    }
}

/// The party holding a slot, collapsed from [`SlotState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Holder {
    Nobody,
    Driver,
    Host,
}

/// One half of a double-buffer pair.
#[derive(Debug)]
pub struct BufferSlot {
    direction: Direction,
    index: usize,
    state: SlotState,
    generation: u64,
    samples: Vec<f32>,
}

impl BufferSlot {
    /// Create an unowned slot with zeroed storage.
    pub fn new(direction: Direction, index: usize, len: usize) -> Self {
        debug_assert!(index < 2, "double buffering is fixed at two slots");
        Self {
            direction,
            index,
            state: SlotState::Unowned,
            generation: 0,
            samples: vec![0.0; len],
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Current ownership epoch. Bumped on every ownership change.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub(crate) fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    /// Change state as an ownership handoff: bumps the generation.
    pub(crate) fn hand_off(&mut self, state: SlotState) -> u64 {
        self.state = state;
        self.generation += 1;
        self.generation
    }

    /// Bump the epoch without changing the state label. Used when an output
    /// grant is renewed in place at a switch boundary.
    pub(crate) fn renew_epoch(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Fill the slot with the neutral signal.
    pub(crate) fn fill_silence(&mut self) {
        self.samples.fill(0.0);
    }
}
