//! Session configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SwivelError};

/// How long a granted buffer remains valid to the host.
///
/// The double-buffer contract admits more than one defensible reading of
/// "how long may the host keep writing a granted buffer"; this engine makes
/// the choice explicit instead of hard-coding one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidityModel {
    /// A grant stays valid through the *next* switch callback, not just the
    /// one that delivered it. Default. The output-ready acknowledgment is
    /// the escape hatch that ends validity early.
    Extended,
    /// A grant ends the moment its own callback returns. Use for strict
    /// DMA-style hardware that reclaims buffers at the callback boundary.
    CallbackOnly,
}

/// What `emit` does when the previous switch dispatch has not returned yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrunPolicy {
    /// Block the emitter until the in-flight dispatch returns (the
    /// single-threaded callback convention). Waits beyond the period budget
    /// are reported as overruns, never escalated to a crash. Default.
    Block,
    /// Drop the dispatch and count an overrun; the period is a glitch.
    Flag,
}

/// Opaque sample-format tag. The engine never interprets it; it is carried
/// for the hardware-facing collaborators that do format conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SampleFormatTag(pub u32);

/// Configuration for a [`StreamSession`](crate::session::StreamSession).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Frames per buffer slot (one period). Default: 512.
    pub frames_per_buffer: usize,
    /// Channels per input slot. Default: 2.
    pub input_channels: usize,
    /// Channels per output slot. Default: 2.
    pub output_channels: usize,
    /// Sample rate in Hz, used only for period-duration math when
    /// classifying callback overruns. Default: 48000.
    pub sample_rate: u32,
    /// Opaque sample-format tag, forwarded untouched.
    pub sample_format: SampleFormatTag,
    /// Buffer-validity interpretation. Default: [`ValidityModel::Extended`].
    pub validity: ValidityModel,
    /// Emit behaviour on an in-flight dispatch. Default: [`OverrunPolicy::Block`].
    pub overrun_policy: OverrunPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frames_per_buffer: 512,
            input_channels: 2,
            output_channels: 2,
            sample_rate: 48_000,
            sample_format: SampleFormatTag::default(),
            validity: ValidityModel::Extended,
            overrun_policy: OverrunPolicy::Block,
        }
    }
}

impl SessionConfig {
    /// Validate the configuration before a session is created.
    pub fn validate(&self) -> Result<()> {
        if self.frames_per_buffer == 0 {
            return Err(SwivelError::InvalidConfig(
                "frames_per_buffer must be non-zero".into(),
            ));
        }
        if self.input_channels == 0 && self.output_channels == 0 {
            return Err(SwivelError::InvalidConfig(
                "at least one direction must have channels".into(),
            ));
        }
        if self.sample_rate == 0 {
            return Err(SwivelError::InvalidConfig(
                "sample_rate must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Samples per input slot.
    pub fn input_slot_len(&self) -> usize {
        self.frames_per_buffer * self.input_channels
    }

    /// Samples per output slot.
    pub fn output_slot_len(&self) -> usize {
        self.frames_per_buffer * self.output_channels
    }
}
