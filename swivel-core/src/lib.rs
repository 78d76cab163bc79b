//! Swivel — buffer-ownership handoff engine for double-buffered audio I/O.
//!
//! Two half-buffers per direction swap roles at every period boundary; this
//! crate tracks who owns which half, runs the switch notifications, and
//! keeps both parties honest about it.
//!
//! ```text
//!             ┌──────────────┐  complete_period   ┌───────────────────┐
//!  driver ───►│  DriverPort  ├───────────────────►│ OwnershipMachine  │
//!             └──────────────┘                    │  in[0] in[1]      │
//!                                                 │  out[0] out[1]    │
//!             ┌──────────────┐   SwitchEvent      └─────────┬─────────┘
//!  host   ◄───┤ Notification │◄────────────────────────────┘
//!             │   Channel    │   signal_output_ready
//!             └──────────────┘─────────────────────► drained at boundary
//! ```
//!
//! The host registers a switch handler, optionally advertises output-ready
//! support, and calls [`StreamSession::start`] with a pre-filled output
//! buffer. The driver clock then calls
//! [`DriverPort::complete_period`] once per period. Every handoff bumps the
//! slot's generation counter; acting on a slot you do not own is an
//! [`SwivelError::OwnershipViolation`] and force-stops the session.
//!
//! Without output-ready acknowledgments the output path is two periods deep;
//! with them it is one. [`query_latency`](StreamSession::query_latency)
//! reports the figure in force.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod events;
pub mod latency;
pub mod machine;
pub mod notify;
mod priming;
pub mod session;
pub mod slots;

pub use config::{OverrunPolicy, SampleFormatTag, SessionConfig, ValidityModel};
pub use error::{Result, SwivelError};
pub use events::{
    FaultKind, ProtocolFaultEvent, SessionStatus, SessionStatusEvent, SwitchEvent,
};
pub use latency::LatencyReport;
pub use notify::{NotificationChannel, SubscriptionHandle};
pub use session::{
    DiagnosticsSnapshot, DriverPort, NullSink, OutputSink, SessionDiagnostics, StreamSession,
};
pub use slots::{BufferSlot, Direction, SlotState};
