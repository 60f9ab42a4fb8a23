//! # ASD JTAG
//!
//! JTAG Test Access Port (TAP) control and scan-chain shifting for remote
//! at-scale debug of a managed server's processors.
//!
//! ## Overview
//!
//! A debug session asks for abstract operations such as "shift 32 bits through
//! the data register and go to Run-Test/Idle". This crate turns those requests
//! into the exact TAP transitions, scan-chain padding and chunked transfers a
//! hardware backend has to perform.
//!
//! ## Architecture
//!
//! - **[`tap`]**: the 16-state IEEE 1149.1 TAP model and a fixed table of
//!   minimal TMS sequences between any two states
//! - **[`chain`]**: per-chain bookkeeping (TAP state, scan phase, padding)
//! - **[`Transport`] Trait**: the primitives a backend must provide
//!   (initialize, set TAP state, shift, wait cycles)
//! - **[`Handler`]**: owns the chains and the transport; drives TAP
//!   transitions and the shift engine
//!
//! Backends for the Linux JTAG drivers and the relayed management-bus
//! transport live in the `asd-jtag-linux` crate.
//!
//! ## Basic Usage
//!
//! ```ignore
//! use asd_jtag::{Builder, TapState};
//!
//! let mut handler = Builder::new().build(my_transport)?;
//! handler.initialize(false)?;
//! handler.set_tap_state(TapState::ShiftDR)?;
//!
//! let mut idcode = [0u8; 4];
//! handler.shift(32, None, Some(&mut idcode), TapState::RunTestIdle)?;
//! ```
//!
//! ## Error Handling
//!
//! Every operation returns [`error::Result`]. Parameters are validated before
//! any hardware I/O. A transport failure in the middle of a transition or a
//! shift leaves the real TAP state unknown; the handler then refuses further
//! hardware operations with [`error::JtagError::Desynchronized`] until it is
//! deinitialized and initialized again.
//!
//! ## Logging
//!
//! This crate uses the `log` crate. Transport failures are logged at error
//! level together with the failing primitive, lifecycle events at info level,
//! each primitive at debug level and buffer contents at trace level.
//!
//! ## Thread Model
//!
//! Everything is synchronous; exactly one primitive is in flight at a time.
//! A [`Handler`] is not internally synchronized and must be owned by one
//! debug connection, or wrapped in a lock.
pub mod bits;
pub mod chain;
pub mod error;
mod handler;
mod shift;
pub mod tap;
pub mod transport;

#[cfg(test)]
mod mock;

pub use chain::{PaddingKind, ScanChain, ScanPhase};
pub use error::{JtagError, TransportError};
pub use handler::{Builder, Config, Handler};
pub use tap::{Register, TapState};
pub use transport::{ShiftMode, ShiftRequest, TapTransition, Transport};
