//! # ASD JTAG for Linux BMCs
//!
//! Concrete [`asd_jtag::Transport`] implementations for a Linux baseboard
//! management controller, plus the `asd-jtagd` diagnostic binary.
//!
//! ## Backends
//!
//! - **[`backends::kernel_driver`]**: the Linux JTAG subsystem (`/dev/jtagN`).
//!   Supports hardware shifts with padding fused into the transfer.
//! - **[`backends::legacy`]**: the out-of-tree ASPEED driver (`/dev/jtag`)
//! - **[`backends::remote`]**: a JTAG master on a companion controller,
//!   reached through the IPMB relay daemon ([`bus`])
//!
//! ## Shutdown
//!
//! [`signals::TerminationSignals`] hooks SIGINT and SIGTERM so the binary
//! can release the JTAG master before exiting.
pub mod backends;
pub mod bus;
pub mod signals;
