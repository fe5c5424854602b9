//! atline — blocking AT-command line engine for SIMx00-class modems.
//!
//! The request/response discipline shared by line-oriented AT-style devices,
//! extracted as a reusable component: send a command terminated by CR, read
//! response lines (tolerating the CR / LF / CR-LF terminator quirks these
//! devices exhibit), match expected tokens against a deadline, and detect the
//! raw-payload prompt before streaming body bytes.
//!
//! The crate is `no_std` and fully synchronous: every wait is a polling loop
//! against a caller-supplied deadline, and the only platform requirement is a
//! duplex byte stream with a millisecond clock ([`transport::ByteTransport`]).
//! Platform binaries supply the UART and the power pins; everything here is
//! testable on any host with `cargo test`.
//!
//! Layering, leaf first:
//! - `transport`, `diag` — the byte stream / clock abstraction and the
//!   optional traffic mirror.
//! - `line` — one logical response line, bounded and deadline-checked.
//! - `engine`, `prompt` — command send, token matching, value extraction,
//!   prompt detection.
//! - `modem` — SIMx00 device helpers built on the engine (liveness, signal
//!   quality, network registration, SMS, power sequencing). Retry policy
//!   lives here, never in the engine.

#![cfg_attr(not(test), no_std)]

pub mod diag;
pub mod engine;
pub mod line;
pub mod modem;
pub mod prompt;
pub mod transport;

pub use engine::AtEngine;
pub use transport::{ByteTransport, Deadline};

/// Failure taxonomy of the engine.
///
/// The engine never panics and never retries; every operation reports one of
/// these and leaves recovery to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The deadline elapsed before the expected input appeared.
    Timeout,
    /// The device answered, but not with anything that was asked for
    /// (an explicit "ERROR" or an unrecognized line where a value was
    /// expected).
    UnexpectedToken,
    /// A value-bearing line carried no parseable number.
    MalformedValue,
}
