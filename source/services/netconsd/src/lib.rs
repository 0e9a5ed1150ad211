// Copyright 2025 Oriel OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: netconsd — remote console sessions over telnet/TCP
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! PUBLIC API: Config, run_server, Server, session::Session console ops
//! DEPENDS_ON: oriel-term (grid + VT100 codec), std::net
//! INVARIANTS: A session is destroyed only when its task finished, its
//!   socket closed and no console client is connected; transport errors
//!   poison the session and are never retried
//!
//! One TCP connection is one session: a virtual terminal with screen
//! buffer, scrollback and an input-event queue, registered in the
//! process-wide service directory so a terminal client can attach.

#![forbid(unsafe_code)]

pub mod console;
pub mod locator;
pub mod session;
pub mod task;
pub mod telnet;

mod server;

pub use server::{run_server, Config, Server};

pub const DEFAULT_PORT: u16 = 2223;

/// Errors surfaced by the service layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// Named object does not exist.
    NoEntry,
    /// Operation not supported in the current mode.
    NotSupported,
    /// Duplicate registration.
    AlreadyExists,
    /// The resource is already mapped/held.
    Busy,
    /// Reply does not fit the supplied buffer.
    Overflow,
    /// Transport failure; the session is unusable.
    Io,
    /// The session is shutting down.
    Closed,
    /// Allocation or resource exhaustion.
    NoMemory,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let text = match self {
            Error::NoEntry => "no such entry",
            Error::NotSupported => "not supported",
            Error::AlreadyExists => "already exists",
            Error::Busy => "busy",
            Error::Overflow => "buffer too small",
            Error::Io => "transport failure",
            Error::Closed => "session closed",
            Error::NoMemory => "out of memory",
        };
        f.write_str(text)
    }
}

impl std::error::Error for Error {}
