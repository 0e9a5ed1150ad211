// Copyright 2025 Oriel OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Terminal grid with scrollback and the VT100 byte codec
//! OWNERS: @hid-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! PUBLIC API: Terminal, TermSink, Cell, Color, history scrolling, vt100
//! INVARIANTS: Every history line descriptor stays inside the cell ring;
//!   the viewport top is a live line or "inactive"; sinks never re-enter
//!   the terminal during a callback
//!
//! The active screen is a circular row buffer; rows scrolled off the top
//! are appended to a two-ring scrollback (cells + line descriptors). The
//! `vt100` module turns cell updates into escape sequences and decodes
//! client input bytes into key and mouse events. The library renders to
//! a [`TermSink`] passed into each mutating call, so the embedding server
//! owns all buffering and I/O.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod cell;
mod history;
mod screen;
pub mod vt100;

#[cfg(test)]
mod tests_prop;

pub use cell::{Cell, CellAttrs, Color};
pub use screen::{NullSink, TermError, TermSink, Terminal};

/// Scroll delta that jumps straight to the oldest scrollback line.
pub const SCROLL_TO_TOP: i32 = i32::MIN;
/// Scroll delta that jumps back to the live screen.
pub const SCROLL_TO_BOTTOM: i32 = i32::MAX;
