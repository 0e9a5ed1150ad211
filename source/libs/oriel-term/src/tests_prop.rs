// Copyright 2025 Oriel OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for scrollback and the active grid
//! OWNERS: @hid-team
//! NOTE: Tests only; no terminal logic. Random workloads must keep the
//!   ring invariants and never panic.
//!
//! TEST_SCOPE:
//!   - Arbitrary append/scroll/reflow sequences keep the history rings
//!     structurally valid (descriptors inside the cell ring, viewport on
//!     a live line or inactive)
//!   - Scrolling never reports more rows than requested
//!   - Random byte streams through the grid keep the cursor in range

use proptest::prelude::*;

use crate::cell::Cell;
use crate::history::History;
use crate::screen::{NullSink, Terminal};

#[derive(Clone, Debug)]
enum HistoryOp {
    Append { glyph: u8, last: bool },
    Scroll(i32),
    Reflow(usize),
}

fn arb_history_op() -> impl Strategy<Value = HistoryOp> {
    prop_oneof![
        (any::<u8>(), any::<bool>())
            .prop_map(|(glyph, last)| HistoryOp::Append { glyph, last }),
        (-6i32..6).prop_map(HistoryOp::Scroll),
        (2usize..10).prop_map(HistoryOp::Reflow),
    ]
}

fn row_of(cols: usize, glyph: u8) -> alloc::vec::Vec<Cell> {
    let mut row = alloc::vec![Cell::default(); cols];
    for cell in row.iter_mut() {
        cell.glyph = glyph as u32 + 1;
    }
    row
}

proptest! {
    #[test]
    fn history_survives_random_workloads(
        ops in proptest::collection::vec(arb_history_op(), 1..64)
    ) {
        let mut cols = 4usize;
        let mut history = History::new(cols, 8);

        for op in ops {
            match op {
                HistoryOp::Append { glyph, last } => {
                    history.append_row(&row_of(cols, glyph), last);
                }
                HistoryOp::Scroll(delta) => {
                    let scrolled = history.scroll(delta);
                    if delta >= 0 {
                        prop_assert!(scrolled <= delta);
                    } else {
                        prop_assert!(scrolled >= delta);
                    }
                }
                HistoryOp::Reflow(new_cols) => {
                    let piece = history.reflow(new_cols);
                    prop_assert!(piece.len() < new_cols);
                    cols = new_cols;
                }
            }
            history.check();
        }

        // Jumps always land on a valid viewport.
        history.scroll(i32::MIN);
        history.check();
        history.scroll(i32::MAX);
        history.check();
        prop_assert!(!history.scrollback_active());
    }

    #[test]
    fn grid_keeps_cursor_in_range(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let mut term = Terminal::new(5, 3, 8).expect("terminal");
        let mut sink = NullSink;

        for byte in bytes {
            match byte {
                b'\n' => term.put_crlf(&mut sink),
                b'\r' => term.put_cr(&mut sink),
                b'\t' => term.put_tab(&mut sink),
                0x08 => term.put_backspace(&mut sink),
                b if b.is_ascii_graphic() => term.put_glyph(b as char, 1, &mut sink),
                _ => term.put_glyph('W', 2, &mut sink),
            }

            let (col, row) = term.pos();
            prop_assert!(col < term.cols());
            prop_assert!(row < term.rows());
        }
    }
}
