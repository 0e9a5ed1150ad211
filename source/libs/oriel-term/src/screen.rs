// Copyright 2025 Oriel OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Active terminal screen — circular row grid over the scrollback
//! OWNERS: @hid-team
//! PUBLIC API: Terminal, TermSink, NullSink, TermError
//! INVARIANTS: row < rows; first_row < rows; used_rows <= rows; a row's
//!   overflow flag links it to the next row as one logical line
//!
//! Mutating calls take the output sink as a parameter; the terminal never
//! stores callbacks. Sinks must not call back into the terminal: a
//! refresh request is recorded by the sink and handled after the call
//! returns.

use alloc::vec;
use alloc::vec::Vec;

use crate::cell::Cell;
use crate::history::History;

/// Error returned by terminal construction and resize.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TermError {
    /// Dimensions outside the supported range (cols >= 2, rows >= 1,
    /// cols * rows within address range).
    Range,
}

/// Receiver of screen output.
///
/// `row` coordinates are viewport rows: scrollback rows shown above the
/// active screen shift active content down.
pub trait TermSink {
    /// `cells` replace the viewport cells starting at (col, row).
    fn update(&mut self, col: usize, row: usize, cells: &[Cell]);
    /// The viewport content moved by `delta` rows (positive: up, i.e.
    /// new content appeared at the bottom). `i32::MIN`/`i32::MAX` are
    /// jump-to-top/bottom.
    fn scroll(&mut self, delta: i32);
    /// Everything changed; the owner should repaint from scratch (after
    /// this call returns).
    fn refresh(&mut self);
}

/// Sink that ignores everything; used during internal replay.
pub struct NullSink;

impl TermSink for NullSink {
    fn update(&mut self, _col: usize, _row: usize, _cells: &[Cell]) {}
    fn scroll(&mut self, _delta: i32) {}
    fn refresh(&mut self) {}
}

/// Cell grid with cursor, per-row overflow linkage and scrollback.
pub struct Terminal {
    cols: usize,
    rows: usize,

    col: usize,
    row: usize,

    cursor_visible: bool,

    /// How much of the screen is in use. Relevant for clearing.
    used_rows: usize,

    /// Grid index of the first screen row in the circular buffer.
    first_row: usize,
    /// cols * rows circular buffer of the current screen contents. Not
    /// necessarily what is visible when scrollback is active.
    screen: Vec<Cell>,
    /// Row overflowed into the next one (both form one logical line).
    overflow_flags: Vec<bool>,

    /// Removes the extra newline when CRLF lands exactly on a row
    /// boundary.
    overflow: bool,

    history: History,

    style: Cell,
    default_cell: Cell,
}

impl Terminal {
    pub fn new(cols: usize, rows: usize, history_lines: usize) -> Result<Self, TermError> {
        if cols < 2 || rows < 1 || usize::MAX / cols < rows {
            return Err(TermError::Range);
        }

        Ok(Self {
            cols,
            rows,
            col: 0,
            row: 0,
            cursor_visible: false,
            used_rows: 0,
            first_row: 0,
            screen: vec![Cell::default(); cols * rows],
            overflow_flags: vec![false; rows],
            overflow: false,
            history: History::new(cols, history_lines),
            style: Cell::default(),
            default_cell: Cell::default(),
        })
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Cursor position as (col, row).
    pub fn pos(&self) -> (usize, usize) {
        (self.col, self.row)
    }

    /// Current cell style used by subsequent writes.
    pub fn set_style(&mut self, style: Cell) {
        self.style = style;
    }

    pub fn style(&self) -> Cell {
        self.style
    }

    pub fn cursor_visible(&self) -> bool {
        self.cursor_visible
    }

    pub fn scrollback_active(&self) -> bool {
        self.history.scrollback_active()
    }

    fn real_row(&self, row: usize) -> usize {
        let row = row + self.first_row;
        if row >= self.rows {
            row - self.rows
        } else {
            row
        }
    }

    fn cell_index(&self, col: usize, row: usize) -> usize {
        self.real_row(row) * self.cols + col
    }

    fn cell(&self, col: usize, row: usize) -> Cell {
        self.screen[self.cell_index(col, row)]
    }

    fn cell_mut(&mut self, col: usize, row: usize) -> &mut Cell {
        let index = self.cell_index(col, row);
        &mut self.screen[index]
    }

    /// Active-screen row as a slice (primary buffer, unaffected by
    /// viewport shifting).
    pub fn active_row(&self, row: usize) -> &[Cell] {
        debug_assert!(row < self.rows);
        let start = self.real_row(row) * self.cols;
        &self.screen[start..start + self.cols]
    }

    /// Sends an update for `len` active cells if they are visible.
    fn update_active_cells(
        &self,
        col: usize,
        row: usize,
        len: usize,
        sink: &mut dyn TermSink,
    ) {
        let viewport_rows = self.history.viewport_rows(self.rows);
        let active_rows_shown = self.rows - viewport_rows;

        if active_rows_shown > row {
            let start = self.cell_index(col, row);
            sink.update(col, row + viewport_rows, &self.screen[start..start + len]);
        }
    }

    fn update_current_cell(&self, sink: &mut dyn TermSink) {
        self.update_active_cells(self.col, self.row, 1, sink);
    }

    fn cursor_off(&mut self, sink: &mut dyn TermSink) {
        if self.cursor_visible {
            self.cell_mut(self.col, self.row).cursor = false;
            self.update_current_cell(sink);
        }
    }

    fn cursor_on(&mut self, sink: &mut dyn TermSink) {
        if self.cursor_visible {
            self.cell_mut(self.col, self.row).cursor = true;
            self.update_current_cell(sink);
        }
    }

    /// Moves the top screen row into history and clears it.
    fn evict_row(&mut self) {
        if self.used_rows == 0 {
            return;
        }

        let last = !self.overflow_flags[self.real_row(0)];

        for col in 0..self.cols {
            self.cell_mut(col, 0).cursor = false;
        }

        let start = self.real_row(0) * self.cols;
        self.history
            .append_row(&self.screen[start..start + self.cols], last);

        let real = self.real_row(0);
        self.overflow_flags[real] = false;
        for col in 0..self.cols {
            *self.cell_mut(col, 0) = self.default_cell;
        }

        self.used_rows -= 1;

        if self.row == 0 {
            self.col = 0;
        } else {
            self.row -= 1;
        }

        self.first_row += 1;
        if self.first_row >= self.rows {
            self.first_row -= self.rows;
        }

        debug_assert!(self.first_row < self.rows);
    }

    fn advance_line(&mut self, sink: &mut dyn TermSink) {
        if self.row + 1 >= self.rows {
            let old_top = self.history.viewport_top;

            self.evict_row();

            if old_top != self.history.viewport_top {
                sink.refresh();
            }

            if !self.history.scrollback_active() {
                sink.scroll(1);
            }
        }

        if self.rows > 1 {
            self.row += 1;
        }

        if self.row >= self.used_rows {
            self.used_rows = self.row + 1;
        }

        debug_assert!(self.row < self.rows);
    }

    pub fn put_lf(&mut self, sink: &mut dyn TermSink) {
        self.cursor_off(sink);
        self.overflow = false;
        self.advance_line(sink);
        self.cursor_on(sink);
    }

    pub fn put_cr(&mut self, sink: &mut dyn TermSink) {
        self.cursor_off(sink);

        // CR right after overflow from the previous row.
        if self.overflow && self.row > 0 {
            self.row -= 1;
            let real = self.real_row(self.row);
            self.overflow_flags[real] = false;
        }

        self.overflow = false;
        self.col = 0;

        self.cursor_on(sink);
    }

    /// Combined CR & LF to cut down on cursor update traffic.
    pub fn put_crlf(&mut self, sink: &mut dyn TermSink) {
        self.cursor_off(sink);

        if self.overflow && self.row > 0 {
            self.row -= 1;
            let real = self.real_row(self.row);
            self.overflow_flags[real] = false;
        }

        self.overflow = false;
        self.advance_line(sink);
        self.col = 0;

        self.cursor_on(sink);
    }

    pub fn put_tab(&mut self, sink: &mut dyn TermSink) {
        self.cursor_off(sink);

        self.overflow = false;

        let new_col = (self.col / 8 + 1) * 8;
        self.col = new_col.min(self.cols - 1);

        self.cursor_on(sink);
    }

    pub fn put_backspace(&mut self, sink: &mut dyn TermSink) {
        self.cursor_off(sink);

        self.overflow = false;

        if self.col == 0 {
            // Pull the cursor back across an overflowed row boundary.
            if self.row > 0 && self.overflow_flags[self.real_row(self.row - 1)] {
                self.row -= 1;
                self.col = self.cols - 1;
                let real = self.real_row(self.row);
                self.overflow_flags[real] = false;
            }
        } else {
            self.col -= 1;
        }

        self.cursor_on(sink);
    }

    /// Puts a glyph of `width` columns at the cursor and advances it,
    /// overflowing into the next row and scrolling as needed.
    ///
    /// A wide glyph that would be split by the end of the row is deferred
    /// to the next row; the leftover cells are filled with padding cells,
    /// as are the `width - 1` cells following the glyph.
    pub fn put_glyph(&mut self, glyph: char, width: usize, sink: &mut dyn TermSink) {
        debug_assert!(width >= 1);

        if self.row >= self.used_rows {
            self.used_rows = self.row + 1;
        }

        let mut padding_cell = self.style;
        padding_cell.padding = true;
        let mut cell = self.style;
        cell.glyph = glyph as u32;

        if self.col + width > self.cols {
            // Have to go to the next row first.
            let blanks = self.cols - self.col;
            for i in 0..blanks {
                let col = self.col + i;
                *self.cell_mut(col, self.row) = padding_cell;
            }

            self.update_active_cells(self.col, self.row, blanks, sink);

            let real = self.real_row(self.row);
            self.overflow_flags[real] = true;
            self.advance_line(sink);
            self.col = 0;
        }

        *self.cell_mut(self.col, self.row) = cell;
        self.col += 1;

        for _ in 1..width {
            *self.cell_mut(self.col, self.row) = padding_cell;
            self.col += 1;
        }

        if self.col < self.cols {
            // The changed cells are all adjacent.
            if self.cursor_visible {
                self.cell_mut(self.col, self.row).cursor = true;
            }
            self.update_active_cells(self.col - width, self.row, width + 1, sink);
            self.overflow = false;
        } else {
            // Update the written cells, then the cursor on the next row.
            self.update_active_cells(self.col - width, self.row, width, sink);

            let real = self.real_row(self.row);
            self.overflow_flags[real] = true;
            self.advance_line(sink);
            self.col = 0;
            self.overflow = true;

            self.cursor_on(sink);
        }
    }

    /// Clamps and moves the cursor.
    pub fn set_pos(&mut self, col: usize, row: usize, sink: &mut dyn TermSink) {
        let col = col.min(self.cols - 1);
        let row = row.min(self.rows - 1);

        self.cursor_off(sink);

        self.col = col;
        self.row = row;

        self.cursor_on(sink);
    }

    /// Clears the screen by scrolling all live text into history.
    /// Sets the position to (0, 0).
    pub fn clear_screen(&mut self, sink: &mut dyn TermSink) {
        self.cursor_off(sink);
        self.put_crlf(sink);

        let unused_rows = self.rows - self.used_rows;

        while self.used_rows > 0 {
            self.evict_row();
        }

        // Clear out potential garbage left by direct screen access.
        for row in 0..unused_rows {
            for col in 0..self.cols {
                *self.cell_mut(col, row) = self.default_cell;
            }
        }

        self.row = 0;
        self.col = 0;

        self.cursor_on(sink);

        sink.refresh();
    }

    /// Erases all text starting at `first_row` without recording it in
    /// history. A cursor inside the erased section moves to its start.
    pub fn wipe_screen(&mut self, first_row: usize, sink: &mut dyn TermSink) {
        if first_row >= self.rows {
            return;
        }

        for row in first_row..self.rows {
            for col in 0..self.cols {
                *self.cell_mut(col, row) = self.default_cell;
            }
            let real = self.real_row(row);
            self.overflow_flags[real] = false;
            self.update_active_cells(0, row, self.cols, sink);
        }

        if self.used_rows > first_row {
            self.used_rows = first_row;
        }

        if self.row >= first_row {
            self.row = first_row;
            self.col = 0;
            self.cursor_on(sink);
        }
    }

    pub fn set_cursor_visibility(&mut self, visible: bool, sink: &mut dyn TermSink) {
        if self.cursor_visible == visible {
            return;
        }

        self.cursor_visible = visible;

        self.cell_mut(self.col, self.row).cursor = visible;
        self.update_current_cell(sink);
    }

    /// Scrolls the viewport; negative delta moves toward older rows.
    /// The sink is told the distance actually scrolled.
    pub fn history_scroll(&mut self, delta: i32, sink: &mut dyn TermSink) {
        let scrolled = self.history.scroll(delta);

        if scrolled != 0 {
            sink.scroll(scrolled);
        }
    }

    /// Sends update callbacks for the viewport rows `[first_row,
    /// first_row + rows)`, scrollback and active parts alike.
    pub fn force_viewport_update(
        &self,
        first_row: usize,
        rows: usize,
        sink: &mut dyn TermSink,
    ) {
        debug_assert!(first_row + rows <= self.rows);

        let sb_rows = self.history.viewport_rows(self.rows);
        let updated = self
            .history
            .iter_rows(first_row, rows, &mut |col, row, cells| {
                sink.update(col, row, cells)
            });

        let first_row = first_row + updated;
        let rows = rows - updated;

        debug_assert!(sb_rows <= first_row || rows == 0);

        for row in first_row..first_row + rows {
            let start = self.cell_index(0, row - sb_rows);
            sink.update(0, row, &self.screen[start..start + self.cols]);
        }
    }

    /// Replays cells into the grid; used by resize.
    fn put_cells(&mut self, cells: &[Cell], sink: &mut dyn TermSink) {
        for &cell in cells {
            *self.cell_mut(self.col, self.row) = cell;
            self.col += 1;

            if self.col == self.cols {
                let real = self.real_row(self.row);
                self.overflow_flags[real] = true;
                self.advance_line(sink);
                self.col = 0;
                self.overflow = true;
            } else {
                self.overflow = false;
            }
        }

        if self.row >= self.used_rows {
            self.used_rows = self.row + 1;
        }
    }

    /// Resizes the active screen and the scrollback depth, reflowing
    /// history and replaying the old screen contents.
    pub fn resize(
        &mut self,
        cols: usize,
        rows: usize,
        history_lines: usize,
        sink: &mut dyn TermSink,
    ) -> Result<(), TermError> {
        if cols < 2 || rows < 1 || usize::MAX / cols < rows {
            return Err(TermError::Range);
        }

        let old_cols = self.cols;
        let old_rows = self.rows;
        let old_first = self.first_row;
        let old_used = self.used_rows;
        let old_col = self.col;
        let old_row = self.row;

        let mut old_screen =
            core::mem::replace(&mut self.screen, vec![Cell::default(); cols * rows]);
        let old_flags =
            core::mem::replace(&mut self.overflow_flags, vec![false; rows]);

        self.cols = cols;
        self.rows = rows;
        self.row = 0;
        self.col = 0;
        self.used_rows = 0;
        self.first_row = 0;
        self.overflow = false;

        let cursor_visible = self.cursor_visible;
        self.cursor_visible = false;

        self.history.set_limits(cols, history_lines);

        // Replay without emitting updates; one refresh at the end.
        let mut quiet = NullSink;

        let recouped = self.history.reflow(cols);
        if !recouped.is_empty() {
            // Piece of an incomplete scrollback line returns to the
            // active screen.
            self.put_cells(&recouped, &mut quiet);
        }

        let old_real = |row: usize| {
            let row = row + old_first;
            if row >= old_rows {
                row - old_rows
            } else {
                row
            }
        };

        // Mark the cursor position so the replay can find it again.
        old_screen[old_real(old_row) * old_cols + old_col].cursor = true;

        for row in 0..old_used {
            let offset = old_real(row) * old_cols;
            let row_cells = &old_screen[offset..offset + old_cols];

            if old_flags[old_real(row)] {
                let row_cells: Vec<Cell> = row_cells.to_vec();
                self.put_cells(&row_cells, &mut quiet);
            } else {
                // Trim trailing blanks.
                let mut len = old_cols;
                while len > 0 && row_cells[len - 1].is_empty() {
                    len -= 1;
                }

                let row_cells: Vec<Cell> = row_cells[..len].to_vec();
                self.put_cells(&row_cells, &mut quiet);

                // The cursor may sit on the first trimmed blank.
                if len < old_cols && old_screen[offset + len].cursor {
                    self.cell_mut(self.col, self.row).cursor = true;
                }

                if row < old_used - 1 {
                    self.put_crlf(&mut quiet);
                }
            }
        }

        // Find the marked cursor in the replayed screen.
        let mut new_col = 0;
        let mut new_row = 0;
        for col in 0..self.cols {
            for row in 0..self.rows {
                if self.cell(col, row).cursor {
                    self.cell_mut(col, row).cursor = false;
                    new_col = col;
                    new_row = row;
                }
            }
        }

        self.col = new_col;
        self.row = new_row;

        self.cursor_visible = cursor_visible;
        self.cursor_on(&mut quiet);

        sink.refresh();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink capturing the glyphs written to the viewport.
    #[derive(Default)]
    struct Capture {
        updates: Vec<(usize, usize, Vec<u32>)>,
        scrolls: Vec<i32>,
        refreshes: usize,
    }

    impl TermSink for Capture {
        fn update(&mut self, col: usize, row: usize, cells: &[Cell]) {
            self.updates
                .push((col, row, cells.iter().map(|c| c.glyph).collect()));
        }
        fn scroll(&mut self, delta: i32) {
            self.scrolls.push(delta);
        }
        fn refresh(&mut self) {
            self.refreshes += 1;
        }
    }

    fn write_str(term: &mut Terminal, text: &str, sink: &mut dyn TermSink) {
        for ch in text.chars() {
            match ch {
                '\n' => term.put_crlf(sink),
                _ => term.put_glyph(ch, 1, sink),
            }
        }
    }

    fn row_text(term: &Terminal, row: usize) -> String {
        term.active_row(row)
            .iter()
            .map(|c| c.glyph_char().unwrap_or(' '))
            .collect::<String>()
            .trim_end()
            .into()
    }

    #[test]
    fn glyphs_advance_the_cursor() {
        let mut term = Terminal::new(8, 2, 16).unwrap();
        let mut sink = Capture::default();

        write_str(&mut term, "hi", &mut sink);
        assert_eq!(term.pos(), (2, 0));
        assert_eq!(row_text(&term, 0), "hi");
    }

    #[test]
    fn wrap_sets_overflow_and_joins_rows() {
        let mut term = Terminal::new(4, 3, 16).unwrap();
        let mut sink = Capture::default();

        write_str(&mut term, "abcdef", &mut sink);
        assert_eq!(row_text(&term, 0), "abcd");
        assert_eq!(row_text(&term, 1), "ef");
        assert_eq!(term.pos(), (2, 1));
    }

    #[test]
    fn eviction_scrolls_and_preserves_content_order() {
        let mut term = Terminal::new(4, 2, 16).unwrap();
        let mut sink = Capture::default();

        write_str(&mut term, "aa\nbb\ncc", &mut sink);
        // Two rows visible, the first one went to scrollback.
        assert_eq!(row_text(&term, 0), "bb");
        assert_eq!(row_text(&term, 1), "cc");
        assert_eq!(sink.scrolls, [1]);

        term.history_scroll(-1, &mut sink);
        assert!(term.scrollback_active());
        term.history_scroll(1, &mut sink);
        assert!(!term.scrollback_active());
    }

    #[test]
    fn wide_glyph_defers_to_next_row() {
        let mut term = Terminal::new(4, 2, 16).unwrap();
        let mut sink = Capture::default();

        write_str(&mut term, "abc", &mut sink);
        term.put_glyph('宽', 2, &mut sink);

        // Column 3 of row 0 is padding, the glyph begins row 1.
        assert!(term.active_row(0)[3].padding);
        assert_eq!(term.active_row(1)[0].glyph, '宽' as u32);
        assert!(term.active_row(1)[1].padding);
        assert_eq!(term.pos(), (2, 1));
    }

    #[test]
    fn crlf_on_row_boundary_is_not_doubled() {
        let mut term = Terminal::new(4, 4, 16).unwrap();
        let mut sink = Capture::default();

        // Exactly fills row 0, leaving the overflow marker set.
        write_str(&mut term, "abcd", &mut sink);
        assert_eq!(term.pos(), (0, 1));

        write_str(&mut term, "\n", &mut sink);
        write_str(&mut term, "e", &mut sink);
        // The newline right after the wrap must not produce an empty row.
        assert_eq!(row_text(&term, 1), "e");
    }

    #[test]
    fn backspace_crosses_overflowed_boundary() {
        let mut term = Terminal::new(4, 2, 16).unwrap();
        let mut sink = Capture::default();

        write_str(&mut term, "abcde", &mut sink);
        assert_eq!(term.pos(), (1, 1));
        term.put_backspace(&mut sink);
        assert_eq!(term.pos(), (0, 1));
        term.put_backspace(&mut sink);
        // Crossed back onto the overflowed row.
        assert_eq!(term.pos(), (3, 0));
    }

    #[test]
    fn tab_stops_every_eight_columns() {
        let mut term = Terminal::new(20, 1, 16).unwrap();
        let mut sink = Capture::default();

        term.put_tab(&mut sink);
        assert_eq!(term.pos(), (8, 0));
        write_str(&mut term, "x", &mut sink);
        term.put_tab(&mut sink);
        assert_eq!(term.pos(), (16, 0));
        term.put_tab(&mut sink);
        assert_eq!(term.pos(), (19, 0));
    }

    #[test]
    fn clear_screen_moves_text_to_history() {
        let mut term = Terminal::new(4, 3, 16).unwrap();
        let mut sink = Capture::default();

        write_str(&mut term, "aa\nbb", &mut sink);
        term.clear_screen(&mut sink);

        assert_eq!(term.pos(), (0, 0));
        assert_eq!(row_text(&term, 0), "");
        assert!(sink.refreshes >= 1);

        // The cleared text is reachable via scrollback.
        term.history_scroll(-2, &mut sink);
        assert!(term.scrollback_active());
    }

    #[test]
    fn wipe_screen_discards_without_history() {
        let mut term = Terminal::new(4, 3, 16).unwrap();
        let mut sink = Capture::default();

        write_str(&mut term, "aa\nbb\ncc", &mut sink);
        term.wipe_screen(1, &mut sink);

        assert_eq!(row_text(&term, 0), "aa");
        assert_eq!(row_text(&term, 1), "");
        assert_eq!(row_text(&term, 2), "");
        // The cursor was inside the wiped section.
        assert_eq!(term.pos(), (0, 1));
        // Wiped text is not in scrollback: only the initial eviction, if
        // any, is reachable.
        term.history_scroll(-10, &mut sink);
        assert!(!term.scrollback_active());
    }

    #[test]
    fn set_pos_clamps_into_range() {
        let mut term = Terminal::new(4, 2, 16).unwrap();
        let mut sink = Capture::default();

        term.set_pos(100, 100, &mut sink);
        assert_eq!(term.pos(), (3, 1));
        term.set_pos(0, 0, &mut sink);
        assert_eq!(term.pos(), (0, 0));
    }

    #[test]
    fn cursor_flag_follows_visibility() {
        let mut term = Terminal::new(4, 2, 16).unwrap();
        let mut sink = Capture::default();

        term.set_cursor_visibility(true, &mut sink);
        assert!(term.active_row(0)[0].cursor);

        write_str(&mut term, "a", &mut sink);
        assert!(term.active_row(0)[1].cursor);
        assert!(!term.active_row(0)[0].cursor);

        term.set_cursor_visibility(false, &mut sink);
        assert!(!term.active_row(0)[1].cursor);
    }

    #[test]
    fn resize_replays_content_and_keeps_cursor() {
        let mut term = Terminal::new(8, 4, 16).unwrap();
        let mut sink = Capture::default();

        write_str(&mut term, "hello\nworld", &mut sink);
        assert_eq!(term.pos(), (5, 1));

        term.resize(6, 3, 16, &mut sink).unwrap();

        assert_eq!(term.cols(), 6);
        assert_eq!(term.rows(), 3);
        assert_eq!(row_text(&term, 0), "hello");
        assert_eq!(row_text(&term, 1), "world");
        assert_eq!(term.pos(), (5, 1));
        assert!(sink.refreshes >= 1);
    }

    #[test]
    fn resize_reflows_long_rows() {
        let mut term = Terminal::new(8, 2, 16).unwrap();
        let mut sink = Capture::default();

        write_str(&mut term, "abcdefgh", &mut sink);
        term.resize(4, 2, 16, &mut sink).unwrap();

        // The 8-cell logical line now spans two 4-cell rows; the older
        // half may live in scrollback.
        let visible: String = (0..term.rows())
            .map(|r| row_text(&term, r))
            .collect::<Vec<_>>()
            .join("");
        assert!("abcdefgh".ends_with(&visible.replace(' ', "")));
    }

    #[test]
    fn resize_rejects_degenerate_sizes() {
        let mut term = Terminal::new(8, 2, 16).unwrap();
        let mut sink = Capture::default();
        assert_eq!(term.resize(1, 2, 16, &mut sink), Err(TermError::Range));
        assert_eq!(term.resize(4, 0, 16, &mut sink), Err(TermError::Range));
        assert_eq!(Terminal::new(1, 1, 0).err(), Some(TermError::Range));
    }

    #[test]
    fn viewport_updates_cover_scrollback_and_active_rows() {
        let mut term = Terminal::new(4, 2, 16).unwrap();
        let mut sink = Capture::default();

        write_str(&mut term, "aa\nbb\ncc", &mut sink);
        term.history_scroll(-1, &mut sink);

        let mut capture = Capture::default();
        term.force_viewport_update(0, 2, &mut capture);

        // Row 0 comes from scrollback, row 1 is the active screen.
        assert!(capture.updates.iter().any(|(_, row, _)| *row == 0));
        assert!(capture.updates.iter().any(|(_, row, _)| *row == 1));
    }
}
