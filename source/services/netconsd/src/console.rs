// Copyright 2025 Oriel OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Console operations a terminal client performs on a session
//! OWNERS: @runtime
//! PUBLIC API: write/set_pos/get_size/styles/caption/map/update and the
//!   capability report
//! INVARIANTS: Without the control capability the session behaves as a
//!   100x1 dumb terminal: no cursor moves, no attributes, no clearing,
//!   and `map` reports NotSupported; every operation here takes only the
//!   send lock, so output flows while clients wait for input
//!
//! In control mode, written bytes drive the terminal grid; the grid's
//! update callbacks are encoded as VT100 sequences into the session's
//! output buffer and flushed as one segment per call.

use bitflags::bitflags;

use oriel_term::vt100::{Attrs, Style};
use oriel_term::{Cell, CellAttrs, Color, NullSink};

use crate::session::{glyph_width, ByteOut, MapBuffer, RenderSink, SendHalf, Session};
use crate::session::{DUMB_COLS, DUMB_ROWS};
use crate::Error;

bitflags! {
    /// Capabilities advertised to the terminal client.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ConsoleCaps: u32 {
        const CURSORCTL = 1 << 0;
        const STYLE = 1 << 1;
        const INDEXED = 1 << 2;
        const RGB = 1 << 3;
    }
}

impl Session {
    /// Writes bytes to the console; the whole buffer is flushed as one
    /// segment.
    pub fn write(&self, data: &[u8]) -> Result<usize, Error> {
        let mut send = self.inner.send.lock().map_err(|_| Error::Closed)?;

        if !self.inner.caps.ctl {
            send.out.send_data(data)?;
            send.out.flush()?;
            return Ok(data.len());
        }

        let SendHalf { out, term, vt, .. } = &mut *send;

        let refresh_needed = {
            let mut sink = RenderSink {
                vt: &mut *vt,
                out: ByteOut { out: &mut *out },
                refresh_needed: false,
            };

            for ch in String::from_utf8_lossy(data).chars() {
                match ch {
                    '\n' => term.put_crlf(&mut sink),
                    '\r' => term.put_cr(&mut sink),
                    '\t' => term.put_tab(&mut sink),
                    '\u{8}' => term.put_backspace(&mut sink),
                    _ => term.put_glyph(ch, glyph_width(ch), &mut sink),
                }
            }

            sink.refresh_needed
        };

        if refresh_needed {
            // The viewport moved in a way incremental updates cannot
            // express; repaint from scratch.
            {
                let mut sink = ByteOut { out: &mut *out };
                vt.cls(&mut sink);
            }
            let mut sink = RenderSink {
                vt: &mut *vt,
                out: ByteOut { out: &mut *out },
                refresh_needed: false,
            };
            term.force_viewport_update(0, term.rows(), &mut sink);
        }

        let (col, row) = term.pos();
        let mut sink = ByteOut { out: &mut *out };
        vt.set_pos(col, row, &mut sink);

        out.flush()?;
        Ok(data.len())
    }

    /// Window size as seen by the client.
    pub fn get_size(&self) -> Result<(usize, usize), Error> {
        if !self.inner.caps.ctl {
            return Ok((DUMB_COLS, DUMB_ROWS));
        }
        let send = self.inner.send.lock().map_err(|_| Error::Closed)?;
        Ok((send.term.cols(), send.term.rows()))
    }

    pub fn get_pos(&self) -> Result<(usize, usize), Error> {
        let send = self.inner.send.lock().map_err(|_| Error::Closed)?;
        if self.inner.caps.ctl {
            Ok(send.term.pos())
        } else {
            Ok((send.out.cursor_col, send.out.cursor_row))
        }
    }

    /// Moves the cursor. In dumb mode only the one-column backstep has a
    /// wire representation; everything else just updates the logical
    /// position.
    pub fn set_pos(&self, col: usize, row: usize) -> Result<(), Error> {
        let mut send = self.inner.send.lock().map_err(|_| Error::Closed)?;

        if self.inner.caps.ctl {
            let SendHalf { out, term, vt, .. } = &mut *send;
            term.set_pos(col, row, &mut NullSink);
            let (col, row) = term.pos();
            let mut sink = ByteOut { out: &mut *out };
            vt.set_pos(col, row, &mut sink);
            out.flush()?;
        } else {
            if send.out.cursor_col == col + 1 {
                send.out.send_data(&[0x08])?;
                send.out.flush()?;
            }
            send.out.cursor_col = col;
            send.out.cursor_row = row;
        }
        Ok(())
    }

    /// Clears the screen (scrolling live text into scrollback) and homes
    /// the cursor. No-op without the control capability.
    pub fn clear(&self) -> Result<(), Error> {
        if !self.inner.caps.ctl {
            return Ok(());
        }
        let mut send = self.inner.send.lock().map_err(|_| Error::Closed)?;

        let SendHalf { out, term, vt, .. } = &mut *send;
        term.clear_screen(&mut NullSink);
        let mut sink = ByteOut { out: &mut *out };
        vt.cls(&mut sink);
        vt.set_pos(0, 0, &mut sink);
        out.flush()?;
        Ok(())
    }

    pub fn get_color_caps(&self) -> ConsoleCaps {
        let mut caps = ConsoleCaps::empty();
        if self.inner.caps.ctl {
            caps |= ConsoleCaps::CURSORCTL | ConsoleCaps::STYLE | ConsoleCaps::INDEXED;
        }
        if self.inner.caps.rgb {
            caps |= ConsoleCaps::RGB;
        }
        caps
    }

    pub fn set_style(&self, style: Style) -> Result<(), Error> {
        self.apply_attrs(Attrs::Style(style), style_cell(style))
    }

    /// Indexed colors with a brightness attribute.
    pub fn set_color(&self, bg: u8, fg: u8, bright: bool) -> Result<(), Error> {
        let mut cell = Cell::default();
        cell.fg = Color::indexed(if bright { fg | 0x8 } else { fg & 0x7 });
        cell.bg = Color::indexed(bg & 0x7);
        self.apply_attrs(Attrs::Index { fg: fg & 0x7, bg: bg & 0x7, bright }, cell)
    }

    pub fn set_rgb_color(
        &self,
        fg: (u8, u8, u8),
        bg: (u8, u8, u8),
    ) -> Result<(), Error> {
        let mut cell = Cell::default();
        cell.fg = Color::from_rgb(fg.0, fg.1, fg.2);
        cell.bg = Color::from_rgb(bg.0, bg.1, bg.2);
        self.apply_attrs(Attrs::Rgb { fg, bg }, cell)
    }

    fn apply_attrs(&self, attrs: Attrs, style: Cell) -> Result<(), Error> {
        if !self.inner.caps.ctl {
            return Ok(());
        }
        let mut send = self.inner.send.lock().map_err(|_| Error::Closed)?;

        let SendHalf { out, term, vt, .. } = &mut *send;
        term.set_style(style);
        let mut sink = ByteOut { out: &mut *out };
        vt.set_attrs(attrs, &mut sink);
        Ok(())
    }

    pub fn set_cursor_visibility(&self, visible: bool) -> Result<(), Error> {
        if !self.inner.caps.ctl {
            return Ok(());
        }
        let mut send = self.inner.send.lock().map_err(|_| Error::Closed)?;

        let was_visible = send.curs_visible;
        send.curs_visible = visible;

        let SendHalf { out, term, vt, .. } = &mut *send;
        term.set_cursor_visibility(visible, &mut NullSink);

        let mut sink = ByteOut { out: &mut *out };
        if !was_visible && visible {
            // Re-home the remote cursor before revealing it.
            let (col, row) = term.pos();
            vt.set_pos(col, row, &mut sink);
        }
        vt.cursor_visibility(visible, &mut sink);
        out.flush()?;
        Ok(())
    }

    /// Sets the terminal caption (xterm title). No-op in dumb mode.
    pub fn set_caption(&self, caption: &str) -> Result<(), Error> {
        if !self.inner.caps.ctl {
            return Ok(());
        }
        let mut send = self.inner.send.lock().map_err(|_| Error::Closed)?;

        let SendHalf { out, vt, .. } = &mut *send;
        let mut sink = ByteOut { out: &mut *out };
        vt.set_title(caption, &mut sink);
        out.flush()?;
        Ok(())
    }

    /// Allocates the shared cell buffer for `update`.
    pub fn map(&self, cols: usize, rows: usize) -> Result<(), Error> {
        if !self.inner.caps.ctl {
            return Err(Error::NotSupported);
        }
        if cols == 0 || rows == 0 || usize::MAX / cols < rows {
            return Err(Error::NoMemory);
        }
        let mut send = self.inner.send.lock().map_err(|_| Error::Closed)?;
        if send.map.is_some() {
            return Err(Error::Busy);
        }
        send.map = Some(MapBuffer {
            cols,
            rows,
            cells: vec![Cell::default(); cols * rows],
        });
        Ok(())
    }

    pub fn unmap(&self) -> Result<(), Error> {
        let mut send = self.inner.send.lock().map_err(|_| Error::Closed)?;
        send.map = None;
        Ok(())
    }

    /// Gives the client mutable access to the mapped buffer.
    pub fn with_mapped<R>(
        &self,
        f: impl FnOnce(&mut [Cell], usize, usize) -> R,
    ) -> Result<R, Error> {
        let mut send = self.inner.send.lock().map_err(|_| Error::Closed)?;
        let map = send.map.as_mut().ok_or(Error::NoEntry)?;
        let (cols, rows) = (map.cols, map.rows);
        Ok(f(&mut map.cells, cols, rows))
    }

    /// Renders the rectangle `[c0, c1) x [r0, r1)` of the mapped buffer,
    /// clamped to the buffer and the session geometry, with the cursor
    /// hidden during the repaint.
    pub fn update(&self, c0: usize, r0: usize, c1: usize, r1: usize) -> Result<(), Error> {
        let mut send = self.inner.send.lock().map_err(|_| Error::Closed)?;

        let curs_visible = send.curs_visible;
        let SendHalf { out, term, vt, map, .. } = &mut *send;
        let map = match map.as_ref() {
            Some(map) => map,
            None => return Ok(()),
        };

        // Meaningful coordinates only, within all bounds.
        let c1 = c1.min(map.cols).min(out.cols);
        let r1 = r1.min(map.rows).min(out.rows);
        if c0 >= c1 || r0 >= r1 {
            return Ok(());
        }

        let mut sink = ByteOut { out: &mut *out };

        if curs_visible {
            vt.cursor_visibility(false, &mut sink);
        }

        for row in r0..r1 {
            vt.set_pos(c0, row, &mut sink);
            for col in c0..c1 {
                let cell = &map.cells[row * map.cols + col];
                if cell.padding {
                    continue;
                }
                vt.set_cell_style(cell, &mut sink);
                vt.putchar(cell.glyph_char().unwrap_or(' '), &mut sink);
            }
        }

        let (col, row) = term.pos();
        vt.set_pos(col, row, &mut sink);
        if curs_visible {
            vt.cursor_visibility(true, &mut sink);
        }

        out.flush()?;
        Ok(())
    }
}

fn style_cell(style: Style) -> Cell {
    let mut cell = Cell::default();
    cell.attrs = match style {
        Style::Normal => CellAttrs::empty(),
        Style::Emphasis => CellAttrs::BOLD,
        Style::Inverted | Style::Selected => CellAttrs::INVERSE,
    };
    cell
}
