// Copyright 2025 Oriel OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Screen cells and the packed 15-bit color encoding.

use bitflags::bitflags;

bitflags! {
    /// Character attributes carried by a cell.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct CellAttrs: u8 {
        const BOLD = 1 << 0;
        const UNDERLINE = 1 << 1;
        const BLINK = 1 << 2;
        const INVERSE = 1 << 3;
    }
}

/// Packed cell color.
///
/// Zero is "default". Values `1..=256` are indexed palette entries
/// (index + 1). Bit 15 marks a 5:5:5 RGB value; the low half of the
/// encoding space stays reserved for the other uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Color(u16);

impl Color {
    pub const DEFAULT: Color = Color(0);

    const RGB_BIT: u16 = 0x8000;

    pub const fn indexed(index: u8) -> Color {
        Color(index as u16 + 1)
    }

    pub const fn from_rgb(r: u8, g: u8, b: u8) -> Color {
        let r = (r >> 3) as u16;
        let g = (g >> 3) as u16;
        let b = (b >> 3) as u16;
        Color(Self::RGB_BIT | r << 10 | g << 5 | b)
    }

    pub const fn is_default(self) -> bool {
        self.0 == 0
    }

    pub const fn is_rgb(self) -> bool {
        self.0 & Self::RGB_BIT != 0
    }

    /// Palette index, when this is an indexed color.
    pub fn index(self) -> Option<u8> {
        if self.is_rgb() || self.is_default() {
            None
        } else {
            Some((self.0 - 1) as u8)
        }
    }

    /// Unpacks an RGB color, widening 5-bit channels by bit replication
    /// so white round-trips to 0xff rather than topping out at 0xf8.
    pub fn to_rgb(self) -> Option<(u8, u8, u8)> {
        if !self.is_rgb() {
            return None;
        }
        let b = (self.0 & 0x1f) as u8;
        let g = ((self.0 >> 5) & 0x1f) as u8;
        let r = ((self.0 >> 10) & 0x1f) as u8;
        Some((r << 3 | r >> 2, g << 3 | g >> 2, b << 3 | b >> 2))
    }
}

/// One character cell of the grid or scrollback.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cell {
    /// Unicode scalar value; 0 is a blank cell.
    pub glyph: u32,
    pub fg: Color,
    pub bg: Color,
    pub attrs: CellAttrs,
    /// Second and further columns of a wide glyph.
    pub padding: bool,
    /// The cursor currently sits on this cell.
    pub cursor: bool,
}

impl Cell {
    pub fn glyph_char(&self) -> Option<char> {
        if self.glyph == 0 {
            None
        } else {
            char::from_u32(self.glyph)
        }
    }

    /// Blank cell test used when compressing trailing cells into history;
    /// the cursor flag does not count.
    pub fn is_empty(&self) -> bool {
        self.glyph == 0
            && self.fg.is_default()
            && self.bg.is_default()
            && !self.padding
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_roundtrip_replicates_bits() {
        let color = Color::from_rgb(0xff, 0x00, 0x80);
        assert!(color.is_rgb());
        assert_eq!(color.to_rgb(), Some((0xff, 0x00, 0x84)));

        // Quantized values round-trip exactly.
        let (r, g, b) = color.to_rgb().unwrap();
        assert_eq!(Color::from_rgb(r, g, b), color);
    }

    #[test]
    fn indexed_and_default_are_distinct() {
        assert_eq!(Color::DEFAULT.index(), None);
        assert_eq!(Color::indexed(0).index(), Some(0));
        assert_eq!(Color::indexed(15).index(), Some(15));
        assert!(!Color::indexed(15).is_rgb());
    }

    #[test]
    fn empty_cell_ignores_cursor() {
        let mut cell = Cell::default();
        cell.cursor = true;
        assert!(cell.is_empty());
        cell.padding = true;
        assert!(!cell.is_empty());
    }
}
