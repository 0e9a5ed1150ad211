// Copyright 2025 Oriel OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: VT100 byte codec — sequence encoder and input decoder
//! OWNERS: @hid-team
//! PUBLIC API: Vt100 (positions, SGR, cls, reporting modes), Vt100Sink,
//!   InputDecoder, InputSink, KeyInput, PosEvent
//! INVARIANTS: The encoder caches the last emitted SGR and skips
//!   redundant updates; the decoder consumes partial sequences silently
//!   and never emits from an incomplete one
//!
//! The encoder side writes control sequences through a [`Vt100Sink`];
//! printable glyphs go through `putchar` so the owner can apply its own
//! newline handling to them. The decoder side turns raw client bytes
//! into key events (UTF-8 text, control keys, CSI/SS3 sequences) and
//! X10 mouse reports.

use alloc::format;
use alloc::string::String;

use bitflags::bitflags;

use crate::cell::{Cell, CellAttrs};

/// Byte-stream receiver of the encoder.
pub trait Vt100Sink {
    /// A printable character (subject to the owner's newline mapping).
    fn putchar(&mut self, ch: char);
    /// A raw control sequence, emitted verbatim.
    fn control_puts(&mut self, s: &str);
    /// Push buffered output to the peer.
    fn flush(&mut self);
}

/// Console text styles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Style {
    Normal,
    Emphasis,
    Inverted,
    Selected,
}

/// Character attribute selection, mirroring the console protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attrs {
    Style(Style),
    /// Indexed colors 0..=7 with a brightness flag.
    Index { fg: u8, bg: u8, bright: bool },
    /// Direct colors.
    Rgb { fg: (u8, u8, u8), bg: (u8, u8, u8) },
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SgrState {
    Attrs(Attrs),
    Cell(crate::cell::Color, crate::cell::Color, CellAttrs),
}

/// VT100 sequence encoder with SGR caching.
pub struct Vt100 {
    enable_rgb: bool,
    last_sgr: Option<SgrState>,
}

impl Vt100 {
    pub fn new(enable_rgb: bool) -> Self {
        Self { enable_rgb, last_sgr: None }
    }

    pub fn enable_rgb(&self) -> bool {
        self.enable_rgb
    }

    pub fn putchar(&self, ch: char, sink: &mut dyn Vt100Sink) {
        sink.putchar(ch);
    }

    /// Moves the remote cursor (0-based coordinates).
    pub fn set_pos(&self, col: usize, row: usize, sink: &mut dyn Vt100Sink) {
        sink.control_puts(&format!("\x1b[{};{}f", row + 1, col + 1));
    }

    /// Clears the remote screen.
    pub fn cls(&self, sink: &mut dyn Vt100Sink) {
        sink.control_puts("\x1b[2J");
    }

    /// Resets all character attributes and drops the SGR cache.
    pub fn sgr_reset(&mut self, sink: &mut dyn Vt100Sink) {
        self.last_sgr = None;
        sink.control_puts("\x1b[0m");
    }

    /// Applies console-level attributes, skipping redundant updates.
    pub fn set_attrs(&mut self, attrs: Attrs, sink: &mut dyn Vt100Sink) {
        if self.last_sgr == Some(SgrState::Attrs(attrs)) {
            return;
        }
        self.last_sgr = Some(SgrState::Attrs(attrs));

        let seq = match attrs {
            Attrs::Style(Style::Normal) => String::from("\x1b[0m"),
            Attrs::Style(Style::Emphasis) => String::from("\x1b[0;1m"),
            Attrs::Style(Style::Inverted) | Attrs::Style(Style::Selected) => {
                String::from("\x1b[0;7m")
            }
            Attrs::Index { fg, bg, bright } => {
                let fg = 30 + (fg & 0x7);
                let bg = 40 + (bg & 0x7);
                if bright {
                    format!("\x1b[0;1;{fg};{bg}m")
                } else {
                    format!("\x1b[0;{fg};{bg}m")
                }
            }
            Attrs::Rgb { fg, bg } => {
                if self.enable_rgb {
                    format!(
                        "\x1b[0;38;2;{};{};{};48;2;{};{};{}m",
                        fg.0, fg.1, fg.2, bg.0, bg.1, bg.2
                    )
                } else {
                    // Downgrade to a plain reset when direct color was
                    // not negotiated.
                    String::from("\x1b[0m")
                }
            }
        };
        sink.control_puts(&seq);
    }

    /// Applies the style carried by a grid cell.
    pub fn set_cell_style(&mut self, cell: &Cell, sink: &mut dyn Vt100Sink) {
        let state = SgrState::Cell(cell.fg, cell.bg, cell.attrs);
        if self.last_sgr == Some(state) {
            return;
        }
        self.last_sgr = Some(state);

        let mut seq = String::from("\x1b[0");
        if cell.attrs.contains(CellAttrs::BOLD) {
            seq.push_str(";1");
        }
        if cell.attrs.contains(CellAttrs::UNDERLINE) {
            seq.push_str(";4");
        }
        if cell.attrs.contains(CellAttrs::BLINK) {
            seq.push_str(";5");
        }
        if cell.attrs.contains(CellAttrs::INVERSE) {
            seq.push_str(";7");
        }

        if let Some((r, g, b)) = cell.fg.to_rgb() {
            if self.enable_rgb {
                seq.push_str(&format!(";38;2;{r};{g};{b}"));
            }
        } else if let Some(index) = cell.fg.index() {
            if index < 8 {
                seq.push_str(&format!(";{}", 30 + index));
            } else {
                seq.push_str(&format!(";{}", 90 + (index & 0x7)));
            }
        }
        if let Some((r, g, b)) = cell.bg.to_rgb() {
            if self.enable_rgb {
                seq.push_str(&format!(";48;2;{r};{g};{b}"));
            }
        } else if let Some(index) = cell.bg.index() {
            if index < 8 {
                seq.push_str(&format!(";{}", 40 + index));
            } else {
                seq.push_str(&format!(";{}", 100 + (index & 0x7)));
            }
        }

        seq.push('m');
        sink.control_puts(&seq);
    }

    pub fn cursor_visibility(&self, visible: bool, sink: &mut dyn Vt100Sink) {
        sink.control_puts(if visible { "\x1b[?25h" } else { "\x1b[?25l" });
    }

    /// Enables or disables X10 mouse button reporting.
    pub fn set_button_reporting(&self, enabled: bool, sink: &mut dyn Vt100Sink) {
        sink.control_puts(if enabled { "\x1b[?1000h" } else { "\x1b[?1000l" });
    }

    /// Sets the terminal window title.
    pub fn set_title(&self, title: &str, sink: &mut dyn Vt100Sink) {
        sink.control_puts("\x1b]0;");
        sink.control_puts(title);
        sink.control_puts("\x07");
    }

    pub fn flush(&self, sink: &mut dyn Vt100Sink) {
        sink.flush();
    }
}

bitflags! {
    /// Modifier state of a decoded key.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct KeyMods: u8 {
        const SHIFT = 1 << 0;
        const ALT = 1 << 1;
        const CTRL = 1 << 2;
    }
}

/// Key identity of a decoded input event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyCode {
    /// Printable character; see [`KeyInput::ch`].
    Char,
    Enter,
    Backspace,
    Tab,
    Escape,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    Insert,
    Delete,
    Func(u8),
}

/// One decoded keystroke.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyInput {
    pub code: KeyCode,
    /// Character produced by the key, when any.
    pub ch: Option<char>,
    pub mods: KeyMods,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PosKind {
    Press,
    Release,
}

/// Decoded mouse report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PosEvent {
    pub kind: PosKind,
    pub button: u8,
    pub col: u16,
    pub row: u16,
}

/// Receiver of decoded input events.
pub trait InputSink {
    fn key(&mut self, key: KeyInput);
    fn pos(&mut self, event: PosEvent);
}

const MAX_PARAMS: usize = 4;

enum DecodeState {
    Ground,
    Esc,
    Ss3,
    Csi,
    MouseButton,
    MouseCol,
    MouseRow,
}

/// Byte-at-a-time decoder of the client input stream.
pub struct InputDecoder {
    state: DecodeState,
    params: [u16; MAX_PARAMS],
    nparams: usize,
    utf8_acc: u32,
    utf8_need: u8,
    mouse_button: u8,
    mouse_col: u8,
}

impl Default for InputDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl InputDecoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::Ground,
            params: [0; MAX_PARAMS],
            nparams: 0,
            utf8_acc: 0,
            utf8_need: 0,
            mouse_button: 0,
            mouse_col: 0,
        }
    }

    pub fn feed(&mut self, byte: u8, sink: &mut dyn InputSink) {
        match self.state {
            DecodeState::Ground => self.feed_ground(byte, sink),
            DecodeState::Esc => self.feed_esc(byte, sink),
            DecodeState::Ss3 => self.feed_ss3(byte, sink),
            DecodeState::Csi => self.feed_csi(byte, sink),
            DecodeState::MouseButton => {
                self.mouse_button = byte.wrapping_sub(32);
                self.state = DecodeState::MouseCol;
            }
            DecodeState::MouseCol => {
                self.mouse_col = byte.wrapping_sub(33);
                self.state = DecodeState::MouseRow;
            }
            DecodeState::MouseRow => {
                let row = byte.wrapping_sub(33);
                let released = self.mouse_button & 0x3 == 0x3;
                sink.pos(PosEvent {
                    kind: if released { PosKind::Release } else { PosKind::Press },
                    button: if released { 1 } else { (self.mouse_button & 0x3) + 1 },
                    col: self.mouse_col as u16,
                    row: row as u16,
                });
                self.state = DecodeState::Ground;
            }
        }
    }

    fn feed_ground(&mut self, byte: u8, sink: &mut dyn InputSink) {
        if self.utf8_need > 0 {
            if byte & 0xc0 == 0x80 {
                self.utf8_acc = (self.utf8_acc << 6) | (byte & 0x3f) as u32;
                self.utf8_need -= 1;
                if self.utf8_need == 0 {
                    if let Some(ch) = char::from_u32(self.utf8_acc) {
                        sink.key(plain(KeyCode::Char, Some(ch)));
                    }
                }
            } else {
                // Broken sequence; drop it and reprocess the byte.
                self.utf8_need = 0;
                self.feed_ground(byte, sink);
            }
            return;
        }

        match byte {
            0x1b => self.state = DecodeState::Esc,
            b'\r' | b'\n' => sink.key(plain(KeyCode::Enter, Some('\n'))),
            0x08 | 0x7f => sink.key(plain(KeyCode::Backspace, Some('\u{8}'))),
            b'\t' => sink.key(plain(KeyCode::Tab, Some('\t'))),
            0x00 => {}
            0x01..=0x1a => {
                // Ctrl+letter.
                let letter = (b'a' + byte - 1) as char;
                sink.key(KeyInput {
                    code: KeyCode::Char,
                    ch: Some(letter),
                    mods: KeyMods::CTRL,
                });
            }
            0x1c..=0x1f => {}
            0x20..=0x7e => sink.key(plain(KeyCode::Char, Some(byte as char))),
            _ => {
                // UTF-8 lead byte.
                let (need, acc) = match byte {
                    0xc0..=0xdf => (1, (byte & 0x1f) as u32),
                    0xe0..=0xef => (2, (byte & 0x0f) as u32),
                    0xf0..=0xf7 => (3, (byte & 0x07) as u32),
                    _ => return,
                };
                self.utf8_need = need;
                self.utf8_acc = acc;
            }
        }
    }

    fn feed_esc(&mut self, byte: u8, sink: &mut dyn InputSink) {
        match byte {
            b'[' => {
                self.params = [0; MAX_PARAMS];
                self.nparams = 0;
                self.state = DecodeState::Csi;
            }
            b'O' => self.state = DecodeState::Ss3,
            _ => {
                // A lone escape, then the byte on its own.
                sink.key(plain(KeyCode::Escape, Some('\u{1b}')));
                self.state = DecodeState::Ground;
                self.feed(byte, sink);
            }
        }
    }

    fn feed_ss3(&mut self, byte: u8, sink: &mut dyn InputSink) {
        self.state = DecodeState::Ground;
        let code = match byte {
            b'A' => Some(KeyCode::Up),
            b'B' => Some(KeyCode::Down),
            b'C' => Some(KeyCode::Right),
            b'D' => Some(KeyCode::Left),
            b'H' => Some(KeyCode::Home),
            b'F' => Some(KeyCode::End),
            b'P'..=b'S' => Some(KeyCode::Func(byte - b'P' + 1)),
            _ => None,
        };
        if let Some(code) = code {
            sink.key(plain(code, None));
        }
    }

    fn feed_csi(&mut self, byte: u8, sink: &mut dyn InputSink) {
        match byte {
            b'0'..=b'9' => {
                let slot = self.nparams.min(MAX_PARAMS - 1);
                self.params[slot] =
                    self.params[slot].saturating_mul(10) + (byte - b'0') as u16;
            }
            b';' => {
                if self.nparams < MAX_PARAMS {
                    self.nparams += 1;
                }
            }
            b'M' => self.state = DecodeState::MouseButton,
            _ => {
                self.state = DecodeState::Ground;
                let mods = csi_mods(if self.nparams >= 1 { self.params[1] } else { 0 });
                let code = match byte {
                    b'A' => Some(KeyCode::Up),
                    b'B' => Some(KeyCode::Down),
                    b'C' => Some(KeyCode::Right),
                    b'D' => Some(KeyCode::Left),
                    b'H' => Some(KeyCode::Home),
                    b'F' => Some(KeyCode::End),
                    b'~' => tilde_key(self.params[0]),
                    _ => None,
                };
                if let Some(code) = code {
                    sink.key(KeyInput { code, ch: None, mods });
                }
            }
        }
    }
}

fn plain(code: KeyCode, ch: Option<char>) -> KeyInput {
    KeyInput { code, ch, mods: KeyMods::empty() }
}

fn csi_mods(param: u16) -> KeyMods {
    if param < 2 {
        return KeyMods::empty();
    }
    let bits = (param - 1) as u8;
    let mut mods = KeyMods::empty();
    if bits & 1 != 0 {
        mods |= KeyMods::SHIFT;
    }
    if bits & 2 != 0 {
        mods |= KeyMods::ALT;
    }
    if bits & 4 != 0 {
        mods |= KeyMods::CTRL;
    }
    mods
}

fn tilde_key(param: u16) -> Option<KeyCode> {
    match param {
        1 | 7 => Some(KeyCode::Home),
        2 => Some(KeyCode::Insert),
        3 => Some(KeyCode::Delete),
        4 | 8 => Some(KeyCode::End),
        5 => Some(KeyCode::PageUp),
        6 => Some(KeyCode::PageDown),
        11..=15 => Some(KeyCode::Func((param - 10) as u8)),
        17..=21 => Some(KeyCode::Func((param - 11) as u8)),
        23 | 24 => Some(KeyCode::Func((param - 12) as u8)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Color;

    #[derive(Default)]
    struct ByteSink {
        bytes: String,
        flushes: usize,
    }

    impl Vt100Sink for ByteSink {
        fn putchar(&mut self, ch: char) {
            self.bytes.push(ch);
        }
        fn control_puts(&mut self, s: &str) {
            self.bytes.push_str(s);
        }
        fn flush(&mut self) {
            self.flushes += 1;
        }
    }

    #[derive(Default)]
    struct Events {
        keys: Vec<KeyInput>,
        pos: Vec<PosEvent>,
    }

    impl InputSink for Events {
        fn key(&mut self, key: KeyInput) {
            self.keys.push(key);
        }
        fn pos(&mut self, event: PosEvent) {
            self.pos.push(event);
        }
    }

    fn feed_all(decoder: &mut InputDecoder, bytes: &[u8]) -> Events {
        let mut events = Events::default();
        for &byte in bytes {
            decoder.feed(byte, &mut events);
        }
        events
    }

    #[test]
    fn encoder_emits_position_and_clear() {
        let vt = Vt100::new(true);
        let mut sink = ByteSink::default();
        vt.set_pos(4, 2, &mut sink);
        vt.cls(&mut sink);
        assert_eq!(sink.bytes, "\x1b[3;5f\x1b[2J");
    }

    #[test]
    fn sgr_cache_skips_redundant_updates() {
        let mut vt = Vt100::new(true);
        let mut sink = ByteSink::default();

        let attrs = Attrs::Index { fg: 2, bg: 0, bright: false };
        vt.set_attrs(attrs, &mut sink);
        let once = sink.bytes.clone();
        vt.set_attrs(attrs, &mut sink);
        assert_eq!(sink.bytes, once);

        vt.set_attrs(Attrs::Style(Style::Normal), &mut sink);
        assert!(sink.bytes.len() > once.len());
    }

    #[test]
    fn rgb_attrs_downgrade_without_negotiation() {
        let mut vt = Vt100::new(false);
        let mut sink = ByteSink::default();
        vt.set_attrs(
            Attrs::Rgb { fg: (1, 2, 3), bg: (4, 5, 6) },
            &mut sink,
        );
        assert_eq!(sink.bytes, "\x1b[0m");

        let mut vt = Vt100::new(true);
        let mut sink = ByteSink::default();
        vt.set_attrs(
            Attrs::Rgb { fg: (1, 2, 3), bg: (4, 5, 6) },
            &mut sink,
        );
        assert_eq!(sink.bytes, "\x1b[0;38;2;1;2;3;48;2;4;5;6m");
    }

    #[test]
    fn cell_style_maps_indexed_and_rgb_colors() {
        let mut vt = Vt100::new(true);
        let mut sink = ByteSink::default();

        let mut cell = Cell::default();
        cell.fg = Color::indexed(1);
        cell.attrs = CellAttrs::BOLD;
        vt.set_cell_style(&cell, &mut sink);
        assert_eq!(sink.bytes, "\x1b[0;1;31m");

        let mut sink = ByteSink::default();
        cell.fg = Color::from_rgb(0xff, 0, 0);
        cell.attrs = CellAttrs::empty();
        vt.set_cell_style(&cell, &mut sink);
        assert!(sink.bytes.starts_with("\x1b[0;38;2;255;"));
    }

    #[test]
    fn decoder_handles_text_and_control_keys() {
        let mut decoder = InputDecoder::new();
        let events = feed_all(&mut decoder, b"a\r\x03");

        assert_eq!(events.keys.len(), 3);
        assert_eq!(events.keys[0].ch, Some('a'));
        assert_eq!(events.keys[1].code, KeyCode::Enter);
        assert_eq!(events.keys[2].ch, Some('c'));
        assert!(events.keys[2].mods.contains(KeyMods::CTRL));
    }

    #[test]
    fn decoder_handles_utf8() {
        let mut decoder = InputDecoder::new();
        let events = feed_all(&mut decoder, "é".as_bytes());
        assert_eq!(events.keys.len(), 1);
        assert_eq!(events.keys[0].ch, Some('é'));
    }

    #[test]
    fn decoder_handles_cursor_and_function_keys() {
        let mut decoder = InputDecoder::new();
        let events = feed_all(&mut decoder, b"\x1b[A\x1b[15~\x1bOP\x1b[1;5C");

        assert_eq!(events.keys[0].code, KeyCode::Up);
        assert_eq!(events.keys[1].code, KeyCode::Func(5));
        assert_eq!(events.keys[2].code, KeyCode::Func(1));
        assert_eq!(events.keys[3].code, KeyCode::Right);
        assert!(events.keys[3].mods.contains(KeyMods::CTRL));
    }

    #[test]
    fn decoder_handles_x10_mouse_reports() {
        let mut decoder = InputDecoder::new();
        // Button 1 press at column 4, row 2; then release.
        let events = feed_all(
            &mut decoder,
            &[0x1b, b'[', b'M', 32, 33 + 4, 33 + 2, 0x1b, b'[', b'M', 32 + 3, 33 + 4, 33 + 2],
        );

        assert_eq!(events.pos.len(), 2);
        assert_eq!(events.pos[0].kind, PosKind::Press);
        assert_eq!(events.pos[0].button, 1);
        assert_eq!(events.pos[0].col, 4);
        assert_eq!(events.pos[0].row, 2);
        assert_eq!(events.pos[1].kind, PosKind::Release);
    }

    #[test]
    fn lone_escape_prefixes_the_following_key() {
        let mut decoder = InputDecoder::new();
        let events = feed_all(&mut decoder, b"\x1bq");
        assert_eq!(events.keys.len(), 2);
        assert_eq!(events.keys[0].code, KeyCode::Escape);
        assert_eq!(events.keys[1].ch, Some('q'));
    }
}
