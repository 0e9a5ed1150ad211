// Copyright 2025 Oriel OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Telnet protocol constants and the receive-side decoder
//! OWNERS: @runtime
//! PUBLIC API: TelnetDecoder, TelnetOutput, option constants,
//!   FORCE_CHARACTER_MODE
//! INVARIANTS: IAC sequences never reach the application stream; CR LF
//!   and CR NUL collapse to a single LF; NULs are suppressed
//!
//! The decoder is a pure push parser: bytes in, application data plus
//! protocol replies and window-size updates out. The session owns all
//! I/O around it.

use log::debug;

pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
pub const SE: u8 = 240;

pub const OPT_ECHO: u8 = 1;
pub const OPT_SUPPRESS_GO_AHEAD: u8 = 3;
pub const OPT_NAWS: u8 = 31;
pub const OPT_LINEMODE: u8 = 34;

/// Telnet options forcing the peer into character mode, sent when the
/// connection opens. Redundant on most clients, but cheap.
pub const FORCE_CHARACTER_MODE: [u8; 9] = [
    IAC, WILL, OPT_ECHO,
    IAC, WILL, OPT_SUPPRESS_GO_AHEAD,
    IAC, WONT, OPT_LINEMODE,
];

/// Longest subnegotiation payload we keep; NAWS needs four bytes.
const SB_MAX: usize = 64;

enum State {
    Data,
    Iac,
    Opt(u8),
    SubOpt,
    SubData,
    SubIac,
}

/// Result of one decode pass.
#[derive(Default)]
pub struct TelnetOutput {
    /// Application bytes, after stripping and CR mapping.
    pub data: Vec<u8>,
    /// Protocol replies to send back verbatim.
    pub reply: Vec<u8>,
    /// Window-size updates, oldest first (zero dimensions dropped).
    pub resize: Vec<(u16, u16)>,
}

/// Streaming telnet receiver.
pub struct TelnetDecoder {
    state: State,
    sub_opt: u8,
    sub: Vec<u8>,
    after_cr: bool,
}

impl Default for TelnetDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl TelnetDecoder {
    pub fn new() -> Self {
        Self {
            state: State::Data,
            sub_opt: 0,
            sub: Vec::new(),
            after_cr: false,
        }
    }

    /// Decodes `input`, appending to `out`.
    pub fn decode(&mut self, input: &[u8], out: &mut TelnetOutput) {
        for &byte in input {
            self.decode_byte(byte, out);
        }
    }

    fn decode_byte(&mut self, byte: u8, out: &mut TelnetOutput) {
        match self.state {
            State::Data => match byte {
                IAC => self.state = State::Iac,
                _ => self.data_byte(byte, out),
            },
            State::Iac => match byte {
                WILL | WONT | DO | DONT => self.state = State::Opt(byte),
                SB => self.state = State::SubOpt,
                IAC => {
                    // Escaped 0xff data byte.
                    self.state = State::Data;
                    self.data_byte(IAC, out);
                }
                cmd => {
                    debug!("ignoring telnet command {IAC} {cmd}");
                    self.state = State::Data;
                }
            },
            State::Opt(cmd) => {
                self.handle_option(cmd, byte, out);
                self.state = State::Data;
            }
            State::SubOpt => {
                self.sub_opt = byte;
                self.sub.clear();
                self.state = State::SubData;
            }
            State::SubData => match byte {
                IAC => self.state = State::SubIac,
                _ => {
                    if self.sub.len() < SB_MAX {
                        self.sub.push(byte);
                    }
                }
            },
            State::SubIac => match byte {
                SE => {
                    self.finish_subnegotiation(out);
                    self.state = State::Data;
                }
                IAC => {
                    // Escaped data byte inside the subnegotiation.
                    if self.sub.len() < SB_MAX {
                        self.sub.push(IAC);
                    }
                    self.state = State::SubData;
                }
                _ => {
                    debug!("malformed subnegotiation, dropping");
                    self.state = State::Data;
                }
            },
        }
    }

    fn data_byte(&mut self, byte: u8, out: &mut TelnetOutput) {
        if self.after_cr {
            self.after_cr = false;
            // CR LF and CR NUL already produced the LF.
            if byte == b'\n' || byte == 0 {
                return;
            }
        }

        match byte {
            b'\r' => {
                self.after_cr = true;
                out.data.push(b'\n');
            }
            // Echoed NULs are noise.
            0 => {}
            _ => out.data.push(byte),
        }
    }

    fn handle_option(&mut self, cmd: u8, opt: u8, out: &mut TelnetOutput) {
        if cmd == WILL && opt == OPT_NAWS {
            debug!("WILL NAWS");
            out.reply.extend_from_slice(&[IAC, DO, OPT_NAWS]);
            return;
        }
        debug!("ignoring telnet command {IAC} {cmd} {opt}");
    }

    fn finish_subnegotiation(&mut self, out: &mut TelnetOutput) {
        if self.sub_opt != OPT_NAWS {
            debug!("ignoring subnegotiation for option {}", self.sub_opt);
            return;
        }
        if self.sub.len() < 4 {
            debug!("short NAWS subnegotiation");
            return;
        }

        let cols = u16::from_be_bytes([self.sub[0], self.sub[1]]);
        let rows = u16::from_be_bytes([self.sub[2], self.sub[3]]);
        debug!("NAWS cols={cols} rows={rows}");

        if cols == 0 || rows == 0 {
            debug!("ignoring invalid window size update");
            return;
        }

        out.resize.push((cols, rows));
    }
}
