// Copyright 2025 Oriel OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: One telnet session — connection, terminal, events, lifecycle
//! OWNERS: @runtime
//! PUBLIC API: Session (launch/client_connect/client_disconnect/read/
//!   get_event), Caps, ConsEvent
//! INVARIANTS: The send side owns the output buffer, the screen state and
//!   the logical cursor; the receive side owns the telnet decoder, the
//!   event queue and the lifecycle counters; lock order is receive ->
//!   send; the session is destroyed only when task_finished &&
//!   socket_closed && client_connections == 0
//!
//! The receive lock is held across the blocking socket read: EOF or a
//! shutdown from the task watcher unblocks the reader, which then flips
//! the lifecycle flags.
//! Output never needs the receive lock, so shell output flows even while
//! a client is parked waiting for input.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use log::{debug, error, info};
use oriel_term::vt100::{InputDecoder, InputSink, KeyInput, PosEvent, Vt100, Vt100Sink};
use oriel_term::{Cell, NullSink, TermSink, Terminal};

use crate::locator::Directory;
use crate::task::{self, TaskHandle};
use crate::telnet::{TelnetDecoder, TelnetOutput, FORCE_CHARACTER_MODE};
use crate::Error;

pub(crate) const SEND_BUF_SIZE: usize = 1024;
const RECV_BUF_SIZE: usize = 512;

/// Initial terminal geometry in control mode.
pub const DEFAULT_COLS: usize = 80;
pub const DEFAULT_ROWS: usize = 25;
/// Geometry reported by a session without control sequences.
pub const DUMB_COLS: usize = 100;
pub const DUMB_ROWS: usize = 1;

const HISTORY_LINES: usize = 100;

/// How often the lifecycle loop re-evaluates the destroy predicate even
/// without a wakeup.
const LIFECYCLE_TICK: Duration = Duration::from_secs(1);

/// Capabilities a session is created with.
#[derive(Clone, Copy, Debug)]
pub struct Caps {
    /// Control sequences (cursor, attributes, clearing) enabled.
    pub ctl: bool,
    /// RGB color advertisement enabled.
    pub rgb: bool,
}

/// Key event direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyDir {
    Press,
    Release,
}

/// Event delivered to the terminal client.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ConsEvent {
    Key { dir: KeyDir, key: KeyInput },
    Pos(PosEvent),
    Resize,
}

/// Buffered byte output with the dumb-mode cursor tracking.
pub(crate) struct OutBuf {
    stream: TcpStream,
    buf: Vec<u8>,
    /// Logical cursor, tracked from the byte stream in dumb mode.
    pub(crate) cursor_col: usize,
    pub(crate) cursor_row: usize,
    /// Window size as negotiated over NAWS.
    pub(crate) cols: usize,
    pub(crate) rows: usize,
    broken: bool,
}

impl OutBuf {
    fn send_chunk(&mut self) -> Result<(), Error> {
        if self.broken {
            return Err(Error::Io);
        }
        if self.buf.is_empty() {
            return Ok(());
        }
        if let Err(err) = self.stream.write_all(&self.buf) {
            error!("send failed, poisoning session: {err}");
            self.broken = true;
            return Err(Error::Io);
        }
        self.buf.clear();
        Ok(())
    }

    /// Appends raw bytes, pushing full segments to the socket.
    pub(crate) fn send_raw(&mut self, data: &[u8]) -> Result<(), Error> {
        for &byte in data {
            if self.buf.len() == SEND_BUF_SIZE {
                self.send_chunk()?;
            }
            self.buf.push(byte);
        }
        Ok(())
    }

    /// Appends printable data: LF becomes CR LF and the logical cursor
    /// follows the bytes.
    pub(crate) fn send_data(&mut self, data: &[u8]) -> Result<(), Error> {
        for &byte in data {
            match byte {
                b'\n' => {
                    self.send_raw(b"\r\n")?;
                    self.cursor_col = 0;
                    if self.cursor_row + 1 < self.rows {
                        self.cursor_row += 1;
                    }
                }
                0x08 => {
                    self.send_raw(&[byte])?;
                    self.cursor_col = self.cursor_col.saturating_sub(1);
                }
                _ => {
                    self.send_raw(&[byte])?;
                    if self.cursor_col + 1 < self.cols {
                        self.cursor_col += 1;
                    }
                }
            }
        }
        Ok(())
    }

    /// Pushes the buffered bytes as one segment.
    pub(crate) fn flush(&mut self) -> Result<(), Error> {
        self.send_chunk()
    }

    fn clamp_cursor(&mut self) {
        self.cursor_col = self.cursor_col.min(self.cols.saturating_sub(1));
        self.cursor_row = self.cursor_row.min(self.rows.saturating_sub(1));
    }
}

/// Adapter: VT100 encoder output into the output buffer.
pub(crate) struct ByteOut<'a> {
    pub(crate) out: &'a mut OutBuf,
}

impl Vt100Sink for ByteOut<'_> {
    fn putchar(&mut self, ch: char) {
        let mut utf8 = [0u8; 4];
        let _ = self.out.send_data(ch.encode_utf8(&mut utf8).as_bytes());
    }

    fn control_puts(&mut self, s: &str) {
        let _ = self.out.send_raw(s.as_bytes());
    }

    fn flush(&mut self) {
        let _ = self.out.flush();
    }
}

/// Adapter: terminal grid updates into VT100 sequences.
pub(crate) struct RenderSink<'a, 'b> {
    pub(crate) vt: &'a mut Vt100,
    pub(crate) out: ByteOut<'b>,
    pub(crate) refresh_needed: bool,
}

impl TermSink for RenderSink<'_, '_> {
    fn update(&mut self, col: usize, row: usize, cells: &[Cell]) {
        self.vt.set_pos(col, row, &mut self.out);
        for cell in cells {
            if cell.padding {
                continue;
            }
            self.vt.set_cell_style(cell, &mut self.out);
            let ch = cell.glyph_char().unwrap_or(' ');
            self.vt.putchar(ch, &mut self.out);
        }
    }

    fn scroll(&mut self, delta: i32) {
        if delta > 0 && delta != i32::MAX {
            for _ in 0..delta {
                self.out.control_puts("\x1b[S");
            }
        } else {
            // Backward scrolls and jumps need a full repaint.
            self.refresh_needed = true;
        }
    }

    fn refresh(&mut self) {
        self.refresh_needed = true;
    }
}

pub(crate) struct MapBuffer {
    pub(crate) cols: usize,
    pub(crate) rows: usize,
    pub(crate) cells: Vec<Cell>,
}

/// Everything the output path owns: buffer, screen, encoder, cursor.
pub(crate) struct SendHalf {
    pub(crate) out: OutBuf,
    pub(crate) term: Terminal,
    pub(crate) vt: Vt100,
    /// Remote cursor visibility as requested by the client.
    pub(crate) curs_visible: bool,
    pub(crate) map: Option<MapBuffer>,
}

pub(crate) struct RecvHalf {
    stream: TcpStream,
    telnet: TelnetDecoder,
    /// Application bytes after telnet stripping, not yet consumed.
    decoded: VecDeque<u8>,
    input: InputDecoder,
    events: VecDeque<ConsEvent>,
    task: Option<TaskHandle>,
    pub(crate) task_finished: bool,
    pub(crate) socket_closed: bool,
    pub(crate) client_connections: usize,
    aborted: bool,
}

pub(crate) struct Inner {
    id: usize,
    service_name: String,
    pub(crate) caps: Caps,
    pub(crate) send: Mutex<SendHalf>,
    pub(crate) recv: Mutex<RecvHalf>,
    pub(crate) lifecycle: Condvar,
}

/// Handle to one remote console session.
#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Arc<Inner>,
}

impl Session {
    /// Sets up a session on a fresh TCP connection: telnet negotiation,
    /// screen initialization, directory registration, task spawn, and the
    /// lifecycle watcher thread.
    pub fn launch(
        stream: TcpStream,
        id: usize,
        caps: Caps,
        directory: Arc<Directory>,
        task_argv: Option<Vec<String>>,
    ) -> Result<Session, Error> {
        let write_stream = stream.try_clone().map_err(|_| Error::Io)?;
        let abort_stream = stream.try_clone().ok();

        let (cols, rows) = if caps.ctl {
            (DEFAULT_COLS, DEFAULT_ROWS)
        } else {
            (DUMB_COLS, DUMB_ROWS)
        };

        let term = Terminal::new(DEFAULT_COLS, DEFAULT_ROWS, HISTORY_LINES)
            .map_err(|_| Error::NoMemory)?;

        let service_name = format!("telnet/{}.{}", std::process::id(), id);

        let inner = Arc::new(Inner {
            id,
            service_name: service_name.clone(),
            caps,
            send: Mutex::new(SendHalf {
                out: OutBuf {
                    stream: write_stream,
                    buf: Vec::with_capacity(SEND_BUF_SIZE),
                    cursor_col: 0,
                    cursor_row: 0,
                    cols,
                    rows,
                    broken: false,
                },
                term,
                vt: Vt100::new(caps.ctl && caps.rgb),
                curs_visible: true,
                map: None,
            }),
            recv: Mutex::new(RecvHalf {
                stream,
                telnet: TelnetDecoder::new(),
                decoded: VecDeque::new(),
                input: InputDecoder::new(),
                events: VecDeque::new(),
                task: None,
                task_finished: false,
                socket_closed: false,
                client_connections: 0,
                aborted: false,
            }),
            lifecycle: Condvar::new(),
        });
        let session = Session { inner: Arc::clone(&inner) };

        // Force character mode before anything else reaches the peer,
        // then put the screen into a known state.
        {
            let mut send = inner.send.lock().map_err(|_| Error::Io)?;
            let SendHalf { out, vt, .. } = &mut *send;
            out.send_raw(&FORCE_CHARACTER_MODE)?;
            if caps.ctl {
                let mut sink = ByteOut { out: &mut *out };
                vt.sgr_reset(&mut sink);
                vt.cls(&mut sink);
                vt.set_pos(0, 0, &mut sink);
                vt.set_button_reporting(true, &mut sink);
            }
            out.flush()?;
        }

        directory.register(&service_name, session.clone())?;
        info!("session {id}: registered as {service_name}");

        // Spawn the attached task; a failed spawn flips task_finished
        // immediately so the destroy predicate can be reached.
        match task_argv {
            Some(argv) if !argv.is_empty() => {
                let watcher_inner = Arc::clone(&inner);
                match task::spawn_watched(&argv, move || {
                    // Unblock a reader stuck in recv before taking the
                    // lock it holds.
                    if let Some(stream) = &abort_stream {
                        let _ = stream.shutdown(Shutdown::Both);
                    }
                    if let Ok(mut recv) = watcher_inner.recv.lock() {
                        recv.task_finished = true;
                        recv.aborted = true;
                    }
                    watcher_inner.lifecycle.notify_all();
                }) {
                    Ok(task) => {
                        if let Ok(mut recv) = inner.recv.lock() {
                            recv.task = Some(task);
                        }
                    }
                    Err(err) => {
                        error!("session {id}: spawning task failed: {err}");
                        if let Ok(mut recv) = inner.recv.lock() {
                            recv.task_finished = true;
                            recv.aborted = true;
                        }
                        inner.lifecycle.notify_all();
                    }
                }
            }
            _ => {
                // No attached task; the lifecycle loop treats the task
                // as finished once the socket goes away.
            }
        }

        // Lifecycle watcher: waits for the destroy predicate and tears
        // the session down.
        let lifecycle_inner = Arc::clone(&inner);
        std::thread::spawn(move || {
            lifecycle_inner.lifecycle_loop(&directory);
        });

        Ok(session)
    }

    pub fn id(&self) -> usize {
        self.inner.id
    }

    pub fn service_name(&self) -> &str {
        &self.inner.service_name
    }

    pub fn caps(&self) -> Caps {
        self.inner.caps
    }

    /// A terminal client attached through the directory.
    pub(crate) fn client_connect(&self) -> Result<(), Error> {
        {
            let mut recv = self.inner.recv.lock().map_err(|_| Error::Closed)?;
            recv.client_connections += 1;
            // Refuse sessions that are already on their way out.
            if recv.task_finished || recv.socket_closed {
                recv.client_connections -= 1;
                return Err(Error::NoEntry);
            }
            debug!(
                "session {}: client connected ({} now)",
                self.inner.id, recv.client_connections
            );
        }
        // Force character mode again for this client's benefit.
        let mut send = self.inner.send.lock().map_err(|_| Error::Closed)?;
        let _ = send.out.send_raw(&FORCE_CHARACTER_MODE);
        let _ = send.out.flush();
        Ok(())
    }

    /// The terminal client went away.
    pub fn client_disconnect(&self) {
        if let Ok(mut recv) = self.inner.recv.lock() {
            debug_assert!(recv.client_connections > 0);
            recv.client_connections = recv.client_connections.saturating_sub(1);
        }
        self.inner.lifecycle.notify_all();
    }

    /// Tells whether the session is shutting down.
    pub fn is_zombie(&self) -> bool {
        match self.inner.recv.lock() {
            Ok(recv) => recv.task_finished || recv.socket_closed,
            Err(_) => true,
        }
    }

    /// Reads decoded application bytes, blocking until at least one is
    /// available.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut recv = self.inner.recv.lock().map_err(|_| Error::Closed)?;
        while recv.decoded.is_empty() {
            self.inner.pump_locked(&mut recv)?;
        }
        let count = buf.len().min(recv.decoded.len());
        for slot in buf.iter_mut().take(count) {
            *slot = recv.decoded.pop_front().unwrap_or(0);
        }
        Ok(count)
    }

    /// Returns the next cons-event, driving the receiver until one is
    /// queued.
    pub fn get_event(&self) -> Result<ConsEvent, Error> {
        let mut recv = self.inner.recv.lock().map_err(|_| Error::Closed)?;
        loop {
            if let Some(event) = recv.events.pop_front() {
                return Ok(event);
            }

            if !recv.decoded.is_empty() {
                let bytes: Vec<u8> = recv.decoded.drain(..).collect();
                let RecvHalf { input, events, .. } = &mut *recv;
                let mut sink = EventSink { events };
                for byte in bytes {
                    input.feed(byte, &mut sink);
                }
                continue;
            }

            self.inner.pump_locked(&mut recv)?;
        }
    }
}

struct EventSink<'a> {
    events: &'a mut VecDeque<ConsEvent>,
}

impl InputSink for EventSink<'_> {
    fn key(&mut self, key: KeyInput) {
        // Each decoded keystroke becomes a press followed by a release.
        self.events.push_back(ConsEvent::Key { dir: KeyDir::Press, key });
        self.events.push_back(ConsEvent::Key { dir: KeyDir::Release, key });
    }

    fn pos(&mut self, event: PosEvent) {
        self.events.push_back(ConsEvent::Pos(event));
    }
}

impl Inner {
    /// Receives one chunk from the socket and runs it through the telnet
    /// decoder. Called with the receive lock held.
    pub(crate) fn pump_locked(&self, recv: &mut RecvHalf) -> Result<(), Error> {
        if recv.aborted || recv.socket_closed {
            return Err(Error::Closed);
        }

        let mut buf = [0u8; RECV_BUF_SIZE];
        let count = match recv.stream.read(&mut buf) {
            Ok(count) => count,
            Err(err) => {
                debug!("session {}: receive failed: {err}", self.id);
                recv.socket_closed = true;
                recv.aborted = true;
                self.lifecycle.notify_all();
                return Err(Error::Io);
            }
        };

        if count == 0 {
            info!("session {}: peer closed the connection", self.id);
            recv.socket_closed = true;
            recv.aborted = true;
            self.lifecycle.notify_all();
            return Err(Error::Closed);
        }

        let mut out = TelnetOutput::default();
        recv.telnet.decode(&buf[..count], &mut out);

        if !out.reply.is_empty() {
            // Receive -> send is the one allowed nesting order.
            if let Ok(mut send) = self.send.lock() {
                let _ = send.out.send_raw(&out.reply);
                let _ = send.out.flush();
            }
        }

        for (cols, rows) in out.resize {
            self.apply_resize(recv, cols, rows);
        }

        recv.decoded.extend(out.data);
        Ok(())
    }

    fn apply_resize(&self, recv: &mut RecvHalf, cols: u16, rows: u16) {
        info!("session {}: window size {cols}x{rows}", self.id);

        let Ok(mut send) = self.send.lock() else { return };

        if send
            .term
            .resize(cols as usize, rows as usize, HISTORY_LINES, &mut NullSink)
            .is_err()
        {
            debug!("session {}: unusable window size, ignored", self.id);
            return;
        }

        send.out.cols = cols as usize;
        send.out.rows = rows as usize;
        send.out.clamp_cursor();
        drop(send);

        recv.events.push_back(ConsEvent::Resize);
        self.lifecycle.notify_all();
    }

    fn destroy_predicate(recv: &RecvHalf) -> bool {
        recv.task_finished && recv.socket_closed && recv.client_connections == 0
    }

    fn lifecycle_loop(&self, directory: &Directory) {
        let mut recv = match self.recv.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };

        while !Self::destroy_predicate(&recv) {
            if recv.task_finished {
                // The user task is gone; the connection has no purpose.
                recv.socket_closed = true;
                recv.aborted = true;
                let _ = recv.stream.shutdown(Shutdown::Both);
            } else if recv.socket_closed {
                // The peer went away; take the task down. Without one,
                // there is nothing left to wait for.
                match &recv.task {
                    Some(task) => task.kill(),
                    None => recv.task_finished = true,
                }
            }

            recv = match self.lifecycle.wait_timeout(recv, LIFECYCLE_TICK) {
                Ok((guard, _)) => guard,
                Err(_) => return,
            };
        }

        drop(recv);
        self.teardown(directory);
    }

    fn teardown(&self, directory: &Directory) {
        directory.unregister(&self.service_name);
        info!("session {}: destroying", self.id);

        if let Ok(mut send) = self.send.lock() {
            if self.caps.ctl {
                let SendHalf { out, vt, .. } = &mut *send;
                {
                    let mut sink = ByteOut { out: &mut *out };
                    vt.set_button_reporting(false, &mut sink);
                    vt.sgr_reset(&mut sink);
                    vt.cls(&mut sink);
                    vt.set_pos(0, 0, &mut sink);
                }
                let _ = out.flush();
            }
            // FIN whenever possible; the read side is already dead.
            let _ = send.out.stream.shutdown(Shutdown::Write);
        }
    }
}

/// Width in columns of a glyph on the grid.
pub(crate) fn glyph_width(ch: char) -> usize {
    let code = ch as u32;
    // CJK unified, Hangul, Hiragana/Katakana, fullwidth forms.
    let wide = matches!(code,
        0x1100..=0x115f
        | 0x2e80..=0x303e
        | 0x3041..=0x33ff
        | 0x3400..=0x4dbf
        | 0x4e00..=0x9fff
        | 0xa000..=0xa4cf
        | 0xac00..=0xd7a3
        | 0xf900..=0xfaff
        | 0xfe30..=0xfe4f
        | 0xff00..=0xff60
        | 0xffe0..=0xffe6
        | 0x20000..=0x2fffd
        | 0x30000..=0x3fffd);
    if wide {
        2
    } else {
        1
    }
}
