// Copyright 2025 Oriel OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Integration tests for the session I/O paths over loopback TCP
//! OWNERS: @runtime
//! NOTE: Tests only. Covers negotiation bytes, the dumb and control
//!   write paths, directory attach rules and read-side decoding.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use netconsd::session::Session;
use netconsd::telnet::FORCE_CHARACTER_MODE;
use netconsd::{run_server, Config, Error, Server};

fn start(no_ctl: bool) -> Server {
    run_server(Config {
        port: 0,
        no_ctl,
        no_rgb: false,
        task_argv: None,
    })
    .expect("bind loopback listener")
}

fn connect(server: &Server) -> TcpStream {
    let stream = TcpStream::connect(server.local_addr()).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");
    stream
}

fn attach_first(server: &Server) -> Session {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(name) = server.directory().list().first() {
            return server.directory().attach(name).expect("attach");
        }
        assert!(Instant::now() < deadline, "no session registered in time");
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn read_some(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = [0u8; 4096];
    let n = stream.read(&mut buf).expect("read from session");
    buf[..n].to_vec()
}

#[test]
fn greeting_forces_character_mode() {
    let server = start(false);
    let mut client = connect(&server);

    let mut greeting = Vec::new();
    while greeting.len() < FORCE_CHARACTER_MODE.len() {
        greeting.extend(read_some(&mut client));
    }
    assert_eq!(&greeting[..FORCE_CHARACTER_MODE.len()], &FORCE_CHARACTER_MODE);
    // Control mode also resets attributes and clears the screen.
    let text = String::from_utf8_lossy(&greeting).into_owned();
    assert!(text.contains("\x1b[2J") || greeting.len() == FORCE_CHARACTER_MODE.len());
}

#[test]
fn dumb_session_expands_lf_and_reports_fixed_size() {
    let server = start(true);
    let mut client = connect(&server);

    // Consume the greeting first.
    let mut seen = Vec::new();
    while seen.len() < FORCE_CHARACTER_MODE.len() {
        seen.extend(read_some(&mut client));
    }

    let session = attach_first(&server);
    assert_eq!(session.get_size(), Ok((100, 1)));
    assert_eq!(session.write(b"ok\n").expect("write"), 3);

    let mut out = Vec::new();
    while !out.windows(4).any(|w| w == b"ok\r\n") {
        out.extend(read_some(&mut client));
    }

    // Cursor tracking follows the bytes; newline rewinds the column.
    assert_eq!(session.get_pos(), Ok((0, 0)));
    session.client_disconnect();
}

#[test]
fn control_session_renders_through_the_grid() {
    let server = start(false);
    let mut client = connect(&server);
    let mut seen = Vec::new();
    while seen.len() < FORCE_CHARACTER_MODE.len() {
        seen.extend(read_some(&mut client));
    }

    let session = attach_first(&server);
    assert_eq!(session.get_size(), Ok((80, 25)));

    session.write(b"ab").expect("write");
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut out = Vec::new();
    while !out.windows(2).any(|w| w == b"ab") {
        assert!(Instant::now() < deadline);
        out.extend(read_some(&mut client));
    }

    // The grid followed the write.
    assert_eq!(session.get_pos(), Ok((2, 0)));
    session.client_disconnect();
}

#[test]
fn map_requires_control_mode() {
    let server = start(true);
    let mut client = connect(&server);
    let mut seen = Vec::new();
    while seen.len() < FORCE_CHARACTER_MODE.len() {
        seen.extend(read_some(&mut client));
    }

    let session = attach_first(&server);
    assert_eq!(session.map(4, 2), Err(Error::NotSupported));
    session.client_disconnect();
}

#[test]
fn mapped_buffer_updates_render_the_rectangle() {
    let server = start(false);
    let mut client = connect(&server);
    let mut seen = Vec::new();
    while seen.len() < FORCE_CHARACTER_MODE.len() {
        seen.extend(read_some(&mut client));
    }

    let session = attach_first(&server);
    session.map(4, 2).expect("map");
    assert_eq!(session.map(4, 2), Err(Error::Busy));

    session
        .with_mapped(|cells, cols, _rows| {
            for (i, cell) in cells.iter_mut().enumerate() {
                cell.glyph = if i / cols == 0 { 'x' as u32 } else { 'y' as u32 };
            }
        })
        .expect("fill mapped buffer");

    session.update(0, 0, 4, 2).expect("update");

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut out = Vec::new();
    loop {
        let text = String::from_utf8_lossy(&out).into_owned();
        if text.contains("xxxx") && text.contains("yyyy") {
            break;
        }
        assert!(Instant::now() < deadline);
        out.extend(read_some(&mut client));
    }

    session.unmap().expect("unmap");
    // Updating without a mapping is a no-op.
    session.update(0, 0, 4, 2).expect("update after unmap");
    session.client_disconnect();
}

#[test]
fn read_strips_telnet_and_maps_cr() {
    let server = start(true);
    let mut client = connect(&server);
    let mut seen = Vec::new();
    while seen.len() < FORCE_CHARACTER_MODE.len() {
        seen.extend(read_some(&mut client));
    }

    let session = attach_first(&server);
    client
        .write_all(&[b'h', b'i', 0xff, 0xfb, 0x01, b'\r', 0x00])
        .expect("send bytes");

    let mut buf = [0u8; 16];
    let mut text = Vec::new();
    while text.len() < 3 {
        let n = session.read(&mut buf).expect("session read");
        text.extend_from_slice(&buf[..n]);
    }
    assert_eq!(text, b"hi\n");
    session.client_disconnect();
}

#[test]
fn second_registration_of_same_name_is_rejected() {
    let server = start(true);
    let mut client = connect(&server);
    let mut seen = Vec::new();
    while seen.len() < FORCE_CHARACTER_MODE.len() {
        seen.extend(read_some(&mut client));
    }

    let session = attach_first(&server);
    let name = session.service_name().to_string();
    assert_eq!(
        server.directory().register(&name, session.clone()).err(),
        Some(Error::AlreadyExists)
    );
    session.client_disconnect();
}
