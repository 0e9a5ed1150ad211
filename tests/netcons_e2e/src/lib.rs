// Copyright 2025 Oriel OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Shared helpers for the remote console end-to-end tests
//! OWNERS: @runtime
//! NOTE: Test support only; the actual scenarios live in `tests/`.

use std::io::Read;
use std::net::TcpStream;
use std::time::{Duration, Instant};

use netconsd::session::Session;
use netconsd::telnet::FORCE_CHARACTER_MODE;
use netconsd::{run_server, Config, Server};

pub const WAIT: Duration = Duration::from_secs(10);

/// Starts a service instance on an ephemeral port.
pub fn start_server(no_ctl: bool, task_argv: Option<Vec<String>>) -> Server {
    run_server(Config {
        port: 0,
        no_ctl,
        no_rgb: false,
        task_argv,
    })
    .expect("bind loopback listener")
}

/// Connects a telnet client and consumes the opening negotiation,
/// returning the stream and everything read so far.
pub fn connect_consuming_greeting(server: &Server) -> (TcpStream, Vec<u8>) {
    let mut stream = TcpStream::connect(server.local_addr()).expect("connect");
    stream
        .set_read_timeout(Some(WAIT))
        .expect("set read timeout");

    let mut greeting = Vec::new();
    let mut buf = [0u8; 1024];
    while greeting.len() < FORCE_CHARACTER_MODE.len() {
        let n = stream.read(&mut buf).expect("read greeting");
        assert!(n > 0, "connection closed during greeting");
        greeting.extend_from_slice(&buf[..n]);
    }
    (stream, greeting)
}

/// Waits for the session to register and attaches a terminal client.
pub fn attach_session(server: &Server) -> Session {
    let deadline = Instant::now() + WAIT;
    loop {
        if let Some(name) = server.directory().list().first() {
            return server.directory().attach(name).expect("attach to session");
        }
        assert!(Instant::now() < deadline, "session did not register");
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Polls until the directory has no sessions left.
pub fn wait_unregistered(server: &Server) {
    let deadline = Instant::now() + WAIT;
    while !server.directory().list().is_empty() {
        assert!(Instant::now() < deadline, "session never unregistered");
        std::thread::sleep(Duration::from_millis(20));
    }
}
