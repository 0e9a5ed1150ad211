// Copyright 2025 Oriel OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: End-to-end telnet session scenarios over loopback TCP
//! OWNERS: @runtime
//! NOTE: Tests only. Window-size negotiation, CR mapping, and the full
//!   lifecycle teardown including the attached task.

use std::io::{Read, Write};
use std::net::Shutdown;
use std::time::Duration;

use netcons_e2e::{attach_session, connect_consuming_greeting, start_server, wait_unregistered};
use netconsd::session::ConsEvent;
use netconsd::Error;

#[test]
fn naws_resize_reaches_the_client_as_an_event() {
    let server = start_server(false, None);
    let (mut client, _greeting) = connect_consuming_greeting(&server);
    let session = attach_session(&server);

    // The terminal client pumps events from its own thread, the way an
    // attached terminal would.
    let pump_session = session.clone();
    let pump = std::thread::spawn(move || pump_session.get_event());

    // WILL NAWS, then the 80x25 subnegotiation.
    client
        .write_all(&[0xff, 0xfb, 0x1f])
        .expect("send WILL NAWS");
    client
        .write_all(&[0xff, 0xfa, 0x1f, 0x00, 0x50, 0x00, 0x19, 0xff, 0xf0])
        .expect("send NAWS subnegotiation");

    let event = pump.join().expect("pump thread").expect("event");
    assert_eq!(event, ConsEvent::Resize);
    assert_eq!(session.get_size(), Ok((80, 25)));

    // The DO NAWS answer went out.
    let mut answer = Vec::new();
    let mut buf = [0u8; 64];
    while !answer.windows(3).any(|w| w == [0xff, 0xfd, 0x1f]) {
        let n = client.read(&mut buf).expect("read DO NAWS");
        assert!(n > 0);
        answer.extend_from_slice(&buf[..n]);
    }

    session.client_disconnect();
}

#[test]
fn keystrokes_become_press_release_pairs() {
    let server = start_server(true, None);
    let (mut client, _greeting) = connect_consuming_greeting(&server);
    let session = attach_session(&server);

    client.write_all(b"z").expect("send key");

    let first = session.get_event().expect("press");
    let second = session.get_event().expect("release");
    match (first, second) {
        (
            ConsEvent::Key { dir: netconsd::session::KeyDir::Press, key: down },
            ConsEvent::Key { dir: netconsd::session::KeyDir::Release, key: up },
        ) => {
            assert_eq!(down.ch, Some('z'));
            assert_eq!(up.ch, Some('z'));
        }
        other => panic!("unexpected event pair: {other:?}"),
    }

    session.client_disconnect();
}

#[test]
fn cr_lf_collapses_before_the_session_sees_it() {
    let server = start_server(true, None);
    let (mut client, _greeting) = connect_consuming_greeting(&server);
    let session = attach_session(&server);

    client.write_all(b"a\r\nb\r\x00c").expect("send text");

    let mut text = Vec::new();
    let mut buf = [0u8; 16];
    while text.len() < 5 {
        let n = session.read(&mut buf).expect("read");
        text.extend_from_slice(&buf[..n]);
    }
    assert_eq!(text, b"a\nb\nc");

    session.client_disconnect();
}

#[test]
fn closing_the_connection_destroys_the_session() {
    let server = start_server(false, Some(vec!["sleep".into(), "30".into()]));
    let (client, _greeting) = connect_consuming_greeting(&server);
    let session = attach_session(&server);

    // A reader must be parked in the session for EOF to be noticed,
    // like the terminal client's event loop.
    let pump_session = session.clone();
    let pump = std::thread::spawn(move || {
        loop {
            if pump_session.get_event().is_err() {
                break;
            }
        }
    });

    // Close our side; keep reading to observe the server's FIN.
    client.shutdown(Shutdown::Write).expect("half close");
    pump.join().expect("pump thread");
    assert!(session.is_zombie());
    session.client_disconnect();

    // The peer disappeared: the attached task is killed, the session
    // unregisters and finishes with a FIN.
    wait_unregistered(&server);

    let mut client = client;
    client
        .set_read_timeout(Some(Duration::from_secs(10)))
        .expect("read timeout");
    let mut buf = [0u8; 1024];
    loop {
        match client.read(&mut buf) {
            Ok(0) => break,
            Ok(_) => continue,
            Err(err) => panic!("expected FIN, got {err}"),
        }
    }
}

#[test]
fn attached_task_exit_ends_the_session() {
    let server = start_server(true, Some(vec!["true".into()]));
    let (mut client, _greeting) = connect_consuming_greeting(&server);

    // The task exits immediately; the session must reach its destroy
    // predicate without any client action.
    wait_unregistered(&server);

    // And the connection dies with it.
    client
        .set_read_timeout(Some(Duration::from_secs(10)))
        .expect("read timeout");
    let mut buf = [0u8; 1024];
    loop {
        match client.read(&mut buf) {
            Ok(0) => break,
            Ok(_) => continue,
            Err(_) => break,
        }
    }
}

#[test]
fn attaching_to_a_dying_session_is_refused() {
    let server = start_server(true, None);
    let (client, _greeting) = connect_consuming_greeting(&server);
    let session = attach_session(&server);
    let name = session.service_name().to_string();

    // Kill the connection and let the session notice.
    let pump_session = session.clone();
    let pump = std::thread::spawn(move || while pump_session.get_event().is_ok() {});
    drop(client);
    pump.join().expect("pump thread");

    assert_eq!(server.directory().attach(&name).err(), Some(Error::NoEntry));
    session.client_disconnect();
}
