// Copyright 2025 Oriel OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: TCP listener and session accept loop
//! OWNERS: @runtime
//! PUBLIC API: Config, run_server, Server
//! INVARIANTS: One session per accepted connection; the accept loop owns
//!   no session state and survives individual session failures

use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{error, info};

use crate::locator::Directory;
use crate::session::{Caps, Session};

/// Service configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    /// Disable all terminal control sequences.
    pub no_ctl: bool,
    /// Disable RGB color advertisement.
    pub no_rgb: bool,
    /// Command attached to each session; `None` runs sessions without a
    /// user task.
    pub task_argv: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: crate::DEFAULT_PORT,
            no_ctl: false,
            no_rgb: false,
            task_argv: None,
        }
    }
}

/// Running service instance.
pub struct Server {
    addr: SocketAddr,
    directory: Arc<Directory>,
    shutdown: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl Server {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    /// Stops accepting new connections. Established sessions keep
    /// running until their own lifecycle ends.
    pub fn shutdown(mut self) {
        self.stop_accepting();
    }

    fn stop_accepting(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        // Wake the blocking accept with a throwaway connection.
        let _ = TcpStream::connect(self.addr);
        if let Some(thread) = self.accept_thread.take() {
            let _ = thread.join();
        }
    }

    /// Blocks until the accept loop exits.
    pub fn wait(mut self) {
        if let Some(thread) = self.accept_thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.accept_thread.is_some() {
            self.stop_accepting();
        }
    }
}

/// Binds the listener and starts the accept loop. Port 0 picks an
/// ephemeral port, reported by [`Server::local_addr`].
pub fn run_server(config: Config) -> io::Result<Server> {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.port))?;
    let addr = listener.local_addr()?;
    let directory = Arc::new(Directory::new());
    let shutdown = Arc::new(AtomicBool::new(false));

    info!(
        "remote console service listening on {addr} (ctl: {}, rgb: {})",
        !config.no_ctl,
        !config.no_ctl && !config.no_rgb
    );

    let caps = Caps {
        ctl: !config.no_ctl,
        rgb: !config.no_ctl && !config.no_rgb,
    };

    let accept_directory = Arc::clone(&directory);
    let accept_shutdown = Arc::clone(&shutdown);
    let accept_thread = std::thread::spawn(move || {
        let session_ids = AtomicUsize::new(1);
        for stream in listener.incoming() {
            if accept_shutdown.load(Ordering::Acquire) {
                break;
            }
            match stream {
                Ok(stream) => {
                    let id = session_ids.fetch_add(1, Ordering::Relaxed);
                    info!("session {id}: connection from {:?}", stream.peer_addr().ok());
                    if let Err(err) = Session::launch(
                        stream,
                        id,
                        caps,
                        Arc::clone(&accept_directory),
                        config.task_argv.clone(),
                    ) {
                        error!("session {id}: setup failed: {err}");
                    }
                }
                Err(err) => {
                    error!("accept failed: {err}");
                }
            }
        }
    });

    Ok(Server {
        addr,
        directory,
        shutdown,
        accept_thread: Some(accept_thread),
    })
}
