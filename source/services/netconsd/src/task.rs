// Copyright 2025 Oriel OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Attached user task — spawn, watch, kill
//! OWNERS: @runtime
//! PUBLIC API: spawn_watched, TaskHandle
//! INVARIANTS: The exit callback fires exactly once, whether the task
//!   exits on its own or is killed
//!
//! Each session attaches one user task (the interactive shell
//! equivalent). A watcher thread waits for it and notifies the session,
//! which uses the signal to drive its destroy predicate.

use std::io;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};

use log::{info, warn};

/// Handle to a watched task.
pub struct TaskHandle {
    child: Arc<Mutex<Child>>,
    id: u32,
}

impl TaskHandle {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Requests termination; exit reporting still happens through the
    /// watcher.
    pub fn kill(&self) {
        if let Ok(mut child) = self.child.lock() {
            let _ = child.kill();
        }
    }
}

/// Spawns `argv` and watches it from a thread; `on_exit` runs once the
/// task is gone.
pub fn spawn_watched(
    argv: &[String],
    on_exit: impl FnOnce() + Send + 'static,
) -> io::Result<TaskHandle> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty argv"))?;

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    let id = child.id();
    info!("spawned task {id}: {program}");

    let child = Arc::new(Mutex::new(child));
    let handle = TaskHandle { child: Arc::clone(&child), id };

    std::thread::spawn(move || {
        // Child::wait needs exclusive access; polling keeps `kill`
        // usable from the session side.
        loop {
            match child.lock() {
                Ok(mut guard) => match guard.try_wait() {
                    Ok(Some(status)) => {
                        info!("task {id} terminated: {status}");
                        break;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        warn!("waiting for task {id} failed: {err}");
                        break;
                    }
                },
                Err(_) => break,
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
        on_exit();
    });

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn exit_callback_fires() {
        let (tx, rx) = mpsc::channel();
        let handle = spawn_watched(&["true".into()], move || {
            let _ = tx.send(());
        })
        .expect("spawn true");
        assert!(handle.id() > 0);
        rx.recv_timeout(std::time::Duration::from_secs(5))
            .expect("exit notification");
    }

    #[test]
    fn kill_terminates_the_task() {
        let (tx, rx) = mpsc::channel();
        let handle = spawn_watched(&["sleep".into(), "30".into()], move || {
            let _ = tx.send(());
        })
        .expect("spawn sleep");
        handle.kill();
        rx.recv_timeout(std::time::Duration::from_secs(5))
            .expect("exit notification after kill");
    }

    #[test]
    fn empty_argv_is_rejected() {
        assert!(spawn_watched(&[], || {}).is_err());
    }
}
