// Copyright 2025 Oriel OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Process-wide service directory for console sessions
//! OWNERS: @runtime
//! PUBLIC API: Directory (register/unregister/attach/list)
//! INVARIANTS: Names are unique; registration and deregistration are
//!   atomic; attaching bumps the session's client count or fails
//!
//! The directory is the in-process stand-in for the system location
//! service: sessions register one virtual-terminal name each, terminal
//! clients look the name up to attach.

use std::collections::BTreeMap;
use std::sync::Mutex;

use log::warn;

use crate::session::Session;
use crate::Error;

/// Name -> session registry.
#[derive(Default)]
pub struct Directory {
    entries: Mutex<BTreeMap<String, Session>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `session` under `name`.
    pub fn register(&self, name: &str, session: Session) -> Result<(), Error> {
        let mut entries = self.entries.lock().map_err(|_| Error::Closed)?;
        if entries.contains_key(name) {
            return Err(Error::AlreadyExists);
        }
        entries.insert(name.into(), session);
        Ok(())
    }

    /// Removes `name`; unknown names are ignored.
    pub fn unregister(&self, name: &str) {
        match self.entries.lock() {
            Ok(mut entries) => {
                entries.remove(name);
            }
            Err(_) => warn!("directory poisoned while unregistering {name}"),
        }
    }

    /// Looks up `name` and attaches a terminal client to it.
    ///
    /// Sessions already shutting down are refused. The caller must pair
    /// this with [`Session::client_disconnect`].
    pub fn attach(&self, name: &str) -> Result<Session, Error> {
        let session = {
            let entries = self.entries.lock().map_err(|_| Error::Closed)?;
            entries.get(name).cloned().ok_or(Error::NoEntry)?
        };
        session.client_connect()?;
        Ok(session)
    }

    /// Registered service names, sorted.
    pub fn list(&self) -> Vec<String> {
        match self.entries.lock() {
            Ok(entries) => entries.keys().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_names_fail_cleanly() {
        let directory = Directory::new();
        assert_eq!(directory.attach("telnet/1.1").err(), Some(Error::NoEntry));
        directory.unregister("telnet/1.1");
        assert!(directory.list().is_empty());
    }
}
