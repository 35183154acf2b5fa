//! Control files exposing the session at the namespace root.
//!
//! - `username`: read/write, stores what was written;
//! - `password`: write-only in practice, reads a placeholder;
//! - `logout`: writing a non-zero integer logs out.
//!
//! Credentials are compared and stored with trailing CR/LF removed, so
//! `echo alice > username` sets the username `alice`. The username file
//! itself keeps the literal bytes.

use async_trait::async_trait;
use std::sync::Arc;

use super::manager::Session;
use crate::constants::{LOGOUT_PLACEHOLDER, PASSWORD_PLACEHOLDER};
use crate::vfs::{
    resized, spliced, trim_line_end, EntryHandler, StaticModule, VfsResult, VirtualEntry,
};

/// File name of the username control file.
pub const USERNAME_FILE: &str = "username";
/// File name of the password control file.
pub const PASSWORD_FILE: &str = "password";
/// File name of the logout control file.
pub const LOGOUT_FILE: &str = "logout";

/// Build the module holding the session's control files.
pub fn control_module(session: Arc<Session>) -> StaticModule {
    let username = session.username();
    let username_content = if username.is_empty() {
        Vec::new()
    } else {
        format!("{username}\n").into_bytes()
    };

    StaticModule::new([
        VirtualEntry::file(USERNAME_FILE, username_content)
            .with_handler(Arc::new(UsernameHandler::new(session.clone()))),
        VirtualEntry::file(PASSWORD_FILE, PASSWORD_PLACEHOLDER)
            .with_handler(Arc::new(PasswordHandler::new(session.clone()))),
        VirtualEntry::file(LOGOUT_FILE, LOGOUT_PLACEHOLDER)
            .with_handler(Arc::new(LogoutHandler::new(session))),
    ])
}

fn credential(value: &[u8]) -> String {
    String::from_utf8_lossy(trim_line_end(value)).into_owned()
}

/// Stores writes verbatim and propagates the trimmed value as the username.
pub struct UsernameHandler {
    session: Arc<Session>,
}

impl UsernameHandler {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl EntryHandler for UsernameHandler {
    async fn write(&self, entry: &VirtualEntry, data: &[u8], offset: u64) -> VfsResult<u32> {
        let content = entry.splice(data, offset)?;
        self.session.set_username(&credential(&content)).await;
        Ok(data.len() as u32)
    }

    async fn truncate(&self, entry: &VirtualEntry, size: u64) -> VfsResult<()> {
        let content = entry.resize(size)?;
        self.session.set_username(&credential(&content)).await;
        Ok(())
    }
}

/// Updates the session password; the file content stays the placeholder.
pub struct PasswordHandler {
    session: Arc<Session>,
}

impl PasswordHandler {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl EntryHandler for PasswordHandler {
    async fn write(&self, entry: &VirtualEntry, data: &[u8], offset: u64) -> VfsResult<u32> {
        let current = self.session.password();
        let value = spliced(current.as_bytes(), data, offset)?;
        self.session.set_password(&credential(&value)).await;
        entry.touch_times();
        Ok(data.len() as u32)
    }

    async fn truncate(&self, entry: &VirtualEntry, size: u64) -> VfsResult<()> {
        let current = self.session.password();
        let value = resized(current.as_bytes(), size)?;
        self.session.set_password(&credential(&value)).await;
        entry.touch_times();
        Ok(())
    }
}

/// Logs out when a non-zero integer is written. Anything else is ignored.
pub struct LogoutHandler {
    session: Arc<Session>,
}

impl LogoutHandler {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl EntryHandler for LogoutHandler {
    async fn write(&self, _entry: &VirtualEntry, data: &[u8], _offset: u64) -> VfsResult<u32> {
        let truthy = std::str::from_utf8(data)
            .ok()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .is_some_and(|n| n != 0);
        if truthy {
            tracing::info!("logout requested");
            self.session.deauthenticate().await;
        }
        Ok(data.len() as u32)
    }

    async fn truncate(&self, _entry: &VirtualEntry, _size: u64) -> VfsResult<()> {
        Ok(())
    }
}
