//! Session credential persistence.
//!
//! A signed-in session is exactly two values: the bearer token and the raw
//! cached user record. [`SessionSlot`] names them, [`SessionBackend`] is the
//! pluggable storage seam, and [`SessionVault`] binds a backend to one
//! application namespace with typed accessors.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use thiserror::Error;

/// The values a session persists. Closed set: storage backends never see
/// free-form keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionSlot {
    /// Bearer token forwarded on every request.
    AccessToken,
    /// Raw JSON user record cached at login.
    CachedUser,
}

impl SessionSlot {
    /// Stable storage key for this slot. Changing these orphans previously
    /// stored values.
    pub fn storage_key(self) -> &'static str {
        match self {
            Self::AccessToken => "access-token",
            Self::CachedUser => "cached-user",
        }
    }

    const ALL: [SessionSlot; 2] = [SessionSlot::AccessToken, SessionSlot::CachedUser];
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionStoreError {
    #[error("session value not stored")]
    Missing,
    #[error("session store unavailable: {0}")]
    Unavailable(String),
    #[error("session store backend failure: {0}")]
    Backend(String),
}

/// Pluggable storage for session slots, namespaced by service.
pub trait SessionBackend: Send + Sync {
    fn write(
        &self,
        service: &str,
        slot: SessionSlot,
        value: &str,
    ) -> Result<(), SessionStoreError>;

    fn read(&self, service: &str, slot: SessionSlot) -> Result<String, SessionStoreError>;

    fn remove(&self, service: &str, slot: SessionSlot) -> Result<(), SessionStoreError>;
}

/// Process-local backend used by tests and the smoke binary. Nothing
/// survives the process.
#[derive(Clone, Default)]
pub struct MemorySessionBackend {
    slots: Arc<RwLock<HashMap<(String, SessionSlot), String>>>,
}

impl SessionBackend for MemorySessionBackend {
    fn write(
        &self,
        service: &str,
        slot: SessionSlot,
        value: &str,
    ) -> Result<(), SessionStoreError> {
        let mut slots = self
            .slots
            .write()
            .map_err(|_| SessionStoreError::Backend("poisoned lock".to_owned()))?;
        slots.insert((service.to_owned(), slot), value.to_owned());
        Ok(())
    }

    fn read(&self, service: &str, slot: SessionSlot) -> Result<String, SessionStoreError> {
        let slots = self
            .slots
            .read()
            .map_err(|_| SessionStoreError::Backend("poisoned lock".to_owned()))?;
        slots
            .get(&(service.to_owned(), slot))
            .cloned()
            .ok_or(SessionStoreError::Missing)
    }

    fn remove(&self, service: &str, slot: SessionSlot) -> Result<(), SessionStoreError> {
        let mut slots = self
            .slots
            .write()
            .map_err(|_| SessionStoreError::Backend("poisoned lock".to_owned()))?;
        if slots.remove(&(service.to_owned(), slot)).is_none() {
            return Err(SessionStoreError::Missing);
        }
        Ok(())
    }
}

/// OS keyring backend. Each slot maps to one keyring entry under the
/// service name.
#[cfg(feature = "os-keyring")]
#[derive(Default, Clone, Copy)]
pub struct KeyringSessionBackend;

#[cfg(feature = "os-keyring")]
impl KeyringSessionBackend {
    fn entry(service: &str, slot: SessionSlot) -> Result<keyring::Entry, SessionStoreError> {
        keyring::Entry::new(service, slot.storage_key())
            .map_err(|err| SessionStoreError::Backend(err.to_string()))
    }
}

#[cfg(feature = "os-keyring")]
impl SessionBackend for KeyringSessionBackend {
    fn write(
        &self,
        service: &str,
        slot: SessionSlot,
        value: &str,
    ) -> Result<(), SessionStoreError> {
        Self::entry(service, slot)?
            .set_password(value)
            .map_err(|err| SessionStoreError::Backend(err.to_string()))
    }

    fn read(&self, service: &str, slot: SessionSlot) -> Result<String, SessionStoreError> {
        Self::entry(service, slot)?
            .get_password()
            .map_err(|err| match err {
                keyring::Error::NoEntry => SessionStoreError::Missing,
                other => SessionStoreError::Backend(other.to_string()),
            })
    }

    fn remove(&self, service: &str, slot: SessionSlot) -> Result<(), SessionStoreError> {
        Self::entry(service, slot)?
            .delete_credential()
            .map_err(|err| match err {
                keyring::Error::NoEntry => SessionStoreError::Missing,
                other => SessionStoreError::Backend(other.to_string()),
            })
    }
}

/// A session backend bound to one application namespace, with a typed
/// accessor per slot.
///
/// Reads degrade to `None` on any backend failure: the caller's contract is
/// "treat as unauthenticated", so a broken keyring reads the same as a
/// signed-out session.
#[derive(Clone)]
pub struct SessionVault<B: SessionBackend> {
    backend: B,
    service: String,
}

impl<B: SessionBackend> SessionVault<B> {
    pub fn new(backend: B, service: impl Into<String>) -> Self {
        Self {
            backend,
            service: service.into(),
        }
    }

    /// The stored bearer credential, when present and readable.
    pub fn access_token(&self) -> Option<String> {
        self.backend
            .read(&self.service, SessionSlot::AccessToken)
            .ok()
    }

    pub fn set_access_token(&self, token: &str) -> Result<(), SessionStoreError> {
        self.backend
            .write(&self.service, SessionSlot::AccessToken, token)
    }

    /// The cached user record (raw JSON), when present and readable.
    pub fn cached_user(&self) -> Option<String> {
        self.backend
            .read(&self.service, SessionSlot::CachedUser)
            .ok()
    }

    pub fn set_cached_user(&self, record: &str) -> Result<(), SessionStoreError> {
        self.backend
            .write(&self.service, SessionSlot::CachedUser, record)
    }

    /// Remove every session slot. Missing values are not an error; the
    /// vault ends up empty either way.
    pub fn clear_session(&self) -> Result<(), SessionStoreError> {
        for slot in SessionSlot::ALL {
            match self.backend.remove(&self.service, slot) {
                Ok(()) | Err(SessionStoreError::Missing) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}
