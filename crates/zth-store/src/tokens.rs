//! Credential storage for the bearer-token lifecycle.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::file::JsonFile;
use crate::Result;

const ACCESS_TOKEN_KEY: &str = "access_token";
const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// The current access and refresh credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Short-lived bearer token attached to every request.
    pub access_token: Option<String>,
    /// Long-lived token exchanged for a new access token.
    pub refresh_token: Option<String>,
}

#[derive(Debug)]
struct Inner {
    file: JsonFile,
    credentials: Credentials,
}

/// Shared handle to the credential store.
///
/// Cloning the handle shares the underlying credentials, so the gateway, the
/// connection handshake, and the session all observe the same tokens.
#[derive(Debug, Clone)]
pub struct TokenStore {
    inner: Arc<Mutex<Inner>>,
}

impl TokenStore {
    /// Opens the credential file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let file = JsonFile::at(path);
        let mut map: BTreeMap<String, String> = file.load()?;
        let credentials = Credentials {
            access_token: map.remove(ACCESS_TOKEN_KEY),
            refresh_token: map.remove(REFRESH_TOKEN_KEY),
        };
        debug!(
            has_access = credentials.access_token.is_some(),
            has_refresh = credentials.refresh_token.is_some(),
            "Token store opened"
        );
        Ok(Self::from_parts(file, credentials))
    }

    /// Creates a store that keeps credentials in memory only.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_parts(JsonFile::in_memory(), Credentials::default())
    }

    fn from_parts(file: JsonFile, credentials: Credentials) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner { file, credentials })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the current access token.
    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.lock().credentials.access_token.clone()
    }

    /// Returns the current refresh token.
    #[must_use]
    pub fn refresh_token(&self) -> Option<String> {
        self.lock().credentials.refresh_token.clone()
    }

    /// Returns a copy of both credentials.
    #[must_use]
    pub fn credentials(&self) -> Credentials {
        self.lock().credentials.clone()
    }

    /// Returns `true` if an access token is present.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.lock().credentials.access_token.is_some()
    }

    /// Replaces both tokens, as after a login or registration.
    pub fn set_tokens(&self, access: impl Into<String>, refresh: impl Into<String>) -> Result<()> {
        let mut inner = self.lock();
        inner.credentials = Credentials {
            access_token: Some(access.into()),
            refresh_token: Some(refresh.into()),
        };
        persist(&inner)
    }

    /// Replaces the access token, keeping the refresh token.
    pub fn set_access_token(&self, access: impl Into<String>) -> Result<()> {
        let mut inner = self.lock();
        inner.credentials.access_token = Some(access.into());
        persist(&inner)
    }

    /// Forgets both tokens.
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.credentials = Credentials::default();
        persist(&inner)
    }
}

fn persist(inner: &Inner) -> Result<()> {
    let mut map = BTreeMap::new();
    if let Some(access) = &inner.credentials.access_token {
        map.insert(ACCESS_TOKEN_KEY.to_string(), access.clone());
    }
    if let Some(refresh) = &inner.credentials.refresh_token {
        map.insert(REFRESH_TOKEN_KEY.to_string(), refresh.clone());
    }
    inner.file.save(&map)
}
