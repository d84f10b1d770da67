use anyhow::Result;
use std::sync::Mutex;

/// Where the session token lives between runs
pub trait StorageAdapter: Send + Sync {
    /// Store the bearer token
    fn store_credentials(&self, credentials: &str) -> Result<()>;

    /// Load the bearer token, if any
    fn load_credentials(&self) -> Result<Option<String>>;

    /// Clear the stored token
    fn clear_credentials(&self) -> Result<()>;
}

/// File-backed storage used by the CLI
#[derive(Debug, Clone)]
pub struct FileStorageAdapter {
    session_store: crate::session::SessionStore,
}

impl FileStorageAdapter {
    pub fn new() -> Result<Self> {
        let session_store = crate::session::SessionStore::new()?;
        Ok(Self { session_store })
    }

    pub fn with_store(session_store: crate::session::SessionStore) -> Self {
        Self { session_store }
    }
}

impl StorageAdapter for FileStorageAdapter {
    fn store_credentials(&self, credentials: &str) -> Result<()> {
        self.session_store.save(credentials)
    }

    fn load_credentials(&self) -> Result<Option<String>> {
        self.session_store.load()
    }

    fn clear_credentials(&self) -> Result<()> {
        self.session_store.delete()
    }
}

/// In-memory storage for embedding hosts that persist tokens themselves, and for tests
#[derive(Debug, Default)]
pub struct MemoryStorageAdapter {
    token: Mutex<Option<String>>,
}

impl MemoryStorageAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }
}

impl StorageAdapter for MemoryStorageAdapter {
    fn store_credentials(&self, credentials: &str) -> Result<()> {
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = Some(credentials.to_string());
        Ok(())
    }

    fn load_credentials(&self) -> Result<Option<String>> {
        Ok(self.token.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn clear_credentials(&self) -> Result<()> {
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}
