use anyhow::{Context, Result};
use alumni_types::{CurrentUser, UserContext};

use crate::api::{ApiError, Authenticator};
use crate::storage::StorageAdapter;

/// Who is signed in, passed explicitly to whatever needs it.
///
/// A session starts anonymous, is hydrated from the persisted token at
/// startup, and is torn down by [`Session::logout`], which clears both the
/// in-memory identity and the stored token.
pub struct Session {
    storage: Box<dyn StorageAdapter>,
    token: Option<String>,
    user: Option<CurrentUser>,
}

impl Session {
    /// An anonymous session backed by `storage`.
    pub fn anonymous(storage: Box<dyn StorageAdapter>) -> Self {
        Self {
            storage,
            token: None,
            user: None,
        }
    }

    /// Restores the persisted token and validates it with the server.
    ///
    /// A token the server rejects is deleted. A token that cannot be checked
    /// because the server is unreachable is kept on disk for the next run,
    /// but this session stays anonymous.
    pub async fn hydrate<A: Authenticator>(storage: Box<dyn StorageAdapter>, auth: &mut A) -> Result<Self> {
        let mut session = Self::anonymous(storage);

        let token = match session.storage.load_credentials()? {
            Some(t) => t,
            None => {
                log::debug!("No existing session found");
                return Ok(session);
            }
        };

        log::info!("Found existing session token, validating with server");
        auth.set_session_token(Some(token.clone()));

        match auth.current_user().await {
            Ok(user) => {
                log::info!("Session is valid for user: {}", user.name);
                session.token = Some(token);
                session.user = Some(user);
            }
            Err(ApiError::Unauthorized(msg)) | Err(ApiError::Forbidden(msg)) => {
                log::warn!("Stored session rejected: {}", msg);
                auth.set_session_token(None);
                let _ = session.storage.clear_credentials();
            }
            Err(e) => {
                log::warn!("Session validation failed: {}", e);
                auth.set_session_token(None);
            }
        }

        Ok(session)
    }

    /// Signs in with a token obtained elsewhere and persists it.
    pub async fn login<A: Authenticator>(&mut self, token: String, auth: &mut A) -> Result<&CurrentUser> {
        let token = token.trim().to_string();
        auth.set_session_token(Some(token.clone()));

        let user = match auth.current_user().await {
            Ok(user) => user,
            Err(e) => {
                auth.set_session_token(self.token.clone());
                return Err(e).context("Token was not accepted by the server");
            }
        };

        self.storage
            .store_credentials(&token)
            .context("Failed to persist session token")?;
        log::info!("Logged in as {}", user.name);

        self.token = Some(token);
        Ok(self.user.insert(user))
    }

    /// Clears the identity in memory, on the client and in storage.
    pub fn logout<A: Authenticator>(&mut self, auth: &mut A) -> Result<()> {
        auth.set_session_token(None);
        self.token = None;
        if let Some(user) = self.user.take() {
            log::info!("Logged out {}", user.name);
        }
        self.storage
            .clear_credentials()
            .context("Failed to clear stored session")
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn current_user(&self) -> Option<&CurrentUser> {
        self.user.as_ref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Permission context for the signed-in user (anonymous when signed out).
    pub fn user_context(&self) -> UserContext {
        self.user
            .as_ref()
            .map(UserContext::member)
            .unwrap_or_default()
    }
}
