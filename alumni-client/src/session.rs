use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const MIN_TOKEN_LEN: usize = 8;
const MAX_TOKEN_LEN: usize = 4096;

/// Persists the bearer token in `~/.alumni/session`.
///
/// The file is written atomically and restricted to 0600 on unix. A file
/// that looks corrupted is treated as "no session" rather than an error so
/// a broken token never blocks startup.
#[derive(Debug, Clone)]
pub struct SessionStore {
    file_path: PathBuf,
}

impl SessionStore {
    /// Creates a store at the default path `~/.alumni/session`.
    pub fn new() -> Result<Self> {
        let home_dir = dirs::home_dir().context("Failed to determine home directory")?;
        Ok(Self::at(home_dir.join(".alumni").join("session")))
    }

    /// Creates a store backed by an explicit file.
    pub fn at(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }

    /// Loads the token.
    ///
    /// - `Ok(Some(token))` if the file exists and holds a plausible token
    /// - `Ok(None)` if the file is missing, empty or corrupted
    /// - `Err(_)` if the file cannot be read
    pub fn load(&self) -> Result<Option<String>> {
        if !self.file_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.file_path).context("Failed to read session file")?;

        match validate_token(&content) {
            Some(token) => {
                log::debug!("Loaded session token from {}", self.file_path.display());
                Ok(Some(token.to_string()))
            }
            None => Ok(None),
        }
    }

    /// Saves the token, replacing any previous one.
    pub fn save(&self, token: &str) -> Result<()> {
        if let Some(parent) = self.file_path.parent() {
            fs::create_dir_all(parent).context("Failed to create .alumni directory")?;
        }

        let temp_path = self.file_path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).context("Failed to create temporary session file")?;
        file.write_all(token.trim().as_bytes())
            .context("Failed to write session token")?;
        file.sync_all().context("Failed to sync session file to disk")?;
        drop(file);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&temp_path, fs::Permissions::from_mode(0o600))
                .context("Failed to set session file permissions")?;
        }

        fs::rename(&temp_path, &self.file_path).context("Failed to rename temporary session file")?;

        log::info!("Saved session token to {}", self.file_path.display());
        Ok(())
    }

    /// Deletes the session file; a missing file is not an error.
    pub fn delete(&self) -> Result<()> {
        if self.file_path.exists() {
            fs::remove_file(&self.file_path).context("Failed to delete session file")?;
            log::info!("Deleted session file at {}", self.file_path.display());
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

/// Returns the trimmed token if the content looks like one.
fn validate_token(content: &str) -> Option<&str> {
    let token = content.trim();

    if token.is_empty() {
        log::warn!("Session file is empty, treating as no session");
        return None;
    }

    if token.len() < MIN_TOKEN_LEN || token.len() > MAX_TOKEN_LEN {
        log::warn!("Session token has invalid length: {}, treating as corrupted", token.len());
        return None;
    }

    if token.chars().any(|c| c.is_control() || c.is_whitespace()) {
        log::warn!("Session file contains control characters, treating as corrupted");
        return None;
    }

    Some(token)
}
