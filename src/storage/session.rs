use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to access session file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse session: {0}")]
    ParseError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Process-wide login state. Loaded at start-up, saved after every change, and
/// passed explicitly to every repository call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user: Option<UserProfile>,
    #[serde(default)]
    pub cloud_mode: bool,
}

impl Session {
    pub fn is_logged_in(&self) -> bool {
        self.access_token.as_deref().is_some_and(|token| !token.is_empty())
    }

    /// Cloud routing needs both the flag and a token.
    pub fn uses_cloud(&self) -> bool {
        self.cloud_mode && self.is_logged_in()
    }

    pub fn bearer(&self) -> Option<&str> {
        self.access_token.as_deref().filter(|token| !token.is_empty())
    }

    pub fn sign_in(&mut self, access: String, refresh: Option<String>, user: Option<UserProfile>) {
        self.access_token = Some(access);
        self.refresh_token = refresh;
        self.user = user;
    }

    pub fn logout(&mut self) {
        self.access_token = None;
        self.refresh_token = None;
        self.user = None;
        self.cloud_mode = false;
    }
}

pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// A missing file is a fresh, logged-out session.
    pub fn load(&self) -> Result<Session, SessionError> {
        if !self.path.exists() {
            return Ok(Session::default());
        }
        let content = std::fs::read_to_string(&self.path)?;
        let session: Session = serde_json::from_str(&content)?;
        Ok(session)
    }

    pub fn save(&self, session: &Session) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(session)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}
