use std::sync::Arc;

use thiserror::Error;

use crate::storage::session::{Session, SessionError, SessionStore, UserProfile};
use crate::sync::api::{ApiError, AuthBackend};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Callback did not carry an authorization code")]
    MissingCode,
    #[error("Server response did not include an access token")]
    MissingToken,
    #[error("Cannot {0} in the current login state")]
    InvalidState(&'static str),
    #[error("Auth request failed: {0}")]
    Api(#[from] ApiError),
    #[error("Failed to persist session: {0}")]
    Session(#[from] SessionError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginState {
    LoggedOut,
    AwaitingProviderRedirect { authorize_url: String },
    AwaitingCallback { authorize_url: String },
    LoggedIn,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
}

/// Read `code` and `state` from the query of a callback URL. Empty values count as absent.
pub fn parse_callback(url: &str) -> CallbackParams {
    let without_fragment = url.split('#').next().unwrap_or_default();
    let Some((_, query)) = without_fragment.split_once('?') else {
        return CallbackParams::default();
    };

    let mut params = CallbackParams::default();
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = decode_component(value);
        if value.is_empty() {
            continue;
        }
        match key {
            "code" => params.code = Some(value),
            "state" => params.state = Some(value),
            _ => {}
        }
    }
    params
}

fn decode_component(value: &str) -> String {
    let spaced = value.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .unwrap_or(spaced)
}

/// OAuth code-exchange login. The provider page is opened elsewhere; this only
/// tracks progress and talks to the backend.
pub struct LoginFlow {
    backend: Arc<dyn AuthBackend>,
    provider: String,
    callback_prefix: String,
    state: LoginState,
}

impl LoginFlow {
    pub fn new(
        backend: Arc<dyn AuthBackend>,
        provider: impl Into<String>,
        callback_prefix: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            provider: provider.into(),
            callback_prefix: callback_prefix.into(),
            state: LoginState::LoggedOut,
        }
    }

    /// Pick up where a persisted session left off.
    pub fn resume(mut self, session: &Session) -> Self {
        if session.is_logged_in() {
            self.state = LoginState::LoggedIn;
        }
        self
    }

    pub fn state(&self) -> &LoginState {
        &self.state
    }

    /// Ask the backend for the provider's authorization page.
    pub async fn start(&mut self) -> Result<String, AuthError> {
        if self.state != LoginState::LoggedOut {
            return Err(AuthError::InvalidState("start login"));
        }

        let authorize_url = self.backend.login_url(&self.provider).await?;
        tracing::info!("Obtained {} authorization URL", self.provider);
        self.state = LoginState::AwaitingProviderRedirect {
            authorize_url: authorize_url.clone(),
        };
        Ok(authorize_url)
    }

    pub fn redirect_opened(&mut self) -> Result<(), AuthError> {
        match std::mem::replace(&mut self.state, LoginState::LoggedOut) {
            LoginState::AwaitingProviderRedirect { authorize_url } => {
                self.state = LoginState::AwaitingCallback { authorize_url };
                Ok(())
            }
            other => {
                self.state = other;
                Err(AuthError::InvalidState("open the provider page"))
            }
        }
    }

    /// Navigations to the callback prefix are consumed here instead of being shown.
    pub fn intercepts(&self, url: &str) -> bool {
        url.starts_with(&self.callback_prefix)
    }

    pub async fn complete(
        &mut self,
        callback_url: &str,
        session: &mut Session,
        store: &SessionStore,
    ) -> Result<(), AuthError> {
        if !matches!(self.state, LoginState::AwaitingCallback { .. }) {
            return Err(AuthError::InvalidState("complete login"));
        }
        // Whatever happens next, a failed attempt starts over from LoggedOut.
        self.state = LoginState::LoggedOut;

        let params = parse_callback(callback_url);
        let Some(code) = params.code else {
            tracing::warn!("Login callback without authorization code");
            return Err(AuthError::MissingCode);
        };

        let response = match self
            .backend
            .exchange_code(&self.provider, &code, params.state.as_deref())
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Code exchange failed: {}", e);
                return Err(e.into());
            }
        };

        let access = response
            .access
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let mut updated = session.clone();
        updated.sign_in(access, response.refresh, response.user);
        store.save(&updated)?;
        *session = updated;

        tracing::info!(
            "Logged in as {}",
            session.user.as_ref().map(|u| u.username.as_str()).unwrap_or("unknown user")
        );
        self.state = LoginState::LoggedIn;
        Ok(())
    }

    pub fn logout(&mut self, session: &mut Session, store: &SessionStore) -> Result<(), AuthError> {
        session.logout();
        store.save(session)?;
        self.state = LoginState::LoggedOut;
        tracing::info!("Logged out");
        Ok(())
    }

    /// Check a stored token against the server.
    pub async fn verify(&self, session: &Session) -> Result<UserProfile, AuthError> {
        let token = session.bearer().ok_or(AuthError::MissingToken)?;
        Ok(self.backend.current_user(token).await?)
    }
}
