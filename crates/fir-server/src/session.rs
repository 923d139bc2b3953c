//! Session identity carried in a signed cookie.
//!
//! The session is bound before a request is classified, so the page load,
//! the WebSocket upgrade and event posts from one browser share an id.

use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, Key, SameSite, SignedCookieJar};
use fir_core::{FirError, Result, SessionId};
use tracing::{debug, warn};

use crate::config::SessionConfig;

/// Longest cookie value accepted as a session id.
const MAX_SESSION_ID_LEN: usize = 128;

/// Signing key and cookie attributes.
#[derive(Clone)]
pub struct SessionKeys {
    key: Key,
    cookie_name: String,
    secure: bool,
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys")
            .field("cookie_name", &self.cookie_name)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

impl SessionKeys {
    /// Keys from configuration. Without a secret a random key is generated,
    /// so sessions do not survive a restart.
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        let key = match &config.secret {
            Some(secret) => Key::try_from(secret.as_bytes())
                .map_err(|e| FirError::config(format!("invalid session secret: {e}")))?,
            None => {
                warn!("no session secret configured, using a random signing key");
                Key::generate()
            }
        };
        Ok(Self {
            key,
            cookie_name: config.cookie_name.clone(),
            secure: config.secure,
        })
    }

    /// Default cookie name.
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Session for a request: the signed cookie's id, or a new one.
    pub fn resolve(&self, headers: &HeaderMap, cookie_name: Option<&str>) -> SessionBinding {
        let name = cookie_name.unwrap_or(&self.cookie_name);
        let jar = SignedCookieJar::from_headers(headers, self.key.clone());

        if let Some(cookie) = jar.get(name) {
            let value = cookie.value();
            if !value.is_empty() && value.len() <= MAX_SESSION_ID_LEN {
                return SessionBinding {
                    session_id: SessionId::from(value),
                    jar: None,
                };
            }
        }

        let session_id = SessionId::new();
        debug!(session_id = %session_id, "new session");
        let cookie = Cookie::build((name.to_owned(), session_id.to_string()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure);
        SessionBinding {
            session_id,
            jar: Some(jar.add(cookie)),
        }
    }
}

/// A request's session and, for a new session, the cookie to set.
pub struct SessionBinding {
    /// Bound session id.
    pub session_id: SessionId,
    jar: Option<SignedCookieJar>,
}

impl SessionBinding {
    /// Whether the id was minted for this request.
    pub fn is_new(&self) -> bool {
        self.jar.is_some()
    }

    /// Attach the session cookie to `response` when it is new.
    pub fn apply(self, response: Response) -> Response {
        match self.jar {
            Some(jar) => (jar, response).into_response(),
            None => response,
        }
    }
}
