//! Session management: API token exchange and the header set every request
//! carries.
//!
//! # Design
//! A `Session` is created `Unauthenticated` and moves through
//! `Authenticating` to either `Authenticated` or the terminal `Failed`. There
//! is no way back: tokens are never refreshed and there is no logout. The
//! exchange is split into `build_exchange_request` and
//! `parse_exchange_response` like every other call, and `authenticate` runs
//! the pair over a `Transport`.
//!
//! Resource clients only see a session through `HeaderProvider`.

use std::fmt;

use serde::Deserialize;
use tracing::{info, warn};

use crate::config::Credentials;
use crate::error::{GdsError, Result};
use crate::http::{find_header, Headers, HttpMethod, HttpRequest, HttpResponse, Transport};

/// Path of the endpoint that trades an API token for an access token.
pub const TOKEN_EXCHANGE_PATH: &str = "/m42Services/api/ApiToken/GenerateAccessTokenFromApiToken/";

pub const AUTHORIZATION: &str = "Authorization";
pub const CONTENT_TYPE: &str = "Content-Type";

/// Capability to supply the headers an authenticated request must carry.
pub trait HeaderProvider {
    fn headers(&self) -> &[(String, String)];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Failed,
}

pub struct Session {
    credentials: Credentials,
    headers: Headers,
    state: SessionState,
}

#[derive(Deserialize)]
struct AccessTokenResponse {
    #[serde(rename = "RawToken")]
    raw_token: Option<String>,
}

impl Session {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            headers: vec![(CONTENT_TYPE.to_string(), "application/json".to_string())],
            state: SessionState::Unauthenticated,
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    /// The exchange request: current headers with the API token as bearer.
    pub fn build_exchange_request(&self) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Post,
            url: format!("{}{TOKEN_EXCHANGE_PATH}", self.credentials.base_url()),
            headers: build_header_set(&self.headers, self.credentials.api_token()),
            body: None,
        }
    }

    /// Exchange the API token for an access token and install it.
    ///
    /// No-op once authenticated. A failed session stays failed and returns
    /// `Authentication` without issuing another request.
    pub fn authenticate<T: Transport + ?Sized>(&mut self, transport: &T) -> Result<()> {
        match self.state {
            SessionState::Authenticated => return Ok(()),
            SessionState::Failed => {
                return Err(GdsError::Authentication(
                    "session previously failed to authenticate".to_string(),
                ))
            }
            SessionState::Unauthenticated | SessionState::Authenticating => {}
        }

        self.state = SessionState::Authenticating;
        let outcome = transport
            .execute(self.build_exchange_request())
            .map_err(|e| GdsError::Authentication(format!("token exchange request failed: {e}")))
            .and_then(parse_exchange_response);

        match outcome {
            Ok(token) => {
                self.headers = build_header_set(&self.headers, &token);
                self.state = SessionState::Authenticated;
                info!(base_url = self.credentials.base_url(), "session authenticated");
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Failed;
                warn!(base_url = self.credentials.base_url(), error = %e, "token exchange failed");
                Err(e)
            }
        }
    }
}

impl HeaderProvider for Session {
    fn headers(&self) -> &[(String, String)] {
        &self.headers
    }
}

impl HeaderProvider for Headers {
    fn headers(&self) -> &[(String, String)] {
        self
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(k, v)| {
                if k.eq_ignore_ascii_case(AUTHORIZATION) {
                    (k.as_str(), "REDACTED")
                } else {
                    (k.as_str(), v.as_str())
                }
            })
            .collect();
        f.debug_struct("Session")
            .field("credentials", &self.credentials)
            .field("headers", &headers)
            .field("state", &self.state)
            .finish()
    }
}

/// Extract `RawToken` from the exchange response.
pub fn parse_exchange_response(response: HttpResponse) -> Result<String> {
    if !response.is_success() {
        return Err(GdsError::Authentication(format!(
            "token exchange returned HTTP {}",
            response.status
        )));
    }
    let parsed: AccessTokenResponse = serde_json::from_str(&response.body)
        .map_err(|e| GdsError::Authentication(format!("token exchange response is not valid JSON: {e}")))?;
    match parsed.raw_token {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(GdsError::Authentication(
            "token exchange response has no RawToken".to_string(),
        )),
    }
}

/// `existing` with its `Authorization` entry replaced by `Bearer {token}`.
/// Every other entry keeps its value and position; the entry is appended when
/// absent.
pub fn build_header_set(existing: &[(String, String)], bearer_token: &str) -> Headers {
    let value = format!("Bearer {bearer_token}");
    let mut headers: Headers = Vec::with_capacity(existing.len() + 1);
    let mut replaced = false;
    for (name, v) in existing {
        if name.eq_ignore_ascii_case(AUTHORIZATION) {
            if !replaced {
                headers.push((name.clone(), value.clone()));
                replaced = true;
            }
        } else {
            headers.push((name.clone(), v.clone()));
        }
    }
    if !replaced {
        headers.push((AUTHORIZATION.to_string(), value));
    }
    headers
}

/// The bearer token currently installed in `headers`, if any.
pub fn bearer_token(headers: &[(String, String)]) -> Option<&str> {
    find_header(headers, AUTHORIZATION).and_then(|v| v.strip_prefix("Bearer "))
}
