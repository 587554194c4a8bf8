//! Credential resolution.
//!
//! # Design
//! The process environment is read in exactly one place,
//! `EnvOverrides::from_process_env`, which the outer composition layer calls.
//! `resolve_credentials` takes explicit and environment values as plain
//! parameters, so precedence rules are testable without mutating the
//! environment.

use std::fmt;

use crate::error::{GdsError, Result};

/// Environment variable holding the service base URL.
pub const URL_ENV_VAR: &str = "MATRIX42_URL";

/// Environment variable holding the long-lived API token.
pub const API_TOKEN_ENV_VAR: &str = "MATRIX42SDK_API_TOKEN";

/// Values sourced from the environment. When present they win over explicit
/// constructor arguments.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub url: Option<String>,
    pub api_token: Option<String>,
}

impl EnvOverrides {
    pub fn from_process_env() -> Self {
        Self {
            url: std::env::var(URL_ENV_VAR).ok(),
            api_token: std::env::var(API_TOKEN_ENV_VAR).ok(),
        }
    }
}

/// Effective connection settings for one session. Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    base_url: String,
    api_token: String,
    verify_tls: bool,
}

impl Credentials {
    /// Base URL without trailing separators.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_token(&self) -> &str {
        &self.api_token
    }

    pub fn verify_tls(&self) -> bool {
        self.verify_tls
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("base_url", &self.base_url)
            .field("api_token", &"REDACTED")
            .field("verify_tls", &self.verify_tls)
            .finish()
    }
}

/// Strip every trailing `/` from `url`. Idempotent.
pub fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Resolve effective credentials. Environment values, when non-empty, always
/// override the explicit ones.
pub fn resolve_credentials(
    explicit_url: Option<&str>,
    explicit_token: Option<&str>,
    env: &EnvOverrides,
    verify_tls: bool,
) -> Result<Credentials> {
    let url = present(env.url.as_deref())
        .or(present(explicit_url))
        .ok_or_else(|| GdsError::Configuration("URL is missing".to_string()))?;
    let base_url = normalize_base_url(url);
    if base_url.is_empty() {
        return Err(GdsError::Configuration(format!("URL {url:?} is empty after normalization")));
    }

    let api_token = present(env.api_token.as_deref())
        .or(present(explicit_token))
        .ok_or_else(|| GdsError::Configuration("API token is missing".to_string()))?;

    Ok(Credentials {
        base_url,
        api_token: api_token.to_string(),
        verify_tls,
    })
}

/// `resolve_credentials` against the current process environment. Meant for
/// the outermost layer of an application.
pub fn resolve_from_env(
    explicit_url: Option<&str>,
    explicit_token: Option<&str>,
    verify_tls: bool,
) -> Result<Credentials> {
    resolve_credentials(explicit_url, explicit_token, &EnvOverrides::from_process_env(), verify_tls)
}
