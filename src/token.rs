use crate::error::{Result, TokenError};

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;
use std::{fmt, fs::OpenOptions, io::Write, path::Path};

/// A bearer token and, when the identity provider says so, its expiry.
#[derive(Clone, PartialEq)]
pub struct AccessToken {
    token: String,
    pub expires_on: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(token: String, expires_on: Option<DateTime<Utc>>) -> Self {
        AccessToken { token, expires_on }
    }

    /// The raw token string.
    pub fn secret(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[REDACTED]")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Identity endpoints disagree on whether numbers are JSON numbers or strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum Seconds {
    Number(i64),
    Text(String),
}

impl Seconds {
    fn value(&self) -> Option<i64> {
        match self {
            Seconds::Number(n) => Some(*n),
            Seconds::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Token endpoint response, shared by the OAuth2 v2.0 endpoint and the
/// managed identity endpoints.
#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    access_token: String,
    expires_in: Option<Seconds>,
    expires_on: Option<Seconds>,
}

impl TokenResponse {
    pub(crate) fn into_access_token(self) -> Result<AccessToken> {
        if self.access_token.is_empty() {
            return Err(TokenError::AuthToken(
                "identity provider returned an empty token".into(),
            ));
        }
        let expires_on = self
            .expires_on
            .as_ref()
            .and_then(Seconds::value)
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .or_else(|| {
                self.expires_in
                    .as_ref()
                    .and_then(Seconds::value)
                    .and_then(Duration::try_seconds)
                    .and_then(|within| Utc::now().checked_add_signed(within))
            });
        Ok(AccessToken::new(self.access_token, expires_on))
    }
}

/// Turns an HTTP response from an identity endpoint into a token.
pub(crate) fn parse_token_response(
    response: reqwest::blocking::Response,
    endpoint: &str,
) -> Result<AccessToken> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(TokenError::AuthToken(format!(
            "{}: token request failed with status {}: {}",
            endpoint, status, body
        )));
    }
    match response.json::<TokenResponse>() {
        Ok(token_response) => token_response.into_access_token(),
        Err(e) => Err(TokenError::AuthToken(format!(
            "{}: failed to parse token response: {}",
            endpoint, e
        ))),
    }
}

/// Writes the raw token to `path`, readable and writable by the owner only.
///
/// An existing file is truncated and its mode tightened to `0600`.
pub fn write_token_file(path: &Path, token: &AccessToken) -> Result<()> {
    log::info!("Writing the token to the output file {} ...", path.display());
    let output_error =
        |e: std::io::Error| TokenError::OutputWrite(format!("{}: {}", path.display(), e));

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path).map_err(output_error)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .map_err(output_error)?;
    }

    file.write_all(token.secret().as_bytes())
        .map_err(output_error)?;
    file.sync_all().map_err(output_error)
}
