//! Token endpoint response types.
//!
//! Both the `authorization_code` and the `refresh_token` grants answer with
//! the same shape. The refresh grant may omit `refresh_token`, in which case
//! the previously issued one stays valid.
//!
//! # Example Response
//!
//! ```json
//! {
//!     "access_token": "BQD...",
//!     "token_type": "Bearer",
//!     "scope": "user-read-private user-library-read",
//!     "expires_in": 3600,
//!     "refresh_token": "AQC..."
//! }
//! ```

use std::time::Duration;

use serde::Deserialize;
use serde_with::{formats::Flexible, serde_as, DurationSeconds};
use veil::Redact;

/// Tokens issued by the accounts service.
#[serde_as]
#[derive(Clone, Eq, PartialEq, Deserialize, Redact, Hash)]
pub struct TokenResponse {
    /// Bearer token for API access
    #[redact]
    pub access_token: String,

    /// Token to obtain a new access token, absent on some refresh responses
    #[redact]
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// How long the access token remains valid, relative to the response
    #[serde_as(as = "DurationSeconds<u64, Flexible>")]
    pub expires_in: Duration,

    /// Space-separated scopes that were granted
    #[serde(default)]
    pub scope: Option<String>,
}

/// Error body of a failed token request.
///
/// ```json
/// { "error": "invalid_grant", "error_description": "Invalid authorization code" }
/// ```
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Hash)]
pub struct TokenError {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_description {
            Some(description) => write!(f, "{}: {description}", self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_token_is_optional() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token":"A","expires_in":3600}"#).unwrap();
        assert_eq!(response.access_token, "A");
        assert_eq!(response.refresh_token, None);
        assert_eq!(response.expires_in, Duration::from_secs(3600));
    }

    #[test]
    fn debug_output_is_redacted() {
        let response: TokenResponse = serde_json::from_str(
            r#"{"access_token":"secret-access","refresh_token":"secret-refresh","expires_in":"60"}"#,
        )
        .unwrap();
        let debug = format!("{response:?}");
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));
    }

    #[test]
    fn error_display() {
        let error: TokenError =
            serde_json::from_str(r#"{"error":"invalid_grant","error_description":"expired"}"#)
                .unwrap();
        assert_eq!(error.to_string(), "invalid_grant: expired");
    }
}
