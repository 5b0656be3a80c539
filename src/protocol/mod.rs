//! Wire types of the accounts service and the web API.
//!
//! # Submodules
//!
//! * [`auth`] - token endpoint responses
//! * [`catalog`] - playlists, albums, tracks and user profiles
//!
//! The module also provides [`json`], which parses response bodies with
//! consistent logging: the parsed structure at TRACE level on success, and
//! the raw body when parsing fails.

pub mod auth;
pub mod catalog;

use std::fmt::Debug;

use serde::Deserialize;

use crate::error::Result;

/// Parses and logs a JSON response body.
///
/// # Arguments
///
/// * `body` - Response body text to parse
/// * `origin` - Description of the endpoint for logging
///
/// # Errors
///
/// Returns an invalid data error if the body is not valid JSON or its
/// structure does not match `T`.
pub fn json<T>(body: &str, origin: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Debug,
{
    match serde_json::from_str(body) {
        Ok(result) => {
            trace!("{origin}: {result:#?}");
            Ok(result)
        }
        Err(e) => {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
                debug!("{origin}: unexpected response structure ({e})");
                trace!("{origin}: {json:#?}");
            } else {
                error!("{origin}: failed parsing response ({e:?})");
                trace!("{body}");
            }
            Err(e.into())
        }
    }
}
