use std::{
    fmt,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use veil::Redact;

use crate::error::{Error, Result};

/// The credential set issued by the accounts service.
///
/// `expires_at` is always an absolute instant, computed once when the token
/// response arrives.
#[derive(Clone, PartialEq, Eq, Hash, Redact)]
pub struct Credential {
    #[redact]
    pub access_token: String,
    #[redact]
    pub refresh_token: Option<String>,
    pub expires_at: SystemTime,
}

impl Credential {
    #[must_use]
    pub fn time_to_live(&self) -> Duration {
        self.expires_at
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO)
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        SystemTime::now() >= self.expires_at
    }

    /// Whether the credential expires within `margin` from now.
    #[must_use]
    pub fn expires_within(&self, margin: Duration) -> bool {
        expires_within(self.expires_at, margin)
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.access_token)
    }
}

pub(crate) fn expires_within(expires_at: SystemTime, margin: Duration) -> bool {
    SystemTime::now() + margin >= expires_at
}

/// Encodes an instant as milliseconds since the Unix epoch.
pub(crate) fn to_epoch_millis(time: SystemTime) -> String {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis()
        .to_string()
}

/// Decodes an instant stored by [`to_epoch_millis`].
pub(crate) fn from_epoch_millis(millis: &str) -> Result<SystemTime> {
    let millis = millis
        .trim()
        .parse::<u64>()
        .map_err(|e| Error::invalid_data(format!("expiry \"{millis}\" is invalid: {e}")))?;
    Ok(UNIX_EPOCH + Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(ttl: Duration) -> Credential {
        Credential {
            access_token: "A".to_owned(),
            refresh_token: Some("R".to_owned()),
            expires_at: SystemTime::now() + ttl,
        }
    }

    #[test]
    fn expiry_margin() {
        let margin = Duration::from_secs(300);
        assert!(credential(Duration::from_secs(240)).expires_within(margin));
        assert!(!credential(Duration::from_secs(360)).expires_within(margin));
        assert!(!credential(Duration::from_secs(360)).is_expired());
    }

    #[test]
    fn epoch_millis_round_trip_truncates_to_millis() {
        let time = UNIX_EPOCH + Duration::from_micros(1_767_225_600_123_456);
        let decoded = from_epoch_millis(&to_epoch_millis(time)).unwrap();
        assert_eq!(decoded, UNIX_EPOCH + Duration::from_millis(1_767_225_600_123));
    }

    #[test]
    fn invalid_expiry_is_rejected() {
        assert!(from_epoch_millis("tomorrow").is_err());
    }

    #[test]
    fn display_is_access_token() {
        assert_eq!(credential(Duration::from_secs(60)).to_string(), "A");
    }
}
