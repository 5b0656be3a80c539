//! Credential events for observers.
//!
//! The [`Authenticator`](crate::auth::Authenticator) publishes an [`Event`]
//! whenever the stored credential changes. A UI layer subscribes to these
//! instead of polling the credential store:
//!
//! ```rust
//! use cadenza::events::Event;
//!
//! let mut events = authenticator.subscribe();
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         Event::LoggedIn | Event::Refreshed => redraw_logged_in(),
//!         Event::LoggedOut => redraw_login_button(),
//!         _ => {}
//!     }
//! }
//! ```

use std::fmt;

/// Changes to the stored credential.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// A verifier was stored and the user was sent to authorize
    LoginStarted,

    /// An authorization code was exchanged for a credential
    LoggedIn,

    /// The authorization code could not be exchanged
    LoginFailed,

    /// The access token was replaced through the refresh grant
    Refreshed,

    /// The refresh grant failed; the stored credential is unchanged unless
    /// followed by [`LoggedOut`](Self::LoggedOut)
    RefreshFailed,

    /// The credential was removed
    LoggedOut,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::LoginStarted => write!(f, "login started"),
            Event::LoggedIn => write!(f, "logged in"),
            Event::LoginFailed => write!(f, "login failed"),
            Event::Refreshed => write!(f, "access token refreshed"),
            Event::RefreshFailed => write!(f, "access token refresh failed"),
            Event::LoggedOut => write!(f, "logged out"),
        }
    }
}
