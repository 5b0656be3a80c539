//! Credential lifecycle: PKCE login, code exchange, refresh and vending.
//!
//! The [`Authenticator`] moves through these states:
//!
//! ```text
//! Unauthenticated ──begin_login──▶ PendingAuthorization ──complete_login──▶ Authenticated
//!        ▲                                                                     │
//!        │                                            within 5 min of expiry   ▼
//!        └──── logout / rejected refresh ◀── Refreshing ◀──────────────── Expiring
//! ```
//!
//! The state is not kept in memory: it is derived from the
//! [`CredentialStore`] on every call, so several authenticators sharing one
//! store agree with each other.
//!
//! Consumers that only need a bearer token depend on the
//! [`AccessTokenProvider`] trait rather than on the authenticator itself.

use std::{
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::{broadcast, Mutex};
use url::Url;

use crate::{
    config::Config,
    error::{Error, ErrorKind, Result},
    events::Event,
    http::Transport,
    pkce::PkcePair,
    protocol::auth::{TokenError, TokenResponse},
    store::{CredentialStore, Key},
    tokens::{self, Credential},
};

/// Safety margin before expiry within which the access token is refreshed,
/// covering clock drift and request latency.
pub const EXPIRY_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Vends a bearer token that is valid for the next request.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// # Errors
    ///
    /// Fails with [`ErrorKind::NotAuthenticated`] when no credential is
    /// stored, or with a refresh error when renewing an expiring credential
    /// failed.
    async fn access_token(&self) -> Result<String>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AuthState {
    Unauthenticated,
    PendingAuthorization,
    Authenticated,
    /// Authenticated, but within [`EXPIRY_MARGIN`] of expiry
    Expiring,
    Refreshing,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthState::Unauthenticated => write!(f, "not logged in"),
            AuthState::PendingAuthorization => write!(f, "waiting for authorization"),
            AuthState::Authenticated => write!(f, "logged in"),
            AuthState::Expiring => write!(f, "logged in, access token expiring"),
            AuthState::Refreshing => write!(f, "refreshing access token"),
        }
    }
}

/// The grant being exchanged at the token endpoint.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Grant {
    AuthorizationCode,
    RefreshToken,
}

impl Grant {
    /// The absolute expiry of a token issued now.
    fn expires_at(self, expires_in: Duration) -> Result<SystemTime> {
        SystemTime::now()
            .checked_add(expires_in)
            .ok_or_else(|| {
                self.error(format!(
                    "expires_in of {}s is out of range",
                    expires_in.as_secs()
                ))
            })
    }

    fn error<E>(self, error: E) -> Error
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        match self {
            Grant::AuthorizationCode => Error::exchange_failed(error),
            Grant::RefreshToken => Error::refresh_failed(error),
        }
    }
}

pub struct Authenticator {
    client_id: String,
    redirect_uri: Url,
    scopes: Vec<String>,
    authorize_url: Url,
    token_url: Url,

    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,

    /// Serializes refreshes triggered by [`valid_access_token`](Self::valid_access_token).
    refresh_latch: Mutex<()>,
    /// Number of refresh exchanges in flight.
    refreshing: AtomicUsize,

    events: broadcast::Sender<Event>,
}

impl Authenticator {
    /// Number of events buffered for slow observers.
    const EVENT_CAPACITY: usize = 16;

    #[must_use]
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(Self::EVENT_CAPACITY);

        Self {
            client_id: config.client_id.clone(),
            redirect_uri: config.redirect_uri.clone(),
            scopes: config.scopes.clone(),
            authorize_url: config.authorize_url.clone(),
            token_url: config.token_url.clone(),

            transport,
            store,

            refresh_latch: Mutex::new(()),
            refreshing: AtomicUsize::new(0),

            events,
        }
    }

    /// Subscribes to credential changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    fn notify(&self, event: Event) {
        debug!("{event}");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Starts a login.
    ///
    /// Generates a PKCE pair, stores the verifier and returns the
    /// authorization URL to send the user to. A verifier left over from an
    /// earlier, abandoned login is replaced.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the verifier cannot be generated or stored.
    pub fn begin_login(&self) -> Result<Url> {
        let pair = PkcePair::generate()?;
        self.store.set(Key::CodeVerifier, &pair.verifier)?;

        let url = self.authorization_url(&pair.challenge);
        self.notify(Event::LoginStarted);
        Ok(url)
    }

    fn authorization_url(&self, challenge: &str) -> Url {
        let mut url = self.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", self.redirect_uri.as_str())
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("code_challenge_method", "S256")
            .append_pair("code_challenge", challenge);
        url
    }

    /// Exchanges an authorization code for a credential.
    ///
    /// The stored verifier is consumed by this call whatever the outcome.
    ///
    /// # Errors
    ///
    /// Will return `Err` if:
    /// - no verifier is stored ([`ErrorKind::MissingVerifier`])
    /// - the token endpoint cannot be reached or rejects the code
    ///   ([`ErrorKind::ExchangeFailed`])
    /// - the credential cannot be stored
    pub async fn complete_login(&self, code: &str) -> Result<Credential> {
        let verifier = self.store.take(Key::CodeVerifier)?.ok_or_else(|| {
            Error::missing_verifier("no login in progress; was the callback opened twice?")
        })?;

        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code_verifier", verifier.as_str()),
        ];

        let result = self.exchange(Grant::AuthorizationCode, &form).await;
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.notify(Event::LoginFailed);
                return Err(e);
            }
        };

        let expires_at = match Grant::AuthorizationCode.expires_at(response.expires_in) {
            Ok(expires_at) => expires_at,
            Err(e) => {
                self.notify(Event::LoginFailed);
                return Err(e);
            }
        };
        let credential = Credential {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at,
        };
        self.store_credential(&credential)?;

        info!(
            "logged in; access token valid for {}s",
            response.expires_in.as_secs()
        );
        self.notify(Event::LoggedIn);
        Ok(credential)
    }

    /// Completes a login from the URL the service redirected back to.
    ///
    /// # Errors
    ///
    /// Will return `Err` if:
    /// - the callback carries an `error` parameter
    ///   ([`ErrorKind::ExchangeFailed`]; the verifier is discarded)
    /// - the callback carries neither `code` nor `error`
    ///   ([`ErrorKind::InvalidArgument`])
    /// - any of the reasons listed for [`complete_login`](Self::complete_login)
    pub async fn complete_login_from_callback(&self, callback: &Url) -> Result<Credential> {
        let param = |name: &str| {
            callback
                .query_pairs()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.into_owned())
        };

        if let Some(error) = param("error") {
            self.store.remove(Key::CodeVerifier)?;
            self.notify(Event::LoginFailed);
            return Err(Error::exchange_failed(format!(
                "authorization denied: {error}"
            )));
        }

        match param("code") {
            Some(code) => self.complete_login(&code).await,
            None => Err(Error::invalid_argument(format!(
                "callback {} has no code",
                callback.path()
            ))),
        }
    }

    /// Exchanges the stored refresh token for a new access token.
    ///
    /// Always performs an exchange, regardless of the current expiry. When
    /// the response carries no refresh token, the stored one is kept. When
    /// the token endpoint rejects the refresh token, the credential is
    /// removed as it cannot be recovered.
    ///
    /// # Errors
    ///
    /// Will return `Err` if:
    /// - no refresh token is stored ([`ErrorKind::NoRefreshToken`])
    /// - the token endpoint cannot be reached or rejects the refresh
    ///   ([`ErrorKind::RefreshFailed`])
    /// - the credential cannot be stored
    pub async fn refresh(&self) -> Result<String> {
        let refresh_token = self
            .store
            .get(Key::RefreshToken)?
            .ok_or_else(|| Error::no_refresh_token("no refresh token stored"))?;

        let result = {
            let _in_flight = InFlight::enter(&self.refreshing);
            self.refresh_with(&refresh_token).await
        };

        match result {
            Ok(token) => {
                self.notify(Event::Refreshed);
                Ok(token)
            }
            Err(e) => {
                self.notify(Event::RefreshFailed);
                if e.kind == ErrorKind::RefreshFailed && Self::is_rejected(&e) {
                    warn!("refresh token was rejected; logging out");
                    if let Err(logout) = self.logout() {
                        error!("could not remove rejected credential: {logout}");
                    }
                }
                Err(e)
            }
        }
    }

    async fn refresh_with(&self, refresh_token: &str) -> Result<String> {
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("refresh_token", refresh_token),
        ];

        let response = self.exchange(Grant::RefreshToken, &form).await?;
        let expires_at = Grant::RefreshToken.expires_at(response.expires_in)?;
        let expires_at = tokens::to_epoch_millis(expires_at);

        let mut changes = vec![
            (Key::AccessToken, Some(response.access_token.as_str())),
            (Key::ExpiresAt, Some(expires_at.as_str())),
        ];
        if let Some(refresh_token) = response.refresh_token.as_deref() {
            changes.push((Key::RefreshToken, Some(refresh_token)));
        }
        self.store.update(&changes)?;

        debug!(
            "access token refreshed; valid for {}s",
            response.expires_in.as_secs()
        );
        Ok(response.access_token)
    }

    /// Whether a refresh error is the token endpoint refusing the grant, as
    /// opposed to a transport or server failure.
    fn is_rejected(error: &Error) -> bool {
        error
            .downcast::<RejectedGrant>()
            .is_some_and(|rejected| {
                rejected.status == StatusCode::BAD_REQUEST
                    || rejected.status == StatusCode::UNAUTHORIZED
            })
    }

    /// Returns an access token that is valid for at least [`EXPIRY_MARGIN`].
    ///
    /// Concurrent callers that find the token expiring share a single
    /// refresh: the first one exchanges, the others wait and then read the
    /// renewed token from the store.
    ///
    /// # Errors
    ///
    /// Will return `Err` if:
    /// - no access token or expiry is stored ([`ErrorKind::NotAuthenticated`])
    /// - the token is expiring and [`refresh`](Self::refresh) fails
    pub async fn valid_access_token(&self) -> Result<String> {
        let (token, expires_at) = self.stored_access_token()?;
        if !tokens::expires_within(expires_at, EXPIRY_MARGIN) {
            return Ok(token);
        }

        let _latch = self.refresh_latch.lock().await;

        // Another caller may have refreshed while this one was waiting.
        let (token, expires_at) = self.stored_access_token()?;
        if !tokens::expires_within(expires_at, EXPIRY_MARGIN) {
            trace!("access token was refreshed concurrently");
            return Ok(token);
        }

        debug!(
            "access token expires within {}s; refreshing",
            EXPIRY_MARGIN.as_secs()
        );
        self.refresh().await
    }

    fn stored_access_token(&self) -> Result<(String, SystemTime)> {
        let token = self.store.get(Key::AccessToken)?;
        let expires_at = self.store.get(Key::ExpiresAt)?;

        match (token, expires_at) {
            (Some(token), Some(expires_at)) => {
                // An unreadable expiry is renewed like an expired one.
                let expires_at = tokens::from_epoch_millis(&expires_at).unwrap_or_else(|e| {
                    warn!("{e}; treating access token as expired");
                    UNIX_EPOCH
                });
                Ok((token, expires_at))
            }
            _ => Err(Error::not_authenticated("no access token stored")),
        }
    }

    /// Removes the credential. Calling this when logged out is a no-op.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the store cannot be written.
    pub fn logout(&self) -> Result<()> {
        let was_authenticated = self.is_authenticated();
        self.store.update(&[
            (Key::AccessToken, None),
            (Key::RefreshToken, None),
            (Key::ExpiresAt, None),
        ])?;

        if was_authenticated {
            self.notify(Event::LoggedOut);
        }
        Ok(())
    }

    /// Whether an access token and expiry are stored.
    ///
    /// Freshness is not checked; an expired token still counts, as it is
    /// renewed on the next [`valid_access_token`](Self::valid_access_token).
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        let present = |key| match self.store.get(key) {
            Ok(value) => value.is_some(),
            Err(e) => {
                warn!("could not read {key}: {e}");
                false
            }
        };

        present(Key::AccessToken) && present(Key::ExpiresAt)
    }

    #[must_use]
    pub fn state(&self) -> AuthState {
        if self.refreshing.load(Ordering::Acquire) > 0 {
            return AuthState::Refreshing;
        }

        match self.stored_access_token() {
            Ok((_, expires_at)) if tokens::expires_within(expires_at, EXPIRY_MARGIN) => {
                AuthState::Expiring
            }
            Ok(_) => AuthState::Authenticated,
            Err(_) => match self.store.get(Key::CodeVerifier) {
                Ok(Some(_)) => AuthState::PendingAuthorization,
                _ => AuthState::Unauthenticated,
            },
        }
    }

    /// The stored credential, if complete. An unreadable expiry is reported
    /// as the Unix epoch.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the store cannot be read.
    pub fn credential(&self) -> Result<Option<Credential>> {
        match self.stored_access_token() {
            Ok((access_token, expires_at)) => Ok(Some(Credential {
                access_token,
                refresh_token: self.store.get(Key::RefreshToken)?,
                expires_at,
            })),
            Err(e) if e.kind == ErrorKind::NotAuthenticated => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn store_credential(&self, credential: &Credential) -> Result<()> {
        let expires_at = tokens::to_epoch_millis(credential.expires_at);
        self.store.update(&[
            (Key::AccessToken, Some(credential.access_token.as_str())),
            (Key::RefreshToken, credential.refresh_token.as_deref()),
            (Key::ExpiresAt, Some(expires_at.as_str())),
        ])
    }

    /// Posts a grant to the token endpoint.
    ///
    /// Any failure, including an unreachable endpoint, is reported as the
    /// grant's own error kind so that callers see a credential error.
    async fn exchange(&self, grant: Grant, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .transport
            .post_form(&self.token_url, form)
            .await
            .map_err(|e| grant.error(e))?;

        if !response.is_success() {
            let reason = serde_json::from_str::<TokenError>(&response.body)
                .map_or_else(|_| response.status.to_string(), |error| error.to_string());
            warn!("{grant:?} grant failed: {reason}");
            return Err(grant.error(RejectedGrant {
                status: response.status,
                reason,
            }));
        }

        // Not parsed through `protocol::json`, which would trace the raw
        // body including the tokens on failure.
        serde_json::from_str::<TokenResponse>(&response.body).map_err(|e| {
            error!("{grant:?} grant: failed parsing token response ({e})");
            grant.error(e)
        })
    }
}

#[async_trait]
impl AccessTokenProvider for Authenticator {
    async fn access_token(&self) -> Result<String> {
        self.valid_access_token().await
    }
}

/// Counts a refresh as in flight until dropped, including when the refresh
/// future is cancelled.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A non-success answer of the token endpoint.
#[derive(Debug)]
struct RejectedGrant {
    status: StatusCode,
    reason: String,
}

impl fmt::Display for RejectedGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token endpoint answered {}: {}", self.status, self.reason)
    }
}

impl std::error::Error for RejectedGrant {}
