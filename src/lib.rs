//! Client library for a music streaming service's web API.
//!
//! The crate covers the path from an anonymous user to a complete view of
//! their library:
//!
//! * [`auth`]: OAuth 2.0 authorization code flow with PKCE, credential
//!   persistence through a [`store::CredentialStore`], refresh ahead of
//!   expiry and credential events for observers
//! * [`api`]: authenticated reads that resolve cursor pagination into
//!   complete listings
//! * [`library`]: playlist, album and landing views that degrade instead of
//!   failing when secondary requests fail
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use cadenza::{
//!     api::ApiClient, auth::Authenticator, config::Config, http::Client,
//!     library::Library, store::FileStore,
//! };
//!
//! let config = Config::from_file("cadenza.toml")?;
//! let transport = Arc::new(Client::new(&config)?);
//! let store = Arc::new(FileStore::open("session.toml")?);
//! let auth = Arc::new(Authenticator::new(&config, transport.clone(), store));
//!
//! let library = Library::new(ApiClient::new(&config, transport, auth));
//! let playlist = library.load_playlist_details("37i9dQZF1DXcBWIGoYBM5M").await?;
//! ```
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod api;
pub mod auth;
pub mod config;
pub mod duration;
pub mod error;
pub mod events;
pub mod http;
pub mod library;
pub mod pkce;
pub mod protocol;
pub mod store;
pub mod tokens;
