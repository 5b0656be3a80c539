//! Client configuration.
//!
//! The configuration is read from a TOML file:
//!
//! ```toml
//! client_id = "0123456789abcdef0123456789abcdef"
//! redirect_uri = "http://127.0.0.1:8888/callback"
//!
//! # Optional, shown with their defaults.
//! scopes = ["user-read-private", "user-read-email", "playlist-read-private", "user-library-read"]
//! authorize_url = "https://accounts.example/authorize"
//! token_url = "https://accounts.example/api/token"
//! api_url = "https://api.example/v1/"
//! ```

use std::{fs, path::Path};

use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};

/// On-disk representation of the configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    client_id: String,
    redirect_uri: Url,
    scopes: Option<Vec<String>>,
    authorize_url: Option<Url>,
    token_url: Option<Url>,
    api_url: Option<Url>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub client_id: String,
    pub redirect_uri: Url,
    pub scopes: Vec<String>,

    pub authorize_url: Url,
    pub token_url: Url,
    pub api_url: Url,

    pub user_agent: String,
}

impl Config {
    pub const DEFAULT_AUTHORIZE_URL: &'static str = "https://accounts.example/authorize";
    pub const DEFAULT_TOKEN_URL: &'static str = "https://accounts.example/api/token";
    pub const DEFAULT_API_URL: &'static str = "https://api.example/v1/";

    pub const DEFAULT_SCOPES: [&'static str; 4] = [
        "user-read-private",
        "user-read-email",
        "playlist-read-private",
        "user-library-read",
    ];

    /// Prevent out-of-memory condition: configuration files should be small.
    const MAX_FILE_SIZE: u64 = 16 * 1024;

    /// Creates a configuration with default endpoints and scopes.
    ///
    /// # Errors
    ///
    /// Will return `Err` if `client_id` is empty or contains whitespace.
    pub fn new(client_id: &str, redirect_uri: Url) -> Result<Self> {
        if client_id.is_empty() || client_id.contains(char::is_whitespace) {
            return Err(Error::invalid_argument(format!(
                "client id invalid (\"{client_id}\")"
            )));
        }

        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();

        let os_name = match std::env::consts::OS {
            "macos" => "osx",
            other => other,
        };
        let os_version = sysinfo::System::os_version().unwrap_or_else(|| String::from("0"));
        let user_agent = format!("{app_name}/{app_version} (Rust; {os_name}/{os_version})");
        trace!("user agent: {user_agent}");

        Ok(Self {
            client_id: client_id.to_owned(),
            redirect_uri,
            scopes: Self::DEFAULT_SCOPES.map(ToOwned::to_owned).to_vec(),

            authorize_url: Url::parse(Self::DEFAULT_AUTHORIZE_URL)?,
            token_url: Url::parse(Self::DEFAULT_TOKEN_URL)?,
            api_url: Url::parse(Self::DEFAULT_API_URL)?,

            user_agent,
        })
    }

    /// Loads the configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Will return `Err` if:
    /// - the file cannot be read or is larger than 16 KiB
    /// - the file is not valid TOML or has unknown keys
    /// - the client id is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file_size = fs::metadata(path)?.len();
        if file_size > Self::MAX_FILE_SIZE {
            return Err(Error::invalid_argument(format!(
                "{} is too large",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path)?;
        contents.parse()
    }

    /// The API base URL with a guaranteed trailing slash, so that joined
    /// endpoint paths extend it instead of replacing its last segment.
    #[must_use]
    pub fn api_base(&self) -> Url {
        let mut base = self.api_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base
    }
}

impl std::str::FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(s)?;

        let mut config = Self::new(&file.client_id, file.redirect_uri)?;
        if let Some(scopes) = file.scopes {
            config.scopes = scopes;
        }
        if let Some(url) = file.authorize_url {
            config.authorize_url = url;
        }
        if let Some(url) = file.token_url {
            config.token_url = url;
        }
        if let Some(url) = file.api_url {
            config.api_url = url;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn parses_minimal_file() {
        let config: Config = r#"
            client_id = "abc123"
            redirect_uri = "http://127.0.0.1:8888/callback"
        "#
        .parse()
        .unwrap();

        assert_eq!(config.client_id, "abc123");
        assert_eq!(config.token_url.as_str(), Config::DEFAULT_TOKEN_URL);
        assert_eq!(config.scopes.len(), 4);
        assert!(config.user_agent.starts_with("cadenza/"));
    }

    #[test]
    fn overrides_endpoints() {
        let config: Config = r#"
            client_id = "abc123"
            redirect_uri = "http://127.0.0.1:8888/callback"
            scopes = ["user-library-read"]
            api_url = "http://localhost:9000/api"
        "#
        .parse()
        .unwrap();

        assert_eq!(config.scopes, vec!["user-library-read".to_owned()]);
        assert_eq!(config.api_base().as_str(), "http://localhost:9000/api/");
    }

    #[test]
    fn rejects_empty_client_id() {
        let err = r#"
            client_id = ""
            redirect_uri = "http://127.0.0.1:8888/callback"
        "#
        .parse::<Config>()
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = r#"
            client_id = "abc123"
            client_secret = "nope"
            redirect_uri = "http://127.0.0.1:8888/callback"
        "#
        .parse::<Config>()
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidData);
    }
}
