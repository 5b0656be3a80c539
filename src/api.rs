//! Web API client that resolves cursor pagination into complete listings.
//!
//! Every request carries a bearer token from an [`AccessTokenProvider`],
//! asked anew for each page so that a token renewed halfway through a long
//! listing is picked up.
//!
//! Listings are all-or-nothing: the first non-success page fails the whole
//! listing with [`ErrorKind::Http`](crate::error::ErrorKind::Http) and the
//! pages already received are discarded. Credential errors reported by the
//! token provider are passed through unchanged.
//!
//! # Example
//!
//! ```rust
//! use cadenza::api::ApiClient;
//!
//! let api = ApiClient::new(&config, transport, authenticator);
//! for playlist in api.user_playlists().await? {
//!     println!("{} ({} tracks)", playlist.name, playlist.tracks.total);
//! }
//! ```

use std::sync::Arc;

use serde::Deserialize;
use url::Url;

use crate::{
    auth::AccessTokenProvider,
    config::Config,
    error::{Error, Result},
    http::Transport,
    protocol::catalog::{
        AlbumResponse, AlbumTrack, Page, Playlist, PlaylistItem, PlaylistResponse, SavedAlbum,
        Track, UserProfile,
    },
};

/// Replaces the `limit` query parameter of `url`, or adds it when absent.
///
/// Other parameters keep their order. A duplicated `limit` in the input is
/// collapsed into one.
#[must_use]
pub fn with_page_size(url: &Url, limit: u32) -> Url {
    let limit = limit.to_string();
    let mut replaced = false;

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter_map(|(key, value)| {
            if key != "limit" {
                return Some((key.into_owned(), value.into_owned()));
            }
            if replaced {
                return None;
            }
            replaced = true;
            Some((key.into_owned(), limit.clone()))
        })
        .collect();

    let mut url = url.clone();
    {
        let mut query = url.query_pairs_mut();
        query.clear().extend_pairs(pairs);
        if !replaced {
            query.append_pair("limit", &limit);
        }
    }
    url
}

pub struct ApiClient {
    base: Url,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl ApiClient {
    pub const PLAYLISTS_PAGE_SIZE: u32 = 50;
    pub const SAVED_ALBUMS_PAGE_SIZE: u32 = 50;
    pub const PLAYLIST_TRACKS_PAGE_SIZE: u32 = 100;
    pub const ALBUM_TRACKS_PAGE_SIZE: u32 = 50;

    #[must_use]
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> Self {
        Self {
            base: config.api_base(),
            transport,
            tokens,
        }
    }

    /// Builds a URL below the API base from raw path segments, which are
    /// percent-encoded as needed.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        if segments.iter().any(|segment| segment.trim().is_empty()) {
            return Err(Error::invalid_argument(format!(
                "empty path segment in /{}",
                segments.join("/")
            )));
        }

        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| Error::invalid_argument(format!("{} cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn listing(&self, segments: &[&str], limit: u32) -> Result<Url> {
        self.endpoint(segments).map(|url| with_page_size(&url, limit))
    }

    /// Issues one authenticated GET and parses the response.
    ///
    /// # Errors
    ///
    /// Will return `Err` if:
    /// - the token provider fails, with its error unchanged
    /// - the request fails or returns a non-success status
    /// - the body does not parse into `T`
    pub async fn get<T>(&self, url: &Url) -> Result<T>
    where
        T: for<'de> Deserialize<'de> + std::fmt::Debug,
    {
        let token = self.tokens.access_token().await?;
        let response = self.transport.get_with_bearer(url, &token).await?;

        if !response.is_success() {
            warn!("GET {} failed with {}", url.path(), response.status);
            return Err(Error::http(
                response.status,
                format!("GET {}", url.path()),
            ));
        }

        response.json()
    }

    /// Follows `next` cursors from `first_url` and concatenates all items.
    ///
    /// Pages are requested strictly one after another. The loop ends when
    /// `extract_next` returns `None` or an empty string.
    ///
    /// # Errors
    ///
    /// Will return `Err` on the first failing page, see [`get`](Self::get),
    /// or when a cursor is not a URL on the API's origin. Items of earlier
    /// pages are discarded.
    pub async fn fetch_all_pages<P, T, I, N>(
        &self,
        first_url: Url,
        mut extract_items: I,
        extract_next: N,
    ) -> Result<Vec<T>>
    where
        P: for<'de> Deserialize<'de> + std::fmt::Debug,
        I: FnMut(P) -> Vec<T>,
        N: Fn(&P) -> Option<String>,
    {
        let mut items = Vec::new();
        let mut next = Some(first_url);
        let mut pages = 0_usize;

        while let Some(url) = next.take() {
            let page: P = self.get(&url).await?;
            pages += 1;

            next = match extract_next(&page) {
                Some(cursor) if !cursor.is_empty() => Some(self.cursor(&cursor)?),
                _ => None,
            };
            items.extend(extract_items(page));
        }

        debug!("fetched {} items in {pages} pages", items.len());
        Ok(items)
    }

    /// Parses a continuation cursor. The bearer token is only ever sent to
    /// the API's own origin.
    fn cursor(&self, cursor: &str) -> Result<Url> {
        let url = Url::parse(cursor)?;
        if url.origin() != self.base.origin() {
            return Err(Error::invalid_data(format!(
                "cursor {cursor} leaves the API origin"
            )));
        }
        Ok(url)
    }

    /// Follows a standard [`Page`] listing.
    async fn fetch_all<T>(&self, first_url: Url) -> Result<Vec<T>>
    where
        T: for<'de> Deserialize<'de> + std::fmt::Debug,
    {
        self.fetch_all_pages(
            first_url,
            |page: Page<T>| page.items,
            |page| page.next_cursor().map(ToOwned::to_owned),
        )
        .await
    }

    /// All playlists of the current user.
    ///
    /// # Errors
    ///
    /// See [`fetch_all_pages`](Self::fetch_all_pages).
    pub async fn user_playlists(&self) -> Result<Vec<Playlist>> {
        let url = self.listing(&["me", "playlists"], Self::PLAYLISTS_PAGE_SIZE)?;
        self.fetch_all(url).await
    }

    /// All albums saved in the current user's library.
    ///
    /// # Errors
    ///
    /// See [`fetch_all_pages`](Self::fetch_all_pages).
    pub async fn user_saved_albums(&self) -> Result<Vec<SavedAlbum>> {
        let url = self.listing(&["me", "albums"], Self::SAVED_ALBUMS_PAGE_SIZE)?;
        self.fetch_all(url).await
    }

    /// Playlist metadata with its first page of tracks.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn playlist(&self, id: &str) -> Result<PlaylistResponse> {
        let url = self.endpoint(&["playlists", id])?;
        self.get(&url).await
    }

    /// Album metadata with its first page of simplified tracks.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn album(&self, id: &str) -> Result<AlbumResponse> {
        let url = self.endpoint(&["albums", id])?;
        self.get(&url).await
    }

    /// Every available track of a playlist. Entries whose track was removed
    /// from the catalog are dropped.
    ///
    /// # Errors
    ///
    /// See [`fetch_all_pages`](Self::fetch_all_pages).
    pub async fn all_playlist_tracks(&self, id: &str) -> Result<Vec<Track>> {
        let url = self.listing(&["playlists", id, "tracks"], Self::PLAYLIST_TRACKS_PAGE_SIZE)?;
        let items: Vec<Option<PlaylistItem>> = self.fetch_all(url).await?;
        Ok(items
            .into_iter()
            .flatten()
            .filter_map(|item| item.track)
            .collect())
    }

    /// Every track of an album, as simplified records without album
    /// reference.
    ///
    /// Continuation cursors are rewritten to keep the page size constant.
    ///
    /// # Errors
    ///
    /// See [`fetch_all_pages`](Self::fetch_all_pages).
    pub async fn all_album_tracks(&self, id: &str) -> Result<Vec<AlbumTrack>> {
        let url = self.listing(&["albums", id, "tracks"], Self::ALBUM_TRACKS_PAGE_SIZE)?;
        self.fetch_all_pages(
            url,
            |page: Page<Option<AlbumTrack>>| page.items.into_iter().flatten().collect(),
            |page| {
                let next = page.next_cursor()?;
                Some(match Url::parse(next) {
                    Ok(url) => with_page_size(&url, Self::ALBUM_TRACKS_PAGE_SIZE).into(),
                    // Left for `fetch_all_pages` to reject.
                    Err(_) => next.to_owned(),
                })
            },
        )
        .await
    }

    /// Public profile of any user.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn user_profile(&self, id: &str) -> Result<UserProfile> {
        let url = self.endpoint(&["users", id])?;
        self.get(&url).await
    }

    /// Profile of the current user.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn current_user(&self) -> Result<UserProfile> {
        let url = self.endpoint(&["me"])?;
        self.get(&url).await
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::*;
    use crate::{
        auth::testing::{NoToken, StaticToken},
        error::ErrorKind,
        http::testing::ScriptedTransport,
    };

    const API: &str = "https://api.example/v1";

    fn client(tokens: Arc<dyn AccessTokenProvider>) -> (ApiClient, Arc<ScriptedTransport>) {
        let config = Config::new(
            "client-1",
            Url::parse("http://127.0.0.1:8888/callback").unwrap(),
        )
        .unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        let api = ApiClient::new(&config, transport.clone(), tokens);
        (api, transport)
    }

    fn playlist(id: &str) -> String {
        format!(r#"{{"id":"{id}","name":"Playlist {id}","tracks":{{"total":0}}}}"#)
    }

    fn playlist_page(ids: &[&str], next: Option<&str>) -> String {
        let items: Vec<String> = ids.iter().map(|id| playlist(id)).collect();
        let next = next.map_or_else(|| "null".to_owned(), |next| format!("\"{next}\""));
        format!(
            r#"{{"items":[{}],"next":{next},"total":5}}"#,
            items.join(",")
        )
    }

    #[test]
    fn page_size_is_replaced_not_duplicated() {
        let url = Url::parse(&format!("{API}/albums/a1/tracks?offset=50&limit=20")).unwrap();
        let url = with_page_size(&url, 50);
        assert_eq!(url.query(), Some("offset=50&limit=50"));

        let url = Url::parse(&format!("{API}/albums/a1/tracks?offset=50")).unwrap();
        assert_eq!(with_page_size(&url, 50).query(), Some("offset=50&limit=50"));

        let url = Url::parse(&format!("{API}/x?limit=1&limit=2")).unwrap();
        assert_eq!(with_page_size(&url, 3).query(), Some("limit=3"));
    }

    #[tokio::test]
    async fn follows_cursors_in_order() {
        let (api, transport) = client(Arc::new(StaticToken("A")));
        transport
            .respond(
                "/v1/me/playlists",
                200,
                &playlist_page(&["p1", "p2"], Some(&format!("{API}/me/playlists?offset=2&limit=2"))),
            )
            .respond(
                "/v1/me/playlists",
                200,
                &playlist_page(&["p3", "p4"], Some(&format!("{API}/me/playlists?offset=4&limit=2"))),
            )
            .respond("/v1/me/playlists", 200, &playlist_page(&["p5"], None));

        let playlists = api.user_playlists().await.unwrap();
        let ids: Vec<_> = playlists.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["p1", "p2", "p3", "p4", "p5"]);

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].url.query(), Some("limit=50"));
        assert_eq!(requests[1].url.query(), Some("offset=2&limit=2"));
        assert_eq!(requests[2].url.query(), Some("offset=4&limit=2"));
        assert!(requests.iter().all(|r| r.token.as_deref() == Some("A")));
    }

    #[tokio::test]
    async fn empty_cursor_ends_listing() {
        let (api, transport) = client(Arc::new(StaticToken("A")));
        transport.respond(
            "/v1/me/albums",
            200,
            r#"{"items":[{"album":{"id":"a1","name":"One"}}],"next":""}"#,
        );

        let albums = api.user_saved_albums().await.unwrap();
        assert_eq!(albums.len(), 1);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn failing_page_discards_partial_results() {
        let (api, transport) = client(Arc::new(StaticToken("A")));
        transport
            .respond(
                "/v1/me/playlists",
                200,
                &playlist_page(&["p1"], Some(&format!("{API}/me/playlists?offset=1"))),
            )
            .respond("/v1/me/playlists", 502, "");

        let err = api.user_playlists().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Http(StatusCode::BAD_GATEWAY));
    }

    #[tokio::test]
    async fn credential_errors_pass_through() {
        let (api, transport) = client(Arc::new(NoToken));

        let err = api.user_playlists().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotAuthenticated);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn removed_tracks_are_dropped() {
        let (api, transport) = client(Arc::new(StaticToken("A")));
        transport.respond(
            "/v1/playlists/p1/tracks",
            200,
            r#"{
                "items": [
                    {"track": {"id": "t1", "name": "One", "duration_ms": 1000}},
                    {"track": null},
                    {"track": {"id": "t3", "name": "Three", "duration_ms": 3000}}
                ],
                "next": null,
                "total": 3
            }"#,
        );

        let tracks = api.all_playlist_tracks("p1").await.unwrap();
        let names: Vec<_> = tracks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["One", "Three"]);
        assert_eq!(
            transport.requests()[0].url.as_str(),
            format!("{API}/playlists/p1/tracks?limit=100")
        );
    }

    #[tokio::test]
    async fn album_track_cursors_keep_page_size() {
        let (api, transport) = client(Arc::new(StaticToken("A")));
        transport
            .respond(
                "/v1/albums/a1/tracks",
                200,
                &format!(
                    r#"{{"items":[{{"name":"One"}}],"next":"{API}/albums/a1/tracks?offset=1&limit=1"}}"#
                ),
            )
            .respond(
                "/v1/albums/a1/tracks",
                200,
                r#"{"items":[null,{"name":"Two","duration_ms":2000}],"next":null}"#,
            );

        let tracks = api.all_album_tracks("a1").await.unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(
            transport.requests()[1].url.query(),
            Some("offset=1&limit=50")
        );
    }

    #[tokio::test]
    async fn cursor_to_foreign_origin_is_rejected() {
        let (api, transport) = client(Arc::new(StaticToken("A")));
        transport.respond(
            "/v1/me/playlists",
            200,
            &playlist_page(&["p1"], Some("https://elsewhere.example/steal")),
        );

        let err = api.user_playlists().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidData);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn ids_are_path_encoded() {
        let (api, transport) = client(Arc::new(StaticToken("A")));
        transport.respond(
            "/v1/users/a%20b",
            200,
            r#"{"id":"a b","display_name":"Ann"}"#,
        );

        let profile = api.user_profile("a b").await.unwrap();
        assert_eq!(profile.display_name.as_deref(), Some("Ann"));

        let err = api.playlist("").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn current_user_reads_me() {
        let (api, transport) = client(Arc::new(StaticToken("A")));
        transport.respond("/v1/me", 200, r#"{"id":"u1","country":"NL"}"#);

        let me = api.current_user().await.unwrap();
        assert_eq!(me.id, "u1");
        assert_eq!(me.country.as_deref(), Some("NL"));
    }
}
