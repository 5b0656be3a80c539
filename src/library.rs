//! Views assembled from several API calls.
//!
//! Each view has one primary fetch whose failure fails the view, and
//! secondary fetches that only enrich it. A failing secondary fetch is
//! logged and recorded in [`Loaded::suppressed`], and the view is returned
//! in a degraded form:
//!
//! | View     | Primary             | Secondary (fallback on failure)                |
//! |----------|---------------------|------------------------------------------------|
//! | Playlist | `GET /playlists/id` | all track pages (first page only), owner images (none) |
//! | Album    | `GET /albums/id`    | all track pages (embedded simplified tracks)   |
//! | Landing  | playlists, albums   | each is the other's fallback; fails only if both fail |
//!
//! Selections started through [`Library::select_playlist`] and
//! [`Library::select_album`] are fenced: a load that completes after a newer
//! selection was started reports [`Selection::Superseded`] instead of its
//! result, so that a slow response never overwrites a newer view.

use std::{
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::{
    api::ApiClient,
    error::{Error, Result},
    protocol::catalog::{AlbumDetails, Playlist, PlaylistDetails, SavedAlbum},
};

/// A value together with the secondary failures it was built despite.
#[derive(Debug)]
pub struct Loaded<T> {
    pub value: T,
    pub suppressed: Vec<Error>,
}

impl<T> Loaded<T> {
    #[must_use]
    pub fn complete(value: T) -> Self {
        Self {
            value,
            suppressed: Vec::new(),
        }
    }

    /// Whether any secondary step failed.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.suppressed.is_empty()
    }

    fn suppress(&mut self, error: Error) {
        self.suppressed.push(error);
    }
}

/// The user's library overview.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Landing {
    pub playlists: Vec<Playlist>,
    pub albums: Vec<SavedAlbum>,
}

/// Outcome of a fenced load.
#[derive(Debug)]
pub enum Selection<T> {
    /// The load belongs to the most recent selection.
    Current(T),
    /// A newer selection was started while this load was in flight.
    Superseded,
}

impl<T> Selection<T> {
    #[must_use]
    pub fn current(self) -> Option<T> {
        match self {
            Selection::Current(value) => Some(value),
            Selection::Superseded => None,
        }
    }
}

pub struct Library {
    api: ApiClient,
    selection: AtomicU64,
}

impl Library {
    #[must_use]
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            selection: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Loads a playlist with all of its tracks and the owner's images.
    ///
    /// On success without degradation the track total equals the number of
    /// tracks held. When the track listing fails, the first page embedded in
    /// the playlist response is kept along with the server's total.
    ///
    /// # Errors
    ///
    /// Will return `Err` only if the playlist itself cannot be fetched.
    pub async fn load_playlist_details(&self, id: &str) -> Result<Loaded<PlaylistDetails>> {
        let response = self.api.playlist(id).await?;
        let owner_id = response.owner.id.clone();
        let mut loaded = Loaded::complete(PlaylistDetails::from(response));

        let (tracks, owner) = tokio::join!(self.api.all_playlist_tracks(id), async {
            if owner_id.is_empty() {
                Err(Error::invalid_data(format!("playlist {id} has no owner")))
            } else {
                self.api.user_profile(&owner_id).await
            }
        });

        match tracks {
            Ok(tracks) => loaded.value = loaded.value.with_tracks(tracks),
            Err(e) => {
                warn!(
                    "playlist {id}: keeping first {} of {} tracks: {e}",
                    loaded.value.tracks.items.len(),
                    loaded.value.tracks.total
                );
                loaded.suppress(e);
            }
        }

        match owner {
            Ok(profile) => loaded.value.owner.images = Some(profile.images),
            Err(e) => {
                warn!("playlist {id}: owner images unavailable: {e}");
                loaded.suppress(e);
            }
        }

        Ok(loaded)
    }

    /// Loads an album with all of its tracks.
    ///
    /// Tracks carry a reference to the album. When the track listing fails,
    /// the simplified tracks embedded in the album response are used.
    ///
    /// # Errors
    ///
    /// Will return `Err` only if the album itself cannot be fetched.
    pub async fn load_album_details(&self, id: &str) -> Result<Loaded<AlbumDetails>> {
        let response = self.api.album(id).await?;
        let mut loaded = Loaded::complete(AlbumDetails::from(response));

        match self.api.all_album_tracks(id).await {
            Ok(tracks) => {
                let album = loaded.value.album_ref();
                let tracks = tracks
                    .into_iter()
                    .map(|track| track.into_track(&album))
                    .collect();
                loaded.value = loaded.value.with_tracks(tracks);
            }
            Err(e) => {
                warn!(
                    "album {id}: keeping {} embedded tracks: {e}",
                    loaded.value.tracks.items.len()
                );
                loaded.suppress(e);
            }
        }

        Ok(loaded)
    }

    /// Loads playlists and saved albums concurrently.
    ///
    /// Both requests settle before the results are combined, so one failing
    /// never hides the other's data.
    ///
    /// # Errors
    ///
    /// Will return `Err` only if both listings fail; the playlists' error
    /// is returned.
    pub async fn load_landing(&self) -> Result<Loaded<Landing>> {
        let (playlists, albums) =
            tokio::join!(self.api.user_playlists(), self.api.user_saved_albums());

        let mut loaded = Loaded::complete(Landing::default());
        match (playlists, albums) {
            (Err(playlists), Err(albums)) => {
                error!("library unavailable: {albums}");
                return Err(playlists);
            }
            (playlists, albums) => {
                match playlists {
                    Ok(playlists) => loaded.value.playlists = playlists,
                    Err(e) => {
                        warn!("playlists unavailable: {e}");
                        loaded.suppress(e);
                    }
                }
                match albums {
                    Ok(albums) => loaded.value.albums = albums,
                    Err(e) => {
                        warn!("saved albums unavailable: {e}");
                        loaded.suppress(e);
                    }
                }
            }
        }

        Ok(loaded)
    }

    /// Starts a new selection and loads `id`, fenced against newer
    /// selections.
    ///
    /// # Errors
    ///
    /// See [`load_playlist_details`](Self::load_playlist_details). Errors of
    /// a superseded load are discarded.
    pub async fn select_playlist(&self, id: &str) -> Result<Selection<Loaded<PlaylistDetails>>> {
        self.fenced(self.load_playlist_details(id)).await
    }

    /// Starts a new selection and loads `id`, fenced against newer
    /// selections.
    ///
    /// # Errors
    ///
    /// See [`load_album_details`](Self::load_album_details). Errors of a
    /// superseded load are discarded.
    pub async fn select_album(&self, id: &str) -> Result<Selection<Loaded<AlbumDetails>>> {
        self.fenced(self.load_album_details(id)).await
    }

    async fn fenced<T, F>(&self, load: F) -> Result<Selection<T>>
    where
        F: Future<Output = Result<T>>,
    {
        let ticket = self.selection.fetch_add(1, Ordering::AcqRel) + 1;
        let result = load.await;

        let latest = self.selection.load(Ordering::Acquire);
        if latest != ticket {
            debug!("selection {ticket} superseded by {latest}");
            return Ok(Selection::Superseded);
        }

        result.map(Selection::Current)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reqwest::StatusCode;
    use url::Url;

    use super::*;
    use crate::{
        auth::testing::StaticToken, config::Config, error::ErrorKind,
        http::testing::ScriptedTransport,
    };

    const PLAYLIST: &str = r#"{
        "id": "p1",
        "name": "Road trip",
        "owner": {"id": "u1", "display_name": "Ann"},
        "tracks": {
            "total": 3,
            "next": "https://api.example/v1/playlists/p1/tracks?offset=1&limit=1",
            "items": [{"track": {"id": "t1", "name": "One", "duration_ms": 1000}}]
        }
    }"#;

    const ALL_TRACKS: &str = r#"{
        "items": [
            {"track": {"id": "t1", "name": "One", "duration_ms": 1000}},
            {"track": null},
            {"track": {"id": "t3", "name": "Three", "duration_ms": 3000}}
        ],
        "next": null,
        "total": 3
    }"#;

    const OWNER: &str =
        r#"{"id": "u1", "images": [{"url": "https://img.example/u1.jpg", "height": 64, "width": 64}]}"#;

    fn library() -> (Library, Arc<ScriptedTransport>) {
        let config = Config::new(
            "client-1",
            Url::parse("http://127.0.0.1:8888/callback").unwrap(),
        )
        .unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        let api = ApiClient::new(&config, transport.clone(), Arc::new(StaticToken("A")));
        (Library::new(api), transport)
    }

    #[tokio::test]
    async fn playlist_with_all_tracks_and_owner() {
        let (library, transport) = library();
        transport
            .respond("/v1/playlists/p1", 200, PLAYLIST)
            .respond("/v1/playlists/p1/tracks", 200, ALL_TRACKS)
            .respond("/v1/users/u1", 200, OWNER);

        let loaded = library.load_playlist_details("p1").await.unwrap();
        assert!(!loaded.is_degraded());

        let details = loaded.value;
        assert_eq!(details.tracks.items.len(), 2);
        assert_eq!(details.tracks.total, 2);
        assert_eq!(details.owner.images.unwrap()[0].url, "https://img.example/u1.jpg");
    }

    #[tokio::test]
    async fn playlist_falls_back_to_first_page() {
        let (library, transport) = library();
        transport
            .respond("/v1/playlists/p1", 200, PLAYLIST)
            .respond("/v1/playlists/p1/tracks", 500, "")
            .respond("/v1/users/u1", 200, OWNER);

        let loaded = library.load_playlist_details("p1").await.unwrap();
        assert!(loaded.is_degraded());
        assert_eq!(
            loaded.suppressed[0].kind,
            ErrorKind::Http(StatusCode::INTERNAL_SERVER_ERROR)
        );

        let details = loaded.value;
        assert_eq!(details.tracks.items.len(), 1);
        assert_eq!(details.tracks.items[0].name, "One");
        assert_eq!(details.tracks.total, 3);
        assert!(details.owner.images.is_some());
    }

    #[tokio::test]
    async fn owner_enrichment_is_best_effort() {
        let (library, transport) = library();
        transport
            .respond("/v1/playlists/p1", 200, PLAYLIST)
            .respond("/v1/playlists/p1/tracks", 200, ALL_TRACKS)
            .respond("/v1/users/u1", 404, "");

        let loaded = library.load_playlist_details("p1").await.unwrap();
        assert_eq!(loaded.suppressed.len(), 1);
        assert_eq!(loaded.value.owner.images, None);
        assert_eq!(loaded.value.owner.display_name.as_deref(), Some("Ann"));
        assert_eq!(loaded.value.tracks.total, 2);
    }

    #[tokio::test]
    async fn primary_failure_propagates() {
        let (library, transport) = library();
        transport.respond("/v1/playlists/p1", 404, "");

        let err = library.load_playlist_details("p1").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Http(StatusCode::NOT_FOUND));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn album_tracks_reference_album() {
        let (library, transport) = library();
        transport
            .respond(
                "/v1/albums/a1",
                200,
                r#"{"id":"a1","name":"Blue","images":[{"url":"https://img.example/a1.jpg"}],
                    "tracks":{"items":[{"name":"One"}],"total":2}}"#,
            )
            .respond(
                "/v1/albums/a1/tracks",
                200,
                r#"{"items":[{"name":"One","duration_ms":1000},{"name":"Two"}],"next":null}"#,
            );

        let loaded = library.load_album_details("a1").await.unwrap();
        assert!(!loaded.is_degraded());

        let tracks = loaded.value.tracks;
        assert_eq!(tracks.total, 2);
        assert!(tracks.items.iter().all(|t| t.album.name == "Blue"));
        assert_eq!(tracks.items[1].duration_ms, 0);
    }

    #[tokio::test]
    async fn album_falls_back_to_embedded_tracks() {
        let (library, transport) = library();
        transport.respond(
            "/v1/albums/a1",
            200,
            r#"{"id":"a1","name":"Blue","tracks":{"items":[{"name":"One"},null],"total":2}}"#,
        );

        let loaded = library.load_album_details("a1").await.unwrap();
        assert!(loaded.is_degraded());
        assert_eq!(loaded.value.tracks.items.len(), 1);
        assert_eq!(loaded.value.tracks.items[0].album.name, "Blue");
        assert_eq!(loaded.value.tracks.items[0].duration_ms, 0);
    }

    #[tokio::test]
    async fn landing_keeps_the_surviving_source() {
        let (library, transport) = library();
        transport
            .respond("/v1/me/playlists", 503, "")
            .respond(
                "/v1/me/albums",
                200,
                r#"{"items":[{"album":{"id":"a1","name":"Blue"}}],"next":null}"#,
            );

        let loaded = library.load_landing().await.unwrap();
        assert!(loaded.is_degraded());
        assert!(loaded.value.playlists.is_empty());
        assert_eq!(loaded.value.albums[0].album.name, "Blue");
    }

    #[tokio::test]
    async fn landing_fails_when_both_sources_fail() {
        let (library, transport) = library();
        transport
            .respond("/v1/me/playlists", 503, "")
            .respond("/v1/me/albums", 500, "");

        let err = library.load_landing().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Http(StatusCode::SERVICE_UNAVAILABLE));
    }

    #[tokio::test]
    async fn newer_selection_supersedes_slower_one() {
        let (library, transport) = library();
        transport
            .respond("/v1/playlists/p1", 200, PLAYLIST)
            .respond(
                "/v1/playlists/p2",
                200,
                r#"{"id":"p2","name":"Focus","tracks":{"items":[],"total":0}}"#,
            );

        let (first, second) = tokio::join!(
            library.select_playlist("p1"),
            library.select_playlist("p2")
        );

        assert!(matches!(first.unwrap(), Selection::Superseded));
        let second = second.unwrap().current().unwrap();
        assert_eq!(second.value.name, "Focus");
    }

    #[tokio::test]
    async fn sequential_selections_are_current() {
        let (library, transport) = library();
        transport
            .respond("/v1/albums/a1", 200, r#"{"id":"a1","name":"Blue"}"#)
            .respond("/v1/albums/a2", 200, r#"{"id":"a2","name":"Red"}"#);

        let first = library.select_album("a1").await.unwrap();
        let second = library.select_album("a2").await.unwrap();
        assert_eq!(first.current().unwrap().value.name, "Blue");
        assert_eq!(second.current().unwrap().value.name, "Red");
    }
}
