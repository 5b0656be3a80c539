//! Catalog entities of the web API.
//!
//! Two kinds of types live here:
//! * wire types mirroring response bodies ([`Page`], [`PlaylistResponse`],
//!   [`AlbumResponse`], ...)
//! * aggregates handed to callers ([`PlaylistDetails`], [`AlbumDetails`]),
//!   which carry a flat [`TrackList`] instead of the wire's nested pages
//!
//! # Wire Format
//!
//! Every collection is paginated the same way:
//! ```json
//! {
//!     "href": "https://api.example/v1/me/playlists?offset=0&limit=50",
//!     "items": [ ... ],
//!     "limit": 50,
//!     "next": "https://api.example/v1/me/playlists?offset=50&limit=50",
//!     "offset": 0,
//!     "total": 73
//! }
//! ```
//!
//! Playlist track pages wrap each track in an item whose `track` may be
//! `null` when the track was removed from the catalog.

use serde::{Deserialize, Serialize};

/// One page of a cursor-paginated collection.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,

    /// Absolute URL of the next page, `None` when exhausted
    #[serde(default)]
    pub next: Option<String>,

    /// Number of items the server reports for the whole collection
    #[serde(default)]
    pub total: u32,
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            next: None,
            total: 0,
        }
    }
}

impl<T> Page<T> {
    /// The continuation cursor, treating an empty string as exhausted.
    #[must_use]
    pub fn next_cursor(&self) -> Option<&str> {
        self.next.as_deref().filter(|next| !next.is_empty())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Image {
    pub url: String,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub width: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Artist {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
}

/// Album reference embedded in a track.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct AlbumRef {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub images: Vec<Image>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Track {
    /// Local files have no catalog id
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<Artist>,
    #[serde(default)]
    pub album: AlbumRef,
    /// Duration in milliseconds
    #[serde(default)]
    pub duration_ms: u64,
}

impl Track {
    /// Artist names joined for display.
    #[must_use]
    pub fn artist_names(&self) -> String {
        self.artists
            .iter()
            .map(|artist| artist.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Item of a playlist track page.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct PlaylistItem {
    #[serde(default)]
    pub added_at: Option<String>,
    /// `null` for tracks that are no longer available
    #[serde(default)]
    pub track: Option<Track>,
}

/// Track as embedded in an album, without album reference.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct AlbumTrack {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<Artist>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

impl AlbumTrack {
    /// Completes the track with a reference to the album it belongs to.
    #[must_use]
    pub fn into_track(self, album: &AlbumRef) -> Track {
        Track {
            id: self.id,
            name: self.name,
            artists: self.artists,
            album: album.clone(),
            duration_ms: self.duration_ms.unwrap_or_default(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TrackCount {
    #[serde(default)]
    pub total: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Owner {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Not part of the playlist response; filled from the owner's profile
    #[serde(default)]
    pub images: Option<Vec<Image>>,
}

/// Playlist as listed in the user's library.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub tracks: TrackCount,
    #[serde(default)]
    pub owner: Owner,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Album {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub artists: Vec<Artist>,
    #[serde(default)]
    pub total_tracks: Option<u32>,
}

/// Item of the saved albums collection.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SavedAlbum {
    #[serde(default)]
    pub added_at: Option<String>,
    pub album: Album,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

/// Response of `GET /playlists/{id}`, carrying the first page of tracks.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct PlaylistResponse {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub owner: Owner,
    #[serde(default)]
    pub tracks: Page<Option<PlaylistItem>>,
}

/// Response of `GET /albums/{id}`, carrying the first page of tracks.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AlbumResponse {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub artists: Vec<Artist>,
    #[serde(default)]
    pub tracks: Page<Option<AlbumTrack>>,
}

/// Flat track collection of an aggregate.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TrackList {
    pub total: u32,
    pub items: Vec<Track>,
}

impl TrackList {
    /// Builds a list whose total is the number of tracks actually held.
    #[must_use]
    pub fn complete(items: Vec<Track>) -> Self {
        Self {
            total: u32::try_from(items.len()).unwrap_or(u32::MAX),
            items,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlaylistDetails {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub images: Vec<Image>,
    pub owner: Owner,
    pub tracks: TrackList,
}

impl PlaylistDetails {
    /// Replaces the tracks with a fully paginated list.
    #[must_use]
    pub fn with_tracks(self, tracks: Vec<Track>) -> Self {
        Self {
            tracks: TrackList::complete(tracks),
            ..self
        }
    }
}

/// Details built from the first page only. The total is the server's,
/// since the remaining pages were not retrieved.
impl From<PlaylistResponse> for PlaylistDetails {
    fn from(response: PlaylistResponse) -> Self {
        let total = response.tracks.total;
        let items = response
            .tracks
            .items
            .into_iter()
            .flatten()
            .filter_map(|item| item.track)
            .collect();

        Self {
            id: response.id,
            name: response.name,
            description: response.description,
            images: response.images,
            owner: response.owner,
            tracks: TrackList { total, items },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AlbumDetails {
    pub id: String,
    pub name: String,
    pub images: Vec<Image>,
    pub artists: Vec<Artist>,
    pub tracks: TrackList,
}

impl AlbumDetails {
    #[must_use]
    pub fn with_tracks(self, tracks: Vec<Track>) -> Self {
        Self {
            tracks: TrackList::complete(tracks),
            ..self
        }
    }

    #[must_use]
    pub fn album_ref(&self) -> AlbumRef {
        AlbumRef {
            name: self.name.clone(),
            images: self.images.clone(),
        }
    }
}

/// Details built from the simplified tracks embedded in the album response.
impl From<AlbumResponse> for AlbumDetails {
    fn from(response: AlbumResponse) -> Self {
        let album = AlbumRef {
            name: response.name.clone(),
            images: response.images.clone(),
        };
        let total = response.tracks.total;
        let items = response
            .tracks
            .items
            .into_iter()
            .flatten()
            .map(|track| track.into_track(&album))
            .collect();

        Self {
            id: response.id,
            name: response.name,
            images: response.images,
            artists: response.artists,
            tracks: TrackList { total, items },
        }
    }
}
