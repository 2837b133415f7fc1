//!
//! src/catalog.rs  Andrew Belles  Oct 2025
//!
//! Typed view over the catalog api. The fetcher and the materializer
//! only ever talk to the `Catalog` trait; `SpotifyCatalog` is the live
//! implementation that parses raw json from src/fetch.rs into domain types
//!

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::errors::SorterError;
use crate::fetch::{http_with_retry, SpotifyClient};
use crate::types::{Artist, AudioFeatures, Track};

/// One page of a playlist's items after unusable entries were dropped
#[derive(Debug, Clone, Default)]
pub struct TrackPage {
    pub tracks: Vec<Track>,
    pub total: u32,
    /// Offset of the following page, None on the last page
    pub next_offset: Option<u32>
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn playlist_name(&self, token: &str, playlist_id: &str) -> Result<String, SorterError>;

    async fn playlist_tracks(&self, token: &str, playlist_id: &str, offset: u32, limit: u32)
        -> Result<TrackPage, SorterError>;

    async fn artists(&self, token: &str, ids: &[String]) -> Result<Vec<Artist>, SorterError>;

    /// Entries the catalog has no analysis for are left out
    async fn audio_features(&self, token: &str, ids: &[String]) ->
        Result<Vec<(String, AudioFeatures)>, SorterError>;

    async fn current_user_id(&self, token: &str) -> Result<String, SorterError>;

    /// Creates a private playlist for the user and returns its id
    async fn create_playlist(&self, token: &str, user_id: &str, name: &str, description: &str)
        -> Result<String, SorterError>;

    async fn playlist_track_uris(&self, token: &str, playlist_id: &str) ->
        Result<Vec<String>, SorterError>;

    async fn add_tracks(&self, token: &str, playlist_id: &str, uris: &[String]) ->
        Result<(), SorterError>;
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(str::to_string)
}

fn require_str(v: &Value, key: &str, ctx: &str) -> Result<String, SorterError> {
    str_field(v, key).ok_or_else(|| SorterError::Parse(format!("{ctx}: missing {key}")))
}

/// Local files and removed tracks come back with a null track or id
fn parse_track(item: &Value) -> Option<Track> {
    let track = item.get("track").filter(|t| !t.is_null())?;
    let id = str_field(track, "id")?;
    let album = track.get("album").cloned().unwrap_or(Value::Null);
    let artists = track.get("artists").and_then(Value::as_array).cloned().unwrap_or_default();

    Some( Track {
        uri: str_field(track, "uri").unwrap_or_else(|| format!("spotify:track:{id}")),
        id,
        popularity: track.get("popularity").and_then(Value::as_i64),
        album: str_field(&album, "name").unwrap_or_default(),
        artists: artists.iter().filter_map(|a| str_field(a, "name")).collect(),
        artists_id: artists.iter().filter_map(|a| str_field(a, "id")).collect(),
        name: str_field(track, "name").unwrap_or_default(),
        release_date: str_field(&album, "release_date"),
        thumbnail_url: album.get("images")
            .and_then(Value::as_array)
            .and_then(|images| images.first())
            .and_then(|image| str_field(image, "url")),
        genres: None,
        features: AudioFeatures::default(),
    })
}

fn parse_track_page(v: &Value, offset: u32) -> Result<TrackPage, SorterError> {
    let items = v.get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| SorterError::Parse("playlist items: missing items".into()))?;
    let total = v.get("total").and_then(Value::as_u64).unwrap_or(0) as u32;

    let tracks: Vec<Track> = items.iter().filter_map(parse_track).collect();
    let skipped = items.len() - tracks.len();
    if skipped > 0 {
        debug!(skipped, offset, "catalog.items.skipped");
    }

    let has_next = v.get("next").is_some_and(|n| !n.is_null());
    let next_offset = (has_next && !items.is_empty()).then(|| offset + items.len() as u32);

    Ok( TrackPage { tracks, total, next_offset } )
}

fn parse_artists(v: &Value) -> Result<Vec<Artist>, SorterError> {
    let artists = v.get("artists")
        .and_then(Value::as_array)
        .ok_or_else(|| SorterError::Parse("artists: missing artists".into()))?;

    Ok( artists.iter()
        .filter(|a| !a.is_null())
        .filter_map(|a| {
            let id = str_field(a, "id")?;
            let genres = a.get("genres")
                .and_then(Value::as_array)
                .map(|g| g.iter().filter_map(|x| x.as_str().map(str::to_string)).collect())
                .unwrap_or_default();
            Some( Artist { id, genres, popularity: a.get("popularity").and_then(Value::as_i64) } )
        })
        .collect() )
}

fn parse_audio_features(v: &Value) -> Result<Vec<(String, AudioFeatures)>, SorterError> {
    let entries = v.get("audio_features")
        .and_then(Value::as_array)
        .ok_or_else(|| SorterError::Parse("audio features: missing audio_features".into()))?;

    let mut out = Vec::with_capacity(entries.len());
    for entry in entries.iter().filter(|e| !e.is_null()) {
        let Some(id) = str_field(entry, "id") else {
            continue;
        };
        out.push((id, serde_json::from_value::<AudioFeatures>(entry.clone())?));
    }
    Ok(out)
}

pub struct SpotifyCatalog {
    client: SpotifyClient,
    /// page size used when listing a destination playlist's members
    uri_page_size: u32
}

impl SpotifyCatalog {
    pub fn new(client: SpotifyClient) -> Self {
        Self { client, uri_page_size: 100 }
    }
}

#[async_trait]
impl Catalog for SpotifyCatalog {
    async fn playlist_name(&self, token: &str, playlist_id: &str) -> Result<String, SorterError> {
        let v = http_with_retry(self.client.playlist(playlist_id, token)?, &self.client.retry)
            .await?;
        require_str(&v, "name", "playlist")
    }

    async fn playlist_tracks(&self, token: &str, playlist_id: &str, offset: u32, limit: u32)
        -> Result<TrackPage, SorterError> {
        let request = self.client.playlist_items(playlist_id, offset, limit, token)?;
        let v = http_with_retry(request, &self.client.retry).await?;
        parse_track_page(&v, offset)
    }

    async fn artists(&self, token: &str, ids: &[String]) -> Result<Vec<Artist>, SorterError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let v = http_with_retry(self.client.artists(&ids.join(","), token)?, &self.client.retry)
            .await?;
        parse_artists(&v)
    }

    async fn audio_features(&self, token: &str, ids: &[String]) ->
        Result<Vec<(String, AudioFeatures)>, SorterError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let request = self.client.audio_features(&ids.join(","), token)?;
        let v = http_with_retry(request, &self.client.retry).await?;
        parse_audio_features(&v)
    }

    async fn current_user_id(&self, token: &str) -> Result<String, SorterError> {
        let v = http_with_retry(self.client.current_user(token)?, &self.client.retry).await?;
        require_str(&v, "id", "current user")
    }

    async fn create_playlist(&self, token: &str, user_id: &str, name: &str, description: &str)
        -> Result<String, SorterError> {
        let request = self.client.create_playlist(user_id, name, description, token)?;
        let v = http_with_retry(request, &self.client.retry).await?;
        require_str(&v, "id", "created playlist")
    }

    async fn playlist_track_uris(&self, token: &str, playlist_id: &str) ->
        Result<Vec<String>, SorterError> {
        let mut uris = Vec::new();
        let mut offset = Some(0);
        while let Some(current) = offset {
            let page = self.playlist_tracks(token, playlist_id, current, self.uri_page_size)
                .await?;
            uris.extend(page.tracks.into_iter().map(|t| t.uri));
            offset = page.next_offset;
        }
        Ok(uris)
    }

    async fn add_tracks(&self, token: &str, playlist_id: &str, uris: &[String]) ->
        Result<(), SorterError> {
        if uris.is_empty() {
            return Ok(());
        }
        let request = self.client.add_items(playlist_id, uris, token)?;
        http_with_retry(request, &self.client.retry).await?;
        Ok(())
    }
}
