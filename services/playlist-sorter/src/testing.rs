//!
//! src/testing.rs  Andrew Belles  Oct 2025
//!
//! Test doubles shared by the unit tests: an in-memory catalog with
//! failure injection, a scripted text provider and a rule-driven model
//!

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{atomic::{AtomicUsize, Ordering}, Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use url::Url;
use wiremock::MockServer;

use crate::catalog::{Catalog, TrackPage};
use crate::config::{HttpConfig, SpotifyConfig};
use crate::errors::SorterError;
use crate::fetch::SpotifyClient;
use crate::llm::{CompletionOptions, LlmError, LlmProvider};
use crate::model::CategoryModel;
use crate::types::{
    Artist, AudioFeatures, Category, Classification, ClassificationRecord, Track
};

pub fn track(id: &str, artist_ids: &[&str]) -> Track {
    Track {
        id: id.to_string(),
        uri: format!("spotify:track:{id}"),
        popularity: Some(10),
        album: format!("album {id}"),
        artists: artist_ids.iter().map(|a| format!("artist {a}")).collect(),
        artists_id: artist_ids.iter().map(|a| a.to_string()).collect(),
        name: format!("track {id}"),
        release_date: Some("2020-01-01".to_string()),
        thumbnail_url: None,
        genres: None,
        features: AudioFeatures::default(),
    }
}

pub fn category(number: u32, name: &str, description: &str) -> Category {
    Category {
        category_number: number,
        category_name: name.to_string(),
        description: description.to_string(),
        playlist_id: None,
    }
}

/// Client pointed at a wiremock server with near-zero backoff
pub fn mock_spotify_client(server: &MockServer) -> SpotifyClient {
    let cfg = SpotifyConfig {
        client_id: "cid".into(),
        client_secret: "secret".into(),
        redirect_uri: "http://localhost:3000".into(),
        token_url: Url::parse(&format!("{}/api/token", server.uri())).unwrap(),
        api_base: Url::parse(&format!("{}/v1/", server.uri())).unwrap(),
    };
    let mut http = HttpConfig::default();
    http.retry.base_backoff = Duration::from_millis(1);
    http.retry.jitter = false;
    SpotifyClient::new(&http, &cfg).unwrap()
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedPlaylist {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: String,
}

#[derive(Default)]
struct CatalogState {
    playlist_name: Option<String>,
    tracks: Vec<Track>,
    failing_offsets: Vec<u32>,
    artists: HashMap<String, Artist>,
    artist_calls: usize,
    artist_fail_after: Option<usize>,
    artist_requests: Vec<Vec<String>>,
    features: HashMap<String, AudioFeatures>,
    feature_requests: Vec<Vec<String>>,
    created: Vec<CreatedPlaylist>,
    members: HashMap<String, Vec<String>>,
    failing_adds: HashSet<String>,
}

#[derive(Default)]
pub struct FakeCatalog {
    state: Mutex<CatalogState>
}

impl FakeCatalog {
    pub fn with_tracks(tracks: Vec<Track>) -> Self {
        let catalog = Self::default();
        catalog.state.lock().unwrap().tracks = tracks;
        catalog
    }

    pub fn set_playlist_name(&self, name: &str) {
        self.state.lock().unwrap().playlist_name = Some(name.to_string());
    }

    pub fn fail_track_offsets(&self, offsets: &[u32]) {
        self.state.lock().unwrap().failing_offsets = offsets.to_vec();
    }

    pub fn add_artists(&self, artists: Vec<Artist>) {
        let mut state = self.state.lock().unwrap();
        for artist in artists {
            state.artists.insert(artist.id.clone(), artist);
        }
    }

    /// Every artist batch after the first `n` calls fails
    pub fn fail_artist_batches_after(&self, n: usize) {
        self.state.lock().unwrap().artist_fail_after = Some(n);
    }

    pub fn artist_requests(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().artist_requests.clone()
    }

    pub fn add_features(&self, features: Vec<(String, AudioFeatures)>) {
        self.state.lock().unwrap().features.extend(features);
    }

    pub fn feature_requests(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().feature_requests.clone()
    }

    pub fn created_playlists(&self) -> Vec<CreatedPlaylist> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn members(&self, playlist_id: &str) -> Vec<String> {
        self.state.lock().unwrap().members.get(playlist_id).cloned().unwrap_or_default()
    }

    pub fn seed_members(&self, playlist_id: &str, uris: &[&str]) {
        self.state.lock().unwrap().members.insert(
            playlist_id.to_string(),
            uris.iter().map(|u| u.to_string()).collect()
        );
    }

    pub fn fail_adds_to(&self, playlist_id: &str) {
        self.state.lock().unwrap().failing_adds.insert(playlist_id.to_string());
    }
}

#[async_trait]
impl Catalog for FakeCatalog {
    async fn playlist_name(&self, _token: &str, playlist_id: &str) -> Result<String, SorterError> {
        let state = self.state.lock().unwrap();
        Ok( state.playlist_name.clone().unwrap_or_else(|| format!("playlist {playlist_id}")) )
    }

    async fn playlist_tracks(&self, _token: &str, _playlist_id: &str, offset: u32, limit: u32)
        -> Result<TrackPage, SorterError> {
        let state = self.state.lock().unwrap();
        if state.failing_offsets.contains(&offset) {
            return Err(SorterError::Http(format!("injected failure at offset {offset}")));
        }
        let len = state.tracks.len();
        let start = (offset as usize).min(len);
        let end = (start + limit as usize).min(len);
        Ok( TrackPage {
            tracks: state.tracks[start..end].to_vec(),
            total: len as u32,
            next_offset: (end < len).then_some(end as u32),
        })
    }

    async fn artists(&self, _token: &str, ids: &[String]) -> Result<Vec<Artist>, SorterError> {
        let mut state = self.state.lock().unwrap();
        state.artist_requests.push(ids.to_vec());
        let calls = state.artist_calls;
        state.artist_calls += 1;
        if state.artist_fail_after.is_some_and(|n| calls >= n) {
            return Err(SorterError::RateLimited("injected".into()));
        }
        Ok( ids.iter().filter_map(|id| state.artists.get(id).cloned()).collect() )
    }

    async fn audio_features(&self, _token: &str, ids: &[String]) ->
        Result<Vec<(String, AudioFeatures)>, SorterError> {
        let mut state = self.state.lock().unwrap();
        state.feature_requests.push(ids.to_vec());
        Ok( ids.iter()
            .filter_map(|id| state.features.get(id).map(|f| (id.clone(), f.clone())))
            .collect() )
    }

    async fn current_user_id(&self, _token: &str) -> Result<String, SorterError> {
        Ok( "user-1".to_string() )
    }

    async fn create_playlist(&self, _token: &str, user_id: &str, name: &str, description: &str)
        -> Result<String, SorterError> {
        let mut state = self.state.lock().unwrap();
        let id = format!("created-{}", state.created.len() + 1);
        state.created.push(CreatedPlaylist {
            id: id.clone(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
        });
        state.members.insert(id.clone(), Vec::new());
        Ok(id)
    }

    async fn playlist_track_uris(&self, _token: &str, playlist_id: &str) ->
        Result<Vec<String>, SorterError> {
        Ok( self.members(playlist_id) )
    }

    async fn add_tracks(&self, _token: &str, playlist_id: &str, uris: &[String]) ->
        Result<(), SorterError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_adds.contains(playlist_id) {
            return Err(SorterError::Http(format!("injected add failure for {playlist_id}")));
        }
        state.members.entry(playlist_id.to_string()).or_default().extend(uris.iter().cloned());
        Ok(())
    }
}

/// Replies with the scripted results in order, then errors
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: AtomicUsize
}

impl ScriptedProvider {
    pub fn new(replies: &[&str]) -> Self {
        Self::with_results(replies.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn with_results(replies: Vec<Result<String, LlmError>>) -> Self {
        Self { replies: Mutex::new(replies.into()), calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "script"
    }

    async fn complete(&self, _prompt: &str, _options: &CompletionOptions) ->
        Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies.lock().unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::InvalidResponse("script exhausted".into())))
    }
}

#[derive(Default)]
struct StubRules {
    categories: Vec<Category>,
    failing: HashSet<String>,
    routes: HashMap<String, u32>,
    corpora: Mutex<Vec<String>>,
}

///
/// Model double: derivation returns fixed categories, classification
/// routes a track to a configured number (default: first category)
///
#[derive(Clone, Default)]
pub struct StubModel {
    rules: Arc<StubRules>,
    calls: Arc<AtomicUsize>
}

impl StubModel {
    pub fn new() -> Self {
        Self::default()
    }

    fn rules_mut(&mut self) -> &mut StubRules {
        Arc::get_mut(&mut self.rules).expect("configure StubModel before cloning")
    }

    pub fn with_categories(mut self, categories: Vec<Category>) -> Self {
        self.rules_mut().categories = categories;
        self
    }

    pub fn fail_on(mut self, track_id: &str) -> Self {
        self.rules_mut().failing.insert(track_id.to_string());
        self
    }

    pub fn route(mut self, track_id: &str, category_number: u32) -> Self {
        self.rules_mut().routes.insert(track_id.to_string(), category_number);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn corpora(&self) -> Vec<String> {
        self.rules.corpora.lock().unwrap().clone()
    }
}

#[async_trait]
impl CategoryModel for StubModel {
    async fn derive_categories(&self, corpus: &str, count: u32) ->
        Result<Vec<Category>, SorterError> {
        self.rules.corpora.lock().unwrap().push(corpus.to_string());
        Ok( self.rules.categories.iter().take(count as usize).cloned().collect() )
    }

    async fn classify(&self, track: &Track, categories: &[Category]) ->
        Result<ClassificationRecord, SorterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        if self.rules.failing.contains(&track.id) {
            return Err(SorterError::ClassificationFailed(format!("stub refuses {}", track.id)));
        }
        let number = self.rules.routes.get(&track.id).copied()
            .or_else(|| categories.first().map(|c| c.category_number))
            .ok_or_else(|| SorterError::ClassificationFailed("no categories".into()))?;
        let category = categories.iter()
            .find(|c| c.category_number == number)
            .ok_or_else(|| SorterError::ClassificationFailed(format!("unknown {number}")))?;

        Ok( ClassificationRecord::new(track, Classification {
            category_number: number,
            category_name: category.category_name.clone(),
            reasoning: "stub".to_string(),
        }) )
    }
}
