//!
//! src/pipeline.rs  Andrew Belles  Oct 2025
//!
//! Orchestrates one request end to end: sync the playlist into the cache,
//! derive categories from the genre corpus, or materialize playlists and
//! start the classification stream
//!

use std::{collections::HashSet, sync::Arc};

use tracing::{info, instrument};

use crate::catalog::Catalog;
use crate::config::PipelineConfig;
use crate::deriver::build_corpus;
use crate::emitter::{ClassificationStream, Emitter};
use crate::errors::SorterError;
use crate::fetcher::{FetchReport, Fetcher};
use crate::genres::apply_genres;
use crate::materializer::PlaylistMaterializer;
use crate::model::CategoryModel;
use crate::persistent::{KeyedStore, Row, TableId, TableLocks};
use crate::types::{Category, Track};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub tracks: FetchReport,
    pub artists: FetchReport,
    pub genres: usize,
    pub features: FetchReport
}

pub struct Sorter {
    catalog: Arc<dyn Catalog>,
    store: Arc<dyn KeyedStore>,
    model: Arc<dyn CategoryModel>,
    cfg: PipelineConfig,
    /// serializes whole syncs of the same playlist
    sync_locks: TableLocks
}

impl Sorter {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        store: Arc<dyn KeyedStore>,
        model: Arc<dyn CategoryModel>,
        cfg: PipelineConfig
    ) -> Self {
        Self { catalog, store, model, cfg, sync_locks: TableLocks::default() }
    }

    /// tracks -> artists -> genres -> audio features
    #[instrument(skip(self, token))]
    pub async fn sync_playlist(&self, token: &str, playlist_id: &str) ->
        Result<SyncReport, SorterError> {
        let _guard = self.sync_locks.lock(&TableId::tracks(playlist_id)).await;
        let fetcher = Fetcher::new(self.catalog.as_ref(), self.store.as_ref(), &self.cfg);

        let tracks = fetcher.fetch_tracks(token, playlist_id).await?;
        let artists = fetcher.fetch_artists(token, playlist_id).await?;
        let genres = apply_genres(self.store.as_ref(), playlist_id).await?;
        let features = fetcher.fetch_audio_features(token, playlist_id).await?;

        Ok( SyncReport { tracks, artists, genres, features } )
    }

    pub async fn cached_tracks(&self, playlist_id: &str) -> Result<Vec<Track>, SorterError> {
        self.store.load(&TableId::tracks(playlist_id)).await?
            .iter()
            .map(Row::decode::<Track>)
            .collect()
    }

    /// Syncs the playlist, then asks the model for `count` categories
    pub async fn categories(&self, token: &str, playlist_id: &str, count: u32) ->
        Result<Vec<Category>, SorterError> {
        if count == 0 {
            return Err(SorterError::BadRequest("num_categories must be positive".into()));
        }

        let report = self.sync_playlist(token, playlist_id).await?;
        let tracks = self.cached_tracks(playlist_id).await?;
        if tracks.is_empty() {
            return Err(SorterError::NotFound(format!("no cached tracks for {playlist_id}")));
        }

        let corpus = build_corpus(&tracks, self.cfg.shuffle_seed, self.cfg.corpus_max_chars);
        let categories = self.model.derive_categories(&corpus, count).await?;

        info!(
            playlist_id,
            tracks = tracks.len(),
            new_tracks = report.tracks.merged,
            corpus_chars = corpus.chars().count(),
            categories = categories.len(),
            "pipeline.categories"
        );
        Ok(categories)
    }

    pub async fn total_tracks(&self, playlist_id: &str) -> Result<usize, SorterError> {
        self.store.count(&TableId::tracks(playlist_id)).await
    }

    ///
    /// Creates the destination playlists and starts classifying the cached
    /// tracks. The returned stream's `total` is the cached row count.
    ///
    pub async fn generate(&self, token: &str, playlist_id: &str, mut categories: Vec<Category>)
        -> Result<ClassificationStream, SorterError> {
        validate_categories(&categories)?;

        let tracks = self.cached_tracks(playlist_id).await?;
        if tracks.is_empty() {
            return Err(SorterError::NotFound(format!("no cached tracks for {playlist_id}")));
        }

        let materializer = Arc::new(PlaylistMaterializer::new(
            self.catalog.clone(), token, self.cfg.description_max_chars
        ));
        materializer.create_playlists(playlist_id, &mut categories).await?;

        info!(playlist_id, tracks = tracks.len(), categories = categories.len(),
            "pipeline.generate");
        let emitter = Emitter::new(self.model.clone(), materializer, self.cfg.stream_capacity);
        Ok( emitter.spawn(tracks, categories) )
    }
}

fn validate_categories(categories: &[Category]) -> Result<(), SorterError> {
    if categories.is_empty() {
        return Err(SorterError::BadRequest("categories must not be empty".into()));
    }
    let mut seen = HashSet::new();
    for c in categories {
        if c.category_number == 0 || !seen.insert(c.category_number) {
            return Err(SorterError::BadRequest(
                format!("category numbers must be unique and positive, got {}", c.category_number)
            ));
        }
    }
    Ok(())
}
