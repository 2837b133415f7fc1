//!
//! src/fetcher.rs  Andrew Belles  Oct 2025
//!
//! Sequential, page-bounded sync of a playlist into the cache tables.
//! Each step asks the catalog only for what the cache lacks; an upstream
//! failure mid-way stops the step, keeps every page already retrieved and
//! leaves the rest for the next call. Store failures do propagate.
//!

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::config::PipelineConfig;
use crate::errors::SorterError;
use crate::persistent::{KeyedStore, Row, TableId};
use crate::types::{Track, FEATURES_MARKER_COLUMN};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchReport {
    /// Records received from the catalog this call
    pub fetched: usize,
    /// Records newly written to the cache
    pub merged: usize,
    /// False when an upstream error cut the step short
    pub complete: bool
}

pub struct Fetcher<'a> {
    catalog: &'a dyn Catalog,
    store: &'a dyn KeyedStore,
    cfg: &'a PipelineConfig
}

impl<'a> Fetcher<'a> {
    pub fn new(catalog: &'a dyn Catalog, store: &'a dyn KeyedStore, cfg: &'a PipelineConfig) ->
        Self {
        Self { catalog, store, cfg }
    }

    /// Pages through the playlist, keeping tracks not cached yet
    pub async fn fetch_tracks(&self, token: &str, playlist_id: &str) ->
        Result<FetchReport, SorterError> {
        let table = TableId::tracks(playlist_id);
        let mut known: HashSet<String> = self.store.load(&table).await?
            .into_iter()
            .map(|r| r.key)
            .collect();

        let mut report = FetchReport { complete: true, ..FetchReport::default() };
        let mut rows = Vec::new();
        let mut offset = Some(0_u32);

        while let Some(current) = offset {
            let page = match self.catalog
                .playlist_tracks(token, playlist_id, current, self.cfg.track_page_size)
                .await {
                Ok(page) => page,
                Err(e) => {
                    warn!(playlist_id, offset = current, error = %e, "fetch.tracks.stopped");
                    report.complete = false;
                    break;
                }
            };

            debug!(playlist_id, offset = current, total = page.total, items = page.tracks.len(),
                "fetch.tracks.page");
            report.fetched += page.tracks.len();

            for track in page.tracks {
                // a playlist may list the same track twice; first wins
                if known.insert(track.id.clone()) {
                    rows.push(Row::encode(track.id.clone(), &track)?);
                }
            }
            offset = page.next_offset;
        }

        report.merged = self.store.merge(&table, rows).await?;
        info!(playlist_id, fetched = report.fetched, merged = report.merged,
            complete = report.complete, "fetch.tracks.done");
        Ok(report)
    }

    /// Artists referenced by the playlist that the global table lacks
    pub async fn fetch_artists(&self, token: &str, playlist_id: &str) ->
        Result<FetchReport, SorterError> {
        let tracks = self.cached_tracks(playlist_id).await?;
        let known: HashSet<String> = self.store.load(&TableId::Artists).await?
            .into_iter()
            .map(|r| r.key)
            .collect();

        let mut seen = HashSet::new();
        let missing: Vec<String> = tracks.iter()
            .flat_map(|t| t.artists_id.iter())
            .filter(|id| !known.contains(*id) && seen.insert(id.as_str()))
            .cloned()
            .collect();

        let mut report = FetchReport { complete: true, ..FetchReport::default() };
        let mut rows = Vec::new();
        let mut requested = 0_usize;

        for chunk in missing.chunks(self.cfg.artist_page_size.max(1) as usize) {
            let artists = match self.catalog.artists(token, chunk).await {
                Ok(artists) => artists,
                Err(e) => {
                    warn!(playlist_id, remaining = missing.len() - requested, error = %e,
                        "fetch.artists.stopped");
                    report.complete = false;
                    break;
                }
            };
            debug!(playlist_id, requested = chunk.len(), received = artists.len(),
                "fetch.artists.page");

            requested += chunk.len();
            report.fetched += artists.len();
            for artist in artists {
                rows.push(Row::encode(artist.id.clone(), &artist)?);
            }
        }

        report.merged = self.store.merge(&TableId::Artists, rows).await?;
        info!(playlist_id, requested, merged = report.merged,
            complete = report.complete, "fetch.artists.done");
        Ok(report)
    }

    /// Backfills the audio feature columns of tracks that lack them
    pub async fn fetch_audio_features(&self, token: &str, playlist_id: &str) ->
        Result<FetchReport, SorterError> {
        let table = TableId::tracks(playlist_id);
        let missing: Vec<String> = self.store.load(&table).await?
            .into_iter()
            .filter(|r| !r.is_populated(FEATURES_MARKER_COLUMN))
            .map(|r| r.key)
            .collect();

        let mut report = FetchReport { complete: true, ..FetchReport::default() };
        let mut updates = Vec::new();
        let mut requested = 0_usize;

        for chunk in missing.chunks(self.cfg.features_page_size.max(1) as usize) {
            let features = match self.catalog.audio_features(token, chunk).await {
                Ok(features) => features,
                Err(e) => {
                    warn!(playlist_id, remaining = missing.len() - requested, error = %e,
                        "fetch.features.stopped");
                    report.complete = false;
                    break;
                }
            };
            debug!(playlist_id, requested = chunk.len(), received = features.len(),
                "fetch.features.page");

            requested += chunk.len();
            report.fetched += features.len();
            for (id, f) in features {
                updates.push(Row::encode(id, &f)?);
            }
        }

        report.merged = self.store.merge_columns(&table, updates).await?;
        info!(playlist_id, requested, merged = report.merged,
            complete = report.complete, "fetch.features.done");
        Ok(report)
    }

    async fn cached_tracks(&self, playlist_id: &str) -> Result<Vec<Track>, SorterError> {
        self.store.load(&TableId::tracks(playlist_id)).await?
            .iter()
            .map(Row::decode::<Track>)
            .collect()
    }
}
