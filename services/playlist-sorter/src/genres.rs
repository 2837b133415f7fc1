//!
//! src/genres.rs  Andrew Belles  Oct 2025
//!
//! Joins the artist table's genre lists onto a playlist's tracks.
//! A track's genre set is written exactly once; tracks that already carry
//! one (even an empty one) are never recomputed
//!

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::errors::SorterError;
use crate::persistent::{KeyedStore, Row, TableId};
use crate::types::{Artist, Track};

/// Union of the cached artists' genres, in first-seen order.
/// Artists missing from the cache contribute nothing.
pub fn union_genres(artist_ids: &[String], artists: &HashMap<String, Vec<String>>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for genres in artist_ids.iter().filter_map(|id| artists.get(id)) {
        for genre in genres {
            if seen.insert(genre.as_str()) {
                out.push(genre.clone());
            }
        }
    }
    out
}

/// (track id, genre set) for every track still lacking genres
pub fn aggregate_genres(tracks: &[Track], artists: &[Artist]) -> Vec<(String, Vec<String>)> {
    let by_id: HashMap<String, Vec<String>> = artists.iter()
        .map(|a| (a.id.clone(), a.genres.clone()))
        .collect();

    tracks.iter()
        .filter(|t| t.genres.is_none())
        .map(|t| (t.id.clone(), union_genres(&t.artists_id, &by_id)))
        .collect()
}

///
/// Loads both tables, computes the missing genre sets and fills them
/// into the track table. Returns the number of tracks that gained genres.
///
pub async fn apply_genres(store: &dyn KeyedStore, playlist_id: &str) -> Result<usize, SorterError> {
    let table = TableId::tracks(playlist_id);
    let tracks = store.load(&table).await?
        .iter()
        .map(Row::decode::<Track>)
        .collect::<Result<Vec<_>, _>>()?;
    let artists = store.load(&TableId::Artists).await?
        .iter()
        .map(Row::decode::<Artist>)
        .collect::<Result<Vec<_>, _>>()?;

    let pending = aggregate_genres(&tracks, &artists);
    if pending.is_empty() {
        debug!(playlist_id, "genres.none_pending");
        return Ok(0);
    }

    let updates: Vec<Row> = pending.into_iter()
        .map(|(id, genres)| {
            let mut fields = Map::new();
            fields.insert("genres".to_string(), Value::from(genres));
            Row::new(id, fields)
        })
        .collect();

    let changed = store.merge_columns(&table, updates).await?;
    info!(playlist_id, tracks = changed, "genres.applied");
    Ok(changed)
}
