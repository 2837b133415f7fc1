//!
//! src/materializer.rs  Andrew Belles  Oct 2025
//!
//! Creates one private destination playlist per category and moves
//! classified tracks into them. Appends are idempotent within a run:
//! a membership set per destination playlist suppresses repeat adds
//!

use std::{collections::{HashMap, HashSet}, sync::Arc};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::errors::SorterError;
use crate::types::Category;

/// Emphasis markup the model wraps titles in
pub fn sanitize_category_name(name: &str) -> String {
    name.replace('*', "").trim().to_string()
}

/// `<source> - <category>_<YYYY-MM-DDTHHMM>`
pub fn playlist_name(source: &str, category_name: &str, timestamp: &str) -> String {
    format!("{source} - {}_{timestamp}", sanitize_category_name(category_name))
}

/// Newline runs collapse to one space, then the text is cut to `max_chars`
pub fn playlist_description(description: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(description.len());
    let mut in_break = false;
    for c in description.chars() {
        if c == '\n' {
            if !in_break {
                out.push(' ');
                in_break = true;
            }
        } else {
            out.push(c);
            in_break = false;
        }
    }
    out.chars().take(max_chars).collect()
}

/// Local time at minute granularity, so repeated runs make new playlists
pub fn minute_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H%M").to_string()
}

pub struct PlaylistMaterializer {
    catalog: Arc<dyn Catalog>,
    token: String,
    description_max_chars: usize,
    membership: Mutex<HashMap<String, HashSet<String>>>
}

impl PlaylistMaterializer {
    pub fn new(catalog: Arc<dyn Catalog>, token: &str, description_max_chars: usize) -> Self {
        Self {
            catalog,
            token: token.to_string(),
            description_max_chars,
            membership: Mutex::new(HashMap::new())
        }
    }

    ///
    /// Creates a destination playlist for every category and records its id
    /// on the category. Playlists created here start with empty membership.
    ///
    pub async fn create_playlists(&self, source_playlist_id: &str, categories: &mut [Category])
        -> Result<(), SorterError> {
        let source = self.catalog.playlist_name(&self.token, source_playlist_id).await?;
        let user_id = self.catalog.current_user_id(&self.token).await?;
        let timestamp = minute_timestamp();

        for category in categories.iter_mut() {
            let name = playlist_name(&source, &category.category_name, &timestamp);
            let description = playlist_description(
                &category.description, self.description_max_chars
            );
            let id = self.catalog
                .create_playlist(&self.token, &user_id, &name, &description)
                .await?;

            info!(playlist = %name, playlist_id = %id, category = category.category_number,
                "materialize.created");
            self.membership.lock().await.insert(id.clone(), HashSet::new());
            category.playlist_id = Some(id);
        }
        Ok(())
    }

    ///
    /// Adds one track unless this run already placed it there. Playlists not
    /// created by this run have their current members loaded first.
    /// Returns whether the catalog was asked to add the track.
    ///
    pub async fn append_track(&self, playlist_id: &str, track_uri: &str) ->
        Result<bool, SorterError> {
        let mut membership = self.membership.lock().await;
        if !membership.contains_key(playlist_id) {
            let existing = self.catalog.playlist_track_uris(&self.token, playlist_id).await?;
            membership.insert(playlist_id.to_string(), existing.into_iter().collect());
        }

        if membership.get(playlist_id).is_some_and(|m| m.contains(track_uri)) {
            debug!(playlist_id, track_uri, "materialize.already_member");
            return Ok(false);
        }

        self.catalog.add_tracks(&self.token, playlist_id, &[track_uri.to_string()]).await?;
        membership.entry(playlist_id.to_string()).or_default().insert(track_uri.to_string());
        Ok(true)
    }
}
