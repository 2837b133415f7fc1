//!
//! src/types.rs  Andrew Belles  Oct 2025
//!
//! Domain records shared by the cache, the model layer and the api
//!

use serde::{Deserialize, Serialize};

/// Column names of the audio feature block, in the order the catalog lists them
pub const AUDIO_FEATURE_COLUMNS: [&str; 13] = [
    "acousticness",
    "danceability",
    "duration_ms",
    "energy",
    "instrumentalness",
    "key",
    "liveness",
    "loudness",
    "mode",
    "speechiness",
    "tempo",
    "time_signature",
    "valence",
];

/// Column used to decide whether a track's features were backfilled
pub const FEATURES_MARKER_COLUMN: &str = "acousticness";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioFeatures {
    pub acousticness: Option<f64>,
    pub danceability: Option<f64>,
    pub duration_ms: Option<f64>,
    pub energy: Option<f64>,
    pub instrumentalness: Option<f64>,
    pub key: Option<f64>,
    pub liveness: Option<f64>,
    pub loudness: Option<f64>,
    pub mode: Option<f64>,
    pub speechiness: Option<f64>,
    pub tempo: Option<f64>,
    pub time_signature: Option<f64>,
    pub valence: Option<f64>,
}

/// One row of a playlist's track table, keyed by catalog track id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub uri: String,
    pub popularity: Option<i64>,
    pub album: String,
    pub artists: Vec<String>,
    pub artists_id: Vec<String>,
    pub name: String,
    pub release_date: Option<String>,
    pub thumbnail_url: Option<String>,
    /// None until aggregated, never recomputed afterwards
    #[serde(default)]
    pub genres: Option<Vec<String>>,
    #[serde(flatten)]
    pub features: AudioFeatures,
}

impl Track {
    pub fn has_genres(&self) -> bool {
        self.genres.as_ref().is_some_and(|g| !g.is_empty())
    }
}

/// One row of the global artist table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    #[serde(default)]
    pub genres: Vec<String>,
    pub popularity: Option<i64>,
}

/// A thematic bucket derived from the genre corpus; lives for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub category_number: u32,
    pub category_name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlist_id: Option<String>,
}

/// Parsed answer of the classifier for a single track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category_number: u32,
    pub category_name: String,
    pub reasoning: String,
}

/// What gets streamed back to the caller for each classified track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub thumbnail_url: Option<String>,
    pub track_name: String,
    pub artists: Vec<String>,
    pub album: String,
    pub release_date: Option<String>,
    pub category_name: String,
    pub category_number: u32,
    pub reasoning: String,
}

impl ClassificationRecord {
    pub fn new(track: &Track, classification: Classification) -> Self {
        Self {
            thumbnail_url: track.thumbnail_url.clone(),
            track_name: track.name.clone(),
            artists: track.artists.clone(),
            album: track.album.clone(),
            release_date: track.release_date.clone(),
            category_name: classification.category_name,
            category_number: classification.category_number,
            reasoning: classification.reasoning,
        }
    }
}
