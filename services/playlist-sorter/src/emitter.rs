//!
//! src/emitter.rs  Andrew Belles  Oct 2025
//!
//! Streams classification results as one json array while classification
//! is still running. A spawned producer classifies each cached track,
//! moves it into its destination playlist and sends the framed record
//! over a bounded channel; the http body drains the receiver.
//! Dropping the body cancels the producer before its next model call.
//!

use std::sync::Arc;

use futures::Stream;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::materializer::PlaylistMaterializer;
use crate::model::CategoryModel;
use crate::types::{Category, Track};

/// Frames a sequence of json values as `[\n` v `,\n` v ... `\n]`
#[derive(Debug, Default)]
pub struct JsonArrayFramer {
    started: bool
}

impl JsonArrayFramer {
    pub const OPEN: &'static str = "[\n";
    pub const CLOSE: &'static str = "\n]";

    pub fn frame(&mut self, json: &str) -> String {
        if std::mem::replace(&mut self.started, true) {
            format!(",\n{json}")
        } else {
            json.to_string()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitSummary {
    pub emitted: usize,
    pub skipped: usize,
    pub cancelled: bool
}

pub struct ClassificationStream {
    /// Cached row count, the progress denominator
    pub total: usize,
    chunks: mpsc::Receiver<String>,
    cancel: CancellationToken,
    producer: JoinHandle<EmitSummary>
}

impl ClassificationStream {
    #[cfg(test)]
    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Body stream; cancels the producer once dropped
    pub fn into_chunks(self) -> impl Stream<Item = Result<String, std::io::Error>> + Send {
        let ClassificationStream { mut chunks, cancel, .. } = self;
        let guard = cancel.drop_guard();

        async_stream::stream! {
            let _guard = guard;
            while let Some(chunk) = chunks.recv().await {
                yield Ok(chunk);
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn drain(self) -> (String, EmitSummary) {
        let ClassificationStream { mut chunks, producer, .. } = self;
        let mut body = String::new();
        while let Some(chunk) = chunks.recv().await {
            body.push_str(&chunk);
        }
        (body, producer.await.unwrap_or_default())
    }
}

pub struct Emitter {
    model: Arc<dyn CategoryModel>,
    materializer: Arc<PlaylistMaterializer>,
    capacity: usize
}

impl Emitter {
    pub fn new(model: Arc<dyn CategoryModel>, materializer: Arc<PlaylistMaterializer>,
        capacity: usize) -> Self {
        Self { model, materializer, capacity: capacity.max(1) }
    }

    /// Starts the producer over `tracks` in cache order
    pub fn spawn(self, tracks: Vec<Track>, categories: Vec<Category>) -> ClassificationStream {
        let (tx, rx) = mpsc::channel(self.capacity);
        let cancel = CancellationToken::new();
        let total = tracks.len();

        let token = cancel.clone();
        let producer = tokio::spawn(async move {
            self.produce(tracks, categories, tx, token).await
        });

        ClassificationStream { total, chunks: rx, cancel, producer }
    }

    async fn produce(self, tracks: Vec<Track>, categories: Vec<Category>,
        tx: mpsc::Sender<String>, cancel: CancellationToken) -> EmitSummary {
        let mut summary = EmitSummary::default();
        let mut framer = JsonArrayFramer::default();

        if tx.send(JsonArrayFramer::OPEN.to_string()).await.is_err() {
            summary.cancelled = true;
            return summary;
        }

        for track in &tracks {
            if cancel.is_cancelled() || tx.is_closed() {
                summary.cancelled = true;
                break;
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    summary.cancelled = true;
                    break;
                }
                r = self.model.classify(track, &categories) => r
            };

            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    warn!(track_id = %track.id, error = %e, "classify.skip");
                    summary.skipped += 1;
                    continue;
                }
            };

            let destination = categories.iter()
                .find(|c| c.category_number == record.category_number)
                .and_then(|c| c.playlist_id.as_deref());
            match destination {
                Some(playlist_id) => {
                    if let Err(e) = self.materializer.append_track(playlist_id, &track.uri).await {
                        warn!(track_id = %track.id, playlist_id, error = %e, "emit.append.skip");
                        summary.skipped += 1;
                        continue;
                    }
                }
                None => debug!(track_id = %track.id, category = record.category_number,
                    "emit.no_destination")
            }

            let json = match serde_json::to_string(&record) {
                Ok(json) => json,
                Err(e) => {
                    warn!(track_id = %track.id, error = %e, "emit.serialize.skip");
                    summary.skipped += 1;
                    continue;
                }
            };

            if tx.send(framer.frame(&json)).await.is_err() {
                summary.cancelled = true;
                break;
            }
            summary.emitted += 1;
        }

        // a truncated array tells the client the run did not finish
        if !summary.cancelled {
            let _ = tx.send(JsonArrayFramer::CLOSE.to_string()).await;
        }

        info!(total = tracks.len(), emitted = summary.emitted, skipped = summary.skipped,
            cancelled = summary.cancelled, "emit.done");
        summary
    }
}
