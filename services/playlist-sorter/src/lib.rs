//!
//! src/lib.rs  Andrew Belles  Oct 2025
//!
//! Module tree of the playlist sorter: catalog sync into the keyed cache,
//! category derivation, and the streaming classification service
//!

pub mod api;
pub mod catalog;
pub mod classifier;
pub mod config;
pub mod deriver;
pub mod emitter;
pub mod errors;
pub mod fetch;
pub mod fetcher;
pub mod genres;
pub mod llm;
pub mod logging;
pub mod materializer;
pub mod model;
pub mod persistent;
pub mod pipeline;
pub mod sink;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;
