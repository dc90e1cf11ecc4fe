//! Lyric sidecar refresh for a Jellyfin music library, backed by LRCLIB.

pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod lrc;
pub mod lrclib;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod policy;
pub mod progress;
pub mod remote;
pub mod resolver;
pub mod safety;
pub mod sidecar;

#[cfg(test)]
pub(crate) mod testing;
