//! Core data models for the sidecar pipeline.
//!
//! Tracks and lyric candidates live for the duration of one item; only the
//! checkpoint (see [`crate::checkpoint`]) outlives a run.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ItemFailure;

// ============================================================================
// Catalog Models
// ============================================================================

/// One audio track from the media-server catalog.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Track {
    pub id: String,
    pub title: String,
    /// Ordered artist credits, possibly empty.
    pub artists: Vec<String>,
    pub album_artist: Option<String>,
    pub album: Option<String>,
    /// Catalog-relative path of the audio file.
    pub path: String,
    pub duration_secs: Option<u32>,
}

/// Borrowed view of a track that has every field the lookup needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackTarget<'a> {
    pub id: &'a str,
    pub title: &'a str,
    pub artist: &'a str,
    pub album: Option<&'a str>,
    pub path: &'a str,
    pub duration_secs: Option<u32>,
}

impl Track {
    /// First credited artist, falling back to the album artist.
    pub fn primary_artist(&self) -> Option<&str> {
        self.artists
            .iter()
            .map(|a| a.trim())
            .find(|a| !a.is_empty())
            .or_else(|| {
                self.album_artist
                    .as_deref()
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
            })
    }

    /// Validates title, artist and path before any lookup or mutation.
    pub fn target(&self) -> Result<TrackTarget<'_>, ItemFailure> {
        let missing = |field| ItemFailure::MissingRequiredField {
            id: self.id.clone(),
            field,
        };

        let title = self.title.trim();
        if title.is_empty() {
            return Err(missing("title"));
        }
        let artist = self.primary_artist().ok_or_else(|| missing("artist"))?;
        let path = self.path.trim();
        if path.is_empty() {
            return Err(missing("path"));
        }

        Ok(TrackTarget {
            id: &self.id,
            title,
            artist,
            album: self.album.as_deref().map(str::trim).filter(|a| !a.is_empty()),
            path,
            duration_secs: self.duration_secs,
        })
    }

    /// Case-insensitive substring match on title or any artist credit.
    pub fn matches_filter(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.title.to_lowercase().contains(&needle)
            || self
                .artists
                .iter()
                .chain(self.album_artist.iter())
                .any(|a| a.to_lowercase().contains(&needle))
    }

    /// Short label for logs.
    pub fn label(&self) -> String {
        match self.primary_artist() {
            Some(artist) => format!("{} - {}", artist, self.title),
            None => self.title.clone(),
        }
    }
}

/// A music library (top-level collection) on the media server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Library {
    pub id: String,
    pub name: String,
    pub path: Option<String>,
}

// ============================================================================
// Lyric Models
// ============================================================================

/// Lookup parameters for one track.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LyricQuery {
    pub artist: String,
    pub title: String,
    pub album: Option<String>,
    pub duration_secs: Option<u32>,
}

impl From<&TrackTarget<'_>> for LyricQuery {
    fn from(target: &TrackTarget<'_>) -> Self {
        Self {
            artist: target.artist.to_string(),
            title: target.title.to_string(),
            album: target.album.map(str::to_string),
            duration_secs: target.duration_secs,
        }
    }
}

/// One search result from the lyric service, in the service's ranking order.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LyricCandidate {
    pub id: Option<i64>,
    pub artist_name: String,
    pub track_name: String,
    pub album_name: Option<String>,
    pub duration: Option<f64>,
    pub instrumental: bool,
    pub synced_lyrics: Option<String>,
    pub plain_lyrics: Option<String>,
}

impl LyricCandidate {
    pub fn synced(&self) -> Option<&str> {
        non_blank(self.synced_lyrics.as_deref())
    }

    pub fn plain(&self) -> Option<&str> {
        non_blank(self.plain_lyrics.as_deref())
    }
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.filter(|t| !t.trim().is_empty())
}

/// Where the timestamps in a sidecar came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    /// Timestamps supplied by the lyric service.
    Synced,
    /// Placeholder timestamps synthesized from plain lyrics.
    DerivedTiming,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Provenance::Synced => "synced",
            Provenance::DerivedTiming => "derived-timing",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sidecar-ready lyrics. Never empty; absence is `None` at the call site.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedLyrics {
    text: String,
    provenance: Provenance,
}

impl ResolvedLyrics {
    /// Returns `None` for blank text.
    pub fn new(text: String, provenance: Provenance) -> Option<Self> {
        if text.trim().is_empty() {
            None
        } else {
            Some(Self { text, provenance })
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn line_count(&self) -> usize {
        self.text.lines().filter(|l| !l.trim().is_empty()).count()
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Counts for a single invocation. Reporting only, never persisted.
#[derive(Default, Debug, Clone, PartialEq, Serialize)]
pub struct RunStatistics {
    pub attempted: u64,
    pub succeeded: u64,
    pub still_failed: u64,
    pub lyrics_found: u64,
    /// Tracks passed over by `--only`.
    pub filtered_out: u64,
    pub synced: u64,
    pub derived_timing: u64,
    pub elapsed_seconds: f64,
}

impl RunStatistics {
    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            100.0 * self.succeeded as f64 / self.attempted as f64
        }
    }

    pub fn record_lyrics(&mut self, provenance: Provenance) {
        self.lyrics_found += 1;
        match provenance {
            Provenance::Synced => self.synced += 1,
            Provenance::DerivedTiming => self.derived_timing += 1,
        }
    }

    /// Log stats to stderr in JSON format.
    pub fn log_json(&self, phase: &str) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            eprintln!("[STATS:{}]\n{}", phase, json);
        }
    }

    /// Human-readable summary lines.
    pub fn summary(&self) -> String {
        format!(
            "Attempted: {}\nSucceeded: {} ({:.1}%)\nFailed: {}\nLyrics found: {} ({} synced, {} derived-timing)\nFiltered out: {}",
            self.attempted,
            self.succeeded,
            self.success_rate(),
            self.still_failed,
            self.lyrics_found,
            self.synced,
            self.derived_timing,
            self.filtered_out,
        )
    }
}
