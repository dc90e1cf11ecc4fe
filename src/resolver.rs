//! Lyric lookup with synced-then-plain fallback.

use tracing::{debug, info, warn};

use crate::checkpoint::ErrorLog;
use crate::lrc::{synthesize_timing, DERIVED_LINE_INTERVAL_SECS};
use crate::lrclib::LyricSource;
use crate::models::{LyricCandidate, LyricQuery, Provenance, ResolvedLyrics};
use crate::normalize::{clean_optional_term, clean_query_term, normalize_line_endings};
use crate::policy::ServicePolicy;

/// Resolves one track's lyrics. Performs no throttling of its own; the
/// caller spaces out calls.
pub struct LyricResolver<S> {
    source: S,
    policy: ServicePolicy,
}

impl<S: LyricSource> LyricResolver<S> {
    pub fn new(source: S, policy: ServicePolicy) -> Self {
        Self { source, policy }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Looks up `query` and picks the best candidate.
    ///
    /// Lookup failures are written to `errors` and reported as `None`.
    pub fn resolve(&self, query: &LyricQuery, errors: &mut dyn ErrorLog) -> Option<ResolvedLyrics> {
        let cleaned = LyricQuery {
            artist: clean_query_term(&query.artist),
            title: clean_query_term(&query.title),
            album: clean_optional_term(query.album.as_deref()),
            duration_secs: query.duration_secs,
        };

        let result = self
            .policy
            .retry("lyric search", || self.source.search(&cleaned, self.policy.timeout()));
        let candidates = match result {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(artist = %cleaned.artist, title = %cleaned.title, error = %e, "lyric search failed");
                errors.log_error(&format!(
                    "LRCLib search failed for {} - {}: {}",
                    cleaned.artist, cleaned.title, e
                ));
                return None;
            }
        };
        debug!(results = candidates.len(), "lyric search returned");

        let resolved = select(&candidates);
        match &resolved {
            Some(lyrics) => info!(
                artist = %cleaned.artist,
                title = %cleaned.title,
                provenance = %lyrics.provenance(),
                lines = lyrics.line_count(),
                "lyrics resolved"
            ),
            None => info!(artist = %cleaned.artist, title = %cleaned.title, "no usable lyrics"),
        }
        resolved
    }
}

/// First synced candidate by rank, else the first plain one with derived timing.
pub fn select(candidates: &[LyricCandidate]) -> Option<ResolvedLyrics> {
    if let Some(synced) = candidates.iter().find_map(LyricCandidate::synced) {
        return ResolvedLyrics::new(normalize_line_endings(synced), Provenance::Synced);
    }
    candidates.iter().find_map(LyricCandidate::plain).and_then(|plain| {
        ResolvedLyrics::new(
            synthesize_timing(plain, DERIVED_LINE_INTERVAL_SECS),
            Provenance::DerivedTiming,
        )
    })
}
