//! LRCLIB search client.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use tracing::debug;

use crate::error::TransportError;
use crate::models::{LyricCandidate, LyricQuery};

const SERVICE: &str = "lookup";

/// A lyric search service returning ranked candidates.
pub trait LyricSource {
    fn search(&self, query: &LyricQuery, timeout: Duration)
        -> Result<Vec<LyricCandidate>, TransportError>;
}

/// Blocking client for `GET {base}/search`.
pub struct LrclibClient {
    http: Client,
    base_url: String,
}

impl LrclibClient {
    pub fn new(base_url: &str, user_agent: &str) -> Result<Self, TransportError> {
        let http = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|source| TransportError::Http {
                service: SERVICE,
                source,
            })?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

/// Query-string pairs for a search request.
fn search_params(query: &LyricQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("artist_name", query.artist.clone()),
        ("track_name", query.title.clone()),
    ];
    if let Some(album) = &query.album {
        params.push(("album_name", album.clone()));
    }
    if let Some(duration) = query.duration_secs {
        params.push(("duration", duration.to_string()));
    }
    params
}

impl LyricSource for LrclibClient {
    fn search(
        &self,
        query: &LyricQuery,
        timeout: Duration,
    ) -> Result<Vec<LyricCandidate>, TransportError> {
        let url = format!("{}/search", self.base_url);
        debug!(artist = %query.artist, title = %query.title, "lrclib search");

        let response = self
            .http
            .get(&url)
            .query(&search_params(query))
            .timeout(timeout)
            .send()
            .map_err(|e| TransportError::from_reqwest(SERVICE, timeout, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(TransportError::Status {
                service: SERVICE,
                status: status.as_u16(),
            });
        }
        response
            .json::<Vec<LyricCandidate>>()
            .map_err(|e| TransportError::from_reqwest(SERVICE, timeout, e))
    }
}
