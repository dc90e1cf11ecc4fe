//! Media-server catalog enumeration.
//!
//! Items are requested sorted by `SortName` ascending. Resuming from an
//! offset is only sound if the server keeps that order stable between runs;
//! this module relies on it but cannot enforce it.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::checkpoint::ErrorLog;
use crate::error::TransportError;
use crate::models::{Library, Track};
use crate::policy::ServicePolicy;

/// Largest page the enumerator will request.
pub const MAX_PAGE_SIZE: usize = 500;

const SERVICE: &str = "catalog";
const TICKS_PER_SECOND: u64 = 10_000_000;
const LIBRARY_FOLDER_HINTS: [&str; 3] = ["music", "lidarr", "audio"];

/// One response from the listing endpoint.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ItemsPage {
    pub tracks: Vec<Track>,
    pub total_record_count: u64,
}

/// The catalog service, as the pipeline sees it.
pub trait CatalogSource {
    /// Lists audio items `[offset, offset + limit)` within `scope`.
    fn list_tracks(
        &self,
        scope: Option<&str>,
        offset: u64,
        limit: usize,
        timeout: Duration,
    ) -> Result<ItemsPage, TransportError>;

    /// Lists the top-level music libraries.
    fn list_libraries(&self, timeout: Duration) -> Result<Vec<Library>, TransportError>;
}

// ============================================================================
// Enumerator
// ============================================================================

/// Result of [`CatalogEnumerator::fetch_page`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Page {
    pub tracks: Vec<Track>,
    /// True iff `offset + tracks.len() < total` as reported by the service.
    pub has_more: bool,
    pub total: Option<u64>,
    /// Set when the page is empty because the request failed, not because
    /// the catalog ended.
    pub error: Option<String>,
}

impl Page {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Pages through the catalog, turning transport failures into end-of-data.
pub struct CatalogEnumerator<S> {
    source: S,
    policy: ServicePolicy,
}

impl<S: CatalogSource> CatalogEnumerator<S> {
    pub fn new(source: S, policy: ServicePolicy) -> Self {
        Self { source, policy }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Fetches one page. Never fails: a transport error yields an empty page
    /// with `has_more = false` and is written to `errors`.
    pub fn fetch_page(
        &self,
        scope: Option<&str>,
        offset: u64,
        page_size: usize,
        errors: &mut dyn ErrorLog,
    ) -> Page {
        let limit = page_size.clamp(1, MAX_PAGE_SIZE);
        if limit != page_size {
            debug!(requested = page_size, used = limit, "page size clamped");
        }

        let result = self.policy.retry("catalog page", || {
            self.source
                .list_tracks(scope, offset, limit, self.policy.timeout())
        });

        match result {
            Ok(mut page) => {
                page.tracks.truncate(limit);
                let fetched = page.tracks.len() as u64;
                let has_more = fetched > 0 && offset + fetched < page.total_record_count;
                debug!(offset, fetched, total = page.total_record_count, has_more, "catalog page");
                Page {
                    tracks: page.tracks,
                    has_more,
                    total: Some(page.total_record_count),
                    error: None,
                }
            }
            Err(e) => {
                warn!(offset, error = %e, "failed to fetch catalog page");
                let message = format!("Failed to get songs at index {}: {}", offset, e);
                errors.log_error(&message);
                Page {
                    error: Some(message),
                    ..Page::default()
                }
            }
        }
    }

    /// Music libraries, with transport failures propagated to the caller.
    pub fn libraries(&self) -> Result<Vec<Library>, TransportError> {
        self.policy
            .retry("list libraries", || self.source.list_libraries(self.policy.timeout()))
    }
}

// ============================================================================
// Jellyfin client
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ItemsResponse {
    items: Option<Vec<RawItem>>,
    total_record_count: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct RawItem {
    id: Option<String>,
    name: Option<String>,
    path: Option<String>,
    artists: Option<Vec<String>>,
    album: Option<String>,
    album_artist: Option<String>,
    run_time_ticks: Option<u64>,
    #[serde(rename = "Type")]
    item_type: Option<String>,
    collection_type: Option<String>,
}

impl From<RawItem> for Track {
    fn from(raw: RawItem) -> Self {
        Track {
            id: raw.id.unwrap_or_default(),
            title: raw.name.unwrap_or_default(),
            artists: raw.artists.unwrap_or_default(),
            album_artist: raw.album_artist,
            album: raw.album,
            path: raw.path.unwrap_or_default(),
            duration_secs: raw
                .run_time_ticks
                .map(|ticks| (ticks / TICKS_PER_SECOND) as u32)
                .filter(|secs| *secs > 0),
        }
    }
}

impl RawItem {
    fn into_library(self) -> Option<Library> {
        Some(Library {
            id: self.id?,
            name: self.name.unwrap_or_default(),
            path: self.path,
        })
    }
}

/// Blocking client for a Jellyfin-compatible `/Items` endpoint.
pub struct JellyfinClient {
    http: Client,
    base_url: String,
    token: String,
}

impl JellyfinClient {
    pub fn new(base_url: &str, token: &str, user_agent: &str) -> Result<Self, TransportError> {
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
            token: token.to_string(),
        })
    }

    fn get_items(
        &self,
        query: &[(&str, String)],
        timeout: Duration,
    ) -> Result<ItemsResponse, TransportError> {
        let url = format!("{}/Items", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("X-Emby-Token", &self.token)
            .query(query)
            .timeout(timeout)
            .send()
            .map_err(|e| TransportError::from_reqwest(SERVICE, timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                service: SERVICE,
                status: status.as_u16(),
            });
        }
        response
            .json::<ItemsResponse>()
            .map_err(|e| TransportError::from_reqwest(SERVICE, timeout, e))
    }
}

impl CatalogSource for JellyfinClient {
    fn list_tracks(
        &self,
        scope: Option<&str>,
        offset: u64,
        limit: usize,
        timeout: Duration,
    ) -> Result<ItemsPage, TransportError> {
        let mut query = vec![
            ("IncludeItemTypes", "Audio".to_string()),
            ("Recursive", "true".to_string()),
            ("Fields", "Path,MediaSources,Artists,Album,AlbumArtist".to_string()),
            ("StartIndex", offset.to_string()),
            ("Limit", limit.to_string()),
            ("SortBy", "SortName".to_string()),
            ("SortOrder", "Ascending".to_string()),
        ];
        if let Some(scope) = scope {
            query.push(("ParentId", scope.to_string()));
        }

        let response = self.get_items(&query, timeout)?;
        Ok(ItemsPage {
            tracks: response
                .items
                .unwrap_or_default()
                .into_iter()
                .map(Track::from)
                .collect(),
            total_record_count: response.total_record_count,
        })
    }

    fn list_libraries(&self, timeout: Duration) -> Result<Vec<Library>, TransportError> {
        let collections = self.get_items(
            &[
                ("Recursive", "false".to_string()),
                ("IncludeItemTypes", "CollectionFolder".to_string()),
            ],
            timeout,
        )?;
        let libraries = music_collections(collections.items.unwrap_or_default());
        if !libraries.is_empty() {
            return Ok(libraries);
        }

        let folders = self.get_items(&[("Recursive", "false".to_string())], timeout)?;
        Ok(music_like_folders(folders.items.unwrap_or_default()))
    }
}

fn music_collections(items: Vec<RawItem>) -> Vec<Library> {
    items
        .into_iter()
        .filter(|item| item.collection_type.as_deref() == Some("music"))
        .filter_map(RawItem::into_library)
        .collect()
}

fn music_like_folders(items: Vec<RawItem>) -> Vec<Library> {
    items
        .into_iter()
        .filter(|item| item.item_type.as_deref() == Some("Folder"))
        .filter(|item| {
            let name = item.name.as_deref().unwrap_or_default().to_lowercase();
            LIBRARY_FOLDER_HINTS.iter().any(|hint| name.contains(hint))
        })
        .filter_map(RawItem::into_library)
        .collect()
}

/// Finds a library by id, or by case-insensitive name.
pub fn find_library<'a>(libraries: &'a [Library], needle: &str) -> Option<&'a Library> {
    libraries
        .iter()
        .find(|lib| lib.id == needle)
        .or_else(|| libraries.iter().find(|lib| lib.name.eq_ignore_ascii_case(needle)))
}
