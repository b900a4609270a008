//! Typed client for the library server's REST API.
//!
//! Thin wrappers over the [`Gateway`] for the endpoints the client
//! consumes: the plugin-authenticate handshake, series browsing and
//! search, chapter metadata, and reading-progress sync. The reader
//! view-model depends on the [`ReaderApi`] subset so tests can swap in
//! a fake.

use crate::credentials::{CredentialStore, KEY_API_KEY, KEY_TOKEN};
use crate::error::ApiError;
use crate::gateway::{Gateway, Method, Payload};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

/// Plugin name reported during the authenticate handshake.
const PLUGIN_NAME: &str = "Yomu";

/// A series in the library.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Series {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub library_id: u32,
    #[serde(default)]
    pub pages: u32,
    #[serde(default)]
    pub pages_read: u32,
}

/// A volume within a series, with its chapters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
}

/// A chapter within a volume.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub pages: u32,
    #[serde(default)]
    pub volume_id: u32,
}

/// Reader-oriented chapter metadata.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterInfo {
    pub pages: u32,
    #[serde(default)]
    pub series_id: u32,
    #[serde(default)]
    pub volume_id: u32,
    #[serde(default)]
    pub library_id: u32,
    #[serde(default)]
    pub series_name: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

/// Pixel dimensions of one page file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDimension {
    pub page_number: u32,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub file_name: Option<String>,
}

/// Reading position within a chapter; `page_num` is 1-based.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingProgress {
    pub series_id: u32,
    pub volume_id: u32,
    pub chapter_id: u32,
    pub page_num: u32,
    #[serde(default)]
    pub library_id: u32,
}

/// Result of the plugin-authenticate handshake.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub token: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// The slice of the server API the reader view-model needs.
#[async_trait]
pub trait ReaderApi: Send + Sync {
    async fn chapter_info(&self, chapter_id: u32) -> Result<ChapterInfo, ApiError>;
    async fn page_dimensions(&self, chapter_id: u32) -> Result<Vec<PageDimension>, ApiError>;
    async fn reading_progress(&self, chapter_id: u32)
    -> Result<Option<ReadingProgress>, ApiError>;
    async fn save_progress(&self, progress: &ReadingProgress) -> Result<(), ApiError>;
    async fn mark_read(&self, series_id: u32, chapter_id: u32) -> Result<(), ApiError>;
}

/// Typed API client over the platform gateway.
pub struct LibraryClient {
    gateway: Arc<Gateway>,
    credentials: Arc<dyn CredentialStore>,
}

impl LibraryClient {
    pub fn new(gateway: Arc<Gateway>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            gateway,
            credentials,
        }
    }

    /// Exchanges the stored API key for a session JWT and stores it.
    pub async fn authenticate(&self) -> Result<AuthResponse, ApiError> {
        let api_key = self
            .credentials
            .get(KEY_API_KEY)?
            .ok_or(ApiError::MissingApiKey)?;

        let payload = self
            .gateway
            .request(
                "plugin/authenticate",
                Method::Post,
                None,
                &[
                    ("apiKey", Some(api_key)),
                    ("pluginName", Some(PLUGIN_NAME.to_string())),
                ],
            )
            .await?;

        let auth: AuthResponse = decode(payload)?;
        self.credentials.set(KEY_TOKEN, &auth.token)?;
        Ok(auth)
    }

    /// All series visible to this account.
    pub async fn list_series(&self) -> Result<Vec<Series>, ApiError> {
        let payload = self
            .gateway
            .request("series/all", Method::Post, Some(json!({})), &[])
            .await?;
        decode(payload)
    }

    /// Full-text series search.
    pub async fn search(&self, term: &str) -> Result<Vec<Series>, ApiError> {
        let payload = self
            .gateway
            .request(
                "search/search",
                Method::Get,
                None,
                &[("queryString", Some(term.to_string()))],
            )
            .await?;

        let value = payload.into_json()?;
        from_value(series_from_search(value))
    }

    /// Metadata for one series.
    pub async fn series(&self, series_id: u32) -> Result<Series, ApiError> {
        let payload = self
            .gateway
            .request(
                "series",
                Method::Get,
                None,
                &[("seriesId", Some(series_id.to_string()))],
            )
            .await?;
        decode(payload)
    }

    /// Volumes (with chapters) for one series.
    pub async fn volumes(&self, series_id: u32) -> Result<Vec<Volume>, ApiError> {
        let payload = self
            .gateway
            .request(
                "series/volumes",
                Method::Get,
                None,
                &[("seriesId", Some(series_id.to_string()))],
            )
            .await?;
        decode(payload)
    }

    /// Metadata for one chapter.
    pub async fn chapter(&self, chapter_id: u32) -> Result<Chapter, ApiError> {
        let payload = self
            .gateway
            .request(
                "chapter",
                Method::Get,
                None,
                &[("chapterId", Some(chapter_id.to_string()))],
            )
            .await?;
        decode(payload)
    }
}

#[async_trait]
impl ReaderApi for LibraryClient {
    async fn chapter_info(&self, chapter_id: u32) -> Result<ChapterInfo, ApiError> {
        let payload = self
            .gateway
            .request(
                "reader/chapter-info",
                Method::Get,
                None,
                &[("chapterId", Some(chapter_id.to_string()))],
            )
            .await?;
        decode(payload)
    }

    async fn page_dimensions(&self, chapter_id: u32) -> Result<Vec<PageDimension>, ApiError> {
        let payload = self
            .gateway
            .request(
                "reader/file-dimensions",
                Method::Get,
                None,
                &[("chapterId", Some(chapter_id.to_string()))],
            )
            .await?;
        decode(payload)
    }

    async fn reading_progress(
        &self,
        chapter_id: u32,
    ) -> Result<Option<ReadingProgress>, ApiError> {
        let payload = self
            .gateway
            .request(
                "reader/get-progress",
                Method::Get,
                None,
                &[("chapterId", Some(chapter_id.to_string()))],
            )
            .await?;

        // The server answers `null` when nothing has been read yet.
        match payload.into_json()? {
            Value::Null => Ok(None),
            value => Ok(Some(from_value(value)?)),
        }
    }

    async fn save_progress(&self, progress: &ReadingProgress) -> Result<(), ApiError> {
        let body = serde_json::to_value(progress)
            .map_err(|e| ApiError::UnexpectedBody(e.to_string()))?;
        self.gateway
            .request("reader/progress", Method::Post, Some(body), &[])
            .await?;
        Ok(())
    }

    async fn mark_read(&self, series_id: u32, chapter_id: u32) -> Result<(), ApiError> {
        let body = json!({
            "seriesId": series_id,
            "chapterId": chapter_id,
        });
        self.gateway
            .request("reader/mark-read", Method::Post, Some(body), &[])
            .await?;
        Ok(())
    }
}

/// JSON payload into a typed value.
fn decode<T: DeserializeOwned>(payload: Payload) -> Result<T, ApiError> {
    from_value(payload.into_json()?)
}

fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|e| ApiError::UnexpectedBody(e.to_string()))
}

/// The search endpoint wraps matches per entity kind; a bare array is
/// accepted too for older servers.
fn series_from_search(value: Value) -> Value {
    match value {
        Value::Object(mut map) => map.remove("series").unwrap_or(Value::Array(Vec::new())),
        other @ Value::Array(_) => other,
        _ => Value::Array(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_decodes_with_partial_fields() {
        let value = json!({
            "id": 12,
            "name": "Planetes",
            "libraryId": 2
        });
        let series: Series = from_value(value).unwrap();
        assert_eq!(series.id, 12);
        assert_eq!(series.name, "Planetes");
        assert_eq!(series.library_id, 2);
        assert_eq!(series.pages_read, 0);
    }

    #[test]
    fn test_chapter_info_decodes() {
        let value = json!({
            "pages": 24,
            "seriesId": 3,
            "volumeId": 9,
            "seriesName": "Planetes",
            "fileName": "v01c001.cbz"
        });
        let info: ChapterInfo = from_value(value).unwrap();
        assert_eq!(info.pages, 24);
        assert_eq!(info.series_id, 3);
        assert_eq!(info.series_name.as_deref(), Some("Planetes"));
    }

    #[test]
    fn test_progress_round_trips_camel_case() {
        let progress = ReadingProgress {
            series_id: 1,
            volume_id: 2,
            chapter_id: 3,
            page_num: 4,
            library_id: 5,
        };
        let value = serde_json::to_value(&progress).unwrap();
        assert_eq!(value["seriesId"], 1);
        assert_eq!(value["pageNum"], 4);

        let back: ReadingProgress = from_value(value).unwrap();
        assert_eq!(back.chapter_id, 3);
        assert_eq!(back.page_num, 4);
    }

    #[test]
    fn test_search_extracts_series_collection() {
        let wrapped = json!({
            "series": [{"id": 1, "name": "A"}],
            "chapters": []
        });
        let series: Vec<Series> = from_value(series_from_search(wrapped)).unwrap();
        assert_eq!(series.len(), 1);

        let bare = json!([{"id": 2, "name": "B"}]);
        let series: Vec<Series> = from_value(series_from_search(bare)).unwrap();
        assert_eq!(series[0].name, "B");

        let series: Vec<Series> = from_value(series_from_search(Value::Null)).unwrap();
        assert!(series.is_empty());
    }

    #[test]
    fn test_volume_decodes_nested_chapters() {
        let value = json!({
            "id": 4,
            "name": "Volume 1",
            "chapters": [
                {"id": 10, "title": "Chapter 1", "pages": 30, "volumeId": 4},
                {"id": 11, "pages": 28, "volumeId": 4}
            ]
        });
        let volume: Volume = from_value(value).unwrap();
        assert_eq!(volume.chapters.len(), 2);
        assert_eq!(volume.chapters[1].title, "");
        assert_eq!(volume.chapters[1].pages, 28);
    }
}
