//! Image resolution pipeline.
//!
//! Converts a [`ContentRef`] into a reference the platform's image
//! renderer can display, hiding the native/web difference behind a
//! strategy trait: native builds get a direct authenticated URL fetched
//! lazily by the renderer, web builds fetch the bytes through the relay
//! proxy and decode them into a self-contained data URI in-process.

use crate::credentials::{CredentialStore, KEY_API_KEY, KEY_BASE_URL};
use crate::error::ApiError;
use crate::gateway::{Gateway, Method, Payload};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::sync::Arc;
use std::time::SystemTime;
use url::Url;

/// Logical identifier for an image-bearing entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentRef {
    /// Series cover.
    Series { id: u32 },
    /// Volume cover.
    Volume { id: u32 },
    /// Chapter cover.
    Chapter { id: u32 },
    /// A single page of a chapter, 1-based.
    Page { chapter_id: u32, page: u32 },
}

impl ContentRef {
    /// Deterministic cache key, unique per (kind, id, page).
    pub fn cache_key(&self) -> String {
        match self {
            ContentRef::Series { id } => format!("series_{}", id),
            ContentRef::Volume { id } => format!("volume_{}", id),
            ContentRef::Chapter { id } => format!("chapter_{}", id),
            ContentRef::Page { chapter_id, page } => format!("page_{}_{}", chapter_id, page),
        }
    }

    /// Server-relative endpoint serving this image.
    pub fn endpoint(&self) -> &'static str {
        match self {
            ContentRef::Series { .. } => "image/series-cover",
            ContentRef::Volume { .. } => "image/volume-cover",
            ContentRef::Chapter { .. } => "image/chapter-cover",
            ContentRef::Page { .. } => "reader/image",
        }
    }

    /// Query parameters addressing this image.
    pub fn params(&self) -> Vec<(&'static str, Option<String>)> {
        match self {
            ContentRef::Series { id } => vec![("seriesId", Some(id.to_string()))],
            ContentRef::Volume { id } => vec![("volumeId", Some(id.to_string()))],
            ContentRef::Chapter { id } => vec![("chapterId", Some(id.to_string()))],
            ContentRef::Page { chapter_id, page } => vec![
                ("chapterId", Some(chapter_id.to_string())),
                ("page", Some(page.to_string())),
            ],
        }
    }
}

/// How a resolved image reference is meant to be consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// HTTP URL the renderer fetches itself (native).
    DirectUrl,
    /// Self-contained data URI, no further network fetch (web).
    DecodedInline,
}

/// A displayable image reference.
#[derive(Debug, Clone)]
pub struct ResolvedImage {
    /// Whatever the platform's image primitive accepts: an HTTP URL or
    /// a `data:` URI.
    pub uri: String,
    /// When the resolution happened.
    pub resolved_at: SystemTime,
    /// Which delivery path produced this reference.
    pub source: SourceKind,
}

/// Platform-specific image resolution, selected once at startup.
///
/// Failure policy: every error (missing config, network, decode)
/// resolves to `None`; nothing propagates past this boundary. Callers
/// render a placeholder for `None` and may re-trigger resolution.
#[async_trait]
pub trait ImageStrategy: Send + Sync {
    async fn resolve(&self, content: &ContentRef) -> Option<ResolvedImage>;
}

/// Native strategy: builds a direct authenticated URL without any
/// network call. The renderer fetches it lazily; the embedded `apiKey`
/// query parameter authenticates image endpoints server-side.
pub struct DirectUrlStrategy {
    credentials: Arc<dyn CredentialStore>,
}

impl DirectUrlStrategy {
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl ImageStrategy for DirectUrlStrategy {
    async fn resolve(&self, content: &ContentRef) -> Option<ResolvedImage> {
        let base_url = self.credentials.get(KEY_BASE_URL).ok().flatten()?;
        let api_key = self.credentials.get(KEY_API_KEY).ok().flatten()?;

        let raw = format!(
            "{}/api/{}",
            base_url.trim_end_matches('/'),
            content.endpoint()
        );
        let mut url = Url::parse(&raw).ok()?;

        {
            let mut query = url.query_pairs_mut();
            for (key, value) in content.params() {
                if let Some(value) = value {
                    query.append_pair(key, &value);
                }
            }
            query.append_pair("apiKey", &api_key);
        }

        Some(ResolvedImage {
            uri: url.into(),
            resolved_at: SystemTime::now(),
            source: SourceKind::DirectUrl,
        })
    }
}

/// Web strategy: fetches the binary through the gateway (and so through
/// the relay proxy) and encodes it as a base64 data URI.
pub struct ProxyDecodeStrategy {
    gateway: Arc<Gateway>,
    credentials: Arc<dyn CredentialStore>,
}

impl ProxyDecodeStrategy {
    pub fn new(gateway: Arc<Gateway>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            gateway,
            credentials,
        }
    }
}

#[async_trait]
impl ImageStrategy for ProxyDecodeStrategy {
    async fn resolve(&self, content: &ContentRef) -> Option<ResolvedImage> {
        // Both halves of the connection must be configured before any
        // fetch is attempted.
        self.credentials.get(KEY_BASE_URL).ok().flatten()?;
        self.credentials.get(KEY_API_KEY).ok().flatten()?;

        let params = content.params();
        let payload = self
            .gateway
            .request(content.endpoint(), Method::Get, None, &params)
            .await
            .ok()?;

        let Payload::Binary {
            bytes,
            content_type,
        } = payload
        else {
            return None;
        };

        let uri = decode_inline(&bytes, content_type.as_deref()).ok()?;
        Some(ResolvedImage {
            uri,
            resolved_at: SystemTime::now(),
            source: SourceKind::DecodedInline,
        })
    }
}

/// Turns fetched image bytes into a data URI, rejecting bodies that
/// cannot represent an image.
fn decode_inline(bytes: &[u8], content_type: Option<&str>) -> Result<String, ApiError> {
    if bytes.is_empty() {
        return Err(ApiError::Decode("empty image body".to_string()));
    }
    Ok(to_data_uri(bytes, content_type))
}

/// Encodes raw image bytes as a `data:` URI.
///
/// A server-supplied image `Content-Type` is authoritative; otherwise
/// the MIME type is sniffed from the file signature.
pub fn to_data_uri(bytes: &[u8], content_type: Option<&str>) -> String {
    let mime = match content_type {
        Some(ct) if ct.starts_with("image/") => ct,
        _ => sniff_mime(bytes),
    };
    format!("data:{};base64,{}", mime, BASE64.encode(bytes))
}

/// Sniffs the MIME type from well-known raster signatures, defaulting
/// to PNG when the signature is unrecognized.
fn sniff_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        "image/png"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/png"
    }
}
