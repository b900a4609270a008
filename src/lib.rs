//! Yomu - client for self-hosted manga library servers.
//!
//! This library provides:
//! - Server connection via OPDS bootstrap URLs and the
//!   plugin-authenticate handshake
//! - Library browsing (series, volumes, chapters)
//! - A platform-aware image pipeline: direct authenticated URLs on
//!   native, relay-proxied binary fetches decoded to data URIs on web
//! - A page cache with TTL expiry and adjacent-page preloading for the
//!   reader

pub mod api;
pub mod cache;
pub mod console;
pub mod credentials;
pub mod debounce;
pub mod error;
pub mod gateway;
pub mod images;
pub mod reader;

// Re-export commonly used types
pub use api::{AuthResponse, Chapter, ChapterInfo, LibraryClient, ReaderApi, Series, Volume};
pub use cache::{ImageCache, ReadingMode};
pub use console::Console;
pub use credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use debounce::Debouncer;
pub use error::{ApiError, CredentialError};
pub use gateway::{Gateway, Method, Payload, Platform};
pub use images::{ContentRef, DirectUrlStrategy, ImageStrategy, ProxyDecodeStrategy, ResolvedImage};
pub use reader::{ReaderSession, ReaderState};
