//! Reader view-model.
//!
//! Tracks the current page of a reading session, drives neighborhood
//! preloading through the page cache, and reports progress upward with
//! a trailing-edge debounce so a burst of page turns produces a single
//! server call.

use crate::api::{PageDimension, ReaderApi, ReadingProgress};
use crate::cache::{ImageCache, ReadingMode};
use crate::debounce::Debouncer;
use crate::error::ApiError;
use crate::images::{ContentRef, ResolvedImage};
use futures::future::join3;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Quiet period before progress reports and mark-read calls fire.
const PROGRESS_DEBOUNCE: Duration = Duration::from_secs(2);

/// Lifecycle of a reading session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderState {
    Idle,
    Loading,
    Ready,
    Error(String),
}

/// One page of the open chapter.
#[derive(Debug, Clone)]
pub struct PageDescriptor {
    /// 1-based page number.
    pub number: u32,
    pub file_name: String,
    /// `(width, height)` in pixels when the server reported them.
    pub dimensions: Option<(u32, u32)>,
}

/// Per-chapter reading session.
///
/// State machine: `Idle -> Loading -> Ready -> (Error | Ready)`. An
/// `Error` session re-enters `Loading` through [`ReaderSession::retry`].
pub struct ReaderSession {
    api: Arc<dyn ReaderApi>,
    cache: Arc<ImageCache>,
    chapter_id: u32,
    mode: ReadingMode,
    state: ReaderState,
    series_id: u32,
    volume_id: u32,
    library_id: u32,
    pages: Vec<PageDescriptor>,
    current_page_index: usize,
    total_pages: u32,
    /// Cleared on close; debounced callbacks from an abandoned session
    /// check it before touching the server.
    live: Arc<AtomicBool>,
    progress_debounce: Debouncer,
    mark_read_debounce: Debouncer,
}

impl ReaderSession {
    /// Creates an idle session for `chapter_id`.
    pub fn new(
        api: Arc<dyn ReaderApi>,
        cache: Arc<ImageCache>,
        chapter_id: u32,
        mode: ReadingMode,
    ) -> Self {
        Self {
            api,
            cache,
            chapter_id,
            mode,
            state: ReaderState::Idle,
            series_id: 0,
            volume_id: 0,
            library_id: 0,
            pages: Vec::new(),
            current_page_index: 0,
            total_pages: 0,
            live: Arc::new(AtomicBool::new(true)),
            progress_debounce: Debouncer::new(PROGRESS_DEBOUNCE),
            mark_read_debounce: Debouncer::new(PROGRESS_DEBOUNCE),
        }
    }

    /// Loads chapter metadata, page dimensions, and stored progress
    /// concurrently, then transitions to `Ready` (or `Error`).
    pub async fn open(&mut self) {
        self.state = ReaderState::Loading;

        let (info, dimensions, progress) = join3(
            self.api.chapter_info(self.chapter_id),
            self.api.page_dimensions(self.chapter_id),
            self.api.reading_progress(self.chapter_id),
        )
        .await;

        let info = match info {
            Ok(info) => info,
            Err(e) => return self.fail(e),
        };
        let dimensions = match dimensions {
            Ok(dimensions) => dimensions,
            Err(e) => return self.fail(e),
        };
        let progress = match progress {
            Ok(progress) => progress,
            Err(e) => return self.fail(e),
        };

        self.series_id = info.series_id;
        self.volume_id = info.volume_id;
        self.library_id = info.library_id;
        self.total_pages = info.pages;
        self.pages = build_pages(info.pages, &dimensions);

        // Stored progress is 1-based; clamp into the page range.
        self.current_page_index = progress
            .map(|p| p.page_num.saturating_sub(1) as usize)
            .map(|index| index.min(self.total_pages.saturating_sub(1) as usize))
            .unwrap_or(0);

        self.state = ReaderState::Ready;
        self.preload_neighborhood();
    }

    /// Re-enters `Loading` from the `Error` state.
    pub async fn retry(&mut self) {
        if matches!(self.state, ReaderState::Error(_)) {
            self.open().await;
        }
    }

    fn fail(&mut self, error: ApiError) {
        self.state = ReaderState::Error(error.to_string());
    }

    /// Jumps to a 0-based page index, clamped to the page range.
    /// Triggers preloading and a debounced progress report; reaching
    /// the last page also schedules a debounced mark-read.
    pub fn go_to_page(&mut self, index: usize) {
        if self.state != ReaderState::Ready || self.total_pages == 0 {
            return;
        }

        self.current_page_index = index.min(self.total_pages as usize - 1);
        self.preload_neighborhood();
        self.schedule_progress_report();

        if self.current_page_index + 1 == self.total_pages as usize {
            self.schedule_mark_read();
        }
    }

    /// Advances one page.
    pub fn next_page(&mut self) {
        self.go_to_page(self.current_page_index.saturating_add(1));
    }

    /// Goes back one page.
    pub fn previous_page(&mut self) {
        self.go_to_page(self.current_page_index.saturating_sub(1));
    }

    /// Scroll-driven navigation for vertical mode; `page_number` is
    /// 1-based.
    pub fn on_page_visible(&mut self, page_number: u32) {
        self.go_to_page(page_number.saturating_sub(1) as usize);
    }

    /// Resolves the current page's image through the cache.
    pub async fn current_image(&self) -> Option<ResolvedImage> {
        if self.state != ReaderState::Ready || self.total_pages == 0 {
            return None;
        }
        self.cache
            .get_or_resolve(&ContentRef::Page {
                chapter_id: self.chapter_id,
                page: self.current_page_number(),
            })
            .await
    }

    /// Ends the session: late debounced callbacks become no-ops and
    /// pending timers are cancelled.
    pub fn close(&mut self) {
        self.live.store(false, Ordering::SeqCst);
        self.progress_debounce.cancel();
        self.mark_read_debounce.cancel();
        self.state = ReaderState::Idle;
    }

    fn preload_neighborhood(&self) {
        self.cache.preload(
            self.chapter_id,
            self.current_page_number(),
            self.total_pages,
            self.mode,
        );
    }

    fn schedule_progress_report(&self) {
        let api = Arc::clone(&self.api);
        let live = Arc::clone(&self.live);
        let progress = ReadingProgress {
            series_id: self.series_id,
            volume_id: self.volume_id,
            chapter_id: self.chapter_id,
            page_num: self.current_page_number(),
            library_id: self.library_id,
        };

        self.progress_debounce.call(async move {
            if live.load(Ordering::SeqCst) {
                let _ = api.save_progress(&progress).await;
            }
        });
    }

    fn schedule_mark_read(&self) {
        let api = Arc::clone(&self.api);
        let live = Arc::clone(&self.live);
        let series_id = self.series_id;
        let chapter_id = self.chapter_id;

        self.mark_read_debounce.call(async move {
            if live.load(Ordering::SeqCst) {
                let _ = api.mark_read(series_id, chapter_id).await;
            }
        });
    }

    pub fn state(&self) -> &ReaderState {
        &self.state
    }

    pub fn pages(&self) -> &[PageDescriptor] {
        &self.pages
    }

    /// 0-based index of the current page.
    pub fn current_page_index(&self) -> usize {
        self.current_page_index
    }

    /// 1-based number of the current page.
    pub fn current_page_number(&self) -> u32 {
        self.current_page_index as u32 + 1
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }
}

/// Builds the ordered page list, attaching server-reported dimensions
/// where available and synthesizing names where not.
fn build_pages(total: u32, dimensions: &[PageDimension]) -> Vec<PageDescriptor> {
    (1..=total)
        .map(|number| {
            let dimension = dimensions.iter().find(|d| d.page_number == number);
            PageDescriptor {
                number,
                file_name: dimension
                    .and_then(|d| d.file_name.clone())
                    .unwrap_or_else(|| format!("page_{:04}", number)),
                dimensions: dimension.map(|d| (d.width, d.height)),
            }
        })
        .collect()
}
