//! Conversation history browsing
//!
//! The backend serves history as skip/limit pages. The paginator walks them
//! with an explicit state machine and caps how many fetch-more calls one
//! history-panel lifetime may issue.

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};
use unicode_width::UnicodeWidthChar;

use crate::error::Result;
use crate::transcript::Message;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const DEFAULT_MAX_LOADED_PAGES: usize = 5;
const PREVIEW_WIDTH: usize = 40;

// ═══════════════════════════════════════════════════════════════
// Wire types
// ═══════════════════════════════════════════════════════════════

/// One stored user/assistant exchange
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HistoryTurn {
    pub session_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub turn_id: String,
    pub user_message: String,
    #[serde(default)]
    pub assistant_message: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryResponse {
    pub items: Vec<HistoryTurn>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub page: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub skip: usize,
    pub limit: usize,
    pub user_id: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Str(String),
        Num(i64),
    }

    Ok(match Repr::deserialize(deserializer)? {
        Repr::Str(s) => s,
        Repr::Num(n) => n.to_string(),
    })
}

#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn fetch_history(&self, query: &HistoryQuery) -> Result<HistoryResponse>;

    /// All turns of one session, oldest first
    async fn fetch_session(&self, session_id: &str, user_id: Option<&str>)
        -> Result<Vec<HistoryTurn>>;
}

// ═══════════════════════════════════════════════════════════════
// Summaries
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySummary {
    pub session_id: String,
    pub turn_id: String,
    pub date_label: String,
    pub last_message_preview: String,
    pub turn: HistoryTurn,
}

impl From<HistoryTurn> for HistorySummary {
    fn from(turn: HistoryTurn) -> Self {
        Self {
            session_id: turn.session_id.clone(),
            turn_id: turn.turn_id.clone(),
            date_label: date_label(&turn.timestamp),
            last_message_preview: preview(&turn.user_message, PREVIEW_WIDTH),
            turn,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPage {
    pub items: Vec<HistorySummary>,
    pub has_more: bool,
}

/// Local calendar date of a backend timestamp. Naive timestamps are UTC.
pub fn date_label(timestamp: &str) -> String {
    if let Ok(dt) = DateTime::parse_from_rfc3339(timestamp) {
        return dt.with_timezone(&Local).format("%Y-%m-%d").to_string();
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S%.f") {
        return naive.and_utc().with_timezone(&Local).format("%Y-%m-%d").to_string();
    }
    timestamp.chars().take(10).collect()
}

/// First line of `text`, cut to `width` terminal columns
pub fn preview(text: &str, width: usize) -> String {
    let line = text.lines().next().unwrap_or("").trim();
    let mut used = 0;
    let mut out = String::new();
    for ch in line.chars() {
        let w = ch.width().unwrap_or(0);
        if used + w > width {
            out.push('…');
            return out;
        }
        used += w;
        out.push(ch);
    }
    out
}

/// Expand stored turns into transcript messages
pub fn turns_to_messages(turns: &[HistoryTurn]) -> Vec<Message> {
    turns
        .iter()
        .flat_map(|turn| {
            [
                Message::user(format!("{}-user", turn.turn_id), turn.user_message.clone())
                    .with_timestamp(turn.timestamp.clone()),
                Message::assistant(
                    format!("{}-assistant", turn.turn_id),
                    turn.assistant_message.clone(),
                )
                .with_timestamp(turn.timestamp.clone()),
            ]
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════
// Paginator
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagerState {
    /// More pages may exist
    Idle,
    Loading,
    /// No further fetch-more until a fresh load
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Request was a duplicate or not allowed in the current state
    Skipped,
    Loaded(HistoryPage),
    /// Page cap reached; no network call made
    CapReached,
    Failed(String),
}

#[derive(Debug)]
pub struct HistoryPaginator {
    state: PagerState,
    items: Vec<HistorySummary>,
    current_page: usize,
    loaded_page_count: usize,
    page_size: usize,
    max_loaded_pages: usize,
    user_filter: Option<String>,
}

impl Default for HistoryPaginator {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE, DEFAULT_MAX_LOADED_PAGES, None)
    }
}

impl HistoryPaginator {
    pub fn new(page_size: usize, max_loaded_pages: usize, user_filter: Option<String>) -> Self {
        Self {
            state: PagerState::Idle,
            items: Vec::new(),
            current_page: 0,
            loaded_page_count: 0,
            page_size: page_size.max(1),
            max_loaded_pages,
            user_filter,
        }
    }

    pub fn state(&self) -> PagerState {
        self.state
    }

    pub fn has_more(&self) -> bool {
        self.state != PagerState::Exhausted
    }

    pub fn is_loading(&self) -> bool {
        self.state == PagerState::Loading
    }

    pub fn items(&self) -> &[HistorySummary] {
        &self.items
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn loaded_page_count(&self) -> usize {
        self.loaded_page_count
    }

    pub fn user_filter(&self) -> Option<&str> {
        self.user_filter.as_deref()
    }

    /// Forget every loaded page; the user filter stays
    pub fn reset(&mut self) {
        self.state = PagerState::Idle;
        self.items.clear();
        self.current_page = 0;
        self.loaded_page_count = 0;
    }

    /// Fetch `page`. `append` extends the list (a fetch-more); otherwise the
    /// list is replaced. `force` bypasses the duplicate-request checks.
    pub async fn fetch_page(
        &mut self,
        source: &dyn HistorySource,
        page: usize,
        append: bool,
        force: bool,
    ) -> FetchOutcome {
        if self.state == PagerState::Loading {
            return FetchOutcome::Skipped;
        }

        if !append
            && !force
            && !self.items.is_empty()
            && (self.state == PagerState::Exhausted || page == self.current_page)
        {
            return FetchOutcome::Skipped;
        }

        if append {
            if self.loaded_page_count >= self.max_loaded_pages {
                self.state = PagerState::Exhausted;
                return FetchOutcome::CapReached;
            }
            if self.state == PagerState::Exhausted {
                return FetchOutcome::Skipped;
            }
        }

        let query = HistoryQuery {
            skip: page * self.page_size,
            limit: self.page_size,
            user_id: self.user_filter.clone(),
        };
        debug!(page, append, force, skip = query.skip, "fetching history page");

        self.state = PagerState::Loading;
        let response = match source.fetch_history(&query).await {
            Ok(r) => r,
            Err(e) => {
                warn!(page, error = %e, "history fetch failed");
                self.state = PagerState::Exhausted;
                return FetchOutcome::Failed(e.to_string());
            }
        };

        if response.items.is_empty() {
            if !append {
                self.items.clear();
                self.current_page = page;
                self.loaded_page_count = 0;
            }
            self.state = PagerState::Exhausted;
            return FetchOutcome::Loaded(HistoryPage {
                items: Vec::new(),
                has_more: false,
            });
        }

        let loaded_after = if append { self.loaded_page_count + 1 } else { 0 };
        let has_more = response.has_more && loaded_after < self.max_loaded_pages;
        let summaries: Vec<HistorySummary> =
            response.items.into_iter().map(HistorySummary::from).collect();

        if append {
            self.items.extend(summaries.iter().cloned());
        } else {
            self.items = summaries.clone();
        }
        self.current_page = page;
        self.loaded_page_count = loaded_after;
        self.state = if has_more {
            PagerState::Idle
        } else {
            PagerState::Exhausted
        };

        FetchOutcome::Loaded(HistoryPage {
            items: summaries,
            has_more,
        })
    }

    /// First page, as when the history panel opens
    pub async fn open(&mut self, source: &dyn HistorySource) -> FetchOutcome {
        self.fetch_page(source, 0, false, false).await
    }

    /// Next page, appended, if more are allowed
    pub async fn load_more(&mut self, source: &dyn HistorySource) -> FetchOutcome {
        if self.state != PagerState::Idle
            || self.items.is_empty()
            || self.loaded_page_count >= self.max_loaded_pages
        {
            return FetchOutcome::Skipped;
        }
        let next = self.current_page + 1;
        self.fetch_page(source, next, true, false).await
    }

    /// Scope history to one user (`None` for all). A change resets
    /// pagination and reloads from the first page.
    pub async fn set_user_filter(
        &mut self,
        source: &dyn HistorySource,
        user_id: Option<String>,
    ) -> FetchOutcome {
        if user_id == self.user_filter {
            return FetchOutcome::Skipped;
        }
        self.user_filter = user_id;
        self.reset();
        self.fetch_page(source, 0, false, true).await
    }

    pub async fn clear_user_filter(&mut self, source: &dyn HistorySource) -> FetchOutcome {
        self.set_user_filter(source, None).await
    }
}
