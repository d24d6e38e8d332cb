//! Interactive, page-at-a-time crawl over a message source.
//!
//! # State machine
//!
//! ```text
//!            fetch_page             ok
//!   Idle ──────────────▶ Fetching ─────▶ Ready ──┐
//!                           │                ▲    │ fetch_page
//!                           │ err            │    │
//!                           ▼                └────┘
//!                         Error ──── fetch_page ───▶ Fetching
//! ```
//!
//! # Pagination
//!
//! The source only hands out forward cursors. [`PageDirection::Next`] uses
//! the held cursor token. [`PageDirection::Previous`] has no backward token
//! to use, so it re-fetches the first page and decrements the page number
//! (never below 1). The rows shown after "previous" are therefore always the
//! first page's rows; callers that need true backward paging must cache
//! pages themselves.
//!
//! "Next" is refused when there is no cursor token and "previous" when the
//! page number is at most 1. A refused navigation issues no request.
//! `fetch_page` takes `&mut self`, so overlapping navigation on one
//! controller cannot happen; shared owners serialize through a lock.
//!
//! # Failure
//!
//! A failed listing call, or a failed `get_message` for any id on the page,
//! moves the controller to [`CrawlState::Error`] with a single error row.
//! The [`PageCursor`] is left exactly as it was.

use anyhow::{Error, Result};
use futures::future::try_join_all;
use serde::Serialize;
use std::sync::Arc;

use billcast_core::extract::bill_from_message;
use billcast_core::models::{
    BillRow, PageCursor, SortDirection, SortKey, SortSpec, EMPTY_PAGE_NOTICE, FETCH_FAILED_NOTICE,
};
use billcast_core::sort::{sort_rows, SortSession};
use billcast_core::source::MessageSource;

use crate::config::Config;
use crate::sources::open_source;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlState {
    Idle,
    Fetching,
    Ready,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageDirection {
    /// Restart from the first page.
    First,
    Next,
    Previous,
}

impl std::str::FromStr for PageDirection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "first" => Ok(PageDirection::First),
            "next" => Ok(PageDirection::Next),
            "previous" | "prev" => Ok(PageDirection::Previous),
            other => anyhow::bail!(
                "Unknown page direction: '{}'. Must be first, next, or previous.",
                other
            ),
        }
    }
}

/// Result of one [`CrawlController::fetch_page`] call.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The page was fetched and the cursor advanced.
    Loaded,
    /// Navigation not allowed in the current state; nothing was requested.
    Refused,
    /// The fetch failed; the controller holds a single error row.
    Failed(Error),
}

/// Serializable snapshot of a controller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlView {
    pub state: CrawlState,
    pub rows: Vec<BillRow>,
    pub page_number: u32,
    pub total_estimate: u64,
    pub showing_from: u64,
    pub showing_to: u64,
    pub has_next: bool,
    pub has_previous: bool,
    pub sort: SortSpec,
}

pub struct CrawlController {
    source: Arc<dyn MessageSource>,
    query: String,
    cursor: PageCursor,
    state: CrawlState,
    rows: Vec<BillRow>,
    session: SortSession,
}

impl CrawlController {
    pub fn new(source: Arc<dyn MessageSource>, query: impl Into<String>, page_size: u32) -> Self {
        Self {
            source,
            query: query.into(),
            cursor: PageCursor::new(page_size),
            state: CrawlState::Idle,
            rows: Vec::new(),
            session: SortSession::default(),
        }
    }

    pub fn state(&self) -> CrawlState {
        self.state
    }

    pub fn cursor(&self) -> &PageCursor {
        &self.cursor
    }

    pub fn rows(&self) -> &[BillRow] {
        &self.rows
    }

    pub fn sort_spec(&self) -> SortSpec {
        self.session.spec()
    }

    /// Fetch a page in `direction`. See the module docs for the rules.
    pub async fn fetch_page(&mut self, direction: PageDirection) -> FetchOutcome {
        let token = match direction {
            PageDirection::Next if !self.cursor.has_next() => return FetchOutcome::Refused,
            PageDirection::Previous if !self.cursor.has_previous() => {
                return FetchOutcome::Refused
            }
            PageDirection::Next => self.cursor.cursor_token.clone(),
            PageDirection::First | PageDirection::Previous => None,
        };

        self.state = CrawlState::Fetching;
        match self.load(token.as_deref()).await {
            Ok((rows, next_cursor, total_estimate)) => {
                self.rows = rows;
                self.session = SortSession::default();
                self.cursor.cursor_token = next_cursor;
                self.cursor.total_estimate = total_estimate;
                self.cursor.page_number = match direction {
                    PageDirection::First => 1,
                    PageDirection::Next => self.cursor.page_number + 1,
                    PageDirection::Previous => self.cursor.page_number.saturating_sub(1).max(1),
                };
                self.state = CrawlState::Ready;
                FetchOutcome::Loaded
            }
            Err(e) => {
                log::warn!("Failed to fetch bills from {}: {:#}", self.source.name(), e);
                self.rows = vec![BillRow::Error {
                    error: FETCH_FAILED_NOTICE.to_string(),
                }];
                self.state = CrawlState::Error;
                FetchOutcome::Failed(e)
            }
        }
    }

    async fn load(&self, token: Option<&str>) -> Result<(Vec<BillRow>, Option<String>, u64)> {
        let page = self
            .source
            .list_messages(&self.query, self.cursor.page_size, token)
            .await?;

        let messages = try_join_all(
            page.messages
                .iter()
                .map(|m| self.source.get_message(&m.id)),
        )
        .await?;

        let rows: Vec<BillRow> = if messages.is_empty() {
            vec![BillRow::Notice {
                message: EMPTY_PAGE_NOTICE.to_string(),
            }]
        } else {
            let bills: Vec<BillRow> = messages
                .iter()
                .map(|m| BillRow::Bill(bill_from_message(m)))
                .collect();
            let default = SortSpec::default();
            sort_rows(&bills, default.key, default.direction)
        };

        Ok((rows, page.next_cursor, page.result_size_estimate))
    }

    /// Re-order the held page by `key`. With `direction = None` the session
    /// direction toggles. Never refetches.
    pub fn sort_by(&mut self, key: SortKey, direction: Option<SortDirection>) -> &[BillRow] {
        self.rows = self.session.sort(&self.rows, key, direction);
        &self.rows
    }

    pub fn view(&self) -> CrawlView {
        let (showing_from, showing_to) = self.cursor.showing_range();
        CrawlView {
            state: self.state,
            rows: self.rows.clone(),
            page_number: self.cursor.page_number,
            total_estimate: self.cursor.total_estimate,
            showing_from,
            showing_to,
            has_next: self.cursor.has_next(),
            has_previous: self.cursor.has_previous(),
            sort: self.session.spec(),
        }
    }
}

/// `billcast bills`: walk up to `pages` pages and print each as a table.
pub async fn run_bills(
    config: &Config,
    pages: u32,
    sort: Option<SortKey>,
    direction: Option<SortDirection>,
) -> Result<()> {
    let source = open_source(config)?;
    let mut controller = CrawlController::new(
        source,
        config.source.listing_query.clone(),
        config.source.page_size,
    );

    let mut direction_to_fetch = PageDirection::First;
    for _ in 0..pages.max(1) {
        match controller.fetch_page(direction_to_fetch).await {
            FetchOutcome::Loaded => {}
            FetchOutcome::Refused => break,
            FetchOutcome::Failed(e) => {
                print_rows(controller.rows());
                return Err(e.context(FETCH_FAILED_NOTICE));
            }
        }
        if let Some(key) = sort {
            controller.sort_by(key, direction);
        }

        let view = controller.view();
        println!(
            "page {}  showing {}-{} of {}",
            view.page_number, view.showing_from, view.showing_to, view.total_estimate
        );
        print_rows(&view.rows);
        println!();

        direction_to_fetch = PageDirection::Next;
    }

    Ok(())
}

fn print_rows(rows: &[BillRow]) {
    for row in rows {
        match row {
            BillRow::Bill(bill) => println!(
                "  {:<17} {:<28} {:>12}  {:<20} {}",
                bill.display_date,
                truncate(bill.vendor_display(), 28),
                bill.amount_display(),
                truncate(bill.bill_number_display(), 20),
                bill.subject.as_deref().unwrap_or(billcast_core::models::NOT_FOUND),
            ),
            BillRow::Notice { message } => println!("  {}", message),
            BillRow::Error { error } => println!("  error: {}", error),
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", head)
    }
}
