//! Message source abstraction.
//!
//! The [`MessageSource`] trait is the seam between billcast and a mailbox:
//! a cursor-paginated listing keyed by a search query, and a per-message
//! "get full content" call. The listing is forward-only; there is no
//! backward cursor.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ListPage, RawMessage};

/// A paginated mailbox.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`list_messages`](MessageSource::list_messages) | One page of message ids matching a query |
/// | [`get_message`](MessageSource::get_message) | Full MIME tree and headers of one message |
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Short label used in logs (e.g. `"gmail"`).
    fn name(&self) -> &str;

    /// List one page of messages matching `query`.
    ///
    /// `cursor` is the `next_cursor` of the previous page, or `None` for the
    /// first page.
    async fn list_messages(
        &self,
        query: &str,
        page_size: u32,
        cursor: Option<&str>,
    ) -> Result<ListPage>;

    /// Fetch one message in full.
    async fn get_message(&self, id: &str) -> Result<RawMessage>;
}
