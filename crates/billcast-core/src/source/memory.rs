//! In-memory [`MessageSource`] for tests and offline fixtures.
//!
//! Messages are served in insertion order. The cursor is the decimal offset
//! of the next page. Listing failures and per-message failures can be
//! injected, and every call is counted.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use crate::models::{ListPage, MessageRef, RawMessage};

use super::MessageSource;

/// In-memory mailbox.
pub struct InMemorySource {
    messages: RwLock<Vec<RawMessage>>,
    failing_ids: RwLock<HashSet<String>>,
    fail_listing: AtomicBool,
    list_calls: AtomicUsize,
    get_calls: AtomicUsize,
}

impl InMemorySource {
    pub fn new(messages: Vec<RawMessage>) -> Self {
        Self {
            messages: RwLock::new(messages),
            failing_ids: RwLock::new(HashSet::new()),
            fail_listing: AtomicBool::new(false),
            list_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, message: RawMessage) {
        self.messages.write().unwrap().push(message);
    }

    /// Make every `get_message(id)` for this id fail.
    pub fn fail_message(&self, id: &str) {
        self.failing_ids.write().unwrap().insert(id.to_string());
    }

    /// Make every listing call fail (or succeed again).
    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.messages.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemorySource {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl MessageSource for InMemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_messages(
        &self,
        _query: &str,
        page_size: u32,
        cursor: Option<&str>,
    ) -> Result<ListPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing.load(Ordering::SeqCst) {
            bail!("listing unavailable");
        }

        let offset = match cursor {
            Some(c) => c
                .parse::<usize>()
                .with_context(|| format!("invalid cursor: {}", c))?,
            None => 0,
        };

        let messages = self.messages.read().unwrap();
        let end = (offset + page_size.max(1) as usize).min(messages.len());
        let page: Vec<MessageRef> = messages
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|m| MessageRef { id: m.id.clone() })
            .collect();

        Ok(ListPage {
            messages: page,
            next_cursor: (end < messages.len()).then(|| end.to_string()),
            result_size_estimate: messages.len() as u64,
        })
    }

    async fn get_message(&self, id: &str) -> Result<RawMessage> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_ids.read().unwrap().contains(id) {
            bail!("message {} unavailable", id);
        }
        self.messages
            .read()
            .unwrap()
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .with_context(|| format!("message not found: {}", id))
    }
}
