//! Core data models used throughout billcast.
//!
//! Messages arrive from a [`MessageSource`](crate::source::MessageSource) as
//! a tree of [`Part`]s, are turned into [`BillRecord`]s by the extractor, and
//! are shown to callers as [`BillRow`]s. The forecast side works with
//! [`Transaction`], [`WarehouseRow`], [`SyncWatermark`] and [`PredictionRow`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// Display value for any field the extractor could not resolve.
pub const NOT_FOUND: &str = "Not found";

/// Body text returned when a message has no decodable text part.
pub const NO_BODY: &str = "[No body found]";

/// Notice row shown when a listing page has no messages.
pub const EMPTY_PAGE_NOTICE: &str = "No bill-related emails found.";

/// Error row shown when a listing page could not be fetched.
pub const FETCH_FAILED_NOTICE: &str = "Failed to fetch bills. Please try again.";

// ═══════════════════════════════════════════════════════════════════════
// Messages
// ═══════════════════════════════════════════════════════════════════════

/// A single message header (`Subject`, `From`, `Date`, …).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Inline content of a [`Part`]. `data` is URL-safe base64.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartBody {
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub size: u64,
}

/// One node of a message's MIME tree.
///
/// Field names follow the Gmail `users.messages.get?format=full` payload so a
/// response can be deserialized directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Part {
    /// A leaf part carrying already-encoded inline data.
    pub fn leaf(mime_type: &str, data: &str) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            headers: Vec::new(),
            body: Some(PartBody {
                data: Some(data.to_string()),
                size: data.len() as u64,
            }),
            parts: Vec::new(),
        }
    }

    /// A container part (e.g. `multipart/alternative`) with children.
    pub fn multipart(mime_type: &str, parts: Vec<Part>) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            headers: Vec::new(),
            body: None,
            parts,
        }
    }

    /// Inline encoded data, if present and non-empty.
    pub fn inline_data(&self) -> Option<&str> {
        self.body
            .as_ref()
            .and_then(|b| b.data.as_deref())
            .filter(|d| !d.is_empty())
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

/// A message fetched in full from the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: String,
    #[serde(default)]
    pub payload: Part,
}

impl RawMessage {
    /// Header lookup on the top-level payload.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.payload.header(name)
    }
}

/// Message handle as returned by a listing call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRef {
    pub id: String,
}

/// One page of a listing call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPage {
    pub messages: Vec<MessageRef>,
    /// Opaque token for the following page; `None` on the last page.
    pub next_cursor: Option<String>,
    pub result_size_estimate: u64,
}

// ═══════════════════════════════════════════════════════════════════════
// Bills
// ═══════════════════════════════════════════════════════════════════════

/// Structured bill extracted from exactly one message.
///
/// Every `Option` field is `None` when the extractor found nothing; it
/// serializes as `"Not found"`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillRecord {
    pub id: String,
    #[serde(serialize_with = "or_not_found")]
    pub subject: Option<String>,
    #[serde(serialize_with = "or_not_found")]
    pub sender: Option<String>,
    pub display_date: String,
    pub raw_timestamp: Option<DateTime<FixedOffset>>,
    #[serde(serialize_with = "or_not_found")]
    pub amount: Option<f64>,
    #[serde(serialize_with = "or_not_found")]
    pub amount_raw: Option<String>,
    #[serde(serialize_with = "or_not_found")]
    pub vendor: Option<String>,
    #[serde(serialize_with = "or_not_found")]
    pub bill_number: Option<String>,
}

impl BillRecord {
    /// Raw amount text as shown to users.
    pub fn amount_display(&self) -> &str {
        self.amount_raw.as_deref().unwrap_or(NOT_FOUND)
    }

    pub fn vendor_display(&self) -> &str {
        self.vendor.as_deref().unwrap_or(NOT_FOUND)
    }

    pub fn bill_number_display(&self) -> &str {
        self.bill_number.as_deref().unwrap_or(NOT_FOUND)
    }
}

fn or_not_found<T, S>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
where
    T: Serialize,
    S: Serializer,
{
    match value {
        Some(v) => v.serialize(serializer),
        None => serializer.serialize_str(NOT_FOUND),
    }
}

/// A row of the interactive bill listing.
///
/// Notice and error rows are placeholders: the sort engine never orders
/// them and always keeps them after the bills.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BillRow {
    Bill(BillRecord),
    Notice { message: String },
    Error { error: String },
}

impl BillRow {
    pub fn is_sortable(&self) -> bool {
        matches!(self, BillRow::Bill(_))
    }

    pub fn as_bill(&self) -> Option<&BillRecord> {
        match self {
            BillRow::Bill(b) => Some(b),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Pagination and sorting
// ═══════════════════════════════════════════════════════════════════════

/// Cursor state of an interactive crawl.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageCursor {
    /// Token for the next page; `None` means there are no further pages.
    pub cursor_token: Option<String>,
    pub page_number: u32,
    pub total_estimate: u64,
    pub page_size: u32,
}

impl PageCursor {
    pub fn new(page_size: u32) -> Self {
        Self {
            cursor_token: None,
            page_number: 0,
            total_estimate: 0,
            page_size,
        }
    }

    pub fn has_next(&self) -> bool {
        self.cursor_token.is_some()
    }

    pub fn has_previous(&self) -> bool {
        self.page_number > 1
    }

    /// 1-based inclusive range of results on the current page, as
    /// `(first, last)`. `(0, 0)` before the first fetch or when the
    /// listing is empty.
    pub fn showing_range(&self) -> (u64, u64) {
        if self.page_number == 0 || self.total_estimate == 0 {
            return (0, 0);
        }
        let size = self.page_size as u64;
        let page = self.page_number as u64;
        let first = (page - 1) * size + 1;
        let last = (page * size).min(self.total_estimate);
        (first, last)
    }
}

/// Field a bill listing can be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Date,
    Amount,
    Vendor,
    Subject,
    Sender,
    BillNumber,
}

impl FromStr for SortKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "date" | "rawdate" => Ok(SortKey::Date),
            "amount" | "amountvalue" => Ok(SortKey::Amount),
            "vendor" => Ok(SortKey::Vendor),
            "subject" => Ok(SortKey::Subject),
            "sender" | "from" => Ok(SortKey::Sender),
            "bill_number" | "billnumber" => Ok(SortKey::BillNumber),
            other => anyhow::bail!(
                "Unknown sort key: '{}'. Must be date, amount, vendor, subject, sender, or bill_number.",
                other
            ),
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SortKey::Date => "date",
            SortKey::Amount => "amount",
            SortKey::Vendor => "vendor",
            SortKey::Subject => "subject",
            SortKey::Sender => "sender",
            SortKey::BillNumber => "bill_number",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn toggled(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

impl FromStr for SortDirection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => anyhow::bail!("Unknown sort direction: '{}'. Must be asc or desc.", other),
        }
    }
}

/// Active ordering of a crawl session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SortSpec {
    pub key: SortKey,
    pub direction: SortDirection,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            key: SortKey::Date,
            direction: SortDirection::Desc,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Ledger, warehouse, forecast
// ═══════════════════════════════════════════════════════════════════════

/// A transaction as held by the source-of-record ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    /// Ledger row id; `None` until the transaction is stored.
    pub id: Option<i64>,
    pub entity: String,
    /// Transaction type label, e.g. `EXPENSE` or `INCOME`.
    pub kind: String,
    /// Decimal amount exactly as stored by the ledger.
    pub amount: String,
    pub category: String,
    pub date: DateTime<Utc>,
    pub description: Option<String>,
}

/// A row of the append-only warehouse `expenses` table.
///
/// `date` is the calendar day used for aggregation. `ledger_ts` and
/// `ledger_id` record where in the ledger the row came from and make up
/// the [`SyncWatermark`].
#[derive(Debug, Clone, PartialEq)]
pub struct WarehouseRow {
    pub entity: String,
    pub kind: String,
    pub amount: f64,
    pub category: String,
    pub date: NaiveDate,
    pub description: String,
    pub ledger_ts: DateTime<Utc>,
    pub ledger_id: i64,
}

/// Latest ledger position already present in the warehouse for an entity.
///
/// Ledger rows are ordered by `(date, id)`; a sync pulls the rows strictly
/// after this position, including rows that share its timestamp but were
/// stored later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncWatermark {
    pub date: DateTime<Utc>,
    pub id: i64,
}

/// A predicted value for one category and month.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionRow {
    pub category: String,
    /// `year * 12 + month`, month 1-based.
    pub month_index: i64,
    pub predicted_value: f64,
}

/// A historical expense point returned next to the predictions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionPoint {
    pub date: NaiveDate,
    pub amount: f64,
}

/// Response of the forecast entry point.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ForecastReport {
    pub predictions: Vec<PredictionRow>,
    pub transactions: Vec<TransactionPoint>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_showing_range() {
        let mut cursor = PageCursor::new(20);
        assert_eq!(cursor.showing_range(), (0, 0));
        cursor.page_number = 2;
        cursor.total_estimate = 31;
        assert_eq!(cursor.showing_range(), (21, 31));
        cursor.total_estimate = 500;
        assert_eq!(cursor.showing_range(), (21, 40));
    }

    #[test]
    fn test_navigation_flags() {
        let mut cursor = PageCursor::new(20);
        assert!(!cursor.has_next());
        assert!(!cursor.has_previous());
        cursor.cursor_token = Some("t".to_string());
        cursor.page_number = 2;
        assert!(cursor.has_next());
        assert!(cursor.has_previous());
    }

    #[test]
    fn test_not_found_serialization() {
        let bill = BillRecord {
            id: "m1".to_string(),
            subject: Some("Your bill".to_string()),
            sender: None,
            display_date: "No date".to_string(),
            raw_timestamp: None,
            amount: None,
            amount_raw: None,
            vendor: Some("Zomato".to_string()),
            bill_number: None,
        };
        let json = serde_json::to_value(BillRow::Bill(bill)).unwrap();
        assert_eq!(json["amount"], "Not found");
        assert_eq!(json["billNumber"], "Not found");
        assert_eq!(json["vendor"], "Zomato");
        assert_eq!(json["sender"], "Not found");
    }

    #[test]
    fn test_placeholder_rows_serialize_flat() {
        let json = serde_json::to_value(BillRow::Error {
            error: FETCH_FAILED_NOTICE.to_string(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({ "error": FETCH_FAILED_NOTICE }));
    }

    #[test]
    fn test_sort_key_parse() {
        assert_eq!("amount".parse::<SortKey>().unwrap(), SortKey::Amount);
        assert_eq!("rawDate".parse::<SortKey>().unwrap(), SortKey::Date);
        assert!("weight".parse::<SortKey>().is_err());
    }
}
