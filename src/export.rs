//! Bulk CSV export of every bill in the mailbox.
//!
//! # Pipeline
//!
//! 1. **List.** Walk listing pages with the export query until the source
//!    stops returning a cursor or `max_pages` pages have been read,
//!    collecting message ids. A listing failure aborts the export.
//! 2. **Extract.** Fetch and extract the ids in batches of `batch_size`.
//!    The messages of one batch are fetched concurrently and the whole batch
//!    is awaited before the next starts, so at most `batch_size` requests
//!    are in flight. A message that fails to fetch is logged and dropped.
//! 3. **Filter.** Bills with no recognizable amount are dropped.
//! 4. **Serialize.** Fixed columns, every cell quoted, embedded quotes
//!    doubled.
//!
//! A fixed pacing delay follows every listing call and every batch.
//! Output is all-or-nothing: the CSV is only produced once every step has
//! succeeded.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::time::Duration;

use billcast_core::extract::bill_from_message;
use billcast_core::models::BillRecord;
use billcast_core::source::MessageSource;

use crate::config::{Config, ExportConfig};
use crate::progress::{ExportProgressEvent, ExportProgressReporter, ProgressMode};
use crate::sources::open_source;

pub const CSV_HEADER: [&str; 6] = ["Vendor", "Subject", "From", "Date", "Amount", "Bill Number"];

#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub query: String,
    pub page_size: u32,
    pub max_pages: u32,
    pub batch_size: usize,
    pub pacing: Duration,
}

impl From<&ExportConfig> for ExportSettings {
    fn from(config: &ExportConfig) -> Self {
        Self {
            query: config.query.clone(),
            page_size: config.page_size,
            max_pages: config.max_pages,
            batch_size: config.batch_size,
            pacing: Duration::from_millis(config.pacing_ms),
        }
    }
}

/// One exported bill, in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRow {
    pub vendor: String,
    pub subject: String,
    pub sender: String,
    pub date: String,
    pub amount: String,
    pub bill_number: String,
}

impl ExportRow {
    /// `None` when the bill has no amount.
    fn from_bill(bill: &BillRecord) -> Option<Self> {
        bill.amount?;
        Some(Self {
            vendor: bill.vendor_display().to_string(),
            subject: bill.subject.clone().unwrap_or_default(),
            sender: bill.sender.clone().unwrap_or_default(),
            date: bill.display_date.clone(),
            amount: bill.amount_display().to_string(),
            bill_number: bill.bill_number_display().to_string(),
        })
    }
}

#[derive(Debug, Default)]
pub struct ExportReport {
    pub rows: Vec<ExportRow>,
    pub pages: u32,
    pub listed: usize,
    /// Messages that could not be fetched.
    pub failed: usize,
    /// Messages without an amount.
    pub skipped: usize,
}

enum MessageOutcome {
    Row(ExportRow),
    NoAmount,
    Failed,
}

pub async fn run_bulk_export(
    source: &dyn MessageSource,
    settings: &ExportSettings,
    reporter: &dyn ExportProgressReporter,
) -> Result<ExportReport> {
    let mut report = ExportReport::default();

    // ── list ──
    let mut ids: Vec<String> = Vec::new();
    let mut cursor: Option<String> = None;
    while report.pages < settings.max_pages {
        report.pages += 1;
        let page = source
            .list_messages(&settings.query, settings.page_size, cursor.as_deref())
            .await
            .with_context(|| format!("Failed to list messages (page {})", report.pages))?;

        let found = page.messages.len();
        ids.extend(page.messages.into_iter().map(|m| m.id));
        reporter.report(ExportProgressEvent::Listing {
            page: report.pages,
            found,
            collected: ids.len(),
        });

        cursor = page.next_cursor;
        pace(settings.pacing).await;
        if cursor.is_none() {
            break;
        }
    }
    if cursor.is_some() {
        log::info!(
            "Stopped listing after {} pages; remaining messages are not exported",
            report.pages
        );
    }
    report.listed = ids.len();

    // ── extract ──
    let mut done = 0;
    for batch in ids.chunks(settings.batch_size.max(1)) {
        let outcomes = join_all(batch.iter().map(|id| extract_one(source, id))).await;
        for outcome in outcomes {
            match outcome {
                MessageOutcome::Row(row) => report.rows.push(row),
                MessageOutcome::NoAmount => report.skipped += 1,
                MessageOutcome::Failed => report.failed += 1,
            }
        }
        done += batch.len();
        reporter.report(ExportProgressEvent::Extracting {
            n: done,
            total: report.listed,
        });
        pace(settings.pacing).await;
    }

    reporter.report(ExportProgressEvent::Done {
        rows: report.rows.len(),
        skipped: report.skipped + report.failed,
    });
    Ok(report)
}

async fn extract_one(source: &dyn MessageSource, id: &str) -> MessageOutcome {
    match source.get_message(id).await {
        Ok(message) => match ExportRow::from_bill(&bill_from_message(&message)) {
            Some(row) => MessageOutcome::Row(row),
            None => MessageOutcome::NoAmount,
        },
        Err(e) => {
            log::warn!("Error processing message {}: {:#}", id, e);
            MessageOutcome::Failed
        }
    }
}

async fn pace(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// Serialize rows as CSV: a bare header line, then every cell quoted.
pub fn to_csv(rows: &[ExportRow]) -> Result<Vec<u8>> {
    let mut buf = CSV_HEADER.join(",").into_bytes();
    buf.push(b'\n');

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .quote_style(csv::QuoteStyle::Always)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(buf);

    for row in rows {
        writer.write_record([
            &row.vendor,
            &row.subject,
            &row.sender,
            &row.date,
            &row.amount,
            &row.bill_number,
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush CSV: {}", e.error()))
}

/// `all_bills_YYYY-MM-DD.csv`
pub fn export_filename(date: NaiveDate) -> String {
    format!("all_bills_{}.csv", date.format("%Y-%m-%d"))
}

/// `billcast export`: run the pipeline and write the CSV file.
pub async fn run_export(
    config: &Config,
    output: Option<&Path>,
    progress: ProgressMode,
) -> Result<PathBuf> {
    let source = open_source(config)?;
    let settings = ExportSettings::from(&config.export);
    let reporter = progress.reporter();

    let report = run_bulk_export(source.as_ref(), &settings, reporter.as_ref()).await?;
    let csv = to_csv(&report.rows)?;

    let path = match output {
        Some(p) => p.to_path_buf(),
        None => config
            .export
            .output_dir
            .join(export_filename(chrono::Local::now().date_naive())),
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(&path, &csv)
        .with_context(|| format!("Failed to write export: {}", path.display()))?;

    println!("export");
    println!("  pages listed: {}", report.pages);
    println!("  messages: {}", report.listed);
    println!("  bills written: {}", report.rows.len());
    println!("  without amount: {}", report.skipped);
    println!("  failed: {}", report.failed);
    println!("  file: {}", path.display());
    println!("ok");

    Ok(path)
}
