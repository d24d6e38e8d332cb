//! # billcast core
//!
//! Runtime-free logic shared by the `billcast` binary and its HTTP server:
//! the message and bill data model, MIME body decoding, heuristic bill field
//! extraction, the bill sort engine, month-index arithmetic, and the
//! [`source::MessageSource`] abstraction over a paginated mailbox.
//!
//! This crate contains no tokio, sqlx, reqwest, or filesystem I/O.
//!
//! ## Pipeline
//!
//! ```text
//! RawMessage ──▶ decode::extract_body_text ──▶ extract::extract_fields
//!                                                     │
//!                         BillRecord ◀────────────────┘
//!                              │
//!                              ▼
//!                      sort::SortSession
//! ```

pub mod calendar;
pub mod decode;
pub mod extract;
pub mod models;
pub mod sort;
pub mod source;
