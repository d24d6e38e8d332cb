//! Message body decoding.
//!
//! Locates the textual payload of a possibly multi-part message and decodes
//! it from the URL-safe base64 variant used by the Gmail API.
//!
//! # Algorithm
//!
//! 1. If the top-level part carries inline data, decode that.
//! 2. Otherwise walk the child parts depth-first (pre-order) looking for a
//!    `text/plain` part with data.
//! 3. If there is none anywhere in the tree, take the first `text/html` part.
//! 4. If nothing decodable exists, return [`NO_BODY`].
//!
//! The walk uses an explicit stack bounded at [`MAX_PART_DEPTH`] levels, so
//! pathologically nested input cannot exhaust the call stack. Decoding never
//! fails: every miss collapses to the [`NO_BODY`] sentinel, which carries no
//! extractable labels.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;

use crate::models::{Part, NO_BODY};

/// Deepest nesting level inspected below the top-level part.
pub const MAX_PART_DEPTH: usize = 32;

/// Standard-alphabet decoder that accepts missing or present padding.
const LENIENT_STANDARD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Return the best-effort plain text of a message payload.
///
/// # Example
///
/// ```rust
/// use billcast_core::decode::extract_body_text;
/// use billcast_core::models::Part;
///
/// // "Total: $5" in URL-safe base64
/// let payload = Part::multipart(
///     "multipart/alternative",
///     vec![Part::leaf("text/plain", "VG90YWw6ICQ1")],
/// );
/// assert_eq!(extract_body_text(&payload), "Total: $5");
/// ```
pub fn extract_body_text(payload: &Part) -> String {
    let data = payload
        .inline_data()
        .or_else(|| find_part_data(payload, "text/plain"))
        .or_else(|| find_part_data(payload, "text/html"));

    match data.and_then(decode_url_safe) {
        Some(text) => text,
        None => NO_BODY.to_string(),
    }
}

/// Decode URL-safe base64 (`-`/`_`) by mapping it onto the standard
/// alphabet. Whitespace is ignored. Returns `None` on malformed input.
pub fn decode_url_safe(data: &str) -> Option<String> {
    let standard: String = data
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();

    match LENIENT_STANDARD.decode(standard.as_bytes()) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            log::debug!("Discarding undecodable body part: {}", e);
            None
        }
    }
}

/// First descendant of `root` (excluding `root` itself) whose MIME type is
/// `mime_type` and which carries inline data, in depth-first pre-order.
fn find_part_data<'a>(root: &'a Part, mime_type: &str) -> Option<&'a str> {
    let mut stack: Vec<(&'a Part, usize)> = root.parts.iter().rev().map(|p| (p, 1)).collect();

    while let Some((part, depth)) = stack.pop() {
        if part.mime_type.eq_ignore_ascii_case(mime_type) {
            if let Some(data) = part.inline_data() {
                return Some(data);
            }
        }

        if part.parts.is_empty() {
            continue;
        }
        if depth >= MAX_PART_DEPTH {
            log::debug!(
                "Skipping {} nested parts below depth {}",
                part.parts.len(),
                MAX_PART_DEPTH
            );
            continue;
        }
        stack.extend(part.parts.iter().rev().map(|p| (p, depth + 1)));
    }

    None
}
