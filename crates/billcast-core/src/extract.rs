//! Heuristic bill field extraction.
//!
//! Fields are pulled out of decoded body text by a declarative table of
//! [`FieldRule`]s. Each rule names the field it fills, a case-insensitive
//! pattern whose first capture group holds the value, and a post-processing
//! step. Rules for the same field are tried in table order and the first
//! rule that yields a value wins; within a rule the leftmost match wins.
//! A field no rule resolves is `None` ("Not found"). Extraction never fails.
//!
//! New sender formats are supported by appending rows to [`FIELD_RULES`].

use std::sync::OnceLock;

use chrono::{DateTime, FixedOffset};
use regex::Regex;

use crate::decode::extract_body_text;
use crate::models::{BillRecord, RawMessage};

/// Display date used when a message has no parseable `Date` header.
pub const NO_DATE: &str = "No date";

/// Bill fields the extractor fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillField {
    Amount,
    BillNumber,
    Vendor,
}

/// One row of the extraction table.
pub struct FieldRule {
    pub field: BillField,
    /// Regex source; capture group 1 is the raw value.
    pub pattern: &'static str,
    /// Turns the raw capture into the stored value; `None` rejects it.
    pub post_process: fn(&str) -> Option<String>,
}

pub static FIELD_RULES: &[FieldRule] = &[
    FieldRule {
        field: BillField::Amount,
        pattern: r"(?i)(?:total(?: amount)?|bill amount|amount paid|amount due|total paid|amount\s*[=:]\s*)[^₹$INR0-9]*[₹$]?\s?(?:Rs\.?|INR)?\s?([0-9][0-9,]*(?:\.[0-9]{2})?)",
        post_process: keep_amount_token,
    },
    FieldRule {
        field: BillField::BillNumber,
        pattern: r"(?i)\b(?:bill no|invoice no|order no|order id|receipt no)\b\.?[\s#:]*([A-Za-z0-9\-]+)",
        post_process: keep_trimmed,
    },
    FieldRule {
        field: BillField::Vendor,
        pattern: r"(?i)\b(?:from|vendor|sold by|merchant|bill for)\b[: \t]*([\w &.,'-]+)",
        post_process: keep_trimmed,
    },
];

fn keep_amount_token(raw: &str) -> Option<String> {
    let trimmed = raw.trim_end_matches(',');
    parse_amount(trimmed).map(|_| trimmed.to_string())
}

fn keep_trimmed(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parse an amount token such as `1,234.50`; thousands separators are
/// stripped. Negative or non-finite values are rejected.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw.chars().filter(|c| *c != ',').collect();
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

fn compiled_rules() -> &'static [(BillField, Regex, fn(&str) -> Option<String>)] {
    static RULES: OnceLock<Vec<(BillField, Regex, fn(&str) -> Option<String>)>> = OnceLock::new();
    RULES.get_or_init(|| {
        FIELD_RULES
            .iter()
            .map(|rule| {
                let re = Regex::new(rule.pattern).expect("invalid bill field pattern");
                (rule.field, re, rule.post_process)
            })
            .collect()
    })
}

/// Fields pulled out of one body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedFields {
    pub amount: Option<f64>,
    pub amount_raw: Option<String>,
    pub bill_number: Option<String>,
    pub vendor: Option<String>,
    /// The caller's pre-formatted date, passed through untouched.
    pub bill_date: String,
}

/// Apply [`FIELD_RULES`] to `body`. Pure; never fails.
pub fn extract_fields(body: &str, display_date: &str) -> ExtractedFields {
    let mut fields = ExtractedFields {
        bill_date: display_date.to_string(),
        ..Default::default()
    };

    for (field, re, post_process) in compiled_rules() {
        let already_set = match field {
            BillField::Amount => fields.amount_raw.is_some(),
            BillField::BillNumber => fields.bill_number.is_some(),
            BillField::Vendor => fields.vendor.is_some(),
        };
        if already_set {
            continue;
        }

        let value = re
            .captures(body)
            .and_then(|caps| caps.get(1))
            .and_then(|m| post_process(m.as_str()));

        match field {
            BillField::Amount => {
                if let Some(raw) = value {
                    fields.amount = parse_amount(&raw);
                    fields.amount_raw = Some(raw);
                }
            }
            BillField::BillNumber => fields.bill_number = value,
            BillField::Vendor => fields.vendor = value,
        }
    }

    fields
}

/// Parse an RFC 2822 `Date` header, tolerating a trailing comment such as
/// `(UTC)`.
pub fn parse_message_date(value: &str) -> Option<DateTime<FixedOffset>> {
    let trimmed = value.trim();
    let without_comment = match trimmed.rfind(" (") {
        Some(pos) if trimmed.ends_with(')') => &trimmed[..pos],
        _ => trimmed,
    };
    DateTime::parse_from_rfc2822(without_comment).ok()
}

/// `Tue, 01 Jul 2025`, in the message's own offset.
pub fn format_display_date(ts: &DateTime<FixedOffset>) -> String {
    ts.format("%a, %d %b %Y").to_string()
}

/// Decode and extract one full message into a [`BillRecord`].
pub fn bill_from_message(message: &RawMessage) -> BillRecord {
    let raw_timestamp = message.header("Date").and_then(parse_message_date);
    let display_date = raw_timestamp
        .as_ref()
        .map(format_display_date)
        .unwrap_or_else(|| NO_DATE.to_string());

    let body = extract_body_text(&message.payload);
    let fields = extract_fields(&body, &display_date);

    BillRecord {
        id: message.id.clone(),
        subject: message.header("Subject").map(str::to_string),
        sender: message.header("From").map(str::to_string),
        display_date: fields.bill_date,
        raw_timestamp,
        amount: fields.amount,
        amount_raw: fields.amount_raw,
        vendor: fields.vendor,
        bill_number: fields.bill_number,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Header, Part, NO_BODY};
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;

    #[test]
    fn test_rupee_total_with_separators() {
        let f = extract_fields("Total: ₹1,234.50", "d");
        assert_eq!(f.amount, Some(1234.50));
        assert_eq!(f.amount_raw.as_deref(), Some("1,234.50"));
    }

    #[test]
    fn test_amount_label_variants() {
        let cases = [
            ("Bill Amount: Rs. 499", 499.0),
            ("Amount paid INR 1,000.00 via UPI", 1000.0),
            ("Amount due $ 75.25", 75.25),
            ("amount=120", 120.0),
            ("Total amount: $3,000", 3000.0),
            ("Total paid: $12.99", 12.99),
        ];
        for (body, expected) in cases {
            let f = extract_fields(body, "d");
            assert_eq!(f.amount, Some(expected), "body: {}", body);
        }
    }

    #[test]
    fn test_amount_keeps_two_decimals_only() {
        let f = extract_fields("Total: $12.345", "d");
        assert_eq!(f.amount_raw.as_deref(), Some("12.34"));
        let f = extract_fields("Total: $12.5", "d");
        assert_eq!(f.amount_raw.as_deref(), Some("12"));
    }

    #[test]
    fn test_no_amount_label() {
        let f = extract_fields("Thanks for shopping with us. See you soon!", "d");
        assert_eq!(f.amount, None);
        assert_eq!(f.amount_raw, None);
    }

    #[test]
    fn test_bill_number_labels() {
        assert_eq!(
            extract_fields("Invoice No: INV-2024-001", "d").bill_number.as_deref(),
            Some("INV-2024-001")
        );
        assert_eq!(
            extract_fields("Order ID: 402-1234567-7654321", "d").bill_number.as_deref(),
            Some("402-1234567-7654321")
        );
        assert_eq!(
            extract_fields("Receipt No #A77", "d").bill_number.as_deref(),
            Some("A77")
        );
        assert_eq!(extract_fields("Pay your bill now", "d").bill_number, None);
    }

    #[test]
    fn test_vendor_is_trimmed_single_line() {
        let f = extract_fields("Sold by: Cloudtail India Pvt. Ltd.\nTotal: ₹10", "d");
        assert_eq!(f.vendor.as_deref(), Some("Cloudtail India Pvt. Ltd."));
        let f = extract_fields("Merchant   Big Basket  \n", "d");
        assert_eq!(f.vendor.as_deref(), Some("Big Basket"));
    }

    #[test]
    fn test_first_match_wins() {
        let f = extract_fields("Total: $10\nTotal: $20", "d");
        assert_eq!(f.amount, Some(10.0));
    }

    #[test]
    fn test_sentinel_resolves_nothing() {
        let f = extract_fields(NO_BODY, "Mon, 01 Jan 2024");
        assert_eq!(f.amount, None);
        assert_eq!(f.amount_raw, None);
        assert_eq!(f.vendor, None);
        assert_eq!(f.bill_number, None);
        assert_eq!(f.bill_date, "Mon, 01 Jan 2024");
    }

    #[test]
    fn test_parse_message_date() {
        let ts = parse_message_date("Tue, 1 Jul 2025 10:52:37 +0530 (IST)").unwrap();
        assert_eq!(format_display_date(&ts), "Tue, 01 Jul 2025");
        assert!(parse_message_date("yesterday").is_none());
    }

    #[test]
    fn test_bill_from_message() {
        let body = URL_SAFE_NO_PAD.encode("Bill for: Airtel\nBill No: AB-99\nAmount due: ₹2,450.00");
        let mut payload = Part::multipart(
            "multipart/alternative",
            vec![Part::leaf("text/plain", &body)],
        );
        payload.headers = vec![
            Header {
                name: "Subject".to_string(),
                value: "Your Airtel bill".to_string(),
            },
            Header {
                name: "From".to_string(),
                value: "Airtel <ebill@airtel.com>".to_string(),
            },
            Header {
                name: "Date".to_string(),
                value: "Wed, 05 Mar 2025 09:00:00 +0000".to_string(),
            },
        ];
        let bill = bill_from_message(&RawMessage {
            id: "m-1".to_string(),
            payload,
        });

        assert_eq!(bill.id, "m-1");
        assert_eq!(bill.subject.as_deref(), Some("Your Airtel bill"));
        assert_eq!(bill.display_date, "Wed, 05 Mar 2025");
        assert_eq!(bill.amount, Some(2450.0));
        assert_eq!(bill.vendor.as_deref(), Some("Airtel"));
        assert_eq!(bill.bill_number.as_deref(), Some("AB-99"));
    }

    #[test]
    fn test_message_without_headers() {
        let bill = bill_from_message(&RawMessage {
            id: "m-2".to_string(),
            payload: Part::default(),
        });
        assert_eq!(bill.display_date, NO_DATE);
        assert!(bill.raw_timestamp.is_none());
        assert!(bill.subject.is_none());
        assert!(bill.amount.is_none());
    }
}
