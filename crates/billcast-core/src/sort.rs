//! Bill listing sort engine.
//!
//! # Rules
//!
//! 1. Only [`BillRow::Bill`] rows are ordered; notice and error rows are
//!    appended afterwards in their original relative order.
//! 2. A bill whose compared field is missing always sorts after every bill
//!    with a value, in both directions. Direction only reorders the
//!    concrete values among themselves.
//! 3. Amounts compare numerically, dates by the parsed timestamp, every
//!    other key lexicographically on the raw string.
//! 4. The sort is stable: ties keep their original relative order.
//!
//! [`SortSession`] adds toggle semantics on top of [`sort_rows`]: sorting
//! without an explicit direction flips the session's last direction and
//! records the new [`SortSpec`].

use std::cmp::Ordering;

use crate::models::{BillRecord, BillRow, SortDirection, SortKey, SortSpec};

/// Order `rows` by `key` in `direction`. See the module docs for the rules.
pub fn sort_rows(rows: &[BillRow], key: SortKey, direction: SortDirection) -> Vec<BillRow> {
    let (mut sortable, trailing): (Vec<&BillRow>, Vec<&BillRow>) =
        rows.iter().partition(|r| r.is_sortable());

    sortable.sort_by(|a, b| match (a.as_bill(), b.as_bill()) {
        (Some(a), Some(b)) => compare_bills(a, b, key, direction),
        _ => Ordering::Equal,
    });

    sortable.into_iter().chain(trailing).cloned().collect()
}

fn compare_bills(a: &BillRecord, b: &BillRecord, key: SortKey, direction: SortDirection) -> Ordering {
    let ordering = match key {
        SortKey::Amount => missing_last(a.amount, b.amount, |x, y| x.total_cmp(y)),
        SortKey::Date => missing_last(a.raw_timestamp, b.raw_timestamp, |x, y| x.cmp(y)),
        SortKey::Vendor => missing_last(a.vendor.as_ref(), b.vendor.as_ref(), |x, y| x.cmp(y)),
        SortKey::Subject => missing_last(a.subject.as_ref(), b.subject.as_ref(), |x, y| x.cmp(y)),
        SortKey::Sender => missing_last(a.sender.as_ref(), b.sender.as_ref(), |x, y| x.cmp(y)),
        SortKey::BillNumber => {
            missing_last(a.bill_number.as_ref(), b.bill_number.as_ref(), |x, y| x.cmp(y))
        }
    };

    match ordering {
        Compared::Values(ord) => match direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        },
        Compared::Missing(ord) => ord,
    }
}

/// Result of comparing two optional values: either both were present
/// (direction applies) or at least one was missing (direction ignored).
enum Compared {
    Values(Ordering),
    Missing(Ordering),
}

fn missing_last<T>(a: Option<T>, b: Option<T>, cmp: impl Fn(&T, &T) -> Ordering) -> Compared {
    match (a, b) {
        (Some(x), Some(y)) => Compared::Values(cmp(&x, &y)),
        (Some(_), None) => Compared::Missing(Ordering::Less),
        (None, Some(_)) => Compared::Missing(Ordering::Greater),
        (None, None) => Compared::Missing(Ordering::Equal),
    }
}

/// Per-crawl sort state.
#[derive(Debug, Clone, Default)]
pub struct SortSession {
    spec: SortSpec,
}

impl SortSession {
    pub fn new(spec: SortSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> SortSpec {
        self.spec
    }

    /// Sort `rows` by `key`.
    ///
    /// With `direction = None` the direction is the negation of the
    /// session's current direction and the session records
    /// `{key, new direction}`. An explicit direction leaves the session
    /// untouched.
    pub fn sort(
        &mut self,
        rows: &[BillRow],
        key: SortKey,
        direction: Option<SortDirection>,
    ) -> Vec<BillRow> {
        match direction {
            Some(d) => sort_rows(rows, key, d),
            None => {
                let toggled = self.spec.direction.toggled();
                self.spec = SortSpec {
                    key,
                    direction: toggled,
                };
                sort_rows(rows, key, toggled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn bill(id: &str, amount: Option<f64>, vendor: Option<&str>, date: Option<&str>) -> BillRow {
        BillRow::Bill(BillRecord {
            id: id.to_string(),
            subject: Some(format!("subject {}", id)),
            sender: None,
            display_date: String::new(),
            raw_timestamp: date.map(|d| DateTime::parse_from_rfc3339(d).unwrap()),
            amount,
            amount_raw: amount.map(|a| a.to_string()),
            vendor: vendor.map(str::to_string),
            bill_number: None,
        })
    }

    fn ids(rows: &[BillRow]) -> Vec<String> {
        rows.iter()
            .map(|r| match r {
                BillRow::Bill(b) => b.id.clone(),
                BillRow::Notice { message } => format!("notice:{}", message),
                BillRow::Error { error } => format!("error:{}", error),
            })
            .collect()
    }

    fn mixed() -> Vec<BillRow> {
        vec![
            bill("a", None, Some("Zomato"), Some("2025-01-03T00:00:00Z")),
            bill("b", Some(50.0), None, Some("2025-01-01T00:00:00Z")),
            bill("c", Some(10.0), Some("Amazon"), None),
            bill("d", None, Some("Myntra"), Some("2025-01-02T00:00:00Z")),
            bill("e", Some(30.0), Some("Swiggy"), Some("2025-01-05T00:00:00Z")),
        ]
    }

    #[test]
    fn test_amount_ascending_missing_last() {
        let sorted = sort_rows(&mixed(), SortKey::Amount, SortDirection::Asc);
        assert_eq!(ids(&sorted), vec!["c", "e", "b", "a", "d"]);
    }

    #[test]
    fn test_amount_descending_missing_still_last() {
        let sorted = sort_rows(&mixed(), SortKey::Amount, SortDirection::Desc);
        assert_eq!(ids(&sorted), vec!["b", "e", "c", "a", "d"]);
    }

    #[test]
    fn test_date_uses_timestamp() {
        let sorted = sort_rows(&mixed(), SortKey::Date, SortDirection::Desc);
        assert_eq!(ids(&sorted), vec!["e", "a", "d", "b", "c"]);
    }

    #[test]
    fn test_vendor_lexicographic() {
        let sorted = sort_rows(&mixed(), SortKey::Vendor, SortDirection::Asc);
        assert_eq!(ids(&sorted), vec!["c", "d", "e", "a", "b"]);
    }

    #[test]
    fn test_stable_for_ties() {
        let rows = vec![
            bill("x", Some(5.0), None, None),
            bill("y", Some(1.0), None, None),
            bill("z", Some(5.0), None, None),
        ];
        let asc = sort_rows(&rows, SortKey::Amount, SortDirection::Asc);
        assert_eq!(ids(&asc), vec!["y", "x", "z"]);
        let desc = sort_rows(&rows, SortKey::Amount, SortDirection::Desc);
        assert_eq!(ids(&desc), vec!["x", "z", "y"]);
    }

    #[test]
    fn test_placeholders_trail_in_order() {
        let mut rows = vec![BillRow::Notice {
            message: "n1".to_string(),
        }];
        rows.extend(mixed());
        rows.insert(
            3,
            BillRow::Error {
                error: "e1".to_string(),
            },
        );
        let sorted = sort_rows(&rows, SortKey::Amount, SortDirection::Asc);
        let order = ids(&sorted);
        assert_eq!(&order[5..], &["notice:n1", "error:e1"]);
    }

    #[test]
    fn test_session_toggle_twice_restores_order() {
        let mut session = SortSession::default();
        let original = sort_rows(&mixed(), SortKey::Date, SortDirection::Desc);

        let once = session.sort(&original, SortKey::Date, None);
        assert_eq!(session.spec().direction, SortDirection::Asc);
        assert_ne!(ids(&once), ids(&original));

        let twice = session.sort(&once, SortKey::Date, None);
        assert_eq!(session.spec().direction, SortDirection::Desc);
        assert_eq!(ids(&twice), ids(&original));
    }

    #[test]
    fn test_explicit_direction_leaves_session() {
        let mut session = SortSession::default();
        session.sort(&mixed(), SortKey::Amount, Some(SortDirection::Asc));
        assert_eq!(session.spec(), SortSpec::default());
    }

    #[test]
    fn test_toggle_switches_key() {
        let mut session = SortSession::default();
        let sorted = session.sort(&mixed(), SortKey::Amount, None);
        assert_eq!(
            session.spec(),
            SortSpec {
                key: SortKey::Amount,
                direction: SortDirection::Asc
            }
        );
        assert_eq!(ids(&sorted), vec!["c", "e", "b", "a", "d"]);
    }
}
