//! Month-index arithmetic.
//!
//! A month index is `year * 12 + month` with a 1-based month. It is
//! monotonic across year boundaries, so consecutive months differ by one.

use std::ops::RangeInclusive;

use chrono::{Datelike, NaiveDate};

pub fn month_index(date: NaiveDate) -> i64 {
    date.year() as i64 * 12 + date.month() as i64
}

/// Inverse of [`month_index`]: `(year, month)`.
pub fn year_month(index: i64) -> (i32, u32) {
    let zero_based = index - 1;
    (
        zero_based.div_euclid(12) as i32,
        (zero_based.rem_euclid(12) + 1) as u32,
    )
}

/// First calendar day of the month identified by `index`.
pub fn first_day(index: i64) -> Option<NaiveDate> {
    let (year, month) = year_month(index);
    NaiveDate::from_ymd_opt(year, month, 1)
}

/// Last calendar day of the month identified by `index`.
pub fn last_day(index: i64) -> Option<NaiveDate> {
    first_day(index + 1).and_then(|d| d.pred_opt())
}

/// Months to forecast around `today`: from `months_back` before the current
/// month through `months_ahead` after it, inclusive.
pub fn forecast_window(today: NaiveDate, months_back: u32, months_ahead: u32) -> RangeInclusive<i64> {
    let current = month_index(today);
    (current - months_back as i64)..=(current + months_ahead as i64)
}
