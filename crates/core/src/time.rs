use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};

pub const HOUR_MILLIS: i64 = 3_600_000;
pub const HOURS_PER_DAY: usize = 24;
pub const HOURS_PER_WEEK: usize = 24 * 7;

pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

pub fn month_start_millis(month: NaiveDate) -> i64 {
    month_start(month)
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or(0)
}

pub fn next_month(month: NaiveDate) -> NaiveDate {
    let start = month_start(month);
    start.checked_add_months(Months::new(1)).unwrap_or(start)
}

pub fn previous_month(month: NaiveDate) -> NaiveDate {
    let start = month_start(month);
    start.checked_sub_months(Months::new(1)).unwrap_or(start)
}

pub fn days_in_month(month: NaiveDate) -> usize {
    let start = month_start(month);
    (next_month(start) - start).num_days().max(0) as usize
}

pub fn hours_in_month(month: NaiveDate) -> usize {
    days_in_month(month) * HOURS_PER_DAY
}

/// `YYYY-MM`, as used in artifact and watermark names.
pub fn month_label(month: NaiveDate) -> String {
    month.format("%Y-%m").to_string()
}

pub fn parse_month_label(label: &str) -> Option<NaiveDate> {
    if label.len() != 7 {
        return None;
    }
    NaiveDate::parse_from_str(&format!("{label}-01"), "%Y-%m-%d").ok()
}

pub fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
