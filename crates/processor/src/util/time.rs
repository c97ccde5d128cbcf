use chrono::{Datelike, Duration, NaiveDate};

/// Days of the previous month that fall in the first week of `month`
/// (weeks start on Monday).
pub fn carry_days(month: NaiveDate) -> usize {
    month.weekday().num_days_from_monday() as usize
}

/// Monday of the week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// Index of the first week of `month` in the weekly artifact, counted from
/// `start_date`. A start date that is not a Monday opens a partial week 0.
pub fn week_offset(start_date: NaiveDate, month: NaiveDate) -> usize {
    let monday = week_start(month);
    if monday <= start_date {
        return 0;
    }
    let weeks = (monday - start_date).num_days() / 7;
    let partial = usize::from(start_date.weekday().num_days_from_monday() != 0);
    weeks as usize + partial
}

/// Whole months from `start_date` to `month`, never negative.
pub fn months_between(start_date: NaiveDate, month: NaiveDate) -> usize {
    let mut months = (month.year() - start_date.year()) * 12 + month.month() as i32
        - start_date.month() as i32;
    if month.day() < start_date.day() {
        months -= 1;
    }
    months.max(0) as usize
}

/// Zero-based day of the year of `month`'s first day.
pub fn day_of_year_index(month: NaiveDate) -> usize {
    month.ordinal0() as usize
}
