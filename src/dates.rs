//! Calendar helpers: card date parsing, anniversary-aware tenure and the
//! Spanish long-date rendering used on the back of the card.
//!
//! Every function here is lenient. Unparsable input yields `None` (or an
//! empty string at the formatting layer) instead of an error.

use chrono::{Datelike, NaiveDate};

/// Month names printed on the card, indexed by `month - 1`.
pub const MONTH_NAMES: [&str; 12] = [
    "Enero",
    "Febrero",
    "Marzo",
    "Abril",
    "Mayo",
    "Junio",
    "Julio",
    "Agosto",
    "Septiembre",
    "Octubre",
    "Noviembre",
    "Diciembre",
];

/// Parse a card date.
///
/// Accepts `DD/MM/YYYY` (the catalog's textual format) and ISO `YYYY-MM-DD`,
/// optionally followed by a time component (`2024-06-01T00:00:00.000Z`).
pub fn parse_card_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if text.contains('/') {
        let mut parts = text.split('/').map(str::trim);
        let day: u32 = parts.next()?.parse().ok()?;
        let month: u32 = parts.next()?.parse().ok()?;
        let year: i32 = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    let date_part = match text.char_indices().nth(10) {
        Some((idx, 'T')) | Some((idx, ' ')) => &text[..idx],
        _ => text,
    };
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// Whole years elapsed from `start` to `end`, counting a year only once its
/// anniversary has been reached. Reversed ranges clamp to zero.
pub fn years_between(start: NaiveDate, end: NaiveDate) -> u32 {
    let mut years = end.year() - start.year();
    if (end.month(), end.day()) < (start.month(), start.day()) {
        years -= 1;
    }
    years.max(0) as u32
}

/// Tenure in whole years between an issue date and a reference date, both
/// given as card date text. `None` when either date cannot be parsed.
pub fn tenure_years(issue: &str, reference: &str) -> Option<u32> {
    let start = parse_card_date(issue)?;
    let end = parse_card_date(reference)?;
    Some(years_between(start, end))
}

/// `"1 año"`, `"4 años"`, or empty for an unknown tenure.
pub fn format_years(years: Option<u32>) -> String {
    match years {
        Some(1) => "1 año".to_string(),
        Some(n) => format!("{n} años"),
        None => String::new(),
    }
}

/// Capitalised month name for a 1-based month number.
pub fn month_name(month: u32) -> Option<&'static str> {
    let idx = usize::try_from(month).ok()?.checked_sub(1)?;
    MONTH_NAMES.get(idx).copied()
}

/// The three pieces of the "a DD de Mes del YYYY" line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LongDate {
    pub day: String,
    pub month: String,
    pub year: String,
}

impl LongDate {
    /// Generation date as printed on the back side: zero-padded day,
    /// capitalised month name, four-digit year.
    pub fn generation(date: NaiveDate) -> Self {
        Self {
            day: format!("{:02}", date.day()),
            month: month_name(date.month()).unwrap_or_default().to_string(),
            year: date.year().to_string(),
        }
    }

    /// Split a `DD/MM/YYYY` issue date into day, lowercase month name and
    /// year. Pieces that are missing or out of range come back empty.
    pub fn issue(issue: &str) -> Self {
        let mut parts = issue.split('/').map(str::trim);
        let day = parts.next().unwrap_or_default().to_string();
        let month = parts
            .next()
            .and_then(|m| m.parse::<u32>().ok())
            .and_then(month_name)
            .map(str::to_lowercase)
            .unwrap_or_default();
        let year = parts.next().unwrap_or_default().to_string();
        Self { day, month, year }
    }
}

/// Seniority label shown for a selected record on the listing screen.
///
/// A first issuance ("Expedición") always reads "0 años". Otherwise the
/// calendar-year difference between the legacy issue date and `today` is
/// used; an unknown legacy date yields an empty label.
pub fn seniority_label(procedure_type: &str, legacy_issue: Option<&str>, today: NaiveDate) -> String {
    if procedure_type == "Expedición" {
        return "0 años".to_string();
    }
    let Some(start) = legacy_issue.and_then(parse_card_date) else {
        return String::new();
    };
    let years = (today.year() - start.year()).max(0) as u32;
    if years == 1 {
        "1 año".to_string()
    } else {
        format!("{years} años")
    }
}
