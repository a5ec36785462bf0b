//! Numeric atom value parsing shared by `size:` and `date-modified:`
//! (spec §4.9). Kept separate from the parser proper because the unit
//! arithmetic (size's "imprecise but intuitive" `=` widening, date's
//! calendar-unit/relative-interval resolution) is independent of the
//! surrounding boolean grammar.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};

use crate::query::ast::NumericAtom;

/// Parses a size quantity like `5mb`, `1kb`, `512` into `(value, unit)`
/// where `unit` is the power-of-1000 multiplier implied by the suffix
/// (1 for none/`b`, 1000 for `k`, 1_000_000 for `m`, ...).
pub fn parse_size_word(word: &str) -> Result<(i64, i64), String> {
    let mut s = word.trim();
    if s.is_empty() {
        return Err("empty size value".into());
    }
    if s.ends_with(['b', 'B']) {
        s = &s[..s.len() - 1];
    }
    let unit = match s.chars().last() {
        Some(c) if c.eq_ignore_ascii_case(&'k') => 1_000i64,
        Some(c) if c.eq_ignore_ascii_case(&'m') => 1_000_000,
        Some(c) if c.eq_ignore_ascii_case(&'g') => 1_000_000_000,
        Some(c) if c.eq_ignore_ascii_case(&'t') => 1_000_000_000_000,
        _ => 1,
    };
    let digits = if unit != 1 { &s[..s.len() - 1] } else { s };
    let value: i64 = digits
        .parse()
        .map_err(|_| format!("not a number: {digits:?}"))?;
    Ok((value, unit))
}

/// Builds the numeric atom for an `=`/implicit-equality size match,
/// including the widening rule (spec §4.9): `[N*unit, N*unit + (unit -
/// unit/20 - 1)]` inclusive, which this half-open representation
/// expresses as `hi = lo + unit - unit/20`.
pub fn size_eq_atom(value: i64, unit: i64) -> NumericAtom {
    let lo = value * unit;
    let hi = lo + unit - unit / 20;
    NumericAtom::half_open(lo, hi)
}

fn word_to_count(word: &str) -> Option<i64> {
    if let Ok(n) = word.parse::<i64>() {
        return Some(n);
    }
    let n = match word.to_ascii_lowercase().as_str() {
        "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "eleven" => 11,
        "twelve" => 12,
        _ => return None,
    };
    Some(n)
}

/// Parses a `date-modified:` argument into a half-open range of Unix
/// epoch seconds, evaluated relative to `now`. Returns `None` for
/// anything unrecognized — the caller downgrades to `MatchEverything`
/// and reports a diagnostic (§7 `QueryParse`).
pub fn parse_date_modified(text: &str, now: DateTime<Utc>) -> Option<NumericAtom> {
    let text = text.trim();
    let lower = text.to_ascii_lowercase();

    if lower == "today" {
        let start = now.date_naive().and_hms_opt(0, 0, 0)?;
        let start = Utc.from_utc_datetime(&start);
        return Some(day_range(start));
    }
    if lower == "yesterday" {
        let start = (now - Duration::days(1)).date_naive().and_hms_opt(0, 0, 0)?;
        let start = Utc.from_utc_datetime(&start);
        return Some(day_range(start));
    }
    if lower == "thishour" {
        let start = now
            .date_naive()
            .and_hms_opt(now.hour(), 0, 0)?;
        let start = Utc.from_utc_datetime(&start);
        let end = start + Duration::hours(1);
        return Some(NumericAtom::half_open(start.timestamp(), end.timestamp()));
    }

    if let Some(rest) = lower.strip_prefix("past ") {
        return parse_relative_past(rest, now);
    }
    if let Some(rest) = lower.strip_prefix("last ") {
        return parse_relative_past(rest, now);
    }

    for (suffix, to_duration) in [
        ("minutes", Duration::minutes as fn(i64) -> Duration),
        ("minute", Duration::minutes),
        ("hours", Duration::hours),
        ("hour", Duration::hours),
        ("days", Duration::days),
        ("day", Duration::days),
        ("weeks", Duration::weeks),
        ("week", Duration::weeks),
    ] {
        if let Some(prefix) = lower.strip_suffix(suffix) {
            let n = word_to_count(prefix.trim())?;
            let start = now - to_duration(n);
            return Some(NumericAtom::at_least(start.timestamp()));
        }
    }
    if let Some(prefix) = lower.strip_suffix("months").or_else(|| lower.strip_suffix("month")) {
        let n = word_to_count(prefix.trim())?;
        let start = now - Duration::days(30 * n);
        return Some(NumericAtom::at_least(start.timestamp()));
    }
    if let Some(prefix) = lower.strip_suffix("years").or_else(|| lower.strip_suffix("year")) {
        let n = word_to_count(prefix.trim())?;
        let start = now - Duration::days(365 * n);
        return Some(NumericAtom::at_least(start.timestamp()));
    }

    parse_iso_prefix(text, now)
}

fn parse_relative_past(rest: &str, now: DateTime<Utc>) -> Option<NumericAtom> {
    let rest = rest.trim();
    let (count_part, unit_part) = rest.rsplit_once(' ').unwrap_or(("1", rest));
    let n = word_to_count(count_part)?;
    let start = match unit_part.trim_end_matches('s') {
        "minute" => now - Duration::minutes(n),
        "hour" => now - Duration::hours(n),
        "day" => now - Duration::days(n),
        "week" => now - Duration::weeks(n),
        "month" => now - Duration::days(30 * n),
        "year" => now - Duration::days(365 * n),
        _ => return None,
    };
    Some(NumericAtom::at_least(start.timestamp()))
}

fn day_range(start: DateTime<Utc>) -> NumericAtom {
    let end = start + Duration::days(1);
    NumericAtom::half_open(start.timestamp(), end.timestamp())
}

/// Parses `YYYY`, `YYYY-MM`, or `YYYY-MM-DD` into the half-open range
/// spanning that calendar unit.
fn parse_iso_prefix(text: &str, _now: DateTime<Utc>) -> Option<NumericAtom> {
    let parts: Vec<&str> = text.split('-').collect();
    match parts.as_slice() {
        [y] => {
            let year: i32 = y.parse().ok()?;
            let start = Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single()?;
            let end = Utc.with_ymd_and_hms(year + 1, 1, 1, 0, 0, 0).single()?;
            Some(NumericAtom::half_open(start.timestamp(), end.timestamp()))
        }
        [y, m] => {
            let year: i32 = y.parse().ok()?;
            let month: u32 = m.parse().ok()?;
            let start = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()?;
            let (ny, nm) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
            let end = Utc.with_ymd_and_hms(ny, nm, 1, 0, 0, 0).single()?;
            Some(NumericAtom::half_open(start.timestamp(), end.timestamp()))
        }
        [y, m, d] => {
            let year: i32 = y.parse().ok()?;
            let month: u32 = m.parse().ok()?;
            let day: u32 = d.parse().ok()?;
            let start = Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).single()?;
            let end = start + Duration::days(1);
            Some(NumericAtom::half_open(start.timestamp(), end.timestamp()))
        }
        _ => None,
    }
}
