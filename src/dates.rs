use chrono::{Datelike, Duration, NaiveDate, NaiveTime};
use regex::Regex;
use std::sync::OnceLock;

/// Ceiling on how far in the future an extracted date may land, in days.
pub const DEFAULT_MAX_FUTURE_DAYS: i64 = 270;
/// Yearless dates this close behind "today" are left alone rather than
/// rolled forward; the listing is probably just slightly stale.
pub const DEFAULT_ROLLOVER_GRACE_DAYS: i64 = 30;

fn explicit_year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(19|20)\d{2}\b").unwrap())
}

/// Whether the raw source text carries an explicit 4-digit year.
pub fn has_explicit_year(text: &str) -> bool {
    explicit_year_re().is_match(text)
}

/// Shift a date by whole years, clamping Feb 29 to Feb 28 when the target
/// year is not a leap year.
fn shift_years(date: NaiveDate, delta: i32) -> NaiveDate {
    let year = date.year() + delta;
    NaiveDate::from_ymd_opt(year, date.month(), date.day())
        .unwrap_or_else(|| NaiveDate::from_ymd_opt(year, 2, 28).unwrap())
}

/// Turn a candidate calendar date into a trustworthy one, or reject it.
///
/// Dates past `today + max_future_days` are healed by subtracting one year
/// (a year was hallucinated or templated into the page); yearless dates
/// older than the grace window are advanced one year (list pages omit the
/// year for next-occurrence items). A heal that still lands outside
/// `[today, today + max_future_days]` rejects the date outright: an event
/// is dropped rather than stored with a wrong date.
pub fn normalize_event_date(
    candidate: NaiveDate,
    raw_text: Option<&str>,
    today: NaiveDate,
    max_future_days: i64,
    rollover_grace_days: i64,
) -> Option<NaiveDate> {
    let ceiling = today + Duration::days(max_future_days);

    if candidate > ceiling {
        let healed = shift_years(candidate, -1);
        if healed >= today && healed <= ceiling {
            return Some(healed);
        }
        return None;
    }

    let explicit_year = raw_text.map(has_explicit_year).unwrap_or(false);
    if !explicit_year && candidate < today - Duration::days(rollover_grace_days) {
        // A rolled-forward stale date lands up to a year out by
        // construction, so the acceptance window here is the next year,
        // not the tighter max-future ceiling.
        let advanced = shift_years(candidate, 1);
        if advanced >= today && advanced <= today + Duration::days(366) {
            return Some(advanced);
        }
        return None;
    }

    Some(candidate)
}

/// Parse free date text leniently, then run it through the normalizer.
/// Returns `None` for unparseable text; callers must treat that as "omit
/// this field", never as "use today".
pub fn parse_human_date(
    text: &str,
    today: NaiveDate,
    max_future_days: i64,
    rollover_grace_days: i64,
) -> Option<NaiveDate> {
    let anchor_year = explicit_year_re()
        .find(text)
        .and_then(|m| m.as_str().parse::<i32>().ok())
        .unwrap_or_else(|| today.year());

    let parsed = fuzzy_parse_date(text, anchor_year)?;
    normalize_event_date(
        parsed,
        Some(text),
        today,
        max_future_days,
        rollover_grace_days,
    )
}

/// Apply the ceiling/healing logic to an already-structured `YYYY-MM-DD`
/// string. ISO strings always carry an explicit year, so the yearless
/// roll-forward path never fires.
pub fn normalize_iso_date(
    value: &str,
    today: NaiveDate,
    max_future_days: i64,
    rollover_grace_days: i64,
) -> Option<NaiveDate> {
    let candidate = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()?;
    normalize_event_date(
        candidate,
        Some(value),
        today,
        max_future_days,
        rollover_grace_days,
    )
}

const MONTHS: [(&str, u32); 12] = [
    ("jan", 1),
    ("feb", 2),
    ("mar", 3),
    ("apr", 4),
    ("may", 5),
    ("jun", 6),
    ("jul", 7),
    ("aug", 8),
    ("sep", 9),
    ("oct", 10),
    ("nov", 11),
    ("dec", 12),
];

fn month_from_name(name: &str) -> Option<u32> {
    let lower = name.to_lowercase();
    MONTHS
        .iter()
        .find(|(prefix, _)| lower.starts_with(prefix))
        .map(|(_, num)| *num)
}

fn month_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+(\d{1,2})(?:st|nd|rd|th)?(?:,?\s*((?:19|20)\d{2}))?",
        )
        .unwrap()
    })
}

fn day_month_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(\d{1,2})(?:st|nd|rd|th)?\s+(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?(?:,?\s*((?:19|20)\d{2}))?",
        )
        .unwrap()
    })
}

fn numeric_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{1,2})/(\d{1,2})(?:/((?:19|20)?\d{2}))?\b").unwrap())
}

/// Best-effort date extraction from messy page text. Tries ISO form,
/// then "Month D[, YYYY]", then "D Month[ YYYY]", then "M/D[/Y]".
/// Yearless forms anchor to `anchor_year`.
pub fn fuzzy_parse_date(text: &str, anchor_year: i32) -> Option<NaiveDate> {
    let trimmed = text.trim();

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }
    // ISO datetime prefix is common in schema.org startDate values.
    // get() rather than a byte slice: scraped text can put a multi-byte
    // char across index 10.
    if let Some(prefix) = trimmed.get(..10) {
        if let Ok(date) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
            return Some(date);
        }
    }

    if let Some(caps) = month_name_re().captures(trimmed) {
        let month = month_from_name(caps.get(1)?.as_str())?;
        let day: u32 = caps.get(2)?.as_str().parse().ok()?;
        let year: i32 = caps
            .get(3)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(anchor_year);
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    if let Some(caps) = day_month_re().captures(trimmed) {
        let day: u32 = caps.get(1)?.as_str().parse().ok()?;
        let month = month_from_name(caps.get(2)?.as_str())?;
        let year: i32 = caps
            .get(3)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(anchor_year);
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    if let Some(caps) = numeric_date_re().captures(trimmed) {
        let month: u32 = caps.get(1)?.as_str().parse().ok()?;
        let day: u32 = caps.get(2)?.as_str().parse().ok()?;
        let year: i32 = match caps.get(3) {
            Some(m) => {
                let raw: i32 = m.as_str().parse().ok()?;
                if raw < 100 {
                    2000 + raw
                } else {
                    raw
                }
            }
            None => anchor_year,
        };
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    None
}

fn twelve_hour_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(\d{1,2})(?::(\d{2}))?\s*(a\.?m\.?|p\.?m\.?)").unwrap())
}

/// Parse a free-text time, preferring an explicit `H:MM AM/PM` pattern
/// before falling back to 24-hour forms. 12 AM maps to 00:xx and
/// 12 PM stays 12:xx.
pub fn parse_time_text(text: &str) -> Option<NaiveTime> {
    let trimmed = text.trim();

    if let Some(caps) = twelve_hour_re().captures(trimmed) {
        let mut hour: u32 = caps.get(1)?.as_str().parse().ok()?;
        let minute: u32 = caps
            .get(2)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0);
        if hour == 0 || hour > 12 || minute > 59 {
            return None;
        }
        let meridiem = caps.get(3)?.as_str().to_lowercase();
        let is_pm = meridiem.starts_with('p');
        if is_pm && hour != 12 {
            hour += 12;
        } else if !is_pm && hour == 12 {
            hour = 0;
        }
        return NaiveTime::from_hms_opt(hour, minute, 0);
    }

    for format in ["%H:%M:%S", "%H:%M"] {
        if let Ok(time) = NaiveTime::parse_from_str(trimmed, format) {
            return Some(time);
        }
    }

    // ISO times often trail a zone offset or subseconds ("19:30:00-07:00").
    if let Some(prefix) = trimmed.get(..8) {
        if let Ok(time) = NaiveTime::parse_from_str(prefix, "%H:%M:%S") {
            return Some(time);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn heals_date_a_year_too_far_out() {
        let today = date(2026, 2, 1);
        let candidate = date(2027, 3, 10);
        let result = normalize_event_date(candidate, None, today, 270, 30);
        assert_eq!(result, Some(date(2026, 3, 10)));
    }

    #[test]
    fn rejects_heal_that_lands_in_the_past() {
        let today = date(2026, 2, 1);
        let candidate = date(2027, 1, 10);
        // Subtracting a year gives 2026-01-10, before today.
        let result = normalize_event_date(candidate, None, today, 270, 30);
        assert_eq!(result, None);
    }

    #[test]
    fn yearless_stale_date_rolls_forward() {
        let today = date(2026, 2, 1);
        let candidate = today - Duration::days(45);
        let result = normalize_event_date(candidate, Some("Dec 18"), today, 270, 30);
        assert_eq!(result, Some(shift_years(candidate, 1)));
    }

    #[test]
    fn yearless_date_inside_grace_window_stays_put() {
        let today = date(2026, 2, 1);
        let candidate = today - Duration::days(10);
        let result = normalize_event_date(candidate, Some("Jan 22"), today, 270, 30);
        assert_eq!(result, Some(candidate));
    }

    #[test]
    fn explicit_year_past_date_is_left_unchanged() {
        let today = date(2026, 2, 1);
        let candidate = date(2025, 11, 1);
        let result = normalize_event_date(candidate, Some("Nov 1, 2025"), today, 270, 30);
        assert_eq!(result, Some(candidate));
    }

    #[test]
    fn parse_human_date_uses_todays_year_for_yearless_text() {
        let today = date(2026, 2, 1);
        let result = parse_human_date("Saturday, March 14", today, 270, 30);
        assert_eq!(result, Some(date(2026, 3, 14)));
    }

    #[test]
    fn parse_human_date_honors_explicit_year() {
        let today = date(2026, 2, 1);
        let result = parse_human_date("June 5, 2026", today, 270, 30);
        assert_eq!(result, Some(date(2026, 6, 5)));
    }

    #[test]
    fn parse_human_date_rejects_garbage() {
        let today = date(2026, 2, 1);
        assert_eq!(parse_human_date("doors at dusk", today, 270, 30), None);
    }

    #[test]
    fn parse_human_date_survives_multibyte_text() {
        let today = date(2026, 2, 1);
        // Em dash straddles byte index 10.
        assert_eq!(
            parse_human_date("Sat. 14 — March 21", today, 270, 30),
            Some(date(2026, 3, 21))
        );
        assert_eq!(parse_human_date("Sáb. 14 — único", today, 270, 30), None);
    }

    #[test]
    fn normalize_iso_date_applies_ceiling_healing() {
        let today = date(2026, 2, 1);
        let result = normalize_iso_date("2027-03-10", today, 270, 30);
        assert_eq!(result, Some(date(2026, 3, 10)));
    }

    #[test]
    fn normalize_iso_date_never_rolls_explicit_years_forward() {
        let today = date(2026, 2, 1);
        // 2025-06-01 is far stale but carries an explicit year.
        let result = normalize_iso_date("2025-06-01", today, 270, 30);
        assert_eq!(result, Some(date(2025, 6, 1)));
    }

    #[test]
    fn fuzzy_parse_handles_common_shapes() {
        assert_eq!(
            fuzzy_parse_date("Fri Oct 3rd", 2026),
            Some(date(2026, 10, 3))
        );
        assert_eq!(
            fuzzy_parse_date("21 September 2026", 2024),
            Some(date(2026, 9, 21))
        );
        assert_eq!(fuzzy_parse_date("10/31", 2026), Some(date(2026, 10, 31)));
        assert_eq!(
            fuzzy_parse_date("2026-07-04T19:30:00-07:00", 2020),
            Some(date(2026, 7, 4))
        );
    }

    #[test]
    fn parse_time_prefers_explicit_meridiem() {
        assert_eq!(
            parse_time_text("Doors 7:30 PM"),
            NaiveTime::from_hms_opt(19, 30, 0)
        );
        assert_eq!(
            parse_time_text("12:00 AM"),
            NaiveTime::from_hms_opt(0, 0, 0)
        );
        assert_eq!(
            parse_time_text("12 pm"),
            NaiveTime::from_hms_opt(12, 0, 0)
        );
        assert_eq!(
            parse_time_text("20:15"),
            NaiveTime::from_hms_opt(20, 15, 0)
        );
        assert_eq!(parse_time_text("whenever"), None);
    }

    #[test]
    fn parse_time_drops_zone_offsets() {
        assert_eq!(
            parse_time_text("19:30:00-07:00"),
            NaiveTime::from_hms_opt(19, 30, 0)
        );
    }

    #[test]
    fn leap_day_heal_clamps_to_feb_28() {
        let today = date(2027, 6, 1);
        // 2028-02-29 is more than 270 days out from 2027-06-01.
        // Heal clamps to 2027-02-28, which is before today, so reject.
        let result = normalize_event_date(date(2028, 2, 29), None, today, 270, 30);
        assert_eq!(result, None);
    }
}
