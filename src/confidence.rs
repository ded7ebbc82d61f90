use crate::types::{ExtractionMethod, FieldProvenance, PageKind};

/// A new value more than this many points below the stored confidence is
/// refused, so a worse extraction run cannot downgrade good data.
pub const MAX_CONFIDENCE_DROP: u8 = 20;

/// Domains that aggregate other people's events; their dates are
/// routinely stale or templated.
const AGGREGATOR_DOMAINS: [&str; 7] = [
    "eventbrite.com",
    "facebook.com",
    "meetup.com",
    "everout.com",
    "songkick.com",
    "bandsintown.com",
    "allevents.in",
];

const GENERIC_PATH_MARKERS: [&str; 6] = [
    "/calendar",
    "/events/",
    "/event-calendar",
    "/whats-on",
    "/things-to-do",
    "/happenings",
];

/// Classify whether a page is specific to one event/organization
/// (trustworthy for dates) or a generic aggregator/calendar page.
pub fn classify_page(url: &str, source_slug: &str) -> PageKind {
    let parsed = match reqwest::Url::parse(url) {
        Ok(u) => u,
        Err(_) => return PageKind::Generic,
    };
    let host = parsed.host_str().unwrap_or("").to_lowercase();
    let path = parsed.path().to_lowercase();

    if AGGREGATOR_DOMAINS
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{d}")))
    {
        return PageKind::Generic;
    }

    // A domain that spells out the source's own name is the org's site
    // even when its path looks calendar-ish.
    let slug_word_hits = source_slug
        .split(['-', '_'])
        .filter(|w| w.len() > 2)
        .filter(|w| host.contains(*w))
        .count();
    if slug_word_hits >= 2 {
        return PageKind::Dedicated;
    }

    // Marker paths stay generic even at the domain root; a bare
    // /calendar on an unrecognized host is still a listings page.
    if GENERIC_PATH_MARKERS.iter().any(|m| path.contains(m)) {
        return PageKind::Generic;
    }

    PageKind::Dedicated
}

/// Does the extracted month fall within one month of this recurring
/// event's typical month? December/January wrap around; a missing value
/// on either side is a non-contradiction and counts as a match.
pub fn month_matches(extracted: Option<u32>, typical: Option<u32>) -> bool {
    let (extracted, typical) = match (extracted, typical) {
        (Some(e), Some(t)) => (e as i32, t as i32),
        _ => return true,
    };
    let diff = (extracted - typical).abs();
    diff <= 1 || diff == 11
}

/// Score how trustworthy a freshly extracted date is, in [0, 100].
/// Manual and migration entries are always 100 and immune to page or
/// month considerations.
pub fn score_date_extraction(
    method: ExtractionMethod,
    page_kind: PageKind,
    month_match: bool,
) -> u8 {
    use ExtractionMethod::*;
    use PageKind::*;

    match method {
        Manual | Migration => 100,
        StructuredData => match (page_kind, month_match) {
            (Dedicated, true) => 95,
            (Dedicated, false) => 70,
            // Generic aggregator pages carry stale/templated dates often
            // enough that a month match earns no extra trust.
            (Generic, _) => 55,
        },
        MetaTag | Selector => match (page_kind, month_match) {
            (Dedicated, true) => 75,
            (Dedicated, false) => 55,
            (Generic, true) => 45,
            (Generic, false) => 30,
        },
        RegexPattern | ModelAssisted => match (page_kind, month_match) {
            (Dedicated, true) => 60,
            (Dedicated, false) => 40,
            (Generic, true) => 35,
            (Generic, false) => 20,
        },
    }
}

/// Whether a new extraction is allowed to overwrite stored date data.
pub fn should_update(existing: &FieldProvenance, new_confidence: u8) -> bool {
    if existing.method.is_protected() {
        return false;
    }
    if new_confidence < existing.confidence.saturating_sub(MAX_CONFIDENCE_DROP) {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use ExtractionMethod::*;
    use PageKind::*;

    #[test]
    fn aggregator_domains_are_generic() {
        assert_eq!(
            classify_page("https://www.eventbrite.com/e/some-show-123", "city-arts-fest"),
            Generic
        );
    }

    #[test]
    fn calendar_paths_are_generic() {
        assert_eq!(
            classify_page(
                "https://visitoldtown.example/calendar/june/festivals",
                "city-arts-fest"
            ),
            Generic
        );
        // A root-level calendar is still an aggregator page.
        assert_eq!(
            classify_page("https://visitoldtown.example/calendar", "city-arts-fest"),
            Generic
        );
    }

    #[test]
    fn own_domain_beats_calendar_path() {
        assert_eq!(
            classify_page(
                "https://cityartsfest.org/events/2026-schedule",
                "city-arts-fest"
            ),
            Dedicated
        );
    }

    #[test]
    fn shallow_paths_are_dedicated() {
        assert_eq!(
            classify_page("https://riverfrontjazz.example/schedule", "some-other-slug"),
            Dedicated
        );
    }

    #[test]
    fn month_match_handles_wraparound() {
        assert!(month_matches(Some(12), Some(1)));
        assert!(month_matches(Some(1), Some(12)));
        assert!(month_matches(Some(6), Some(7)));
        assert!(!month_matches(Some(3), Some(9)));
    }

    #[test]
    fn missing_months_count_as_match() {
        assert!(month_matches(None, Some(5)));
        assert!(month_matches(Some(5), None));
        assert!(month_matches(None, None));
    }

    #[test]
    fn scoring_is_monotonic_in_method_quality() {
        let manual = score_date_extraction(Manual, Generic, false);
        let dedicated_structured = score_date_extraction(StructuredData, Dedicated, true);
        let dedicated_structured_no_match = score_date_extraction(StructuredData, Dedicated, false);
        let generic_structured = score_date_extraction(StructuredData, Generic, true);
        let dedicated_meta_no_match = score_date_extraction(MetaTag, Dedicated, false);
        let generic_regex_no_match = score_date_extraction(RegexPattern, Generic, false);

        assert_eq!(manual, 100);
        assert_eq!(dedicated_structured, 95);
        assert_eq!(dedicated_structured_no_match, 70);
        assert_eq!(generic_structured, 55);
        assert_eq!(dedicated_meta_no_match, 55);
        assert_eq!(generic_regex_no_match, 20);

        assert!(manual > dedicated_structured);
        assert!(dedicated_structured > dedicated_structured_no_match);
        assert!(dedicated_structured_no_match > generic_structured);
        assert!(generic_structured >= dedicated_meta_no_match);
        assert!(dedicated_meta_no_match > generic_regex_no_match);
    }

    #[test]
    fn generic_structured_ignores_month_match() {
        assert_eq!(
            score_date_extraction(StructuredData, Generic, true),
            score_date_extraction(StructuredData, Generic, false)
        );
    }

    #[test]
    fn manual_provenance_is_never_overwritten() {
        let existing = FieldProvenance {
            method: Manual,
            confidence: 100,
            page_kind: Dedicated,
        };
        assert!(!should_update(&existing, 100));

        let migrated = FieldProvenance {
            method: Migration,
            confidence: 10,
            page_kind: Generic,
        };
        assert!(!should_update(&migrated, 100));
    }

    #[test]
    fn large_confidence_drops_are_refused() {
        let existing = FieldProvenance {
            method: StructuredData,
            confidence: 95,
            page_kind: Dedicated,
        };
        assert!(!should_update(&existing, 70));
        assert!(should_update(&existing, 75));
        assert!(should_update(&existing, 95));
    }
}
