//! Recency and location filter pipeline.
//!
//! Recency runs first: a posting with no parseable freshness timestamp or
//! one older than the ingestion window never reaches the location rules.
//! Location then keeps a posting if any allow rule matches; remote postings
//! naming an excluded country are rejected, with US-remote phrasings
//! short-circuiting that exclusion.
//!
//! Upstream location strings are free-form ("New York, NY; Remote - US"),
//! so the rules work over one string and tolerate multi-city lists.

use crate::posting::UniformPosting;
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use std::collections::HashSet;

/// Per-posting verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterOutcome {
    Keep { state_codes: Vec<String> },
    NoTimestamp,
    TooOld,
    WrongLocation,
}

/// Process-wide allow/deny tables. Built once at first use, never mutated.
pub struct FilterPolicy {
    state_codes: HashSet<&'static str>,
    major_cities: &'static [&'static str],
    us_keywords: &'static [&'static str],
    excluded_countries: &'static [&'static str],
    us_remote_phrases: &'static [&'static str],
}

const STATE_CODES: &[&str] = &[
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "FL", "GA", "HI", "ID", "IL", "IN", "IA",
    "KS", "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH", "NJ",
    "NM", "NY", "NC", "ND", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT", "VT",
    "VA", "WA", "WV", "WI", "WY", "DC",
];

const MAJOR_CITIES: &[&str] = &[
    "new york", "nyc", "san francisco", "los angeles", "chicago", "seattle", "boston",
    "austin", "denver", "atlanta", "miami", "dallas", "houston", "philadelphia", "phoenix",
    "san diego", "san jose", "portland", "minneapolis", "washington",
];

const US_KEYWORDS: &[&str] = &[
    "united states", "usa", "u.s.", "us-based", "us based", "us only", "anywhere in the us",
];

const EXCLUDED_COUNTRIES: &[&str] = &[
    "germany", "france", "spain", "portugal", "netherlands", "poland", "romania", "bulgaria",
    "ukraine", "ireland", "united kingdom", "u.k.", "england", "scotland", "canada", "mexico",
    "brazil", "argentina", "colombia", "chile", "india", "pakistan", "philippines",
    "indonesia", "vietnam", "china", "japan", "korea", "singapore", "australia",
    "new zealand", "israel", "turkey", "egypt", "nigeria", "kenya", "south africa", "emea",
    "apac", "latam", "europe",
];

const US_REMOTE_PHRASES: &[&str] = &[
    "us-remote", "remote-us", "remote us", "remote - us", "remote, us", "remote (us",
    "us remote", "remote in the us", "remote - usa", "remote, usa", "remote (usa",
];

static POLICY: Lazy<FilterPolicy> = Lazy::new(|| FilterPolicy {
    state_codes: STATE_CODES.iter().copied().collect(),
    major_cities: MAJOR_CITIES,
    us_keywords: US_KEYWORDS,
    excluded_countries: EXCLUDED_COUNTRIES,
    us_remote_phrases: US_REMOTE_PHRASES,
});

/// The process-wide policy table.
pub fn policy() -> &'static FilterPolicy {
    &POLICY
}

/// The freshness instant the whole system compares on.
///
/// Strictly `max(updated_at, first_published)`. Ashby's adapter puts
/// `publishedAt` in both fields, so this collapses to `publishedAt` there.
pub fn effective_timestamp(posting: &UniformPosting) -> Option<DateTime<Utc>> {
    let updated = posting.updated_at.as_deref().and_then(parse_instant);
    let published = posting.first_published.as_deref().and_then(parse_instant);
    match (updated, published) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Run the full pipeline for one posting.
pub fn evaluate(posting: &UniformPosting, now: DateTime<Utc>, window: Duration) -> FilterOutcome {
    let Some(effective) = effective_timestamp(posting) else {
        return FilterOutcome::NoTimestamp;
    };
    if effective.timestamp_millis() < (now - window).timestamp_millis() {
        return FilterOutcome::TooOld;
    }

    if location_allowed(policy(), posting) {
        let location = posting.location_name.as_deref().unwrap_or("");
        FilterOutcome::Keep {
            state_codes: extract_state_codes(location),
        }
    } else {
        FilterOutcome::WrongLocation
    }
}

fn location_allowed(policy: &FilterPolicy, posting: &UniformPosting) -> bool {
    let location = posting.location_name.as_deref().unwrap_or("");
    let lower = location.to_lowercase();

    // US-remote phrasing settles it before the exclude-list gets a say.
    if policy.us_remote_phrases.iter().any(|p| lower.contains(p)) {
        return true;
    }

    let remoteish = posting.is_remote == Some(true) || has_word(&lower, "remote");
    if remoteish && policy.excluded_countries.iter().any(|c| lower.contains(c)) {
        return false;
    }

    if posting.is_remote == Some(true) {
        return true;
    }
    if policy.us_keywords.iter().any(|k| lower.contains(k)) {
        return true;
    }
    if policy
        .major_cities
        .iter()
        .copied()
        .any(|city| has_word(&lower, city))
    {
        return true;
    }
    if !extract_state_codes(location).is_empty() {
        return true;
    }
    // A bare "remote" with no excluded country is permissively kept.
    remoteish
}

/// Substring match with non-alphanumeric boundaries on both sides.
fn has_word(haystack: &str, needle: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        let at = start + pos;
        let end = at + needle.len();
        let left_ok = at == 0
            || !haystack[..at]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric());
        let right_ok = end == haystack.len()
            || !haystack[end..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric());
        if left_ok && right_ok {
            return true;
        }
        start = at + 1;
    }
    false
}

/// Collect every standalone two-letter US state code, in order of first
/// appearance. Codes must be uppercase in the source text so that words
/// like "in" or "me" never read as Indiana or Maine. "Washington, D.C."
/// is recognized as DC.
pub fn extract_state_codes(location: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut codes = Vec::new();

    let lower = location.to_lowercase();
    if lower.contains("washington, d.c.") || lower.contains("washington dc") {
        if seen.insert("DC") {
            codes.push("DC".to_string());
        }
    }

    for token in location.split(|c: char| !c.is_ascii_alphanumeric()) {
        if token.len() == 2
            && token.chars().all(|c| c.is_ascii_uppercase())
            && policy().state_codes.contains(token)
            && seen.insert(token)
        {
            codes.push(token.to_string());
        }
    }
    codes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn posting(location: Option<&str>, is_remote: Option<bool>, updated_at: &str) -> UniformPosting {
        UniformPosting {
            upstream_id: "1".into(),
            title: "Engineer".into(),
            location_name: location.map(String::from),
            is_remote,
            updated_at: Some(updated_at.to_string()),
            first_published: None,
            ..Default::default()
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-07-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn fresh_us_city_is_kept_with_state_codes() {
        let p = posting(Some("New York, NY"), None, "2026-07-01T11:50:00Z");
        let outcome = evaluate(&p, now(), Duration::minutes(60));
        assert_eq!(
            outcome,
            FilterOutcome::Keep {
                state_codes: vec!["NY".to_string()]
            }
        );
    }

    #[test]
    fn stale_posting_is_too_old() {
        let p = posting(Some("New York, NY"), None, "2026-07-01T10:30:00Z");
        assert_eq!(
            evaluate(&p, now(), Duration::minutes(60)),
            FilterOutcome::TooOld
        );
    }

    #[test]
    fn missing_timestamp() {
        let mut p = posting(Some("New York, NY"), None, "ignored");
        p.updated_at = None;
        p.first_published = None;
        assert_eq!(
            evaluate(&p, now(), Duration::minutes(60)),
            FilterOutcome::NoTimestamp
        );
        p.updated_at = Some("last tuesday".into());
        assert_eq!(
            evaluate(&p, now(), Duration::minutes(60)),
            FilterOutcome::NoTimestamp
        );
    }

    #[test]
    fn effective_time_is_max_of_both_fields() {
        let mut p = posting(Some("Austin, TX"), None, "2026-07-01T09:00:00Z");
        p.first_published = Some("2026-07-01T11:55:00Z".into());
        // updated_at alone is out of window; first_published rescues it.
        assert!(matches!(
            evaluate(&p, now(), Duration::minutes(60)),
            FilterOutcome::Keep { .. }
        ));
    }

    #[test]
    fn non_us_remote_is_excluded_even_with_remote_flag() {
        let p = posting(Some("Remote - Germany"), Some(true), "2026-07-01T11:50:00Z");
        assert_eq!(
            evaluate(&p, now(), Duration::minutes(60)),
            FilterOutcome::WrongLocation
        );
    }

    #[test]
    fn us_remote_phrasing_short_circuits_exclusion() {
        // "us" alone won't save it; the phrasing rule must fire first.
        let p = posting(Some("Remote - US"), None, "2026-07-01T11:50:00Z");
        assert!(matches!(
            evaluate(&p, now(), Duration::minutes(60)),
            FilterOutcome::Keep { .. }
        ));
    }

    #[test]
    fn bare_remote_is_permissively_kept() {
        let p = posting(Some("Remote"), None, "2026-07-01T11:50:00Z");
        assert!(matches!(
            evaluate(&p, now(), Duration::minutes(60)),
            FilterOutcome::Keep { .. }
        ));
    }

    #[test]
    fn remote_flag_without_location_is_kept() {
        let p = posting(None, Some(true), "2026-07-01T11:50:00Z");
        assert!(matches!(
            evaluate(&p, now(), Duration::minutes(60)),
            FilterOutcome::Keep { .. }
        ));
    }

    #[test]
    fn office_city_without_us_signal_is_rejected() {
        let p = posting(Some("Berlin"), None, "2026-07-01T11:50:00Z");
        assert_eq!(
            evaluate(&p, now(), Duration::minutes(60)),
            FilterOutcome::WrongLocation
        );
    }

    #[test]
    fn multi_city_string_keeps_all_state_codes() {
        let codes = extract_state_codes("New York, NY; Austin, TX; Remote - US");
        assert_eq!(codes, vec!["NY".to_string(), "TX".to_string()]);
    }

    #[test]
    fn lowercase_words_never_read_as_state_codes() {
        assert!(extract_state_codes("Remote in the us, or come see me").is_empty());
    }

    #[test]
    fn washington_dc_special_case() {
        assert_eq!(extract_state_codes("Washington, D.C."), vec!["DC".to_string()]);
    }

    #[test]
    fn city_boundary_matching() {
        assert!(has_word("greater boston area", "boston"));
        assert!(!has_word("bostonia", "boston"));
    }
}
