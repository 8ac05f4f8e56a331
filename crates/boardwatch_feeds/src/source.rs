//! Upstream source detection and company-key inference.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Which job-board API a feed URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Greenhouse,
    Ashby,
    Unknown,
}

impl Source {
    /// Detect the source variant from host and path prefix. Total: anything
    /// unrecognized is `Unknown`, never an error.
    pub fn detect(feed_url: &str) -> Source {
        let Ok(parsed) = Url::parse(feed_url) else {
            return Source::Unknown;
        };
        let host = parsed.host_str().unwrap_or("").to_ascii_lowercase();
        let path = parsed.path();

        if host.ends_with("greenhouse.io") && path.contains("/boards/") {
            return Source::Greenhouse;
        }
        if host.ends_with("ashbyhq.com") && path.contains("/job-board/") {
            return Source::Ashby;
        }
        Source::Unknown
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Source::Greenhouse => "greenhouse",
            Source::Ashby => "ashby",
            Source::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "greenhouse" => Ok(Source::Greenhouse),
            "ashby" => Ok(Source::Ashby),
            _ => Ok(Source::Unknown),
        }
    }
}

/// Derive the stable company key for a feed.
///
/// Greenhouse: the path segment after `boards`. Ashby: the segment after
/// `job-board`. Anything else falls back to a hostname + feed-id slug.
/// Deterministic: identical inputs always yield identical keys, so the key
/// survives across runs.
pub fn company_key(feed_url: &str, feed_id: &str) -> String {
    if let Ok(parsed) = Url::parse(feed_url) {
        let segments: Vec<&str> = parsed
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        let marker = match Source::detect(feed_url) {
            Source::Greenhouse => Some("boards"),
            Source::Ashby => Some("job-board"),
            Source::Unknown => None,
        };
        if let Some(marker) = marker {
            if let Some(pos) = segments.iter().position(|seg| *seg == marker) {
                if let Some(slug) = segments.get(pos + 1) {
                    return slugify(slug);
                }
            }
        }

        let host = parsed.host_str().unwrap_or("feed");
        return slugify(&format!("{host}-{feed_id}"));
    }
    slugify(&format!("feed-{feed_id}"))
}

/// Title-case a slug for display when the feed has no company name.
pub fn display_name_from_slug(slug: &str) -> String {
    slug.split(|c: char| c == '-' || c == '_')
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                None => String::new(),
                Some(c) => c.to_uppercase().to_string() + chars.as_str(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn slugify(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_dash = false;
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash && !out.is_empty() {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_greenhouse() {
        assert_eq!(
            Source::detect("https://boards-api.greenhouse.io/v1/boards/acme/jobs"),
            Source::Greenhouse
        );
    }

    #[test]
    fn detects_ashby() {
        assert_eq!(
            Source::detect("https://api.ashbyhq.com/posting-api/job-board/acme"),
            Source::Ashby
        );
    }

    #[test]
    fn unknown_hosts_and_garbage() {
        assert_eq!(Source::detect("https://jobs.lever.co/acme"), Source::Unknown);
        assert_eq!(Source::detect("not a url"), Source::Unknown);
    }

    #[test]
    fn greenhouse_company_key_is_board_slug() {
        assert_eq!(
            company_key("https://boards-api.greenhouse.io/v1/boards/acme-co/jobs", "f1"),
            "acme-co"
        );
    }

    #[test]
    fn ashby_company_key_is_board_slug() {
        assert_eq!(
            company_key("https://api.ashbyhq.com/posting-api/job-board/AcmeCo", "f1"),
            "acmeco"
        );
    }

    #[test]
    fn fallback_key_uses_host_and_feed_id() {
        assert_eq!(
            company_key("https://jobs.example.com/postings", "feed42"),
            "jobs-example-com-feed42"
        );
        assert_eq!(company_key("%%%", "feed42"), "feed-feed42");
    }

    #[test]
    fn company_key_is_deterministic() {
        let url = "https://api.ashbyhq.com/posting-api/job-board/acme";
        assert_eq!(company_key(url, "a"), company_key(url, "a"));
    }

    #[test]
    fn display_name_title_cases_slug() {
        assert_eq!(display_name_from_slug("acme-labs"), "Acme Labs");
        assert_eq!(display_name_from_slug("acme_co"), "Acme Co");
    }
}
