//! Content and metadata normalization.
//!
//! The stored job body is the upstream HTML after a fixed entity decode,
//! image removal, tracker-anchor unwrapping, and a character cap. Nothing
//! downstream parses it again.

use crate::posting::{MetaValue, MetadataField};
use boardwatch_protocol::defaults::CONTENT_MAX_CHARS;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

/// Entities decoded in order; `&amp;` goes last so already-escaped text
/// is not decoded twice.
const ENTITIES: &[(&str, &str)] = &[
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#39;", "'"),
    ("&apos;", "'"),
    ("&rsquo;", "\u{2019}"),
    ("&lsquo;", "\u{2018}"),
    ("&ldquo;", "\u{201C}"),
    ("&rdquo;", "\u{201D}"),
    ("&mdash;", "\u{2014}"),
    ("&ndash;", "\u{2013}"),
    ("&hellip;", "\u{2026}"),
    ("&bull;", "\u{2022}"),
    ("&nbsp;", " "),
    ("&amp;", "&"),
];

/// Anchor hrefs pointing at these domains are unwrapped to their inner text.
const TRACKER_DOMAINS: &[&str] = &[
    "click.appcast.io",
    "gohire.io",
    "jobadx.com",
    "doubleclick.net",
    "googleadservices.com",
    "bs.serving-sys.com",
];

static IMG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<img\b[^>]*>").unwrap());

static ANCHOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)<a\b[^>]*\bhref\s*=\s*"([^"]*)"[^>]*>(.*?)</a>"#).unwrap());

/// Clean one job body for storage.
pub fn clean_content(raw: &str) -> String {
    let mut content = raw.to_string();
    for (entity, replacement) in ENTITIES {
        if content.contains(entity) {
            content = content.replace(entity, replacement);
        }
    }

    let content = IMG_RE.replace_all(&content, "");

    let content = ANCHOR_RE.replace_all(&content, |caps: &regex::Captures<'_>| {
        let href = &caps[1];
        if TRACKER_DOMAINS.iter().any(|d| href.contains(d)) {
            caps[2].to_string()
        } else {
            caps[0].to_string()
        }
    });

    cap_chars(&content, CONTENT_MAX_CHARS)
}

fn cap_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

/// Normalize upstream metadata into an ordered list plus a name→value map.
///
/// Strings are trimmed, empty entries dropped, currency keeps its
/// `{unit, amount}` shape, and on duplicate names the first wins.
pub fn normalize_metadata(
    fields: &[MetadataField],
) -> (Vec<(String, MetaValue)>, BTreeMap<String, MetaValue>) {
    let mut ordered = Vec::new();
    let mut map = BTreeMap::new();

    for field in fields {
        let name = field.name.trim();
        if name.is_empty() || map.contains_key(name) {
            continue;
        }
        let Some(value) = normalize_value(&field.value) else {
            continue;
        };
        ordered.push((name.to_string(), value.clone()));
        map.insert(name.to_string(), value);
    }

    (ordered, map)
}

fn normalize_value(value: &serde_json::Value) -> Option<MetaValue> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(MetaValue::Str(trimmed.to_string()))
            }
        }
        serde_json::Value::Number(n) => n.as_f64().map(MetaValue::Num),
        serde_json::Value::Bool(b) => Some(MetaValue::Str(b.to_string())),
        serde_json::Value::Array(items) => {
            let list: Vec<String> = items
                .iter()
                .filter_map(|item| item.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            if list.is_empty() {
                None
            } else {
                Some(MetaValue::List(list))
            }
        }
        serde_json::Value::Object(obj) => {
            let unit = obj.get("unit").and_then(|u| u.as_str())?;
            let amount = obj.get("amount").and_then(|a| a.as_f64())?;
            Some(MetaValue::Currency {
                unit: unit.to_string(),
                amount,
            })
        }
    }
}
