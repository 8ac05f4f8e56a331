//! The uniform internal posting shape all adapters converge on.

use serde::{Deserialize, Serialize};

/// A raw metadata entry as upstream ships it: loosely typed, possibly empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataField {
    pub name: String,
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub value_type: Option<String>,
}

/// Normalized metadata value: the escape hatch for upstream polymorphism.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Str(String),
    Num(f64),
    List(Vec<String>),
    Currency { unit: String, amount: f64 },
}

/// One posting in the uniform shape.
///
/// Greenhouse maps onto this almost verbatim; Ashby is folded in by the
/// adapter (publishedAt lands in both `updated_at` and `first_published`,
/// so the effective freshness time is `max(updated_at, first_published)`
/// for every source).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UniformPosting {
    pub upstream_id: String,
    pub title: String,
    pub canonical_url: Option<String>,
    pub apply_url: Option<String>,
    pub location_name: Option<String>,
    pub is_remote: Option<bool>,
    pub updated_at: Option<String>,
    pub first_published: Option<String>,
    pub metadata: Vec<MetadataField>,
    pub content_html: Option<String>,
}
