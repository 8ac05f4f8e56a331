//! Greenhouse Job Board API v1 adapter.
//!
//! `GET https://boards-api.greenhouse.io/v1/boards/<slug>/jobs` returns
//! `.jobs[]`; the uniform shape is essentially this payload, so the adapter
//! is an identity mapping with tolerant parsing.

use crate::posting::{MetadataField, UniformPosting};
use serde::Deserialize;
use tracing::debug;

#[derive(Deserialize, Clone, Debug)]
pub struct GreenhouseLocation {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct GreenhouseMetadataField {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub value_type: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct GreenhouseJob {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub absolute_url: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub first_published: Option<String>,
    #[serde(default)]
    pub location: Option<GreenhouseLocation>,
    #[serde(default)]
    pub metadata: Option<Vec<GreenhouseMetadataField>>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct GreenhouseBoardResponse {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub jobs: Vec<GreenhouseJob>,
}

/// Pull `.jobs[]` out of a board payload. Entries that don't deserialize are
/// skipped individually so one malformed job can't sink the feed.
pub fn extract_postings(payload: &serde_json::Value) -> Vec<UniformPosting> {
    let Some(jobs) = payload.get("jobs").and_then(|j| j.as_array()) else {
        return Vec::new();
    };

    jobs.iter()
        .filter_map(|raw| match serde_json::from_value::<GreenhouseJob>(raw.clone()) {
            Ok(job) => Some(to_uniform(job)),
            Err(e) => {
                debug!("skipping unparseable greenhouse job: {e}");
                None
            }
        })
        .collect()
}

fn to_uniform(job: GreenhouseJob) -> UniformPosting {
    let metadata = job
        .metadata
        .unwrap_or_default()
        .into_iter()
        .filter_map(|field| {
            let name = field.name?;
            Some(MetadataField {
                name,
                value: field.value.unwrap_or(serde_json::Value::Null),
                value_type: field.value_type,
            })
        })
        .collect();

    UniformPosting {
        upstream_id: job.id.to_string(),
        title: job.title,
        canonical_url: job.absolute_url,
        apply_url: None,
        location_name: job.location.and_then(|l| l.name),
        is_remote: None,
        updated_at: job.updated_at,
        first_published: job.first_published,
        metadata,
        content_html: job.content,
    }
}
