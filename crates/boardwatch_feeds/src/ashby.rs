//! AshbyHQ posting API adapter.
//!
//! `GET https://api.ashbyhq.com/posting-api/job-board/<slug>` usually
//! returns `.jobs[]`, but some deployments ship a bare array or nest under
//! `.jobBoard.jobs[]`. The adapter folds Ashby's field names into the
//! uniform shape: `jobUrl` becomes the canonical URL, `publishedAt` lands
//! in both freshness fields, and department/team/employmentType become
//! metadata entries.

use crate::posting::{MetadataField, UniformPosting};
use serde::Deserialize;
use tracing::debug;

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AshbySecondaryLocation {
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AshbyJobPosting {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub job_url: Option<String>,
    #[serde(default)]
    pub apply_url: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub is_remote: Option<bool>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub employment_type: Option<String>,
    #[serde(default)]
    pub secondary_locations: Option<Vec<AshbySecondaryLocation>>,
    #[serde(default)]
    pub description_html: Option<String>,
}

/// Locate the postings array: `.jobs[]`, else a root array, else
/// `.jobBoard.jobs[]`.
fn postings_array(payload: &serde_json::Value) -> Option<&Vec<serde_json::Value>> {
    if let Some(jobs) = payload.get("jobs").and_then(|j| j.as_array()) {
        return Some(jobs);
    }
    if let Some(jobs) = payload.as_array() {
        return Some(jobs);
    }
    payload
        .get("jobBoard")
        .and_then(|b| b.get("jobs"))
        .and_then(|j| j.as_array())
}

pub fn extract_postings(payload: &serde_json::Value) -> Vec<UniformPosting> {
    let Some(jobs) = postings_array(payload) else {
        return Vec::new();
    };

    jobs.iter()
        .filter_map(|raw| match serde_json::from_value::<AshbyJobPosting>(raw.clone()) {
            Ok(job) => Some(to_uniform(job)),
            Err(e) => {
                debug!("skipping unparseable ashby job: {e}");
                None
            }
        })
        .collect()
}

fn to_uniform(job: AshbyJobPosting) -> UniformPosting {
    let mut metadata = Vec::new();
    for (name, value) in [
        ("department", &job.department),
        ("team", &job.team),
        ("employment_type", &job.employment_type),
    ] {
        if let Some(value) = value {
            metadata.push(MetadataField {
                name: name.to_string(),
                value: serde_json::Value::String(value.clone()),
                value_type: Some("short_text".to_string()),
            });
        }
    }

    // Multi-city boards list extra sites in secondaryLocations; the filter
    // works over one free-form string, so fold them in.
    let mut location_name = job.location;
    if let Some(secondary) = &job.secondary_locations {
        let extra: Vec<&str> = secondary
            .iter()
            .filter_map(|l| l.location.as_deref())
            .collect();
        if !extra.is_empty() {
            let mut combined = location_name.unwrap_or_default();
            for loc in extra {
                if !combined.is_empty() {
                    combined.push_str("; ");
                }
                combined.push_str(loc);
            }
            location_name = Some(combined);
        }
    }

    UniformPosting {
        upstream_id: job.id,
        title: job.title,
        canonical_url: job.job_url,
        apply_url: job.apply_url,
        location_name,
        is_remote: job.is_remote,
        updated_at: job.published_at.clone(),
        first_published: job.published_at,
        metadata,
        content_html: job.description_html,
    }
}
