//! Resource discovery: enumerate tagged resources and apply tag filters.

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

use crate::aws::{ApiError, TagApi};
use crate::config::SearchTagConfig;
use crate::model::TaggedResource;

/// Compiled search-tag filter. All filters must match for a resource to
/// survive; values are regular expressions.
pub struct SearchFilter {
    key: String,
    value: Regex,
}

impl SearchFilter {
    /// Compiles the job's search tags. Config validation already checked
    /// the patterns, but compilation can still fail on reload races.
    pub fn compile(tags: &[SearchTagConfig]) -> Result<Vec<Self>> {
        tags.iter()
            .map(|t| {
                Ok(Self {
                    key: t.key.clone(),
                    value: Regex::new(&t.value)
                        .with_context(|| format!("search tag regex {:?}", t.value))?,
                })
            })
            .collect()
    }

    fn matches(&self, resource: &TaggedResource) -> bool {
        resource
            .tags
            .iter()
            .any(|t| t.key == self.key && self.value.is_match(&t.value))
    }
}

/// Discovery output for one branch.
#[derive(Debug, Default)]
pub struct Discovered {
    pub resources: Vec<TaggedResource>,
    /// Resources dropped because the API returned no ARN for them.
    pub dropped_missing_arn: usize,
}

/// Lists the namespace's tagged resources and keeps those matching every
/// search filter. Output order is unspecified; downstream stages must not
/// depend on it.
pub async fn discover_resources<T: TagApi>(
    api: &T,
    namespace: &str,
    filters: &[SearchFilter],
) -> Result<Discovered, ApiError> {
    let raw = api.get_resources(namespace).await?;

    let mut out = Discovered::default();
    for resource in raw {
        if resource.arn.is_empty() {
            out.dropped_missing_arn += 1;
            continue;
        }
        if filters.iter().all(|f| f.matches(&resource)) {
            out.resources.push(resource);
        }
    }

    debug!(
        namespace,
        kept = out.resources.len(),
        dropped_missing_arn = out.dropped_missing_arn,
        "resource discovery finished",
    );

    Ok(out)
}
