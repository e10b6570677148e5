//! Resource budget optimizer.
//!
//! Caps the amount of resource text sent to the generation service. When the submitted
//! text already fits, resources pass through untouched. Otherwise each text-bearing
//! resource gets a dynamic share of what is left and oversized ones are summarized (or
//! truncated when summarization fails). The result is close to the budget, not a hard
//! ceiling: the per-resource floor can push the total over when many small shares remain.

use std::fmt::Display;
use std::future::Future;

use crate::models::Resource;

/// Smallest share a text resource gets while budget remains.
pub const MIN_PER_RESOURCE: usize = 500;

pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Truncate to at most `max` characters without splitting a character.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((byte_idx, _)) => s[..byte_idx].to_string(),
        None => s.to_string(),
    }
}

pub fn total_text_len(resources: &[Resource]) -> usize {
    resources
        .iter()
        .filter_map(Resource::budgeted_text)
        .map(char_len)
        .sum()
}

pub async fn optimize_resources<F, Fut, E>(
    resources: Vec<Resource>,
    budget: usize,
    summarize: F,
) -> Vec<Resource>
where
    F: Fn(String, usize) -> Fut,
    Fut: Future<Output = Result<String, E>>,
    E: Display,
{
    let total = total_text_len(&resources);
    if total <= budget {
        return resources;
    }
    tracing::info!(total, budget, "resource text over budget, condensing");

    let mut remaining_budget = budget;
    let mut remaining_entries = resources
        .iter()
        .filter(|r| r.budgeted_text().is_some())
        .count();

    let mut out = Vec::with_capacity(resources.len());
    for mut resource in resources {
        let Some(content) = resource.budgeted_text().map(str::to_owned) else {
            out.push(resource);
            continue;
        };

        let share = remaining_budget / remaining_entries.max(1);
        let dynamic_budget = share.max(MIN_PER_RESOURCE.min(remaining_budget));
        let len = char_len(&content);

        let kept = if len <= dynamic_budget {
            content
        } else {
            match summarize(content.clone(), dynamic_budget).await {
                Ok(summary) => truncate_chars(&summary, dynamic_budget),
                Err(e) => {
                    tracing::warn!(
                        order_index = resource.order_index,
                        error = %e,
                        "summarizer failed, truncating resource"
                    );
                    truncate_chars(&content, dynamic_budget)
                }
            }
        };

        remaining_budget = remaining_budget.saturating_sub(char_len(&kept));
        remaining_entries = remaining_entries.saturating_sub(1);
        resource.content = Some(kept);
        out.push(resource);
    }
    out
}
