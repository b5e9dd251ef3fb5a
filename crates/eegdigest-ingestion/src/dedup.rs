//! Candidate filtering and version de-duplication.

use std::collections::HashMap;

use eegdigest_common::CandidateItem;

use crate::month::Month;

/// True when any of the item's categories is in `allowed`.
pub fn category_match(categories: &[String], allowed: &[String]) -> bool {
    categories.iter().any(|c| allowed.contains(c))
}

/// Keep items in the allowed categories and published inside `month`.
pub fn filter_candidates(items: Vec<CandidateItem>, allowed: &[String], month: Month) -> Vec<CandidateItem> {
    items
        .into_iter()
        .filter(|p| category_match(&p.categories, allowed) && month.contains(&p.published))
        .collect()
}

/// One entry per base id, keeping the highest version, sorted by
/// `(published, item_id)`.
pub fn dedupe_latest(items: Vec<CandidateItem>) -> Vec<CandidateItem> {
    let mut by_base: HashMap<String, CandidateItem> = HashMap::new();
    for item in items {
        match by_base.get(&item.item_id) {
            Some(existing) if existing.version >= item.version => {}
            _ => {
                by_base.insert(item.item_id.clone(), item);
            }
        }
    }
    let mut out: Vec<CandidateItem> = by_base.into_values().collect();
    out.sort_by(|a, b| a.published.cmp(&b.published).then_with(|| a.item_id.cmp(&b.item_id)));
    out
}
