//! crates/claims_core/src/filter.rs
//!
//! Derives the filtered claims list shown by the list screen from the cached
//! claims list, a free-text query and a set of selected statuses.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use crate::cache::{CacheKey, Generation, MutationCache};
use crate::domain::{ClaimStatus, ClaimSummary};

/// The user's current search criteria.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimFilter {
    pub query: String,
    /// Empty means no status restriction.
    pub statuses: HashSet<ClaimStatus>,
}

impl ClaimFilter {
    pub fn new(query: impl Into<String>, statuses: impl IntoIterator<Item = ClaimStatus>) -> Self {
        Self {
            query: query.into(),
            statuses: statuses.into_iter().collect(),
        }
    }

    fn needle(&self) -> Option<String> {
        let trimmed = self.query.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_lowercase())
    }

    /// True when the text query or the status selection restricts the list.
    pub fn is_active(&self) -> bool {
        self.active_filter_count() > 0
    }

    /// Number of active filter categories (text, status), 0 to 2.
    pub fn active_filter_count(&self) -> usize {
        usize::from(self.needle().is_some()) + usize::from(!self.statuses.is_empty())
    }
}

/// The projection handed to the list screen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilteredClaims {
    pub claims: Vec<ClaimSummary>,
    /// Size of the unfiltered list.
    pub total: usize,
    pub result_count: usize,
    pub has_active_filters: bool,
    pub active_filter_count: usize,
}

fn matches_text(summary: &ClaimSummary, needle: &str) -> bool {
    let claim = &summary.claim;
    std::iter::once(Some(claim.claim_number.as_str()))
        .chain([
            claim.claimant_name.as_deref(),
            claim.customer.as_deref(),
            claim.adjustor_name.as_deref(),
        ])
        .flatten()
        .any(|field| field.to_lowercase().contains(needle))
}

/// Keeps the claims matching both the text and the status criteria, in list order.
pub fn filter_claims(claims: &[ClaimSummary], filter: &ClaimFilter) -> FilteredClaims {
    let needle = filter.needle();
    let matched: Vec<ClaimSummary> = claims
        .iter()
        .filter(|summary| {
            needle
                .as_deref()
                .map_or(true, |needle| matches_text(summary, needle))
        })
        .filter(|summary| {
            filter.statuses.is_empty() || filter.statuses.contains(&summary.claim.status)
        })
        .cloned()
        .collect();

    let active_filter_count = filter.active_filter_count();
    FilteredClaims {
        total: claims.len(),
        result_count: matched.len(),
        claims: matched,
        has_active_filters: active_filter_count > 0,
        active_filter_count,
    }
}

//=========================================================================================
// Memoized Selector
//=========================================================================================

struct Memo {
    generation: Generation,
    filter: ClaimFilter,
    result: Arc<FilteredClaims>,
}

/// Selector over the cached claims list. Asking twice with the same filter and an
/// unchanged list returns the same `Arc`.
pub struct ClaimsFilterView {
    cache: Arc<MutationCache>,
    memo: Mutex<Option<Memo>>,
}

impl ClaimsFilterView {
    pub fn new(cache: Arc<MutationCache>) -> Self {
        Self {
            cache,
            memo: Mutex::new(None),
        }
    }

    pub fn select(&self, filter: &ClaimFilter) -> Arc<FilteredClaims> {
        let (value, generation) = self.cache.get_with_generation(&CacheKey::ClaimsList);
        let mut memo = self.memo.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(memo) = memo.as_ref() {
            if memo.generation == generation && memo.filter == *filter {
                return memo.result.clone();
            }
        }

        let claims = value
            .as_ref()
            .and_then(|value| value.as_claims_list())
            .unwrap_or_default();
        let result = Arc::new(filter_claims(claims, filter));
        *memo = Some(Memo {
            generation,
            filter: filter.clone(),
            result: result.clone(),
        });
        result
    }
}
