//! Adaptive page sizing and the pre-flight response size guard
//!
//! Both heuristics read the collection's [`DocumentProfile`]. Without a
//! profile (or with a zero average size) they step aside: the page size is
//! the user's and no warning is raised.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collaborator::DocumentProfile;
use crate::config::QueryConfig;
use crate::utils::{BYTES_PER_MB, convert};

/// Paging position of a collection view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagingState {
    pub skip: u64,

    /// Page size the user asked for
    pub user_limit: u64,

    /// Page size actually requested, never above `user_limit`
    pub effective_limit: u64,

    /// Whether `effective_limit` was shrunk below `user_limit`
    pub is_adaptive: bool,

    /// Matching documents reported by the last page
    pub total: u64,
}

impl PagingState {
    pub fn new(user_limit: u64) -> Self {
        let user_limit = user_limit.max(1);
        Self {
            skip: 0,
            user_limit,
            effective_limit: user_limit,
            is_adaptive: false,
            total: 0,
        }
    }

    /// Whether a page follows the current one
    pub fn has_next_page(&self) -> bool {
        self.skip + self.effective_limit < self.total
    }

    /// Whether a page precedes the current one
    pub fn has_previous_page(&self) -> bool {
        self.skip > 0
    }

    /// Advance by one effective page
    pub fn advance(&mut self) {
        self.skip += self.effective_limit;
    }

    /// Step back by one effective page, stopping at zero
    pub fn retreat(&mut self) {
        self.skip = self.skip.saturating_sub(self.effective_limit);
    }

    /// Change the requested page size and return to the first page
    pub fn set_user_limit(&mut self, user_limit: u64) {
        self.user_limit = user_limit.max(1);
        self.effective_limit = self.effective_limit.min(self.user_limit);
        self.skip = 0;
    }
}

/// Pre-flight estimate of an oversized response
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResponseSizeEstimate {
    /// Expected payload of the page in megabytes
    pub estimated_mb: f64,

    /// Largest page that stays under the threshold
    pub suggested_page_size: u64,

    /// Page size that triggered the estimate
    pub page_size: u64,

    pub threshold_mb: f64,
}

/// Page sizing and payload guard settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileEstimator {
    adaptive: bool,
    max_page_payload_bytes: u64,
    warning_threshold_mb: f64,
}

impl ProfileEstimator {
    pub fn new(adaptive: bool, max_page_payload_bytes: u64, warning_threshold_mb: f64) -> Self {
        Self {
            adaptive,
            max_page_payload_bytes,
            warning_threshold_mb,
        }
    }

    pub fn from_config(config: &QueryConfig) -> Self {
        Self::new(
            config.adaptive_page_size,
            config.max_page_payload_bytes,
            config.response_warning_mb,
        )
    }

    /// Page size to request for `user_limit`
    ///
    /// # Arguments
    /// * `user_limit` - Page size the user asked for
    /// * `profile` - Cached collection profile, if any
    ///
    /// # Returns
    /// * `u64` - `min(user_limit, max(1, floor(max_payload / avg_size)))`, or
    ///   `user_limit` when adaptive sizing is off or no usable profile exists
    pub fn effective_limit(&self, user_limit: u64, profile: Option<&DocumentProfile>) -> u64 {
        let user_limit = user_limit.max(1);
        if !self.adaptive {
            return user_limit;
        }
        let Some(avg) = usable_average(profile) else {
            return user_limit;
        };

        let fitting = (self.max_page_payload_bytes as f64 / avg).floor() as u64;
        user_limit.min(fitting.max(1))
    }

    /// Recompute the effective page size of `paging` in place
    pub fn apply(&self, paging: &mut PagingState, profile: Option<&DocumentProfile>) {
        paging.effective_limit = self.effective_limit(paging.user_limit, profile);
        paging.is_adaptive = paging.effective_limit < paging.user_limit;
        if paging.is_adaptive {
            debug!(
                "Adaptive page size {} (requested {})",
                paging.effective_limit, paging.user_limit
            );
        }
    }

    /// Estimate for a page of `page_size` documents, when it exceeds the threshold
    ///
    /// # Arguments
    /// * `page_size` - Documents about to be requested
    /// * `profile` - Cached collection profile, if any
    ///
    /// # Returns
    /// * `Option<ResponseSizeEstimate>` - `Some` only when the page is expected
    ///   to exceed the warning threshold
    pub fn preflight(
        &self,
        page_size: u64,
        profile: Option<&DocumentProfile>,
    ) -> Option<ResponseSizeEstimate> {
        let avg = usable_average(profile)?;
        let estimated_mb = convert::bytes_to_mb(avg * page_size as f64);
        if estimated_mb <= self.warning_threshold_mb {
            return None;
        }

        Some(ResponseSizeEstimate {
            estimated_mb,
            suggested_page_size: self.suggested_page_size(avg),
            page_size,
            threshold_mb: self.warning_threshold_mb,
        })
    }

    /// Largest page of documents of `avg_doc_size_bytes` that fits the threshold
    pub fn suggested_page_size(&self, avg_doc_size_bytes: f64) -> u64 {
        let threshold_bytes = self.warning_threshold_mb * BYTES_PER_MB;
        ((threshold_bytes / avg_doc_size_bytes).floor() as u64).max(1)
    }
}

fn usable_average(profile: Option<&DocumentProfile>) -> Option<f64> {
    profile
        .map(|p| p.avg_doc_size_bytes)
        .filter(|avg| avg.is_finite() && *avg > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(avg: f64) -> DocumentProfile {
        DocumentProfile {
            avg_doc_size_bytes: avg,
            field_count: 10,
            top_fields: vec![],
        }
    }

    fn estimator() -> ProfileEstimator {
        ProfileEstimator::from_config(&QueryConfig::default())
    }

    #[test]
    fn test_large_documents_shrink_the_page() {
        let mut paging = PagingState::new(50);
        estimator().apply(&mut paging, Some(&profile(300_000.0)));
        assert_eq!(paging.effective_limit, 33);
        assert!(paging.is_adaptive);
    }

    #[test]
    fn test_small_documents_keep_user_limit() {
        let mut paging = PagingState::new(50);
        estimator().apply(&mut paging, Some(&profile(1_000.0)));
        assert_eq!(paging.effective_limit, 50);
        assert!(!paging.is_adaptive);
    }

    #[test]
    fn test_effective_limit_bounds() {
        let estimator = estimator();
        for (user, avg) in [(1, 50_000_000.0), (50, 20_000_000.0), (200, 123.0), (10, 999_999.0)] {
            let limit = estimator.effective_limit(user, Some(&profile(avg)));
            assert!(limit >= 1 && limit <= user, "{user} {avg} -> {limit}");
            let fitting = (10_000_000.0 / avg).floor() as u64;
            assert_eq!(limit, user.min(fitting.max(1)));
        }
    }

    #[test]
    fn test_no_profile_disables_both_heuristics() {
        let estimator = estimator();
        assert_eq!(estimator.effective_limit(50, None), 50);
        assert_eq!(estimator.effective_limit(50, Some(&profile(0.0))), 50);
        assert!(estimator.preflight(50, None).is_none());
        assert!(estimator.preflight(50, Some(&profile(f64::NAN))).is_none());
    }

    #[test]
    fn test_adaptive_sizing_can_be_disabled() {
        let estimator = ProfileEstimator::new(false, 10_000_000, 8.0);
        assert_eq!(estimator.effective_limit(50, Some(&profile(300_000.0))), 50);
    }

    #[test]
    fn test_preflight_warns_above_threshold() {
        let estimate = estimator()
            .preflight(33, Some(&profile(300_000.0)))
            .unwrap();
        assert!((estimate.estimated_mb - 9.9).abs() < 1e-9);
        assert_eq!(estimate.suggested_page_size, 26);
        assert_eq!(estimate.page_size, 33);
    }

    #[test]
    fn test_preflight_quiet_at_threshold() {
        // 80 x 100 KB is exactly 8 MB
        assert!(estimator().preflight(80, Some(&profile(100_000.0))).is_none());
        assert!(estimator().preflight(81, Some(&profile(100_000.0))).is_some());
    }

    #[test]
    fn test_suggestion_is_at_least_one() {
        assert_eq!(estimator().suggested_page_size(50_000_000.0), 1);
    }

    #[test]
    fn test_paging_navigation() {
        let mut paging = PagingState::new(20);
        paging.total = 45;
        assert!(!paging.has_previous_page());
        paging.advance();
        paging.advance();
        assert_eq!(paging.skip, 40);
        assert!(!paging.has_next_page());
        paging.retreat();
        paging.retreat();
        paging.retreat();
        assert_eq!(paging.skip, 0);

        paging.advance();
        paging.set_user_limit(5);
        assert_eq!(paging.skip, 0);
        assert_eq!(paging.effective_limit, 5);
    }
}
