//! Per-key busy flags.
//!
//! Two things are tracked separately: whether a fetch is in flight (used by the
//! controller to coalesce duplicate requests) and whether a loading indicator
//! should be visible. Background refreshes are in flight without being visible.
//!
//! Every claim carries a `ClaimId`. A forced `finish` (view exit or re-entry)
//! drops the claim outright; the fetch that took it can then only `release`
//! its own id, never a newer claim for the same key.

use std::collections::HashMap;

/// Identity of one in-flight claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimId(u64);

#[derive(Debug, Default)]
pub struct LoadingStateTracker {
    visible: HashMap<String, bool>,
    in_flight: HashMap<String, ClaimId>,
    next_id: u64,
}

impl LoadingStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loading(&self, key: &str) -> bool {
        self.visible.get(key).copied().unwrap_or(false)
    }

    pub fn set_loading(&mut self, key: &str, loading: bool) {
        if loading {
            self.visible.insert(key.to_string(), true);
        } else {
            self.visible.remove(key);
        }
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.contains_key(key)
    }

    /// Claim `key` for a fetch. Returns `None` if one is already in flight.
    /// A silent claim never shows the loading indicator.
    pub fn begin(&mut self, key: &str, silent: bool) -> Option<ClaimId> {
        if self.in_flight.contains_key(key) {
            return None;
        }
        self.next_id += 1;
        let id = ClaimId(self.next_id);
        self.in_flight.insert(key.to_string(), id);
        if !silent {
            self.set_loading(key, true);
        }
        Some(id)
    }

    /// Release the claim `id` on `key`. Does nothing if the claim was already
    /// finished or replaced; returns whether it was released.
    pub fn release(&mut self, key: &str, id: ClaimId) -> bool {
        if self.in_flight.get(key) != Some(&id) {
            return false;
        }
        self.in_flight.remove(key);
        self.set_loading(key, false);
        true
    }

    /// Drop whatever claim is held on `key`.
    pub fn finish(&mut self, key: &str) {
        self.in_flight.remove(key);
        self.set_loading(key, false);
    }

    pub fn clear(&mut self) {
        self.visible.clear();
        self.in_flight.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_coalesces() {
        let mut tracker = LoadingStateTracker::new();
        let claim = tracker.begin("overview", false).expect("first claim");
        assert_eq!(tracker.begin("overview", true), None);
        assert!(tracker.is_loading("overview"));
        assert!(tracker.release("overview", claim));
        assert!(!tracker.is_loading("overview"));
        assert!(tracker.begin("overview", false).is_some());
    }

    #[test]
    fn test_silent_begin_hides_indicator() {
        let mut tracker = LoadingStateTracker::new();
        assert!(tracker.begin("availedMeals", true).is_some());
        assert!(tracker.is_in_flight("availedMeals"));
        assert!(!tracker.is_loading("availedMeals"));
    }

    #[test]
    fn test_stale_release_keeps_newer_claim() {
        let mut tracker = LoadingStateTracker::new();
        let old = tracker.begin("overview", false).expect("old claim");
        tracker.finish("overview");
        let new = tracker.begin("overview", false).expect("new claim");

        assert!(!tracker.release("overview", old));
        assert!(tracker.is_in_flight("overview"));
        assert!(tracker.is_loading("overview"));
        assert!(tracker.release("overview", new));
        assert!(!tracker.is_in_flight("overview"));
    }
}
