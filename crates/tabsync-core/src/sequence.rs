//! Request sequencing for debounced search and pagination.
//!
//! Each channel (a search box, a paginated list) hands out increasing sequence
//! numbers. Only the most recently issued number is allowed to apply its
//! result, so an earlier request that completes late cannot overwrite a newer
//! one.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Sequence(u64);

impl Sequence {
    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct SequenceGuard {
    latest: HashMap<String, u64>,
}

impl SequenceGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next sequence number for `channel`.
    pub fn issue(&mut self, channel: &str) -> Sequence {
        let next = self.latest.entry(channel.to_string()).or_insert(0);
        *next += 1;
        Sequence(*next)
    }

    pub fn is_latest(&self, channel: &str, seq: Sequence) -> bool {
        self.latest.get(channel).copied() == Some(seq.0)
    }

    pub fn reset(&mut self) {
        self.latest.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_latest_applies() {
        let mut guard = SequenceGuard::new();
        let first = guard.issue("studentSearch");
        let second = guard.issue("studentSearch");
        assert!(first < second);
        assert!(!guard.is_latest("studentSearch", first));
        assert!(guard.is_latest("studentSearch", second));
    }

    #[test]
    fn test_channels_are_independent() {
        let mut guard = SequenceGuard::new();
        let search = guard.issue("studentSearch");
        guard.issue("borrowedPage");
        assert!(guard.is_latest("studentSearch", search));
    }
}
