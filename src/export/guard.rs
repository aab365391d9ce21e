pub const DEFAULT_DUPLICATE_THRESHOLD: u32 = 5;

/// Stops fetch-all runs whose cursor keeps returning already-seen pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGuard {
    threshold: u32,
    streak: u32,
}

impl Default for DuplicateGuard {
    fn default() -> Self {
        Self::new(DEFAULT_DUPLICATE_THRESHOLD)
    }
}

impl DuplicateGuard {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            streak: 0,
        }
    }

    /// Record one page. `duplicates` counts fetched posts that were already
    /// seen; `applies` is true only in fetch-all mode without a date filter.
    pub fn observe(&mut self, fetched: usize, duplicates: usize, applies: bool) {
        if applies && fetched > 0 && duplicates == fetched {
            self.streak += 1;
        } else {
            self.streak = 0;
        }
    }

    pub fn should_stop(&self) -> bool {
        self.streak >= self.threshold
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn reset(&mut self) {
        self.streak = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_exactly_on_fifth_duplicate_page() {
        let mut guard = DuplicateGuard::default();
        for page in 1..=5 {
            guard.observe(3, 3, true);
            assert_eq!(guard.should_stop(), page == 5, "page {page}");
        }
    }

    #[test]
    fn new_post_or_other_mode_resets_streak() {
        let mut guard = DuplicateGuard::default();
        guard.observe(3, 3, true);
        guard.observe(3, 3, true);
        guard.observe(3, 2, true);
        assert_eq!(guard.streak(), 0);

        guard.observe(3, 3, true);
        guard.observe(3, 3, false);
        assert_eq!(guard.streak(), 0);

        guard.observe(0, 0, true);
        assert_eq!(guard.streak(), 0);
    }

    #[test]
    fn threshold_is_configurable() {
        let mut guard = DuplicateGuard::new(2);
        guard.observe(1, 1, true);
        assert!(!guard.should_stop());
        guard.observe(1, 1, true);
        assert!(guard.should_stop());
    }
}
