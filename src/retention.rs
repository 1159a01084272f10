//! Keep-N-most-recent snapshot retention planning.
//!
//! Retention is planned over the full snapshot history of one volume, with
//! one snapshot explicitly protected (typically the snapshot the backup run
//! just created), so pruning never happens without a fresh anchor.

use crate::model::Snapshot;

/// Default keep window: three historical snapshots plus the newest one.
pub const DEFAULT_KEEP_WINDOW: usize = 4;

/// Policy deciding which snapshots of a volume to keep.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetentionPolicy {
    keep_window: usize,
}

impl RetentionPolicy {
    /// Creates a policy keeping the `keep_window` most recent snapshots.
    #[must_use]
    pub const fn new(keep_window: usize) -> Self {
        Self { keep_window }
    }

    /// Returns the number of most-recent snapshots always preserved.
    #[must_use]
    pub const fn keep_window(&self) -> usize {
        self.keep_window
    }

    /// Plans deletions for one volume's snapshot history.
    ///
    /// Snapshots are ordered ascending by creation timestamp; everything
    /// outside the keep window of most-recent entries is scheduled for
    /// deletion, except the protected snapshot wherever it sits. Histories
    /// no larger than the keep window produce an empty plan.
    #[must_use]
    pub fn plan(&self, snapshots: &[Snapshot], protected_id: &str) -> RetentionPlan {
        if snapshots.len() <= self.keep_window {
            return RetentionPlan::default();
        }

        let mut ordered: Vec<&Snapshot> = snapshots.iter().collect();
        ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let cutoff = ordered.len().saturating_sub(self.keep_window);
        let expired = ordered
            .into_iter()
            .take(cutoff)
            .filter(|snapshot| snapshot.id != protected_id)
            .cloned()
            .collect();

        RetentionPlan { expired }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_KEEP_WINDOW)
    }
}

/// Snapshots scheduled for deletion, oldest first.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RetentionPlan {
    /// Snapshots outside the keep window, excluding the protected one.
    pub expired: Vec<Snapshot>,
}

impl RetentionPlan {
    /// Returns true when nothing is scheduled for deletion.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty()
    }

    /// Returns the number of snapshots scheduled for deletion.
    #[must_use]
    pub fn len(&self) -> usize {
        self.expired.len()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::test_support::{completed_snapshot, day};

    fn history(days: &[u32]) -> Vec<Snapshot> {
        days.iter()
            .map(|n| completed_snapshot(&format!("snap-day{n}"), "vol-1", day(*n)))
            .collect()
    }

    #[rstest]
    #[case::empty(&[])]
    #[case::single(&[1])]
    #[case::exactly_full_window(&[1, 2, 3, 4])]
    fn histories_within_the_window_are_untouched(#[case] days: &[u32]) {
        let plan = RetentionPolicy::default().plan(&history(days), "snap-day1");
        assert!(plan.is_empty());
    }

    #[test]
    fn seven_day_history_keeps_the_four_most_recent() {
        let plan = RetentionPolicy::default().plan(&history(&[1, 2, 3, 4, 5, 6, 7]), "snap-day7");

        let expired: Vec<&str> = plan.expired.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(expired, vec!["snap-day1", "snap-day2", "snap-day3"]);
    }

    #[test]
    fn input_order_does_not_matter() {
        let plan = RetentionPolicy::default().plan(&history(&[5, 1, 7, 3, 6, 2, 4]), "snap-day7");

        let expired: Vec<&str> = plan.expired.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(expired, vec!["snap-day1", "snap-day2", "snap-day3"]);
    }

    #[test]
    fn protected_snapshot_outside_the_window_survives() {
        let plan = RetentionPolicy::default().plan(&history(&[1, 2, 3, 4, 5, 6, 7]), "snap-day2");

        let expired: Vec<&str> = plan.expired.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(expired, vec!["snap-day1", "snap-day3"]);
    }

    #[test]
    fn every_expired_snapshot_is_older_than_every_kept_one() {
        let snapshots = history(&[4, 8, 1, 6, 3, 7, 2, 5]);
        let plan = RetentionPolicy::default().plan(&snapshots, "snap-day8");

        let newest_expired = plan
            .expired
            .iter()
            .map(|s| s.created_at)
            .max()
            .unwrap_or_else(|| panic!("plan should not be empty"));
        let kept_oldest = snapshots
            .iter()
            .filter(|s| !plan.expired.contains(s))
            .map(|s| s.created_at)
            .min()
            .unwrap_or_else(|| panic!("kept set should not be empty"));

        assert_eq!(plan.len(), snapshots.len() - DEFAULT_KEEP_WINDOW);
        assert!(newest_expired < kept_oldest);
    }

    #[test]
    fn wider_windows_are_respected() {
        let plan = RetentionPolicy::new(6).plan(&history(&[1, 2, 3, 4, 5, 6, 7]), "snap-day7");

        let expired: Vec<&str> = plan.expired.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(expired, vec!["snap-day1"]);
    }
}
