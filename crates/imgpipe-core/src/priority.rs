//! Request/task priority ordering.

/// Priority of a load request, ordered low to high.
///
/// A [`Session`](crate) has no priority of its own — it derives one as the
/// maximum priority across its current subscribers, or [`Priority::Normal`]
/// when it has none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum Priority {
    /// Lowest priority; used for off-screen or speculative prefetch.
    VeryLow = 0,
    /// Below-normal priority.
    Low = 1,
    /// Default priority for on-screen content.
    #[default]
    Normal = 2,
    /// Above-normal priority, e.g. content entering the viewport.
    High = 3,
    /// Highest priority, e.g. the currently focused item.
    VeryHigh = 4,
}

impl Priority {
    /// The maximum of an iterator of priorities, or [`Priority::Normal`] if empty.
    pub fn max_or_normal(priorities: impl Iterator<Item = Priority>) -> Priority {
        priorities.max().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_low_to_high() {
        assert!(Priority::VeryLow < Priority::Low);
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::High < Priority::VeryHigh);
    }

    #[test]
    fn max_or_normal_empty_is_normal() {
        assert_eq!(Priority::max_or_normal(std::iter::empty()), Priority::Normal);
    }

    #[test]
    fn max_or_normal_picks_highest() {
        let ps = [Priority::Low, Priority::VeryHigh, Priority::Normal];
        assert_eq!(Priority::max_or_normal(ps.into_iter()), Priority::VeryHigh);
    }
}
