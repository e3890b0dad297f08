use foundation::time::Time;

/// Trailing-edge throttle over virtual time.
///
/// The first submission while idle arms a deadline one interval ahead.
/// Submissions before the deadline are coalesced into the pending value
/// (replaced, or folded with the merge function). At the deadline [`poll`]
/// hands out the coalesced value exactly once and the throttle goes idle.
///
/// [`poll`]: Throttle::poll
pub struct Throttle<T> {
    interval_ms: u64,
    deadline: Option<Time>,
    pending: Option<T>,
    merge: Option<fn(&mut T, T)>,
}

impl<T: std::fmt::Debug> std::fmt::Debug for Throttle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttle")
            .field("interval_ms", &self.interval_ms)
            .field("deadline", &self.deadline)
            .field("pending", &self.pending)
            .finish()
    }
}

impl<T> Throttle<T> {
    /// Latest submission wins.
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            deadline: None,
            pending: None,
            merge: None,
        }
    }

    /// Submissions are folded into the pending value with `merge`.
    pub fn merging(interval_ms: u64, merge: fn(&mut T, T)) -> Self {
        Self {
            interval_ms,
            deadline: None,
            pending: None,
            merge: Some(merge),
        }
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// Takes effect from the next armed deadline.
    pub fn set_interval(&mut self, interval_ms: u64) {
        self.interval_ms = interval_ms;
    }

    pub fn is_scheduled(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Time> {
        self.deadline
    }

    pub fn submit(&mut self, now: Time, value: T) {
        let merge = self.merge;
        match (&mut self.pending, merge) {
            (Some(pending), Some(merge)) => merge(pending, value),
            (slot, _) => *slot = Some(value),
        }
        if self.deadline.is_none() {
            self.deadline = Some(now.after(self.interval_ms));
        }
    }

    /// Returns the coalesced value if the deadline has passed.
    pub fn poll(&mut self, now: Time) -> Option<T> {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                self.pending.take()
            }
            _ => None,
        }
    }

    /// Hands out the pending value immediately, ignoring the deadline.
    pub fn flush(&mut self) -> Option<T> {
        self.deadline = None;
        self.pending.take()
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
        self.pending = None;
    }

    /// Allows callers to prune part of a merged pending value in place.
    pub fn pending_mut(&mut self) -> Option<&mut T> {
        self.pending.as_mut()
    }

    pub fn pending(&self) -> Option<&T> {
        self.pending.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::Throttle;
    use foundation::time::Time;

    #[test]
    fn coalesces_to_latest_value() {
        let mut t = Throttle::new(50);
        for i in 0..10 {
            t.submit(Time(i * 3), i);
        }
        assert_eq!(t.deadline(), Some(Time(50)));
        assert_eq!(t.poll(Time(49)), None);
        assert_eq!(t.poll(Time(50)), Some(9));
        assert_eq!(t.poll(Time(100)), None);
        assert!(!t.is_scheduled());
    }

    #[test]
    fn deadline_is_not_extended_by_later_submissions() {
        let mut t = Throttle::new(100);
        t.submit(Time(0), "a");
        t.submit(Time(90), "b");
        assert_eq!(t.deadline(), Some(Time(100)));
    }

    #[test]
    fn merging_folds_values() {
        let mut t: Throttle<Vec<u32>> = Throttle::merging(10, |acc, v| acc.extend(v));
        t.submit(Time(0), vec![1]);
        t.submit(Time(1), vec![2, 3]);
        assert_eq!(t.poll(Time(10)), Some(vec![1, 2, 3]));
    }

    #[test]
    fn cancel_and_flush() {
        let mut t = Throttle::new(10);
        t.submit(Time(0), 1);
        t.cancel();
        assert_eq!(t.poll(Time(100)), None);

        t.submit(Time(200), 2);
        assert_eq!(t.flush(), Some(2));
        assert!(!t.is_scheduled());
    }

    #[test]
    fn new_interval_applies_to_next_window() {
        let mut t = Throttle::new(200);
        t.submit(Time(0), 1);
        t.set_interval(100);
        assert_eq!(t.deadline(), Some(Time(200)));
        assert_eq!(t.poll(Time(200)), Some(1));
        t.submit(Time(300), 2);
        assert_eq!(t.deadline(), Some(Time(400)));
    }
}
