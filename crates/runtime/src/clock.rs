use foundation::time::Time;

/// Deterministic virtual clock.
///
/// This is the only timebase the session sees. Nothing reads wall-clock time,
/// so throttles and periodic ticks can be recorded and replayed.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct VirtualClock {
    now: Time,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self { now: Time::ZERO }
    }

    pub fn starting_at(now: Time) -> Self {
        Self { now }
    }

    pub fn now(&self) -> Time {
        self.now
    }

    pub fn advance(&mut self, ms: u64) -> Time {
        self.now = self.now.after(ms);
        self.now
    }

    /// Moves the clock forward to `t`. Never goes backwards.
    pub fn advance_to(&mut self, t: Time) -> Time {
        self.now = self.now.max(t);
        self.now
    }
}

#[cfg(test)]
mod tests {
    use super::VirtualClock;
    use foundation::time::Time;

    #[test]
    fn advance_is_deterministic() {
        let mut a = VirtualClock::new();
        let mut b = VirtualClock::new();
        a.advance(30);
        a.advance(20);
        b.advance(50);
        assert_eq!(a, b);
        assert_eq!(a.now(), Time(50));
    }

    #[test]
    fn advance_to_never_rewinds() {
        let mut c = VirtualClock::starting_at(Time(100));
        assert_eq!(c.advance_to(Time(40)), Time(100));
        assert_eq!(c.advance_to(Time(140)), Time(140));
    }
}
