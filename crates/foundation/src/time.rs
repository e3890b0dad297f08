use serde::{Deserialize, Serialize};

/// Virtual time in milliseconds since session start.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Time(pub u64);

impl Time {
    pub const ZERO: Time = Time(0);

    pub fn from_millis(ms: u64) -> Self {
        Time(ms)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    pub fn after(self, ms: u64) -> Time {
        Time(self.0.saturating_add(ms))
    }

    pub fn since(self, earlier: Time) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

#[cfg(test)]
mod tests {
    use super::Time;

    #[test]
    fn after_and_since_saturate() {
        let t = Time::from_millis(100);
        assert_eq!(t.after(50), Time(150));
        assert_eq!(t.since(Time(40)), 60);
        assert_eq!(Time(10).since(t), 0);
        assert_eq!(Time(u64::MAX).after(1), Time(u64::MAX));
    }
}
