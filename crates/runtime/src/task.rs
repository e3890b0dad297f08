/// A periodic unit of work tracked by the [`Scheduler`](crate::Scheduler).
///
/// Tasks that fall due at the same instant fire in a stable order based on
/// their `(priority, id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: &'static str,
    /// Smaller values run earlier.
    pub priority: i32,
    pub period_ms: u64,
}

impl Task {
    pub fn new(id: &'static str, period_ms: u64) -> Self {
        Self {
            id,
            priority: 0,
            period_ms,
        }
    }

    pub fn with_priority(id: &'static str, priority: i32, period_ms: u64) -> Self {
        Self {
            id,
            priority,
            period_ms,
        }
    }
}
