use foundation::time::Time;

use crate::task::Task;

#[derive(Debug, Clone)]
struct Entry {
    order: u64,
    task: Task,
    next_due: Time,
}

/// Fixed-period task timer driven by virtual time.
#[derive(Debug, Default)]
pub struct Scheduler {
    next_order: u64,
    entries: Vec<Entry>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            next_order: 0,
            entries: Vec::new(),
        }
    }

    /// Registers `task`; its first tick is one period after `now`.
    pub fn add_task(&mut self, task: Task, now: Time) {
        let order = self.next_order;
        self.next_order = self.next_order.wrapping_add(1);
        let period = task.period_ms.max(1);
        self.entries.push(Entry {
            order,
            task: Task {
                period_ms: period,
                ..task
            },
            next_due: now.after(period),
        });
    }

    pub fn remove_task(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.task.id != id);
        before != self.entries.len()
    }

    pub fn task_count(&self) -> usize {
        self.entries.len()
    }

    /// Earliest pending tick across all tasks.
    pub fn next_due(&self) -> Option<Time> {
        self.entries.iter().map(|e| e.next_due).min()
    }

    /// Ids of the tasks due at `now`, each at most once.
    ///
    /// Ordering is deterministic: `(priority, id, insertion_order)`. Ticks
    /// missed by a large clock jump are coalesced into one.
    pub fn due_tasks(&mut self, now: Time) -> Vec<&'static str> {
        self.entries.sort_by(|a, b| {
            a.task
                .priority
                .cmp(&b.task.priority)
                .then_with(|| a.task.id.cmp(b.task.id))
                .then_with(|| a.order.cmp(&b.order))
        });

        let mut due = Vec::new();
        for entry in &mut self.entries {
            if entry.next_due > now {
                continue;
            }
            due.push(entry.task.id);
            entry.next_due = entry.next_due.after(entry.task.period_ms);
            if entry.next_due <= now {
                entry.next_due = now.after(entry.task.period_ms);
            }
        }
        due
    }
}
