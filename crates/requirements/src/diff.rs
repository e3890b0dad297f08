use foundation::ids::{FileId, RegionId};
use tracing::debug;

use crate::records::{Requirement, RequirementsMap};

/// Last-sent state of one requirement kind.
#[derive(Debug, Clone)]
pub struct RetainedRequirements<R> {
    sent: RequirementsMap<R>,
}

impl<R: Requirement> Default for RetainedRequirements<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Requirement> RetainedRequirements<R> {
    pub fn new() -> Self {
        Self {
            sent: RequirementsMap::new(),
        }
    }

    pub fn get(&self, key: &(FileId, RegionId)) -> Option<&R> {
        self.sent.get(key)
    }

    pub fn len(&self) -> usize {
        self.sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }

    /// Compares `updated` with what was last sent and returns the records the
    /// backend needs to hear about, clears first.
    ///
    /// Keys that disappeared are answered with an empty record once; the empty
    /// placeholder is retained so the next tick does not repeat it.
    pub fn diff(&mut self, mut updated: RequirementsMap<R>) -> Vec<R> {
        for (key, previous) in &self.sent {
            if !updated.contains_key(key) && previous.config_count() > 0 {
                updated.insert(*key, R::empty(key.0, key.1));
            }
        }

        let mut changes: Vec<R> = updated
            .values()
            .filter(|r| match self.sent.get(&r.key()) {
                Some(previous) => !previous.same_content(r),
                None => true,
            })
            .cloned()
            .collect();
        // Stable sort: clears first, (file, region) order otherwise.
        changes.sort_by_key(|r| r.config_count() > 0);

        if !changes.is_empty() {
            debug!(kind = ?R::KIND, changes = changes.len(), "requirements changed");
        }
        self.sent = updated;
        changes
    }

    /// Drops everything retained for `file` without producing clears.
    pub fn forget_file(&mut self, file: FileId) {
        self.sent.retain(|(f, _), _| *f != file);
    }
}
