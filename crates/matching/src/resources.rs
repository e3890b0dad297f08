use foundation::ids::FileId;
use tracing::debug;

/// Frees per-frame GPU resources when a link goes away.
pub trait ResourceReleaser {
    /// `owner` no longer needs the control map it built against `other`.
    fn release_control_map(&mut self, owner: FileId, other: FileId);
}

/// Releaser for headless sessions; only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingReleaser;

impl ResourceReleaser for LoggingReleaser {
    fn release_control_map(&mut self, owner: FileId, other: FileId) {
        debug!(%owner, %other, "control map released");
    }
}
