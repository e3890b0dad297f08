//! Analysis-widget requirements and their per-tick diffing.
//!
//! Widgets describe what they want to see; every reconciliation tick the
//! engine folds the live widget set into one record per (file, region) and
//! kind, compares it with what was last sent, and returns only the changes.

pub mod diff;
pub mod engine;
pub mod records;
pub mod widgets;

pub use diff::*;
pub use engine::*;
pub use records::*;
pub use widgets::*;
