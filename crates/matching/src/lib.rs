//! Frame matching and request coordination for multi-cube image viewing.
//!
//! Frames are linked to reference frames per axis (spatial, spectral,
//! raster scaling). The [`Session`] keeps linked frames consistent, derives
//! the view each frame needs, and drives the throttled request stream to the
//! backend.

pub mod axis;
pub mod channels;
pub mod config;
pub mod frame;
pub mod planner;
pub mod reference;
pub mod region;
pub mod render;
pub mod resources;
pub mod session;
pub mod transform;
pub mod wcs;

pub use axis::*;
pub use config::*;
pub use frame::*;
pub use reference::MatchError;
pub use region::*;
pub use render::*;
pub use resources::*;
pub use session::*;
pub use transform::*;
pub use wcs::*;
