use std::collections::BTreeSet;

use foundation::ids::FileId;
use foundation::math::Vec2;
use foundation::Arena;
use serde::{Deserialize, Serialize};

use crate::axis::MatchingAxis;
use crate::region::RegionSet;
use crate::render::RenderConfig;
use crate::transform::SpatialTransform;
use crate::wcs::WcsHandle;

/// Computed polarizations: Ptotal, Plinear, PFtotal, PFlinear, Pangle.
pub const COMPUTED_POLARIZATIONS: [u32; 5] = [13, 14, 15, 16, 17];

/// Which cube axes hold the direction and spectral coordinates (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisLayout {
    pub dir_x: u8,
    pub dir_y: u8,
    pub spectral: u8,
}

impl Default for AxisLayout {
    fn default() -> Self {
        Self {
            dir_x: 1,
            dir_y: 2,
            spectral: 3,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Static description of a loaded cube.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub file_id: FileId,
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_one")]
    pub depth: u32,
    /// Number of stored polarizations.
    #[serde(default = "default_one")]
    pub stokes: u32,
    /// Computed polarizations the backend can derive for this cube.
    #[serde(default)]
    pub computed_polarizations: Vec<u32>,
    pub wcs: WcsHandle,
    #[serde(default)]
    pub spectral_wcs: Option<WcsHandle>,
    #[serde(default)]
    pub header_unit: String,
    #[serde(default = "default_true")]
    pub square_pixels: bool,
    #[serde(default = "default_true")]
    pub valid_wcs: bool,
    /// Sky axes are rotated against the pixel grid.
    #[serde(default)]
    pub rotated: bool,
    #[serde(default)]
    pub axes: AxisLayout,
}

fn default_one() -> u32 {
    1
}

impl FrameInfo {
    pub fn new(file_id: FileId, width: u32, height: u32, wcs: WcsHandle) -> Self {
        Self {
            file_id,
            width,
            height,
            depth: 1,
            stokes: 1,
            computed_polarizations: Vec::new(),
            wcs,
            spectral_wcs: None,
            header_unit: String::new(),
            square_pixels: true,
            valid_wcs: true,
            rotated: false,
            axes: AxisLayout::default(),
        }
    }

    pub fn with_depth(mut self, depth: u32, spectral_wcs: WcsHandle) -> Self {
        self.depth = depth;
        self.spectral_wcs = Some(spectral_wcs);
        self
    }

    pub fn with_stokes(mut self, stokes: u32) -> Self {
        self.stokes = stokes;
        self
    }

    /// Stored polarizations followed by computed ones.
    pub fn polarizations(&self) -> Vec<u32> {
        (0..self.stokes.max(1))
            .chain(self.computed_polarizations.iter().copied())
            .collect()
    }
}

/// Canvas a frame is drawn into.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderSize {
    pub width: f64,
    pub height: f64,
    pub pixel_ratio: f64,
}

impl Default for RenderSize {
    fn default() -> Self {
        Self {
            width: 0.0,
            height: 0.0,
            pixel_ratio: 1.0,
        }
    }
}

/// One side of a frame's participation in an axis: who it follows and who
/// follows it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AxisLink {
    pub reference: Option<FileId>,
    pub secondaries: Vec<FileId>,
}

/// Centre and zoom captured when a spatial link is made, with the
/// reference's view at that moment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SavedView {
    pub center: Vec2,
    pub zoom: f64,
    pub reference_center: Vec2,
    pub reference_zoom: f64,
}

#[derive(Debug, Clone)]
pub struct FrameState {
    pub info: FrameInfo,
    /// Displayed plane.
    pub channel: u32,
    pub stokes: u32,
    /// Plane the UI asked for; the displayed one follows through the throttle.
    pub required_channel: u32,
    pub required_stokes: u32,
    pub center: Vec2,
    pub zoom: f64,
    pub render_size: RenderSize,
    /// Pixel aspect ratio (x over y).
    pub aspect_ratio: f64,
    pub cursor: Option<Vec2>,
    pub spatial: AxisLink,
    pub spectral: AxisLink,
    pub raster: AxisLink,
    pub spatial_transform: Option<SpatialTransform>,
    pub saved_view: Option<SavedView>,
    pub regions: RegionSet,
    pub render_config: RenderConfig,
    /// Frames this one holds a control map against.
    pub control_maps: BTreeSet<FileId>,
}

impl FrameState {
    pub fn new(info: FrameInfo) -> Self {
        let center = Vec2::new(
            (f64::from(info.width) - 1.0) / 2.0,
            (f64::from(info.height) - 1.0) / 2.0,
        );
        Self {
            info,
            channel: 0,
            stokes: 0,
            required_channel: 0,
            required_stokes: 0,
            center,
            zoom: 1.0,
            render_size: RenderSize::default(),
            aspect_ratio: 1.0,
            cursor: None,
            spatial: AxisLink::default(),
            spectral: AxisLink::default(),
            raster: AxisLink::default(),
            spatial_transform: None,
            saved_view: None,
            regions: RegionSet::new(),
            render_config: RenderConfig::default(),
            control_maps: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> FileId {
        self.info.file_id
    }

    pub fn link(&self, axis: MatchingAxis) -> &AxisLink {
        match axis {
            MatchingAxis::Spatial => &self.spatial,
            MatchingAxis::Spectral => &self.spectral,
            MatchingAxis::Raster => &self.raster,
        }
    }

    pub fn link_mut(&mut self, axis: MatchingAxis) -> &mut AxisLink {
        match axis {
            MatchingAxis::Spatial => &mut self.spatial,
            MatchingAxis::Spectral => &mut self.spectral,
            MatchingAxis::Raster => &mut self.raster,
        }
    }

    pub fn reference(&self, axis: MatchingAxis) -> Option<FileId> {
        self.link(axis).reference
    }

    /// Zoom and render surface allow drawing.
    pub fn is_renderable(&self) -> bool {
        self.zoom.is_finite()
            && self.zoom > 0.0
            && self.render_size.width > 0.0
            && self.render_size.height > 0.0
            && self.render_size.pixel_ratio > 0.0
    }

    pub fn image_center(&self) -> Vec2 {
        Vec2::new(
            (f64::from(self.info.width) - 1.0) / 2.0,
            (f64::from(self.info.height) - 1.0) / 2.0,
        )
    }

    /// Zoom at which the whole image fits the render surface.
    pub fn zoom_level_for_fit(&self) -> f64 {
        let RenderSize {
            width,
            height,
            pixel_ratio,
        } = self.render_size;
        let fit_x = width * pixel_ratio / self.aspect_ratio / f64::from(self.info.width.max(1));
        let fit_y = height * pixel_ratio / f64::from(self.info.height.max(1));
        fit_x.min(fit_y)
    }

    /// Clamped, rounded channel; non-finite input keeps the current one.
    pub fn sanitize_channel(&self, channel: f64) -> u32 {
        if !channel.is_finite() {
            return self.required_channel;
        }
        let last = f64::from(self.info.depth.max(1) - 1);
        channel.round().clamp(0.0, last) as u32
    }

    /// Wraps negative indices; unknown ones fall back to the first
    /// polarization.
    pub fn sanitize_stokes(&self, stokes: i32) -> u32 {
        let count = self.info.stokes.max(1) as i32;
        let stokes = if stokes < 0 { stokes + count } else { stokes };
        if stokes < 0 {
            return 0;
        }
        let stokes = stokes as u32;
        if stokes < count as u32 || COMPUTED_POLARIZATIONS.contains(&stokes) {
            stokes
        } else {
            0
        }
    }
}

/// Every open frame, in opening order.
pub type Frames = Arena<FileId, FrameState>;

/// Plain fields of a frame, for serializers outside the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSnapshot {
    pub file_id: FileId,
    pub channel: u32,
    pub stokes: u32,
    pub required_channel: u32,
    pub required_stokes: u32,
    pub center: Vec2,
    pub zoom: f64,
    pub spatial_reference: Option<FileId>,
    pub spectral_reference: Option<FileId>,
    pub raster_reference: Option<FileId>,
    pub regions: usize,
}

impl From<&FrameState> for FrameSnapshot {
    fn from(frame: &FrameState) -> Self {
        Self {
            file_id: frame.id(),
            channel: frame.channel,
            stokes: frame.stokes,
            required_channel: frame.required_channel,
            required_stokes: frame.required_stokes,
            center: frame.center,
            zoom: frame.zoom,
            spatial_reference: frame.spatial.reference,
            spectral_reference: frame.spectral.reference,
            raster_reference: frame.raster.reference,
            regions: frame.regions.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(depth: u32, stokes: u32) -> FrameState {
        FrameState::new(
            FrameInfo::new(FileId(0), 100, 50, WcsHandle(0))
                .with_depth(depth, WcsHandle(0))
                .with_stokes(stokes),
        )
    }

    #[test]
    fn starts_centred_and_unrenderable() {
        let f = frame(1, 1);
        assert_eq!(f.center, Vec2::new(49.5, 24.5));
        assert!(!f.is_renderable());
    }

    #[test]
    fn channel_is_rounded_and_clamped() {
        let mut f = frame(10, 1);
        assert_eq!(f.sanitize_channel(4.6), 5);
        assert_eq!(f.sanitize_channel(-3.0), 0);
        assert_eq!(f.sanitize_channel(99.0), 9);
        f.required_channel = 7;
        assert_eq!(f.sanitize_channel(f64::NAN), 7);
    }

    #[test]
    fn stokes_wraps_and_keeps_computed() {
        let f = frame(1, 4);
        assert_eq!(f.sanitize_stokes(-1), 3);
        assert_eq!(f.sanitize_stokes(2), 2);
        assert_eq!(f.sanitize_stokes(6), 0);
        assert_eq!(f.sanitize_stokes(14), 14);
        assert_eq!(f.sanitize_stokes(-9), 0);
    }

    #[test]
    fn fit_zoom_uses_tighter_axis() {
        let mut f = frame(1, 1);
        f.render_size = RenderSize {
            width: 400.0,
            height: 100.0,
            pixel_ratio: 1.0,
        };
        assert_eq!(f.zoom_level_for_fit(), 2.0);
    }
}
