//! Required views and tile plans.

use foundation::bounds::Aabb2;
use foundation::ids::FileId;
use foundation::view::FrameView;
use streaming::tile::TilePlan;

use crate::frame::{FrameState, Frames};

/// Mip multiplier applied in low-bandwidth mode.
pub const LOW_BANDWIDTH_MIP_ADJUSTMENT: f64 = 2.0;

fn adjustment(low_bandwidth: bool) -> f64 {
    if low_bandwidth { LOW_BANDWIDTH_MIP_ADJUSTMENT } else { 1.0 }
}

/// Nearest power of two, in log space. Values below 1 snap to 1.
pub fn snap_mip(mip: f64) -> u32 {
    if !mip.is_finite() || mip <= 1.0 {
        return 1;
    }
    let exponent = mip.log2().round().min(31.0);
    1u32 << (exponent as u32)
}

/// View of a frame that follows nobody.
pub fn own_view(frame: &FrameState, low_bandwidth: bool) -> FrameView {
    if !frame.is_renderable() {
        return FrameView::DUMMY;
    }
    let size = frame.render_size;
    let width = size.pixel_ratio * size.width / frame.zoom / frame.aspect_ratio;
    let height = size.pixel_ratio * size.height / frame.zoom;
    let mip = snap_mip(adjustment(low_bandwidth) / frame.zoom);
    FrameView::new(
        frame.center.x - width / 2.0,
        frame.center.x + width / 2.0,
        frame.center.y - height / 2.0,
        frame.center.y + height / 2.0,
        mip,
    )
}

/// View of a spatial secondary: the reference's view pulled back through the
/// inverse transform, boxed in the secondary's pixel space.
pub fn matched_view(frame: &FrameState, reference: &FrameState, reference_view: &FrameView, low_bandwidth: bool) -> FrameView {
    let Some(transform) = frame.spatial_transform else {
        return own_view(frame, low_bandwidth);
    };
    let corners = reference_view.corners().map(|c| transform.inverse(c));
    let Some(bounds) = Aabb2::from_points(corners) else {
        return FrameView::DUMMY;
    };
    let mip = snap_mip(adjustment(low_bandwidth) / transform.scale / reference.zoom);
    let view = FrameView::from_bounds(bounds, mip);
    if view.is_valid() { view } else { FrameView::DUMMY }
}

/// View `id` has to stream, following its spatial reference when it has one.
pub fn required_frame_view(frames: &Frames, id: FileId, low_bandwidth: bool) -> FrameView {
    let Some(frame) = frames.get(id) else {
        return FrameView::DUMMY;
    };
    match frame.spatial.reference.and_then(|r| frames.get(r)) {
        Some(reference) => {
            let reference_view = own_view(reference, low_bandwidth);
            matched_view(frame, reference, &reference_view, low_bandwidth)
        }
        None => own_view(frame, low_bandwidth),
    }
}

/// Tiles for `view` of `frame`.
pub fn plan_tiles(frame: &FrameState, view: &FrameView, tile_size: u32) -> TilePlan {
    TilePlan::for_view(view, frame.info.width, frame.info.height, tile_size)
}

/// Coarsest useful mip: the one that fits the image width into one tile.
pub fn max_mip(width: u32, tile_size: u32) -> u32 {
    let tile_size = tile_size.max(1);
    if width < tile_size {
        1
    } else {
        width.div_ceil(tile_size).next_power_of_two()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameInfo, RenderSize};
    use crate::transform::SpatialTransform;
    use crate::wcs::WcsHandle;
    use foundation::math::Vec2;
    use pretty_assertions::assert_eq;

    fn frame(id: i32) -> FrameState {
        let mut f = FrameState::new(FrameInfo::new(FileId(id), 256, 256, WcsHandle(0)));
        f.render_size = RenderSize {
            width: 100.0,
            height: 100.0,
            pixel_ratio: 1.0,
        };
        f.center = Vec2::new(50.0, 50.0);
        f
    }

    #[test]
    fn snapping_picks_nearest_power_in_log_space() {
        assert_eq!(snap_mip(0.3), 1);
        assert_eq!(snap_mip(1.0), 1);
        assert_eq!(snap_mip(1.4), 1);
        assert_eq!(snap_mip(1.42), 2);
        assert_eq!(snap_mip(2.9), 4);
        assert_eq!(snap_mip(f64::NAN), 1);
        assert_eq!(snap_mip(std::f64::consts::SQRT_2 - 1e-9), 1);
        assert_eq!(snap_mip(std::f64::consts::SQRT_2 + 1e-9), 2);
    }

    #[test]
    fn own_view_centres_render_surface() {
        assert_eq!(own_view(&frame(0), false), FrameView::new(0.0, 100.0, 0.0, 100.0, 1));
        let mut zoomed_out = frame(0);
        zoomed_out.zoom = 0.25;
        assert_eq!(own_view(&zoomed_out, false).mip, 4);
        assert_eq!(own_view(&zoomed_out, true).mip, 8);
    }

    #[test]
    fn unrenderable_frames_get_dummy_view() {
        let mut f = frame(0);
        f.zoom = 0.0;
        assert_eq!(own_view(&f, false), FrameView::DUMMY);
        let mut f = frame(0);
        f.render_size.width = 0.0;
        assert_eq!(own_view(&f, false), FrameView::DUMMY);
    }

    #[test]
    fn secondary_view_follows_reference() {
        let reference = frame(0);
        let mut secondary = frame(1);
        secondary.spatial_transform = Some(SpatialTransform {
            scale: 0.5,
            ..SpatialTransform::IDENTITY
        });
        let view = matched_view(&secondary, &reference, &own_view(&reference, false), false);
        assert_eq!(view, FrameView::new(0.0, 200.0, 0.0, 200.0, 2));
    }

    #[test]
    fn max_mip_fits_width_in_one_tile() {
        assert_eq!(max_mip(100, 256), 1);
        assert_eq!(max_mip(256, 256), 1);
        assert_eq!(max_mip(1000, 256), 4);
        assert_eq!(max_mip(1100, 256), 8);
    }
}
