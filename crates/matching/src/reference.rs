//! Per-axis reference links between frames.
//!
//! Links form a one-level star on each axis: a frame either follows a
//! reference or is followed by secondaries, never both. The link is stored
//! on both ends and every operation here keeps the two ends in step.

use foundation::ids::FileId;
use foundation::math::Vec2;
use thiserror::Error;
use tracing::{info, warn};

use crate::axis::MatchingAxis;
use crate::frame::{FrameState, Frames, SavedView};
use crate::resources::ResourceReleaser;
use crate::transform::SpatialTransform;
use crate::wcs::{SpectralMatching, WcsError, WcsProvider};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatchError {
    #[error("{0} cannot be its own reference")]
    SelfReference(FileId),
    #[error("{0} is not open")]
    UnknownFrame(FileId),
    #[error("{0} has no reference frame on this axis")]
    NoReference(FileId),
    #[error("pixels of {frame} or {reference} are not square")]
    NonSquarePixels { frame: FileId, reference: FileId },
    #[error("{frame} and {reference} disagree on whether their coordinates are valid")]
    WcsValidityMismatch { frame: FileId, reference: FileId },
    #[error("{0} has no spectral axis")]
    MissingSpectralAxis(FileId),
    #[error("axis layout of {frame} does not match {reference}")]
    AxisMismatch { frame: FileId, reference: FileId },
    #[error(transparent)]
    Wcs(#[from] WcsError),
}

/// What a link applies once it is known to be possible.
enum Prepared {
    Spatial(SpatialTransform),
    Spectral(f64),
    Raster,
}

fn get(frames: &Frames, id: FileId) -> Result<&FrameState, MatchError> {
    frames.get(id).ok_or(MatchError::UnknownFrame(id))
}

/// Spatial transform from `frame` into `reference`, linearised where the
/// reference is currently looking.
pub fn spatial_transform<W: WcsProvider>(
    wcs: &W,
    frame: &FrameState,
    reference: &FrameState,
) -> Result<SpatialTransform, WcsError> {
    let pivot = wcs
        .map_pixel(reference.info.wcs, frame.info.wcs, reference.center)
        .ok()
        .filter(|p| p.is_finite())
        .unwrap_or_else(|| {
            Vec2::new(
                f64::from(frame.info.width) / 2.0 + 0.5,
                f64::from(frame.info.height) / 2.0 + 0.5,
            )
        });
    let transform = wcs.compute_transform(frame.info.wcs, reference.info.wcs, pivot)?;
    if transform.is_finite() {
        Ok(transform)
    } else {
        Err(WcsError::NonFinite)
    }
}

fn prepare<W: WcsProvider>(
    frames: &Frames,
    wcs: &W,
    matching: SpectralMatching,
    frame: FileId,
    reference: FileId,
    axis: MatchingAxis,
) -> Result<Prepared, MatchError> {
    let f = get(frames, frame)?;
    let r = get(frames, reference)?;
    match axis {
        MatchingAxis::Spatial => {
            if !f.info.square_pixels || !r.info.square_pixels {
                return Err(MatchError::NonSquarePixels { frame, reference });
            }
            if f.info.valid_wcs != r.info.valid_wcs {
                return Err(MatchError::WcsValidityMismatch { frame, reference });
            }
            Ok(Prepared::Spatial(spatial_transform(wcs, f, r)?))
        }
        MatchingAxis::Spectral => {
            let spectral = |s: &FrameState| s.info.spectral_wcs.filter(|_| s.info.depth > 1);
            let fs = spectral(f).ok_or(MatchError::MissingSpectralAxis(frame))?;
            let rs = spectral(r).ok_or(MatchError::MissingSpectralAxis(reference))?;
            if f.info.axes != r.info.axes {
                return Err(MatchError::AxisMismatch { frame, reference });
            }
            let channel = wcs.transformed_channel(rs, fs, matching, f64::from(r.required_channel))?;
            Ok(Prepared::Spectral(channel))
        }
        MatchingAxis::Raster => Ok(Prepared::Raster),
    }
}

/// Checks that `frame` could follow `reference` without changing anything.
pub fn check_link<W: WcsProvider>(
    frames: &Frames,
    wcs: &W,
    matching: SpectralMatching,
    frame: FileId,
    reference: FileId,
    axis: MatchingAxis,
) -> Result<(), MatchError> {
    if frame == reference {
        return Err(MatchError::SelfReference(frame));
    }
    prepare(frames, wcs, matching, frame, reference, axis).map(|_| ())
}

/// Makes `frame` follow `reference` on `axis` and returns the frame actually
/// followed.
///
/// A reference that itself follows another frame is resolved to that frame.
/// Frames that followed `frame` move over to the new reference. On error
/// nothing changes, except that a self link drops any existing link.
pub fn link<W: WcsProvider>(
    frames: &mut Frames,
    wcs: &W,
    matching: SpectralMatching,
    frame: FileId,
    reference: FileId,
    axis: MatchingAxis,
    releaser: &mut dyn ResourceReleaser,
) -> Result<FileId, MatchError> {
    if frame == reference {
        unlink(frames, frame, axis, releaser);
        return Err(MatchError::SelfReference(frame));
    }
    get(frames, frame)?;
    let (target, swap) = match get(frames, reference)?.reference(axis) {
        Some(root) if root == frame => (reference, true),
        Some(root) => (root, false),
        None => (reference, false),
    };
    if get(frames, frame)?.reference(axis) == Some(target) {
        return Ok(target);
    }

    if let Err(err) = prepare(frames, wcs, matching, frame, target, axis) {
        warn!(%frame, reference = %target, %axis, error = %err, "matching refused");
        return Err(err);
    }
    if swap {
        // `reference` follows `frame` today; it becomes the root instead.
        unlink(frames, reference, axis, releaser);
    }
    unlink(frames, frame, axis, releaser);
    let prepared = prepare(frames, wcs, matching, frame, target, axis)?;
    attach(frames, frame, target, axis, prepared, true);
    info!(%frame, reference = %target, %axis, "frame matched");

    let followers = frames
        .get(frame)
        .map(|f| f.link(axis).secondaries.clone())
        .unwrap_or_default();
    for follower in followers {
        match prepare(frames, wcs, matching, follower, target, axis) {
            Ok(prepared) => {
                if let Some(f) = frames.get_mut(frame) {
                    f.link_mut(axis).secondaries.retain(|s| *s != follower);
                }
                attach(frames, follower, target, axis, prepared, false);
                info!(frame = %follower, reference = %target, %axis, "secondary re-pointed");
            }
            Err(err) => {
                warn!(frame = %follower, reference = %target, %axis, error = %err, "secondary dropped");
                unlink(frames, follower, axis, releaser);
            }
        }
    }
    Ok(target)
}

/// Wires up a prepared link. A fresh link saves the frame's view and hands
/// its regions to the reference; a re-pointed one already did both.
fn attach(frames: &mut Frames, frame: FileId, reference: FileId, axis: MatchingAxis, prepared: Prepared, fresh: bool) {
    let Some((ref_center, ref_zoom, ref_render)) = frames
        .get(reference)
        .map(|r| (r.center, r.zoom, r.render_config.clone()))
    else {
        return;
    };
    let Some(f) = frames.get_mut(frame) else {
        return;
    };
    f.link_mut(axis).reference = Some(reference);
    let mut migrating = None;
    match prepared {
        Prepared::Spatial(transform) => {
            if fresh {
                f.saved_view = Some(SavedView {
                    center: f.center,
                    zoom: f.zoom,
                    reference_center: ref_center,
                    reference_zoom: ref_zoom,
                });
                migrating = Some((std::mem::take(&mut f.regions), transform));
            }
            f.spatial_transform = Some(transform);
            f.center = transform.inverse(ref_center);
        }
        Prepared::Spectral(channel) => {
            f.required_channel = f.sanitize_channel(channel);
        }
        Prepared::Raster => f.render_config.update_from(&ref_render),
    }

    if let Some(r) = frames.get_mut(reference) {
        let link = r.link_mut(axis);
        if !link.secondaries.contains(&frame) {
            link.secondaries.push(frame);
        }
        if let Some((mut regions, transform)) = migrating {
            regions.migrate_into(&mut r.regions, frame, &transform);
            if let Some(f) = frames.get_mut(frame) {
                f.regions = regions;
            }
        }
    }
}

/// Stops `frame` following its reference on `axis`. Returns the former
/// reference.
pub fn unlink(
    frames: &mut Frames,
    frame: FileId,
    axis: MatchingAxis,
    releaser: &mut dyn ResourceReleaser,
) -> Option<FileId> {
    let reference = frames.get(frame)?.reference(axis)?;
    let reference_view = frames.get_mut(reference).map(|r| {
        r.link_mut(axis).secondaries.retain(|s| *s != frame);
        (r.center, r.zoom)
    });
    let f = frames.get_mut(frame)?;
    f.link_mut(axis).reference = None;

    if axis == MatchingAxis::Spatial {
        let transform = f.spatial_transform.take();
        let saved = f.saved_view.take();
        if let Some((ref_center, ref_zoom)) = reference_view {
            match saved {
                Some(saved) if saved.reference_center == ref_center && saved.reference_zoom == ref_zoom => {
                    f.center = saved.center;
                    f.zoom = saved.zoom;
                }
                _ => {
                    if let Some(t) = transform {
                        f.center = t.inverse(ref_center);
                    }
                    f.zoom = ref_zoom;
                }
            }
        }
        for other in std::mem::take(&mut f.control_maps) {
            releaser.release_control_map(frame, other);
        }
        if let Some(t) = transform {
            let mut regions = std::mem::take(&mut f.regions);
            if let Some(r) = frames.get_mut(reference) {
                regions.restore_from(&mut r.regions, frame, &t);
            }
            if let Some(f) = frames.get_mut(frame) {
                f.regions = regions;
            }
        }
    }
    info!(%frame, %reference, %axis, "frame unmatched");
    Some(reference)
}

/// Frames that move together with `frame` on `axis`, `frame` excluded.
pub fn siblings(frames: &Frames, frame: FileId, axis: MatchingAxis) -> Vec<FileId> {
    let Some(f) = frames.get(frame) else {
        return Vec::new();
    };
    match f.reference(axis) {
        Some(reference) => {
            let others = frames
                .get(reference)
                .map(|r| r.link(axis).secondaries.clone())
                .unwrap_or_default();
            std::iter::once(reference)
                .chain(others.into_iter().filter(|s| *s != frame))
                .collect()
        }
        None => f.link(axis).secondaries.clone(),
    }
}

/// The frame `frame` follows on `axis`, or `frame` itself.
pub fn root(frames: &Frames, frame: FileId, axis: MatchingAxis) -> FileId {
    frames
        .get(frame)
        .and_then(|f| f.reference(axis))
        .unwrap_or(frame)
}

/// Re-centres the spatial secondaries of `reference` on its current centre,
/// re-linearising their transforms there. A secondary whose transform can no
/// longer be built keeps the previous one.
pub fn follow_reference<W: WcsProvider>(frames: &mut Frames, wcs: &W, reference: FileId) {
    let Some(secondaries) = frames.get(reference).map(|r| r.spatial.secondaries.clone()) else {
        return;
    };
    for secondary in secondaries {
        let refreshed = match (frames.get(secondary), frames.get(reference)) {
            (Some(f), Some(r)) => spatial_transform(wcs, f, r),
            _ => continue,
        };
        let Some(ref_center) = frames.get(reference).map(|r| r.center) else {
            return;
        };
        let Some(f) = frames.get_mut(secondary) else {
            continue;
        };
        match refreshed {
            Ok(transform) => f.spatial_transform = Some(transform),
            Err(err) => warn!(frame = %secondary, error = %err, "keeping previous spatial transform"),
        }
        if let Some(transform) = f.spatial_transform {
            f.center = transform.inverse(ref_center);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameInfo;
    use crate::region::RegionKind;
    use crate::resources::LoggingReleaser;
    use crate::wcs::{LinearWcs, LinearWcsProvider, SpectralAxis};

    struct Fixture {
        wcs: LinearWcsProvider,
        frames: Frames,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                wcs: LinearWcsProvider::new(),
                frames: Frames::new(),
            }
        }

        fn open(&mut self, id: i32, cdelt: f64) -> FileId {
            let axis = SpectralAxis {
                crpix: 0.0,
                crval: 1e9,
                cdelt: 1e6,
                rest_frequency: Some(1e9),
            };
            let handle = self.wcs.register(
                LinearWcs::new(Vec2::ZERO, Vec2::ZERO, Vec2::new(cdelt, cdelt)).with_spectral(axis),
            );
            let file = FileId(id);
            let info = FrameInfo::new(file, 256, 256, handle).with_depth(10, handle);
            self.frames.insert(file, FrameState::new(info));
            file
        }

        fn link(&mut self, frame: FileId, reference: FileId, axis: MatchingAxis) -> Result<FileId, MatchError> {
            link(
                &mut self.frames,
                &self.wcs,
                SpectralMatching::VelocityRadio,
                frame,
                reference,
                axis,
                &mut LoggingReleaser,
            )
        }

        fn unlink(&mut self, frame: FileId, axis: MatchingAxis) -> Option<FileId> {
            unlink(&mut self.frames, frame, axis, &mut LoggingReleaser)
        }

        fn frame(&self, id: FileId) -> &FrameState {
            self.frames.get(id).unwrap()
        }
    }

    #[test]
    fn link_is_recorded_on_both_ends() {
        let mut fx = Fixture::new();
        let a = fx.open(0, 1.0);
        let b = fx.open(1, 1.0);
        assert_eq!(fx.link(b, a, MatchingAxis::Spatial), Ok(a));
        assert_eq!(fx.frame(b).spatial.reference, Some(a));
        assert_eq!(fx.frame(a).spatial.secondaries, vec![b]);
        assert!(fx.frame(b).spatial_transform.is_some());

        assert_eq!(fx.unlink(b, MatchingAxis::Spatial), Some(a));
        assert_eq!(fx.frame(b).spatial.reference, None);
        assert!(fx.frame(a).spatial.secondaries.is_empty());
        assert!(fx.frame(b).spatial_transform.is_none());
    }

    #[test]
    fn self_link_fails_and_clears_existing_link() {
        let mut fx = Fixture::new();
        let a = fx.open(0, 1.0);
        let b = fx.open(1, 1.0);
        fx.link(b, a, MatchingAxis::Raster).unwrap();
        assert_eq!(fx.link(b, b, MatchingAxis::Raster), Err(MatchError::SelfReference(b)));
        assert_eq!(fx.frame(b).raster.reference, None);
        assert!(fx.frame(a).raster.secondaries.is_empty());
    }

    #[test]
    fn refused_link_leaves_frames_untouched() {
        let mut fx = Fixture::new();
        let a = fx.open(0, 1.0);
        let b = fx.open(1, 1.0);
        fx.frames.get_mut(b).unwrap().info.square_pixels = false;
        let before = fx.frame(b).center;
        assert!(matches!(
            fx.link(b, a, MatchingAxis::Spatial),
            Err(MatchError::NonSquarePixels { .. })
        ));
        assert_eq!(fx.frame(b).spatial.reference, None);
        assert_eq!(fx.frame(b).center, before);
        assert!(fx.frame(a).spatial.secondaries.is_empty());

        fx.frames.get_mut(b).unwrap().info.square_pixels = true;
        fx.frames.get_mut(b).unwrap().info.valid_wcs = false;
        assert!(matches!(
            fx.link(b, a, MatchingAxis::Spatial),
            Err(MatchError::WcsValidityMismatch { .. })
        ));
    }

    #[test]
    fn spectral_link_needs_a_cube() {
        let mut fx = Fixture::new();
        let a = fx.open(0, 1.0);
        let b = fx.open(1, 1.0);
        fx.frames.get_mut(a).unwrap().info.depth = 1;
        assert_eq!(
            fx.link(b, a, MatchingAxis::Spectral),
            Err(MatchError::MissingSpectralAxis(a))
        );
    }

    #[test]
    fn spectral_link_sets_matched_channel() {
        let mut fx = Fixture::new();
        let a = fx.open(0, 1.0);
        let b = fx.open(1, 1.0);
        fx.frames.get_mut(a).unwrap().required_channel = 6;
        fx.link(b, a, MatchingAxis::Spectral).unwrap();
        assert_eq!(fx.frame(b).required_channel, 6);
    }

    #[test]
    fn chains_collapse_into_a_star() {
        let mut fx = Fixture::new();
        let a = fx.open(0, 1.0);
        let b = fx.open(1, 1.0);
        let c = fx.open(2, 1.0);
        fx.link(b, a, MatchingAxis::Spectral).unwrap();
        assert_eq!(fx.link(c, b, MatchingAxis::Spectral), Ok(a));
        assert_eq!(fx.frame(a).spectral.secondaries, vec![b, c]);
        assert_eq!(siblings(&fx.frames, c, MatchingAxis::Spectral), vec![a, b]);
        assert_eq!(siblings(&fx.frames, a, MatchingAxis::Spectral), vec![b, c]);
    }

    #[test]
    fn linking_a_reference_moves_its_secondaries() {
        let mut fx = Fixture::new();
        let a = fx.open(0, 1.0);
        let b = fx.open(1, 1.0);
        let c = fx.open(2, 1.0);
        fx.link(c, b, MatchingAxis::Spatial).unwrap();
        fx.link(b, a, MatchingAxis::Spatial).unwrap();
        assert_eq!(fx.frame(c).spatial.reference, Some(a));
        assert!(fx.frame(b).spatial.secondaries.is_empty());
        assert_eq!(fx.frame(a).spatial.secondaries, vec![b, c]);
    }

    #[test]
    fn linking_the_root_to_its_secondary_swaps_them() {
        let mut fx = Fixture::new();
        let a = fx.open(0, 1.0);
        let b = fx.open(1, 1.0);
        fx.link(b, a, MatchingAxis::Raster).unwrap();
        assert_eq!(fx.link(a, b, MatchingAxis::Raster), Ok(b));
        assert_eq!(fx.frame(a).raster.reference, Some(b));
        assert_eq!(fx.frame(b).raster.reference, None);
        assert_eq!(fx.frame(b).raster.secondaries, vec![a]);
    }

    #[test]
    fn unlink_restores_view_when_reference_did_not_move() {
        let mut fx = Fixture::new();
        let a = fx.open(0, 1.0);
        let b = fx.open(1, 0.5);
        {
            let f = fx.frames.get_mut(b).unwrap();
            f.center = Vec2::new(10.0, 20.0);
            f.zoom = 3.0;
        }
        let region = fx
            .frames
            .get_mut(b)
            .unwrap()
            .regions
            .add(RegionKind::Rectangle, vec![Vec2::new(40.0, 40.0)], 0.0);
        let before = fx.frame(b).regions.clone();

        fx.link(b, a, MatchingAxis::Spatial).unwrap();
        assert!(fx.frame(b).regions.is_empty());
        assert_eq!(fx.frame(a).regions.len(), 1);

        fx.unlink(b, MatchingAxis::Spatial);
        assert_eq!(fx.frame(b).center, Vec2::new(10.0, 20.0));
        assert_eq!(fx.frame(b).zoom, 3.0);
        assert_eq!(fx.frame(b).regions.get(region), before.get(region));
        assert!(fx.frame(a).regions.is_empty());
    }

    #[test]
    fn unlink_adopts_matched_view_after_reference_moved() {
        let mut fx = Fixture::new();
        let a = fx.open(0, 1.0);
        let b = fx.open(1, 0.5);
        fx.link(b, a, MatchingAxis::Spatial).unwrap();
        {
            let r = fx.frames.get_mut(a).unwrap();
            r.center = Vec2::new(30.0, 30.0);
            r.zoom = 2.0;
        }
        follow_reference(&mut fx.frames, &fx.wcs, a);
        assert!(fx.frame(b).center.distance(Vec2::new(60.0, 60.0)) < 1e-9);

        fx.unlink(b, MatchingAxis::Spatial);
        assert!(fx.frame(b).center.distance(Vec2::new(60.0, 60.0)) < 1e-9);
        assert_eq!(fx.frame(b).zoom, 2.0);
    }

    #[test]
    fn unlink_releases_control_maps() {
        struct Counting(Vec<(FileId, FileId)>);
        impl ResourceReleaser for Counting {
            fn release_control_map(&mut self, owner: FileId, other: FileId) {
                self.0.push((owner, other));
            }
        }

        let mut fx = Fixture::new();
        let a = fx.open(0, 1.0);
        let b = fx.open(1, 1.0);
        fx.link(b, a, MatchingAxis::Spatial).unwrap();
        fx.frames.get_mut(b).unwrap().control_maps.insert(a);
        let mut releaser = Counting(Vec::new());
        unlink(&mut fx.frames, b, MatchingAxis::Spatial, &mut releaser);
        assert_eq!(releaser.0, vec![(b, a)]);
        assert!(fx.frame(b).control_maps.is_empty());
    }
}
