//! Required channel/stokes changes and their spectral propagation.

use foundation::ids::FileId;
use tracing::debug;

use crate::axis::MatchingAxis;
use crate::frame::{FrameState, Frames};
use crate::reference::siblings;
use crate::wcs::{SpectralMatching, WcsProvider};

/// Sets the required plane of one frame. Returns whether it changed.
///
/// A stokes change drops the cube histogram: its bounds describe another
/// polarization.
pub fn apply_channels(frame: &mut FrameState, channel: f64, stokes: i32) -> bool {
    let channel = frame.sanitize_channel(channel);
    let stokes = frame.sanitize_stokes(stokes);
    if stokes != frame.required_stokes {
        frame.render_config.use_channel_histogram();
    }
    let changed = channel != frame.required_channel || stokes != frame.required_stokes;
    frame.required_channel = channel;
    frame.required_stokes = stokes;
    changed
}

/// Sets the required plane of `id` and, with `propagate`, moves every
/// spectral sibling to the matching channel (keeping its own stokes).
///
/// Returns the frames that were updated, `id` first. Siblings without a
/// channel mapping are left alone.
pub fn set_channels<W: WcsProvider>(
    frames: &mut Frames,
    wcs: &W,
    matching: SpectralMatching,
    id: FileId,
    channel: f64,
    stokes: i32,
    propagate: bool,
) -> Vec<FileId> {
    let Some(frame) = frames.get_mut(id) else {
        return Vec::new();
    };
    apply_channels(frame, channel, stokes);
    let source = frame.info.spectral_wcs;
    let required = f64::from(frame.required_channel);

    let mut touched = vec![id];
    if !propagate {
        return touched;
    }
    for sibling in siblings(frames, id, MatchingAxis::Spectral) {
        let Some(target) = frames.get_mut(sibling) else {
            continue;
        };
        let mapped = match (source, target.info.spectral_wcs) {
            (Some(src), Some(dst)) => wcs.transformed_channel(src, dst, matching, required),
            _ => continue,
        };
        match mapped {
            Ok(channel) => {
                let stokes = target.required_stokes as i32;
                apply_channels(target, channel, stokes);
                touched.push(sibling);
            }
            Err(err) => debug!(frame = %sibling, error = %err, "no matching channel"),
        }
    }
    touched
}

/// Steps through channels and polarizations by the given deltas, wrapping
/// around or stopping at the ends.
pub fn increment_channels<W: WcsProvider>(
    frames: &mut Frames,
    wcs: &W,
    matching: SpectralMatching,
    id: FileId,
    d_channel: i32,
    d_stokes: i32,
    wrap: bool,
) -> Vec<FileId> {
    let Some(frame) = frames.get(id) else {
        return Vec::new();
    };
    let depth = i64::from(frame.info.depth.max(1));
    let polarizations = frame.info.polarizations();
    let count = polarizations.len().max(1) as i64;
    let index = polarizations
        .iter()
        .position(|p| *p == frame.required_stokes)
        .unwrap_or(0) as i64;
    let channel = i64::from(frame.required_channel) + i64::from(d_channel);
    let index = index + i64::from(d_stokes);

    let (channel, index) = if wrap {
        (channel.rem_euclid(depth), index.rem_euclid(count))
    } else {
        (channel.clamp(0, depth - 1), index.clamp(0, count - 1))
    };
    let stokes = polarizations.get(index as usize).copied().unwrap_or(0);
    set_channels(frames, wcs, matching, id, channel as f64, stokes as i32, true)
}
