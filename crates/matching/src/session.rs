//! The session ties frames, their links and the backend together.
//!
//! Every mutating call updates frame state synchronously, recomputes the
//! views that depend on it and queues the resulting backend requests. Nothing
//! is sent until [`Session::advance`] moves virtual time past a throttle
//! window or the requirements tick.

use std::collections::{BTreeMap, BTreeSet};

use foundation::bounds::Aabb2;
use foundation::ids::{FileId, RegionId};
use foundation::math::Vec2;
use foundation::time::Time;
use foundation::view::FrameView;
use requirements::{CursorWindow, RegionShape, RequirementContext, RequirementsEngine, Widget, WidgetId, WidgetSet};
use runtime::{Derived, Event, EventBus, Scheduler, Task, VirtualClock};
use serde::Serialize;
use streaming::coordinator::{ChannelUpdate, CursorUpdate, DueRequests, RequestCoordinator, ViewUpdate};
use streaming::protocol::{AnimationFrame, CursorMode, compression_quality};
use streaming::tile::TilePlan;
use streaming::transport::Transport;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::axis::MatchingAxis;
use crate::channels;
use crate::config::{SessionConfig, ZoomPoint};
use crate::frame::{FrameInfo, FrameSnapshot, FrameState, Frames, RenderSize};
use crate::planner;
use crate::reference::{self, MatchError};
use crate::region::RegionKind;
use crate::render::RenderConfig;
use crate::resources::{LoggingReleaser, ResourceReleaser};
use crate::wcs::{SpectralMatching, WcsProvider};

/// Scheduler id of the requirements reconciliation tick.
pub const REQUIREMENTS_TASK: &str = "requirements";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0} is already open")]
    DuplicateFile(FileId),
    #[error("{0} is not open")]
    UnknownFrame(FileId),
    #[error("no frame is active")]
    NoActiveFrame,
    #[error(transparent)]
    Match(#[from] MatchError),
}

/// Things the UI layer should hear about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    MatchingRefused {
        frame: FileId,
        reference: FileId,
        axis: MatchingAxis,
        reason: String,
    },
    ReferenceChanged {
        axis: MatchingAxis,
        reference: FileId,
    },
    /// The session reference closed; `to` took over, or nothing did.
    ReferencePromoted {
        axis: MatchingAxis,
        from: FileId,
        to: Option<FileId>,
    },
    ControlMapReleased {
        owner: FileId,
        other: FileId,
    },
}

/// Forwards releases and remembers them for the event log.
struct TrackingReleaser<'a> {
    inner: &'a mut dyn ResourceReleaser,
    released: Vec<(FileId, FileId)>,
}

impl ResourceReleaser for TrackingReleaser<'_> {
    fn release_control_map(&mut self, owner: FileId, other: FileId) {
        self.inner.release_control_map(owner, other);
        self.released.push((owner, other));
    }
}

/// Read-only session state handed to the requirements engine.
struct SessionContext<'a> {
    frames: &'a Frames,
    views: &'a Derived<FileId, FrameView>,
    active: Option<FileId>,
    cursor_frozen: bool,
    tile_size: u32,
}

impl RequirementContext for SessionContext<'_> {
    fn active_file(&self) -> Option<FileId> {
        self.active
    }

    fn has_file(&self, file: FileId) -> bool {
        self.frames.contains(file)
    }

    fn region_shape(&self, file: FileId, region: RegionId) -> Option<RegionShape> {
        if !self.frames.contains(file) {
            return None;
        }
        // Spatially matched frames share their reference's regions.
        let owner = reference::root(self.frames, file, MatchingAxis::Spatial);
        self.frames.get(owner)?.regions.shape(region)
    }

    fn cursor_window(&self, file: FileId) -> Option<CursorWindow> {
        let frame = self.frames.get(file)?;
        Some(CursorWindow {
            view: self.views.get(file).copied().unwrap_or(FrameView::DUMMY),
            width: frame.info.width,
            height: frame.info.height,
            max_mip: planner::max_mip(frame.info.width, self.tile_size),
        })
    }

    fn cursor_frozen(&self) -> bool {
        self.cursor_frozen
    }

    fn matched_files(&self, file: FileId) -> Vec<FileId> {
        let spatial = reference::root(self.frames, file, MatchingAxis::Spatial);
        let spectral = reference::root(self.frames, file, MatchingAxis::Spectral);
        self.frames
            .keys()
            .iter()
            .copied()
            .filter(|other| {
                reference::root(self.frames, *other, MatchingAxis::Spatial) == spatial
                    && reference::root(self.frames, *other, MatchingAxis::Spectral) == spectral
            })
            .collect()
    }
}

fn compute_view(frames: &Frames, values: &BTreeMap<FileId, FrameView>, id: FileId, low_bandwidth: bool) -> FrameView {
    let Some(frame) = frames.get(id) else {
        return FrameView::DUMMY;
    };
    match frame.spatial.reference.and_then(|r| frames.get(r).map(|f| (r, f))) {
        Some((r, reference)) => {
            let reference_view = values
                .get(&r)
                .copied()
                .unwrap_or_else(|| planner::own_view(reference, low_bandwidth));
            planner::matched_view(frame, reference, &reference_view, low_bandwidth)
        }
        None => planner::own_view(frame, low_bandwidth),
    }
}

/// One viewer session over a set of open frames.
pub struct Session<T: Transport, W: WcsProvider> {
    config: SessionConfig,
    clock: VirtualClock,
    wcs: W,
    frames: Frames,
    coordinator: RequestCoordinator<T>,
    requirements: RequirementsEngine,
    widgets: WidgetSet,
    scheduler: Scheduler,
    views: Derived<FileId, FrameView>,
    events: EventBus<SessionEvent>,
    releaser: Box<dyn ResourceReleaser>,
    references: BTreeMap<MatchingAxis, FileId>,
    active: Option<FileId>,
    /// Explicit multi-panel layout; `None` shows the active frame only.
    visible: Option<Vec<FileId>>,
    /// Visible frames whose view has been queued at least once.
    announced: BTreeSet<FileId>,
    render_size: RenderSize,
}

impl<T: Transport, W: WcsProvider> Session<T, W> {
    pub fn new(config: SessionConfig, wcs: W, transport: T) -> Self {
        let clock = VirtualClock::new();
        let mut scheduler = Scheduler::new();
        scheduler.add_task(Task::new(REQUIREMENTS_TASK, config.requirements_interval_ms), clock.now());
        let mut coordinator = RequestCoordinator::new(transport, config.streaming.clone());
        if config.low_bandwidth_mode {
            coordinator.set_cursor_mode(CursorMode::LowBandwidth);
        }
        Self {
            clock,
            wcs,
            frames: Frames::new(),
            coordinator,
            requirements: RequirementsEngine::new(),
            widgets: WidgetSet::new(),
            scheduler,
            views: Derived::new(),
            events: EventBus::new(),
            releaser: Box::new(LoggingReleaser),
            references: BTreeMap::new(),
            active: None,
            visible: None,
            announced: BTreeSet::new(),
            render_size: RenderSize::default(),
            config,
        }
    }

    pub fn with_releaser<R: ResourceReleaser + 'static>(mut self, releaser: R) -> Self {
        self.releaser = Box::new(releaser);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn now(&self) -> Time {
        self.clock.now()
    }

    pub fn wcs(&self) -> &W {
        &self.wcs
    }

    /// Coordinate systems of frames opened later are registered here.
    pub fn wcs_mut(&mut self) -> &mut W {
        &mut self.wcs
    }

    pub fn frame(&self, id: FileId) -> Option<&FrameState> {
        self.frames.get(id)
    }

    pub fn frames(&self) -> &Frames {
        &self.frames
    }

    pub fn frame_snapshot(&self, id: FileId) -> Option<FrameSnapshot> {
        self.frames.get(id).map(FrameSnapshot::from)
    }

    pub fn active_frame(&self) -> Option<FileId> {
        self.active
    }

    /// Session-wide reference on `axis`.
    pub fn reference(&self, axis: MatchingAxis) -> Option<FileId> {
        self.references.get(&axis).copied()
    }

    pub fn visible_frames(&self) -> Vec<FileId> {
        match &self.visible {
            Some(list) => list.iter().copied().filter(|f| self.frames.contains(*f)).collect(),
            None => self.active.into_iter().collect(),
        }
    }

    pub fn required_frame_view(&self, id: FileId) -> FrameView {
        match self.views.get(id) {
            Some(view) => *view,
            None => planner::required_frame_view(&self.frames, id, self.config.low_bandwidth_mode),
        }
    }

    pub fn required_tiles(&self, id: FileId) -> Option<TilePlan> {
        let frame = self.frames.get(id)?;
        let view = self.required_frame_view(id);
        Some(planner::plan_tiles(frame, &view, self.config.streaming.tile_size))
    }

    pub fn events(&self) -> &[Event<SessionEvent>] {
        self.events.events()
    }

    pub fn drain_events(&mut self) -> Vec<Event<SessionEvent>> {
        self.events.drain()
    }

    pub fn widgets(&self) -> &WidgetSet {
        &self.widgets
    }

    pub fn coordinator(&self) -> &RequestCoordinator<T> {
        &self.coordinator
    }

    pub fn transport(&self) -> &T {
        self.coordinator.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.coordinator.transport_mut()
    }

    pub fn into_transport(self) -> T {
        self.coordinator.into_transport()
    }

    pub fn is_animating(&self) -> bool {
        self.coordinator.playback().is_some()
    }

    pub fn open_frame(&mut self, info: FrameInfo) -> Result<FileId, SessionError> {
        let id = info.file_id;
        if self.frames.contains(id) {
            return Err(SessionError::DuplicateFile(id));
        }
        let mut frame = FrameState::new(info);
        frame.render_size = self.render_size;
        let has_spectral = frame.info.depth > 1 && frame.info.spectral_wcs.is_some();
        self.frames.insert(id, frame);
        self.views.graph_mut().add_node(id);

        let now = self.clock.now();
        for axis in MatchingAxis::ALL {
            if self.references.contains_key(&axis) || (axis == MatchingAxis::Spectral && !has_spectral) {
                continue;
            }
            self.references.insert(axis, id);
            self.events.emit(now, SessionEvent::ReferenceChanged { axis, reference: id });
        }
        for axis in self.config.auto_match.clone() {
            if let Some(reference) = self.reference(axis).filter(|r| *r != id) {
                // Refusals are reported through the event log.
                let _ = self.link_frame(id, reference, axis);
            }
        }

        self.active = Some(id);
        self.update_cursor_mode();
        info!(file = %id, "frame opened");
        self.sync();
        Ok(id)
    }

    /// Closes a frame, unlinking everything that referred to it. Session
    /// references held by the frame pass to the first remaining frame that
    /// can carry them, and the frames that followed it follow that one.
    pub fn close_frame(&mut self, id: FileId) -> Result<(), SessionError> {
        if !self.frames.contains(id) {
            return Err(SessionError::UnknownFrame(id));
        }
        if self.coordinator.playback().is_some_and(|p| p.file_id == id) {
            self.stop_animation();
        }

        let mut followers: BTreeMap<MatchingAxis, Vec<FileId>> = BTreeMap::new();
        for axis in MatchingAxis::ALL {
            self.unlink_frame(id, axis);
            let secondaries = self
                .frames
                .get(id)
                .map(|f| f.link(axis).secondaries.clone())
                .unwrap_or_default();
            for secondary in &secondaries {
                self.unlink_frame(*secondary, axis);
            }
            followers.insert(axis, secondaries);
        }

        let mut released = Vec::new();
        if let Some(frame) = self.frames.get_mut(id) {
            released.extend(std::mem::take(&mut frame.control_maps).into_iter().map(|other| (id, other)));
        }
        let holders: Vec<FileId> = self
            .frames
            .iter()
            .filter(|(_, f)| f.control_maps.contains(&id))
            .map(|(k, _)| k)
            .collect();
        for holder in holders {
            if let Some(frame) = self.frames.get_mut(holder) {
                frame.control_maps.remove(&id);
            }
            released.push((holder, id));
        }
        for (owner, other) in &released {
            self.releaser.release_control_map(*owner, *other);
        }
        self.record_releases(released);

        self.requirements.forget_file(id);
        self.widgets.release_file(id);
        self.coordinator.close_file(id);
        self.views.remove(id);
        self.frames.remove(id);
        self.announced.remove(&id);
        if let Some(list) = self.visible.as_mut() {
            list.retain(|f| *f != id);
        }
        if self.active == Some(id) {
            self.active = self.frames.first_key();
            self.update_cursor_mode();
        }

        for axis in MatchingAxis::ALL {
            if self.reference(axis) != Some(id) {
                continue;
            }
            let promoted = self
                .frames
                .iter()
                .find(|(_, f)| axis != MatchingAxis::Spectral || (f.info.depth > 1 && f.info.spectral_wcs.is_some()))
                .map(|(k, _)| k);
            match promoted {
                Some(next) => {
                    self.references.insert(axis, next);
                    for follower in followers.remove(&axis).unwrap_or_default() {
                        if follower != next {
                            let _ = self.link_frame(follower, next, axis);
                        }
                    }
                }
                None => {
                    self.references.remove(&axis);
                }
            }
            info!(%axis, from = %id, to = ?promoted, "session reference promoted");
            self.events.emit(
                self.clock.now(),
                SessionEvent::ReferencePromoted {
                    axis,
                    from: id,
                    to: promoted,
                },
            );
        }

        info!(file = %id, "frame closed");
        self.touch_all();
        self.sync();
        Ok(())
    }

    /// Makes `id` the active frame. Requests still queued for the previous
    /// active frame go out immediately.
    pub fn set_active_frame(&mut self, id: FileId) -> Result<(), SessionError> {
        if !self.frames.contains(id) {
            return Err(SessionError::UnknownFrame(id));
        }
        if self.active == Some(id) {
            return Ok(());
        }
        if let Some(previous) = self.active {
            let due = self.coordinator.flush_file(previous);
            self.dispatch(due);
        }
        self.active = Some(id);
        self.update_cursor_mode();
        self.sync();
        Ok(())
    }

    /// Multi-panel layout. `None` goes back to showing the active frame.
    pub fn set_visible_frames(&mut self, frames: Option<Vec<FileId>>) {
        self.visible = frames.map(|list| list.into_iter().filter(|f| self.frames.contains(*f)).collect());
        self.sync();
    }

    pub fn set_render_size(&mut self, width: f64, height: f64, pixel_ratio: f64) {
        self.render_size = RenderSize {
            width,
            height,
            pixel_ratio,
        };
        let ids = self.frames.keys().to_vec();
        for id in ids {
            if let Some(frame) = self.frames.get_mut(id) {
                frame.render_size = self.render_size;
            }
        }
        self.touch_all();
        self.sync();
    }

    /// Centres the view on `point` (pixels of `id`). Matched frames move
    /// their reference, which carries every sibling along.
    pub fn set_center(&mut self, id: FileId, point: Vec2) -> Result<(), SessionError> {
        let (root, point) = self.to_spatial_root(id, point)?;
        if !point.is_finite() {
            return Ok(());
        }
        if let Some(frame) = self.frames.get_mut(root) {
            frame.center = point;
        }
        self.after_view_change(root);
        Ok(())
    }

    /// Sets the zoom of `id`. A matched frame converts the zoom into its
    /// reference's pixels unless `absolute` is set.
    pub fn set_zoom(&mut self, id: FileId, zoom: f64, absolute: bool) -> Result<(), SessionError> {
        let (root, zoom) = self.zoom_for_root(id, zoom, absolute)?;
        if !zoom.is_finite() {
            return Ok(());
        }
        if let Some(frame) = self.frames.get_mut(root) {
            frame.zoom = zoom;
        }
        self.after_view_change(root);
        Ok(())
    }

    /// Zooms keeping `point` fixed on screen (or the centre, depending on
    /// the configured zoom point).
    pub fn zoom_to_point(&mut self, id: FileId, point: Vec2, zoom: f64, absolute: bool) -> Result<(), SessionError> {
        let (root, point) = self.to_spatial_root(id, point)?;
        let (_, zoom) = self.zoom_for_root(id, zoom, absolute)?;
        if !zoom.is_finite() || zoom <= 0.0 || !point.is_finite() {
            return Ok(());
        }
        let zoom_point = self.config.zoom_point;
        if let Some(frame) = self.frames.get_mut(root) {
            if zoom_point == ZoomPoint::Cursor && frame.zoom > 0.0 {
                frame.center = point + (frame.center - point) * (frame.zoom / zoom);
            }
            frame.zoom = zoom;
        }
        self.after_view_change(root);
        Ok(())
    }

    /// Fits the whole image of `id` on screen. A matched frame boxes its
    /// transformed corners in reference pixels and zooms the reference so the
    /// box fits.
    pub fn fit_zoom(&mut self, id: FileId) -> Result<(), SessionError> {
        let frame = self.frames.get(id).ok_or(SessionError::UnknownFrame(id))?;
        let center = frame.image_center();
        let (zoom, absolute) = match (frame.spatial.reference, frame.spatial_transform) {
            (Some(_), Some(t)) => {
                let (w, h) = (f64::from(frame.info.width), f64::from(frame.info.height));
                let corners = [Vec2::new(0.0, 0.0), Vec2::new(0.0, h), Vec2::new(w, h), Vec2::new(w, 0.0)];
                let Some(bounds) = Aabb2::from_points(corners.map(|c| t.forward(c))) else {
                    return Ok(());
                };
                let RenderSize {
                    width,
                    height,
                    pixel_ratio,
                } = self.render_size;
                let zoom = (width * pixel_ratio / bounds.width()).min(height * pixel_ratio / bounds.height());
                (zoom, true)
            }
            _ => (frame.zoom_level_for_fit(), false),
        };
        if !(zoom.is_finite() && zoom > 0.0) {
            return Ok(());
        }
        self.set_zoom(id, zoom, absolute)?;
        self.set_center(id, center)
    }

    pub fn set_cursor(&mut self, id: FileId, point: Vec2) -> Result<(), SessionError> {
        let frame = self.frames.get_mut(id).ok_or(SessionError::UnknownFrame(id))?;
        if !point.is_finite() {
            return Ok(());
        }
        frame.cursor = Some(point);
        self.coordinator
            .submit_cursor(self.clock.now(), CursorUpdate { file_id: id, point });
        Ok(())
    }

    /// Sets the required plane of `id`; with `propagate` spectral siblings
    /// follow. Returns the frames whose required plane was set.
    pub fn set_channels(
        &mut self,
        id: FileId,
        channel: f64,
        stokes: i32,
        propagate: bool,
    ) -> Result<Vec<FileId>, SessionError> {
        if !self.frames.contains(id) {
            return Err(SessionError::UnknownFrame(id));
        }
        let touched = channels::set_channels(
            &mut self.frames,
            &self.wcs,
            self.config.spectral_matching,
            id,
            channel,
            stokes,
            propagate,
        );
        self.sync();
        Ok(touched)
    }

    pub fn increment_channels(
        &mut self,
        id: FileId,
        d_channel: i32,
        d_stokes: i32,
        wrap: bool,
    ) -> Result<Vec<FileId>, SessionError> {
        if !self.frames.contains(id) {
            return Err(SessionError::UnknownFrame(id));
        }
        let touched = channels::increment_channels(
            &mut self.frames,
            &self.wcs,
            self.config.spectral_matching,
            id,
            d_channel,
            d_stokes,
            wrap,
        );
        self.sync();
        Ok(touched)
    }

    pub fn set_spatial_reference(&mut self, id: FileId) -> Result<(), SessionError> {
        self.set_reference(MatchingAxis::Spatial, id)
    }

    pub fn set_spectral_reference(&mut self, id: FileId) -> Result<(), SessionError> {
        self.set_reference(MatchingAxis::Spectral, id)
    }

    pub fn set_raster_scaling_reference(&mut self, id: FileId) -> Result<(), SessionError> {
        self.set_reference(MatchingAxis::Raster, id)
    }

    /// Moves the session reference on `axis` to `id` and re-points every
    /// frame that followed the old one. If `id` itself followed the old
    /// reference, the two swap places.
    pub fn set_reference(&mut self, axis: MatchingAxis, id: FileId) -> Result<(), SessionError> {
        let frame = self.frames.get(id).ok_or(SessionError::UnknownFrame(id))?;
        if axis == MatchingAxis::Spectral && (frame.info.depth <= 1 || frame.info.spectral_wcs.is_none()) {
            return Err(MatchError::MissingSpectralAxis(id).into());
        }
        let previous = self.reference(axis);
        if previous == Some(id) {
            return Ok(());
        }
        self.references.insert(axis, id);
        info!(%axis, reference = %id, "session reference changed");
        self.events
            .emit(self.clock.now(), SessionEvent::ReferenceChanged { axis, reference: id });

        if let Some(previous) = previous {
            let matched = self
                .frames
                .get(previous)
                .map(|f| f.link(axis).secondaries.clone())
                .unwrap_or_default();
            let swapped = matched.contains(&id) && self.link_frame(previous, id, axis).is_ok();
            if !swapped {
                self.unlink_frame(id, axis);
                for frame in matched.into_iter().filter(|f| *f != id) {
                    let _ = self.link_frame(frame, id, axis);
                }
            }
        }
        self.sync();
        Ok(())
    }

    /// Makes `frame` follow `reference` on `axis` directly, bypassing the
    /// session reference. Returns the frame actually followed.
    pub fn link(&mut self, frame: FileId, reference: FileId, axis: MatchingAxis) -> Result<FileId, SessionError> {
        let target = self.link_frame(frame, reference, axis)?;
        self.sync();
        Ok(target)
    }

    pub fn unlink(&mut self, frame: FileId, axis: MatchingAxis) -> Option<FileId> {
        let former = self.unlink_frame(frame, axis);
        self.sync();
        former
    }

    /// Makes `id` follow (or stop following) the session reference on `axis`.
    pub fn set_matching_enabled(&mut self, id: FileId, axis: MatchingAxis, enabled: bool) -> Result<(), SessionError> {
        if !self.frames.contains(id) {
            return Err(SessionError::UnknownFrame(id));
        }
        if enabled {
            let reference = self.reference(axis).ok_or(MatchError::NoReference(id))?;
            if reference == id {
                return Err(MatchError::SelfReference(id).into());
            }
            self.link_frame(id, reference, axis)?;
        } else {
            self.unlink_frame(id, axis);
        }
        self.sync();
        Ok(())
    }

    /// Switches the spectral convention and re-links every spectral
    /// secondary under it.
    pub fn set_spectral_matching(&mut self, matching: SpectralMatching) {
        if self.config.spectral_matching == matching {
            return;
        }
        self.config.spectral_matching = matching;
        let links: Vec<(FileId, FileId)> = self
            .frames
            .iter()
            .filter_map(|(id, f)| f.spectral.reference.map(|r| (id, r)))
            .collect();
        for (frame, reference) in links {
            self.unlink_frame(frame, MatchingAxis::Spectral);
            let _ = self.link_frame(frame, reference, MatchingAxis::Spectral);
        }
        self.sync();
    }

    /// Changes the colour mapping of `id`; raster-scaling secondaries follow.
    pub fn set_render_config(&mut self, id: FileId, config: RenderConfig) -> Result<(), SessionError> {
        let frame = self.frames.get_mut(id).ok_or(SessionError::UnknownFrame(id))?;
        frame.render_config = config;
        let config = frame.render_config.clone();
        let secondaries = frame.raster.secondaries.clone();
        for secondary in secondaries {
            if let Some(f) = self.frames.get_mut(secondary) {
                f.render_config.update_from(&config);
            }
        }
        Ok(())
    }

    /// Records that `owner` built a control map against `other`.
    pub fn register_control_map(&mut self, owner: FileId, other: FileId) -> Result<(), SessionError> {
        if !self.frames.contains(other) {
            return Err(SessionError::UnknownFrame(other));
        }
        let frame = self.frames.get_mut(owner).ok_or(SessionError::UnknownFrame(owner))?;
        frame.control_maps.insert(other);
        Ok(())
    }

    /// Adds a region drawn on `file`. Matched frames store it on their
    /// spatial reference, in the reference's pixels.
    pub fn add_region(
        &mut self,
        file: FileId,
        kind: RegionKind,
        control_points: Vec<Vec2>,
        rotation: f64,
    ) -> Result<RegionId, SessionError> {
        let frame = self.frames.get(file).ok_or(SessionError::UnknownFrame(file))?;
        let (owner, points, rotation) = match (frame.spatial.reference, frame.spatial_transform) {
            (Some(reference), Some(t)) => (
                reference,
                control_points.into_iter().map(|p| t.forward(p)).collect(),
                rotation + t.rotation.to_degrees(),
            ),
            _ => (file, control_points, rotation),
        };
        let owner = self.frames.get_mut(owner).ok_or(SessionError::UnknownFrame(owner))?;
        Ok(owner.regions.add(kind, points, rotation))
    }

    pub fn remove_region(&mut self, file: FileId, region: RegionId) -> bool {
        let owner = reference::root(&self.frames, file, MatchingAxis::Spatial);
        self.frames
            .get_mut(owner)
            .and_then(|f| f.regions.remove(region))
            .is_some()
    }

    pub fn add_widget(&mut self, widget: Widget) -> WidgetId {
        self.widgets.add(widget)
    }

    pub fn remove_widget(&mut self, id: WidgetId) -> Option<Widget> {
        self.widgets.remove(id)
    }

    pub fn widget_mut(&mut self, id: WidgetId) -> Option<&mut Widget> {
        self.widgets.get_mut(id)
    }

    /// Starts backend-driven playback of the active frame.
    pub fn start_animation(&mut self) -> Result<(), SessionError> {
        let active = self.active.ok_or(SessionError::NoActiveFrame)?;
        self.coordinator.start_playback(active);
        info!(file = %active, "animation started");
        Ok(())
    }

    pub fn stop_animation(&mut self) {
        if let Some(playback) = self.coordinator.playback() {
            self.coordinator.stop_playback();
            info!(file = %playback.file_id, "animation stopped");
            self.sync();
        }
    }

    /// A streamed tile arrived. During playback of `file` this acknowledges
    /// the frame and moves `file` (and its spectral siblings) to it.
    pub fn on_tile_received(&mut self, file: FileId, channel: u32, stokes: u32) -> bool {
        let now = self.clock.now();
        if !self
            .coordinator
            .on_tile_received(now, file, AnimationFrame { channel, stokes })
        {
            return false;
        }
        if let Some(frame) = self.frames.get_mut(file) {
            frame.channel = channel;
            frame.stokes = stokes;
        }
        channels::set_channels(
            &mut self.frames,
            &self.wcs,
            self.config.spectral_matching,
            file,
            f64::from(channel),
            stokes as i32,
            true,
        );
        self.sync();
        true
    }

    /// Moves virtual time forward, firing throttle windows and the
    /// requirements tick in time order.
    pub fn advance(&mut self, ms: u64) {
        let target = self.clock.now().after(ms);
        loop {
            let next = [self.coordinator.next_deadline(), self.scheduler.next_due()]
                .into_iter()
                .flatten()
                .min();
            match next {
                Some(t) if t <= target => {
                    self.clock.advance_to(t);
                    self.run_due();
                }
                _ => break,
            }
        }
        self.clock.advance_to(target);
    }

    /// Runs one requirements reconciliation right away.
    pub fn reconcile_requirements(&mut self) {
        let ctx = SessionContext {
            frames: &self.frames,
            views: &self.views,
            active: self.active,
            cursor_frozen: self.config.cursor_frozen,
            tile_size: self.config.streaming.tile_size,
        };
        let records = self.requirements.reconcile(&self.widgets, &ctx);
        self.coordinator.send_requirements(records);
    }

    fn run_due(&mut self) {
        let now = self.clock.now();
        let due = self.coordinator.poll(now);
        self.dispatch(due);
        for task in self.scheduler.due_tasks(now) {
            if task == REQUIREMENTS_TASK {
                self.reconcile_requirements();
            }
        }
    }

    fn dispatch(&mut self, due: DueRequests) {
        if due.is_empty() {
            return;
        }
        let now = self.clock.now();
        debug!(
            views = due.views.len(),
            channels = due.channels.len(),
            cursor = due.cursor.is_some(),
            "dispatching"
        );
        if !due.views.is_empty() {
            self.coordinator.dispatch_views(now, due.views);
        }
        for update in due.channels {
            self.apply_channel_update(update);
        }
        if let Some(cursor) = due.cursor {
            self.coordinator.dispatch_cursor(cursor);
        }
    }

    /// The displayed plane catches up with the required one. Visible frames
    /// ask for their tiles in the same request.
    fn apply_channel_update(&mut self, update: ChannelUpdate) {
        let Some(frame) = self.frames.get_mut(update.file_id) else {
            return;
        };
        frame.channel = update.channel;
        frame.stokes = update.stokes;
        let tiles = if self.visible_frames().contains(&update.file_id) {
            self.view_update(update.file_id)
                .map(|v| (v.plan, v.compression_quality))
        } else {
            None
        };
        self.coordinator.dispatch_channel(update, tiles);
    }

    fn view_update(&self, id: FileId) -> Option<ViewUpdate> {
        let frame = self.frames.get(id)?;
        let root = reference::root(&self.frames, id, MatchingAxis::Spatial);
        if !self.frames.get(root)?.is_renderable() {
            return None;
        }
        let view = *self.views.get(id)?;
        let streaming = &self.config.streaming;
        Some(ViewUpdate {
            file_id: id,
            channel: frame.channel,
            stokes: frame.stokes,
            plan: planner::plan_tiles(frame, &view, streaming.tile_size),
            compression_quality: compression_quality(streaming.image_compression_quality, &frame.info.header_unit),
            animation_quality: compression_quality(streaming.animation_compression_quality, &frame.info.header_unit),
        })
    }

    /// Recomputes stale views and queues what changed.
    fn sync(&mut self) {
        let now = self.clock.now();
        let low_bandwidth = self.config.low_bandwidth_mode;
        let frames = &self.frames;
        let changed = self
            .views
            .refresh(|id, values| compute_view(frames, values, id, low_bandwidth));

        let visible = self.visible_frames();
        let updates: Vec<ViewUpdate> = visible
            .iter()
            .filter(|id| changed.contains(*id) || !self.announced.contains(*id))
            .filter_map(|id| self.view_update(*id))
            .collect();
        for update in &updates {
            self.announced.insert(update.file_id);
        }
        self.announced.retain(|id| visible.contains(id));
        self.coordinator.submit_views(now, updates);

        // The played frame is driven by the backend.
        let playing = self.coordinator.playback().map(|p| p.file_id);
        let channel_updates: Vec<ChannelUpdate> = self
            .frames
            .iter()
            .filter(|(id, f)| {
                Some(*id) != playing && (f.channel != f.required_channel || f.stokes != f.required_stokes)
            })
            .map(|(id, f)| ChannelUpdate {
                file_id: id,
                channel: f.required_channel,
                stokes: f.required_stokes,
            })
            .collect();
        self.coordinator.submit_channels(now, channel_updates);
    }

    fn touch(&mut self, id: FileId) {
        let graph = self.views.graph_mut();
        if graph.contains(id) {
            graph.invalidate(id);
        }
    }

    /// Re-reads link structure into the view graph and invalidates all views.
    fn touch_all(&mut self) {
        let links: Vec<(FileId, Option<FileId>)> = self
            .frames
            .iter()
            .map(|(id, f)| (id, f.spatial.reference))
            .collect();
        let graph = self.views.graph_mut();
        for (id, reference) in links {
            graph.set_dependencies(id, reference);
        }
    }

    fn after_view_change(&mut self, root: FileId) {
        reference::follow_reference(&mut self.frames, &self.wcs, root);
        self.touch(root);
        self.sync();
    }

    /// Spatial root of `id` and `point` expressed in the root's pixels.
    fn to_spatial_root(&self, id: FileId, point: Vec2) -> Result<(FileId, Vec2), SessionError> {
        let frame = self.frames.get(id).ok_or(SessionError::UnknownFrame(id))?;
        Ok(match (frame.spatial.reference, frame.spatial_transform) {
            (Some(reference), Some(t)) => (reference, t.forward(point)),
            _ => (id, point),
        })
    }

    fn zoom_for_root(&self, id: FileId, zoom: f64, absolute: bool) -> Result<(FileId, f64), SessionError> {
        let frame = self.frames.get(id).ok_or(SessionError::UnknownFrame(id))?;
        Ok(match (frame.spatial.reference, frame.spatial_transform) {
            (Some(reference), Some(t)) if !absolute => (reference, zoom / t.scale),
            (Some(reference), _) => (reference, zoom),
            _ => (id, zoom),
        })
    }

    fn update_cursor_mode(&mut self) {
        let rotated = self
            .active
            .and_then(|id| self.frames.get(id))
            .is_some_and(|f| f.info.rotated);
        let mode = if self.config.low_bandwidth_mode {
            CursorMode::LowBandwidth
        } else if rotated {
            CursorMode::Rotated
        } else {
            CursorMode::Standard
        };
        self.coordinator.set_cursor_mode(mode);
    }

    fn link_frame(&mut self, frame: FileId, target: FileId, axis: MatchingAxis) -> Result<FileId, MatchError> {
        let mut releaser = TrackingReleaser {
            inner: self.releaser.as_mut(),
            released: Vec::new(),
        };
        let result = reference::link(
            &mut self.frames,
            &self.wcs,
            self.config.spectral_matching,
            frame,
            target,
            axis,
            &mut releaser,
        );
        let released = releaser.released;
        self.record_releases(released);
        if let Err(err) = &result {
            warn!(%frame, reference = %target, %axis, error = %err, "could not enable matching");
            self.events.emit(
                self.clock.now(),
                SessionEvent::MatchingRefused {
                    frame,
                    reference: target,
                    axis,
                    reason: err.to_string(),
                },
            );
        }
        self.touch_all();
        result
    }

    fn unlink_frame(&mut self, frame: FileId, axis: MatchingAxis) -> Option<FileId> {
        let mut releaser = TrackingReleaser {
            inner: self.releaser.as_mut(),
            released: Vec::new(),
        };
        let former = reference::unlink(&mut self.frames, frame, axis, &mut releaser);
        let released = releaser.released;
        self.record_releases(released);
        if former.is_some() {
            self.touch_all();
        }
        former
    }

    fn record_releases(&mut self, released: Vec<(FileId, FileId)>) {
        let now = self.clock.now();
        for (owner, other) in released {
            self.events.emit(now, SessionEvent::ControlMapReleased { owner, other });
        }
    }
}
