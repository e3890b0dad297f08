use std::collections::BTreeMap;

use foundation::ids::FileId;
use foundation::math::Vec2;
use foundation::time::Time;
use requirements::RequirementRecord;
use runtime::throttle::Throttle;
use tracing::{debug, warn};

use crate::protocol::{AddRequiredTiles, AnimationFrame, CursorMode, StreamingConfig};
use crate::tile::TilePlan;
use crate::transport::{TileRequest, Transport, TransportError};

/// Latest tile requirement of a visible frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewUpdate {
    pub file_id: FileId,
    pub channel: u32,
    pub stokes: u32,
    pub plan: TilePlan,
    pub compression_quality: u32,
    pub animation_quality: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelUpdate {
    pub file_id: FileId,
    pub channel: u32,
    pub stokes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CursorUpdate {
    pub file_id: FileId,
    pub point: Vec2,
}

/// Everything whose throttle window closed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DueRequests {
    pub views: Vec<ViewUpdate>,
    pub channels: Vec<ChannelUpdate>,
    pub cursor: Option<CursorUpdate>,
}

impl DueRequests {
    pub fn is_empty(&self) -> bool {
        self.views.is_empty() && self.channels.is_empty() && self.cursor.is_none()
    }
}

/// Backend-driven playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Playback {
    pub file_id: FileId,
    pub last_received: Option<AnimationFrame>,
}

fn merge_by_file<V>(pending: &mut BTreeMap<FileId, V>, update: BTreeMap<FileId, V>) {
    pending.extend(update);
}

/// Throttles outbound requests per class and owns the transport.
///
/// Views, channel changes and cursor moves each have their own window. Within
/// a window the latest update per file wins; when it closes, all files go out
/// together.
pub struct RequestCoordinator<T: Transport> {
    transport: T,
    config: StreamingConfig,
    cursor_mode: CursorMode,
    views: Throttle<BTreeMap<FileId, ViewUpdate>>,
    channels: Throttle<BTreeMap<FileId, ChannelUpdate>>,
    cursor: Throttle<CursorUpdate>,
    playback: Option<Playback>,
    failures: u64,
}

impl<T: Transport> RequestCoordinator<T> {
    pub fn new(transport: T, config: StreamingConfig) -> Self {
        Self {
            views: Throttle::merging(config.image_throttle_ms, merge_by_file),
            channels: Throttle::merging(config.channel_throttle_ms, merge_by_file),
            cursor: Throttle::new(config.cursor_interval_ms(CursorMode::Standard)),
            transport,
            config,
            cursor_mode: CursorMode::Standard,
            playback: None,
            failures: 0,
        }
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Number of requests the transport refused so far.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn cursor_mode(&self) -> CursorMode {
        self.cursor_mode
    }

    pub fn set_cursor_mode(&mut self, mode: CursorMode) {
        self.cursor_mode = mode;
        self.cursor.set_interval(self.config.cursor_interval_ms(mode));
    }

    pub fn submit_views(&mut self, now: Time, updates: Vec<ViewUpdate>) {
        if updates.is_empty() {
            return;
        }
        let map = updates.into_iter().map(|u| (u.file_id, u)).collect();
        self.views.submit(now, map);
    }

    pub fn submit_channels(&mut self, now: Time, updates: Vec<ChannelUpdate>) {
        if updates.is_empty() {
            return;
        }
        let map = updates.into_iter().map(|u| (u.file_id, u)).collect();
        self.channels.submit(now, map);
    }

    pub fn submit_cursor(&mut self, now: Time, update: CursorUpdate) {
        self.cursor.submit(now, update);
    }

    pub fn has_pending_channel(&self, file: FileId) -> bool {
        self.channels
            .pending()
            .is_some_and(|pending| pending.contains_key(&file))
    }

    /// Earliest closing window.
    pub fn next_deadline(&self) -> Option<Time> {
        [
            self.views.deadline(),
            self.channels.deadline(),
            self.cursor.deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    pub fn poll(&mut self, now: Time) -> DueRequests {
        DueRequests {
            views: self
                .views
                .poll(now)
                .map(|m| m.into_values().collect())
                .unwrap_or_default(),
            channels: self
                .channels
                .poll(now)
                .map(|m| m.into_values().collect())
                .unwrap_or_default(),
            cursor: self.cursor.poll(now),
        }
    }

    /// Pulls `file`'s pending updates out of their windows so they can be sent
    /// right away. Other files keep waiting.
    pub fn flush_file(&mut self, file: FileId) -> DueRequests {
        let views = self
            .views
            .pending_mut()
            .and_then(|m| m.remove(&file))
            .into_iter()
            .collect();
        let channels = self
            .channels
            .pending_mut()
            .and_then(|m| m.remove(&file))
            .into_iter()
            .collect();
        let cursor = match self.cursor.pending() {
            Some(c) if c.file_id == file => self.cursor.flush(),
            _ => None,
        };
        DueRequests {
            views,
            channels,
            cursor,
        }
    }

    /// Drops `file`'s pending updates.
    pub fn discard_file(&mut self, file: FileId) {
        let discarded = self.flush_file(file);
        if !discarded.is_empty() {
            debug!(%file, "discarded pending requests");
        }
        if self.playback.is_some_and(|p| p.file_id == file) {
            self.playback = None;
        }
    }

    pub fn start_playback(&mut self, file_id: FileId) {
        self.playback = Some(Playback {
            file_id,
            last_received: None,
        });
    }

    pub fn stop_playback(&mut self) {
        self.playback = None;
    }

    pub fn playback(&self) -> Option<Playback> {
        self.playback
    }

    /// Sends view requests. During playback tiles go out at animation quality
    /// and each one is paired with a flow-control acknowledgement.
    pub fn dispatch_views(&mut self, now: Time, views: Vec<ViewUpdate>) {
        for view in views {
            match self.playback {
                Some(playback) => {
                    let tiles = AddRequiredTiles {
                        file_id: view.file_id,
                        tiles: view.plan.encoded_by_focus(),
                        compression_type: self.config.compression_type,
                        compression_quality: view.animation_quality,
                    };
                    let result = self.transport.add_required_tiles(tiles);
                    self.deliver(result);
                    let frame = match playback.last_received {
                        Some(frame) if playback.file_id == view.file_id => frame,
                        _ => AnimationFrame {
                            channel: view.channel,
                            stokes: view.stokes,
                        },
                    };
                    let result =
                        self.transport
                            .send_animation_flow_control(view.file_id, frame, now.as_millis());
                    self.deliver(result);
                }
                None => {
                    let request = TileRequest {
                        file_id: view.file_id,
                        channel: view.channel,
                        stokes: view.stokes,
                        plan: view.plan,
                        compression_type: self.config.compression_type,
                        compression_quality: view.compression_quality,
                        channels_changed: false,
                    };
                    let result = self.transport.request_tiles(&request);
                    self.deliver(result);
                }
            }
        }
    }

    /// Channel switch; visible frames include their tiles.
    pub fn dispatch_channel(&mut self, update: ChannelUpdate, tiles: Option<(TilePlan, u32)>) {
        let result = match tiles {
            Some((plan, quality)) => self.transport.request_tiles(&TileRequest {
                file_id: update.file_id,
                channel: update.channel,
                stokes: update.stokes,
                plan,
                compression_type: self.config.compression_type,
                compression_quality: quality,
                channels_changed: true,
            }),
            None => self
                .transport
                .set_channels(update.file_id, update.channel, update.stokes),
        };
        self.deliver(result);
    }

    pub fn dispatch_cursor(&mut self, update: CursorUpdate) {
        let result = self.transport.set_cursor(update.file_id, update.point);
        self.deliver(result);
    }

    pub fn send_requirements(&mut self, records: Vec<RequirementRecord>) {
        for record in records {
            let result = self.transport.set_requirements(record);
            self.deliver(result);
        }
    }

    pub fn close_file(&mut self, file: FileId) {
        self.discard_file(file);
        let result = self.transport.close_file(file);
        self.deliver(result);
    }

    /// A tile arrived during playback. Returns whether it belonged to the
    /// played file, in which case an acknowledgement went out.
    pub fn on_tile_received(&mut self, now: Time, file: FileId, frame: AnimationFrame) -> bool {
        let Some(playback) = self.playback.as_mut() else {
            return false;
        };
        if playback.file_id != file {
            return false;
        }
        playback.last_received = Some(frame);
        let result = self
            .transport
            .send_animation_flow_control(file, frame, now.as_millis());
        self.deliver(result);
        true
    }

    fn deliver(&mut self, result: Result<(), TransportError>) {
        if let Err(err) = result {
            self.failures += 1;
            warn!(error = %err, "backend request dropped");
        }
    }
}
