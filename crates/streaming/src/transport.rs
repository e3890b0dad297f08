use std::io::Write;

use foundation::ids::FileId;
use foundation::math::Vec2;
use requirements::RequirementRecord;
use thiserror::Error;

use crate::protocol::{AddRequiredTiles, AnimationFrame, ClientMessage, CompressionType};
use crate::tile::TilePlan;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
    #[error("backend rejected request: {0}")]
    Rejected(String),
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Tile request for one frame, before it is mapped onto wire messages.
#[derive(Debug, Clone, PartialEq)]
pub struct TileRequest {
    pub file_id: FileId,
    pub channel: u32,
    pub stokes: u32,
    pub plan: TilePlan,
    pub compression_type: CompressionType,
    pub compression_quality: u32,
    /// The plane changed; the backend must switch before streaming tiles.
    pub channels_changed: bool,
}

impl TileRequest {
    fn required_tiles(&self) -> AddRequiredTiles {
        AddRequiredTiles {
            file_id: self.file_id,
            tiles: self.plan.encoded_by_focus(),
            compression_type: self.compression_type,
            compression_quality: self.compression_quality,
        }
    }
}

/// Outbound channel to the backend.
///
/// Implementations only provide [`send`](Transport::send); the named requests
/// are built on top of it.
pub trait Transport {
    fn send(&mut self, message: ClientMessage) -> Result<(), TransportError>;

    /// Tiles sorted nearest-first around the plan's focus. A channel change
    /// carries the tiles inside the channel switch.
    fn request_tiles(&mut self, request: &TileRequest) -> Result<(), TransportError> {
        let tiles = request.required_tiles();
        if request.channels_changed {
            self.send(ClientMessage::SetChannels {
                file_id: request.file_id,
                channel: request.channel,
                stokes: request.stokes,
                required_tiles: Some(tiles),
            })
        } else if tiles.tiles.is_empty() {
            Ok(())
        } else {
            self.send(ClientMessage::AddRequiredTiles(tiles))
        }
    }

    /// Channel switch for a frame that is not on screen.
    fn set_channels(&mut self, file_id: FileId, channel: u32, stokes: u32) -> Result<(), TransportError> {
        self.send(ClientMessage::SetChannels {
            file_id,
            channel,
            stokes,
            required_tiles: None,
        })
    }

    fn add_required_tiles(&mut self, tiles: AddRequiredTiles) -> Result<(), TransportError> {
        self.send(ClientMessage::AddRequiredTiles(tiles))
    }

    fn set_requirements(&mut self, record: RequirementRecord) -> Result<(), TransportError> {
        self.send(ClientMessage::SetRequirements(record))
    }

    fn send_animation_flow_control(
        &mut self,
        file_id: FileId,
        received_frame: AnimationFrame,
        timestamp: u64,
    ) -> Result<(), TransportError> {
        self.send(ClientMessage::AnimationFlowControl {
            file_id,
            animation_id: 0,
            received_frame,
            timestamp,
        })
    }

    fn set_cursor(&mut self, file_id: FileId, point: Vec2) -> Result<(), TransportError> {
        self.send(ClientMessage::SetCursor { file_id, point })
    }

    fn close_file(&mut self, file_id: FileId) -> Result<(), TransportError> {
        self.send(ClientMessage::CloseFile { file_id })
    }
}

/// Keeps every message in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    messages: Vec<ClientMessage>,
    reject: bool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ClientMessage] {
        &self.messages
    }

    pub fn take(&mut self) -> Vec<ClientMessage> {
        std::mem::take(&mut self.messages)
    }

    /// While set, every send fails and nothing is recorded.
    pub fn set_rejecting(&mut self, reject: bool) {
        self.reject = reject;
    }
}

impl Transport for RecordingTransport {
    fn send(&mut self, message: ClientMessage) -> Result<(), TransportError> {
        if self.reject {
            return Err(TransportError::Rejected("recording transport is rejecting".into()));
        }
        self.messages.push(message);
        Ok(())
    }
}

/// Writes one JSON message per line.
#[derive(Debug)]
pub struct JsonLinesTransport<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesTransport<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Transport for JsonLinesTransport<W> {
    fn send(&mut self, message: ClientMessage) -> Result<(), TransportError> {
        serde_json::to_writer(&mut self.writer, &message)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }
}
