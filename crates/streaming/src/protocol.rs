//! Outbound protocol types for the image backend.
//!
//! This module defines the wire format for:
//! - Tile and channel requests (view driven)
//! - Analysis requirements (profiles, statistics, histograms)
//! - Animation flow control and cursor updates
//!
//! The protocol is transport-agnostic; see [`crate::transport`].

use foundation::ids::FileId;
use foundation::math::Vec2;
use requirements::RequirementRecord;
use serde::{Deserialize, Serialize};

/// Tile compression codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    None,
    #[default]
    Zfp,
    Sz,
}

/// Header units of velocity maps. These lose visible structure at low
/// compression quality.
pub const VELOCITY_UNITS: [&str; 4] = ["km/s", "km s-1", "km s^-1", "km.s-1"];

/// Quality floor applied to velocity maps.
pub const VELOCITY_MIN_QUALITY: u32 = 32;

/// Compression quality for a frame, raised for velocity units.
pub fn compression_quality(base: u32, header_unit: &str) -> u32 {
    if VELOCITY_UNITS.contains(&header_unit.trim()) {
        base.max(VELOCITY_MIN_QUALITY)
    } else {
        base
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddRequiredTiles {
    pub file_id: FileId,
    /// Encoded tile coordinates, highest priority first.
    pub tiles: Vec<u32>,
    pub compression_type: CompressionType,
    pub compression_quality: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimationFrame {
    pub channel: u32,
    pub stokes: u32,
}

/// Message from client to backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Switch the displayed channel/stokes, optionally with the tiles to send
    /// for the new plane.
    SetChannels {
        file_id: FileId,
        channel: u32,
        stokes: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        required_tiles: Option<AddRequiredTiles>,
    },

    /// Request tiles of the current plane.
    AddRequiredTiles(AddRequiredTiles),

    /// Replace the analysis requirements of one (file, region).
    SetRequirements(RequirementRecord),

    /// Acknowledge a frame received during backend-driven playback.
    AnimationFlowControl {
        file_id: FileId,
        animation_id: u32,
        received_frame: AnimationFrame,
        timestamp: u64,
    },

    SetCursor { file_id: FileId, point: Vec2 },

    CloseFile { file_id: FileId },
}

impl ClientMessage {
    pub fn file_id(&self) -> FileId {
        match self {
            ClientMessage::SetChannels { file_id, .. }
            | ClientMessage::AnimationFlowControl { file_id, .. }
            | ClientMessage::SetCursor { file_id, .. }
            | ClientMessage::CloseFile { file_id } => *file_id,
            ClientMessage::AddRequiredTiles(tiles) => tiles.file_id,
            ClientMessage::SetRequirements(record) => record.key().0,
        }
    }
}

/// Request intervals and tiling constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Coalescing window for view driven tile requests (ms).
    pub image_throttle_ms: u64,

    /// Coalescing window for channel/stokes changes (ms).
    pub channel_throttle_ms: u64,

    /// Coalescing window for cursor updates (ms).
    pub cursor_throttle_ms: u64,

    /// Cursor window for rotated datasets (ms).
    pub cursor_throttle_rotated_ms: u64,

    /// Tile edge length in pixels at mip 1.
    pub tile_size: u32,

    pub compression_type: CompressionType,
    pub image_compression_quality: u32,
    pub animation_compression_quality: u32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            image_throttle_ms: 50,
            channel_throttle_ms: 500,
            cursor_throttle_ms: 200,
            cursor_throttle_rotated_ms: 300,
            tile_size: crate::tile::TILE_SIZE,
            compression_type: CompressionType::Zfp,
            image_compression_quality: 11,
            animation_compression_quality: 9,
        }
    }
}

/// Cursor update cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorMode {
    #[default]
    Standard,
    Rotated,
    LowBandwidth,
}

impl StreamingConfig {
    pub fn cursor_interval_ms(&self, mode: CursorMode) -> u64 {
        match mode {
            CursorMode::Standard => self.cursor_throttle_ms,
            CursorMode::Rotated => self.cursor_throttle_rotated_ms,
            CursorMode::LowBandwidth => self.cursor_throttle_ms * 2,
        }
    }
}
