use foundation::ids::FileId;
use foundation::math::Vec2;
use foundation::view::FrameView;
use serde::{Deserialize, Serialize};

/// Edge length of a tile in image pixels at mip 1.
pub const TILE_SIZE: u32 = 256;

/// Deepest layer the 12-bit tile axes can address.
pub const MAX_LAYER: u32 = 12;

/// Encoded tiles of different files are kept apart by this stride.
pub const FILE_ID_OFFSET: u64 = 1 << 32;

/// Tile in the image pyramid. Layer 0 covers the whole image with one tile;
/// each deeper layer halves the mip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoordinate {
    pub layer: u32,
    pub x: u32,
    pub y: u32,
}

impl TileCoordinate {
    pub fn new(x: u32, y: u32, layer: u32) -> Self {
        Self { layer, x, y }
    }

    /// Packs into `layer << 24 | y << 12 | x`. `None` when the coordinate is
    /// outside its layer.
    pub fn encode(&self) -> Option<u32> {
        if self.layer > MAX_LAYER {
            return None;
        }
        let side = 1u32 << self.layer;
        if self.x >= side || self.y >= side {
            return None;
        }
        Some((self.layer << 24) | (self.y << 12) | self.x)
    }

    pub fn decode(encoded: u32) -> Self {
        Self {
            layer: (encoded >> 24) & 127,
            x: encoded & 4095,
            y: (encoded >> 12) & 4095,
        }
    }

    /// Cache key unique across files.
    pub fn with_file_id(encoded: u32, file: FileId) -> u64 {
        u64::from(encoded) + u64::from(file.0.max(0) as u32) * FILE_ID_OFFSET
    }
}

/// Number of pyramid layers below the root for an image.
pub fn total_layers(width: u32, height: u32, tile_size: u32) -> u32 {
    let tiles_x = width.div_ceil(tile_size.max(1));
    let tiles_y = height.div_ceil(tile_size.max(1));
    ceil_log2(tiles_x.max(tiles_y).max(1))
}

fn ceil_log2(n: u32) -> u32 {
    n.max(1).next_power_of_two().trailing_zeros()
}

/// Layer a (power of two) mip lives on. Mips coarser than the root collapse
/// onto layer 0.
pub fn layer_for_mip(mip: u32, width: u32, height: u32, tile_size: u32) -> u32 {
    total_layers(width, height, tile_size).saturating_sub(ceil_log2(mip))
}

/// Tiles covering `view` after cropping it to the image.
///
/// Invalid views and views entirely outside the image produce no tiles.
pub fn required_tiles(view: &FrameView, width: u32, height: u32, tile_size: u32) -> Vec<TileCoordinate> {
    if !view.is_valid() || width == 0 || height == 0 || tile_size == 0 {
        return Vec::new();
    }
    let (w, h) = (f64::from(width), f64::from(height));
    if view.x_max < 0.0 || view.x_min > w || view.y_max < 0.0 || view.y_min > h {
        return Vec::new();
    }

    let x_min = view.x_min.max(0.0);
    let x_max = view.x_max.min(w);
    let y_min = view.y_min.max(0.0);
    let y_max = view.y_max.min(h);

    let adjusted = f64::from(view.mip) * f64::from(tile_size);
    let x_start = (x_min / adjusted).floor() as u32;
    let x_end = (x_max / adjusted).ceil() as u32;
    let y_start = (y_min / adjusted).floor() as u32;
    let y_end = (y_max / adjusted).ceil() as u32;

    let layer = layer_for_mip(view.mip, width, height, tile_size);
    let mut tiles = Vec::new();
    for y in y_start..y_end {
        for x in x_start..x_end {
            tiles.push(TileCoordinate::new(x, y, layer));
        }
    }
    tiles
}

/// View midpoint in tile units, shifted so tile centres sit on integers.
pub fn tile_focus(view: &FrameView, tile_size: u32) -> Vec2 {
    let adjusted = f64::from(view.mip.max(1)) * f64::from(tile_size.max(1));
    view.center() / adjusted - Vec2::new(0.5, 0.5)
}

/// Orders tiles nearest-first around `focus`. Ties keep pyramid order.
pub fn sort_by_focus(tiles: &mut [TileCoordinate], focus: Vec2) {
    tiles.sort_by(|a, b| {
        let da = Vec2::new(f64::from(a.x), f64::from(a.y)).distance(focus);
        let db = Vec2::new(f64::from(b.x), f64::from(b.y)).distance(focus);
        da.total_cmp(&db).then_with(|| a.cmp(b))
    });
}

/// Tiles for one frame plus where the viewer is looking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TilePlan {
    pub tiles: Vec<TileCoordinate>,
    pub focus: Vec2,
    pub mip: u32,
}

impl TilePlan {
    pub fn for_view(view: &FrameView, width: u32, height: u32, tile_size: u32) -> Self {
        Self {
            tiles: required_tiles(view, width, height, tile_size),
            focus: tile_focus(view, tile_size),
            mip: view.mip,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Encoded tiles, nearest to the focus first.
    pub fn encoded_by_focus(&self) -> Vec<u32> {
        let mut tiles = self.tiles.clone();
        sort_by_focus(&mut tiles, self.focus);
        tiles.iter().filter_map(TileCoordinate::encode).collect()
    }
}
