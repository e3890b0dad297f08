use std::io::Write;
use std::path::{Path, PathBuf};

use foundation::ids::{FileId, RegionId};
use foundation::math::Vec2;
use matching::{
    ConfigError, FrameInfo, LinearWcs, LinearWcsProvider, MatchingAxis, RegionKind, Session, SessionConfig,
    SessionError, SpectralMatching,
};
use requirements::Widget;
use serde::Deserialize;
use streaming::transport::JsonLinesTransport;
use thiserror::Error;
use tracing::{info, warn};

pub type ScriptSession<W> = Session<JsonLinesTransport<W>, LinearWcsProvider>;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid script: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),
    #[error("step {index} ({op}): {source}")]
    Step {
        index: usize,
        op: &'static str,
        #[source]
        source: SessionError,
    },
    #[error("flush output: {0}")]
    Flush(#[source] std::io::Error),
}

/// A frame declared by a script, with its linear coordinate system.
#[derive(Debug, Clone, Deserialize)]
pub struct FrameSpec {
    pub id: FileId,
    pub width: u32,
    pub height: u32,
    #[serde(default = "one")]
    pub depth: u32,
    #[serde(default = "one")]
    pub stokes: u32,
    #[serde(default)]
    pub computed_polarizations: Vec<u32>,
    #[serde(default)]
    pub header_unit: String,
    #[serde(default = "yes")]
    pub square_pixels: bool,
    #[serde(default)]
    pub rotated: bool,
    pub wcs: LinearWcs,
}

fn one() -> u32 {
    1
}

fn yes() -> bool {
    true
}

fn propagate_default() -> bool {
    true
}

fn pixel_ratio_default() -> f64 {
    1.0
}

impl FrameSpec {
    fn register(&self, wcs: &mut LinearWcsProvider) -> FrameInfo {
        let handle = wcs.register(self.wcs);
        let mut info = FrameInfo::new(self.id, self.width, self.height, handle).with_stokes(self.stokes);
        if self.depth > 1 && self.wcs.spectral.is_some() {
            info = info.with_depth(self.depth, handle);
        } else {
            info.depth = self.depth.max(1);
        }
        info.computed_polarizations = self.computed_polarizations.clone();
        info.header_unit = self.header_unit.clone();
        info.square_pixels = self.square_pixels;
        info.rotated = self.rotated;
        info
    }
}

/// One scripted session operation.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Open {
        frame: FrameSpec,
    },
    Close {
        file: FileId,
    },
    SetActive {
        file: FileId,
    },
    SetVisible {
        #[serde(default)]
        files: Option<Vec<FileId>>,
    },
    SetRenderSize {
        width: f64,
        height: f64,
        #[serde(default = "pixel_ratio_default")]
        pixel_ratio: f64,
    },
    SetCenter {
        file: FileId,
        point: Vec2,
    },
    SetZoom {
        file: FileId,
        zoom: f64,
        #[serde(default)]
        absolute: bool,
    },
    ZoomToPoint {
        file: FileId,
        point: Vec2,
        zoom: f64,
        #[serde(default)]
        absolute: bool,
    },
    FitZoom {
        file: FileId,
    },
    SetCursor {
        file: FileId,
        point: Vec2,
    },
    SetChannels {
        file: FileId,
        channel: f64,
        #[serde(default)]
        stokes: i32,
        #[serde(default = "propagate_default")]
        propagate: bool,
    },
    IncrementChannels {
        file: FileId,
        #[serde(default)]
        channel: i32,
        #[serde(default)]
        stokes: i32,
        #[serde(default)]
        wrap: bool,
    },
    Link {
        file: FileId,
        reference: FileId,
        axis: MatchingAxis,
    },
    Unlink {
        file: FileId,
        axis: MatchingAxis,
    },
    Match {
        file: FileId,
        axis: MatchingAxis,
        #[serde(default = "yes")]
        enabled: bool,
    },
    SetReference {
        axis: MatchingAxis,
        file: FileId,
    },
    SetSpectralMatching {
        matching: SpectralMatching,
    },
    AddRegion {
        file: FileId,
        kind: RegionKind,
        points: Vec<Vec2>,
        #[serde(default)]
        rotation: f64,
    },
    RemoveRegion {
        file: FileId,
        region: RegionId,
    },
    AddWidget {
        widget: Widget,
    },
    StartAnimation,
    StopAnimation,
    TileReceived {
        file: FileId,
        channel: u32,
        #[serde(default)]
        stokes: u32,
    },
    Advance {
        ms: u64,
    },
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Open { .. } => "open",
            Step::Close { .. } => "close",
            Step::SetActive { .. } => "set_active",
            Step::SetVisible { .. } => "set_visible",
            Step::SetRenderSize { .. } => "set_render_size",
            Step::SetCenter { .. } => "set_center",
            Step::SetZoom { .. } => "set_zoom",
            Step::ZoomToPoint { .. } => "zoom_to_point",
            Step::FitZoom { .. } => "fit_zoom",
            Step::SetCursor { .. } => "set_cursor",
            Step::SetChannels { .. } => "set_channels",
            Step::IncrementChannels { .. } => "increment_channels",
            Step::Link { .. } => "link",
            Step::Unlink { .. } => "unlink",
            Step::Match { .. } => "match",
            Step::SetReference { .. } => "set_reference",
            Step::SetSpectralMatching { .. } => "set_spectral_matching",
            Step::AddRegion { .. } => "add_region",
            Step::RemoveRegion { .. } => "remove_region",
            Step::AddWidget { .. } => "add_widget",
            Step::StartAnimation => "start_animation",
            Step::StopAnimation => "stop_animation",
            Step::TileReceived { .. } => "tile_received",
            Step::Advance { .. } => "advance",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub frames: Vec<FrameSpec>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Script {
    pub fn from_json_str(json: &str) -> Result<Self, ScriptError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, ScriptError> {
        let text = read(path)?;
        Self::from_json_str(&text)
    }
}

pub fn load_config(path: &Path) -> Result<SessionConfig, ScriptError> {
    let text = read(path)?;
    Ok(SessionConfig::from_json_str(&text)?)
}

fn read(path: &Path) -> Result<String, ScriptError> {
    std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Replays `script`, writing every outbound message to `out` as one JSON
/// line. Declared frames open in order before the first step.
pub fn run<W: Write>(script: &Script, config: SessionConfig, out: W) -> Result<ScriptSession<W>, ScriptError> {
    let mut wcs = LinearWcsProvider::new();
    let infos: Vec<FrameInfo> = script.frames.iter().map(|f| f.register(&mut wcs)).collect();
    let mut session = Session::new(config, wcs, JsonLinesTransport::new(out));
    for info in infos {
        let id = info.file_id;
        session.open_frame(info).map_err(|source| ScriptError::Step {
            index: 0,
            op: "open",
            source,
        })?;
        info!(file = %id, "declared frame opened");
    }

    for (index, step) in script.steps.iter().enumerate() {
        apply(&mut session, step).map_err(|source| ScriptError::Step {
            index,
            op: step.name(),
            source,
        })?;
    }

    for event in session.drain_events() {
        info!(at = event.at.as_millis(), event = ?event.payload, "session event");
    }
    let failures = session.coordinator().failures();
    if failures > 0 {
        warn!(failures, "some backend requests could not be written");
    }
    Ok(session)
}

/// Replays `script` and flushes the output.
pub fn run_to<W: Write>(script: &Script, config: SessionConfig, out: W) -> Result<(), ScriptError> {
    let session = run(script, config, out)?;
    session.into_transport().into_inner().flush().map_err(ScriptError::Flush)
}

fn apply<W: Write>(session: &mut ScriptSession<W>, step: &Step) -> Result<(), SessionError> {
    match step {
        Step::Open { frame } => {
            let info = frame.register(session.wcs_mut());
            session.open_frame(info)?;
        }
        Step::Close { file } => session.close_frame(*file)?,
        Step::SetActive { file } => session.set_active_frame(*file)?,
        Step::SetVisible { files } => session.set_visible_frames(files.clone()),
        Step::SetRenderSize {
            width,
            height,
            pixel_ratio,
        } => session.set_render_size(*width, *height, *pixel_ratio),
        Step::SetCenter { file, point } => session.set_center(*file, *point)?,
        Step::SetZoom { file, zoom, absolute } => session.set_zoom(*file, *zoom, *absolute)?,
        Step::ZoomToPoint {
            file,
            point,
            zoom,
            absolute,
        } => session.zoom_to_point(*file, *point, *zoom, *absolute)?,
        Step::FitZoom { file } => session.fit_zoom(*file)?,
        Step::SetCursor { file, point } => session.set_cursor(*file, *point)?,
        Step::SetChannels {
            file,
            channel,
            stokes,
            propagate,
        } => {
            session.set_channels(*file, *channel, *stokes, *propagate)?;
        }
        Step::IncrementChannels {
            file,
            channel,
            stokes,
            wrap,
        } => {
            session.increment_channels(*file, *channel, *stokes, *wrap)?;
        }
        Step::Link { file, reference, axis } => {
            session.link(*file, *reference, *axis)?;
        }
        Step::Unlink { file, axis } => {
            session.unlink(*file, *axis);
        }
        Step::Match { file, axis, enabled } => session.set_matching_enabled(*file, *axis, *enabled)?,
        Step::SetReference { axis, file } => session.set_reference(*axis, *file)?,
        Step::SetSpectralMatching { matching } => session.set_spectral_matching(*matching),
        Step::AddRegion {
            file,
            kind,
            points,
            rotation,
        } => {
            let id = session.add_region(*file, *kind, points.clone(), *rotation)?;
            info!(%file, region = id.0, "region added");
        }
        Step::RemoveRegion { file, region } => {
            session.remove_region(*file, *region);
        }
        Step::AddWidget { widget } => {
            session.add_widget(widget.clone());
        }
        Step::StartAnimation => session.start_animation()?,
        Step::StopAnimation => session.stop_animation(),
        Step::TileReceived { file, channel, stokes } => {
            session.on_tile_received(*file, *channel, *stokes);
        }
        Step::Advance { ms } => session.advance(*ms),
    }
    Ok(())
}
