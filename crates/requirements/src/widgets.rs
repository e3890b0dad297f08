use std::collections::BTreeMap;

use foundation::ids::{FileId, RegionId};
use foundation::view::FrameView;
use serde::{Deserialize, Serialize};

use crate::records::{HistogramBounds, StatsType};

/// Which frame a widget follows.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Binding {
    /// Tracks the session's active frame.
    #[default]
    Active,
    Fixed(FileId),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WidgetId(pub u32);

/// What an analysis widget needs from the backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WidgetKind {
    /// Cursor profile along one image axis; `coordinate` carries the axis
    /// letter (`x` or `y`) with an optional stokes prefix.
    SpatialProfile { coordinate: String },
    SpectralProfile {
        region: RegionId,
        coordinate: String,
        stats_types: Vec<StatsType>,
        /// Also request the profile from every spatially and spectrally
        /// matched frame.
        #[serde(default)]
        include_matched: bool,
    },
    Stats { region: RegionId, coordinate: String },
    Histogram {
        region: RegionId,
        coordinate: String,
        fixed_num_bins: bool,
        num_bins: i32,
        fixed_bounds: bool,
        bounds: HistogramBounds,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    #[serde(default)]
    pub binding: Binding,
    pub kind: WidgetKind,
}

impl Widget {
    pub fn new(binding: Binding, kind: WidgetKind) -> Self {
        Self { binding, kind }
    }

    pub fn file(&self, active: Option<FileId>) -> Option<FileId> {
        match self.binding {
            Binding::Active => active,
            Binding::Fixed(file) => Some(file),
        }
    }
}

/// Live widgets, iterated in creation order.
#[derive(Clone, Debug, Default)]
pub struct WidgetSet {
    next_id: u32,
    widgets: BTreeMap<WidgetId, Widget>,
}

impl WidgetSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, widget: Widget) -> WidgetId {
        let id = WidgetId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.widgets.insert(id, widget);
        id
    }

    pub fn remove(&mut self, id: WidgetId) -> Option<Widget> {
        self.widgets.remove(&id)
    }

    pub fn get(&self, id: WidgetId) -> Option<&Widget> {
        self.widgets.get(&id)
    }

    pub fn get_mut(&mut self, id: WidgetId) -> Option<&mut Widget> {
        self.widgets.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (WidgetId, &Widget)> + '_ {
        self.widgets.iter().map(|(id, w)| (*id, w))
    }

    pub fn len(&self) -> usize {
        self.widgets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.widgets.is_empty()
    }

    /// Re-points widgets fixed to `file` at the active frame.
    pub fn release_file(&mut self, file: FileId) {
        for w in self.widgets.values_mut() {
            if w.binding == Binding::Fixed(file) {
                w.binding = Binding::Active;
            }
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RegionShape {
    Point,
    /// Rectangle, ellipse, polygon: anything with an interior.
    Closed,
    Line,
}

/// Geometry the spatial profile config is clipped against.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CursorWindow {
    pub view: FrameView,
    pub width: u32,
    pub height: u32,
    pub max_mip: u32,
}

/// Read access to session state needed while aggregating.
pub trait RequirementContext {
    fn active_file(&self) -> Option<FileId>;

    fn has_file(&self, file: FileId) -> bool;

    /// Shape of an existing region. The cursor region always exists for an
    /// open file.
    fn region_shape(&self, file: FileId, region: RegionId) -> Option<RegionShape>;

    fn cursor_window(&self, file: FileId) -> Option<CursorWindow>;

    fn cursor_frozen(&self) -> bool;

    /// Frames matched to `file` both spatially and spectrally, `file` included.
    fn matched_files(&self, file: FileId) -> Vec<FileId> {
        vec![file]
    }
}

#[cfg(test)]
mod tests {
    use super::{Binding, Widget, WidgetKind, WidgetSet};
    use foundation::ids::FileId;

    #[test]
    fn active_binding_follows_active_file() {
        let w = Widget::new(
            Binding::Active,
            WidgetKind::SpatialProfile {
                coordinate: "x".into(),
            },
        );
        assert_eq!(w.file(Some(FileId(3))), Some(FileId(3)));
        assert_eq!(w.file(None), None);
    }

    #[test]
    fn release_file_rebinds_to_active() {
        let mut set = WidgetSet::new();
        let id = set.add(Widget::new(
            Binding::Fixed(FileId(1)),
            WidgetKind::SpatialProfile {
                coordinate: "y".into(),
            },
        ));
        set.release_file(FileId(1));
        assert_eq!(set.get(id).map(|w| w.binding), Some(Binding::Active));
    }
}
