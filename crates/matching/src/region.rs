use std::collections::BTreeMap;

use foundation::ids::{FileId, RegionId};
use foundation::math::Vec2;
use requirements::RegionShape;
use serde::{Deserialize, Serialize};

use crate::transform::SpatialTransform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    Point,
    Rectangle,
    Ellipse,
    Polygon,
    Line,
    Polyline,
}

impl RegionKind {
    pub fn shape(self) -> RegionShape {
        match self {
            RegionKind::Point => RegionShape::Point,
            RegionKind::Rectangle | RegionKind::Ellipse | RegionKind::Polygon => RegionShape::Closed,
            RegionKind::Line | RegionKind::Polyline => RegionShape::Line,
        }
    }
}

/// Where a migrated region came from, kept so it can go back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionOrigin {
    pub file: FileId,
    pub id: RegionId,
    pub control_points: Vec<Vec2>,
    pub rotation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: RegionId,
    pub kind: RegionKind,
    /// Positions in the owning frame's pixel space.
    pub control_points: Vec<Vec2>,
    /// Degrees.
    pub rotation: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<RegionOrigin>,
}

/// Regions of one frame. The cursor region is implicit and always exists.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionSet {
    next_id: i32,
    regions: BTreeMap<RegionId, Region>,
}

impl Default for RegionSet {
    fn default() -> Self {
        Self {
            next_id: 1,
            regions: BTreeMap::new(),
        }
    }
}

impl RegionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: RegionKind, control_points: Vec<Vec2>, rotation: f64) -> RegionId {
        let id = self.fresh_id();
        self.regions.insert(
            id,
            Region {
                id,
                kind,
                control_points,
                rotation,
                origin: None,
            },
        );
        id
    }

    pub fn remove(&mut self, id: RegionId) -> Option<Region> {
        self.regions.remove(&id)
    }

    pub fn get(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> + '_ {
        self.regions.values()
    }

    /// Number of user regions, cursor excluded.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn shape(&self, id: RegionId) -> Option<RegionShape> {
        if id.is_cursor() {
            return Some(RegionShape::Point);
        }
        self.regions.get(&id).map(|r| r.kind.shape())
    }

    /// Moves every region into `target`, mapped through `transform`.
    pub fn migrate_into(&mut self, target: &mut RegionSet, file: FileId, transform: &SpatialTransform) {
        let degrees = transform.rotation.to_degrees();
        for (_, region) in std::mem::take(&mut self.regions) {
            let id = target.fresh_id();
            // Regions passed on from a secondary keep pointing at it.
            let origin = region.origin.clone().unwrap_or_else(|| RegionOrigin {
                file,
                id: region.id,
                control_points: region.control_points.clone(),
                rotation: region.rotation,
            });
            target.regions.insert(
                id,
                Region {
                    id,
                    kind: region.kind,
                    control_points: region.control_points.iter().map(|p| transform.forward(*p)).collect(),
                    rotation: region.rotation + degrees,
                    origin: Some(origin),
                },
            );
        }
    }

    /// Pulls regions back from the reference after an unlink.
    ///
    /// Regions that came from `file` leave the reference and get their old id
    /// and geometry back. The reference's other regions are copied over,
    /// mapped through the inverse transform.
    pub fn restore_from(&mut self, reference: &mut RegionSet, file: FileId, transform: &SpatialTransform) {
        let returning: Vec<RegionId> = reference
            .regions
            .values()
            .filter(|r| r.origin.as_ref().is_some_and(|o| o.file == file))
            .map(|r| r.id)
            .collect();
        for id in returning {
            let Some(region) = reference.regions.remove(&id) else {
                continue;
            };
            let Some(origin) = region.origin else {
                continue;
            };
            let id = if self.regions.contains_key(&origin.id) {
                self.fresh_id()
            } else {
                self.next_id = self.next_id.max(origin.id.0 + 1);
                origin.id
            };
            self.regions.insert(
                id,
                Region {
                    id,
                    kind: region.kind,
                    control_points: origin.control_points,
                    rotation: origin.rotation,
                    origin: None,
                },
            );
        }

        let degrees = transform.rotation.to_degrees();
        let copies: Vec<Region> = reference.regions.values().cloned().collect();
        for region in copies {
            let id = self.fresh_id();
            self.regions.insert(
                id,
                Region {
                    id,
                    kind: region.kind,
                    control_points: region.control_points.iter().map(|p| transform.inverse(*p)).collect(),
                    rotation: region.rotation - degrees,
                    origin: None,
                },
            );
        }
    }

    fn fresh_id(&mut self) -> RegionId {
        let id = RegionId(self.next_id);
        self.next_id += 1;
        id
    }
}
