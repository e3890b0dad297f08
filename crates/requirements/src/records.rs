use std::collections::BTreeMap;

use foundation::ids::{FileId, RegionId};
use serde::{Deserialize, Serialize};

/// Region statistics the backend can compute.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsType {
    NumPixels,
    NanCount,
    Sum,
    FluxDensity,
    Mean,
    Rms,
    Sigma,
    SumSq,
    Min,
    Max,
    Extrema,
    Blc,
    Trc,
    MinPos,
    MaxPos,
}

/// Statistics requested for every stats widget.
pub const DEFAULT_STATS_TYPES: [StatsType; 10] = [
    StatsType::NumPixels,
    StatsType::Sum,
    StatsType::FluxDensity,
    StatsType::Mean,
    StatsType::Rms,
    StatsType::Sigma,
    StatsType::SumSq,
    StatsType::Min,
    StatsType::Max,
    StatsType::Extrema,
];

/// Histogram channel placeholder meaning "whatever channel is displayed".
pub const CURRENT_CHANNEL: i32 = -1;

/// Requirement kinds in emission order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementKind {
    SpatialProfile,
    SpectralProfile,
    Stats,
    Histogram,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpatialConfig {
    pub coordinate: String,
    pub mip: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpectralConfig {
    pub coordinate: String,
    /// Kept sorted and unique.
    pub stats_types: Vec<StatsType>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsConfig {
    pub coordinate: String,
    pub stats_types: Vec<StatsType>,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistogramBounds {
    pub min: f64,
    pub max: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistogramConfig {
    pub coordinate: String,
    pub channel: i32,
    pub fixed_num_bins: bool,
    pub num_bins: i32,
    pub fixed_bounds: bool,
    pub bounds: HistogramBounds,
}

fn close_to(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-6 * a.abs().max(b.abs()).max(1.0)
}

impl HistogramConfig {
    /// Same binning policy, with bounds compared under a small tolerance.
    pub fn matches(&self, other: &HistogramConfig) -> bool {
        self.coordinate == other.coordinate
            && self.channel == other.channel
            && self.fixed_num_bins == other.fixed_num_bins
            && self.num_bins == other.num_bins
            && self.fixed_bounds == other.fixed_bounds
            && close_to(self.bounds.min, other.bounds.min)
            && close_to(self.bounds.max, other.bounds.max)
    }
}

/// Common surface of the per-kind requirement messages.
pub trait Requirement: Clone + std::fmt::Debug {
    const KIND: RequirementKind;

    /// A record with no configs: tells the backend to stop producing data.
    fn empty(file_id: FileId, region_id: RegionId) -> Self;

    fn key(&self) -> (FileId, RegionId);

    fn config_count(&self) -> usize;

    /// Content equality, insensitive to config order.
    fn same_content(&self, other: &Self) -> bool;

    fn into_record(self) -> RequirementRecord;
}

/// Per-kind map keyed by (file, region).
pub type RequirementsMap<R> = BTreeMap<(FileId, RegionId), R>;

macro_rules! requirement_record {
    ($name:ident, $config:ty, $kind:ident) => {
        #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            pub file_id: FileId,
            pub region_id: RegionId,
            pub configs: Vec<$config>,
        }

        impl $name {
            pub fn new(file_id: FileId, region_id: RegionId) -> Self {
                Self {
                    file_id,
                    region_id,
                    configs: Vec::new(),
                }
            }
        }

        impl Requirement for $name {
            const KIND: RequirementKind = RequirementKind::$kind;

            fn empty(file_id: FileId, region_id: RegionId) -> Self {
                Self::new(file_id, region_id)
            }

            fn key(&self) -> (FileId, RegionId) {
                (self.file_id, self.region_id)
            }

            fn config_count(&self) -> usize {
                self.configs.len()
            }

            fn same_content(&self, other: &Self) -> bool {
                self.key() == other.key()
                    && self.configs.len() == other.configs.len()
                    && self
                        .configs
                        .iter()
                        .all(|c| other.configs.iter().any(|o| config_eq(c, o)))
            }

            fn into_record(self) -> RequirementRecord {
                RequirementRecord::$kind(self)
            }
        }
    };
}

trait ConfigEq {
    fn config_eq(&self, other: &Self) -> bool;
}

fn config_eq<C: ConfigEq>(a: &C, b: &C) -> bool {
    a.config_eq(b)
}

impl ConfigEq for SpatialConfig {
    fn config_eq(&self, other: &Self) -> bool {
        self == other
    }
}

impl ConfigEq for SpectralConfig {
    fn config_eq(&self, other: &Self) -> bool {
        self == other
    }
}

impl ConfigEq for StatsConfig {
    fn config_eq(&self, other: &Self) -> bool {
        self.coordinate == other.coordinate
            && self.stats_types.len() == other.stats_types.len()
            && self.stats_types.iter().all(|s| other.stats_types.contains(s))
    }
}

impl ConfigEq for HistogramConfig {
    fn config_eq(&self, other: &Self) -> bool {
        self.matches(other)
    }
}

requirement_record!(SpatialRequirements, SpatialConfig, SpatialProfile);
requirement_record!(SpectralRequirements, SpectralConfig, SpectralProfile);
requirement_record!(StatsRequirements, StatsConfig, Stats);
requirement_record!(HistogramRequirements, HistogramConfig, Histogram);

/// One outbound requirements message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequirementRecord {
    SpatialProfile(SpatialRequirements),
    SpectralProfile(SpectralRequirements),
    Stats(StatsRequirements),
    Histogram(HistogramRequirements),
}

impl RequirementRecord {
    pub fn kind(&self) -> RequirementKind {
        match self {
            RequirementRecord::SpatialProfile(_) => RequirementKind::SpatialProfile,
            RequirementRecord::SpectralProfile(_) => RequirementKind::SpectralProfile,
            RequirementRecord::Stats(_) => RequirementKind::Stats,
            RequirementRecord::Histogram(_) => RequirementKind::Histogram,
        }
    }

    pub fn key(&self) -> (FileId, RegionId) {
        match self {
            RequirementRecord::SpatialProfile(r) => r.key(),
            RequirementRecord::SpectralProfile(r) => r.key(),
            RequirementRecord::Stats(r) => r.key(),
            RequirementRecord::Histogram(r) => r.key(),
        }
    }

    pub fn config_count(&self) -> usize {
        match self {
            RequirementRecord::SpatialProfile(r) => r.config_count(),
            RequirementRecord::SpectralProfile(r) => r.config_count(),
            RequirementRecord::Stats(r) => r.config_count(),
            RequirementRecord::Histogram(r) => r.config_count(),
        }
    }

    /// A clearing record asks the backend to stop streaming for its key.
    pub fn is_clear(&self) -> bool {
        self.config_count() == 0
    }
}
