use serde::{Deserialize, Serialize};

/// Axis along which one frame can follow another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchingAxis {
    Spatial,
    Spectral,
    /// Colour scaling and colormap.
    Raster,
}

impl MatchingAxis {
    pub const ALL: [MatchingAxis; 3] = [
        MatchingAxis::Spatial,
        MatchingAxis::Spectral,
        MatchingAxis::Raster,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MatchingAxis::Spatial => "spatial",
            MatchingAxis::Spectral => "spectral",
            MatchingAxis::Raster => "raster scaling",
        }
    }
}

impl std::fmt::Display for MatchingAxis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
