use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingType {
    #[default]
    Linear,
    Log,
    Sqrt,
    Square,
    Power,
    Gamma,
}

/// Colour mapping of a frame's pixel values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub scaling: ScalingType,
    pub colormap: String,
    pub inverted: bool,
    pub percentile_rank: f64,
    pub scale_min: f64,
    pub scale_max: f64,
    pub bias: f64,
    pub contrast: f64,
    pub gamma: f64,
    pub alpha: f64,
    /// Bounds come from the whole cube rather than the current channel.
    pub use_cube_histogram: bool,
    /// Progress of a cube histogram in flight, 1.0 when complete.
    pub cube_histogram_progress: Option<f64>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            scaling: ScalingType::Linear,
            colormap: "inferno".to_string(),
            inverted: false,
            percentile_rank: 99.9,
            scale_min: 0.0,
            scale_max: 1.0,
            bias: 0.0,
            contrast: 1.0,
            gamma: 1.0,
            alpha: 1000.0,
            use_cube_histogram: false,
            cube_histogram_progress: None,
        }
    }
}

impl RenderConfig {
    /// Takes over the reference's colour mapping. Histogram state is per
    /// frame and stays.
    pub fn update_from(&mut self, other: &RenderConfig) {
        self.scaling = other.scaling;
        self.colormap.clone_from(&other.colormap);
        self.inverted = other.inverted;
        self.percentile_rank = other.percentile_rank;
        self.scale_min = other.scale_min;
        self.scale_max = other.scale_max;
        self.bias = other.bias;
        self.contrast = other.contrast;
        self.gamma = other.gamma;
        self.alpha = other.alpha;
    }

    /// Falls back to per-channel histograms and drops any cube histogram.
    pub fn use_channel_histogram(&mut self) {
        self.use_cube_histogram = false;
        self.cube_histogram_progress = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_from_keeps_histogram_state() {
        let mut reference = RenderConfig::default();
        reference.scaling = ScalingType::Log;
        reference.colormap = "viridis".into();
        reference.scale_max = 42.0;

        let mut frame = RenderConfig {
            use_cube_histogram: true,
            cube_histogram_progress: Some(0.5),
            ..RenderConfig::default()
        };
        frame.update_from(&reference);
        assert_eq!(frame.scaling, ScalingType::Log);
        assert_eq!(frame.colormap, "viridis");
        assert_eq!(frame.scale_max, 42.0);
        assert!(frame.use_cube_histogram);
        assert_eq!(frame.cube_histogram_progress, Some(0.5));
    }
}
