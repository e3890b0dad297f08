use serde::{Deserialize, Serialize};
use streaming::protocol::StreamingConfig;
use thiserror::Error;

use crate::axis::MatchingAxis;
use crate::wcs::SpectralMatching;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed session config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Where zooming with the wheel keeps the image fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoomPoint {
    #[default]
    Cursor,
    Center,
}

/// Session-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Streams one mip coarser and slows the cursor down.
    pub low_bandwidth_mode: bool,
    pub spectral_matching: SpectralMatching,
    pub zoom_point: ZoomPoint,
    /// Spatial profiles ignore the view and stream at full resolution.
    pub cursor_frozen: bool,
    /// Axes on which newly opened frames follow the session reference.
    pub auto_match: Vec<MatchingAxis>,
    /// Period of the requirements reconciliation tick (ms).
    pub requirements_interval_ms: u64,
    pub streaming: StreamingConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            low_bandwidth_mode: false,
            spectral_matching: SpectralMatching::VelocityRadio,
            zoom_point: ZoomPoint::Cursor,
            cursor_frozen: false,
            auto_match: Vec::new(),
            requirements_interval_ms: 200,
            streaming: StreamingConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Parses a (possibly partial) JSON config; missing fields keep their
    /// defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.streaming;
        let checks = [
            ("requirements_interval_ms", self.requirements_interval_ms),
            ("streaming.image_throttle_ms", s.image_throttle_ms),
            ("streaming.channel_throttle_ms", s.channel_throttle_ms),
            ("streaming.cursor_throttle_ms", s.cursor_throttle_ms),
            ("streaming.cursor_throttle_rotated_ms", s.cursor_throttle_rotated_ms),
            ("streaming.tile_size", u64::from(s.tile_size)),
        ];
        match checks.iter().find(|(_, v)| *v == 0) {
            Some((name, _)) => Err(ConfigError::Zero(*name)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_is_default() {
        assert_eq!(SessionConfig::from_json_str("{}").unwrap(), SessionConfig::default());
    }

    #[test]
    fn partial_json_overrides_nested_fields() {
        let config = SessionConfig::from_json_str(
            r#"{"low_bandwidth_mode": true, "spectral_matching": "frequency",
                "streaming": {"image_throttle_ms": 20}}"#,
        )
        .unwrap();
        assert!(config.low_bandwidth_mode);
        assert_eq!(config.spectral_matching, SpectralMatching::Frequency);
        assert_eq!(config.streaming.image_throttle_ms, 20);
        assert_eq!(config.streaming.channel_throttle_ms, 500);
    }

    #[test]
    fn rejects_malformed_and_zero_values() {
        assert!(matches!(SessionConfig::from_json_str("{"), Err(ConfigError::Parse(_))));
        assert!(matches!(
            SessionConfig::from_json_str(r#"{"streaming": {"tile_size": 0}}"#),
            Err(ConfigError::Zero("streaming.tile_size"))
        ));
        assert!(matches!(
            SessionConfig::from_json_str(r#"{"requirements_interval_ms": 0}"#),
            Err(ConfigError::Zero("requirements_interval_ms"))
        ));
    }
}
