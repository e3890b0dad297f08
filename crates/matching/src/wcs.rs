//! Coordinate-system services the matching engine consumes.
//!
//! Real astrometry lives behind [`WcsProvider`]. [`LinearWcsProvider`] is a
//! flat-sky stand-in with a linear frequency axis, enough for scripted
//! sessions and tests.

use std::collections::BTreeMap;

use foundation::math::Vec2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transform::SpatialTransform;

/// Speed of light in m/s.
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Opaque handle to a coordinate system owned by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WcsHandle(pub u32);

/// Convention used to line up channels of spectrally matched frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpectralMatching {
    /// Channel indices are copied as-is.
    Channel,
    /// Radio velocity relative to each frame's rest frequency.
    #[default]
    VelocityRadio,
    Frequency,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WcsError {
    #[error("unknown coordinate system {0:?}")]
    UnknownHandle(WcsHandle),
    #[error("pixel mapping from {src:?} to {dst:?} is singular")]
    Singular { src: WcsHandle, dst: WcsHandle },
    #[error("spatial transform is not finite")]
    NonFinite,
    #[error("{0:?} has no spectral axis")]
    NoSpectralAxis(WcsHandle),
    #[error("{matching:?} is unavailable for {handle:?}")]
    ConventionUnavailable {
        handle: WcsHandle,
        matching: SpectralMatching,
    },
}

pub trait WcsProvider {
    /// Pixel of `src` to pixel of `dst` through world coordinates.
    fn map_pixel(&self, src: WcsHandle, dst: WcsHandle, point: Vec2) -> Result<Vec2, WcsError>;

    /// Linear approximation of [`map_pixel`](WcsProvider::map_pixel) around
    /// `reference_pixel`.
    fn compute_transform(
        &self,
        src: WcsHandle,
        dst: WcsHandle,
        reference_pixel: Vec2,
    ) -> Result<SpatialTransform, WcsError> {
        SpatialTransform::from_mapping(|p| self.map_pixel(src, dst, p), reference_pixel)
    }

    /// Spectral coordinate of a (fractional) channel.
    fn spectral_value(&self, wcs: WcsHandle, matching: SpectralMatching, channel: f64) -> Result<f64, WcsError>;

    /// Fractional channel of a spectral coordinate.
    fn spectral_channel(&self, wcs: WcsHandle, matching: SpectralMatching, value: f64) -> Result<f64, WcsError>;

    /// Channel of `dst` that shows what `channel` of `src` shows.
    fn transformed_channel(
        &self,
        src: WcsHandle,
        dst: WcsHandle,
        matching: SpectralMatching,
        channel: f64,
    ) -> Result<f64, WcsError> {
        if matching == SpectralMatching::Channel {
            return Ok(channel);
        }
        let value = self.spectral_value(src, matching, channel)?;
        let mapped = self.spectral_channel(dst, matching, value)?;
        if mapped.is_finite() {
            Ok(mapped)
        } else {
            Err(WcsError::NonFinite)
        }
    }
}

/// Linear frequency axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectralAxis {
    pub crpix: f64,
    /// Hz.
    pub crval: f64,
    /// Hz per channel.
    pub cdelt: f64,
    #[serde(default)]
    pub rest_frequency: Option<f64>,
}

impl SpectralAxis {
    fn frequency(&self, channel: f64) -> f64 {
        self.crval + (channel - self.crpix) * self.cdelt
    }

    fn channel(&self, frequency: f64) -> f64 {
        self.crpix + (frequency - self.crval) / self.cdelt
    }
}

/// Flat-sky linear coordinate system: world = crval + R(rotation) * ((p - crpix) * cdelt).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearWcs {
    pub crpix: Vec2,
    pub crval: Vec2,
    pub cdelt: Vec2,
    /// Degrees.
    #[serde(default)]
    pub rotation: f64,
    #[serde(default)]
    pub spectral: Option<SpectralAxis>,
}

impl LinearWcs {
    pub fn new(crpix: Vec2, crval: Vec2, cdelt: Vec2) -> Self {
        Self {
            crpix,
            crval,
            cdelt,
            rotation: 0.0,
            spectral: None,
        }
    }

    pub fn with_rotation(mut self, degrees: f64) -> Self {
        self.rotation = degrees;
        self
    }

    pub fn with_spectral(mut self, axis: SpectralAxis) -> Self {
        self.spectral = Some(axis);
        self
    }

    fn pixel_to_world(&self, p: Vec2) -> Vec2 {
        let d = p - self.crpix;
        self.crval + Vec2::new(d.x * self.cdelt.x, d.y * self.cdelt.y).rotate(self.rotation.to_radians())
    }

    fn world_to_pixel(&self, w: Vec2) -> Vec2 {
        let d = (w - self.crval).rotate(-self.rotation.to_radians());
        self.crpix + Vec2::new(d.x / self.cdelt.x, d.y / self.cdelt.y)
    }

    fn is_singular(&self) -> bool {
        self.cdelt.x == 0.0 || self.cdelt.y == 0.0
    }
}

/// Registry of [`LinearWcs`] keyed by handle.
#[derive(Debug, Clone, Default)]
pub struct LinearWcsProvider {
    systems: BTreeMap<WcsHandle, LinearWcs>,
    next: u32,
}

impl LinearWcsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, wcs: LinearWcs) -> WcsHandle {
        let handle = WcsHandle(self.next);
        self.next += 1;
        self.systems.insert(handle, wcs);
        handle
    }

    pub fn get(&self, handle: WcsHandle) -> Option<&LinearWcs> {
        self.systems.get(&handle)
    }

    fn system(&self, handle: WcsHandle) -> Result<&LinearWcs, WcsError> {
        self.systems.get(&handle).ok_or(WcsError::UnknownHandle(handle))
    }

    fn spectral_axis(&self, handle: WcsHandle) -> Result<&SpectralAxis, WcsError> {
        self.system(handle)?
            .spectral
            .as_ref()
            .filter(|axis| axis.cdelt != 0.0)
            .ok_or(WcsError::NoSpectralAxis(handle))
    }

    fn rest_frequency(&self, handle: WcsHandle, axis: &SpectralAxis) -> Result<f64, WcsError> {
        axis.rest_frequency
            .filter(|f| *f > 0.0)
            .ok_or(WcsError::ConventionUnavailable {
                handle,
                matching: SpectralMatching::VelocityRadio,
            })
    }
}

impl WcsProvider for LinearWcsProvider {
    fn map_pixel(&self, src: WcsHandle, dst: WcsHandle, point: Vec2) -> Result<Vec2, WcsError> {
        let from = self.system(src)?;
        let to = self.system(dst)?;
        if from.is_singular() || to.is_singular() {
            return Err(WcsError::Singular { src, dst });
        }
        Ok(to.world_to_pixel(from.pixel_to_world(point)))
    }

    fn spectral_value(&self, wcs: WcsHandle, matching: SpectralMatching, channel: f64) -> Result<f64, WcsError> {
        let axis = self.spectral_axis(wcs)?;
        let frequency = axis.frequency(channel);
        match matching {
            SpectralMatching::Channel => Ok(channel),
            SpectralMatching::Frequency => Ok(frequency),
            SpectralMatching::VelocityRadio => {
                let rest = self.rest_frequency(wcs, axis)?;
                Ok(SPEED_OF_LIGHT * (1.0 - frequency / rest))
            }
        }
    }

    fn spectral_channel(&self, wcs: WcsHandle, matching: SpectralMatching, value: f64) -> Result<f64, WcsError> {
        let axis = self.spectral_axis(wcs)?;
        match matching {
            SpectralMatching::Channel => Ok(value),
            SpectralMatching::Frequency => Ok(axis.channel(value)),
            SpectralMatching::VelocityRadio => {
                let rest = self.rest_frequency(wcs, axis)?;
                Ok(axis.channel(rest * (1.0 - value / SPEED_OF_LIGHT)))
            }
        }
    }
}
