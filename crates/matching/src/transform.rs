use foundation::math::Vec2;
use serde::{Deserialize, Serialize};

use crate::wcs::WcsError;

/// Similarity transform from a secondary frame's pixels into its spatial
/// reference's pixels, linearised around `origin`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpatialTransform {
    pub translation: Vec2,
    /// Radians, counter-clockwise.
    pub rotation: f64,
    pub scale: f64,
    pub origin: Vec2,
}

/// Rotates and scales `point` about `origin`.
pub fn scale_and_rotate_about(point: Vec2, origin: Vec2, scale: f64, rotation: f64) -> Vec2 {
    origin + (point - origin).rotate(rotation) * scale
}

impl SpatialTransform {
    pub const IDENTITY: SpatialTransform = SpatialTransform {
        translation: Vec2::ZERO,
        rotation: 0.0,
        scale: 1.0,
        origin: Vec2::ZERO,
    };

    /// Linearises a pixel mapping around `reference_pixel`.
    ///
    /// A unit step towards +y is pushed through `map`; its length gives the
    /// scale and its turn the rotation. The translation is where the reference
    /// pixel itself lands.
    pub fn from_mapping<F>(map: F, reference_pixel: Vec2) -> Result<Self, WcsError>
    where
        F: Fn(Vec2) -> Result<Vec2, WcsError>,
    {
        let north = Vec2::new(0.0, 1.0);
        let mapped_origin = map(reference_pixel)?;
        let mapped_north = map(reference_pixel + north)? - mapped_origin;

        let transform = SpatialTransform {
            translation: mapped_origin - reference_pixel,
            rotation: mapped_north.angle() - north.angle(),
            scale: mapped_north.length() / north.length(),
            origin: reference_pixel,
        };
        if transform.is_finite() && transform.scale > 0.0 {
            Ok(transform)
        } else {
            Err(WcsError::NonFinite)
        }
    }

    pub fn is_finite(&self) -> bool {
        self.translation.is_finite()
            && self.rotation.is_finite()
            && self.scale.is_finite()
            && self.origin.is_finite()
    }

    /// Secondary pixel to reference pixel.
    pub fn forward(&self, point: Vec2) -> Vec2 {
        scale_and_rotate_about(point, self.origin, self.scale, self.rotation) + self.translation
    }

    /// Reference pixel to secondary pixel.
    pub fn inverse(&self, point: Vec2) -> Vec2 {
        scale_and_rotate_about(
            point - self.translation,
            self.origin,
            1.0 / self.scale,
            -self.rotation,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Vec2, b: Vec2) -> bool {
        a.distance(b) < 1e-9
    }

    #[test]
    fn identity_mapping_gives_identity_transform() {
        let t = SpatialTransform::from_mapping(Ok, Vec2::new(10.0, 20.0)).unwrap();
        assert_eq!(t.scale, 1.0);
        assert_eq!(t.rotation, 0.0);
        assert_eq!(t.translation, Vec2::ZERO);
        assert!(close(t.forward(Vec2::new(3.0, 4.0)), Vec2::new(3.0, 4.0)));
    }

    #[test]
    fn half_sampling_scales_by_half() {
        let t = SpatialTransform::from_mapping(|p| Ok(p * 0.5), Vec2::new(50.0, 50.0)).unwrap();
        assert!((t.scale - 0.5).abs() < 1e-12);
        assert!(close(t.forward(Vec2::new(200.0, 100.0)), Vec2::new(100.0, 50.0)));
        assert!(close(t.inverse(Vec2::new(100.0, 100.0)), Vec2::new(200.0, 200.0)));
    }

    #[test]
    fn rotation_and_shift_round_trip() {
        let map = |p: Vec2| Ok(p.rotate(0.3) + Vec2::new(5.0, -2.0));
        let t = SpatialTransform::from_mapping(map, Vec2::new(12.0, 7.0)).unwrap();
        assert!((t.rotation - 0.3).abs() < 1e-12);
        let p = Vec2::new(40.0, -3.0);
        assert!(close(t.forward(p), map(p).unwrap()));
        assert!(close(t.inverse(t.forward(p)), p));
    }

    #[test]
    fn degenerate_mapping_is_refused() {
        let collapse = |_p: Vec2| Ok(Vec2::ZERO);
        assert_eq!(
            SpatialTransform::from_mapping(collapse, Vec2::ZERO),
            Err(WcsError::NonFinite)
        );
        let nan = |_p: Vec2| Ok(Vec2::new(f64::NAN, 0.0));
        assert!(SpatialTransform::from_mapping(nan, Vec2::ZERO).is_err());
    }
}
