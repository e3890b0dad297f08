use crate::math::Vec2;

/// Axis-aligned bounding box in pixel space.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb2 {
    pub min: Vec2,
    pub max: Vec2,
}

impl Aabb2 {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Aabb2 { min, max }
    }

    /// Smallest box containing every point. `None` for an empty input.
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = Vec2>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut out = Aabb2::new(first, first);
        for p in iter {
            out.min.x = out.min.x.min(p.x);
            out.min.y = out.min.y.min(p.y);
            out.max.x = out.max.x.max(p.x);
            out.max.y = out.max.y.max(p.y);
        }
        Some(out)
    }

    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    pub fn center(&self) -> Vec2 {
        (self.min + self.max) / 2.0
    }

    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    /// Overlap of two boxes, `None` when they do not intersect.
    pub fn intersect(&self, other: &Aabb2) -> Option<Aabb2> {
        let min = Vec2::new(self.min.x.max(other.min.x), self.min.y.max(other.min.y));
        let max = Vec2::new(self.max.x.min(other.max.x), self.max.y.min(other.max.y));
        if min.x > max.x || min.y > max.y {
            return None;
        }
        Some(Aabb2::new(min, max))
    }
}

#[cfg(test)]
mod tests {
    use super::Aabb2;
    use crate::math::Vec2;

    #[test]
    fn from_points_covers_all_corners() {
        let b = Aabb2::from_points([
            Vec2::new(2.0, -1.0),
            Vec2::new(-3.0, 4.0),
            Vec2::new(0.0, 0.0),
        ])
        .unwrap();
        assert_eq!(b.min, Vec2::new(-3.0, -1.0));
        assert_eq!(b.max, Vec2::new(2.0, 4.0));
        assert!(Aabb2::from_points(std::iter::empty()).is_none());
    }

    #[test]
    fn intersect_clips_and_rejects_disjoint() {
        let a = Aabb2::new(Vec2::new(0.0, 0.0), Vec2::new(10.0, 10.0));
        let b = Aabb2::new(Vec2::new(5.0, -5.0), Vec2::new(20.0, 5.0));
        let c = a.intersect(&b).unwrap();
        assert_eq!(c.min, Vec2::new(5.0, 0.0));
        assert_eq!(c.max, Vec2::new(10.0, 5.0));

        let far = Aabb2::new(Vec2::new(11.0, 11.0), Vec2::new(12.0, 12.0));
        assert!(a.intersect(&far).is_none());
    }
}
