use serde::{Deserialize, Serialize};

/// Backend file id of an open image cube.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub i32);

impl FileId {
    pub fn new(n: i32) -> Self {
        FileId(n)
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "file {}", self.0)
    }
}

/// Region id within a file. Negative ids and zero are reserved.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(pub i32);

impl RegionId {
    /// The whole image.
    pub const IMAGE: RegionId = RegionId(-1);
    /// The cursor point region every frame carries.
    pub const CURSOR: RegionId = RegionId(0);
    /// Cube-wide histogram pseudo region.
    pub const CUBE_HISTOGRAM: RegionId = RegionId(-2);

    pub fn new(n: i32) -> Self {
        RegionId(n)
    }

    pub fn is_image(self) -> bool {
        self == Self::IMAGE
    }

    pub fn is_cursor(self) -> bool {
        self == Self::CURSOR
    }
}

#[cfg(test)]
mod tests {
    use super::{FileId, RegionId};

    #[test]
    fn reserved_region_ids() {
        assert!(RegionId::IMAGE.is_image());
        assert!(RegionId::CURSOR.is_cursor());
        assert!(!RegionId::new(3).is_cursor());
    }

    #[test]
    fn ids_order_numerically() {
        let mut ids = vec![FileId(3), FileId(-1), FileId(0)];
        ids.sort();
        assert_eq!(ids, vec![FileId(-1), FileId(0), FileId(3)]);
    }
}
