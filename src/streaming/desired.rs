//! Desired chunk set around tracked viewpoints, ordered for build priority

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::voxel::chunk::ChunkKey;

/// Size class of a world, bounding how far from the origin chunks exist
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorldSizeTier {
    #[default]
    Small,
    Medium,
    Large,
}

impl WorldSizeTier {
    /// Largest |x| or |z| chunk coordinate that may be loaded
    pub fn radius_limit(self) -> i32 {
        match self {
            Self::Small => 16,
            Self::Medium => 64,
            Self::Large => 256,
        }
    }

    /// Parse a tier name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "small" => Some(Self::Small),
            "medium" => Some(Self::Medium),
            "large" => Some(Self::Large),
            _ => None,
        }
    }
}

/// Whether a key lies inside the square world limit
#[inline]
pub fn within_world_limit(key: ChunkKey, limit: i32) -> bool {
    key.x.abs() <= limit && key.z.abs() <= limit
}

/// Whether a key lies within `radius + pad` of any center
///
/// Chunks inside this band are kept even when no longer desired, so a
/// viewpoint wobbling across the streaming edge does not thrash loads.
pub fn within_unload_band(key: ChunkKey, centers: &[ChunkKey], radius: i32, pad: i32) -> bool {
    let band = radius + pad;
    centers.iter().any(|c| key.chebyshev(*c) <= band)
}

/// Chunks that should be resident, nearest first
#[derive(Clone, Debug, Default)]
pub struct DesiredSet {
    ordered: Vec<ChunkKey>,
    members: HashSet<ChunkKey>,
}

impl DesiredSet {
    /// Compute the union of squares of `radius` around each center
    ///
    /// # Arguments
    /// * `centers` - Chunk under each tracked viewpoint
    /// * `radius` - Render radius in chunks
    /// * `world_limit` - Square world bound from [`WorldSizeTier::radius_limit`]
    pub fn compute(centers: &[ChunkKey], radius: i32, world_limit: i32) -> Self {
        let radius = radius.max(0);
        let mut ordered = Vec::new();
        let mut members = HashSet::new();

        for center in centers {
            // Only the part of the square inside the world limit
            let (x_min, x_max) = ((center.x - radius).max(-world_limit), (center.x + radius).min(world_limit));
            let (z_min, z_max) = ((center.z - radius).max(-world_limit), (center.z + radius).min(world_limit));
            for x in x_min..=x_max {
                for z in z_min..=z_max {
                    let key = ChunkKey::new(x, z);
                    if members.insert(key) {
                        ordered.push(key);
                    }
                }
            }
        }

        // Stable: equal distances keep enumeration order
        ordered.sort_by_key(|key| min_manhattan(*key, centers));

        Self { ordered, members }
    }

    pub fn contains(&self, key: ChunkKey) -> bool {
        self.members.contains(&key)
    }

    /// Keys in build priority order
    pub fn iter(&self) -> impl Iterator<Item = ChunkKey> + '_ {
        self.ordered.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

/// Smallest Manhattan distance from `key` to any center
fn min_manhattan(key: ChunkKey, centers: &[ChunkKey]) -> i32 {
    centers
        .iter()
        .map(|c| key.manhattan(*c))
        .min()
        .unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_limits() {
        assert_eq!(WorldSizeTier::Small.radius_limit(), 16);
        assert_eq!(WorldSizeTier::Medium.radius_limit(), 64);
        assert_eq!(WorldSizeTier::Large.radius_limit(), 256);
        assert_eq!(WorldSizeTier::from_name("LARGE"), Some(WorldSizeTier::Large));
        assert_eq!(WorldSizeTier::from_name("huge"), None);
    }

    #[test]
    fn test_full_square_at_origin() {
        let set = DesiredSet::compute(&[ChunkKey::new(0, 0)], 3, 16);
        assert_eq!(set.len(), 7 * 7);
        for x in -3..=3 {
            for z in -3..=3 {
                assert!(set.contains(ChunkKey::new(x, z)));
            }
        }
        assert!(!set.contains(ChunkKey::new(4, 0)));
    }

    #[test]
    fn test_symmetric() {
        let set = DesiredSet::compute(&[ChunkKey::new(0, 0)], 5, 64);
        for key in set.iter() {
            assert!(set.contains(ChunkKey::new(-key.x, key.z)));
            assert!(set.contains(ChunkKey::new(key.x, -key.z)));
            assert!(set.contains(ChunkKey::new(key.z, key.x)));
        }
    }

    #[test]
    fn test_monotonic_in_radius() {
        let centers = [ChunkKey::new(2, -1)];
        for r in 0..6 {
            let small = DesiredSet::compute(&centers, r, 16);
            let large = DesiredSet::compute(&centers, r + 1, 16);
            assert!(small.iter().all(|k| large.contains(k)));
            assert!(large.len() > small.len());
        }
    }

    #[test]
    fn test_world_limit_clips() {
        let set = DesiredSet::compute(&[ChunkKey::new(16, 0)], 2, 16);
        assert!(set.iter().all(|k| k.x <= 16));
        assert_eq!(set.len(), 3 * 5);
    }

    #[test]
    fn test_huge_radius_covers_world_once() {
        let set = DesiredSet::compute(&[ChunkKey::new(3, -5)], 1_000_000, 16);
        assert_eq!(set.len(), 33 * 33);
        assert!(set.contains(ChunkKey::new(-16, 16)));
        assert_eq!(set.iter().next(), Some(ChunkKey::new(3, -5)));
    }

    #[test]
    fn test_nearest_first() {
        let set = DesiredSet::compute(&[ChunkKey::new(0, 0)], 2, 16);
        let keys: Vec<ChunkKey> = set.iter().collect();
        assert_eq!(keys[0], ChunkKey::new(0, 0));
        let distances: Vec<i32> = keys.iter().map(|k| k.manhattan(ChunkKey::new(0, 0))).collect();
        assert!(distances.windows(2).all(|w| w[0] <= w[1]));
        // Ties keep enumeration order (x outer, z inner)
        assert_eq!(&keys[1..5], &[
            ChunkKey::new(-1, 0),
            ChunkKey::new(0, -1),
            ChunkKey::new(0, 1),
            ChunkKey::new(1, 0),
        ]);
    }

    #[test]
    fn test_union_of_centers() {
        let centers = [ChunkKey::new(0, 0), ChunkKey::new(10, 0)];
        let set = DesiredSet::compute(&centers, 1, 16);
        assert_eq!(set.len(), 18);
        assert!(set.contains(ChunkKey::new(11, 1)));
        assert!(!set.contains(ChunkKey::new(5, 0)));
    }

    #[test]
    fn test_unload_band() {
        let centers = [ChunkKey::new(0, 0)];
        assert!(within_unload_band(ChunkKey::new(3, 0), &centers, 2, 1));
        assert!(within_unload_band(ChunkKey::new(-3, 3), &centers, 2, 1));
        assert!(!within_unload_band(ChunkKey::new(4, 0), &centers, 2, 1));
        assert!(!within_unload_band(ChunkKey::new(0, 0), &[], 2, 1));
    }
}
