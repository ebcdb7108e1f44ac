//! Ray type and voxel grid traversal

use crate::core::types::{IVec3, Vec3};
use crate::voxel::chunk::world_to_voxel;

/// A ray defined by origin and unit direction
#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    /// Create a new ray; the direction is normalized (zero stays zero)
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize_or_zero(),
        }
    }

    /// Get point along ray at parameter t
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

/// First solid voxel struck by a ray
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VoxelHit {
    /// Global voxel coordinate that was hit
    pub voxel: IVec3,
    /// World-space point where the ray enters the voxel
    pub point: Vec3,
    /// Outward normal of the face that was entered
    pub normal: Vec3,
    /// Distance along the ray
    pub distance: f32,
}

/// Walk the voxel grid along `ray` (Amanatides & Woo) and return the first
/// voxel for which `is_solid` holds.
///
/// Voxels are centered on multiples of `block_size`. The voxel containing
/// the origin is never reported.
pub fn cast_voxels(
    ray: &Ray,
    max_distance: f32,
    block_size: f32,
    mut is_solid: impl FnMut(IVec3) -> bool,
) -> Option<VoxelHit> {
    if ray.direction == Vec3::ZERO || block_size <= 0.0 || max_distance <= 0.0 {
        return None;
    }

    let dir = ray.direction.to_array();
    // Grid space: voxel i spans [i, i + 1)
    let grid = (ray.origin / block_size + Vec3::splat(0.5)).to_array();
    let mut voxel = world_to_voxel(ray.origin, block_size).to_array();

    let mut step = [0i32; 3];
    let mut t_max = [f32::INFINITY; 3];
    let mut t_delta = [f32::INFINITY; 3];

    for axis in 0..3 {
        if dir[axis] > 0.0 {
            step[axis] = 1;
            t_delta[axis] = block_size / dir[axis];
            t_max[axis] = (voxel[axis] as f32 + 1.0 - grid[axis]) * block_size / dir[axis];
        } else if dir[axis] < 0.0 {
            step[axis] = -1;
            t_delta[axis] = block_size / -dir[axis];
            t_max[axis] = (grid[axis] - voxel[axis] as f32) * block_size / -dir[axis];
        }
    }

    let max_steps = (max_distance / block_size).ceil() as usize * 3 + 3;
    for _ in 0..max_steps {
        let axis = if t_max[0] <= t_max[1] && t_max[0] <= t_max[2] {
            0
        } else if t_max[1] <= t_max[2] {
            1
        } else {
            2
        };

        let t = t_max[axis];
        if t > max_distance {
            return None;
        }

        voxel[axis] += step[axis];
        t_max[axis] += t_delta[axis];

        let current = IVec3::from_array(voxel);
        if is_solid(current) {
            let mut normal = [0.0f32; 3];
            normal[axis] = -step[axis] as f32;
            return Some(VoxelHit {
                voxel: current,
                point: ray.at(t),
                normal: Vec3::from_array(normal),
                distance: t,
            });
        }
    }

    None
}
