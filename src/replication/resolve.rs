//! Server-side validation of edit requests

use thiserror::Error;

use crate::core::types::{IVec3, Vec3};
use crate::voxel::block::AIR;
use crate::voxel::chunk::{CHUNK_SIZE_Y, ChunkKey, voxel_to_local, world_to_voxel};
use crate::world::config::ReplicationConfig;

use super::protocol::{BlockEditRequest, EditAction};

/// Fraction of a block the hit point is pushed along the normal before snapping
const HIT_BIAS: f32 = 0.08;

/// Why an edit request was dropped
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("requester position unknown")]
    UnknownRequester,

    #[error("hit point {distance:.1} units away, reach {reach:.1}")]
    OutOfReach { distance: f32, reach: f32 },

    #[error("non-finite hit point or normal")]
    InvalidHit,

    #[error("target height {y} outside the chunk")]
    OutOfHeight { y: i32 },
}

/// Cell an accepted request will write
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedEdit {
    pub key: ChunkKey,
    pub local: IVec3,
    pub block: u8,
}

/// Validate a request and snap it to a cell
///
/// # Arguments
/// * `request` - Request as received
/// * `requester` - Last known position of the requester
/// * `block_size` - World units per voxel
/// * `config` - Reach band
pub fn resolve_edit(
    request: &BlockEditRequest,
    requester: Option<Vec3>,
    block_size: f32,
    config: &ReplicationConfig,
) -> Result<ResolvedEdit, Rejection> {
    if !request.hit_point.is_finite() || !request.hit_normal.is_finite() {
        return Err(Rejection::InvalidHit);
    }

    let position = requester.ok_or(Rejection::UnknownRequester)?;
    let reach = config.clamp_reach(request.claimed_reach);
    let distance = position.distance(request.hit_point);
    if distance > reach {
        return Err(Rejection::OutOfReach { distance, reach });
    }

    let sign = match request.action {
        EditAction::Place => 1.0,
        EditAction::Remove => -1.0,
    };
    let target = request.hit_point + request.hit_normal.normalize_or_zero() * (HIT_BIAS * block_size * sign);
    let (key, local) = voxel_to_local(world_to_voxel(target, block_size));
    if !(0..CHUNK_SIZE_Y).contains(&local.y) {
        return Err(Rejection::OutOfHeight { y: local.y });
    }

    let block = match request.action {
        EditAction::Place => request.block.clamp(0, 255) as u8,
        EditAction::Remove => AIR,
    };

    Ok(ResolvedEdit { key, local, block })
}
