//! World instances: resident chunk records driven by the streaming scheduler

pub mod config;
pub mod record;
pub mod sink;
pub mod readiness;
pub mod context;

pub use config::{ReplicationConfig, WorldConfig};
pub use record::ChunkRecord;
pub use sink::{NullSink, RenderSink, VisualHandle};
pub use readiness::Readiness;
pub use context::{EditOutcome, NetApply, PendingCell, ViewpointId, WorldContext, WorldRole};
