//! Authoritative edit replication between an authority world and replicas

pub mod protocol;
pub mod resolve;
pub mod cell_set;
pub mod transport;
pub mod authority;
pub mod replica;

pub use protocol::{BlockEditOp, BlockEditRequest, ClientMessage, EditAction, ServerMessage};
pub use resolve::{Rejection, ResolvedEdit, resolve_edit};
pub use cell_set::{CellSetDiff, CellSetMirror, ReplicatedCellSet};
pub use transport::{ClientOutbox, ServerOutbox};
pub use authority::{AuthorityEndpoint, AuthorityEvent, Observer};
pub use replica::{LOCAL_VIEWPOINT, ReplicaEndpoint};
