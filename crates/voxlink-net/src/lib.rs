//! Reliable, ordered message channels over TCP for voxlink sessions
//!
//! Messages are newline-delimited JSON. The server and client keep the
//! socket work on a tokio runtime and expose non-blocking polling so a
//! fixed-rate game loop can drive them:
//! ```ignore
//! let runtime = tokio::runtime::Runtime::new()?;
//! let mut server = NetServer::<ClientMsg, ServerMsg>::bind("0.0.0.0:7777", runtime.handle())?;
//! for event in server.poll_events() { /* ... */ }
//! ```

pub mod frame;
pub mod server;
pub mod client;

pub use frame::{FrameError, decode_line, encode_line};
pub use server::{ConnectionId, NetEvent, NetServer, ServerHandle};
pub use client::NetClient;

/// Default session port
pub const DEFAULT_PORT: u16 = 7777;

/// Errors raised while opening connections
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),
}
