//! TCP session server

use std::collections::HashMap;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::NetError;
use crate::frame::{read_frames, write_frames};

/// Identifies one accepted connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, serde::Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Something that happened on the server since the last poll
#[derive(Debug)]
pub enum NetEvent<In> {
    Connected { id: ConnectionId, addr: SocketAddr },
    Message { id: ConnectionId, message: In },
    Disconnected { id: ConnectionId },
}

type PeerMap<Out> = Arc<Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<Out>>>>;

fn lock_peers<Out>(peers: &PeerMap<Out>) -> MutexGuard<'_, HashMap<ConnectionId, mpsc::UnboundedSender<Out>>> {
    peers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cloneable handle for sending to connected peers
pub struct ServerHandle<Out> {
    peers: PeerMap<Out>,
}

impl<Out> Clone for ServerHandle<Out> {
    fn clone(&self) -> Self {
        Self {
            peers: Arc::clone(&self.peers),
        }
    }
}

impl<Out> ServerHandle<Out> {
    /// Queue a message for one peer; `false` if it is gone
    pub fn send(&self, id: ConnectionId, message: Out) -> bool {
        match lock_peers(&self.peers).get(&id) {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    /// Queue a message for every peer
    pub fn broadcast(&self, message: Out)
    where
        Out: Clone,
    {
        for tx in lock_peers(&self.peers).values() {
            let _ = tx.send(message.clone());
        }
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = lock_peers(&self.peers).keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn connection_count(&self) -> usize {
        lock_peers(&self.peers).len()
    }

    /// Drop a peer's send queue, closing its connection
    pub fn kick(&self, id: ConnectionId) -> bool {
        lock_peers(&self.peers).remove(&id).is_some()
    }
}

/// Server handle - keep this alive to keep the server running
///
/// Accepting, reading and writing run on the given runtime; the owner
/// collects [`NetEvent`]s with [`NetServer::poll_events`].
pub struct NetServer<In, Out> {
    local_addr: SocketAddr,
    events: mpsc::UnboundedReceiver<NetEvent<In>>,
    handle: ServerHandle<Out>,
    accept_task: tokio::task::JoinHandle<()>,
}

impl<In, Out> NetServer<In, Out>
where
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + Send + 'static,
{
    /// Bind and start accepting on `runtime`. Returns immediately.
    pub fn bind(addr: impl ToSocketAddrs, runtime: &Handle) -> Result<Self, NetError> {
        let std_listener = std::net::TcpListener::bind(addr)?;
        std_listener.set_nonblocking(true)?;
        let local_addr = std_listener.local_addr()?;

        let _guard = runtime.enter();
        let listener = TcpListener::from_std(std_listener)?;

        let (events_tx, events) = mpsc::unbounded_channel();
        let peers: PeerMap<Out> = Arc::new(Mutex::new(HashMap::new()));
        let accept_task = runtime.spawn(accept_loop(listener, events_tx, Arc::clone(&peers)));

        log::info!("Session server listening on {}", local_addr);

        Ok(Self {
            local_addr,
            events,
            handle: ServerHandle { peers },
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Collect every event that arrived since the last poll
    pub fn poll_events(&mut self) -> Vec<NetEvent<In>> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn handle(&self) -> &ServerHandle<Out> {
        &self.handle
    }

    pub fn send(&self, id: ConnectionId, message: Out) -> bool {
        self.handle.send(id, message)
    }
}

impl<In, Out> Drop for NetServer<In, Out> {
    fn drop(&mut self) {
        self.accept_task.abort();
        lock_peers(&self.handle.peers).clear();
    }
}

async fn accept_loop<In, Out>(
    listener: TcpListener,
    events: mpsc::UnboundedSender<NetEvent<In>>,
    peers: PeerMap<Out>,
) where
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + Send + 'static,
{
    let mut next_id = 1u64;

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let id = ConnectionId(next_id);
                next_id += 1;
                log::info!("Client {} connected from {}", id, addr);

                if let Err(e) = stream.set_nodelay(true) {
                    log::warn!("Failed to set TCP_NODELAY for {}: {}", id, e);
                }

                let (tx, rx) = mpsc::unbounded_channel();
                lock_peers(&peers).insert(id, tx);
                if events.send(NetEvent::Connected { id, addr }).is_err() {
                    // Server dropped
                    break;
                }

                tokio::spawn(handle_connection(stream, id, rx, events.clone(), Arc::clone(&peers)));
            }
            Err(e) => {
                log::error!("Session server accept error: {}", e);
            }
        }
    }
}

async fn handle_connection<In, Out>(
    stream: TcpStream,
    id: ConnectionId,
    outgoing: mpsc::UnboundedReceiver<Out>,
    events: mpsc::UnboundedSender<NetEvent<In>>,
    peers: PeerMap<Out>,
) where
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + Send + 'static,
{
    let (reader, writer) = stream.into_split();
    let peer = id.to_string();
    let writer_task = tokio::spawn(write_frames(writer, peer.clone(), outgoing));

    read_frames(reader, &peer, |message: In| {
        events.send(NetEvent::Message { id, message }).is_ok()
    })
    .await;

    // Closing the queue ends the writer
    lock_peers(&peers).remove(&id);
    let _ = writer_task.await;

    log::info!("Client {} disconnected", id);
    let _ = events.send(NetEvent::Disconnected { id });
}
