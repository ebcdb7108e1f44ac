//! TCP session client

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::NetError;
use crate::frame::{read_frames, write_frames};

/// Connection to a session server
///
/// Reading and writing run on the runtime; [`NetClient::poll`] collects
/// received messages without blocking.
pub struct NetClient<In, Out> {
    peer: SocketAddr,
    outgoing: mpsc::UnboundedSender<Out>,
    incoming: mpsc::UnboundedReceiver<In>,
    connected: Arc<AtomicBool>,
}

impl<In, Out> NetClient<In, Out>
where
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + Send + 'static,
{
    /// Connect and start the socket tasks on `runtime`
    pub fn connect(addr: impl ToSocketAddrs, runtime: &Handle) -> Result<Self, NetError> {
        let std_stream = std::net::TcpStream::connect(addr)?;
        std_stream.set_nodelay(true)?;
        std_stream.set_nonblocking(true)?;
        let peer = std_stream.peer_addr()?;

        let _guard = runtime.enter();
        let stream = TcpStream::from_std(std_stream)?;
        let (reader, writer) = stream.into_split();

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));

        runtime.spawn(write_frames(writer, peer.to_string(), outgoing_rx));

        let flag = Arc::clone(&connected);
        runtime.spawn(async move {
            let label = peer.to_string();
            read_frames(reader, &label, |message: In| incoming_tx.send(message).is_ok()).await;
            flag.store(false, Ordering::Release);
            log::info!("Disconnected from {}", label);
        });

        log::info!("Connected to {}", peer);

        Ok(Self {
            peer,
            outgoing,
            incoming,
            connected,
        })
    }

    /// Queue a message; `false` once the connection is gone
    pub fn send(&self, message: Out) -> bool {
        self.is_connected() && self.outgoing.send(message).is_ok()
    }

    /// Collect every message received since the last poll
    pub fn poll(&mut self) -> Vec<In> {
        let mut messages = Vec::new();
        while let Ok(message) = self.incoming.try_recv() {
            messages.push(message);
        }
        messages
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{NetEvent, NetServer};
    use serde::Deserialize;
    use std::time::{Duration, Instant};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    enum Up {
        Hello(String),
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    enum Down {
        Welcome(u32),
    }

    fn wait_until<T>(mut f: impl FnMut() -> Option<T>) -> T {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(value) = f() {
                return value;
            }
            assert!(Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_loopback_exchange() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        let mut server = NetServer::<Up, Down>::bind("127.0.0.1:0", runtime.handle()).unwrap();
        let mut client =
            NetClient::<Down, Up>::connect(server.local_addr(), runtime.handle()).unwrap();
        assert!(client.send(Up::Hello("alice".to_string())));

        let mut id = None;
        let message = wait_until(|| {
            for event in server.poll_events() {
                match event {
                    NetEvent::Connected { id: new_id, .. } => id = Some(new_id),
                    NetEvent::Message { id: from, message } => return Some((from, message)),
                    NetEvent::Disconnected { .. } => {}
                }
            }
            None
        });
        assert_eq!(Some(message.0), id);
        assert_eq!(message.1, Up::Hello("alice".to_string()));

        assert!(server.send(message.0, Down::Welcome(7)));
        server.handle().broadcast(Down::Welcome(8));
        let mut received = Vec::new();
        wait_until(|| {
            received.extend(client.poll());
            (received.len() >= 2).then_some(())
        });
        assert_eq!(received, vec![Down::Welcome(7), Down::Welcome(8)]);

        // Dropping the client is seen as a disconnect
        drop(client);
        wait_until(|| {
            server
                .poll_events()
                .into_iter()
                .any(|e| matches!(e, NetEvent::Disconnected { .. }))
                .then_some(())
        });
        assert_eq!(server.handle().connection_count(), 0);
    }
}
