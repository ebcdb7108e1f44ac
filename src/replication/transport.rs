//! Outbound message seams for the endpoints

use voxlink_net::{ConnectionId, NetClient, ServerHandle};

use super::protocol::{ClientMessage, ServerMessage};

/// Where the authority sends messages
pub trait ServerOutbox {
    fn send(&mut self, to: ConnectionId, message: ServerMessage);
}

/// Where a replica sends messages
pub trait ClientOutbox {
    fn send(&mut self, message: ClientMessage);
}

impl ServerOutbox for Vec<(ConnectionId, ServerMessage)> {
    fn send(&mut self, to: ConnectionId, message: ServerMessage) {
        self.push((to, message));
    }
}

impl ClientOutbox for Vec<ClientMessage> {
    fn send(&mut self, message: ClientMessage) {
        self.push(message);
    }
}

impl ServerOutbox for ServerHandle<ServerMessage> {
    fn send(&mut self, to: ConnectionId, message: ServerMessage) {
        if !ServerHandle::send(self, to, message) {
            log::debug!("Dropped message for disconnected client {}", to);
        }
    }
}

impl ClientOutbox for NetClient<ServerMessage, ClientMessage> {
    fn send(&mut self, message: ClientMessage) {
        if !NetClient::send(self, message) {
            log::debug!("Dropped message; not connected");
        }
    }
}
