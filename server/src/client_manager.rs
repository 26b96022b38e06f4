//! Connection tracking for UDP peers
//!
//! This module gives every peer that sends `Connect` a stable
//! [`ConnectionId`], which is also the registry key for its snake. It handles:
//! - Client connection lifecycle (connect, disconnect, timeout)
//! - Address lookup for inbound packets
//! - Connection health monitoring and automatic cleanup
//! - Client capacity management
//!
//! It holds no game state. Removing a client here does not remove its snake;
//! the caller forwards that to the session layer.

use log::info;
use shared::ConnectionId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A connected peer.
#[derive(Debug)]
pub struct Client {
    pub connection_id: ConnectionId,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
}

impl Client {
    pub fn new(connection_id: ConnectionId, addr: SocketAddr) -> Self {
        Self {
            connection_id,
            addr,
            last_seen: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Returns true if no packets have been received within `timeout`.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages all connected clients
///
/// Connection ids are `client-<n>` with `n` counting up from 1 for the
/// lifetime of the manager, so an id is never reused after a disconnect.
pub struct ClientManager {
    clients: HashMap<ConnectionId, Client>,
    next_client_id: u64,
    max_clients: usize,
    timeout: Duration,
}

impl ClientManager {
    pub fn new(max_clients: usize, timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
            timeout,
        }
    }

    /// Attempts to add a new client connection
    ///
    /// Returns `None` if the server is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<ConnectionId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let connection_id = ConnectionId::new(format!("client-{}", self.next_client_id));
        self.next_client_id += 1;

        info!("Client {} connected from {}", connection_id, addr);
        self.clients.insert(
            connection_id.clone(),
            Client::new(connection_id.clone(), addr),
        );

        Some(connection_id)
    }

    /// Returns true if the client was found and removed.
    pub fn remove_client(&mut self, connection_id: &ConnectionId) -> bool {
        if let Some(client) = self.clients.remove(connection_id) {
            info!("Client {} disconnected", client.connection_id);
            true
        } else {
            false
        }
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<ConnectionId> {
        self.clients
            .values()
            .find(|client| client.addr == addr)
            .map(|client| client.connection_id.clone())
    }

    pub fn addr_of(&self, connection_id: &ConnectionId) -> Option<SocketAddr> {
        self.clients.get(connection_id).map(|client| client.addr)
    }

    /// Marks the client as alive. Returns false for unknown ids.
    pub fn touch(&mut self, connection_id: &ConnectionId) -> bool {
        if let Some(client) = self.clients.get_mut(connection_id) {
            client.touch();
            true
        } else {
            false
        }
    }

    /// Removes clients silent for longer than the timeout and returns their ids.
    pub fn check_timeouts(&mut self) -> Vec<ConnectionId> {
        let timeout = self.timeout;
        let timed_out: Vec<ConnectionId> = self
            .clients
            .values()
            .filter(|client| client.is_timed_out(timeout))
            .map(|client| client.connection_id.clone())
            .collect();

        for connection_id in &timed_out {
            self.remove_client(connection_id);
        }

        timed_out
    }

    /// Ids and addresses of every connected client, for broadcasting.
    pub fn get_client_addrs(&self) -> Vec<(ConnectionId, SocketAddr)> {
        self.clients
            .values()
            .map(|client| (client.connection_id.clone(), client.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
