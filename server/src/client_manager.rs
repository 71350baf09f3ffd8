//! Table of admitted clients and their UDP endpoints
//!
//! This module tracks which human client occupies which car slot:
//! - Session id to client handle, one entry per occupied slot
//! - UDP source address to session id, filled in by the UDP association
//! - Ping health so silent clients can be disconnected
//!
//! Handles are shared, the UDP map only ever refers to session ids, so a
//! stale address never keeps a client alive.

use log::{debug, info};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::connection::{ClientHandle, ConnectionState};

/// Tracks every client from admission until its slot is released
pub struct ClientManager {
    /// Admitted clients indexed by session id
    clients: HashMap<u8, Arc<ClientHandle>>,
    /// UDP source addresses of associated clients
    udp_addrs: HashMap<SocketAddr, u8>,
    /// Maximum number of concurrent clients allowed
    max_clients: usize,
}

impl ClientManager {
    /// Creates an empty table that admits at most `max_clients` clients
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            udp_addrs: HashMap::new(),
            max_clients,
        }
    }

    /// Registers an admitted client under its session id
    ///
    /// Returns false if the table is full or the slot is already taken.
    pub fn add_client(&mut self, client: Arc<ClientHandle>) -> bool {
        if self.clients.len() >= self.max_clients || self.clients.contains_key(&client.session_id) {
            return false;
        }

        info!(
            "Client {} ({}) admitted from {}",
            client.session_id, client.name, client.addr
        );
        self.clients.insert(client.session_id, client);
        true
    }

    /// Removes a client and forgets its UDP endpoint
    ///
    /// Returns the handle if it was still registered, so cleanup runs once
    /// no matter how many disconnect paths race.
    pub fn remove_client(&mut self, session_id: u8) -> Option<Arc<ClientHandle>> {
        let client = self.clients.remove(&session_id)?;
        self.udp_addrs.retain(|_, id| *id != session_id);
        info!("Client {} ({}) removed", session_id, client.name);
        Some(client)
    }

    pub fn get(&self, session_id: u8) -> Option<Arc<ClientHandle>> {
        self.clients.get(&session_id).cloned()
    }

    pub fn is_occupied(&self, session_id: u8) -> bool {
        self.clients.contains_key(&session_id)
    }

    pub fn find_by_guid(&self, guid: u64) -> Option<Arc<ClientHandle>> {
        self.clients.values().find(|client| client.guid == guid).cloned()
    }

    /// Finds the client that owns a UDP source address
    ///
    /// Used to route every incoming datagram. Unknown addresses yield None
    /// and the datagram is dropped by the caller.
    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<Arc<ClientHandle>> {
        self.udp_addrs
            .get(&addr)
            .and_then(|session_id| self.clients.get(session_id))
            .cloned()
    }

    /// Associates a UDP address with a registered client
    ///
    /// The datagram must come from the same IP as the TCP connection.
    /// Returns false when the client is unknown or the IP differs.
    pub fn bind_udp(&mut self, session_id: u8, addr: SocketAddr) -> bool {
        let client = match self.clients.get(&session_id) {
            Some(client) => client,
            None => return false,
        };
        if client.addr.ip() != addr.ip() {
            debug!(
                "UDP association for client {} from {} does not match {}",
                session_id, addr, client.addr
            );
            return false;
        }

        if let Some(previous) = client.udp_addr() {
            if previous != addr {
                self.udp_addrs.remove(&previous);
            }
        }
        client.set_udp_addr(addr);
        self.udp_addrs.insert(addr, session_id);
        true
    }

    /// Lists clients that have not answered a ping within `timeout`
    ///
    /// Only clients that got past the handshake are considered. The caller
    /// disconnects them, which removes them from the table.
    pub fn check_timeouts(&self, timeout: Duration) -> Vec<Arc<ClientHandle>> {
        self.clients
            .values()
            .filter(|client| {
                matches!(
                    client.state(),
                    ConnectionState::ChecksumExchange | ConnectionState::Active
                ) && client.since_last_pong() > timeout
            })
            .cloned()
            .collect()
    }

    /// Every registered client, in session id order
    pub fn all(&self) -> Vec<Arc<ClientHandle>> {
        let mut clients: Vec<_> = self.clients.values().cloned().collect();
        clients.sort_by_key(|client| client.session_id);
        clients
    }

    /// Clients in the Active state, in session id order
    pub fn active(&self) -> Vec<Arc<ClientHandle>> {
        let mut clients: Vec<_> = self
            .clients
            .values()
            .filter(|client| client.is_active())
            .cloned()
            .collect();
        clients.sort_by_key(|client| client.session_id);
        clients
    }

    /// Returns the number of admitted clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no clients are admitted
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }
}
