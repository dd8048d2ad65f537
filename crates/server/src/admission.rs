//! Connection admission.
//!
//! [`ConnectionLimitingClientHandler`] counts open connections, in total and
//! per network, and closes sockets that would exceed either limit before any
//! byte is read from them. A network is one IPv4 address or one IPv6 /56
//! prefix, the usual size of a single subscriber's allocation.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::client_handler::{ClientContext, ClientHandler};
use crate::config::ServerConfig;
use crate::connection::SocketAddress;
use crate::error::ServerError;
use crate::listener::{AcceptedSocket, Listener};

/// Bits of an IPv6 address that identify its network.
const IPV6_NETWORK_PREFIX_BITS: u32 = 56;

/// The bucket a connection is counted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkKey {
    V4(Ipv4Addr),
    /// The address with everything past the /56 prefix zeroed.
    V6(Ipv6Addr),
    Unix,
}

impl NetworkKey {
    pub fn of(address: &SocketAddress) -> Self {
        match address.ip().map(|ip| ip.to_canonical()) {
            Some(IpAddr::V4(ip)) => Self::V4(ip),
            Some(IpAddr::V6(ip)) => {
                let mask = u128::MAX << (128 - IPV6_NETWORK_PREFIX_BITS);
                Self::V6(Ipv6Addr::from(u128::from(ip) & mask))
            }
            None => Self::Unix,
        }
    }
}

impl fmt::Display for NetworkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4(ip) => ip.fmt(f),
            Self::V6(ip) => write!(f, "{ip}/{IPV6_NETWORK_PREFIX_BITS}"),
            Self::Unix => f.write_str("unix"),
        }
    }
}

/// Why a connection was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("too many open connections, limit is {limit}")]
    TooManyConnections { limit: usize },

    #[error("too many open connections from {network}, limit is {limit}")]
    TooManyFromNetwork { network: NetworkKey, limit: usize },
}

#[derive(Debug, Default)]
struct Counters {
    total: usize,
    // never holds a zero count
    per_network: HashMap<NetworkKey, usize>,
}

/// Open connection counts shared by every accept loop of a server.
#[derive(Debug, Default)]
pub struct AdmissionState {
    counters: Mutex<Counters>,
}

impl AdmissionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a new connection from `address`, unless that would break a limit.
    ///
    /// Loopback and unix clients are counted but never refused for their
    /// network. The connection stays counted until the guard is dropped.
    pub fn admit(
        self: &Arc<Self>,
        address: &SocketAddress,
        connection_limit: usize,
        connections_per_ip_limit: usize,
    ) -> Result<AdmissionGuard, Rejection> {
        let key = NetworkKey::of(address);
        let exempt = address.is_unix() || address.ip().is_some_and(|ip| ip.to_canonical().is_loopback());

        let mut counters = self.counters();
        if counters.total >= connection_limit {
            return Err(Rejection::TooManyConnections { limit: connection_limit });
        }

        let from_network = counters.per_network.get(&key).copied().unwrap_or(0) + 1;
        if !exempt && from_network >= connections_per_ip_limit {
            return Err(Rejection::TooManyFromNetwork { network: key, limit: connections_per_ip_limit });
        }

        counters.total += 1;
        counters.per_network.insert(key, from_network);
        Ok(AdmissionGuard { state: Arc::clone(self), key })
    }

    pub fn open_connections(&self) -> usize {
        self.counters().total
    }

    pub fn open_connections_from(&self, key: &NetworkKey) -> usize {
        self.counters().per_network.get(key).copied().unwrap_or(0)
    }

    /// Networks with at least one open connection.
    pub fn tracked_networks(&self) -> usize {
        self.counters().per_network.len()
    }

    fn release(&self, key: &NetworkKey) {
        let mut counters = self.counters();
        counters.total = counters.total.saturating_sub(1);
        if let Some(count) = counters.per_network.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                counters.per_network.remove(key);
            }
        }
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps one connection counted; dropping it releases the slot.
#[derive(Debug)]
pub struct AdmissionGuard {
    state: Arc<AdmissionState>,
    key: NetworkKey,
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.state.release(&self.key);
    }
}

/// Enforces the connection limits in front of another [`ClientHandler`].
#[derive(Debug)]
pub struct ConnectionLimitingClientHandler<H> {
    inner: H,
    state: Arc<AdmissionState>,
    connection_limit: usize,
    connections_per_ip_limit: usize,
}

impl<H: ClientHandler> ConnectionLimitingClientHandler<H> {
    pub fn new(inner: H, config: &ServerConfig) -> Self {
        Self {
            inner,
            state: Arc::new(AdmissionState::new()),
            connection_limit: config.connection_limit,
            connections_per_ip_limit: config.connections_per_ip_limit,
        }
    }

    pub fn state(&self) -> &Arc<AdmissionState> {
        &self.state
    }
}

#[async_trait]
impl<H: ClientHandler> ClientHandler for ConnectionLimitingClientHandler<H> {
    async fn handle_client(&self, socket: AcceptedSocket, context: &ClientContext) -> Result<(), ServerError> {
        let _guard =
            match self.state.admit(&socket.remote_address, self.connection_limit, self.connections_per_ip_limit) {
                Ok(guard) => guard,
                Err(rejection) => {
                    warn!(remote_address = %socket.remote_address, %rejection, "closing connection");
                    return Ok(());
                }
            };

        self.inner.handle_client(socket, context).await
    }

    fn set_up_listener(&self, listener: &mut Listener) {
        self.inner.set_up_listener(listener);
    }
}
