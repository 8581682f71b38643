//! Accept/connect pair registry.
//!
//! # States
//! ```text
//! Connecting → Bridged → Upgrading
//! Bridged → Connecting            connect side replaced between exchanges
//! Connecting | Bridged | Upgrading → Closing → Closed
//! ```
//!
//! # Design Decisions
//! - Pairs are records keyed by the accept session id, with a second index
//!   from connect id to accept id; sessions never point at each other.
//! - Attaching a connect session links the two close handles both ways.
//!   Detaching removes those listeners again, so a keep-alive exchange can
//!   drop its backend without dropping the client.
//! - Registration returns a guard; the record leaves the map when the
//!   owning task ends, however it ends.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;

use super::session::{CloseHandle, ListenerKey, SessionId};
use super::ProxyError;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeState {
    Connecting,
    Bridged,
    Upgrading,
    Closing,
    Closed,
}

impl BridgeState {
    /// Neither closing nor closed.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            BridgeState::Connecting | BridgeState::Bridged | BridgeState::Upgrading
        )
    }

    /// Whether a pair in `self` may move to `to`.
    pub fn can_transition(self, to: BridgeState) -> bool {
        use BridgeState::*;
        match (self, to) {
            (Connecting, Bridged) | (Bridged, Upgrading) | (Bridged, Connecting) => true,
            (from, Closing) => from.is_live(),
            (Closing, Closed) => true,
            _ => false,
        }
    }
}

struct ConnectSide {
    id: SessionId,
    close: CloseHandle,
    /// Listener on the accept handle closing the connect side, and the
    /// reverse.
    links: (ListenerKey, ListenerKey),
}

struct PairRecord {
    accept_close: CloseHandle,
    connect: Option<ConnectSide>,
    service: Option<Arc<str>>,
    peer: SocketAddr,
    state: BridgeState,
    opened: Instant,
}

/// Point-in-time view of one pair.
#[derive(Debug, Clone, Serialize)]
pub struct PairSnapshot {
    pub accept: String,
    pub connect: Option<String>,
    pub service: Option<String>,
    pub peer: String,
    pub state: BridgeState,
    pub age_secs: f64,
}

#[derive(Clone, Default)]
pub struct PairRegistry {
    pairs: Arc<DashMap<SessionId, PairRecord>>,
    by_connect: Arc<DashMap<SessionId, SessionId>>,
}

impl std::fmt::Debug for PairRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairRegistry")
            .field("pairs", &self.pairs.len())
            .finish()
    }
}

impl PairRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new accept session in `Connecting`.
    pub fn register(&self, accept: SessionId, peer: SocketAddr, accept_close: CloseHandle) -> PairGuard {
        self.pairs.insert(
            accept,
            PairRecord {
                accept_close,
                connect: None,
                service: None,
                peer,
                state: BridgeState::Connecting,
                opened: Instant::now(),
            },
        );
        metrics::pair_opened();
        tracing::trace!(accept = %accept, peer = %peer, "pair registered");
        PairGuard {
            registry: self.clone(),
            accept,
        }
    }

    /// Pair `connect` with `accept` and move to `Bridged`.
    pub fn attach(
        &self,
        accept: SessionId,
        connect: SessionId,
        connect_close: CloseHandle,
        service: &str,
    ) -> Result<(), ProxyError> {
        let mut record = self
            .pairs
            .get_mut(&accept)
            .ok_or(ProxyError::UnknownPair(accept))?;
        check(record.state, BridgeState::Bridged)?;

        let to_connect = connect_close.clone();
        let accept_link = record.accept_close.on_close(move |mode| {
            to_connect.close(mode == super::session::CloseMode::Immediate);
        });
        let to_accept = record.accept_close.clone();
        let connect_link = connect_close.on_close(move |mode| {
            to_accept.close(mode == super::session::CloseMode::Immediate);
        });

        record.connect = Some(ConnectSide {
            id: connect,
            close: connect_close,
            links: (accept_link, connect_link),
        });
        record.service = Some(Arc::from(service));
        record.state = BridgeState::Bridged;
        drop(record);

        self.by_connect.insert(connect, accept);
        tracing::debug!(accept = %accept, connect = %connect, service, "pair bridged");
        Ok(())
    }

    /// Unlink the connect side and return to `Connecting`. The connect
    /// session can then be closed without closing the client.
    pub fn detach(&self, accept: SessionId) -> Result<Option<SessionId>, ProxyError> {
        let mut record = self
            .pairs
            .get_mut(&accept)
            .ok_or(ProxyError::UnknownPair(accept))?;
        check(record.state, BridgeState::Connecting)?;
        let side = record.connect.take();
        record.state = BridgeState::Connecting;
        if let Some(side) = &side {
            record.accept_close.remove_listener(side.links.0);
            side.close.remove_listener(side.links.1);
        }
        drop(record);

        Ok(side.map(|side| {
            self.by_connect.remove(&side.id);
            side.id
        }))
    }

    /// Move the pair containing `id` (either side) to `to`. Returns the
    /// previous state.
    pub fn transition(&self, id: SessionId, to: BridgeState) -> Result<BridgeState, ProxyError> {
        let accept = self.accept_id(id).ok_or(ProxyError::UnknownPair(id))?;
        let mut record = self
            .pairs
            .get_mut(&accept)
            .ok_or(ProxyError::UnknownPair(id))?;
        let from = record.state;
        check(from, to)?;
        record.state = to;
        tracing::trace!(accept = %accept, ?from, ?to, "pair transition");
        Ok(from)
    }

    /// Current state of the pair keyed by the accept session `id`.
    pub fn state(&self, id: SessionId) -> Option<BridgeState> {
        let accept = self.accept_id(id)?;
        self.pairs.get(&accept).map(|record| record.state)
    }

    /// The other side of the pair `id` belongs to.
    pub fn peer_of(&self, id: SessionId) -> Option<SessionId> {
        if let Some(accept) = self.by_connect.get(&id) {
            return Some(*accept);
        }
        self.pairs
            .get(&id)
            .and_then(|record| record.connect.as_ref().map(|side| side.id))
    }

    /// Registered pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Point-in-time view of every pair, ordered by accept id.
    pub fn snapshot(&self) -> Vec<PairSnapshot> {
        let mut pairs: Vec<(SessionId, PairSnapshot)> = self
            .pairs
            .iter()
            .map(|entry| {
                let record = entry.value();
                let snapshot = PairSnapshot {
                    accept: entry.key().to_string(),
                    connect: record.connect.as_ref().map(|side| side.id.to_string()),
                    service: record.service.as_deref().map(str::to_string),
                    peer: record.peer.to_string(),
                    state: record.state,
                    age_secs: record.opened.elapsed().as_secs_f64(),
                };
                (*entry.key(), snapshot)
            })
            .collect();
        pairs.sort_by_key(|(id, _)| *id);
        pairs.into_iter().map(|(_, snapshot)| snapshot).collect()
    }

    /// Close every registered accept session; linked connect sessions
    /// follow through their listeners.
    pub fn close_all(&self, immediate: bool) -> usize {
        let handles: Vec<CloseHandle> = self
            .pairs
            .iter()
            .map(|entry| entry.value().accept_close.clone())
            .collect();
        // Closed outside the map iteration so listeners never run under a
        // shard lock.
        handles
            .into_iter()
            .filter(|handle| handle.close(immediate))
            .count()
    }

    fn accept_id(&self, id: SessionId) -> Option<SessionId> {
        if self.pairs.contains_key(&id) {
            return Some(id);
        }
        self.by_connect.get(&id).map(|accept| *accept)
    }

    fn remove(&self, accept: SessionId) {
        if let Some((_, record)) = self.pairs.remove(&accept) {
            if let Some(side) = record.connect {
                self.by_connect.remove(&side.id);
            }
            metrics::pair_closed();
            tracing::trace!(accept = %accept, "pair removed");
        }
    }
}

fn check(from: BridgeState, to: BridgeState) -> Result<(), ProxyError> {
    if from.can_transition(to) {
        Ok(())
    } else {
        Err(ProxyError::Transition { from, to })
    }
}

/// Keeps a pair registered; on drop the pair passes through `Closed` and is
/// removed.
#[derive(Debug)]
pub struct PairGuard {
    registry: PairRegistry,
    accept: SessionId,
}

impl PairGuard {
    /// The accept session this guard unregisters.
    pub fn accept(&self) -> SessionId {
        self.accept
    }
}

impl Drop for PairGuard {
    fn drop(&mut self) {
        if let Some(mut record) = self.registry.pairs.get_mut(&self.accept) {
            record.state = BridgeState::Closed;
        }
        self.registry.remove(self.accept);
    }
}
