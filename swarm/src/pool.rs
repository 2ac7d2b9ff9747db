// Copyright 2026 Mesh Network Contributors.
// This file is part of Mesh.

// Mesh is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// Mesh is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with Mesh.  If not, see <http://www.gnu.org/licenses/>.

//! In-memory registry of managed connections.
//!
//! All operations are synchronous under one internal mutex and never call
//! out while holding it, so tasks may use the pool from anywhere without
//! re-entrancy hazards. The pool tracks lifecycle state, per-peer and
//! global budgets, pending dials (joinable by concurrent dialers), the
//! auto-reconnect address book and idle/trim bookkeeping.

use futures::{channel::oneshot, future::Shared, FutureExt as _};
use parking_lot::Mutex;
use std::{
	collections::HashSet,
	sync::Arc,
	time::{Duration, Instant},
};

use crate::{
	config::PoolConfig,
	error::SwarmError,
	policy::{Direction, ResourceGuard},
};
use mesh_core::{Multiaddr, MuxedConnection};
use mesh_identity::PeerId;

/// Identifier of a pool entry, unique for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "conn-{}", self.0)
	}
}

/// Why a connection left the connected state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
	RemoteClose,
	LocalClose,
	IdleTimeout,
	Trimmed,
	Error(String),
}

/// Lifecycle of a pool entry. Only `Connected` holds a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
	Connecting,
	Connected,
	Disconnected(DisconnectReason),
	Reconnecting { attempt: u32, next_attempt_at: Instant },
	Failed(String),
}

/// A pool entry, as exposed to callers (snapshot, cheap to clone).
#[derive(Clone)]
pub struct ManagedConnection {
	pub id: ConnectionId,
	pub peer: PeerId,
	pub address: Multiaddr,
	pub direction: Direction,
	/// Whether the connection runs over a relay circuit and is therefore
	/// byte/duration limited.
	pub is_limited: bool,
	pub state: ConnectionState,
	pub connection: Option<Arc<dyn MuxedConnection>>,
	pub connected_at: Option<Instant>,
	pub last_activity: Instant,
	pub retry_count: u32,
	pub tags: HashSet<String>,
	pub reconnect_address: Option<Multiaddr>,
}

impl std::fmt::Debug for ManagedConnection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ManagedConnection")
			.field("id", &self.id)
			.field("peer", &self.peer)
			.field("address", &self.address)
			.field("direction", &self.direction)
			.field("state", &self.state)
			.field("retry_count", &self.retry_count)
			.finish_non_exhaustive()
	}
}

/// A joinable in-flight dial.
#[derive(Clone)]
pub struct DialTask {
	shared: Shared<oneshot::Receiver<Result<PeerId, Arc<SwarmError>>>>,
}

impl DialTask {
	/// Waits for the original dial to finish and returns its outcome.
	pub async fn join(self) -> Result<PeerId, SwarmError> {
		match self.shared.await {
			Ok(Ok(peer)) => Ok(peer),
			Ok(Err(error)) => Err(SwarmError::Joined(error)),
			Err(_cancelled) => Err(SwarmError::PendingDialCancelled),
		}
	}
}

/// One trim candidate with the figures its rank was computed from.
#[derive(Debug, Clone)]
pub struct TrimCandidate {
	pub id: ConnectionId,
	pub peer: PeerId,
	pub rank: usize,
	pub tag_count: usize,
	pub idle: Duration,
	pub direction: Direction,
}

/// The trim plan for one idle-cycle.
#[derive(Debug, Clone, Default)]
pub struct TrimReport {
	/// Candidates in trim order (best candidate to shed first).
	pub candidates: Vec<TrimCandidate>,
	/// How many connections should be shed.
	pub target: usize,
	/// Whether fewer connections are trimmable than the target asks for.
	pub constrained: bool,
}

struct Slot {
	managed: ManagedConnection,
	resource: Option<ResourceGuard>,
}

struct PoolInner {
	slots: fnv::FnvHashMap<ConnectionId, Slot>,
	next_id: u64,
	pending_dials: fnv::FnvHashMap<PeerId, DialTask>,
	reconnect_addresses: fnv::FnvHashMap<PeerId, Multiaddr>,
}

/// The connection registry. Thread-safe; all operations are synchronous.
pub struct ConnectionPool {
	config: PoolConfig,
	inner: Mutex<PoolInner>,
}

impl ConnectionPool {
	pub fn new(config: PoolConfig) -> Self {
		ConnectionPool {
			config,
			inner: Mutex::new(PoolInner {
				slots: Default::default(),
				next_id: 1,
				pending_dials: Default::default(),
				reconnect_addresses: Default::default(),
			}),
		}
	}

	pub fn config(&self) -> &PoolConfig {
		&self.config
	}

	/// A live connection to `peer`, if any. Entries whose connection has
	/// been closed underneath are never returned.
	pub fn connection(&self, peer: PeerId) -> Option<Arc<dyn MuxedConnection>> {
		let inner = self.inner.lock();
		inner
			.slots
			.values()
			.filter(|s| s.managed.peer == peer && s.managed.state == ConnectionState::Connected)
			.filter_map(|s| s.managed.connection.clone())
			.find(|c| !c.is_closed())
	}

	pub fn is_connected(&self, peer: PeerId) -> bool {
		self.connection(peer).is_some()
	}

	fn count(&self, inner: &PoolInner, direction: Direction) -> usize {
		inner
			.slots
			.values()
			.filter(|s| {
				s.managed.direction == direction &&
					matches!(
						s.managed.state,
						ConnectionState::Connected | ConnectionState::Connecting
					)
			})
			.count()
	}

	pub fn can_accept_inbound(&self) -> bool {
		let inner = self.inner.lock();
		self.count(&inner, Direction::Inbound) < self.config.max_inbound_connections
	}

	pub fn can_dial_outbound(&self) -> bool {
		let inner = self.inner.lock();
		self.count(&inner, Direction::Outbound) < self.config.max_outbound_connections
	}

	/// Whether another connection to `peer` fits the per-peer cap.
	pub fn can_connect_to(&self, peer: PeerId) -> bool {
		let inner = self.inner.lock();
		let current = inner
			.slots
			.values()
			.filter(|s| {
				s.managed.peer == peer &&
					matches!(
						s.managed.state,
						ConnectionState::Connected | ConnectionState::Connecting
					)
			})
			.count();
		current < self.config.max_connections_per_peer
	}

	pub fn connected_peers(&self) -> Vec<PeerId> {
		let inner = self.inner.lock();
		let mut peers: Vec<PeerId> = inner
			.slots
			.values()
			.filter(|s| s.managed.state == ConnectionState::Connected)
			.map(|s| s.managed.peer)
			.collect();
		peers.sort();
		peers.dedup();
		peers
	}

	/// All connected entries for `peer`.
	pub fn connected_managed(&self, peer: PeerId) -> Vec<ManagedConnection> {
		let inner = self.inner.lock();
		inner
			.slots
			.values()
			.filter(|s| s.managed.peer == peer && s.managed.state == ConnectionState::Connected)
			.map(|s| s.managed.clone())
			.collect()
	}

	pub fn managed(&self, id: ConnectionId) -> Option<ManagedConnection> {
		self.inner.lock().slots.get(&id).map(|s| s.managed.clone())
	}

	/// All entries, whatever their state.
	pub fn all(&self) -> Vec<ManagedConnection> {
		self.inner.lock().slots.values().map(|s| s.managed.clone()).collect()
	}

	fn insert(
		&self,
		inner: &mut PoolInner,
		managed: ManagedConnection,
		resource: Option<ResourceGuard>,
	) -> ConnectionId {
		let id = managed.id;
		inner.slots.insert(id, Slot { managed, resource });
		id
	}

	/// Registers an already-connected entry.
	pub fn add(
		&self,
		connection: Arc<dyn MuxedConnection>,
		peer: PeerId,
		address: Multiaddr,
		direction: Direction,
		is_limited: bool,
		resource: Option<ResourceGuard>,
	) -> ConnectionId {
		let mut inner = self.inner.lock();
		let id = ConnectionId(inner.next_id);
		inner.next_id += 1;
		let now = Instant::now();
		let managed = ManagedConnection {
			id,
			peer,
			address,
			direction,
			is_limited,
			state: ConnectionState::Connected,
			connection: Some(connection),
			connected_at: Some(now),
			last_activity: now,
			retry_count: 0,
			tags: Default::default(),
			reconnect_address: inner.reconnect_addresses.get(&peer).cloned(),
		};
		self.insert(&mut inner, managed, resource)
	}

	/// Registers an entry for a dial that has not completed yet.
	pub fn add_connecting(
		&self,
		peer: PeerId,
		address: Multiaddr,
		direction: Direction,
	) -> ConnectionId {
		let mut inner = self.inner.lock();
		let id = ConnectionId(inner.next_id);
		inner.next_id += 1;
		let managed = ManagedConnection {
			id,
			peer,
			address,
			direction,
			is_limited: false,
			state: ConnectionState::Connecting,
			connection: None,
			connected_at: None,
			last_activity: Instant::now(),
			retry_count: 0,
			tags: Default::default(),
			reconnect_address: None,
		};
		self.insert(&mut inner, managed, None)
	}

	/// Transitions an entry to connected, installing the live connection.
	/// Any previous connection object is returned so the caller can close
	/// it outside the lock.
	pub fn update_connection(
		&self,
		id: ConnectionId,
		connection: Arc<dyn MuxedConnection>,
		is_limited: bool,
		resource: Option<ResourceGuard>,
	) -> Option<Arc<dyn MuxedConnection>> {
		let mut inner = self.inner.lock();
		let slot = inner.slots.get_mut(&id)?;
		let old = slot.managed.connection.take();
		let now = Instant::now();
		slot.managed.state = ConnectionState::Connected;
		slot.managed.connection = Some(connection);
		slot.managed.is_limited = is_limited;
		slot.managed.connected_at = Some(now);
		slot.managed.last_activity = now;
		slot.resource = resource;
		old
	}

	pub fn update_state(&self, id: ConnectionId, state: ConnectionState) {
		let mut inner = self.inner.lock();
		if let Some(slot) = inner.slots.get_mut(&id) {
			if !matches!(state, ConnectionState::Connected) {
				slot.managed.connection = None;
				slot.resource = None;
			}
			slot.managed.last_activity = Instant::now();
			slot.managed.state = state;
		}
	}

	pub fn remove(&self, id: ConnectionId) -> Option<ManagedConnection> {
		self.inner.lock().slots.remove(&id).map(|s| s.managed)
	}

	pub fn remove_peer(&self, peer: PeerId) -> Vec<ManagedConnection> {
		let mut inner = self.inner.lock();
		let ids: Vec<ConnectionId> = inner
			.slots
			.values()
			.filter(|s| s.managed.peer == peer)
			.map(|s| s.managed.id)
			.collect();
		ids.into_iter().filter_map(|id| inner.slots.remove(&id)).map(|s| s.managed).collect()
	}

	pub fn remove_all(&self) -> Vec<ManagedConnection> {
		let mut inner = self.inner.lock();
		inner.slots.drain().map(|(_, s)| s.managed).collect()
	}

	/// Registers an in-flight dial to `peer`; concurrent dialers join it.
	/// Returns the sender the dialing task resolves when done.
	pub fn register_pending_dial(
		&self,
		peer: PeerId,
	) -> oneshot::Sender<Result<PeerId, Arc<SwarmError>>> {
		let (tx, rx) = oneshot::channel();
		let task = DialTask { shared: rx.shared() };
		self.inner.lock().pending_dials.insert(peer, task);
		tx
	}

	pub fn pending_dial(&self, peer: PeerId) -> Option<DialTask> {
		self.inner.lock().pending_dials.get(&peer).cloned()
	}

	pub fn remove_pending_dial(&self, peer: PeerId) {
		self.inner.lock().pending_dials.remove(&peer);
	}

	/// Drops every pending-dial record. In-flight joiners resolve with a
	/// cancellation error once the dialing task drops its sender.
	pub fn cancel_all_pending_dials(&self) {
		self.inner.lock().pending_dials.clear();
	}

	pub fn enable_auto_reconnect(&self, peer: PeerId, address: Multiaddr) {
		let mut inner = self.inner.lock();
		inner.reconnect_addresses.insert(peer, address.clone());
		for slot in inner.slots.values_mut().filter(|s| s.managed.peer == peer) {
			slot.managed.reconnect_address = Some(address.clone());
		}
	}

	pub fn disable_auto_reconnect(&self, peer: PeerId) {
		let mut inner = self.inner.lock();
		inner.reconnect_addresses.remove(&peer);
		for slot in inner.slots.values_mut().filter(|s| s.managed.peer == peer) {
			slot.managed.reconnect_address = None;
		}
	}

	pub fn reconnect_address(&self, peer: PeerId) -> Option<Multiaddr> {
		self.inner.lock().reconnect_addresses.get(&peer).cloned()
	}

	pub fn increment_retry_count(&self, id: ConnectionId) {
		if let Some(slot) = self.inner.lock().slots.get_mut(&id) {
			slot.managed.retry_count += 1;
		}
	}

	pub fn reset_retry_count(&self, id: ConnectionId) {
		if let Some(slot) = self.inner.lock().slots.get_mut(&id) {
			slot.managed.retry_count = 0;
		}
	}

	/// Resets the retry counter if the connection had been up longer than
	/// the stability threshold, so one long-lived connection's eventual
	/// drop starts a fresh retry budget.
	pub fn reset_retry_count_if_stable(&self, id: ConnectionId) {
		let mut inner = self.inner.lock();
		if let Some(slot) = inner.slots.get_mut(&id) {
			if let Some(connected_at) = slot.managed.connected_at {
				if connected_at.elapsed() >= self.config.stability_threshold {
					slot.managed.retry_count = 0;
				}
			}
		}
	}

	/// Marks activity on an entry, deferring idle collection.
	pub fn touch(&self, id: ConnectionId) {
		if let Some(slot) = self.inner.lock().slots.get_mut(&id) {
			slot.managed.last_activity = Instant::now();
		}
	}

	pub fn tag(&self, id: ConnectionId, tag: impl Into<String>) {
		if let Some(slot) = self.inner.lock().slots.get_mut(&id) {
			slot.managed.tags.insert(tag.into());
		}
	}

	pub fn untag(&self, id: ConnectionId, tag: &str) {
		if let Some(slot) = self.inner.lock().slots.get_mut(&id) {
			slot.managed.tags.remove(tag);
		}
	}

	/// Connected entries whose last activity is older than `threshold`.
	pub fn idle_connections(&self, threshold: Duration) -> Vec<ManagedConnection> {
		let now = Instant::now();
		self.inner
			.lock()
			.slots
			.values()
			.filter(|s| {
				s.managed.state == ConnectionState::Connected &&
					now.saturating_duration_since(s.managed.last_activity) > threshold
			})
			.map(|s| s.managed.clone())
			.collect()
	}

	/// Computes the current trim plan without applying it.
	///
	/// Trim order: fewest tags first, then longest idle, then inbound
	/// before outbound. The plan is `constrained` when fewer connections
	/// are trimmable than the watermark overflow asks to shed.
	pub fn trim_report(&self) -> TrimReport {
		let inner = self.inner.lock();
		let watermark = match self.config.trim_watermark {
			Some(w) => w,
			None => return TrimReport::default(),
		};
		let now = Instant::now();
		let connected: Vec<&Slot> = inner
			.slots
			.values()
			.filter(|s| s.managed.state == ConnectionState::Connected)
			.collect();
		let target = connected.len().saturating_sub(watermark);
		if target == 0 {
			return TrimReport::default()
		}

		let mut candidates: Vec<TrimCandidate> = connected
			.iter()
			.map(|s| TrimCandidate {
				id: s.managed.id,
				peer: s.managed.peer,
				rank: 0,
				tag_count: s.managed.tags.len(),
				idle: now.saturating_duration_since(s.managed.last_activity),
				direction: s.managed.direction,
			})
			.collect();
		candidates.sort_by(|a, b| {
			a.tag_count
				.cmp(&b.tag_count)
				.then(b.idle.cmp(&a.idle))
				.then(direction_rank(a.direction).cmp(&direction_rank(b.direction)))
		});
		for (rank, candidate) in candidates.iter_mut().enumerate() {
			candidate.rank = rank;
		}

		let constrained = candidates.len() < target;
		TrimReport { candidates, target, constrained }
	}

	/// Applies the trim plan, removing the shed entries from the pool.
	/// The caller closes the returned connections and emits events.
	pub fn trim_if_needed(&self) -> (Vec<ManagedConnection>, TrimReport) {
		let report = self.trim_report();
		if report.target == 0 {
			return (Vec::new(), report)
		}
		let mut inner = self.inner.lock();
		let removed = report
			.candidates
			.iter()
			.take(report.target)
			.filter_map(|c| inner.slots.remove(&c.id))
			.map(|s| s.managed)
			.collect();
		(removed, report)
	}

	/// Drops entries that have sat disconnected or failed longer than
	/// `threshold`.
	pub fn cleanup_stale(&self, threshold: Duration) {
		let now = Instant::now();
		self.inner.lock().slots.retain(|_, s| {
			let gone = matches!(
				s.managed.state,
				ConnectionState::Disconnected(_) | ConnectionState::Failed(_)
			);
			!(gone && now.saturating_duration_since(s.managed.last_activity) > threshold)
		});
	}
}

fn direction_rank(direction: Direction) -> u8 {
	match direction {
		Direction::Inbound => 0,
		Direction::Outbound => 1,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use mesh_core::{connection::BoxedStream, Multiaddr};
	use mesh_identity::Keypair;
	use std::sync::atomic::{AtomicBool, Ordering};

	/// A connection object that only tracks closedness.
	struct FakeConnection {
		local: PeerId,
		remote: PeerId,
		closed: AtomicBool,
	}

	impl FakeConnection {
		fn new(local: PeerId, remote: PeerId) -> Arc<Self> {
			Arc::new(FakeConnection { local, remote, closed: AtomicBool::new(false) })
		}
	}

	#[async_trait]
	impl MuxedConnection for FakeConnection {
		async fn open_stream(&self) -> std::io::Result<BoxedStream> {
			Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "fake"))
		}

		async fn next_inbound(&self) -> Option<BoxedStream> {
			None
		}

		fn local_peer(&self) -> PeerId {
			self.local
		}

		fn remote_peer(&self) -> PeerId {
			self.remote
		}

		fn local_addr(&self) -> Multiaddr {
			"/memory/1".parse().unwrap()
		}

		fn remote_addr(&self) -> Multiaddr {
			"/memory/2".parse().unwrap()
		}

		async fn close(&self) -> std::io::Result<()> {
			self.closed.store(true, Ordering::SeqCst);
			Ok(())
		}

		fn is_closed(&self) -> bool {
			self.closed.load(Ordering::SeqCst)
		}
	}

	fn pool() -> ConnectionPool {
		ConnectionPool::new(PoolConfig {
			max_inbound_connections: 2,
			max_outbound_connections: 2,
			max_connections_per_peer: 1,
			..Default::default()
		})
	}

	fn peers() -> (PeerId, PeerId) {
		(Keypair::generate().peer_id(), Keypair::generate().peer_id())
	}

	#[test]
	fn add_and_query() {
		let pool = pool();
		let (local, remote) = peers();
		let conn = FakeConnection::new(local, remote);
		let id = pool.add(
			conn.clone(),
			remote,
			"/memory/2".parse().unwrap(),
			Direction::Outbound,
			false,
			None,
		);

		assert!(pool.is_connected(remote));
		assert_eq!(pool.connected_peers(), vec![remote]);
		assert_eq!(pool.connected_managed(remote).len(), 1);
		assert!(pool.managed(id).is_some());
		assert!(!pool.can_connect_to(remote), "per-peer cap is 1");
	}

	#[test]
	fn closed_connection_is_never_returned() {
		let pool = pool();
		let (local, remote) = peers();
		let conn = FakeConnection::new(local, remote);
		pool.add(
			conn.clone(),
			remote,
			"/memory/2".parse().unwrap(),
			Direction::Outbound,
			false,
			None,
		);
		conn.closed.store(true, Ordering::SeqCst);
		assert!(pool.connection(remote).is_none());
	}

	#[test]
	fn connection_limits() {
		let pool = pool();
		let (local, _) = peers();
		for _ in 0..2 {
			let remote = Keypair::generate().peer_id();
			pool.add(
				FakeConnection::new(local, remote),
				remote,
				"/memory/2".parse().unwrap(),
				Direction::Inbound,
				false,
				None,
			);
		}
		assert!(!pool.can_accept_inbound());
		assert!(pool.can_dial_outbound());
	}

	#[test]
	fn connecting_entries_count_towards_limits() {
		let pool = pool();
		let (_, remote) = peers();
		pool.add_connecting(remote, "/memory/2".parse().unwrap(), Direction::Outbound);
		assert!(!pool.can_connect_to(remote));
	}

	#[test]
	fn update_state_drops_connection_object() {
		let pool = pool();
		let (local, remote) = peers();
		let id = pool.add(
			FakeConnection::new(local, remote),
			remote,
			"/memory/2".parse().unwrap(),
			Direction::Outbound,
			false,
			None,
		);
		pool.update_state(id, ConnectionState::Disconnected(DisconnectReason::RemoteClose));
		assert!(pool.connection(remote).is_none());
		assert!(pool.managed(id).unwrap().connection.is_none());
	}

	#[test]
	fn trim_ranks_untagged_idle_inbound_first() {
		let pool = ConnectionPool::new(PoolConfig {
			max_inbound_connections: 10,
			max_outbound_connections: 10,
			max_connections_per_peer: 10,
			trim_watermark: Some(1),
			..Default::default()
		});
		let local = Keypair::generate().peer_id();

		let tagged_peer = Keypair::generate().peer_id();
		let tagged = pool.add(
			FakeConnection::new(local, tagged_peer),
			tagged_peer,
			"/memory/2".parse().unwrap(),
			Direction::Outbound,
			false,
			None,
		);
		pool.tag(tagged, "pinned");

		let plain_peer = Keypair::generate().peer_id();
		pool.add(
			FakeConnection::new(local, plain_peer),
			plain_peer,
			"/memory/3".parse().unwrap(),
			Direction::Inbound,
			false,
			None,
		);

		let report = pool.trim_report();
		assert_eq!(report.target, 1);
		assert!(!report.constrained);
		// The untagged inbound connection goes first.
		assert_eq!(report.candidates[0].peer, plain_peer);

		let (removed, _) = pool.trim_if_needed();
		assert_eq!(removed.len(), 1);
		assert_eq!(removed[0].peer, plain_peer);
		assert!(pool.is_connected(tagged_peer));
	}

	#[test]
	fn cleanup_drops_long_disconnected_entries() {
		let pool = pool();
		let (local, remote) = peers();
		let id = pool.add(
			FakeConnection::new(local, remote),
			remote,
			"/memory/2".parse().unwrap(),
			Direction::Outbound,
			false,
			None,
		);
		pool.update_state(id, ConnectionState::Disconnected(DisconnectReason::RemoteClose));
		pool.cleanup_stale(Duration::from_secs(3600));
		assert!(pool.managed(id).is_some(), "fresh disconnects are kept");
		std::thread::sleep(Duration::from_millis(5));
		pool.cleanup_stale(Duration::ZERO);
		assert!(pool.managed(id).is_none());
	}

	#[async_std::test]
	async fn pending_dials_are_joinable() {
		let pool = pool();
		let (_, remote) = peers();
		let tx = pool.register_pending_dial(remote);
		let task = pool.pending_dial(remote).unwrap();

		let joiner = async_std::task::spawn(async move { task.join().await });
		tx.send(Ok(remote)).unwrap();
		assert_eq!(joiner.await.unwrap(), remote);
	}

	#[async_std::test]
	async fn cancelled_pending_dial_fails_joiners() {
		let pool = pool();
		let (_, remote) = peers();
		let tx = pool.register_pending_dial(remote);
		let task = pool.pending_dial(remote).unwrap();
		pool.cancel_all_pending_dials();
		assert!(pool.pending_dial(remote).is_none());
		drop(tx);
		assert!(matches!(task.join().await, Err(SwarmError::PendingDialCancelled)));
	}
}
