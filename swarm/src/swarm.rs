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

//! The swarm: listeners, dialing, upgrading, stream dispatch, reconnection
//! and connection trimming.
//!
//! Background tasks hold only a weak reference to the swarm state and
//! terminate once the swarm is dropped or shut down, so no task extends
//! the swarm's lifetime.

use async_trait::async_trait;
use futures::{
	future::{abortable, AbortHandle},
	io::{AsyncRead, AsyncWrite},
};
use futures_timer::Delay;
use parking_lot::Mutex;
use std::{
	collections::HashMap,
	io,
	pin::Pin,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc, Weak,
	},
	task::{Context, Poll},
	time::Instant,
};

use crate::{
	backoff::DialBackoff,
	config::SwarmConfig,
	error::{GateStage, SwarmError},
	event::{Broadcaster, ConnectionEvent, EventStream, SwarmEvent},
	policy::{Direction, ResourceGuard},
	pool::{ConnectionId, ConnectionPool, ConnectionState, DisconnectReason},
	semaphore::Semaphore,
};
use mesh_core::{
	connection::{BoxedRaw, BoxedStream, MuxedConnection, MuxedStream, StreamContext},
	multistream,
	transport::{Listener, SecuredListener, Transport},
	upgrade::Upgrader,
	Multiaddr, Role,
};
use mesh_identity::{Keypair, PeerId};

/// Errors a protocol handler may bubble up; the swarm logs them and closes
/// the stream.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A registered application protocol.
#[async_trait]
pub trait StreamHandler: Send + Sync {
	/// Invoked for every inbound stream negotiated to this handler's
	/// protocol. The handler owns the stream.
	async fn on_stream(&self, ctx: StreamContext) -> Result<(), HandlerError>;
}

enum ListenerHandle {
	Raw { listener: Arc<dyn Listener>, address: Multiaddr },
	Secured { listener: Arc<dyn SecuredListener>, address: Multiaddr },
}

struct Inner {
	weak: Weak<Inner>,
	keypair: Keypair,
	local_peer: PeerId,
	transports: Vec<Arc<dyn Transport>>,
	upgrader: Upgrader,
	config: SwarmConfig,
	pool: ConnectionPool,
	backoff: DialBackoff,
	events: Broadcaster,
	handlers: Mutex<HashMap<String, Arc<dyn StreamHandler>>>,
	listeners: Mutex<Vec<ListenerHandle>>,
	advertised: Mutex<Vec<Multiaddr>>,
	tasks: Mutex<Vec<AbortHandle>>,
	reconnects: Mutex<fnv::FnvHashMap<ConnectionId, AbortHandle>>,
	connected_set: Mutex<fnv::FnvHashSet<PeerId>>,
	negotiation: Semaphore,
	running: AtomicBool,
}

/// The connection lifecycle manager. Cheap to clone; all clones share
/// state.
#[derive(Clone)]
pub struct Swarm {
	inner: Arc<Inner>,
}

impl Swarm {
	/// Builds a swarm over the given transports and upgrade pipeline.
	/// Nothing binds or dials until [`start`](Self::start).
	pub fn new(
		keypair: Keypair,
		transports: Vec<Arc<dyn Transport>>,
		upgrader: Upgrader,
		config: SwarmConfig,
	) -> Self {
		let local_peer = keypair.peer_id();
		let inner = Arc::new_cyclic(|weak| Inner {
			weak: weak.clone(),
			local_peer,
			transports,
			upgrader,
			pool: ConnectionPool::new(config.pool.clone()),
			backoff: DialBackoff::new(config.backoff.clone()),
			events: Broadcaster::new(config.event_buffer),
			handlers: Mutex::new(HashMap::new()),
			listeners: Mutex::new(Vec::new()),
			advertised: Mutex::new(Vec::new()),
			tasks: Mutex::new(Vec::new()),
			reconnects: Mutex::new(Default::default()),
			connected_set: Mutex::new(Default::default()),
			negotiation: Semaphore::new(config.max_negotiating_inbound_streams),
			running: AtomicBool::new(false),
			keypair,
			config,
		});
		Swarm { inner }
	}

	pub fn local_peer(&self) -> PeerId {
		self.inner.local_peer
	}

	/// Subscribes to the swarm event stream.
	pub fn events(&self) -> EventStream {
		self.inner.events.subscribe()
	}

	/// The advertised listen addresses (unspecified binds expanded to
	/// interface addresses).
	pub fn listen_addresses(&self) -> Vec<Multiaddr> {
		self.inner.advertised.lock().clone()
	}

	pub fn is_running(&self) -> bool {
		self.inner.running.load(Ordering::SeqCst)
	}

	/// The connection pool, for inspection.
	pub fn pool(&self) -> &ConnectionPool {
		&self.inner.pool
	}

	/// Registers `handler` for inbound streams negotiated to `protocol`.
	pub fn handle(&self, protocol: impl Into<String>, handler: Arc<dyn StreamHandler>) {
		let protocol = protocol.into();
		let previous = self.inner.handlers.lock().insert(protocol.clone(), handler);
		if previous.is_some() {
			log::warn!(target: "mesh-swarm", "Handler for {protocol} replaced");
		}
	}

	/// A live connection to `peer`, if one exists.
	pub fn connection(&self, peer: PeerId) -> Option<Arc<dyn MuxedConnection>> {
		self.inner.pool.connection(peer)
	}

	/// Binds the configured listen addresses and starts the background
	/// tasks. Idempotent.
	pub async fn start(&self) -> Result<(), SwarmError> {
		let inner = &self.inner;
		if inner.running.swap(true, Ordering::SeqCst) {
			return Ok(())
		}

		// Idle checker first so even a listener-less node trims and prunes.
		let idle_timeout = inner.config.pool.idle_timeout;
		if !idle_timeout.is_zero() {
			let weak = inner.weak.clone();
			let interval = idle_timeout / 2;
			let (fut, handle) = abortable(async move {
				loop {
					Delay::new(interval).await;
					let Some(inner) = weak.upgrade() else { return };
					if !inner.running.load(Ordering::SeqCst) {
						return
					}
					inner.idle_cycle().await;
				}
			});
			inner.tasks.lock().push(handle);
			async_std::task::spawn(async move {
				let _ = fut.await;
			});
		}

		let mut bound = 0usize;
		for address in inner.config.listen_addresses.clone() {
			for transport in inner.transports.iter().filter(|t| t.can_listen(&address)) {
				match inner.bind(transport, &address).await {
					Ok(local) => {
						bound += 1;
						inner.events.publish(SwarmEvent::NewListenAddr(local));
					},
					Err(error) => {
						log::debug!(
							target: "mesh-swarm",
							"Failed to bind {address}: {error}",
						);
						inner.events.publish(SwarmEvent::ListenError {
							address: address.clone(),
							error: error.to_string(),
						});
					},
				}
			}
		}
		if bound == 0 && !inner.config.listen_addresses.is_empty() {
			inner.running.store(false, Ordering::SeqCst);
			return Err(SwarmError::NoListenersBound)
		}

		log::info!(
			target: "mesh-swarm",
			"Node {} listening on {:?}",
			inner.local_peer,
			inner.advertised.lock(),
		);
		Ok(())
	}

	/// Dials `address`, upgrading to a full connection, and returns the
	/// authenticated remote peer. Joins an already-pending dial to the same
	/// peer instead of opening a second connection.
	pub async fn dial(&self, address: Multiaddr) -> Result<PeerId, SwarmError> {
		let inner = &self.inner;
		if !inner.running.load(Ordering::SeqCst) {
			return Err(SwarmError::NodeNotRunning)
		}
		let expected = address.peer_id();
		if expected == Some(inner.local_peer) {
			return Err(SwarmError::SelfDialNotAllowed)
		}
		if !inner.config.gater.intercept_dial(expected, &address) {
			inner.events.publish(SwarmEvent::Connection(ConnectionEvent::Gated {
				peer: expected,
				address: address.clone(),
				stage: GateStage::Dial,
			}));
			return Err(SwarmError::ConnectionGated(GateStage::Dial))
		}
		if let Some(peer) = expected {
			if let Some(task) = inner.pool.pending_dial(peer) {
				log::trace!(target: "mesh-swarm", "Joining pending dial to {peer}");
				return task.join().await
			}
			if let Some(until) = inner.backoff.blocked_until(peer) {
				return Err(SwarmError::DialBackoffActive { until })
			}
		}
		if !inner.pool.can_dial_outbound() {
			return Err(SwarmError::ConnectionLimitReached)
		}
		let transport = inner
			.transports
			.iter()
			.find(|t| t.can_dial(&address))
			.cloned()
			.ok_or_else(|| SwarmError::NoSuitableTransport(address.clone()))?;

		let pending = expected.map(|peer| {
			let sender = inner.pool.register_pending_dial(peer);
			let connecting =
				inner.pool.add_connecting(peer, address.clone(), Direction::Outbound);
			inner.events.publish(SwarmEvent::Dialing(peer));
			(peer, sender, connecting)
		});
		let connecting_id = pending.as_ref().map(|(_, _, id)| *id);

		match inner.dial_and_install(&*transport, &address, expected, connecting_id).await {
			Ok(peer) => {
				if let Some((pending_peer, sender, _)) = pending {
					inner.pool.remove_pending_dial(pending_peer);
					let _ = sender.send(Ok(peer));
				}
				Ok(peer)
			},
			Err(error) => {
				let error = Arc::new(error);
				if let Some((pending_peer, sender, connecting)) = pending {
					inner.pool.remove_pending_dial(pending_peer);
					inner.pool.remove(connecting);
					inner.backoff.record_failure(pending_peer);
					let _ = sender.send(Err(Arc::clone(&error)));
				}
				inner.events.publish(SwarmEvent::OutgoingConnectionError {
					peer: expected,
					error: Arc::clone(&error),
				});
				Err(SwarmError::Joined(error))
			},
		}
	}

	/// Opens an outbound stream to `peer` negotiated to `protocol`.
	pub async fn new_stream(
		&self,
		peer: PeerId,
		protocol: &str,
	) -> Result<BoxedStream, SwarmError> {
		let inner = &self.inner;
		if !inner.running.load(Ordering::SeqCst) {
			return Err(SwarmError::NodeNotRunning)
		}
		let connection = inner.pool.connection(peer).ok_or(SwarmError::NotConnected(peer))?;
		let guard = ResourceGuard::stream(
			inner.config.resource_manager.clone(),
			peer,
			Direction::Outbound,
		)
		.map_err(|limit| SwarmError::ResourceLimitExceeded {
			scope: limit.scope,
			direction: limit.direction,
		})?;

		let mut stream = connection.open_stream().await?;
		let negotiated =
			match multistream::negotiate(&mut stream, &[protocol.to_owned()]).await {
				Ok(n) => n,
				Err(error) => {
					log::debug!(
						target: "mesh-swarm",
						"Negotiating {protocol} with {peer} failed: {error}",
					);
					let _ = stream.reset().await;
					return Err(SwarmError::ProtocolNegotiationFailed)
				},
			};

		if let Some(entry) =
			inner.pool.connected_managed(peer).into_iter().find(|m| m.connection.is_some())
		{
			inner.pool.touch(entry.id);
		}
		let wrapped = multistream::Remainder::new(stream, negotiated.remainder);
		Ok(Box::new(TrackedStream { inner: Box::new(wrapped), guard: Some(guard) }))
	}

	/// Feeds an externally established raw connection (e.g. a relay
	/// circuit) through the upgrade pipeline and into the pool.
	pub async fn accept_external(
		&self,
		raw: BoxedRaw,
		role: Role,
		expected_peer: Option<PeerId>,
		is_limited: bool,
	) -> Result<PeerId, SwarmError> {
		let inner = &self.inner;
		if !inner.running.load(Ordering::SeqCst) {
			return Err(SwarmError::NodeNotRunning)
		}
		match role {
			Role::Responder => inner.install_inbound_raw(raw, is_limited).await,
			Role::Initiator => {
				let address = raw.remote_addr();
				let upgraded = inner
					.upgrader
					.upgrade(raw, &inner.keypair, Role::Initiator, expected_peer)
					.await?;
				inner
					.install_outbound(upgraded.muxed, address, None, expected_peer, is_limited)
					.await
			},
		}
	}

	/// Closes every connection to `peer` and removes it from the pool.
	pub async fn disconnect(&self, peer: PeerId) {
		let inner = &self.inner;
		inner.pool.disable_auto_reconnect(peer);
		for entry in inner.pool.remove_peer(peer) {
			if let Some(handle) = inner.reconnects.lock().remove(&entry.id) {
				handle.abort();
			}
			if let Some(connection) = entry.connection {
				let _ = connection.close().await;
			}
			if entry.state == ConnectionState::Connected {
				inner.events.publish(SwarmEvent::Connection(ConnectionEvent::Disconnected {
					peer,
					reason: DisconnectReason::LocalClose,
				}));
			}
		}
		inner.emit_peer_disconnected(peer);
	}

	/// Stops everything: background tasks, pending dials, listeners,
	/// connections, bookkeeping. Idempotent; best-effort throughout.
	pub async fn shutdown(&self) {
		let inner = &self.inner;
		if !inner.running.swap(false, Ordering::SeqCst) {
			return
		}
		log::debug!(target: "mesh-swarm", "Node {} shutting down", inner.local_peer);

		for handle in inner.tasks.lock().drain(..) {
			handle.abort();
		}
		for (_, handle) in inner.reconnects.lock().drain() {
			handle.abort();
		}
		inner.pool.cancel_all_pending_dials();

		let listeners: Vec<ListenerHandle> = inner.listeners.lock().drain(..).collect();
		for handle in listeners {
			let (address, result) = match handle {
				ListenerHandle::Raw { listener, address } =>
					(address, listener.close().await),
				ListenerHandle::Secured { listener, address } =>
					(address, listener.close().await),
			};
			if let Err(error) = result {
				log::debug!(target: "mesh-swarm", "Error closing listener {address}: {error}");
			}
			inner.events.publish(SwarmEvent::ExpiredListenAddr(address));
		}

		for entry in inner.pool.remove_all() {
			let was_connected = entry.state == ConnectionState::Connected;
			if let Some(connection) = entry.connection {
				let _ = connection.close().await;
			}
			if was_connected {
				inner.events.publish(SwarmEvent::Connection(ConnectionEvent::Disconnected {
					peer: entry.peer,
					reason: DisconnectReason::LocalClose,
				}));
			}
		}
		let peers: Vec<PeerId> = inner.connected_set.lock().drain().collect();
		for peer in peers {
			inner.events.publish(SwarmEvent::PeerDisconnected(peer));
		}

		inner.backoff.clear();
		inner.advertised.lock().clear();
		inner.events.close();
	}
}

impl Inner {
	async fn bind(
		&self,
		transport: &Arc<dyn Transport>,
		address: &Multiaddr,
	) -> io::Result<Multiaddr> {
		if transport.is_secured() {
			let listener: Arc<dyn SecuredListener> =
				Arc::from(transport.listen_secured(address, &self.keypair).await?);
			let local = listener.local_addr();
			self.listeners.lock().push(ListenerHandle::Secured {
				listener: Arc::clone(&listener),
				address: local.clone(),
			});
			self.advertise(&local);
			let weak = self.weak.clone();
			async_std::task::spawn(secured_accept_loop(weak, listener));
			Ok(local)
		} else {
			let listener: Arc<dyn Listener> =
				Arc::from(transport.listen(address).await?);
			let local = listener.local_addr();
			self.listeners.lock().push(ListenerHandle::Raw {
				listener: Arc::clone(&listener),
				address: local.clone(),
			});
			self.advertise(&local);
			let weak = self.weak.clone();
			async_std::task::spawn(raw_accept_loop(weak, listener));
			Ok(local)
		}
	}

	/// Publishes `local` into the advertised set, expanding unspecified
	/// binds to per-interface addresses.
	fn advertise(&self, local: &Multiaddr) {
		let mut advertised = self.advertised.lock();
		if !local.is_unspecified() {
			advertised.push(local.clone());
			return
		}
		let v4 = matches!(local.iter().next(), Some(mesh_core::Protocol::Ip4(_)));
		match if_addrs::get_if_addrs() {
			Ok(interfaces) => {
				for interface in interfaces {
					let ip = interface.ip();
					if ip.is_ipv4() == v4 {
						advertised.push(local.with_ip(ip));
					}
				}
			},
			Err(error) => {
				log::debug!(
					target: "mesh-swarm",
					"Could not enumerate interfaces ({error}); advertising {local} as-is",
				);
				advertised.push(local.clone());
			},
		}
	}

	async fn dial_and_install(
		&self,
		transport: &dyn Transport,
		address: &Multiaddr,
		expected: Option<PeerId>,
		connecting: Option<ConnectionId>,
	) -> Result<PeerId, SwarmError> {
		let muxed: Box<dyn MuxedConnection> = if transport.is_secured() {
			transport.dial_secured(address, &self.keypair).await?
		} else {
			let raw = transport.dial(address).await?;
			self.upgrader
				.upgrade(raw, &self.keypair, Role::Initiator, expected)
				.await?
				.muxed
		};
		self.install_outbound(muxed, address.clone(), connecting, expected, address.is_circuit())
			.await
	}

	/// Post-handshake checks and pool installation for outbound
	/// connections.
	async fn install_outbound(
		&self,
		muxed: Box<dyn MuxedConnection>,
		address: Multiaddr,
		connecting: Option<ConnectionId>,
		expected: Option<PeerId>,
		is_limited: bool,
	) -> Result<PeerId, SwarmError> {
		let peer = muxed.remote_peer();
		if peer == self.local_peer {
			let _ = muxed.close().await;
			return Err(SwarmError::SelfDialNotAllowed)
		}
		if let Some(expected) = expected {
			if expected != peer {
				let _ = muxed.close().await;
				return Err(SwarmError::PeerMismatch { expected, actual: peer })
			}
		}
		if !self.config.gater.intercept_secured(peer, Direction::Outbound) {
			let _ = muxed.close().await;
			self.events.publish(SwarmEvent::Connection(ConnectionEvent::Gated {
				peer: Some(peer),
				address,
				stage: GateStage::Secured,
			}));
			return Err(SwarmError::ConnectionGated(GateStage::Secured))
		}
		if !self.pool_can_connect(peer, connecting) {
			let _ = muxed.close().await;
			return Err(SwarmError::ConnectionLimitReached)
		}
		let guard = ResourceGuard::connection(
			self.config.resource_manager.clone(),
			peer,
			Direction::Outbound,
		)
		.map_err(|limit| SwarmError::ResourceLimitExceeded {
			scope: limit.scope,
			direction: limit.direction,
		});
		let guard = match guard {
			Ok(guard) => guard,
			Err(error) => {
				let _ = muxed.close().await;
				return Err(error)
			},
		};

		// Success is recorded against the peer the caller asked for, not
		// whatever the handshake reported.
		self.backoff.record_success(expected.unwrap_or(peer));
		let connection: Arc<dyn MuxedConnection> = Arc::from(muxed);
		self.install(
			connection,
			peer,
			address,
			Direction::Outbound,
			is_limited,
			connecting,
			guard,
		)
		.await;
		Ok(peer)
	}

	/// The accept path for a raw inbound connection: gate, upgrade, check,
	/// install.
	async fn install_inbound_raw(
		&self,
		raw: BoxedRaw,
		is_limited: bool,
	) -> Result<PeerId, SwarmError> {
		let remote_addr = raw.remote_addr();
		if !self.config.gater.intercept_accept(&remote_addr) {
			self.events.publish(SwarmEvent::Connection(ConnectionEvent::Gated {
				peer: None,
				address: remote_addr,
				stage: GateStage::Accept,
			}));
			return Err(SwarmError::ConnectionGated(GateStage::Accept))
		}
		if !self.pool.can_accept_inbound() {
			return Err(SwarmError::ConnectionLimitReached)
		}
		let upgraded =
			self.upgrader.upgrade(raw, &self.keypair, Role::Responder, None).await?;
		self.install_inbound_muxed(upgraded.muxed, remote_addr, is_limited).await
	}

	/// Post-handshake checks and installation for inbound connections,
	/// muxed either by the upgrade pipeline or a secured transport.
	async fn install_inbound_muxed(
		&self,
		muxed: Box<dyn MuxedConnection>,
		address: Multiaddr,
		is_limited: bool,
	) -> Result<PeerId, SwarmError> {
		let peer = muxed.remote_peer();
		if peer == self.local_peer {
			let _ = muxed.close().await;
			return Err(SwarmError::SelfDialNotAllowed)
		}
		if !self.config.gater.intercept_secured(peer, Direction::Inbound) {
			let _ = muxed.close().await;
			self.events.publish(SwarmEvent::Connection(ConnectionEvent::Gated {
				peer: Some(peer),
				address,
				stage: GateStage::Secured,
			}));
			return Err(SwarmError::ConnectionGated(GateStage::Secured))
		}
		if !self.pool.can_connect_to(peer) {
			let _ = muxed.close().await;
			return Err(SwarmError::ConnectionLimitReached)
		}
		let guard = ResourceGuard::connection(
			self.config.resource_manager.clone(),
			peer,
			Direction::Inbound,
		)
		.map_err(|limit| SwarmError::ResourceLimitExceeded {
			scope: limit.scope,
			direction: limit.direction,
		});
		let guard = match guard {
			Ok(guard) => guard,
			Err(error) => {
				let _ = muxed.close().await;
				return Err(error)
			},
		};

		self.backoff.record_success(peer);
		let connection: Arc<dyn MuxedConnection> = Arc::from(muxed);
		self.install(connection, peer, address, Direction::Inbound, is_limited, None, guard)
			.await;
		Ok(peer)
	}

	/// Like `pool.can_connect_to` but discounting this dial's own
	/// connecting entry.
	fn pool_can_connect(&self, peer: PeerId, connecting: Option<ConnectionId>) -> bool {
		let occupied = self
			.pool
			.all()
			.into_iter()
			.filter(|m| {
				m.peer == peer &&
					Some(m.id) != connecting &&
					matches!(
						m.state,
						ConnectionState::Connected | ConnectionState::Connecting
					)
			})
			.count();
		occupied < self.pool.config().max_connections_per_peer
	}

	/// Common tail of every successful connection establishment. Runs
	/// simultaneous-connect resolution, starts the inbound-stream pump and
	/// emits events, in that order.
	#[allow(clippy::too_many_arguments)]
	async fn install(
		&self,
		connection: Arc<dyn MuxedConnection>,
		peer: PeerId,
		address: Multiaddr,
		direction: Direction,
		is_limited: bool,
		connecting: Option<ConnectionId>,
		guard: ResourceGuard,
	) {
		if !self.running.load(Ordering::SeqCst) {
			let _ = connection.close().await;
			return
		}
		let id = match connecting.filter(|id| self.pool.managed(*id).is_some()) {
			Some(id) => {
				self.pool.update_connection(
					id,
					Arc::clone(&connection),
					is_limited,
					Some(guard),
				);
				id
			},
			None => self.pool.add(
				Arc::clone(&connection),
				peer,
				address.clone(),
				direction,
				is_limited,
				Some(guard),
			),
		};

		if direction == Direction::Outbound && !self.config.pool.reconnection.is_never() {
			self.pool.enable_auto_reconnect(peer, address.clone());
		}

		self.resolve_simultaneous(peer).await;

		// The pump must run before observers learn about the connection so
		// no early inbound stream is dropped.
		let survived = self
			.pool
			.managed(id)
			.map(|m| m.state == ConnectionState::Connected)
			.unwrap_or(false);
		if !survived {
			log::debug!(
				target: "mesh-swarm",
				"Connection {id} to {peer} lost simultaneous-connect resolution",
			);
			return
		}
		spawn_pump(self.weak.clone(), id, peer, Arc::clone(&connection));

		log::debug!(
			target: "mesh-swarm",
			"Connected to {peer} at {address} ({direction:?}, {id})",
		);
		self.emit_peer_connected(peer);
		self.events.publish(SwarmEvent::Connection(ConnectionEvent::Connected {
			peer,
			address,
			direction,
		}));
	}

	/// Keeps exactly one of the concurrent connections to `peer`.
	///
	/// Both endpoints compute the same winning direction from the peer-id
	/// order, so they independently agree which connection survives. If all
	/// candidates share a direction, the oldest one wins.
	async fn resolve_simultaneous(&self, peer: PeerId) {
		let entries = self.pool.connected_managed(peer);
		if entries.len() <= 1 {
			return
		}
		let winning_direction = if self.local_peer < peer {
			Direction::Outbound
		} else {
			Direction::Inbound
		};
		let keeper = entries
			.iter()
			.filter(|e| e.direction == winning_direction)
			.min_by_key(|e| e.connected_at)
			.or_else(|| entries.iter().min_by_key(|e| e.connected_at))
			.map(|e| e.id)
			.expect("entries is non-empty; qed");

		for entry in entries.into_iter().filter(|e| e.id != keeper) {
			log::debug!(
				target: "mesh-swarm",
				"Simultaneous connect with {peer}: closing duplicate {}",
				entry.id,
			);
			if let Some(removed) = self.pool.remove(entry.id) {
				if let Some(connection) = removed.connection {
					let _ = connection.close().await;
				}
			}
		}
	}

	fn emit_peer_connected(&self, peer: PeerId) {
		if self.connected_set.lock().insert(peer) {
			self.events.publish(SwarmEvent::PeerConnected(peer));
		}
	}

	fn emit_peer_disconnected(&self, peer: PeerId) {
		if !self.pool.connected_managed(peer).is_empty() {
			return
		}
		if self.connected_set.lock().remove(&peer) {
			self.events.publish(SwarmEvent::PeerDisconnected(peer));
		}
	}

	/// Reacts to a connection's pump ending: remote close bookkeeping and,
	/// when policy and the tiebreaker agree, a reconnection schedule.
	async fn handle_closed(&self, id: ConnectionId, peer: PeerId) {
		let entry = match self.pool.managed(id) {
			Some(entry) => entry,
			None => return,
		};
		if entry.state != ConnectionState::Connected {
			return
		}
		if !self.running.load(Ordering::SeqCst) {
			return
		}

		log::debug!(target: "mesh-swarm", "Connection {id} to {peer} closed by remote");
		self.pool.reset_retry_count_if_stable(id);
		self.pool
			.update_state(id, ConnectionState::Disconnected(DisconnectReason::RemoteClose));
		self.emit_peer_disconnected(peer);
		self.events.publish(SwarmEvent::Connection(ConnectionEvent::Disconnected {
			peer,
			reason: DisconnectReason::RemoteClose,
		}));

		// Only the side with the smaller peer id re-dials; the other waits.
		if self.local_peer >= peer {
			return
		}
		let Some(reconnect_address) = self.pool.reconnect_address(peer) else { return };
		let attempt = self.pool.managed(id).map(|m| m.retry_count).unwrap_or(0) + 1;
		if !self.config.pool.reconnection.allows(attempt, &DisconnectReason::RemoteClose) {
			return
		}
		self.schedule_reconnect(id, peer, reconnect_address, attempt);
	}

	fn schedule_reconnect(
		&self,
		id: ConnectionId,
		peer: PeerId,
		address: Multiaddr,
		attempt: u32,
	) {
		let delay = self.backoff.delay_for_attempt(attempt.saturating_sub(1));
		let next_attempt_at = Instant::now() + delay;
		self.pool.update_state(id, ConnectionState::Reconnecting { attempt, next_attempt_at });
		self.pool.increment_retry_count(id);
		self.events.publish(SwarmEvent::Connection(ConnectionEvent::Reconnecting {
			peer,
			attempt,
			next_attempt_at,
		}));
		log::debug!(
			target: "mesh-swarm",
			"Reconnect attempt {attempt} to {peer} in {delay:?}",
		);

		let weak = self.weak.clone();
		let (fut, handle) = abortable(async move {
			Delay::new(delay).await;
			let Some(inner) = weak.upgrade() else { return };
			inner.perform_reconnect(id, peer, address, attempt).await;
		});
		self.reconnects.lock().insert(id, handle);
		async_std::task::spawn(async move {
			let _ = fut.await;
		});
	}

	async fn perform_reconnect(
		&self,
		id: ConnectionId,
		peer: PeerId,
		address: Multiaddr,
		attempt: u32,
	) {
		self.reconnects.lock().remove(&id);
		if !self.running.load(Ordering::SeqCst) {
			return
		}
		if self.pool.reconnect_address(peer).is_none() {
			return
		}
		if self.pool.is_connected(peer) {
			// Another path reconnected first; this entry is obsolete.
			self.pool.remove(id);
			return
		}

		let result: Result<(), SwarmError> = async {
			let transport = self
				.transports
				.iter()
				.find(|t| t.can_dial(&address))
				.cloned()
				.ok_or_else(|| SwarmError::NoSuitableTransport(address.clone()))?;
			let muxed: Box<dyn MuxedConnection> = if transport.is_secured() {
				transport.dial_secured(&address, &self.keypair).await?
			} else {
				let raw = transport.dial(&address).await?;
				self.upgrader
					.upgrade(raw, &self.keypair, Role::Initiator, Some(peer))
					.await?
					.muxed
			};
			let actual = muxed.remote_peer();
			if actual != peer {
				let _ = muxed.close().await;
				return Err(SwarmError::PeerMismatch { expected: peer, actual })
			}
			let guard = ResourceGuard::connection(
				self.config.resource_manager.clone(),
				peer,
				Direction::Outbound,
			)
			.map_err(|limit| SwarmError::ResourceLimitExceeded {
				scope: limit.scope,
				direction: limit.direction,
			});
			let guard = match guard {
				Ok(guard) => guard,
				Err(error) => {
					let _ = muxed.close().await;
					return Err(error)
				},
			};

			let connection: Arc<dyn MuxedConnection> = Arc::from(muxed);
			let old = self.pool.update_connection(
				id,
				Arc::clone(&connection),
				address.is_circuit(),
				Some(guard),
			);
			debug_assert!(old.is_none(), "reconnecting entries hold no connection");
			self.pool.reset_retry_count(id);
			self.backoff.record_success(peer);
			spawn_pump(self.weak.clone(), id, peer, connection);
			self.emit_peer_connected(peer);
			self.events.publish(SwarmEvent::Connection(ConnectionEvent::Reconnected {
				peer,
				attempt,
			}));
			log::debug!(target: "mesh-swarm", "Reconnected to {peer} on attempt {attempt}");
			Ok(())
		}
		.await;

		if let Err(error) = result {
			self.backoff.record_failure(peer);
			let kind = if error.is_negotiation_error() { "protocol" } else { "transport" };
			let reason = DisconnectReason::Error(format!("{kind} error: {error}"));
			let next_attempt = attempt + 1;
			if self.config.pool.reconnection.allows(next_attempt, &reason) {
				self.schedule_reconnect(id, peer, address, next_attempt);
			} else {
				log::debug!(
					target: "mesh-swarm",
					"Giving up on {peer} after {attempt} reconnect attempts: {error}",
				);
				self.pool.update_state(id, ConnectionState::Failed(error.to_string()));
				self.events.publish(SwarmEvent::Connection(
					ConnectionEvent::ReconnectionFailed { peer, reason: error.to_string() },
				));
			}
		}
	}

	/// One tick of the idle checker: idle close, trim, stale cleanup.
	async fn idle_cycle(&self) {
		let idle_timeout = self.config.pool.idle_timeout;
		for entry in self.pool.idle_connections(idle_timeout) {
			if let Some(removed) = self.pool.remove(entry.id) {
				log::debug!(
					target: "mesh-swarm",
					"Closing idle connection {} to {}",
					removed.id,
					removed.peer,
				);
				if let Some(connection) = removed.connection {
					let _ = connection.close().await;
				}
				self.events.publish(SwarmEvent::Connection(ConnectionEvent::Disconnected {
					peer: removed.peer,
					reason: DisconnectReason::IdleTimeout,
				}));
				self.emit_peer_disconnected(removed.peer);
			}
		}

		let (removed, report) = self.pool.trim_if_needed();
		if report.constrained {
			self.events.publish(SwarmEvent::Connection(ConnectionEvent::TrimConstrained {
				target: report.target,
				trimmable: report.candidates.len(),
			}));
		}
		for entry in removed {
			if let Some(connection) = &entry.connection {
				let _ = connection.close().await;
			}
			match report.candidates.iter().find(|c| c.id == entry.id) {
				Some(candidate) => self.events.publish(SwarmEvent::Connection(
					ConnectionEvent::TrimmedWithContext {
						peer: entry.peer,
						rank: candidate.rank,
						tag_count: candidate.tag_count,
						idle: candidate.idle,
						direction: candidate.direction,
					},
				)),
				None => self
					.events
					.publish(SwarmEvent::Connection(ConnectionEvent::Trimmed {
						peer: entry.peer,
					})),
			}
			self.emit_peer_disconnected(entry.peer);
		}

		self.pool.cleanup_stale(idle_timeout);
		self.backoff.cleanup();
	}
}

async fn raw_accept_loop(weak: Weak<Inner>, listener: Arc<dyn Listener>) {
	loop {
		let accepted = listener.accept().await;
		let Some(inner) = weak.upgrade() else { return };
		if !inner.running.load(Ordering::SeqCst) {
			return
		}
		match accepted {
			Ok(raw) => {
				let weak = weak.clone();
				async_std::task::spawn(async move {
					let Some(inner) = weak.upgrade() else { return };
					let is_limited = raw.remote_addr().is_circuit();
					if let Err(error) = inner.install_inbound_raw(raw, is_limited).await {
						log::debug!(
							target: "mesh-swarm",
							"Inbound connection rejected: {error}",
						);
						inner.events.publish(SwarmEvent::ConnectionError {
							peer: None,
							error: Arc::new(error),
						});
					}
				});
			},
			Err(error) => {
				log::debug!(target: "mesh-swarm", "Listener closed: {error}");
				return
			},
		}
	}
}

async fn secured_accept_loop(weak: Weak<Inner>, listener: Arc<dyn SecuredListener>) {
	loop {
		let accepted = listener.accept().await;
		let Some(inner) = weak.upgrade() else { return };
		if !inner.running.load(Ordering::SeqCst) {
			return
		}
		match accepted {
			Ok(muxed) => {
				let weak = weak.clone();
				async_std::task::spawn(async move {
					let Some(inner) = weak.upgrade() else { return };
					let address = muxed.remote_addr();
					let is_limited = address.is_circuit();
					if let Err(error) =
						inner.install_inbound_muxed(muxed, address, is_limited).await
					{
						log::debug!(
							target: "mesh-swarm",
							"Inbound secured connection rejected: {error}",
						);
						inner.events.publish(SwarmEvent::ConnectionError {
							peer: None,
							error: Arc::new(error),
						});
					}
				});
			},
			Err(error) => {
				log::debug!(target: "mesh-swarm", "Secured listener closed: {error}");
				return
			},
		}
	}
}

/// Per-connection task pulling inbound streams and dispatching them.
fn spawn_pump(
	weak: Weak<Inner>,
	id: ConnectionId,
	peer: PeerId,
	connection: Arc<dyn MuxedConnection>,
) {
	async_std::task::spawn(async move {
		let local_addr = connection.local_addr();
		let remote_addr = connection.remote_addr();
		loop {
			match connection.next_inbound().await {
				Some(stream) => {
					let Some(inner) = weak.upgrade() else { return };
					if !inner.running.load(Ordering::SeqCst) {
						return
					}
					inner.pool.touch(id);
					let weak = weak.clone();
					let (local_addr, remote_addr) =
						(local_addr.clone(), remote_addr.clone());
					async_std::task::spawn(async move {
						inbound_stream_task(weak, peer, stream, local_addr, remote_addr)
							.await;
					});
				},
				None => break,
			}
		}
		if let Some(inner) = weak.upgrade() {
			inner.handle_closed(id, peer).await;
		}
	});
}

/// Negotiates one inbound stream under the swarm-wide semaphore and
/// dispatches it to the registered handler.
async fn inbound_stream_task(
	weak: Weak<Inner>,
	peer: PeerId,
	mut stream: BoxedStream,
	local_addr: Multiaddr,
	remote_addr: Multiaddr,
) {
	let Some(inner) = weak.upgrade() else { return };
	let permit = inner.negotiation.acquire().await;

	// The stream reservation outlives the permit: it covers the handler.
	let guard = match ResourceGuard::stream(
		inner.config.resource_manager.clone(),
		peer,
		Direction::Inbound,
	) {
		Ok(guard) => guard,
		Err(_) => {
			log::debug!(
				target: "mesh-swarm",
				"Inbound stream from {peer} rejected by resource manager",
			);
			let _ = stream.reset().await;
			return
		},
	};

	let protocols: Vec<String> = inner.handlers.lock().keys().cloned().collect();
	let negotiated = multistream::handle(&mut stream, &protocols).await;
	drop(permit);

	match negotiated {
		Ok(negotiated) => {
			let handler = inner.handlers.lock().get(&negotiated.protocol).cloned();
			match handler {
				Some(handler) => {
					let wrapped: BoxedStream = Box::new(multistream::Remainder::new(
						stream,
						negotiated.remainder,
					));
					let ctx = StreamContext {
						stream: wrapped,
						protocol: negotiated.protocol.clone(),
						local_peer: inner.local_peer,
						remote_peer: peer,
						local_addr,
						remote_addr,
					};
					if let Err(error) = handler.on_stream(ctx).await {
						log::debug!(
							target: "mesh-swarm",
							"Handler for {} failed: {error}",
							negotiated.protocol,
						);
					}
				},
				None => {
					let _ = stream.close_write().await;
				},
			}
		},
		Err(error) => {
			log::trace!(
				target: "mesh-swarm",
				"Inbound stream negotiation with {peer} failed: {error}",
			);
			let _ = stream.reset().await;
		},
	}
	drop(guard);
}

/// An outbound stream whose resource reservation is released on close,
/// reset or drop.
struct TrackedStream {
	inner: BoxedStream,
	guard: Option<ResourceGuard>,
}

impl AsyncRead for TrackedStream {
	fn poll_read(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut [u8],
	) -> Poll<io::Result<usize>> {
		Pin::new(&mut self.inner).poll_read(cx, buf)
	}
}

impl AsyncWrite for TrackedStream {
	fn poll_write(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &[u8],
	) -> Poll<io::Result<usize>> {
		Pin::new(&mut self.inner).poll_write(cx, buf)
	}

	fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		Pin::new(&mut self.inner).poll_flush(cx)
	}

	fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		let result = futures::ready!(Pin::new(&mut self.inner).poll_close(cx));
		self.guard = None;
		Poll::Ready(result)
	}
}

#[async_trait]
impl MuxedStream for TrackedStream {
	async fn close_write(&mut self) -> io::Result<()> {
		let result = self.inner.close_write().await;
		self.guard = None;
		result
	}

	async fn close_read(&mut self) -> io::Result<()> {
		self.inner.close_read().await
	}

	async fn reset(&mut self) -> io::Result<()> {
		let result = self.inner.reset().await;
		self.guard = None;
		result
	}
}
