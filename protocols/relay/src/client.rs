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

//! The relay client: reservations, dialing through relays, and delivery
//! of inbound circuits.
//!
//! The client registers itself as the swarm's handler for the stop
//! protocol. Inbound `CONNECT` stop messages become [`RelayedConnection`]s
//! queued on the [`RelayListener`] registered for the calling relay; the
//! listener's consumer feeds them back into the swarm's external accept
//! path, so a circuit ends up a regular pooled connection.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::{io, sync::Arc};

use crate::{
	codec::{read_message, write_message},
	connection::RelayedConnection,
	listener::{RelayListener, DEFAULT_QUEUE_CAPACITY},
	message::{hop_message, stop_message, HopMessage, Peer, Status, StopMessage},
	system_time_from_unix, CircuitLimit, RelayError, Reservation, HOP_PROTOCOL_ID,
	STOP_PROTOCOL_ID,
};
use mesh_core::{
	connection::{BoxedRaw, StreamContext},
	multiaddr::{Multiaddr, Protocol},
	transport::{Listener, PathKind, Transport},
};
use mesh_identity::PeerId;
use mesh_swarm::{HandlerError, StreamHandler, Swarm};

/// Relay client knobs.
#[derive(Debug, Clone)]
pub struct RelayClientConfig {
	/// Pending-circuit queue depth per relay listener.
	pub queue_capacity: usize,
	/// Limits assumed when the relay does not state its own.
	pub default_limit: CircuitLimit,
}

impl Default for RelayClientConfig {
	fn default() -> Self {
		RelayClientConfig {
			queue_capacity: DEFAULT_QUEUE_CAPACITY,
			default_limit: CircuitLimit::standard(),
		}
	}
}

struct ClientInner {
	swarm: Swarm,
	config: RelayClientConfig,
	reservations: Mutex<fnv::FnvHashMap<PeerId, Reservation>>,
	listeners: Mutex<fnv::FnvHashMap<PeerId, Arc<RelayListener>>>,
}

/// Client side of circuit relay v2. Cheap to clone.
#[derive(Clone)]
pub struct RelayClient {
	inner: Arc<ClientInner>,
}

impl RelayClient {
	/// Builds the client and registers its stop handler on `swarm`.
	pub fn new(swarm: Swarm, config: RelayClientConfig) -> Self {
		let inner = Arc::new(ClientInner {
			swarm: swarm.clone(),
			config,
			reservations: Mutex::new(Default::default()),
			listeners: Mutex::new(Default::default()),
		});
		swarm.handle(STOP_PROTOCOL_ID, Arc::new(StopHandler { inner: Arc::clone(&inner) }));
		RelayClient { inner }
	}

	/// Reserves (or renews) a slot on `relay`. Requires a live connection
	/// to the relay.
	pub async fn reserve(&self, relay: PeerId) -> Result<Reservation, RelayError> {
		let mut stream = self.inner.swarm.new_stream(relay, HOP_PROTOCOL_ID).await?;
		write_message(&mut stream, &HopMessage::reserve()).await?;
		let reply: HopMessage = read_message(&mut stream).await?;

		if reply.r#type != hop_message::Type::Status as i32 {
			return Err(RelayError::UnexpectedMessage)
		}
		let status = Status::from_wire(reply.status);
		if status != Status::Ok {
			return Err(RelayError::ReservationFailed(status))
		}
		let record = reply.reservation.ok_or(RelayError::MalformedMessage)?;
		let reservation = Reservation {
			relay,
			expiration: system_time_from_unix(record.expire.unwrap_or(0)),
			addresses: record
				.addrs
				.iter()
				.filter_map(|bytes| std::str::from_utf8(bytes).ok())
				.filter_map(|text| text.parse::<Multiaddr>().ok())
				.collect(),
			voucher: record.voucher,
		};
		log::debug!(
			target: "mesh-relay",
			"Reserved slot on {relay}, valid until {:?}",
			reservation.expiration,
		);
		self.inner.reservations.lock().insert(relay, reservation.clone());
		Ok(reservation)
	}

	/// The stored reservation for `relay`, if any.
	pub fn reservation(&self, relay: PeerId) -> Option<Reservation> {
		self.inner.reservations.lock().get(&relay).cloned()
	}

	/// Drops the reservation record and closes the listener for `relay`.
	pub fn release(&self, relay: PeerId) {
		self.inner.reservations.lock().remove(&relay);
		if let Some(listener) = self.inner.listeners.lock().remove(&relay) {
			listener.close();
		}
	}

	/// Reserves on `relay` and registers a listener for circuits delivered
	/// through it. The caller accepts on the listener and (typically)
	/// feeds each connection into
	/// [`Swarm::accept_external`](mesh_swarm::Swarm::accept_external).
	pub async fn listen_on(&self, relay: PeerId) -> Result<Arc<RelayListener>, RelayError> {
		let valid = self.reservation(relay).map(|r| r.is_valid()).unwrap_or(false);
		if !valid {
			self.reserve(relay).await?;
		}
		let mut listeners = self.inner.listeners.lock();
		if let Some(existing) = listeners.get(&relay) {
			if !existing.is_closed() {
				return Ok(Arc::clone(existing))
			}
		}
		let listener =
			Arc::new(RelayListener::new(relay, self.inner.config.queue_capacity));
		listeners.insert(relay, Arc::clone(&listener));
		Ok(listener)
	}

	/// Dials `target` through `relay`, returning the circuit as a raw
	/// connection ready for the upgrade pipeline.
	pub async fn connect_through(
		&self,
		relay: PeerId,
		target: PeerId,
	) -> Result<RelayedConnection, RelayError> {
		let mut stream = self.inner.swarm.new_stream(relay, HOP_PROTOCOL_ID).await?;
		write_message(
			&mut stream,
			&HopMessage::connect(Peer { id: target.to_bytes(), addrs: Vec::new() }),
		)
		.await?;
		let reply: HopMessage = read_message(&mut stream).await?;

		if reply.r#type != hop_message::Type::Status as i32 {
			return Err(RelayError::UnexpectedMessage)
		}
		let status = Status::from_wire(reply.status);
		if status != Status::Ok {
			return Err(RelayError::ConnectionFailed(status))
		}
		let limit = CircuitLimit::from_proto(reply.limit.as_ref())
			.or(self.inner.config.default_limit);
		log::debug!(target: "mesh-relay", "Circuit to {target} open through {relay}");
		Ok(RelayedConnection::new(stream, relay, target, limit))
	}

	/// Closes all listeners and forgets all reservations.
	pub fn shutdown(&self) {
		for (_, listener) in self.inner.listeners.lock().drain() {
			listener.close();
		}
		self.inner.reservations.lock().clear();
	}
}

/// Handler for inbound stop streams: the relay announcing a circuit.
struct StopHandler {
	inner: Arc<ClientInner>,
}

#[async_trait]
impl StreamHandler for StopHandler {
	async fn on_stream(&self, ctx: StreamContext) -> Result<(), HandlerError> {
		let relay = ctx.remote_peer;
		let mut stream = ctx.stream;
		let message: StopMessage = read_message(&mut stream).await?;

		if message.r#type != stop_message::Type::Connect as i32 {
			write_message(&mut stream, &StopMessage::status_message(Status::UnexpectedMessage))
				.await?;
			return Err(RelayError::UnexpectedMessage.into())
		}
		let source = match message
			.peer
			.as_ref()
			.and_then(|peer| PeerId::from_bytes(&peer.id).ok())
		{
			Some(source) => source,
			None => {
				write_message(&mut stream, &StopMessage::status_message(Status::MalformedMessage))
					.await?;
				return Err(RelayError::MalformedMessage.into())
			},
		};

		let listener = self.inner.listeners.lock().get(&relay).cloned();
		let listener = match listener.filter(|l| !l.is_closed()) {
			Some(listener) => listener,
			None => {
				log::debug!(
					target: "mesh-relay",
					"No listener for relay {relay}, refusing circuit from {source}",
				);
				write_message(&mut stream, &StopMessage::status_message(Status::ConnectionFailed))
					.await?;
				return Ok(())
			},
		};

		write_message(&mut stream, &StopMessage::status_message(Status::Ok)).await?;
		let limit = CircuitLimit::from_proto(message.limit.as_ref())
			.or(self.inner.config.default_limit);
		let connection = RelayedConnection::new(stream, relay, source, limit);
		match listener.enqueue(connection) {
			Ok(()) => {
				log::debug!(
					target: "mesh-relay",
					"Circuit established from {source} through {relay}",
				);
				Ok(())
			},
			Err(error) => {
				log::debug!(
					target: "mesh-relay",
					"Dropping circuit from {source}: {error}",
				);
				Err(error.into())
			},
		}
	}
}

/// A [`Transport`] dialing `/p2p/<relay>/p2p-circuit/p2p/<target>`
/// addresses through a [`RelayClient`], so the swarm can treat relayed
/// paths like any other dialable address.
pub struct RelayTransport {
	client: RelayClient,
}

impl RelayTransport {
	pub fn new(client: RelayClient) -> Self {
		RelayTransport { client }
	}
}

fn parse_circuit(addr: &Multiaddr) -> Option<(PeerId, PeerId)> {
	let components: Vec<&Protocol> = addr.iter().collect();
	match components.as_slice() {
		[Protocol::P2p(relay), Protocol::P2pCircuit, Protocol::P2p(target)] =>
			Some((*relay, *target)),
		_ => None,
	}
}

#[async_trait]
impl Transport for RelayTransport {
	fn can_dial(&self, addr: &Multiaddr) -> bool {
		parse_circuit(addr).is_some()
	}

	fn can_listen(&self, _addr: &Multiaddr) -> bool {
		false
	}

	fn protocols(&self) -> Vec<Vec<&'static str>> {
		vec![vec!["p2p", "p2p-circuit", "p2p"]]
	}

	fn path_kind(&self) -> PathKind {
		PathKind::Relay
	}

	async fn dial(&self, addr: &Multiaddr) -> io::Result<BoxedRaw> {
		let (relay, target) = parse_circuit(addr).ok_or_else(|| {
			io::Error::new(
				io::ErrorKind::InvalidInput,
				format!("not a circuit address: {addr}"),
			)
		})?;
		let connection = self
			.client
			.connect_through(relay, target)
			.await
			.map_err(|e| io::Error::new(io::ErrorKind::ConnectionRefused, e))?;
		Ok(Box::new(connection))
	}

	async fn listen(&self, addr: &Multiaddr) -> io::Result<Box<dyn Listener>> {
		Err(io::Error::new(
			io::ErrorKind::Unsupported,
			format!("circuit addresses are not listenable directly: {addr}"),
		))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use mesh_identity::Keypair;

	#[test]
	fn circuit_address_parsing() {
		let relay = Keypair::generate().peer_id();
		let target = Keypair::generate().peer_id();
		let addr: Multiaddr =
			format!("/p2p/{relay}/p2p-circuit/p2p/{target}").parse().unwrap();
		assert_eq!(parse_circuit(&addr), Some((relay, target)));

		let direct: Multiaddr = "/ip4/127.0.0.1/tcp/1".parse().unwrap();
		assert_eq!(parse_circuit(&direct), None);
	}
}
