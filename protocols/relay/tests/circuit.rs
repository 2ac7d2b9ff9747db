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

//! Relay scenarios: reservations, end-to-end circuits, capacity limits.

use futures::io::{AsyncReadExt as _, AsyncWriteExt as _};
use std::{sync::Arc, time::Duration};

use mesh_core::{
	connection::MuxedStream as _, muxing::plex::PlexMuxer,
	security::plaintext::PlaintextUpgrader, transport::memory::MemoryTransport,
	transport::Transport, Multiaddr, Role, Upgrader,
};
use mesh_identity::Keypair;
use mesh_relay::{
	RelayClient, RelayClientConfig, RelayError, RelayServer, RelayServerConfig, Status,
};
use mesh_swarm::{PoolConfig, ReconnectionPolicy, Swarm, SwarmConfig};

fn node() -> Swarm {
	let config = SwarmConfig {
		listen_addresses: vec!["/memory/0".parse().unwrap()],
		pool: PoolConfig {
			idle_timeout: Duration::ZERO,
			reconnection: ReconnectionPolicy::Never,
			..Default::default()
		},
		..Default::default()
	};
	let upgrader =
		Upgrader::new(vec![Arc::new(PlaintextUpgrader)], vec![Arc::new(PlexMuxer)]);
	let transports: Vec<Arc<dyn Transport>> = vec![Arc::new(MemoryTransport)];
	Swarm::new(Keypair::generate(), transports, upgrader, config)
}

fn dialable_addr(swarm: &Swarm) -> Multiaddr {
	swarm.listen_addresses()[0].with_peer_id(swarm.local_peer())
}

/// Relay + two clients, everyone connected to the relay.
async fn relay_setup(
	server_config: RelayServerConfig,
) -> (Swarm, RelayServer, Swarm, RelayClient, Swarm, RelayClient) {
	let relay = node();
	relay.start().await.unwrap();
	let server = RelayServer::new(relay.clone(), server_config);

	let target = node();
	target.start().await.unwrap();
	let target_client = RelayClient::new(target.clone(), RelayClientConfig::default());

	let source = node();
	source.start().await.unwrap();
	let source_client = RelayClient::new(source.clone(), RelayClientConfig::default());

	target.dial(dialable_addr(&relay)).await.unwrap();
	source.dial(dialable_addr(&relay)).await.unwrap();

	(relay, server, target, target_client, source, source_client)
}

#[async_std::test]
async fn reservation_roundtrip() {
	let (relay, server, target, target_client, _source, _source_client) =
		relay_setup(RelayServerConfig::default()).await;
	let relay_peer = relay.local_peer();

	let reservation = target_client.reserve(relay_peer).await.unwrap();
	assert_eq!(reservation.relay, relay_peer);
	assert!(reservation.is_valid());
	assert!(!reservation.addresses.is_empty(), "relay advertises its own addresses");
	assert_eq!(server.active_reservations(), 1);
	assert!(server.observed_addr(target.local_peer()).is_some());

	// Renewal replaces the record instead of stacking a second one.
	target_client.reserve(relay_peer).await.unwrap();
	assert_eq!(server.active_reservations(), 1);

	// Releasing forgets the client-side record.
	target_client.release(relay_peer);
	assert!(target_client.reservation(relay_peer).is_none());
}

#[async_std::test]
async fn reservation_refused_at_capacity() {
	let config = RelayServerConfig { max_reservations: 0, ..Default::default() };
	let (relay, server, _target, target_client, _source, _source_client) =
		relay_setup(config).await;

	let err = target_client.reserve(relay.local_peer()).await.unwrap_err();
	assert!(matches!(
		err,
		RelayError::ReservationFailed(Status::ResourceLimitExceeded)
	));
	assert_eq!(server.active_reservations(), 0);
	assert!(target_client.reservation(relay.local_peer()).is_none());
}

#[async_std::test]
async fn concurrent_reserves_cannot_oversubscribe() {
	let config = RelayServerConfig { max_reservations: 1, ..Default::default() };
	let (relay, server, _target, target_client, _source, source_client) =
		relay_setup(config).await;
	let relay_peer = relay.local_peer();

	let first = {
		let client = target_client.clone();
		async_std::task::spawn(async move { client.reserve(relay_peer).await })
	};
	let second = {
		let client = source_client.clone();
		async_std::task::spawn(async move { client.reserve(relay_peer).await })
	};
	let outcomes = [first.await, second.await];

	let accepted = outcomes.iter().filter(|o| o.is_ok()).count();
	assert_eq!(accepted, 1, "exactly one of two concurrent reserves may win");
	assert_eq!(server.active_reservations(), 1);
	assert!(outcomes.iter().any(|o| matches!(
		o,
		Err(RelayError::ReservationFailed(Status::ResourceLimitExceeded))
	)));
}

#[async_std::test]
async fn end_to_end_circuit() {
	let _ = env_logger::try_init();
	let (relay, _server, target, target_client, _source, source_client) =
		relay_setup(RelayServerConfig::default()).await;
	let relay_peer = relay.local_peer();
	let target_peer = target.local_peer();

	let listener = target_client.listen_on(relay_peer).await.unwrap();

	let mut source_conn =
		source_client.connect_through(relay_peer, target_peer).await.unwrap();
	let mut target_conn = listener.accept().await.unwrap();

	source_conn.write_all(b"Hello from source").await.unwrap();
	let mut buf = [0u8; 17];
	target_conn.read_exact(&mut buf).await.unwrap();
	assert_eq!(&buf, b"Hello from source");

	target_conn.write_all(b"Hello from target").await.unwrap();
	source_conn.read_exact(&mut buf).await.unwrap();
	assert_eq!(&buf, b"Hello from target");

	// Closing the source side surfaces as EOF on the target side.
	source_conn.close().await.unwrap();
	let mut rest = Vec::new();
	target_conn.read_to_end(&mut rest).await.unwrap();
	assert!(rest.is_empty());
}

#[async_std::test]
async fn circuit_upgrades_into_pooled_connection() {
	let (relay, _server, target, target_client, source, source_client) =
		relay_setup(RelayServerConfig::default()).await;
	let relay_peer = relay.local_peer();
	let target_peer = target.local_peer();
	let source_peer = source.local_peer();

	// The target echoes application streams arriving over the circuit.
	struct Echo;
	#[async_trait::async_trait]
	impl mesh_swarm::StreamHandler for Echo {
		async fn on_stream(
			&self,
			mut ctx: mesh_core::connection::StreamContext,
		) -> Result<(), mesh_swarm::swarm::HandlerError> {
			let mut payload = Vec::new();
			ctx.stream.read_to_end(&mut payload).await?;
			ctx.stream.write_all(&payload).await?;
			ctx.stream.close_write().await?;
			Ok(())
		}
	}
	target.handle("/echo/1.0.0", Arc::new(Echo));

	let listener = target_client.listen_on(relay_peer).await.unwrap();

	// The target drives accepted circuits back into its swarm.
	let accept_task = {
		let target = target.clone();
		let listener = Arc::clone(&listener);
		async_std::task::spawn(async move {
			let circuit = listener.accept().await.unwrap();
			target
				.accept_external(Box::new(circuit), Role::Responder, None, true)
				.await
				.unwrap()
		})
	};

	let circuit =
		source_client.connect_through(relay_peer, target_peer).await.unwrap();
	let connected = source
		.accept_external(Box::new(circuit), Role::Initiator, Some(target_peer), true)
		.await
		.unwrap();
	assert_eq!(connected, target_peer);
	assert_eq!(accept_task.await, source_peer);

	// The pooled entry knows it runs over a circuit.
	let entries = source.pool().connected_managed(target_peer);
	assert!(entries[0].is_limited);

	let mut stream = source.new_stream(target_peer, "/echo/1.0.0").await.unwrap();
	stream.write_all(b"over the relay").await.unwrap();
	stream.close_write().await.unwrap();
	let mut reply = Vec::new();
	stream.read_to_end(&mut reply).await.unwrap();
	assert_eq!(reply, b"over the relay");
}

#[async_std::test]
async fn connect_without_reservation_is_refused() {
	let (relay, _server, target, _target_client, _source, source_client) =
		relay_setup(RelayServerConfig::default()).await;

	let err = source_client
		.connect_through(relay.local_peer(), target.local_peer())
		.await
		.err().unwrap();
	assert!(matches!(
		err,
		RelayError::ConnectionFailed(Status::NoReservation)
	));
}

#[async_std::test]
async fn closed_listener_refuses_circuits() {
	let (relay, _server, target, target_client, _source, source_client) =
		relay_setup(RelayServerConfig::default()).await;
	let relay_peer = relay.local_peer();

	let listener = target_client.listen_on(relay_peer).await.unwrap();
	listener.close();

	// With the listener closed the target refuses the stop request, which
	// the relay maps to a connection failure for the source.
	let err = source_client
		.connect_through(relay_peer, target.local_peer())
		.await
		.err().unwrap();
	assert!(matches!(err, RelayError::ConnectionFailed(_)));
}
