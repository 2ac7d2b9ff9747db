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

//! End-to-end swarm scenarios over the in-process memory transport.

use assert_matches::assert_matches;
use async_trait::async_trait;
use futures::{
	io::{AsyncReadExt as _, AsyncWriteExt as _},
	StreamExt as _,
};
use parking_lot::Mutex;
use std::{
	sync::Arc,
	time::{Duration, Instant},
};

use mesh_core::{
	connection::{MuxedStream as _, StreamContext},
	muxing::plex::PlexMuxer,
	security::plaintext::PlaintextUpgrader,
	transport::memory::MemoryTransport,
	transport::Transport,
	Multiaddr, Upgrader,
};
use mesh_identity::Keypair;
use mesh_swarm::{
	BackoffConfig, ConnectionEvent, Direction, EventStream, HandlerError, PoolConfig,
	ReconnectionPolicy, ResourceLimit, ResourceManager, StreamHandler, Swarm, SwarmConfig,
	SwarmError, SwarmEvent,
};

const ECHO_PROTOCOL: &str = "/echo/1.0.0";

fn config() -> SwarmConfig {
	SwarmConfig {
		listen_addresses: vec!["/memory/0".parse().unwrap()],
		pool: PoolConfig {
			// Timing-sensitive machinery is opted into per test.
			idle_timeout: Duration::ZERO,
			reconnection: ReconnectionPolicy::Never,
			..Default::default()
		},
		..Default::default()
	}
}

fn node(config: SwarmConfig) -> Swarm {
	node_with_keypair(Keypair::generate(), config)
}

fn node_with_keypair(keypair: Keypair, config: SwarmConfig) -> Swarm {
	let upgrader =
		Upgrader::new(vec![Arc::new(PlaintextUpgrader)], vec![Arc::new(PlexMuxer)]);
	let transports: Vec<Arc<dyn Transport>> = vec![Arc::new(MemoryTransport)];
	Swarm::new(keypair, transports, upgrader, config)
}

/// The swarm's own listen address with its peer id attached.
fn dialable_addr(swarm: &Swarm) -> Multiaddr {
	swarm.listen_addresses()[0].with_peer_id(swarm.local_peer())
}

struct EchoHandler;

#[async_trait]
impl StreamHandler for EchoHandler {
	async fn on_stream(&self, mut ctx: StreamContext) -> Result<(), HandlerError> {
		let mut payload = Vec::new();
		ctx.stream.read_to_end(&mut payload).await?;
		ctx.stream.write_all(&payload).await?;
		ctx.stream.close_write().await?;
		Ok(())
	}
}

async fn wait_until(mut condition: impl FnMut() -> bool, what: &str) {
	let deadline = Instant::now() + Duration::from_secs(5);
	while !condition() {
		assert!(Instant::now() < deadline, "timed out waiting for {what}");
		async_std::task::sleep(Duration::from_millis(10)).await;
	}
}

/// Drains `events` until `matcher` returns true, within a deadline.
async fn wait_for_event(
	events: &mut EventStream,
	what: &str,
	mut matcher: impl FnMut(&SwarmEvent) -> bool,
) -> SwarmEvent {
	let fut = async {
		while let Some(event) = events.next().await {
			if matcher(&event) {
				return event
			}
		}
		panic!("event stream ended while waiting for {what}");
	};
	match future_timeout(Duration::from_secs(5), fut).await {
		Some(event) => event,
		None => panic!("timed out waiting for {what}"),
	}
}

async fn future_timeout<F: std::future::Future>(
	duration: Duration,
	fut: F,
) -> Option<F::Output> {
	use futures::future::Either;
	let delay = futures_timer::Delay::new(duration);
	futures::pin_mut!(fut);
	futures::pin_mut!(delay);
	match futures::future::select(fut, delay).await {
		Either::Left((value, _)) => Some(value),
		Either::Right(((), _)) => None,
	}
}

#[async_std::test]
async fn happy_dial_and_echo() {
	let _ = env_logger::try_init();
	let a = node(config());
	let b = node(config());
	a.handle(ECHO_PROTOCOL, Arc::new(EchoHandler));

	a.start().await.unwrap();
	b.start().await.unwrap();
	let mut a_events = a.events();
	let mut b_events = b.events();

	let a_peer = a.local_peer();
	let b_peer = b.local_peer();
	let dialed = b.dial(dialable_addr(&a)).await.unwrap();
	assert_eq!(dialed, a_peer);

	wait_for_event(&mut b_events, "b: peer connected", |e| {
		matches!(e, SwarmEvent::PeerConnected(p) if *p == a_peer)
	})
	.await;
	wait_for_event(&mut a_events, "a: peer connected", |e| {
		matches!(e, SwarmEvent::PeerConnected(p) if *p == b_peer)
	})
	.await;
	assert!(b.connection(a_peer).is_some());
	wait_until(|| a.connection(b_peer).is_some(), "accept side pool entry").await;

	let mut stream = b.new_stream(a_peer, ECHO_PROTOCOL).await.unwrap();
	stream.write_all(b"hello mesh").await.unwrap();
	stream.close_write().await.unwrap();
	let mut reply = Vec::new();
	stream.read_to_end(&mut reply).await.unwrap();
	assert_eq!(reply, b"hello mesh");

	a.shutdown().await;
	b.shutdown().await;
}

#[async_std::test]
async fn happy_dial_over_tcp() {
	let tcp_node = |listen: &str| {
		let upgrader =
			Upgrader::new(vec![Arc::new(PlaintextUpgrader)], vec![Arc::new(PlexMuxer)]);
		let transports: Vec<Arc<dyn Transport>> =
			vec![Arc::new(mesh_tcp::TcpTransport)];
		let config = SwarmConfig {
			listen_addresses: listen.parse().into_iter().collect(),
			pool: PoolConfig {
				idle_timeout: Duration::ZERO,
				reconnection: ReconnectionPolicy::Never,
				..Default::default()
			},
			..Default::default()
		};
		Swarm::new(Keypair::generate(), transports, upgrader, config)
	};
	let a = tcp_node("/ip4/127.0.0.1/tcp/0");
	let b = tcp_node("/ip4/127.0.0.1/tcp/0");
	a.handle(ECHO_PROTOCOL, Arc::new(EchoHandler));
	a.start().await.unwrap();
	b.start().await.unwrap();

	let a_peer = b.dial(dialable_addr(&a)).await.unwrap();
	assert_eq!(a_peer, a.local_peer());

	let mut stream = b.new_stream(a_peer, ECHO_PROTOCOL).await.unwrap();
	stream.write_all(b"over tcp this time").await.unwrap();
	stream.close_write().await.unwrap();
	let mut reply = Vec::new();
	stream.read_to_end(&mut reply).await.unwrap();
	assert_eq!(reply, b"over tcp this time");

	a.shutdown().await;
	b.shutdown().await;
}

#[async_std::test]
async fn simultaneous_connect_keeps_one_connection() {
	let a = node(config());
	let b = node(config());
	a.start().await.unwrap();
	b.start().await.unwrap();

	let a_peer = a.local_peer();
	let b_peer = b.local_peer();
	let mut a_events = a.events();

	let addr_a = dialable_addr(&a);
	let addr_b = dialable_addr(&b);
	let dial_ab = {
		let a = a.clone();
		async_std::task::spawn(async move { a.dial(addr_b).await })
	};
	let dial_ba = {
		let b = b.clone();
		async_std::task::spawn(async move { b.dial(addr_a).await })
	};
	let _ = dial_ab.await;
	let _ = dial_ba.await;

	wait_until(
		|| {
			a.pool().connected_managed(b_peer).len() == 1 &&
				b.pool().connected_managed(a_peer).len() == 1
		},
		"exactly one surviving connection per side",
	)
	.await;

	// Deterministic direction: the smaller peer id keeps its outbound.
	let a_entries = a.pool().connected_managed(b_peer);
	let b_entries = b.pool().connected_managed(a_peer);
	let (a_entry, b_entry) = (&a_entries[0], &b_entries[0]);
	if a_peer < b_peer {
		assert_eq!(a_entry.direction, Direction::Outbound);
		assert_eq!(b_entry.direction, Direction::Inbound);
	} else {
		assert_eq!(a_entry.direction, Direction::Inbound);
		assert_eq!(b_entry.direction, Direction::Outbound);
	}

	// No duplicate PeerConnected: the first is consumed here, any second
	// one would surface before the disconnect below.
	wait_for_event(&mut a_events, "a: peer connected", |e| {
		matches!(e, SwarmEvent::PeerConnected(p) if *p == b_peer)
	})
	.await;
	a.disconnect(b_peer).await;
	let next = wait_for_event(&mut a_events, "a: peer disconnected", |e| {
		matches!(e, SwarmEvent::PeerConnected(_) | SwarmEvent::PeerDisconnected(_))
	})
	.await;
	assert!(
		matches!(next, SwarmEvent::PeerDisconnected(p) if p == b_peer),
		"a second PeerConnected leaked: {next:?}",
	);

	a.shutdown().await;
	b.shutdown().await;
}

#[async_std::test]
async fn self_dial_is_rejected() {
	let a = node(config());
	a.start().await.unwrap();

	// Address embedding our own peer id fails before any I/O.
	let explicit = dialable_addr(&a);
	let err = a.dial(explicit).await.unwrap_err();
	assert_matches!(err.root(), SwarmError::SelfDialNotAllowed);

	// Address without a peer id reveals ourselves post-handshake.
	let anonymous = a.listen_addresses()[0].clone();
	let err = a.dial(anonymous).await.unwrap_err();
	assert_matches!(err.root(), SwarmError::SelfDialNotAllowed);

	wait_until(|| a.pool().all().is_empty(), "no pool entry left behind").await;
	a.shutdown().await;
}

#[async_std::test]
async fn reconnects_after_remote_close() {
	// Order the nodes so `small` holds the smaller peer id: only that side
	// may schedule reconnects.
	let (small_key, big_key) = {
		let (x, y) = (Keypair::generate(), Keypair::generate());
		if x.peer_id() < y.peer_id() {
			(x, y)
		} else {
			(y, x)
		}
	};
	let reconnect_config = || SwarmConfig {
		pool: PoolConfig {
			idle_timeout: Duration::ZERO,
			reconnection: ReconnectionPolicy::Always { max_retries: 3 },
			..Default::default()
		},
		backoff: BackoffConfig {
			base: Duration::from_millis(50),
			factor: 2.0,
			max: Duration::from_secs(1),
			jitter: 0.0,
		},
		listen_addresses: vec!["/memory/0".parse().unwrap()],
		..Default::default()
	};
	let small = node_with_keypair(small_key, reconnect_config());
	let big = node_with_keypair(big_key, reconnect_config());
	small.start().await.unwrap();
	big.start().await.unwrap();

	let big_peer = big.local_peer();
	let small_peer = small.local_peer();
	small.dial(dialable_addr(&big)).await.unwrap();
	let mut small_events = small.events();

	// The remote side closes; the smaller side must come back on its own.
	big.disconnect(small_peer).await;

	let event = wait_for_event(&mut small_events, "reconnected", |e| {
		matches!(e, SwarmEvent::Connection(ConnectionEvent::Reconnected { .. }))
	})
	.await;
	match event {
		SwarmEvent::Connection(ConnectionEvent::Reconnected { peer, attempt }) => {
			assert_eq!(peer, big_peer);
			assert_eq!(attempt, 1);
		},
		_ => unreachable!(),
	}
	wait_until(|| small.connection(big_peer).is_some(), "restored connection").await;

	small.shutdown().await;
	big.shutdown().await;
}

/// Tracks stream reservations to observe the negotiation cap from outside.
#[derive(Default)]
struct CountingResources {
	state: Mutex<CountingState>,
}

#[derive(Default)]
struct CountingState {
	current_inbound_streams: usize,
	max_inbound_streams: usize,
	total_reserved: usize,
	total_released: usize,
}

impl ResourceManager for CountingResources {
	fn reserve_connection(
		&self,
		_: mesh_identity::PeerId,
		_: Direction,
	) -> Result<(), ResourceLimit> {
		Ok(())
	}

	fn reserve_stream(
		&self,
		_: mesh_identity::PeerId,
		direction: Direction,
	) -> Result<(), ResourceLimit> {
		if direction == Direction::Inbound {
			let mut state = self.state.lock();
			state.current_inbound_streams += 1;
			state.total_reserved += 1;
			state.max_inbound_streams =
				state.max_inbound_streams.max(state.current_inbound_streams);
		}
		Ok(())
	}

	fn release_connection(&self, _: mesh_identity::PeerId, _: Direction) {}

	fn release_stream(&self, _: mesh_identity::PeerId, direction: Direction) {
		if direction == Direction::Inbound {
			let mut state = self.state.lock();
			state.current_inbound_streams -= 1;
			state.total_released += 1;
		}
	}
}

#[async_std::test]
async fn inbound_negotiation_cap_bounds_concurrency() {
	const CAP: usize = 2;
	const STREAMS: usize = CAP + 10;

	let resources = Arc::new(CountingResources::default());
	let mut listener_config = config();
	listener_config.max_negotiating_inbound_streams = CAP;
	listener_config.resource_manager = resources.clone();
	let a = node(listener_config);
	let b = node(config());
	a.start().await.unwrap();
	b.start().await.unwrap();

	let a_peer = a.local_peer();
	b.dial(dialable_addr(&a)).await.unwrap();

	// Open raw muxer streams that never negotiate: each occupies one
	// negotiation slot on the listener until it dies.
	let connection = b.connection(a_peer).unwrap();
	let mut silent = Vec::new();
	for _ in 0..STREAMS {
		silent.push(connection.open_stream().await.unwrap());
	}
	async_std::task::sleep(Duration::from_millis(300)).await;

	{
		let state = resources.state.lock();
		assert_eq!(
			state.total_reserved, CAP,
			"only CAP streams may get past the negotiation semaphore",
		);
		assert!(state.max_inbound_streams <= CAP);
	}

	// Killing the streams frees the slots; the queued ones cycle through,
	// and every reservation is matched by a release.
	for mut stream in silent {
		let _ = stream.reset().await;
	}
	wait_until(
		|| {
			let state = resources.state.lock();
			state.total_reserved == STREAMS && state.total_released == STREAMS
		},
		"all reservations released",
	)
	.await;
	{
		let state = resources.state.lock();
		assert!(state.max_inbound_streams <= CAP);
		assert_eq!(state.current_inbound_streams, 0);
	}

	a.shutdown().await;
	b.shutdown().await;
}

#[async_std::test]
async fn concurrent_dials_join_the_pending_dial() {
	let a = node(config());
	let b = node(config());
	a.start().await.unwrap();
	b.start().await.unwrap();

	let addr = dialable_addr(&a);
	let mut dials = Vec::new();
	for _ in 0..4 {
		let b = b.clone();
		let addr = addr.clone();
		dials.push(async_std::task::spawn(async move { b.dial(addr).await }));
	}
	for dial in dials {
		assert_eq!(dial.await.unwrap(), a.local_peer());
	}
	// Joining must not open extra connections.
	assert_eq!(b.pool().connected_managed(a.local_peer()).len(), 1);

	a.shutdown().await;
	b.shutdown().await;
}

#[async_std::test]
async fn gater_blocks_dials() {
	struct DenyAll;
	impl mesh_swarm::ConnectionGater for DenyAll {
		fn intercept_dial(
			&self,
			_: Option<mesh_identity::PeerId>,
			_: &Multiaddr,
		) -> bool {
			false
		}
	}

	let a = node(config());
	let mut gated_config = config();
	gated_config.gater = Arc::new(DenyAll);
	let b = node(gated_config);
	a.start().await.unwrap();
	b.start().await.unwrap();

	let err = b.dial(dialable_addr(&a)).await.unwrap_err();
	assert!(matches!(
		err.root(),
		SwarmError::ConnectionGated(mesh_swarm::GateStage::Dial)
	));

	a.shutdown().await;
	b.shutdown().await;
}

#[async_std::test]
async fn idle_connections_are_closed() {
	let idle_config = || SwarmConfig {
		listen_addresses: vec!["/memory/0".parse().unwrap()],
		pool: PoolConfig {
			idle_timeout: Duration::from_millis(200),
			reconnection: ReconnectionPolicy::Never,
			..Default::default()
		},
		..Default::default()
	};
	let a = node(idle_config());
	let b = node(idle_config());
	a.start().await.unwrap();
	b.start().await.unwrap();

	let a_peer = a.local_peer();
	let mut b_events = b.events();
	b.dial(dialable_addr(&a)).await.unwrap();
	assert!(b.connection(a_peer).is_some());

	// Whichever side's idle checker fires first closes; the other side
	// observes a remote close. Either way the connection must go away.
	wait_for_event(&mut b_events, "idle disconnect", |e| {
		matches!(
			e,
			SwarmEvent::Connection(ConnectionEvent::Disconnected {
				reason: mesh_swarm::DisconnectReason::IdleTimeout |
					mesh_swarm::DisconnectReason::RemoteClose,
				..
			})
		)
	})
	.await;
	wait_until(|| b.connection(a_peer).is_none(), "idle connection removed").await;

	a.shutdown().await;
	b.shutdown().await;
}

#[async_std::test]
async fn shutdown_is_idempotent_and_final() {
	let a = node(config());
	a.start().await.unwrap();
	let addr = dialable_addr(&a);

	a.shutdown().await;
	a.shutdown().await;

	let err = a.dial(addr).await.unwrap_err();
	assert!(matches!(err.root(), SwarmError::NodeNotRunning));
	assert!(a.listen_addresses().is_empty());
}

#[async_std::test]
async fn dial_without_transport_fails() {
	let a = node(config());
	a.start().await.unwrap();
	let err = a.dial("/ip4/127.0.0.1/tcp/1".parse().unwrap()).await.unwrap_err();
	assert_matches!(err.root(), SwarmError::NoSuitableTransport(_));
	a.shutdown().await;
}

#[async_std::test]
async fn new_stream_requires_connection() {
	let a = node(config());
	a.start().await.unwrap();
	let stranger = Keypair::generate().peer_id();
	let err = a.new_stream(stranger, ECHO_PROTOCOL).await.err().unwrap();
	assert!(matches!(err.root(), SwarmError::NotConnected(p) if *p == stranger));
	a.shutdown().await;
}
