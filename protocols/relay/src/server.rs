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

//! The relay server: accepts `RESERVE` and `CONNECT` hop requests and
//! splices circuits between peers under byte and duration limits.
//!
//! Reservation admission happens atomically under one mutex, so two
//! concurrent reserves can never oversubscribe the cap.

use async_trait::async_trait;
use futures::{
	future::{self, Either},
	io::{AsyncReadExt as _, AsyncWriteExt as _},
	pin_mut,
};
use futures_timer::Delay;
use parking_lot::Mutex;
use std::{
	io,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc,
	},
	time::{Duration, Instant},
};

use crate::{
	codec::{read_message, write_message},
	message::{hop_message, stop_message, HopMessage, Peer, Status, StopMessage},
	unix_now, CircuitLimit, HOP_PROTOCOL_ID, STOP_PROTOCOL_ID,
};
use mesh_core::{
	connection::{BoxedStream, MuxedStream as _, StreamContext},
	Multiaddr,
};
use mesh_identity::PeerId;
use mesh_swarm::{HandlerError, StreamHandler, Swarm};

/// Relay server knobs.
#[derive(Debug, Clone)]
pub struct RelayServerConfig {
	/// Total concurrent reservations accepted.
	pub max_reservations: usize,
	/// Active circuits any single peer may be party to.
	pub max_circuits_per_peer: usize,
	/// Lifetime granted to each reservation.
	pub reservation_ttl: Duration,
	/// Limits applied to every circuit.
	pub limit: CircuitLimit,
}

impl Default for RelayServerConfig {
	fn default() -> Self {
		RelayServerConfig {
			max_reservations: 128,
			max_circuits_per_peer: 16,
			reservation_ttl: Duration::from_secs(3600),
			limit: CircuitLimit::standard(),
		}
	}
}

struct ReservationRecord {
	expiration: Instant,
	observed_addr: Multiaddr,
}

#[derive(Default)]
struct ServerState {
	reservations: fnv::FnvHashMap<PeerId, ReservationRecord>,
	circuits: fnv::FnvHashMap<PeerId, usize>,
}

impl ServerState {
	fn reap_expired(&mut self) {
		let now = Instant::now();
		self.reservations.retain(|_, record| record.expiration > now);
	}

	fn circuits_of(&self, peer: PeerId) -> usize {
		self.circuits.get(&peer).copied().unwrap_or(0)
	}

	fn add_circuit(&mut self, peer: PeerId) {
		*self.circuits.entry(peer).or_insert(0) += 1;
	}

	fn drop_circuit(&mut self, peer: PeerId) {
		if let Some(count) = self.circuits.get_mut(&peer) {
			*count = count.saturating_sub(1);
			if *count == 0 {
				self.circuits.remove(&peer);
			}
		}
	}
}

struct ServerInner {
	swarm: Swarm,
	config: RelayServerConfig,
	state: Mutex<ServerState>,
}

/// Server side of circuit relay v2. Cheap to clone.
#[derive(Clone)]
pub struct RelayServer {
	inner: Arc<ServerInner>,
}

impl RelayServer {
	/// Builds the server and registers its hop handler on `swarm`.
	pub fn new(swarm: Swarm, config: RelayServerConfig) -> Self {
		let inner = Arc::new(ServerInner {
			swarm: swarm.clone(),
			config,
			state: Mutex::new(ServerState::default()),
		});
		swarm.handle(HOP_PROTOCOL_ID, Arc::new(HopHandler { inner: Arc::clone(&inner) }));
		RelayServer { inner }
	}

	/// Live reservations right now.
	pub fn active_reservations(&self) -> usize {
		let mut state = self.inner.state.lock();
		state.reap_expired();
		state.reservations.len()
	}

	/// Active circuits `peer` is party to.
	pub fn active_circuits(&self, peer: PeerId) -> usize {
		self.inner.state.lock().circuits_of(peer)
	}

	/// The address the relay observed `peer` on when it reserved.
	pub fn observed_addr(&self, peer: PeerId) -> Option<Multiaddr> {
		self.inner.state.lock().reservations.get(&peer).map(|r| r.observed_addr.clone())
	}
}

struct HopHandler {
	inner: Arc<ServerInner>,
}

#[async_trait]
impl StreamHandler for HopHandler {
	async fn on_stream(&self, ctx: StreamContext) -> Result<(), HandlerError> {
		let source = ctx.remote_peer;
		let observed_addr = ctx.remote_addr.clone();
		let mut stream = ctx.stream;
		let message: HopMessage = read_message(&mut stream).await?;

		match message.r#type {
			t if t == hop_message::Type::Reserve as i32 =>
				self.inner.handle_reserve(source, observed_addr, stream).await,
			t if t == hop_message::Type::Connect as i32 =>
				self.inner.handle_connect(source, message, stream).await,
			_ => {
				write_message(&mut stream, &HopMessage::status_message(Status::UnexpectedMessage))
					.await?;
				Ok(())
			},
		}
	}
}

impl ServerInner {
	async fn handle_reserve(
		&self,
		client: PeerId,
		observed_addr: Multiaddr,
		mut stream: BoxedStream,
	) -> Result<(), HandlerError> {
		let accepted = {
			let mut state = self.state.lock();
			state.reap_expired();
			let renewing = state.reservations.contains_key(&client);
			if !renewing && state.reservations.len() >= self.config.max_reservations {
				None
			} else {
				let expire_unix = unix_now() + self.config.reservation_ttl.as_secs();
				state.reservations.insert(
					client,
					ReservationRecord {
						expiration: Instant::now() + self.config.reservation_ttl,
						observed_addr,
					},
				);
				Some(expire_unix)
			}
		};

		match accepted {
			Some(expire_unix) => {
				log::debug!(target: "mesh-relay", "Accepted reservation from {client}");
				let reservation = crate::message::Reservation {
					expire: Some(expire_unix),
					addrs: self
						.swarm
						.listen_addresses()
						.iter()
						.map(|a| a.to_string().into_bytes())
						.collect(),
					voucher: None,
				};
				let reply = HopMessage {
					r#type: hop_message::Type::Status as i32,
					peer: None,
					reservation: Some(reservation),
					limit: self.config.limit.to_proto(),
					status: Some(Status::Ok as i32),
				};
				write_message(&mut stream, &reply).await?;
			},
			None => {
				log::debug!(
					target: "mesh-relay",
					"Refusing reservation from {client}, capacity reached",
				);
				write_message(
					&mut stream,
					&HopMessage::status_message(Status::ResourceLimitExceeded),
				)
				.await?;
			},
		}
		let _ = stream.close_write().await;
		Ok(())
	}

	async fn handle_connect(
		&self,
		source: PeerId,
		message: HopMessage,
		mut stream: BoxedStream,
	) -> Result<(), HandlerError> {
		let target = match message
			.peer
			.as_ref()
			.and_then(|peer| PeerId::from_bytes(&peer.id).ok())
		{
			Some(target) => target,
			None => {
				write_message(&mut stream, &HopMessage::status_message(Status::MalformedMessage))
					.await?;
				return Err(crate::RelayError::MalformedMessage.into())
			},
		};

		// Admission: reservation and circuit caps, atomically.
		enum Admission {
			Admitted,
			NoReservation,
			ResourceLimitExceeded,
		}
		let admission = {
			let mut state = self.state.lock();
			state.reap_expired();
			if !state.reservations.contains_key(&target) {
				Admission::NoReservation
			} else if state.circuits_of(source) >= self.config.max_circuits_per_peer ||
				state.circuits_of(target) >= self.config.max_circuits_per_peer
			{
				Admission::ResourceLimitExceeded
			} else {
				state.add_circuit(source);
				state.add_circuit(target);
				Admission::Admitted
			}
		};
		match admission {
			Admission::NoReservation => {
				log::debug!(
					target: "mesh-relay",
					"No reservation for {target}, refusing circuit from {source}",
				);
				write_message(&mut stream, &HopMessage::status_message(Status::NoReservation))
					.await?;
				return Ok(())
			},
			Admission::ResourceLimitExceeded => {
				write_message(
					&mut stream,
					&HopMessage::status_message(Status::ResourceLimitExceeded),
				)
				.await?;
				return Ok(())
			},
			Admission::Admitted => {},
		}

		let result = self.establish_circuit(source, target, &mut stream).await;
		match result {
			Ok(dst_stream) => {
				let limit = self.config.limit;
				log::debug!(
					target: "mesh-relay",
					"Relaying circuit {source} -> {target}",
				);
				let outcome = splice(stream, dst_stream, limit).await;
				{
					let mut state = self.state.lock();
					state.drop_circuit(source);
					state.drop_circuit(target);
				}
				match outcome {
					Ok(relayed) => log::debug!(
						target: "mesh-relay",
						"Circuit {source} -> {target} closed after {relayed} bytes",
					),
					Err(error) => log::debug!(
						target: "mesh-relay",
						"Circuit {source} -> {target} aborted: {error}",
					),
				}
				Ok(())
			},
			Err(status) => {
				{
					let mut state = self.state.lock();
					state.drop_circuit(source);
					state.drop_circuit(target);
				}
				write_message(&mut stream, &HopMessage::status_message(status)).await?;
				Ok(())
			},
		}
	}

	/// Opens the stop stream to the target and completes both handshakes.
	/// On success the source has received `STATUS OK` and both streams are
	/// ready for splicing.
	async fn establish_circuit(
		&self,
		source: PeerId,
		target: PeerId,
		src_stream: &mut BoxedStream,
	) -> Result<BoxedStream, Status> {
		let mut dst_stream = self
			.swarm
			.new_stream(target, STOP_PROTOCOL_ID)
			.await
			.map_err(|error| {
				log::debug!(
					target: "mesh-relay",
					"Opening stop stream to {target} failed: {error}",
				);
				Status::ConnectionFailed
			})?;

		let connect = StopMessage::connect(
			Peer { id: source.to_bytes(), addrs: Vec::new() },
			self.config.limit.to_proto(),
		);
		write_message(&mut dst_stream, &connect)
			.await
			.map_err(|_| Status::ConnectionFailed)?;
		let reply: StopMessage = read_message(&mut dst_stream)
			.await
			.map_err(|_| Status::ConnectionFailed)?;

		if reply.r#type != stop_message::Type::Status as i32 {
			return Err(Status::UnexpectedMessage)
		}
		match Status::from_wire(reply.status) {
			Status::Ok => {},
			// The target answered but refused; surface its code upstream.
			refused @ (Status::ResourceLimitExceeded | Status::PermissionDenied) =>
				return Err(refused),
			_ => return Err(Status::ConnectionFailed),
		}

		let reply = HopMessage {
			r#type: hop_message::Type::Status as i32,
			peer: None,
			reservation: None,
			limit: self.config.limit.to_proto(),
			status: Some(Status::Ok as i32),
		};
		write_message(src_stream, &reply).await.map_err(|_| Status::ConnectionFailed)?;
		Ok(dst_stream)
	}
}

/// Byte-for-byte forwarding in both directions.
///
/// A shared counter caps total relayed bytes; the optional duration limit
/// aborts the whole circuit. EOF in one direction half-closes the other
/// side, so a drained direction delivers EOF downstream while the reverse
/// path keeps flowing.
async fn splice(
	src: BoxedStream,
	dst: BoxedStream,
	limit: CircuitLimit,
) -> io::Result<u64> {
	let counter = Arc::new(AtomicU64::new(0));
	let (src_read, src_write) = src.split();
	let (dst_read, dst_write) = dst.split();

	let forward = future::try_join(
		copy_limited(src_read, dst_write, Arc::clone(&counter), limit.data),
		copy_limited(dst_read, src_write, Arc::clone(&counter), limit.data),
	);
	pin_mut!(forward);

	let result = match limit.duration {
		Some(duration) => {
			let deadline = Delay::new(duration);
			pin_mut!(deadline);
			match future::select(forward, deadline).await {
				Either::Left((result, _)) => result.map(|_| ()),
				Either::Right(((), _)) => Err(io::Error::new(
					io::ErrorKind::TimedOut,
					"circuit duration limit elapsed",
				)),
			}
		},
		None => forward.await.map(|_| ()),
	};
	result.map(|()| counter.load(Ordering::SeqCst))
}

async fn copy_limited<R, W>(
	mut reader: R,
	mut writer: W,
	counter: Arc<AtomicU64>,
	cap: Option<u64>,
) -> io::Result<()>
where
	R: futures::io::AsyncRead + Unpin,
	W: futures::io::AsyncWrite + Unpin,
{
	let mut buf = vec![0u8; 8192];
	loop {
		let n = reader.read(&mut buf).await?;
		if n == 0 {
			let _ = writer.close().await;
			return Ok(())
		}
		if let Some(cap) = cap {
			let total = counter.fetch_add(n as u64, Ordering::SeqCst) + n as u64;
			if total > cap {
				let _ = writer.close().await;
				return Err(io::Error::new(
					io::ErrorKind::Other,
					crate::RelayError::LimitExceeded,
				))
			}
		} else {
			counter.fetch_add(n as u64, Ordering::SeqCst);
		}
		writer.write_all(&buf[..n]).await?;
	}
}
