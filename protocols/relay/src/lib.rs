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

//! Circuit relay v2.
//!
//! Lets a node behind NAT reserve a slot on a public relay
//! ([`RelayClient::reserve`]), receive connections through it (the stop
//! handler plus a per-relay [`RelayListener`]), and dial such a node
//! through its relay ([`RelayClient::connect_through`]). The
//! [`RelayServer`] side accepts reservations and splices circuits between
//! peers under byte and duration limits.
//!
//! Protocol ids: [`HOP_PROTOCOL_ID`] (client ↔ relay) and
//! [`STOP_PROTOCOL_ID`] (relay ↔ target).

pub mod client;
pub mod codec;
pub mod connection;
pub mod listener;
pub mod message;
pub mod server;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use mesh_core::Multiaddr;
use mesh_identity::PeerId;

pub use client::{RelayClient, RelayClientConfig, RelayTransport};
pub use connection::RelayedConnection;
pub use listener::RelayListener;
pub use message::Status;
pub use server::{RelayServer, RelayServerConfig};

/// Protocol id of the hop (client-to-relay) protocol.
pub const HOP_PROTOCOL_ID: &str = "/libp2p/circuit/relay/0.2.0/hop";
/// Protocol id of the stop (relay-to-target) protocol.
pub const STOP_PROTOCOL_ID: &str = "/libp2p/circuit/relay/0.2.0/stop";

/// Failure modes of the relay client and server.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
	#[error("relay refused reservation with status {0:?}")]
	ReservationFailed(Status),
	#[error("relay refused circuit with status {0:?}")]
	ConnectionFailed(Status),
	#[error("circuit byte limit exceeded")]
	LimitExceeded,
	#[error("relay listener closed")]
	ListenerClosed,
	#[error("malformed relay message")]
	MalformedMessage,
	#[error("unexpected relay message")]
	UnexpectedMessage,
	#[error(transparent)]
	Swarm(#[from] mesh_swarm::SwarmError),
	#[error(transparent)]
	Io(#[from] std::io::Error),
}

/// Byte and duration budget of one circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CircuitLimit {
	/// Wall-clock lifetime of the circuit.
	pub duration: Option<Duration>,
	/// Total bytes relayed, both directions combined.
	pub data: Option<u64>,
}

impl CircuitLimit {
	/// The limits a relay applies when nothing else is configured.
	pub fn standard() -> Self {
		CircuitLimit { duration: Some(Duration::from_secs(120)), data: Some(1 << 17) }
	}

	/// Fills unset fields from `fallback`.
	pub fn or(self, fallback: CircuitLimit) -> CircuitLimit {
		CircuitLimit {
			duration: self.duration.or(fallback.duration),
			data: self.data.or(fallback.data),
		}
	}

	pub(crate) fn to_proto(self) -> Option<message::Limit> {
		if self.duration.is_none() && self.data.is_none() {
			return None
		}
		Some(message::Limit {
			duration: self.duration.map(|d| d.as_secs() as u32),
			data: self.data,
		})
	}

	pub(crate) fn from_proto(limit: Option<&message::Limit>) -> CircuitLimit {
		match limit {
			Some(limit) => CircuitLimit {
				duration: limit.duration.map(|secs| Duration::from_secs(secs.into())),
				data: limit.data,
			},
			None => CircuitLimit::default(),
		}
	}
}

/// A client-side record of a slot held on a relay.
#[derive(Debug, Clone)]
pub struct Reservation {
	pub relay: PeerId,
	/// Absolute expiry; renew by re-reserving before it passes.
	pub expiration: SystemTime,
	/// Addresses the relay advertises for reaching us.
	pub addresses: Vec<Multiaddr>,
	pub voucher: Option<Vec<u8>>,
}

impl Reservation {
	pub fn is_valid(&self) -> bool {
		SystemTime::now() < self.expiration
	}
}

pub(crate) fn unix_now() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or_default()
		.as_secs()
}

pub(crate) fn system_time_from_unix(secs: u64) -> SystemTime {
	UNIX_EPOCH + Duration::from_secs(secs)
}
