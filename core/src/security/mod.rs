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

//! The security-upgrader contract.
//!
//! A security upgrader runs an authentication handshake over a raw stream
//! and yields the same stream plus the peer identities proven by the
//! handshake. Some handshakes can piggyback the muxer selection; such
//! upgraders advertise it through [`SecurityUpgrader::supports_early_muxer`]
//! and the pipeline then skips the second multistream-select round.

pub mod plaintext;

use async_trait::async_trait;
use std::io;

use crate::connection::BoxedRaw;
use mesh_identity::{Keypair, PeerId};

/// Which side of the handshake this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
	Initiator,
	Responder,
}

impl Role {
	pub fn is_initiator(&self) -> bool {
		matches!(self, Role::Initiator)
	}
}

/// A raw stream whose endpoints have proven their identities.
pub struct SecuredConnection {
	/// The byte stream; encrypted or not is the upgrader's business.
	pub io: BoxedRaw,
	pub local_peer: PeerId,
	pub remote_peer: PeerId,
}

/// Errors of the authentication handshake.
#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
	#[error("handshake proved {actual} but {expected} was expected")]
	PeerMismatch { expected: PeerId, actual: PeerId },
	#[error("malformed handshake message")]
	MalformedHandshake,
	#[error(transparent)]
	Io(#[from] io::Error),
}

/// An authentication handshake over a raw stream.
#[async_trait]
pub trait SecurityUpgrader: Send + Sync {
	/// The protocol id negotiated for this upgrader.
	fn protocol_id(&self) -> &str;

	/// Whether [`secure_with_early_muxer`](Self::secure_with_early_muxer)
	/// actually negotiates a muxer during the handshake.
	fn supports_early_muxer(&self) -> bool {
		false
	}

	/// Runs the handshake. `expected_peer` is enforced when known (outbound
	/// dials embed it in the address).
	async fn secure(
		&self,
		io: BoxedRaw,
		keypair: &Keypair,
		role: Role,
		expected_peer: Option<PeerId>,
	) -> Result<SecuredConnection, SecurityError>;

	/// Runs the handshake and, if the mechanism supports it, negotiates one
	/// of `muxer_protocols` inside it. The default falls back to a plain
	/// handshake and leaves muxer selection to the pipeline.
	async fn secure_with_early_muxer(
		&self,
		io: BoxedRaw,
		keypair: &Keypair,
		role: Role,
		expected_peer: Option<PeerId>,
		_muxer_protocols: &[String],
	) -> Result<(SecuredConnection, Option<String>), SecurityError> {
		let secured = self.secure(io, keypair, role, expected_peer).await?;
		Ok((secured, None))
	}
}
