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

//! Plaintext "security": a public-key exchange with no encryption.
//!
//! Each side sends its length-prefixed public key, derives the remote
//! peer id from the received key and checks it against the expected peer.
//! Useful for tests and trusted local meshes; anything crossing a real
//! network should negotiate an encrypting upgrader instead.

use async_trait::async_trait;
use futures::io::{AsyncReadExt as _, AsyncWriteExt as _};

use super::{Role, SecuredConnection, SecurityError, SecurityUpgrader};
use crate::connection::BoxedRaw;
use mesh_identity::{Keypair, PeerId, PublicKey};

/// Protocol id of the plaintext exchange.
pub const PROTOCOL_ID: &str = "/plaintext/2.0.0";

/// The plaintext security upgrader.
#[derive(Debug, Default, Clone)]
pub struct PlaintextUpgrader;

#[async_trait]
impl SecurityUpgrader for PlaintextUpgrader {
	fn protocol_id(&self) -> &str {
		PROTOCOL_ID
	}

	async fn secure(
		&self,
		mut io: BoxedRaw,
		keypair: &Keypair,
		_role: Role,
		expected_peer: Option<PeerId>,
	) -> Result<SecuredConnection, SecurityError> {
		// Both sides write first; the exchange is symmetric.
		let local_key = keypair.public().to_bytes();
		io.write_all(&[local_key.len() as u8]).await?;
		io.write_all(&local_key).await?;
		io.flush().await?;

		let mut len = [0u8; 1];
		io.read_exact(&mut len).await?;
		if len[0] as usize != local_key.len() {
			return Err(SecurityError::MalformedHandshake)
		}
		let mut remote_key = vec![0u8; len[0] as usize];
		io.read_exact(&mut remote_key).await?;

		let remote_key =
			PublicKey::from_bytes(&remote_key).map_err(|_| SecurityError::MalformedHandshake)?;
		let remote_peer = remote_key.to_peer_id();

		if let Some(expected) = expected_peer {
			if expected != remote_peer {
				return Err(SecurityError::PeerMismatch { expected, actual: remote_peer })
			}
		}

		log::trace!(target: "mesh-core", "Plaintext handshake completed with {remote_peer}");
		Ok(SecuredConnection { io, local_peer: keypair.peer_id(), remote_peer })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::memory::MemorySocket;

	fn pair() -> (BoxedRaw, BoxedRaw) {
		let (a, b) =
			MemorySocket::pair("/memory/1".parse().unwrap(), "/memory/2".parse().unwrap());
		(Box::new(a), Box::new(b))
	}

	#[async_std::test]
	async fn exchanges_and_authenticates() {
		let (a_io, b_io) = pair();
		let (a_key, b_key) = (Keypair::generate(), Keypair::generate());
		let (a_peer, b_peer) = (a_key.peer_id(), b_key.peer_id());

		let b_task = async_std::task::spawn(async move {
			PlaintextUpgrader
				.secure(b_io, &b_key, Role::Responder, None)
				.await
				.unwrap()
		});
		let a_secured = PlaintextUpgrader
			.secure(a_io, &a_key, Role::Initiator, Some(b_peer))
			.await
			.unwrap();
		let b_secured = b_task.await;

		assert_eq!(a_secured.remote_peer, b_peer);
		assert_eq!(b_secured.remote_peer, a_peer);
	}

	#[async_std::test]
	async fn rejects_unexpected_peer() {
		let (a_io, b_io) = pair();
		let (a_key, b_key) = (Keypair::generate(), Keypair::generate());
		let intruder = Keypair::generate().peer_id();

		let b_task = async_std::task::spawn(async move {
			PlaintextUpgrader.secure(b_io, &b_key, Role::Responder, None).await
		});
		let err = PlaintextUpgrader
			.secure(a_io, &a_key, Role::Initiator, Some(intruder))
			.await
			.err()
			.unwrap();
		assert!(matches!(err, SecurityError::PeerMismatch { .. }));
		// The responder side may or may not complete depending on scheduling.
		let _ = b_task.await;
	}
}
