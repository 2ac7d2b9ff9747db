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

use sha2::{Digest as _, Sha256};
use std::str::FromStr;

use crate::PublicKey;

/// Multihash code for sha2-256.
const MULTIHASH_SHA2_256: u8 = 0x12;
/// Digest length of sha2-256.
const DIGEST_LEN: u8 = 32;

/// The identity of a peer, stable across connections and transports.
///
/// Encoded as the sha2-256 multihash of the node's public key:
/// `0x12 0x20 <32-byte digest>`. The textual form is base58btc of those
/// bytes. `Ord` compares the raw multihash bytes; both endpoints of a
/// connection derive the same order, which the swarm relies on for
/// simultaneous-connect resolution.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId {
	bytes: [u8; 34],
}

/// Error parsing a [`PeerId`] from text or bytes.
#[derive(Debug, thiserror::Error)]
pub enum ParsePeerIdError {
	#[error("invalid base58: {0}")]
	Base58(#[from] bs58::decode::Error),
	#[error("not a sha2-256 multihash")]
	UnsupportedMultihash,
	#[error("wrong length for a peer id")]
	BadLength,
}

impl PeerId {
	/// Derives the identifier of `key`.
	pub fn from_public_key(key: &PublicKey) -> Self {
		let digest = Sha256::digest(key.to_bytes());
		let mut bytes = [0u8; 34];
		bytes[0] = MULTIHASH_SHA2_256;
		bytes[1] = DIGEST_LEN;
		bytes[2..].copy_from_slice(&digest);
		PeerId { bytes }
	}

	/// Parses a peer id from its multihash bytes.
	pub fn from_bytes(bytes: &[u8]) -> Result<Self, ParsePeerIdError> {
		if bytes.len() != 34 {
			return Err(ParsePeerIdError::BadLength)
		}
		if bytes[0] != MULTIHASH_SHA2_256 || bytes[1] != DIGEST_LEN {
			return Err(ParsePeerIdError::UnsupportedMultihash)
		}
		let mut out = [0u8; 34];
		out.copy_from_slice(bytes);
		Ok(PeerId { bytes: out })
	}

	/// The multihash bytes of this peer id.
	pub fn to_bytes(&self) -> Vec<u8> {
		self.bytes.to_vec()
	}

	/// The multihash bytes of this peer id, borrowed.
	pub fn as_bytes(&self) -> &[u8] {
		&self.bytes
	}

	/// A peer id from raw digest material, for tests that need a stable
	/// identity without key generation.
	pub fn from_digest(digest: [u8; 32]) -> Self {
		let mut bytes = [0u8; 34];
		bytes[0] = MULTIHASH_SHA2_256;
		bytes[1] = DIGEST_LEN;
		bytes[2..].copy_from_slice(&digest);
		PeerId { bytes }
	}
}

impl std::fmt::Display for PeerId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&bs58::encode(self.bytes).into_string())
	}
}

impl std::fmt::Debug for PeerId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "PeerId({self})")
	}
}

impl FromStr for PeerId {
	type Err = ParsePeerIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let bytes = bs58::decode(s).into_vec()?;
		PeerId::from_bytes(&bytes)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::Keypair;
	use quickcheck::quickcheck;

	#[test]
	fn text_roundtrip() {
		let id = Keypair::generate().peer_id();
		let parsed: PeerId = id.to_string().parse().unwrap();
		assert_eq!(id, parsed);
	}

	#[test]
	fn bytes_roundtrip() {
		let id = Keypair::generate().peer_id();
		assert_eq!(id, PeerId::from_bytes(&id.to_bytes()).unwrap());
	}

	#[test]
	fn rejects_foreign_multihash() {
		let mut bytes = Keypair::generate().peer_id().to_bytes();
		bytes[0] = 0x11;
		assert!(matches!(
			PeerId::from_bytes(&bytes),
			Err(ParsePeerIdError::UnsupportedMultihash)
		));
	}

	quickcheck! {
		fn order_is_total_and_symmetric(a: u64, b: u64) -> bool {
			let digest = |seed: u64| {
				let mut d = [0u8; 32];
				d[..8].copy_from_slice(&seed.to_be_bytes());
				PeerId::from_digest(d)
			};
			let (a, b) = (digest(a), digest(b));
			// Both sides must agree on a single winner.
			(a < b) ^ (b < a) || a == b
		}
	}
}
