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

use ed25519_dalek::{Signer as _, Verifier as _};
use zeroize::Zeroize;

use crate::PeerId;

/// An ed25519 key pair identifying a local node.
///
/// The secret half is zeroized on drop.
#[derive(Clone)]
pub struct Keypair {
	secret: ed25519_dalek::SigningKey,
}

/// The public half of a [`Keypair`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
	key: ed25519_dalek::VerifyingKey,
}

/// A detached ed25519 signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

/// Error signing or verifying with a key of the wrong shape.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
	#[error("malformed ed25519 public key")]
	MalformedPublicKey,
	#[error("signature verification failed")]
	BadSignature,
}

impl Keypair {
	/// Generates a fresh random key pair from the OS entropy source.
	pub fn generate() -> Self {
		Keypair { secret: ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng) }
	}

	/// Builds a key pair from 32 secret bytes. The input buffer is zeroized.
	pub fn from_secret_bytes(mut bytes: [u8; 32]) -> Self {
		let secret = ed25519_dalek::SigningKey::from_bytes(&bytes);
		bytes.zeroize();
		Keypair { secret }
	}

	/// The public half of this key pair.
	pub fn public(&self) -> PublicKey {
		PublicKey { key: self.secret.verifying_key() }
	}

	/// The peer identifier derived from the public key.
	pub fn peer_id(&self) -> PeerId {
		self.public().to_peer_id()
	}

	/// Signs a message with the secret key.
	pub fn sign(&self, msg: &[u8]) -> Signature {
		Signature(self.secret.sign(msg).to_bytes())
	}
}

impl std::fmt::Debug for Keypair {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Keypair").field("peer_id", &self.peer_id()).finish_non_exhaustive()
	}
}

impl PublicKey {
	/// Decodes a public key from its 32-byte encoding.
	pub fn from_bytes(bytes: &[u8]) -> Result<Self, SigningError> {
		let bytes: [u8; 32] =
			bytes.try_into().map_err(|_| SigningError::MalformedPublicKey)?;
		let key = ed25519_dalek::VerifyingKey::from_bytes(&bytes)
			.map_err(|_| SigningError::MalformedPublicKey)?;
		Ok(PublicKey { key })
	}

	/// The 32-byte encoding of this key.
	pub fn to_bytes(&self) -> [u8; 32] {
		self.key.to_bytes()
	}

	/// Verifies `sig` over `msg`.
	pub fn verify(&self, msg: &[u8], sig: &Signature) -> Result<(), SigningError> {
		let sig = ed25519_dalek::Signature::from_bytes(&sig.0);
		self.key.verify(msg, &sig).map_err(|_| SigningError::BadSignature)
	}

	/// Derives the peer identifier for this key.
	pub fn to_peer_id(&self) -> PeerId {
		PeerId::from_public_key(self)
	}
}

impl std::fmt::Debug for PublicKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "PublicKey({})", self.to_peer_id())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sign_and_verify() {
		let keypair = Keypair::generate();
		let sig = keypair.sign(b"hello mesh");
		assert!(keypair.public().verify(b"hello mesh", &sig).is_ok());
		assert!(matches!(
			keypair.public().verify(b"hello mash", &sig),
			Err(SigningError::BadSignature)
		));
	}

	#[test]
	fn deterministic_peer_id() {
		let keypair = Keypair::from_secret_bytes([7u8; 32]);
		let again = Keypair::from_secret_bytes([7u8; 32]);
		assert_eq!(keypair.peer_id(), again.peer_id());
		assert_ne!(keypair.peer_id(), Keypair::generate().peer_id());
	}

	#[test]
	fn public_key_roundtrip() {
		let public = Keypair::generate().public();
		let decoded = PublicKey::from_bytes(&public.to_bytes()).unwrap();
		assert_eq!(public, decoded);
	}

	#[test]
	fn rejects_truncated_public_key() {
		assert!(matches!(
			PublicKey::from_bytes(&[1, 2, 3]),
			Err(SigningError::MalformedPublicKey)
		));
	}
}
