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

//! Node identity: ed25519 key pairs and the peer identifiers derived from
//! them.
//!
//! A [`PeerId`] is the sha2-256 multihash of the node's public key. Its byte
//! representation defines a total order which the connection layer uses as a
//! deterministic tiebreaker, so both sides of a connection agree on it
//! without further coordination.

mod keypair;
mod peer_id;

pub use keypair::{Keypair, PublicKey, Signature, SigningError};
pub use peer_id::{ParsePeerIdError, PeerId};
