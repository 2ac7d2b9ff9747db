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

//! Core connection model of the mesh stack.
//!
//! This crate defines the pieces every node is built from:
//!
//! - [`Multiaddr`], the self-describing network address;
//! - the connection object model ([`connection`]): raw byte streams,
//!   authenticated streams, multiplexed connections and their substreams;
//! - the [`transport`] contract plus the in-process memory transport;
//! - [`multistream`], the protocol-id negotiation that runs once per layer;
//! - the [`upgrade`] pipeline driving raw → secured → muxed, without losing
//!   bytes read ahead at any layer boundary;
//! - the [`security`] and [`muxing`] upgrade contracts, with in-tree
//!   reference implementations (`plaintext`, `plex`) used by tests and
//!   local meshes.

pub mod connection;
pub mod multiaddr;
pub mod multistream;
pub mod muxing;
pub mod security;
pub mod transport;
pub mod upgrade;

pub use connection::{
	BoxedRaw, BoxedStream, MuxedConnection, MuxedStream, RawConnection, StreamContext,
};
pub use multiaddr::{Multiaddr, MultiaddrError, Protocol};
pub use multistream::{Negotiated, NegotiationError, Remainder};
pub use muxing::Muxer;
pub use security::{Role, SecuredConnection, SecurityError, SecurityUpgrader};
pub use transport::{Listener, PathKind, SecuredListener, Transport};
pub use upgrade::{Upgraded, UpgradeError, Upgrader};

pub use mesh_identity::{Keypair, PeerId, PublicKey};
