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

//! The transport contract.
//!
//! A transport turns multiaddrs into byte streams. Most transports produce
//! raw streams that the swarm then upgrades; secured-integrated transports
//! (QUIC-style) hand back already-authenticated, already-muxed connections
//! and skip the upgrade pipeline entirely.

pub mod memory;

use async_trait::async_trait;
use std::io;

use crate::{
	connection::{BoxedRaw, MuxedConnection},
	multiaddr::Multiaddr,
};
use mesh_identity::Keypair;

/// How traffic over a transport reaches the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
	/// Socket straight to the remote.
	Direct,
	/// Traffic crosses a relay circuit.
	Relay,
	/// In-process only.
	Local,
}

/// A way of dialing and listening on some class of multiaddrs.
#[async_trait]
pub trait Transport: Send + Sync {
	/// Whether this transport can dial `addr`.
	fn can_dial(&self, addr: &Multiaddr) -> bool;

	/// Whether this transport can bind `addr`.
	fn can_listen(&self, addr: &Multiaddr) -> bool;

	/// The protocol component stacks this transport understands,
	/// e.g. `[["ip4", "tcp"]]`.
	fn protocols(&self) -> Vec<Vec<&'static str>>;

	/// The kind of path connections over this transport take.
	fn path_kind(&self) -> PathKind;

	/// Whether this transport produces already-secured, already-muxed
	/// connections ([`dial_secured`](Self::dial_secured) /
	/// [`listen_secured`](Self::listen_secured)) instead of raw streams.
	fn is_secured(&self) -> bool {
		false
	}

	/// Opens a raw outbound connection.
	async fn dial(&self, addr: &Multiaddr) -> io::Result<BoxedRaw>;

	/// Binds a listener producing raw inbound connections.
	async fn listen(&self, addr: &Multiaddr) -> io::Result<Box<dyn Listener>>;

	/// Opens a secured, multiplexed outbound connection directly.
	async fn dial_secured(
		&self,
		_addr: &Multiaddr,
		_keypair: &Keypair,
	) -> io::Result<Box<dyn MuxedConnection>> {
		Err(io::Error::new(io::ErrorKind::Unsupported, "transport is not secured-integrated"))
	}

	/// Binds a listener producing secured, multiplexed connections.
	async fn listen_secured(
		&self,
		_addr: &Multiaddr,
		_keypair: &Keypair,
	) -> io::Result<Box<dyn SecuredListener>> {
		Err(io::Error::new(io::ErrorKind::Unsupported, "transport is not secured-integrated"))
	}
}

/// A bound listener yielding raw inbound connections.
#[async_trait]
pub trait Listener: Send + Sync {
	/// Waits for the next inbound connection.
	async fn accept(&self) -> io::Result<BoxedRaw>;

	/// The address the listener is actually bound to.
	fn local_addr(&self) -> Multiaddr;

	/// Stops accepting. Pending and future `accept` calls fail.
	async fn close(&self) -> io::Result<()>;
}

/// A bound listener of a secured-integrated transport.
#[async_trait]
pub trait SecuredListener: Send + Sync {
	/// Waits for the next secured, multiplexed inbound connection.
	async fn accept(&self) -> io::Result<Box<dyn MuxedConnection>>;

	fn local_addr(&self) -> Multiaddr;

	async fn close(&self) -> io::Result<()>;
}
