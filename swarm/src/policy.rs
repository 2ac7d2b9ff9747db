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

//! Policy hooks consulted by the swarm: connection gating and resource
//! accounting.
//!
//! Both contracts are synchronous; they are called from hot paths and must
//! not block. Resource reservations are paired with releases through
//! [`ResourceGuard`], so no exit path can leak one.

use std::sync::Arc;

use mesh_core::Multiaddr;
use mesh_identity::PeerId;

/// Direction of a connection or stream, from the local point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
	Inbound,
	Outbound,
}

/// What kind of resource a reservation covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceScope {
	Connection,
	Stream,
}

/// Synchronous predicate callbacks applied at the dial/accept/secured
/// stages. Returning `false` rejects the connection.
pub trait ConnectionGater: Send + Sync {
	/// Consulted before dialing. The peer is known only when the address
	/// embeds one.
	fn intercept_dial(&self, _peer: Option<PeerId>, _addr: &Multiaddr) -> bool {
		true
	}

	/// Consulted when a raw inbound connection is accepted.
	fn intercept_accept(&self, _addr: &Multiaddr) -> bool {
		true
	}

	/// Consulted after the handshake authenticated the remote.
	fn intercept_secured(&self, _peer: PeerId, _direction: Direction) -> bool {
		true
	}
}

/// The default gater: allows everything.
#[derive(Debug, Default, Clone)]
pub struct AllowAll;

impl ConnectionGater for AllowAll {}

/// Failed reservation, reported by a [`ResourceManager`].
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimit {
	pub scope: ResourceScope,
	pub direction: Direction,
}

/// Accountant of per-peer and global connection/stream budgets.
pub trait ResourceManager: Send + Sync {
	fn reserve_connection(
		&self,
		peer: PeerId,
		direction: Direction,
	) -> Result<(), ResourceLimit>;

	fn reserve_stream(&self, peer: PeerId, direction: Direction) -> Result<(), ResourceLimit>;

	fn release_connection(&self, peer: PeerId, direction: Direction);

	fn release_stream(&self, peer: PeerId, direction: Direction);
}

/// A resource manager with unlimited budgets.
#[derive(Debug, Default, Clone)]
pub struct NullResourceManager;

impl ResourceManager for NullResourceManager {
	fn reserve_connection(&self, _: PeerId, _: Direction) -> Result<(), ResourceLimit> {
		Ok(())
	}

	fn reserve_stream(&self, _: PeerId, _: Direction) -> Result<(), ResourceLimit> {
		Ok(())
	}

	fn release_connection(&self, _: PeerId, _: Direction) {}

	fn release_stream(&self, _: PeerId, _: Direction) {}
}

/// Scoped reservation: releases on drop unless [`disarm`](Self::disarm)ed.
///
/// Every reservation the swarm takes travels inside one of these, so early
/// returns and error paths release automatically.
pub struct ResourceGuard {
	manager: Arc<dyn ResourceManager>,
	peer: PeerId,
	direction: Direction,
	scope: ResourceScope,
	armed: bool,
}

impl ResourceGuard {
	/// Reserves a connection slot, returning an armed guard.
	pub fn connection(
		manager: Arc<dyn ResourceManager>,
		peer: PeerId,
		direction: Direction,
	) -> Result<Self, ResourceLimit> {
		manager.reserve_connection(peer, direction)?;
		Ok(ResourceGuard { manager, peer, direction, scope: ResourceScope::Connection, armed: true })
	}

	/// Reserves a stream slot, returning an armed guard.
	pub fn stream(
		manager: Arc<dyn ResourceManager>,
		peer: PeerId,
		direction: Direction,
	) -> Result<Self, ResourceLimit> {
		manager.reserve_stream(peer, direction)?;
		Ok(ResourceGuard { manager, peer, direction, scope: ResourceScope::Stream, armed: true })
	}

	/// Keeps the reservation alive past this guard's lifetime. The caller
	/// takes over the release obligation.
	pub fn disarm(mut self) {
		self.armed = false;
	}
}

impl Drop for ResourceGuard {
	fn drop(&mut self) {
		if self.armed {
			match self.scope {
				ResourceScope::Connection =>
					self.manager.release_connection(self.peer, self.direction),
				ResourceScope::Stream => self.manager.release_stream(self.peer, self.direction),
			}
		}
	}
}

impl std::fmt::Debug for ResourceGuard {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ResourceGuard")
			.field("peer", &self.peer)
			.field("direction", &self.direction)
			.field("scope", &self.scope)
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use parking_lot::Mutex;

	#[derive(Default)]
	struct Counting {
		connections: Mutex<i32>,
		streams: Mutex<i32>,
	}

	impl ResourceManager for Counting {
		fn reserve_connection(&self, _: PeerId, _: Direction) -> Result<(), ResourceLimit> {
			*self.connections.lock() += 1;
			Ok(())
		}

		fn reserve_stream(&self, _: PeerId, _: Direction) -> Result<(), ResourceLimit> {
			*self.streams.lock() += 1;
			Ok(())
		}

		fn release_connection(&self, _: PeerId, _: Direction) {
			*self.connections.lock() -= 1;
		}

		fn release_stream(&self, _: PeerId, _: Direction) {
			*self.streams.lock() -= 1;
		}
	}

	#[test]
	fn guard_releases_on_drop() {
		let manager = Arc::new(Counting::default());
		let peer = mesh_identity::Keypair::generate().peer_id();
		{
			let _guard =
				ResourceGuard::connection(manager.clone(), peer, Direction::Outbound).unwrap();
			assert_eq!(*manager.connections.lock(), 1);
		}
		assert_eq!(*manager.connections.lock(), 0);
	}

	#[test]
	fn disarmed_guard_keeps_reservation() {
		let manager = Arc::new(Counting::default());
		let peer = mesh_identity::Keypair::generate().peer_id();
		let guard = ResourceGuard::stream(manager.clone(), peer, Direction::Inbound).unwrap();
		guard.disarm();
		assert_eq!(*manager.streams.lock(), 1);
	}
}
