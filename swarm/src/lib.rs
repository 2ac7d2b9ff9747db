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

//! The swarm: connection lifecycle management for a mesh node.
//!
//! A [`Swarm`] owns the listeners, the connection pool and the upgrade
//! pipeline. It dials, accepts, upgrades, reconnects and trims connections
//! under per-peer and global budgets, dispatches negotiated inbound streams
//! to registered protocol handlers, and publishes everything that happens
//! as [`SwarmEvent`]s on a broadcast stream.

pub mod backoff;
pub mod config;
pub mod error;
pub mod event;
pub mod policy;
pub mod pool;
pub mod semaphore;
pub mod swarm;

pub use backoff::{BackoffConfig, DialBackoff};
pub use config::{PoolConfig, ReconnectionPolicy, SwarmConfig};
pub use error::{GateStage, SwarmError};
pub use event::{ConnectionEvent, EventStream, SwarmEvent};
pub use policy::{
	AllowAll, ConnectionGater, Direction, NullResourceManager, ResourceGuard, ResourceLimit,
	ResourceManager, ResourceScope,
};
pub use pool::{
	ConnectionId, ConnectionPool, ConnectionState, DialTask, DisconnectReason,
	ManagedConnection, TrimCandidate, TrimReport,
};
pub use swarm::{HandlerError, StreamHandler, Swarm};
