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

//! Swarm configuration.

use std::{sync::Arc, time::Duration};

use crate::{
	backoff::BackoffConfig,
	policy::{AllowAll, ConnectionGater, NullResourceManager, ResourceManager},
	pool::DisconnectReason,
};
use mesh_core::Multiaddr;

/// When and how often to re-dial a peer whose connection dropped.
#[derive(Clone)]
pub enum ReconnectionPolicy {
	/// Never reconnect automatically.
	Never,
	/// Reconnect up to `max_retries` times per outage.
	Always { max_retries: u32 },
	/// Caller-supplied predicate over `(attempt, disconnect reason)`.
	Custom(Arc<dyn Fn(u32, &DisconnectReason) -> bool + Send + Sync>),
}

impl ReconnectionPolicy {
	/// Whether attempt number `attempt` (1-based) may run.
	pub fn allows(&self, attempt: u32, reason: &DisconnectReason) -> bool {
		match self {
			ReconnectionPolicy::Never => false,
			ReconnectionPolicy::Always { max_retries } => attempt <= *max_retries,
			ReconnectionPolicy::Custom(f) => f(attempt, reason),
		}
	}

	pub fn is_never(&self) -> bool {
		matches!(self, ReconnectionPolicy::Never)
	}
}

impl std::fmt::Debug for ReconnectionPolicy {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ReconnectionPolicy::Never => write!(f, "Never"),
			ReconnectionPolicy::Always { max_retries } =>
				write!(f, "Always {{ max_retries: {max_retries} }}"),
			ReconnectionPolicy::Custom(_) => write!(f, "Custom(..)"),
		}
	}
}

/// Budgets and policies of the connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
	pub max_inbound_connections: usize,
	pub max_outbound_connections: usize,
	pub max_connections_per_peer: usize,
	/// Connections idle longer than this are closed; zero disables the
	/// idle checker entirely.
	pub idle_timeout: Duration,
	/// Watermark for voluntary trimming: when the number of connected
	/// entries exceeds it, the overflow is shed by trim rank. `None`
	/// disables trimming.
	pub trim_watermark: Option<usize>,
	pub reconnection: ReconnectionPolicy,
	/// A connection outliving this is considered stable and gets its retry
	/// counter reset on disconnect.
	pub stability_threshold: Duration,
}

impl Default for PoolConfig {
	fn default() -> Self {
		PoolConfig {
			max_inbound_connections: 64,
			max_outbound_connections: 64,
			max_connections_per_peer: 2,
			idle_timeout: Duration::from_secs(60),
			trim_watermark: None,
			reconnection: ReconnectionPolicy::Always { max_retries: 3 },
			stability_threshold: Duration::from_secs(30),
		}
	}
}

/// Everything a [`Swarm`](crate::Swarm) is built with.
#[derive(Clone)]
pub struct SwarmConfig {
	/// Addresses to bind at startup.
	pub listen_addresses: Vec<Multiaddr>,
	pub pool: PoolConfig,
	pub backoff: BackoffConfig,
	/// Cap on concurrently negotiating inbound streams, swarm-wide.
	pub max_negotiating_inbound_streams: usize,
	pub gater: Arc<dyn ConnectionGater>,
	pub resource_manager: Arc<dyn ResourceManager>,
	/// Per-subscriber event buffer; overflow drops the oldest event.
	pub event_buffer: usize,
}

impl Default for SwarmConfig {
	fn default() -> Self {
		SwarmConfig {
			listen_addresses: Vec::new(),
			pool: PoolConfig::default(),
			backoff: BackoffConfig::default(),
			max_negotiating_inbound_streams: 128,
			gater: Arc::new(AllowAll),
			resource_manager: Arc::new(NullResourceManager),
			event_buffer: 256,
		}
	}
}

impl std::fmt::Debug for SwarmConfig {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SwarmConfig")
			.field("listen_addresses", &self.listen_addresses)
			.field("pool", &self.pool)
			.field("backoff", &self.backoff)
			.field("max_negotiating_inbound_streams", &self.max_negotiating_inbound_streams)
			.field("event_buffer", &self.event_buffer)
			.finish_non_exhaustive()
	}
}
