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

use std::{sync::Arc, time::Instant};

use crate::policy::{Direction, ResourceScope};
use mesh_core::{Multiaddr, UpgradeError};
use mesh_identity::PeerId;

/// The policy stage at which a connection was gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStage {
	Dial,
	Accept,
	Secured,
}

/// Errors surfaced by user-invoked swarm operations.
///
/// Background loops never raise these to the caller; they log, emit the
/// corresponding [`SwarmEvent`](crate::SwarmEvent) and carry on.
#[derive(Debug, thiserror::Error)]
pub enum SwarmError {
	#[error("refusing to dial own peer id")]
	SelfDialNotAllowed,
	#[error("connection limit reached")]
	ConnectionLimitReached,
	#[error("connection gated at {0:?} stage")]
	ConnectionGated(GateStage),
	#[error("resource limit exceeded ({scope:?}/{direction:?})")]
	ResourceLimitExceeded { scope: ResourceScope, direction: Direction },
	#[error("not connected to {0}")]
	NotConnected(PeerId),
	#[error("protocol negotiation failed")]
	ProtocolNegotiationFailed,
	#[error("no transport can dial {0}")]
	NoSuitableTransport(Multiaddr),
	#[error("no configured listen address could be bound")]
	NoListenersBound,
	#[error("node is not running")]
	NodeNotRunning,
	#[error("dial backoff active until {until:?}")]
	DialBackoffActive { until: Instant },
	#[error("pending dial was cancelled")]
	PendingDialCancelled,
	#[error("handshake reported {actual}, expected {expected}")]
	PeerMismatch { expected: PeerId, actual: PeerId },
	#[error(transparent)]
	Upgrade(#[from] UpgradeError),
	#[error("transport error: {0}")]
	Transport(#[from] std::io::Error),
	#[error(transparent)]
	Joined(Arc<SwarmError>),
}

impl SwarmError {
	/// Peels `Joined` wrappers off errors that travelled through a shared
	/// pending-dial, exposing the original failure.
	pub fn root(&self) -> &SwarmError {
		match self {
			SwarmError::Joined(inner) => inner.root(),
			other => other,
		}
	}

	/// Whether the failure happened during protocol negotiation rather than
	/// raw transport I/O. Reconnection policies treat the two differently.
	pub fn is_negotiation_error(&self) -> bool {
		matches!(
			self,
			SwarmError::Upgrade(_) | SwarmError::ProtocolNegotiationFailed |
				SwarmError::PeerMismatch { .. }
		)
	}
}
