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

//! Per-relay queue of inbound circuit connections.
//!
//! The relay client's stop handler enqueues; whoever accepts on the
//! listener dequeues. The queue is bounded; an over-cap enqueue drops the
//! oldest pending connection. Closing is immediate: pending acceptors fail
//! with [`RelayError::ListenerClosed`] no matter what timeouts the
//! underlying transport carries.

use async_std::channel;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{connection::RelayedConnection, RelayError};
use mesh_identity::PeerId;

/// Default queue depth of a relay listener.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Queue of circuit connections delivered through one relay.
pub struct RelayListener {
	relay: PeerId,
	tx: channel::Sender<RelayedConnection>,
	rx: channel::Receiver<RelayedConnection>,
	closed: AtomicBool,
}

impl RelayListener {
	pub(crate) fn new(relay: PeerId, capacity: usize) -> Self {
		let (tx, rx) = channel::bounded(capacity.max(1));
		RelayListener { relay, tx, rx, closed: AtomicBool::new(false) }
	}

	/// The relay this listener receives circuits through.
	pub fn relay(&self) -> PeerId {
		self.relay
	}

	/// The next circuit connection. Suspends until one arrives; concurrent
	/// accepts are served in order. Fails once the listener closes.
	/// Cancelling a pending accept leaves the listener reusable.
	pub async fn accept(&self) -> Result<RelayedConnection, RelayError> {
		self.rx.recv().await.map_err(|_| RelayError::ListenerClosed)
	}

	/// Queues a connection delivered by the stop handler.
	pub(crate) fn enqueue(&self, connection: RelayedConnection) -> Result<(), RelayError> {
		if self.closed.load(Ordering::SeqCst) {
			return Err(RelayError::ListenerClosed)
		}
		match self.tx.try_send(connection) {
			Ok(()) => Ok(()),
			Err(channel::TrySendError::Full(connection)) => {
				// Over cap: shed the oldest pending circuit.
				let dropped = self.rx.try_recv().is_ok();
				if dropped {
					log::warn!(
						target: "mesh-relay",
						"Relay listener for {} over capacity, dropping oldest pending circuit",
						self.relay,
					);
				}
				self.tx.try_send(connection).map_err(|_| RelayError::ListenerClosed)
			},
			Err(channel::TrySendError::Closed(_)) => Err(RelayError::ListenerClosed),
		}
	}

	/// How many circuits are waiting to be accepted.
	pub fn pending(&self) -> usize {
		self.rx.len()
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Closes the listener: rejects future enqueues, fails the pending
	/// acceptor promptly and drops everything still queued. Idempotent.
	pub fn close(&self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return
		}
		self.tx.close();
		while self.rx.try_recv().is_ok() {}
		log::debug!(target: "mesh-relay", "Relay listener for {} closed", self.relay);
	}
}

impl Drop for RelayListener {
	fn drop(&mut self) {
		self.close();
	}
}
