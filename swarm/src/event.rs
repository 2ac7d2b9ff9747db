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

//! The swarm event stream.
//!
//! A single broadcaster fans events out to any number of lazily-discovered
//! subscribers. Each subscriber owns a bounded buffer; a slow consumer
//! never blocks the producers: on overflow the oldest event is dropped
//! and one warning is logged per overflow burst.

use futures::Stream;
use parking_lot::Mutex;
use std::{
	pin::Pin,
	sync::Arc,
	task::{Context, Poll, Waker},
	time::{Duration, Instant},
};

use crate::{
	error::{GateStage, SwarmError},
	policy::Direction,
	pool::DisconnectReason,
};
use mesh_core::Multiaddr;
use mesh_identity::PeerId;

/// Detail events about a single connection's lifecycle.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
	Connected { peer: PeerId, address: Multiaddr, direction: Direction },
	Disconnected { peer: PeerId, reason: DisconnectReason },
	Gated { peer: Option<PeerId>, address: Multiaddr, stage: GateStage },
	Reconnecting { peer: PeerId, attempt: u32, next_attempt_at: Instant },
	Reconnected { peer: PeerId, attempt: u32 },
	ReconnectionFailed { peer: PeerId, reason: String },
	Trimmed { peer: PeerId },
	TrimmedWithContext {
		peer: PeerId,
		rank: usize,
		tag_count: usize,
		idle: Duration,
		direction: Direction,
	},
	TrimConstrained { target: usize, trimmable: usize },
}

/// Everything the swarm reports to the outside.
#[derive(Debug, Clone)]
pub enum SwarmEvent {
	/// First connection to a peer is up. Emitted once per peer however many
	/// concurrent connections exist.
	PeerConnected(PeerId),
	/// Last connection to a peer is gone.
	PeerDisconnected(PeerId),
	NewListenAddr(Multiaddr),
	ExpiredListenAddr(Multiaddr),
	ListenError { address: Multiaddr, error: String },
	Dialing(PeerId),
	OutgoingConnectionError { peer: Option<PeerId>, error: Arc<SwarmError> },
	ConnectionError { peer: Option<PeerId>, error: Arc<SwarmError> },
	Connection(ConnectionEvent),
}

struct Subscriber {
	id: u64,
	queue: std::collections::VecDeque<SwarmEvent>,
	waker: Option<Waker>,
	/// Set while inside an overflow burst so only its first drop warns.
	overflowed: bool,
}

struct Inner {
	subscribers: Vec<Subscriber>,
	capacity: usize,
	closed: bool,
	next_id: u64,
}

/// Fan-out publisher of [`SwarmEvent`]s.
pub struct Broadcaster {
	inner: Arc<Mutex<Inner>>,
}

impl Broadcaster {
	/// A broadcaster whose subscribers buffer up to `capacity` events.
	pub fn new(capacity: usize) -> Self {
		Broadcaster {
			inner: Arc::new(Mutex::new(Inner {
				subscribers: Vec::new(),
				capacity: capacity.max(1),
				closed: false,
				next_id: 0,
			})),
		}
	}

	/// Delivers `event` to every subscriber, in source order per subscriber.
	pub fn publish(&self, event: SwarmEvent) {
		let mut inner = self.inner.lock();
		if inner.closed {
			return
		}
		let capacity = inner.capacity;
		for sub in &mut inner.subscribers {
			if sub.queue.len() == capacity {
				sub.queue.pop_front();
				if !sub.overflowed {
					sub.overflowed = true;
					log::warn!(
						target: "mesh-swarm",
						"Event subscriber too slow, dropping oldest events",
					);
				}
			} else {
				sub.overflowed = false;
			}
			sub.queue.push_back(event.clone());
			if let Some(waker) = sub.waker.take() {
				waker.wake();
			}
		}
	}

	/// Registers a new subscriber. Subscribing to a closed broadcaster
	/// yields a stream that ends immediately.
	pub fn subscribe(&self) -> EventStream {
		let mut inner = self.inner.lock();
		let id = inner.next_id;
		inner.next_id += 1;
		if !inner.closed {
			inner.subscribers.push(Subscriber {
				id,
				queue: Default::default(),
				waker: None,
				overflowed: false,
			});
		}
		EventStream { inner: Arc::clone(&self.inner), id }
	}

	/// Finishes every subscriber stream once their buffers drain.
	pub fn close(&self) {
		let mut inner = self.inner.lock();
		inner.closed = true;
		for sub in &mut inner.subscribers {
			if let Some(waker) = sub.waker.take() {
				waker.wake();
			}
		}
	}
}

/// A subscriber's view of the event stream.
pub struct EventStream {
	inner: Arc<Mutex<Inner>>,
	id: u64,
}

impl Stream for EventStream {
	type Item = SwarmEvent;

	fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<SwarmEvent>> {
		let mut inner = self.inner.lock();
		let closed = inner.closed;
		match inner.subscribers.iter_mut().find(|s| s.id == self.id) {
			Some(sub) => match sub.queue.pop_front() {
				Some(event) => Poll::Ready(Some(event)),
				None if closed => Poll::Ready(None),
				None => {
					sub.waker = Some(cx.waker().clone());
					Poll::Pending
				},
			},
			// Subscribed after close, or already deregistered.
			None => Poll::Ready(None),
		}
	}
}

impl Drop for EventStream {
	fn drop(&mut self) {
		self.inner.lock().subscribers.retain(|s| s.id != self.id);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use futures::StreamExt as _;

	fn dummy_peer() -> PeerId {
		mesh_identity::Keypair::generate().peer_id()
	}

	#[async_std::test]
	async fn delivers_in_source_order() {
		let broadcaster = Broadcaster::new(8);
		let mut stream = broadcaster.subscribe();
		let (a, b) = (dummy_peer(), dummy_peer());

		broadcaster.publish(SwarmEvent::PeerConnected(a));
		broadcaster.publish(SwarmEvent::PeerConnected(b));
		broadcaster.publish(SwarmEvent::PeerDisconnected(a));

		assert!(matches!(stream.next().await, Some(SwarmEvent::PeerConnected(p)) if p == a));
		assert!(matches!(stream.next().await, Some(SwarmEvent::PeerConnected(p)) if p == b));
		assert!(matches!(stream.next().await, Some(SwarmEvent::PeerDisconnected(p)) if p == a));
	}

	#[async_std::test]
	async fn overflow_drops_oldest() {
		let broadcaster = Broadcaster::new(2);
		let mut stream = broadcaster.subscribe();
		let peers: Vec<_> = (0..3).map(|_| dummy_peer()).collect();

		for peer in &peers {
			broadcaster.publish(SwarmEvent::PeerConnected(*peer));
		}
		broadcaster.close();

		// The first event was dropped; the last two survive in order.
		assert!(
			matches!(stream.next().await, Some(SwarmEvent::PeerConnected(p)) if p == peers[1])
		);
		assert!(
			matches!(stream.next().await, Some(SwarmEvent::PeerConnected(p)) if p == peers[2])
		);
		assert!(stream.next().await.is_none());
	}

	#[async_std::test]
	async fn close_finishes_subscribers() {
		let broadcaster = Broadcaster::new(4);
		let mut stream = broadcaster.subscribe();
		broadcaster.close();
		assert!(stream.next().await.is_none());

		// Subscribing after close ends immediately too.
		let mut late = broadcaster.subscribe();
		assert!(late.next().await.is_none());
	}

	#[async_std::test]
	async fn slow_subscriber_does_not_block_publisher() {
		let broadcaster = Broadcaster::new(2);
		let _stream = broadcaster.subscribe();
		// Publishing far beyond the buffer must return promptly.
		for _ in 0..100 {
			broadcaster.publish(SwarmEvent::PeerConnected(dummy_peer()));
		}
	}
}
