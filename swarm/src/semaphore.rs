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

//! Async counting semaphore over a pre-filled token channel.
//!
//! Bounds the number of concurrently negotiating inbound streams. Tokens
//! live in a bounded channel: acquiring receives one, dropping the permit
//! puts it back.

use async_std::channel;

/// Fixed-size async semaphore.
pub struct Semaphore {
	tx: channel::Sender<()>,
	rx: channel::Receiver<()>,
	permits: usize,
}

/// An acquired slot; returns itself to the semaphore on drop.
pub struct Permit {
	tx: channel::Sender<()>,
}

impl Semaphore {
	/// A semaphore with `permits` slots (at least one).
	pub fn new(permits: usize) -> Self {
		let permits = permits.max(1);
		let (tx, rx) = channel::bounded(permits);
		for _ in 0..permits {
			tx.try_send(()).expect("channel sized to hold every permit; qed");
		}
		Semaphore { tx, rx, permits }
	}

	/// Waits for a free slot.
	pub async fn acquire(&self) -> Permit {
		self.rx
			.recv()
			.await
			.expect("the semaphore owns both channel ends, neither closes; qed");
		Permit { tx: self.tx.clone() }
	}

	/// Takes a slot if one is free right now.
	pub fn try_acquire(&self) -> Option<Permit> {
		self.rx.try_recv().ok().map(|()| Permit { tx: self.tx.clone() })
	}

	/// The configured number of slots.
	pub fn capacity(&self) -> usize {
		self.permits
	}

	/// Slots free right now.
	pub fn available(&self) -> usize {
		self.rx.len()
	}
}

impl Drop for Permit {
	fn drop(&mut self) {
		// The channel can only be full if a permit leaked, which cannot
		// happen while permits are moved, not cloned.
		let _ = self.tx.try_send(());
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[async_std::test]
	async fn bounds_concurrency() {
		let semaphore = Semaphore::new(2);
		let first = semaphore.acquire().await;
		let _second = semaphore.acquire().await;
		assert!(semaphore.try_acquire().is_none());

		drop(first);
		assert!(semaphore.try_acquire().is_some());
	}

	#[async_std::test]
	async fn acquire_waits_for_release() {
		use std::sync::Arc;
		let semaphore = Arc::new(Semaphore::new(1));
		let held = semaphore.acquire().await;

		let waiter = {
			let semaphore = Arc::clone(&semaphore);
			async_std::task::spawn(async move {
				let _permit = semaphore.acquire().await;
			})
		};

		async_std::task::sleep(std::time::Duration::from_millis(20)).await;
		drop(held);
		waiter.await;
		assert_eq!(semaphore.available(), 1);
	}
}
