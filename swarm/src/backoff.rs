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

//! Per-peer exponential dial backoff with jitter.

use parking_lot::Mutex;
use rand::Rng as _;
use std::time::{Duration, Instant};

use mesh_identity::PeerId;

/// Shape of the backoff curve.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
	/// Delay after the first failure.
	pub base: Duration,
	/// Multiplier applied per further failure.
	pub factor: f64,
	/// Hard cap on a single delay.
	pub max: Duration,
	/// Relative jitter, e.g. `0.1` for ±10%.
	pub jitter: f64,
}

impl Default for BackoffConfig {
	fn default() -> Self {
		BackoffConfig {
			base: Duration::from_millis(500),
			factor: 2.0,
			max: Duration::from_secs(60),
			jitter: 0.1,
		}
	}
}

#[derive(Debug, Clone, Copy)]
struct Entry {
	attempts: u32,
	next_attempt_at: Instant,
}

/// Tracks failed dials per peer and the earliest next attempt.
pub struct DialBackoff {
	config: BackoffConfig,
	entries: Mutex<fnv::FnvHashMap<PeerId, Entry>>,
}

impl DialBackoff {
	pub fn new(config: BackoffConfig) -> Self {
		DialBackoff { config, entries: Mutex::new(Default::default()) }
	}

	/// The (jittered) delay before attempt `attempt`, counting from zero.
	pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
		let raw = self.config.base.as_secs_f64() * self.config.factor.powi(attempt as i32);
		let capped = raw.min(self.config.max.as_secs_f64());
		let jitter = if self.config.jitter > 0.0 {
			rand::thread_rng().gen_range(-self.config.jitter..=self.config.jitter)
		} else {
			0.0
		};
		Duration::from_secs_f64((capped * (1.0 + jitter)).max(0.0))
	}

	/// Clears the record of `peer` after a successful dial.
	pub fn record_success(&self, peer: PeerId) {
		self.entries.lock().remove(&peer);
	}

	/// Records a failed dial; each further failure pushes the next-attempt
	/// instant strictly later (until the cap flattens the curve).
	pub fn record_failure(&self, peer: PeerId) {
		let mut entries = self.entries.lock();
		let now = Instant::now();
		let entry = entries.entry(peer).or_insert(Entry { attempts: 0, next_attempt_at: now });
		entry.attempts += 1;
		let candidate = now + self.delay_for_attempt(entry.attempts - 1);
		// Strict monotonicity even when jitter or the cap would step back.
		entry.next_attempt_at =
			candidate.max(entry.next_attempt_at + Duration::from_millis(1));
	}

	/// If `peer` is still in backoff, the instant dialing becomes allowed.
	pub fn blocked_until(&self, peer: PeerId) -> Option<Instant> {
		let entries = self.entries.lock();
		entries
			.get(&peer)
			.map(|e| e.next_attempt_at)
			.filter(|at| *at > Instant::now())
	}

	/// The number of recorded consecutive failures for `peer`.
	pub fn failures(&self, peer: PeerId) -> u32 {
		self.entries.lock().get(&peer).map(|e| e.attempts).unwrap_or(0)
	}

	/// Drops entries whose next-attempt instant is long past.
	pub fn cleanup(&self) {
		let retention = self.config.max;
		let now = Instant::now();
		self.entries
			.lock()
			.retain(|_, e| now.saturating_duration_since(e.next_attempt_at) < retention);
	}

	/// Forgets everything.
	pub fn clear(&self) {
		self.entries.lock().clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use mesh_identity::Keypair;

	fn backoff() -> DialBackoff {
		DialBackoff::new(BackoffConfig {
			base: Duration::from_millis(100),
			factor: 2.0,
			max: Duration::from_secs(5),
			jitter: 0.0,
		})
	}

	#[test]
	fn success_clears_entry() {
		let backoff = backoff();
		let peer = Keypair::generate().peer_id();
		backoff.record_failure(peer);
		assert!(backoff.blocked_until(peer).is_some());
		backoff.record_success(peer);
		assert!(backoff.blocked_until(peer).is_none());
		assert_eq!(backoff.failures(peer), 0);
	}

	#[test]
	fn next_attempt_is_strictly_monotone() {
		let backoff = backoff();
		let peer = Keypair::generate().peer_id();
		let mut last = None;
		for _ in 0..6 {
			backoff.record_failure(peer);
			let next = backoff
				.blocked_until(peer)
				.expect("entry must block right after a failure");
			if let Some(last) = last {
				assert!(next > last, "next-attempt instants must strictly increase");
			}
			last = Some(next);
		}
	}

	#[test]
	fn delay_grows_geometrically_then_caps() {
		let backoff = backoff();
		assert_eq!(backoff.delay_for_attempt(0), Duration::from_millis(100));
		assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(200));
		assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(400));
		assert_eq!(backoff.delay_for_attempt(20), Duration::from_secs(5));
	}

	#[test]
	fn unknown_peer_is_not_blocked() {
		let backoff = backoff();
		assert!(backoff.blocked_until(Keypair::generate().peer_id()).is_none());
	}

	#[test]
	fn clear_forgets_all_peers() {
		let backoff = backoff();
		let (a, b) = (Keypair::generate().peer_id(), Keypair::generate().peer_id());
		backoff.record_failure(a);
		backoff.record_failure(b);
		backoff.clear();
		assert!(backoff.blocked_until(a).is_none());
		assert!(backoff.blocked_until(b).is_none());
	}
}
