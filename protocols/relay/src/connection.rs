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

//! The client-side view of a circuit: a raw byte pipe over a relay
//! substream with the relay's limits enforced locally.

use futures::{
	io::{AsyncRead, AsyncWrite},
	FutureExt as _,
};
use futures_timer::Delay;
use std::{
	io,
	pin::Pin,
	task::{Context, Poll},
};

use crate::CircuitLimit;
use mesh_core::{
	connection::{BoxedStream, RawConnection},
	multiaddr::{Multiaddr, Protocol},
};
use mesh_identity::PeerId;

/// A relayed byte pipe. Behaves as a [`RawConnection`], so it feeds back
/// into the regular upgrade pipeline.
///
/// Counts bytes in both directions; the write that would push the total
/// past `limit.data` fails. A `limit.duration` arms a timer after which
/// all I/O fails; bytes already delivered remain readable until then.
pub struct RelayedConnection {
	stream: BoxedStream,
	relay: PeerId,
	remote: PeerId,
	limit: CircuitLimit,
	transferred: u64,
	expiry: Option<Delay>,
	expired: bool,
}

impl std::fmt::Debug for RelayedConnection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RelayedConnection")
			.field("relay", &self.relay)
			.field("remote", &self.remote)
			.field("limit", &self.limit)
			.field("transferred", &self.transferred)
			.field("expired", &self.expired)
			.finish()
	}
}

impl RelayedConnection {
	pub fn new(
		stream: BoxedStream,
		relay: PeerId,
		remote: PeerId,
		limit: CircuitLimit,
	) -> Self {
		RelayedConnection {
			stream,
			relay,
			remote,
			expiry: limit.duration.map(Delay::new),
			limit,
			transferred: 0,
			expired: false,
		}
	}

	pub fn relay(&self) -> PeerId {
		self.relay
	}

	pub fn remote_peer(&self) -> PeerId {
		self.remote
	}

	pub fn limit(&self) -> CircuitLimit {
		self.limit
	}

	/// Bytes relayed so far, both directions combined.
	pub fn transferred(&self) -> u64 {
		self.transferred
	}

	fn check_expiry(&mut self, cx: &mut Context<'_>) -> io::Result<()> {
		if self.expired {
			return Err(io::Error::new(
				io::ErrorKind::TimedOut,
				"circuit duration limit elapsed",
			))
		}
		if let Some(expiry) = self.expiry.as_mut() {
			if expiry.poll_unpin(cx).is_ready() {
				self.expired = true;
				return Err(io::Error::new(
					io::ErrorKind::TimedOut,
					"circuit duration limit elapsed",
				))
			}
		}
		Ok(())
	}
}

impl AsyncRead for RelayedConnection {
	fn poll_read(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut [u8],
	) -> Poll<io::Result<usize>> {
		self.check_expiry(cx)?;
		let n = futures::ready!(Pin::new(&mut self.stream).poll_read(cx, buf))?;
		self.transferred += n as u64;
		Poll::Ready(Ok(n))
	}
}

impl AsyncWrite for RelayedConnection {
	fn poll_write(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &[u8],
	) -> Poll<io::Result<usize>> {
		self.check_expiry(cx)?;
		if let Some(data) = self.limit.data {
			if self.transferred + buf.len() as u64 > data {
				return Poll::Ready(Err(io::Error::new(
					io::ErrorKind::Other,
					crate::RelayError::LimitExceeded,
				)))
			}
		}
		let n = futures::ready!(Pin::new(&mut self.stream).poll_write(cx, buf))?;
		self.transferred += n as u64;
		Poll::Ready(Ok(n))
	}

	fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		Pin::new(&mut self.stream).poll_flush(cx)
	}

	fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		Pin::new(&mut self.stream).poll_close(cx)
	}
}

impl RawConnection for RelayedConnection {
	fn local_addr(&self) -> Multiaddr {
		Multiaddr::from(Protocol::P2pCircuit)
	}

	fn remote_addr(&self) -> Multiaddr {
		Multiaddr::from(Protocol::P2p(self.relay))
			.with(Protocol::P2pCircuit)
			.with(Protocol::P2p(self.remote))
	}
}
