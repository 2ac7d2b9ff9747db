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

//! The connection object model: raw duplex byte streams, multiplexed
//! connections and their substreams.
//!
//! The set of transports and muxers is open, so everything here is an
//! interface abstraction; the swarm only ever handles the boxed forms.

use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncWrite};
use std::io;

use crate::multiaddr::Multiaddr;
use mesh_identity::PeerId;

/// An unauthenticated duplex byte stream with known endpoint addresses.
///
/// This is what a transport hands to the upgrade pipeline.
pub trait RawConnection: AsyncRead + AsyncWrite + Send + Unpin {
	/// The local endpoint of the stream.
	fn local_addr(&self) -> Multiaddr;
	/// The remote endpoint of the stream.
	fn remote_addr(&self) -> Multiaddr;
}

/// Boxed [`RawConnection`], the form the pipeline passes around.
pub type BoxedRaw = Box<dyn RawConnection>;

impl RawConnection for BoxedRaw {
	fn local_addr(&self) -> Multiaddr {
		(**self).local_addr()
	}

	fn remote_addr(&self) -> Multiaddr {
		(**self).remote_addr()
	}
}

/// An independent duplex substream of a [`MuxedConnection`].
///
/// `AsyncWrite::poll_close` closes the write half; the dedicated methods
/// below give finer control. Closing twice is a no-op.
#[async_trait]
pub trait MuxedStream: AsyncRead + AsyncWrite + Send + Unpin {
	/// Closes the write half, signalling EOF to the remote reader.
	async fn close_write(&mut self) -> io::Result<()>;

	/// Closes the read half; subsequent remote data is discarded.
	async fn close_read(&mut self) -> io::Result<()>;

	/// Abruptly tears the stream down in both directions.
	async fn reset(&mut self) -> io::Result<()>;
}

/// Boxed [`MuxedStream`].
pub type BoxedStream = Box<dyn MuxedStream>;

#[async_trait]
impl MuxedStream for Box<dyn MuxedStream> {
	async fn close_write(&mut self) -> io::Result<()> {
		(**self).close_write().await
	}

	async fn close_read(&mut self) -> io::Result<()> {
		(**self).close_read().await
	}

	async fn reset(&mut self) -> io::Result<()> {
		(**self).reset().await
	}
}

/// An authenticated connection multiplexing many independent substreams.
#[async_trait]
pub trait MuxedConnection: Send + Sync {
	/// Opens a new outbound substream.
	async fn open_stream(&self) -> io::Result<BoxedStream>;

	/// The next inbound substream, or `None` once the connection is closed.
	async fn next_inbound(&self) -> Option<BoxedStream>;

	fn local_peer(&self) -> PeerId;
	fn remote_peer(&self) -> PeerId;
	fn local_addr(&self) -> Multiaddr;
	fn remote_addr(&self) -> Multiaddr;

	/// Closes the connection and all substreams. Idempotent.
	async fn close(&self) -> io::Result<()>;

	/// Whether [`close`](Self::close) ran or the remote went away.
	fn is_closed(&self) -> bool;
}

/// Everything a protocol handler learns about an inbound stream.
pub struct StreamContext {
	/// The negotiated substream, remainder bytes already replayed.
	pub stream: BoxedStream,
	/// The protocol id the stream was negotiated to.
	pub protocol: String,
	pub local_peer: PeerId,
	pub remote_peer: PeerId,
	pub local_addr: Multiaddr,
	pub remote_addr: Multiaddr,
}

impl std::fmt::Debug for StreamContext {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("StreamContext")
			.field("protocol", &self.protocol)
			.field("remote_peer", &self.remote_peer)
			.field("remote_addr", &self.remote_addr)
			.finish_non_exhaustive()
	}
}
