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

//! `plex`, the built-in frame multiplexer.
//!
//! Wire format per frame: `varint((stream_id << 3) | flag)`, then a varint
//! payload length, then the payload. Flags: 0 open, 1 data, 2 write-half
//! close, 3 reset. The connection initiator allocates odd stream ids, the
//! responder even ones.
//!
//! One pump task owns the read half and routes frames into per-stream
//! buffers; one writer task owns the write half and drains a shared frame
//! queue. Substream writes enqueue encoded frames, so a slow remote
//! backpressures all writers through the bounded queue.

use async_std::channel;
use async_trait::async_trait;
use bytes::{Buf as _, Bytes, BytesMut};
use futures::{
	future::BoxFuture,
	io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _, ReadHalf, WriteHalf},
	FutureExt as _, StreamExt as _,
};
use parking_lot::Mutex;
use std::{
	io,
	pin::Pin,
	sync::{
		atomic::{AtomicBool, AtomicU64, Ordering},
		Arc,
	},
	task::{Context, Poll},
};

use super::Muxer;
use crate::{
	connection::{BoxedRaw, BoxedStream, MuxedConnection, MuxedStream},
	multiaddr::Multiaddr,
	security::SecuredConnection,
};
use mesh_identity::PeerId;

/// Protocol id of the built-in muxer.
pub const PROTOCOL_ID: &str = "/plex/1.0.0";

const FLAG_OPEN: u64 = 0;
const FLAG_DATA: u64 = 1;
const FLAG_CLOSE: u64 = 2;
const FLAG_RESET: u64 = 3;

/// Receive guard: a peer sending a larger frame is misbehaving.
const MAX_FRAME_SIZE: usize = 1024 * 1024;
/// Data frames are chunked to this size on the write path.
const MAX_WRITE_CHUNK: usize = 16 * 1024;
/// Pending inbound substreams before the pump backpressures.
const INBOUND_QUEUE: usize = 32;
/// Buffered data frames per stream before the pump backpressures.
const STREAM_BUFFER: usize = 256;
/// Encoded frames queued towards the writer task.
const OUTBOUND_QUEUE: usize = 64;

/// The built-in muxer.
#[derive(Debug, Default, Clone)]
pub struct PlexMuxer;

#[async_trait]
impl Muxer for PlexMuxer {
	fn protocol_id(&self) -> &str {
		PROTOCOL_ID
	}

	async fn multiplex(
		&self,
		secured: SecuredConnection,
		is_initiator: bool,
	) -> io::Result<Box<dyn MuxedConnection>> {
		Ok(Box::new(PlexConnection::new(secured, is_initiator)))
	}
}

fn encode_frame(id: u64, flag: u64, payload: &[u8]) -> Bytes {
	let mut out = BytesMut::with_capacity(payload.len() + 16);
	let mut header = unsigned_varint::encode::u64_buffer();
	out.extend_from_slice(unsigned_varint::encode::u64((id << 3) | flag, &mut header));
	let mut len = unsigned_varint::encode::usize_buffer();
	out.extend_from_slice(unsigned_varint::encode::usize(payload.len(), &mut len));
	out.extend_from_slice(payload);
	out.freeze()
}

struct StreamEntry {
	data_tx: channel::Sender<Bytes>,
	reset: Arc<AtomicBool>,
}

struct Shared {
	out_tx: channel::Sender<Bytes>,
	streams: Mutex<fnv::FnvHashMap<u64, StreamEntry>>,
	closed: AtomicBool,
}

impl Shared {
	/// Closes every stream buffer and the outbound queue. Idempotent.
	fn teardown(&self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return
		}
		let entries: Vec<StreamEntry> =
			self.streams.lock().drain().map(|(_, e)| e).collect();
		for entry in entries {
			entry.data_tx.close();
		}
		self.out_tx.close();
	}
}

/// A multiplexed connection over a single secured stream.
pub struct PlexConnection {
	shared: Arc<Shared>,
	inbound_rx: channel::Receiver<PlexStream>,
	next_id: AtomicU64,
	local_peer: PeerId,
	remote_peer: PeerId,
	local_addr: Multiaddr,
	remote_addr: Multiaddr,
}

impl PlexConnection {
	/// Starts the pump and writer tasks over `secured`.
	pub fn new(secured: SecuredConnection, is_initiator: bool) -> Self {
		let local_addr = secured.io.local_addr();
		let remote_addr = secured.io.remote_addr();
		let (read_half, write_half) = secured.io.split();

		let (out_tx, out_rx) = channel::bounded(OUTBOUND_QUEUE);
		let (inbound_tx, inbound_rx) = channel::bounded(INBOUND_QUEUE);

		let shared = Arc::new(Shared {
			out_tx,
			streams: Mutex::new(Default::default()),
			closed: AtomicBool::new(false),
		});

		async_std::task::spawn(writer_task(write_half, out_rx));
		async_std::task::spawn(pump_task(read_half, Arc::clone(&shared), inbound_tx));

		PlexConnection {
			shared,
			inbound_rx,
			next_id: AtomicU64::new(if is_initiator { 1 } else { 2 }),
			local_peer: secured.local_peer,
			remote_peer: secured.remote_peer,
			local_addr,
			remote_addr,
		}
	}
}

#[async_trait]
impl MuxedConnection for PlexConnection {
	async fn open_stream(&self) -> io::Result<BoxedStream> {
		if self.shared.closed.load(Ordering::SeqCst) {
			return Err(io::Error::new(io::ErrorKind::NotConnected, "muxer closed"))
		}
		let id = self.next_id.fetch_add(2, Ordering::SeqCst);
		let (data_tx, data_rx) = channel::bounded(STREAM_BUFFER);
		let reset = Arc::new(AtomicBool::new(false));
		self.shared
			.streams
			.lock()
			.insert(id, StreamEntry { data_tx, reset: Arc::clone(&reset) });

		if self.shared.out_tx.send(encode_frame(id, FLAG_OPEN, &[])).await.is_err() {
			self.shared.streams.lock().remove(&id);
			return Err(io::Error::new(io::ErrorKind::NotConnected, "muxer closed"))
		}
		Ok(Box::new(PlexStream::new(id, Arc::clone(&self.shared), data_rx, reset)))
	}

	async fn next_inbound(&self) -> Option<BoxedStream> {
		self.inbound_rx.recv().await.ok().map(|s| Box::new(s) as BoxedStream)
	}

	fn local_peer(&self) -> PeerId {
		self.local_peer
	}

	fn remote_peer(&self) -> PeerId {
		self.remote_peer
	}

	fn local_addr(&self) -> Multiaddr {
		self.local_addr.clone()
	}

	fn remote_addr(&self) -> Multiaddr {
		self.remote_addr.clone()
	}

	async fn close(&self) -> io::Result<()> {
		self.shared.teardown();
		self.inbound_rx.close();
		Ok(())
	}

	fn is_closed(&self) -> bool {
		self.shared.closed.load(Ordering::SeqCst)
	}
}

impl Drop for PlexConnection {
	fn drop(&mut self) {
		self.shared.teardown();
	}
}

/// Drains the shared frame queue into the socket write half.
async fn writer_task(mut write_half: WriteHalf<BoxedRaw>, out_rx: channel::Receiver<Bytes>) {
	while let Ok(frame) = out_rx.recv().await {
		if write_half.write_all(&frame).await.is_err() || write_half.flush().await.is_err() {
			out_rx.close();
			break
		}
	}
	let _ = write_half.close().await;
}

/// Reads frames off the socket and routes them to per-stream buffers.
async fn pump_task(
	mut read_half: ReadHalf<BoxedRaw>,
	shared: Arc<Shared>,
	inbound_tx: channel::Sender<PlexStream>,
) {
	loop {
		let header = match unsigned_varint::aio::read_u64(&mut read_half).await {
			Ok(h) => h,
			Err(_) => break,
		};
		let len = match unsigned_varint::aio::read_usize(&mut read_half).await {
			Ok(l) if l <= MAX_FRAME_SIZE => l,
			_ => break,
		};
		let mut payload = vec![0u8; len];
		if read_half.read_exact(&mut payload).await.is_err() {
			break
		}
		let (id, flag) = (header >> 3, header & 0b111);

		match flag {
			FLAG_OPEN => {
				let (data_tx, data_rx) = channel::bounded(STREAM_BUFFER);
				let reset = Arc::new(AtomicBool::new(false));
				shared
					.streams
					.lock()
					.insert(id, StreamEntry { data_tx, reset: Arc::clone(&reset) });
				let stream = PlexStream::new(id, Arc::clone(&shared), data_rx, reset);
				if inbound_tx.send(stream).await.is_err() {
					// Connection closed locally while the open was in flight.
					shared.streams.lock().remove(&id);
				}
			},
			FLAG_DATA => {
				let sender = shared
					.streams
					.lock()
					.get(&id)
					.map(|entry| entry.data_tx.clone());
				if let Some(sender) = sender {
					// A closed receiver means the local side stopped
					// reading; the data is discarded.
					let _ = sender.send(payload.into()).await;
				}
			},
			FLAG_CLOSE => {
				if let Some(entry) = shared.streams.lock().get(&id) {
					entry.data_tx.close();
				}
			},
			FLAG_RESET => {
				if let Some(entry) = shared.streams.lock().remove(&id) {
					entry.reset.store(true, Ordering::SeqCst);
					entry.data_tx.close();
				}
			},
			other => {
				log::debug!(target: "mesh-core", "Dropping plex frame with unknown flag {other}");
			},
		}
	}
	shared.teardown();
	inbound_tx.close();
}

/// One substream of a [`PlexConnection`].
pub struct PlexStream {
	id: u64,
	shared: Arc<Shared>,
	data_rx: channel::Receiver<Bytes>,
	current: Bytes,
	reset: Arc<AtomicBool>,
	write_closed: bool,
	read_closed: bool,
	pending_write: Option<(usize, BoxFuture<'static, Result<(), ()>>)>,
	pending_close: Option<BoxFuture<'static, Result<(), ()>>>,
}

impl PlexStream {
	fn new(
		id: u64,
		shared: Arc<Shared>,
		data_rx: channel::Receiver<Bytes>,
		reset: Arc<AtomicBool>,
	) -> Self {
		PlexStream {
			id,
			shared,
			data_rx,
			current: Bytes::new(),
			reset,
			write_closed: false,
			read_closed: false,
			pending_write: None,
			pending_close: None,
		}
	}

	fn queue_frame(&self, flag: u64, payload: &[u8]) -> BoxFuture<'static, Result<(), ()>> {
		let frame = encode_frame(self.id, flag, payload);
		let tx = self.shared.out_tx.clone();
		async move { tx.send(frame).await.map_err(|_| ()) }.boxed()
	}
}

impl AsyncRead for PlexStream {
	fn poll_read(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut [u8],
	) -> Poll<io::Result<usize>> {
		loop {
			if !self.current.is_empty() {
				let n = self.current.len().min(buf.len());
				buf[..n].copy_from_slice(&self.current[..n]);
				self.current.advance(n);
				return Poll::Ready(Ok(n))
			}
			if self.read_closed {
				return Poll::Ready(Ok(0))
			}
			match futures::ready!(self.data_rx.poll_next_unpin(cx)) {
				Some(chunk) => self.current = chunk,
				None if self.reset.load(Ordering::SeqCst) =>
					return Poll::Ready(Err(io::Error::new(
						io::ErrorKind::ConnectionReset,
						"stream reset by peer",
					))),
				None => return Poll::Ready(Ok(0)),
			}
		}
	}
}

impl AsyncWrite for PlexStream {
	fn poll_write(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &[u8],
	) -> Poll<io::Result<usize>> {
		if self.write_closed {
			return Poll::Ready(Err(io::Error::new(
				io::ErrorKind::BrokenPipe,
				"write half closed",
			)))
		}
		if self.reset.load(Ordering::SeqCst) {
			return Poll::Ready(Err(io::Error::new(
				io::ErrorKind::ConnectionReset,
				"stream reset by peer",
			)))
		}
		loop {
			if let Some((len, fut)) = self.pending_write.as_mut() {
				let len = *len;
				match futures::ready!(fut.poll_unpin(cx)) {
					Ok(()) => {
						self.pending_write = None;
						return Poll::Ready(Ok(len))
					},
					Err(()) => {
						self.pending_write = None;
						return Poll::Ready(Err(io::Error::new(
							io::ErrorKind::BrokenPipe,
							"muxer closed",
						)))
					},
				}
			}
			let chunk = buf.len().min(MAX_WRITE_CHUNK);
			let fut = self.queue_frame(FLAG_DATA, &buf[..chunk]);
			self.pending_write = Some((chunk, fut));
		}
	}

	fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
		// The writer task flushes every frame.
		Poll::Ready(Ok(()))
	}

	fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		if self.write_closed {
			return Poll::Ready(Ok(()))
		}
		loop {
			if let Some(fut) = self.pending_close.as_mut() {
				let _ = futures::ready!(fut.poll_unpin(cx));
				self.pending_close = None;
				self.write_closed = true;
				return Poll::Ready(Ok(()))
			}
			let fut = self.queue_frame(FLAG_CLOSE, &[]);
			self.pending_close = Some(fut);
		}
	}
}

#[async_trait]
impl MuxedStream for PlexStream {
	async fn close_write(&mut self) -> io::Result<()> {
		futures::future::poll_fn(|cx| Pin::new(&mut *self).poll_close(cx)).await
	}

	async fn close_read(&mut self) -> io::Result<()> {
		self.read_closed = true;
		self.data_rx.close();
		Ok(())
	}

	async fn reset(&mut self) -> io::Result<()> {
		if self.write_closed && self.read_closed {
			return Ok(())
		}
		self.write_closed = true;
		self.read_closed = true;
		self.shared.streams.lock().remove(&self.id);
		self.data_rx.close();
		let frame = encode_frame(self.id, FLAG_RESET, &[]);
		let _ = self.shared.out_tx.send(frame).await;
		Ok(())
	}
}

impl Drop for PlexStream {
	fn drop(&mut self) {
		self.shared.streams.lock().remove(&self.id);
		if !self.write_closed && !self.reset.load(Ordering::SeqCst) {
			// Dropping an open stream resets it so the remote does not hang.
			let _ = self.shared.out_tx.try_send(encode_frame(self.id, FLAG_RESET, &[]));
		}
	}
}
