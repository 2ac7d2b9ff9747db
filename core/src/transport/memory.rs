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

//! In-process transport over `/memory/<id>` addresses.
//!
//! Listeners register in a process-global hub; dialing delivers the other
//! half of a channel-backed duplex pipe. Listening on `/memory/0` allocates
//! a fresh id. This is the transport every in-process end-to-end test runs
//! on.

use async_std::channel;
use async_trait::async_trait;
use bytes::{Buf as _, Bytes};
use futures::{
	io::{AsyncRead, AsyncWrite},
	StreamExt as _,
};
use parking_lot::Mutex;
use std::{
	io,
	pin::Pin,
	sync::OnceLock,
	task::{Context, Poll},
};

use super::{Listener, PathKind, Transport};
use crate::{
	connection::{BoxedRaw, RawConnection},
	multiaddr::{Multiaddr, Protocol},
};

#[derive(Default)]
struct Hub {
	listeners: fnv::FnvHashMap<u64, channel::Sender<MemorySocket>>,
}

fn hub() -> &'static Mutex<Hub> {
	static HUB: OnceLock<Mutex<Hub>> = OnceLock::new();
	HUB.get_or_init(|| Mutex::new(Hub::default()))
}

/// The in-process `/memory` transport.
#[derive(Debug, Default, Clone)]
pub struct MemoryTransport;

fn memory_id(addr: &Multiaddr) -> Option<u64> {
	let addr = addr.without_peer_id();
	let mut components = addr.iter();
	match (components.next(), components.next()) {
		(Some(Protocol::Memory(id)), None) => Some(*id),
		_ => None,
	}
}

#[async_trait]
impl Transport for MemoryTransport {
	fn can_dial(&self, addr: &Multiaddr) -> bool {
		memory_id(addr).is_some()
	}

	fn can_listen(&self, addr: &Multiaddr) -> bool {
		memory_id(addr).is_some()
	}

	fn protocols(&self) -> Vec<Vec<&'static str>> {
		vec![vec!["memory"]]
	}

	fn path_kind(&self) -> PathKind {
		PathKind::Local
	}

	async fn dial(&self, addr: &Multiaddr) -> io::Result<BoxedRaw> {
		let id = memory_id(addr).ok_or_else(|| {
			io::Error::new(io::ErrorKind::InvalidInput, format!("not a memory address: {addr}"))
		})?;
		let sender = hub()
			.lock()
			.listeners
			.get(&id)
			.cloned()
			.ok_or_else(|| {
				io::Error::new(io::ErrorKind::ConnectionRefused, format!("no listener on {addr}"))
			})?;

		let dialer_addr = Multiaddr::from(Protocol::Memory(rand::random::<u64>() | 1));
		let listener_addr = Multiaddr::from(Protocol::Memory(id));
		let (outbound, inbound) =
			MemorySocket::pair(dialer_addr, listener_addr);
		sender.send(inbound).await.map_err(|_| {
			io::Error::new(io::ErrorKind::ConnectionRefused, format!("listener on {addr} closed"))
		})?;
		Ok(Box::new(outbound))
	}

	async fn listen(&self, addr: &Multiaddr) -> io::Result<Box<dyn Listener>> {
		let requested = memory_id(addr).ok_or_else(|| {
			io::Error::new(io::ErrorKind::InvalidInput, format!("not a memory address: {addr}"))
		})?;

		let mut hub = hub().lock();
		let id = if requested == 0 {
			loop {
				let candidate = rand::random::<u64>();
				if candidate != 0 && !hub.listeners.contains_key(&candidate) {
					break candidate
				}
			}
		} else {
			if hub.listeners.contains_key(&requested) {
				return Err(io::Error::new(
					io::ErrorKind::AddrInUse,
					format!("memory id {requested} already bound"),
				))
			}
			requested
		};

		let (tx, rx) = channel::bounded(64);
		hub.listeners.insert(id, tx);
		drop(hub);

		log::debug!(target: "mesh-core", "Memory transport listening on /memory/{id}");
		Ok(Box::new(MemoryListener {
			id,
			incoming: rx,
			closed: Mutex::new(false),
		}))
	}
}

struct MemoryListener {
	id: u64,
	incoming: channel::Receiver<MemorySocket>,
	closed: Mutex<bool>,
}

#[async_trait]
impl Listener for MemoryListener {
	async fn accept(&self) -> io::Result<BoxedRaw> {
		match self.incoming.recv().await {
			Ok(socket) => Ok(Box::new(socket)),
			Err(_) => Err(io::Error::new(io::ErrorKind::BrokenPipe, "memory listener closed")),
		}
	}

	fn local_addr(&self) -> Multiaddr {
		Multiaddr::from(Protocol::Memory(self.id))
	}

	async fn close(&self) -> io::Result<()> {
		let mut closed = self.closed.lock();
		if !*closed {
			*closed = true;
			hub().lock().listeners.remove(&self.id);
			self.incoming.close();
		}
		Ok(())
	}
}

impl Drop for MemoryListener {
	fn drop(&mut self) {
		hub().lock().listeners.remove(&self.id);
	}
}

/// One half of an in-process duplex pipe.
pub struct MemorySocket {
	tx: channel::Sender<Bytes>,
	rx: channel::Receiver<Bytes>,
	current: Bytes,
	local: Multiaddr,
	remote: Multiaddr,
}

impl MemorySocket {
	/// Builds a connected pair; the first half sees `a` as its local
	/// address, the second half `b`.
	pub fn pair(a: Multiaddr, b: Multiaddr) -> (MemorySocket, MemorySocket) {
		let (a_tx, b_rx) = channel::unbounded();
		let (b_tx, a_rx) = channel::unbounded();
		(
			MemorySocket {
				tx: a_tx,
				rx: a_rx,
				current: Bytes::new(),
				local: a.clone(),
				remote: b.clone(),
			},
			MemorySocket { tx: b_tx, rx: b_rx, current: Bytes::new(), local: b, remote: a },
		)
	}
}

impl AsyncRead for MemorySocket {
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
			match futures::ready!(self.rx.poll_next_unpin(cx)) {
				Some(chunk) => self.current = chunk,
				// Remote write half gone: EOF.
				None => return Poll::Ready(Ok(0)),
			}
		}
	}
}

impl AsyncWrite for MemorySocket {
	fn poll_write(
		self: Pin<&mut Self>,
		_: &mut Context<'_>,
		buf: &[u8],
	) -> Poll<io::Result<usize>> {
		if buf.is_empty() {
			return Poll::Ready(Ok(0))
		}
		match self.tx.try_send(Bytes::copy_from_slice(buf)) {
			Ok(()) => Poll::Ready(Ok(buf.len())),
			Err(_) =>
				Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "remote end closed"))),
		}
	}

	fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
		Poll::Ready(Ok(()))
	}

	fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
		self.tx.close();
		Poll::Ready(Ok(()))
	}
}

impl RawConnection for MemorySocket {
	fn local_addr(&self) -> Multiaddr {
		self.local.clone()
	}

	fn remote_addr(&self) -> Multiaddr {
		self.remote.clone()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use futures::io::{AsyncReadExt as _, AsyncWriteExt as _};

	#[async_std::test]
	async fn dial_listen_roundtrip() {
		let transport = MemoryTransport;
		let listener =
			transport.listen(&"/memory/0".parse().unwrap()).await.unwrap();
		let addr = listener.local_addr();
		assert!(transport.can_dial(&addr));

		let accept = async_std::task::spawn(async move {
			let mut conn = listener.accept().await.unwrap();
			let mut buf = [0u8; 5];
			conn.read_exact(&mut buf).await.unwrap();
			buf
		});

		let mut conn = transport.dial(&addr).await.unwrap();
		conn.write_all(b"hello").await.unwrap();
		assert_eq!(&accept.await, b"hello");
	}

	#[async_std::test]
	async fn dialing_unbound_id_is_refused() {
		let err = MemoryTransport
			.dial(&"/memory/987654321".parse().unwrap())
			.await
			.err()
			.unwrap();
		assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
	}

	#[async_std::test]
	async fn close_propagates_eof() {
		let (mut a, mut b) =
			MemorySocket::pair("/memory/1".parse().unwrap(), "/memory/2".parse().unwrap());
		a.write_all(b"bye").await.unwrap();
		a.close().await.unwrap();

		let mut out = Vec::new();
		b.read_to_end(&mut out).await.unwrap();
		assert_eq!(out, b"bye");
	}

	#[async_std::test]
	async fn closed_listener_rejects_dials() {
		let transport = MemoryTransport;
		let listener = transport.listen(&"/memory/0".parse().unwrap()).await.unwrap();
		let addr = listener.local_addr();
		listener.close().await.unwrap();
		assert!(MemoryTransport.dial(&addr).await.is_err());
	}
}
