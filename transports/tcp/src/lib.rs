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

//! TCP transport over `async-std` sockets.
//!
//! Dials `/ip4|ip6|dns*/.../tcp/<port>` addresses and listens on
//! `/ip4|ip6/.../tcp/<port>` (port 0 binds an ephemeral port, reported back
//! through [`Listener::local_addr`]).

use async_std::net::{TcpListener, TcpStream};
use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncWrite};
use std::{
	io,
	net::{IpAddr, SocketAddr},
	pin::Pin,
	task::{Context, Poll},
};

use mesh_core::{
	connection::{BoxedRaw, RawConnection},
	multiaddr::{Multiaddr, Protocol},
	transport::{Listener, PathKind, Transport},
};

/// The TCP transport.
#[derive(Debug, Default, Clone)]
pub struct TcpTransport;

/// What a multiaddr means to this transport.
enum TcpTarget {
	Socket(SocketAddr),
	/// Hostname and port, resolved at dial time. Not listenable.
	Name(String, u16),
}

fn target(addr: &Multiaddr) -> Option<TcpTarget> {
	let addr = addr.without_peer_id();
	let mut components = addr.iter();
	let host = components.next()?;
	let port = match components.next()? {
		Protocol::Tcp(port) => *port,
		_ => return None,
	};
	if components.next().is_some() {
		return None
	}
	match host {
		Protocol::Ip4(ip) => Some(TcpTarget::Socket(SocketAddr::new(IpAddr::V4(*ip), port))),
		Protocol::Ip6(ip) => Some(TcpTarget::Socket(SocketAddr::new(IpAddr::V6(*ip), port))),
		Protocol::Dns(host) | Protocol::Dns4(host) | Protocol::Dns6(host) =>
			Some(TcpTarget::Name(host.clone(), port)),
		_ => None,
	}
}

fn to_multiaddr(addr: SocketAddr) -> Multiaddr {
	let ip = match addr.ip() {
		IpAddr::V4(ip) => Protocol::Ip4(ip),
		IpAddr::V6(ip) => Protocol::Ip6(ip),
	};
	Multiaddr::from(ip).with(Protocol::Tcp(addr.port()))
}

#[async_trait]
impl Transport for TcpTransport {
	fn can_dial(&self, addr: &Multiaddr) -> bool {
		target(addr).is_some()
	}

	fn can_listen(&self, addr: &Multiaddr) -> bool {
		matches!(target(addr), Some(TcpTarget::Socket(_)))
	}

	fn protocols(&self) -> Vec<Vec<&'static str>> {
		vec![
			vec!["ip4", "tcp"],
			vec!["ip6", "tcp"],
			vec!["dns", "tcp"],
			vec!["dns4", "tcp"],
			vec!["dns6", "tcp"],
		]
	}

	fn path_kind(&self) -> PathKind {
		PathKind::Direct
	}

	async fn dial(&self, addr: &Multiaddr) -> io::Result<BoxedRaw> {
		let stream = match target(addr).ok_or_else(|| {
			io::Error::new(io::ErrorKind::InvalidInput, format!("not a tcp address: {addr}"))
		})? {
			TcpTarget::Socket(socket) => TcpStream::connect(socket).await?,
			TcpTarget::Name(host, port) =>
				TcpStream::connect((host.as_str(), port)).await?,
		};
		stream.set_nodelay(true)?;
		log::trace!(target: "mesh-tcp", "Dialed {addr}");
		Ok(Box::new(TcpConnection::new(stream)?))
	}

	async fn listen(&self, addr: &Multiaddr) -> io::Result<Box<dyn Listener>> {
		let socket = match target(addr) {
			Some(TcpTarget::Socket(socket)) => socket,
			_ =>
				return Err(io::Error::new(
					io::ErrorKind::InvalidInput,
					format!("not a listenable tcp address: {addr}"),
				)),
		};
		let listener = TcpListener::bind(socket).await?;
		let local = listener.local_addr()?;
		log::debug!(target: "mesh-tcp", "Listening on {}", to_multiaddr(local));
		Ok(Box::new(TcpTransportListener { listener, local }))
	}
}

struct TcpTransportListener {
	listener: TcpListener,
	local: SocketAddr,
}

#[async_trait]
impl Listener for TcpTransportListener {
	async fn accept(&self) -> io::Result<BoxedRaw> {
		let (stream, remote) = self.listener.accept().await?;
		stream.set_nodelay(true)?;
		log::trace!(target: "mesh-tcp", "Accepted connection from {remote}");
		Ok(Box::new(TcpConnection::new(stream)?))
	}

	fn local_addr(&self) -> Multiaddr {
		to_multiaddr(self.local)
	}

	async fn close(&self) -> io::Result<()> {
		// Dropping the listener releases the socket; the swarm drops this
		// handle right after close. Nothing to tear down eagerly.
		Ok(())
	}
}

/// A TCP socket with its endpoints remembered as multiaddrs.
pub struct TcpConnection {
	stream: TcpStream,
	local: Multiaddr,
	remote: Multiaddr,
}

impl TcpConnection {
	fn new(stream: TcpStream) -> io::Result<Self> {
		let local = to_multiaddr(stream.local_addr()?);
		let remote = to_multiaddr(stream.peer_addr()?);
		Ok(TcpConnection { stream, local, remote })
	}
}

impl AsyncRead for TcpConnection {
	fn poll_read(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut [u8],
	) -> Poll<io::Result<usize>> {
		Pin::new(&mut self.stream).poll_read(cx, buf)
	}
}

impl AsyncWrite for TcpConnection {
	fn poll_write(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &[u8],
	) -> Poll<io::Result<usize>> {
		Pin::new(&mut self.stream).poll_write(cx, buf)
	}

	fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		Pin::new(&mut self.stream).poll_flush(cx)
	}

	fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		Pin::new(&mut self.stream).poll_close(cx)
	}
}

impl RawConnection for TcpConnection {
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
		let transport = TcpTransport;
		let listener = transport
			.listen(&"/ip4/127.0.0.1/tcp/0".parse().unwrap())
			.await
			.unwrap();
		let addr = listener.local_addr();
		assert!(transport.can_dial(&addr));

		let accept = async_std::task::spawn(async move {
			let mut conn = listener.accept().await.unwrap();
			let mut buf = [0u8; 9];
			conn.read_exact(&mut buf).await.unwrap();
			conn.write_all(b"tcp-reply").await.unwrap();
			buf
		});

		let mut conn = transport.dial(&addr).await.unwrap();
		conn.write_all(b"tcp-hello").await.unwrap();
		let mut buf = [0u8; 9];
		conn.read_exact(&mut buf).await.unwrap();
		assert_eq!(&accept.await, b"tcp-hello");
		assert_eq!(&buf, b"tcp-reply");
	}

	#[test]
	fn address_classification() {
		let transport = TcpTransport;
		let ok: Multiaddr = "/ip4/127.0.0.1/tcp/4001".parse().unwrap();
		let dns: Multiaddr = "/dns4/example.com/tcp/443".parse().unwrap();
		let udp: Multiaddr = "/ip4/127.0.0.1/udp/4001".parse().unwrap();

		assert!(transport.can_dial(&ok));
		assert!(transport.can_listen(&ok));
		assert!(transport.can_dial(&dns));
		assert!(!transport.can_listen(&dns), "hostnames cannot be bound");
		assert!(!transport.can_dial(&udp));
	}
}
