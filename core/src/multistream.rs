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

//! Multistream-select 1.0: length-prefixed protocol-id negotiation.
//!
//! Every message is an unsigned-varint length prefix followed by a UTF-8
//! line terminated by `\n`. The negotiation functions return any bytes read
//! past the terminating newline of the final message so the next layer can
//! replay them through [`Remainder`]; bytes are never lost at a layer
//! boundary.

use bytes::{Bytes, BytesMut};
use futures::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};
use pin_project::pin_project;
use std::{
	io,
	pin::Pin,
	task::{Context, Poll},
};

/// The multistream-select header line.
pub const HEADER_LINE: &str = "/multistream/1.0.0";
/// The rejection line a responder sends for an unsupported proposal.
pub const NOT_AVAILABLE: &str = "na";
/// Hard cap on a single negotiation message.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

const READ_CHUNK: usize = 4096;

/// Failure modes of a negotiation.
#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
	#[error("none of the proposed protocols was accepted")]
	NoProtocolMatched,
	#[error("unexpected negotiation message `{received}`")]
	ProtocolMismatch { received: String },
	#[error("negotiation message of {0} bytes exceeds the {MAX_MESSAGE_SIZE} byte cap")]
	OversizedMessage(usize),
	#[error("malformed varint length prefix")]
	InvalidVarint,
	#[error("connection closed mid-negotiation")]
	ConnectionClosed,
	#[error(transparent)]
	Io(#[from] io::Error),
}

/// Outcome of a successful negotiation.
#[derive(Debug)]
pub struct Negotiated {
	/// The agreed protocol id.
	pub protocol: String,
	/// Bytes read past the final negotiation message.
	pub remainder: Bytes,
}

/// Buffered message framing over a borrowed byte stream.
///
/// All reads go through an internal buffer; whatever is left in the buffer
/// when negotiation finishes is the remainder the caller must replay.
struct Framing<'a, S> {
	io: &'a mut S,
	buffer: BytesMut,
}

impl<'a, S: AsyncRead + AsyncWrite + Send + Unpin> Framing<'a, S> {
	fn new(io: &'a mut S) -> Self {
		Framing { io, buffer: BytesMut::new() }
	}

	async fn fill(&mut self) -> Result<(), NegotiationError> {
		let mut chunk = [0u8; READ_CHUNK];
		let n = self.io.read(&mut chunk).await?;
		if n == 0 {
			return Err(NegotiationError::ConnectionClosed)
		}
		self.buffer.extend_from_slice(&chunk[..n]);
		Ok(())
	}

	async fn read_length(&mut self) -> Result<usize, NegotiationError> {
		loop {
			match unsigned_varint::decode::usize(&self.buffer) {
				Ok((len, rest)) => {
					let consumed = self.buffer.len() - rest.len();
					let _ = self.buffer.split_to(consumed);
					return Ok(len)
				},
				Err(unsigned_varint::decode::Error::Insufficient) => self.fill().await?,
				Err(_) => return Err(NegotiationError::InvalidVarint),
			}
		}
	}

	async fn read_line(&mut self) -> Result<String, NegotiationError> {
		let len = self.read_length().await?;
		if len > MAX_MESSAGE_SIZE {
			return Err(NegotiationError::OversizedMessage(len))
		}
		if len == 0 {
			return Err(NegotiationError::ProtocolMismatch { received: String::new() })
		}
		while self.buffer.len() < len {
			self.fill().await?;
		}
		let mut line = self.buffer.split_to(len);
		match line.last() {
			Some(b'\n') => {
				line.truncate(len - 1);
			},
			_ =>
				return Err(NegotiationError::ProtocolMismatch {
					received: String::from_utf8_lossy(&line).into_owned(),
				}),
		}
		String::from_utf8(line.to_vec()).map_err(|e| NegotiationError::ProtocolMismatch {
			received: String::from_utf8_lossy(e.as_bytes()).into_owned(),
		})
	}

	async fn write_line(&mut self, line: &str) -> Result<(), NegotiationError> {
		self.queue_line(line).await?;
		self.io.flush().await?;
		Ok(())
	}

	/// Writes a message without flushing, so several can share one packet.
	async fn queue_line(&mut self, line: &str) -> Result<(), NegotiationError> {
		let mut len_buf = unsigned_varint::encode::usize_buffer();
		let len = unsigned_varint::encode::usize(line.len() + 1, &mut len_buf);
		self.io.write_all(len).await?;
		self.io.write_all(line.as_bytes()).await?;
		self.io.write_all(b"\n").await?;
		Ok(())
	}

	fn into_remainder(self) -> Bytes {
		self.buffer.freeze()
	}
}

/// Initiator-side negotiation: propose `proposed` in order until the
/// responder echoes one back.
pub async fn negotiate<S>(
	io: &mut S,
	proposed: &[String],
) -> Result<Negotiated, NegotiationError>
where
	S: AsyncRead + AsyncWrite + Send + Unpin,
{
	let mut framing = Framing::new(io);
	framing.write_line(HEADER_LINE).await?;
	expect_header(framing.read_line().await?)?;

	for protocol in proposed {
		framing.write_line(protocol).await?;
		let reply = framing.read_line().await?;
		if reply == *protocol {
			return Ok(Negotiated { protocol: reply, remainder: framing.into_remainder() })
		}
		if reply != NOT_AVAILABLE {
			return Err(NegotiationError::ProtocolMismatch { received: reply })
		}
	}
	Err(NegotiationError::NoProtocolMatched)
}

/// Optimistic initiator-side negotiation: the header and the first
/// (preferred) proposal are sent in one flush before reading anything.
pub async fn negotiate_lazy<S>(
	io: &mut S,
	proposed: &[String],
) -> Result<Negotiated, NegotiationError>
where
	S: AsyncRead + AsyncWrite + Send + Unpin,
{
	let first = proposed.first().ok_or(NegotiationError::NoProtocolMatched)?;
	let mut framing = Framing::new(io);
	framing.queue_line(HEADER_LINE).await?;
	framing.queue_line(first).await?;
	framing.io.flush().await?;

	expect_header(framing.read_line().await?)?;
	let reply = framing.read_line().await?;
	if reply == *first {
		return Ok(Negotiated { protocol: reply, remainder: framing.into_remainder() })
	}
	if reply != NOT_AVAILABLE {
		return Err(NegotiationError::ProtocolMismatch { received: reply })
	}

	for protocol in &proposed[1..] {
		framing.write_line(protocol).await?;
		let reply = framing.read_line().await?;
		if reply == *protocol {
			return Ok(Negotiated { protocol: reply, remainder: framing.into_remainder() })
		}
		if reply != NOT_AVAILABLE {
			return Err(NegotiationError::ProtocolMismatch { received: reply })
		}
	}
	Err(NegotiationError::NoProtocolMatched)
}

/// Responder-side negotiation: echo the first supported proposal, answer
/// `na` to the rest.
pub async fn handle<S>(
	io: &mut S,
	supported: &[String],
) -> Result<Negotiated, NegotiationError>
where
	S: AsyncRead + AsyncWrite + Send + Unpin,
{
	let mut framing = Framing::new(io);
	framing.write_line(HEADER_LINE).await?;
	expect_header(framing.read_line().await?)?;

	loop {
		let proposal = framing.read_line().await?;
		if supported.iter().any(|s| *s == proposal) {
			framing.write_line(&proposal).await?;
			return Ok(Negotiated { protocol: proposal, remainder: framing.into_remainder() })
		}
		log::trace!(target: "mesh-core", "Rejecting unsupported protocol proposal {proposal}");
		framing.write_line(NOT_AVAILABLE).await?;
	}
}

fn expect_header(line: String) -> Result<(), NegotiationError> {
	if line == HEADER_LINE {
		Ok(())
	} else {
		Err(NegotiationError::ProtocolMismatch { received: line })
	}
}

/// A transparent stream wrapper replaying buffered bytes before delegating
/// reads to the underlying stream. Writes pass straight through.
#[pin_project]
pub struct Remainder<S> {
	#[pin]
	inner: S,
	buffer: Bytes,
}

impl<S> Remainder<S> {
	/// Wraps `inner` so that `remainder` is returned by the next read(s).
	pub fn new(inner: S, remainder: Bytes) -> Self {
		Remainder { inner, buffer: remainder }
	}

	/// Takes whatever replay bytes are still pending.
	pub fn drain_remainder(&mut self) -> Bytes {
		std::mem::take(&mut self.buffer)
	}

	pub fn into_inner(self) -> S {
		self.inner
	}

	pub fn get_ref(&self) -> &S {
		&self.inner
	}
}

impl<S: AsyncRead> AsyncRead for Remainder<S> {
	fn poll_read(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut [u8],
	) -> Poll<io::Result<usize>> {
		let this = self.project();
		if !this.buffer.is_empty() {
			let n = this.buffer.len().min(buf.len());
			buf[..n].copy_from_slice(&this.buffer[..n]);
			let _ = this.buffer.split_to(n);
			return Poll::Ready(Ok(n))
		}
		this.inner.poll_read(cx, buf)
	}
}

impl<S: AsyncWrite> AsyncWrite for Remainder<S> {
	fn poll_write(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &[u8],
	) -> Poll<io::Result<usize>> {
		self.project().inner.poll_write(cx, buf)
	}

	fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		self.project().inner.poll_flush(cx)
	}

	fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		self.project().inner.poll_close(cx)
	}
}

impl<S: crate::connection::RawConnection> crate::connection::RawConnection for Remainder<S> {
	fn local_addr(&self) -> crate::multiaddr::Multiaddr {
		self.inner.local_addr()
	}

	fn remote_addr(&self) -> crate::multiaddr::Multiaddr {
		self.inner.remote_addr()
	}
}

#[async_trait::async_trait]
impl<S: crate::connection::MuxedStream> crate::connection::MuxedStream for Remainder<S> {
	async fn close_write(&mut self) -> io::Result<()> {
		self.inner.close_write().await
	}

	async fn close_read(&mut self) -> io::Result<()> {
		self.inner.close_read().await
	}

	async fn reset(&mut self) -> io::Result<()> {
		// Replay bytes are meaningless once the stream is torn down.
		self.buffer = Bytes::new();
		self.inner.reset().await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use futures::io::Cursor;

	fn frame(line: &str) -> Vec<u8> {
		let mut out = Vec::new();
		let mut len_buf = unsigned_varint::encode::usize_buffer();
		out.extend_from_slice(unsigned_varint::encode::usize(line.len() + 1, &mut len_buf));
		out.extend_from_slice(line.as_bytes());
		out.push(b'\n');
		out
	}

	/// An in-memory duplex: reads from `input`, collects writes.
	struct Duplex {
		input: Cursor<Vec<u8>>,
		written: Vec<u8>,
	}

	impl Duplex {
		fn new(input: Vec<u8>) -> Self {
			Duplex { input: Cursor::new(input), written: Vec::new() }
		}
	}

	impl AsyncRead for Duplex {
		fn poll_read(
			mut self: Pin<&mut Self>,
			cx: &mut Context<'_>,
			buf: &mut [u8],
		) -> Poll<io::Result<usize>> {
			Pin::new(&mut self.input).poll_read(cx, buf)
		}
	}

	impl AsyncWrite for Duplex {
		fn poll_write(
			mut self: Pin<&mut Self>,
			_: &mut Context<'_>,
			buf: &[u8],
		) -> Poll<io::Result<usize>> {
			self.written.extend_from_slice(buf);
			Poll::Ready(Ok(buf.len()))
		}

		fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
			Poll::Ready(Ok(()))
		}

		fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
			Poll::Ready(Ok(()))
		}
	}

	#[async_std::test]
	async fn initiator_selects_first_match() {
		let mut input = frame(HEADER_LINE);
		input.extend(frame("/echo/1.0.0"));
		let mut io = Duplex::new(input);

		let negotiated =
			negotiate(&mut io, &["/echo/1.0.0".to_owned()]).await.unwrap();
		assert_eq!(negotiated.protocol, "/echo/1.0.0");
		assert!(negotiated.remainder.is_empty());

		let mut expected = frame(HEADER_LINE);
		expected.extend(frame("/echo/1.0.0"));
		assert_eq!(io.written, expected);
	}

	#[async_std::test]
	async fn initiator_falls_back_after_na() {
		let mut input = frame(HEADER_LINE);
		input.extend(frame(NOT_AVAILABLE));
		input.extend(frame("/fallback/1.0.0"));
		let mut io = Duplex::new(input);

		let negotiated = negotiate(
			&mut io,
			&["/preferred/1.0.0".to_owned(), "/fallback/1.0.0".to_owned()],
		)
		.await
		.unwrap();
		assert_eq!(negotiated.protocol, "/fallback/1.0.0");
	}

	#[async_std::test]
	async fn initiator_reports_no_match() {
		let mut input = frame(HEADER_LINE);
		input.extend(frame(NOT_AVAILABLE));
		let mut io = Duplex::new(input);

		let err = negotiate(&mut io, &["/one/1.0.0".to_owned()]).await.unwrap_err();
		assert!(matches!(err, NegotiationError::NoProtocolMatched));
	}

	#[async_std::test]
	async fn responder_echoes_supported_proposal() {
		let mut input = frame(HEADER_LINE);
		input.extend(frame("/unknown/1.0.0"));
		input.extend(frame("/known/1.0.0"));
		let mut io = Duplex::new(input);

		let negotiated = handle(&mut io, &["/known/1.0.0".to_owned()]).await.unwrap();
		assert_eq!(negotiated.protocol, "/known/1.0.0");

		let mut expected = frame(HEADER_LINE);
		expected.extend(frame(NOT_AVAILABLE));
		expected.extend(frame("/known/1.0.0"));
		assert_eq!(io.written, expected);
	}

	#[async_std::test]
	async fn remainder_surfaces_tail_bytes() {
		let mut input = frame(HEADER_LINE);
		input.extend(frame("/echo/1.0.0"));
		input.extend_from_slice(b"tail bytes that belong to the next layer");
		let mut io = Duplex::new(input);

		let negotiated = negotiate(&mut io, &["/echo/1.0.0".to_owned()]).await.unwrap();
		// The tail must come back out of the remainder plus subsequent reads,
		// in order, with nothing lost.
		let mut wrapped = Remainder::new(io, negotiated.remainder);
		let mut tail = Vec::new();
		wrapped.read_to_end(&mut tail).await.unwrap();
		assert_eq!(tail, b"tail bytes that belong to the next layer");
	}

	#[async_std::test]
	async fn oversized_message_is_rejected() {
		let mut input = Vec::new();
		let mut len_buf = unsigned_varint::encode::usize_buffer();
		input.extend_from_slice(unsigned_varint::encode::usize(
			MAX_MESSAGE_SIZE + 1,
			&mut len_buf,
		));
		let mut io = Duplex::new(input);

		let err = negotiate(&mut io, &["/x/1".to_owned()]).await.unwrap_err();
		assert!(matches!(err, NegotiationError::OversizedMessage(_)));
	}

	#[async_std::test]
	async fn truncated_stream_is_connection_closed() {
		let mut input = frame(HEADER_LINE);
		input.truncate(input.len() - 3);
		let mut io = Duplex::new(input);

		let err = negotiate(&mut io, &["/x/1".to_owned()]).await.unwrap_err();
		assert!(matches!(err, NegotiationError::ConnectionClosed));
	}

	#[async_std::test]
	async fn lazy_negotiation_batches_header_and_proposal() {
		let mut input = frame(HEADER_LINE);
		input.extend(frame("/echo/1.0.0"));
		let mut io = Duplex::new(input);

		let negotiated =
			negotiate_lazy(&mut io, &["/echo/1.0.0".to_owned()]).await.unwrap();
		assert_eq!(negotiated.protocol, "/echo/1.0.0");
	}
}
