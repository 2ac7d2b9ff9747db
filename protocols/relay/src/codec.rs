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

//! Length-prefixed protobuf frames on relay substreams.

use futures::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};
use std::io;

/// Control frames are tiny; anything bigger is a protocol violation.
pub const MAX_MESSAGE_SIZE: usize = 4096;

/// Reads one unsigned-varint length-prefixed message.
pub async fn read_message<M, S>(io: &mut S) -> io::Result<M>
where
	M: prost::Message + Default,
	S: AsyncRead + Send + Unpin,
{
	let len = unsigned_varint::aio::read_usize(&mut *io)
		.await
		.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
	if len > MAX_MESSAGE_SIZE {
		return Err(io::Error::new(
			io::ErrorKind::InvalidData,
			format!("relay message of {len} bytes exceeds the {MAX_MESSAGE_SIZE} byte cap"),
		))
	}
	let mut buf = vec![0u8; len];
	io.read_exact(&mut buf).await?;
	M::decode(&buf[..]).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Writes one unsigned-varint length-prefixed message and flushes.
pub async fn write_message<M, S>(io: &mut S, message: &M) -> io::Result<()>
where
	M: prost::Message,
	S: AsyncWrite + Send + Unpin,
{
	let bytes = message.encode_to_vec();
	let mut len_buf = unsigned_varint::encode::usize_buffer();
	io.write_all(unsigned_varint::encode::usize(bytes.len(), &mut len_buf)).await?;
	io.write_all(&bytes).await?;
	io.flush().await?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::message::{HopMessage, Status};
	use futures::io::Cursor;

	#[async_std::test]
	async fn frame_roundtrip() {
		let mut buf = Vec::new();
		write_message(&mut buf, &HopMessage::status_message(Status::Ok)).await.unwrap();

		let mut cursor = Cursor::new(buf);
		let decoded: HopMessage = read_message(&mut cursor).await.unwrap();
		assert_eq!(decoded, HopMessage::status_message(Status::Ok));
	}

	#[async_std::test]
	async fn oversized_frame_is_rejected() {
		let mut buf = Vec::new();
		let mut len_buf = unsigned_varint::encode::usize_buffer();
		buf.extend_from_slice(unsigned_varint::encode::usize(
			MAX_MESSAGE_SIZE + 1,
			&mut len_buf,
		));
		let mut cursor = Cursor::new(buf);
		let err = read_message::<HopMessage, _>(&mut cursor).await.unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::InvalidData);
	}
}
