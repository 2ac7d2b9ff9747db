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

//! The stream-multiplexer contract.

pub mod plex;

use async_trait::async_trait;
use std::io;

use crate::{connection::MuxedConnection, security::SecuredConnection};

/// Turns a secured byte stream into a multiplexed connection.
#[async_trait]
pub trait Muxer: Send + Sync {
	/// The protocol id negotiated for this muxer.
	fn protocol_id(&self) -> &str;

	/// Starts multiplexing. `is_initiator` decides stream-id parity so the
	/// two sides never allocate colliding ids.
	async fn multiplex(
		&self,
		secured: SecuredConnection,
		is_initiator: bool,
	) -> io::Result<Box<dyn MuxedConnection>>;
}
