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

//! The connection upgrade pipeline: raw → secured → muxed.
//!
//! Two multistream-select rounds run over the same byte stream, one for the
//! security protocol and one for the muxer. Bytes read past either
//! negotiation are replayed into the next layer through
//! [`Remainder`](crate::multistream::Remainder), so the pipeline never loses
//! read-ahead bytes at a layer boundary. A security upgrader that embeds
//! muxer selection in its handshake short-circuits the second round.

use std::sync::Arc;

use crate::{
	connection::{BoxedRaw, MuxedConnection},
	multistream::{self, NegotiationError},
	muxing::Muxer,
	security::{Role, SecuredConnection, SecurityError, SecurityUpgrader},
};
use mesh_identity::{Keypair, PeerId};

/// Failure modes of the upgrade pipeline.
#[derive(Debug, thiserror::Error)]
pub enum UpgradeError {
	#[error("no security upgraders configured")]
	NoSecurityUpgraders,
	#[error("no muxers configured")]
	NoMuxers,
	#[error("security negotiation failed ({protocols:?}): {source}")]
	SecurityNegotiation { protocols: Vec<String>, source: NegotiationError },
	#[error("muxer negotiation failed ({protocols:?}): {source}")]
	MuxerNegotiation { protocols: Vec<String>, source: NegotiationError },
	#[error("security handshake failed: {0}")]
	Security(#[from] SecurityError),
	#[error("connection closed during upgrade")]
	ConnectionClosed,
	#[error("negotiation message too large")]
	MessageTooLarge,
	#[error("malformed varint during upgrade")]
	InvalidVarint,
	#[error("muxer setup failed: {0}")]
	Muxing(#[from] std::io::Error),
}

/// A fully upgraded connection, plus which protocols got it there.
pub struct Upgraded {
	pub muxed: Box<dyn MuxedConnection>,
	pub security_id: String,
	pub muxer_id: String,
}

/// Drives raw connections through security and muxer negotiation.
pub struct Upgrader {
	securities: Vec<Arc<dyn SecurityUpgrader>>,
	muxers: Vec<Arc<dyn Muxer>>,
}

impl Upgrader {
	/// An upgrader negotiating among the given upgraders and muxers, in
	/// preference order.
	pub fn new(
		securities: Vec<Arc<dyn SecurityUpgrader>>,
		muxers: Vec<Arc<dyn Muxer>>,
	) -> Self {
		Upgrader { securities, muxers }
	}

	/// The security protocol ids, in preference order.
	pub fn security_protocols(&self) -> Vec<String> {
		self.securities.iter().map(|s| s.protocol_id().to_owned()).collect()
	}

	/// The muxer protocol ids, in preference order.
	pub fn muxer_protocols(&self) -> Vec<String> {
		self.muxers.iter().map(|m| m.protocol_id().to_owned()).collect()
	}

	/// Upgrades `raw` as `role`, enforcing `expected_peer` when known.
	pub async fn upgrade(
		&self,
		mut raw: BoxedRaw,
		keypair: &Keypair,
		role: Role,
		expected_peer: Option<PeerId>,
	) -> Result<Upgraded, UpgradeError> {
		if self.securities.is_empty() {
			return Err(UpgradeError::NoSecurityUpgraders)
		}
		if self.muxers.is_empty() {
			return Err(UpgradeError::NoMuxers)
		}

		// Round one: pick the security protocol.
		let security_ids = self.security_protocols();
		let negotiated = match role {
			Role::Initiator => multistream::negotiate(&mut raw, &security_ids).await,
			Role::Responder => multistream::handle(&mut raw, &security_ids).await,
		}
		.map_err(|source| map_negotiation(source, security_ids.clone(), true))?;

		let security = self
			.securities
			.iter()
			.find(|s| s.protocol_id() == negotiated.protocol)
			.expect("negotiated protocol comes from the proposed set; qed")
			.clone();
		let security_id = negotiated.protocol;
		let raw: BoxedRaw = Box::new(multistream::Remainder::new(raw, negotiated.remainder));

		// Handshake, possibly with embedded muxer selection.
		let muxer_ids = self.muxer_protocols();
		let (secured, early_muxer) = if security.supports_early_muxer() {
			security
				.secure_with_early_muxer(raw, keypair, role, expected_peer, &muxer_ids)
				.await?
		} else {
			let secured = security.secure(raw, keypair, role, expected_peer).await?;
			(secured, None)
		};

		// Round two, unless the handshake already settled on a muxer.
		let (muxer_id, secured) = match early_muxer {
			Some(id) => (id, secured),
			None => {
				let SecuredConnection { mut io, local_peer, remote_peer } = secured;
				let negotiated = match role {
					Role::Initiator => multistream::negotiate(&mut io, &muxer_ids).await,
					Role::Responder => multistream::handle(&mut io, &muxer_ids).await,
				}
				.map_err(|source| map_negotiation(source, muxer_ids.clone(), false))?;
				let io: BoxedRaw =
					Box::new(multistream::Remainder::new(io, negotiated.remainder));
				(negotiated.protocol, SecuredConnection { io, local_peer, remote_peer })
			},
		};

		let muxer = self
			.muxers
			.iter()
			.find(|m| m.protocol_id() == muxer_id)
			.ok_or_else(|| UpgradeError::MuxerNegotiation {
				protocols: muxer_ids,
				source: NegotiationError::NoProtocolMatched,
			})?
			.clone();

		log::debug!(
			target: "mesh-core",
			"Upgraded connection to {} (security {security_id}, muxer {muxer_id})",
			secured.remote_peer,
		);
		let muxed = muxer.multiplex(secured, role.is_initiator()).await?;
		Ok(Upgraded { muxed, security_id, muxer_id })
	}
}

fn map_negotiation(
	source: NegotiationError,
	protocols: Vec<String>,
	security: bool,
) -> UpgradeError {
	match source {
		NegotiationError::ConnectionClosed => UpgradeError::ConnectionClosed,
		NegotiationError::OversizedMessage(_) => UpgradeError::MessageTooLarge,
		NegotiationError::InvalidVarint => UpgradeError::InvalidVarint,
		source if security => UpgradeError::SecurityNegotiation { protocols, source },
		source => UpgradeError::MuxerNegotiation { protocols, source },
	}
}
