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

//! Wire records of the circuit relay v2 protocol.
//!
//! Field tags follow the canonical libp2p schema so the frames are
//! byte-compatible with other v2 implementations. Peer ids travel as
//! multihash bytes; multiaddrs travel as their UTF-8 textual form.

/// Client-to-relay message on a hop stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HopMessage {
	#[prost(enumeration = "hop_message::Type", tag = "1")]
	pub r#type: i32,
	#[prost(message, optional, tag = "2")]
	pub peer: ::core::option::Option<Peer>,
	#[prost(message, optional, tag = "3")]
	pub reservation: ::core::option::Option<Reservation>,
	#[prost(message, optional, tag = "4")]
	pub limit: ::core::option::Option<Limit>,
	#[prost(enumeration = "Status", optional, tag = "5")]
	pub status: ::core::option::Option<i32>,
}

pub mod hop_message {
	#[derive(
		Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
	)]
	#[repr(i32)]
	pub enum Type {
		Reserve = 0,
		Connect = 1,
		Status = 2,
	}
}

/// Relay-to-target message on a stop stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StopMessage {
	#[prost(enumeration = "stop_message::Type", tag = "1")]
	pub r#type: i32,
	#[prost(message, optional, tag = "2")]
	pub peer: ::core::option::Option<Peer>,
	#[prost(message, optional, tag = "3")]
	pub limit: ::core::option::Option<Limit>,
	#[prost(enumeration = "Status", optional, tag = "4")]
	pub status: ::core::option::Option<i32>,
}

pub mod stop_message {
	#[derive(
		Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
	)]
	#[repr(i32)]
	pub enum Type {
		Connect = 0,
		Status = 1,
	}
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Peer {
	/// Multihash bytes of the peer id.
	#[prost(bytes = "vec", tag = "1")]
	pub id: ::prost::alloc::vec::Vec<u8>,
	/// Multiaddrs, textual UTF-8 form.
	#[prost(bytes = "vec", repeated, tag = "2")]
	pub addrs: ::prost::alloc::vec::Vec<::prost::alloc::vec::Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Reservation {
	/// Unix seconds at which the reservation lapses.
	#[prost(uint64, optional, tag = "1")]
	pub expire: ::core::option::Option<u64>,
	#[prost(bytes = "vec", repeated, tag = "2")]
	pub addrs: ::prost::alloc::vec::Vec<::prost::alloc::vec::Vec<u8>>,
	#[prost(bytes = "vec", optional, tag = "3")]
	pub voucher: ::core::option::Option<::prost::alloc::vec::Vec<u8>>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Limit {
	/// Seconds the circuit may live.
	#[prost(uint32, optional, tag = "1")]
	pub duration: ::core::option::Option<u32>,
	/// Bytes the circuit may relay, both directions combined.
	#[prost(uint64, optional, tag = "2")]
	pub data: ::core::option::Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Status {
	Unused = 0,
	Ok = 100,
	ReservationRefused = 200,
	ResourceLimitExceeded = 201,
	PermissionDenied = 202,
	ConnectionFailed = 203,
	NoReservation = 204,
	MalformedMessage = 400,
	UnexpectedMessage = 401,
}

impl Status {
	/// Decodes a wire value, mapping unknown codes to `Unused`.
	pub fn from_wire(value: Option<i32>) -> Status {
		value.and_then(|v| Status::try_from(v).ok()).unwrap_or(Status::Unused)
	}
}

impl HopMessage {
	pub fn reserve() -> Self {
		HopMessage {
			r#type: hop_message::Type::Reserve as i32,
			..Default::default()
		}
	}

	pub fn connect(peer: Peer) -> Self {
		HopMessage {
			r#type: hop_message::Type::Connect as i32,
			peer: Some(peer),
			..Default::default()
		}
	}

	pub fn status_message(status: Status) -> Self {
		HopMessage {
			r#type: hop_message::Type::Status as i32,
			status: Some(status as i32),
			..Default::default()
		}
	}
}

impl StopMessage {
	pub fn connect(peer: Peer, limit: Option<Limit>) -> Self {
		StopMessage {
			r#type: stop_message::Type::Connect as i32,
			peer: Some(peer),
			limit,
			..Default::default()
		}
	}

	pub fn status_message(status: Status) -> Self {
		StopMessage {
			r#type: stop_message::Type::Status as i32,
			status: Some(status as i32),
			..Default::default()
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use prost::Message as _;

	fn roundtrip<M: prost::Message + Default + PartialEq + Clone>(message: M) {
		let encoded = message.encode_to_vec();
		let decoded = M::decode(&encoded[..]).unwrap();
		assert!(message == decoded);
	}

	#[test]
	fn hop_message_roundtrips() {
		roundtrip(HopMessage::reserve());
		roundtrip(HopMessage::connect(Peer {
			id: vec![0x12, 0x20, 7, 7, 7],
			addrs: vec![b"/ip4/1.2.3.4/tcp/1".to_vec()],
		}));
		roundtrip(HopMessage::status_message(Status::ResourceLimitExceeded));
		roundtrip(HopMessage {
			r#type: hop_message::Type::Status as i32,
			peer: None,
			reservation: Some(Reservation {
				expire: Some(1_700_000_000),
				addrs: vec![b"/ip4/9.9.9.9/tcp/4001".to_vec()],
				voucher: Some(vec![1, 2, 3]),
			}),
			limit: Some(Limit { duration: Some(120), data: Some(1 << 17) }),
			status: Some(Status::Ok as i32),
		});
	}

	#[test]
	fn stop_message_roundtrips() {
		roundtrip(StopMessage::connect(
			Peer { id: vec![0x12, 0x20, 1], addrs: vec![] },
			Some(Limit { duration: Some(60), data: None }),
		));
		roundtrip(StopMessage::status_message(Status::Ok));
		roundtrip(StopMessage::status_message(Status::MalformedMessage));
	}

	#[test]
	fn status_codes_match_the_wire_protocol() {
		assert_eq!(Status::Ok as i32, 100);
		assert_eq!(Status::ReservationRefused as i32, 200);
		assert_eq!(Status::ResourceLimitExceeded as i32, 201);
		assert_eq!(Status::PermissionDenied as i32, 202);
		assert_eq!(Status::ConnectionFailed as i32, 203);
		assert_eq!(Status::NoReservation as i32, 204);
		assert_eq!(Status::MalformedMessage as i32, 400);
		assert_eq!(Status::UnexpectedMessage as i32, 401);
	}

	quickcheck::quickcheck! {
		fn limit_roundtrips(duration: Option<u32>, data: Option<u64>) -> bool {
			let limit = Limit { duration, data };
			let encoded = limit.encode_to_vec();
			Limit::decode(&encoded[..]).ok() == Some(limit)
		}

		fn reservation_roundtrips(expire: Option<u64>, voucher: Option<Vec<u8>>) -> bool {
			let reservation = Reservation { expire, addrs: vec![], voucher };
			let encoded = reservation.encode_to_vec();
			Reservation::decode(&encoded[..]).ok() == Some(reservation)
		}
	}

	#[test]
	fn unknown_status_decodes_as_unused() {
		assert_eq!(Status::from_wire(Some(999)), Status::Unused);
		assert_eq!(Status::from_wire(None), Status::Unused);
		assert_eq!(Status::from_wire(Some(100)), Status::Ok);
	}
}
