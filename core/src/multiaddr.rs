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

//! Self-describing network addresses.
//!
//! A [`Multiaddr`] is an ordered sequence of protocol components such as
//! `/ip4/127.0.0.1/tcp/4001/p2p/<peer>`. Component order is preserved and
//! two addresses are equal iff their component sequences are equal.

use std::{
	fmt,
	net::{Ipv4Addr, Ipv6Addr},
	str::FromStr,
};

use mesh_identity::PeerId;

/// A single protocol component of a [`Multiaddr`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Protocol {
	Ip4(Ipv4Addr),
	Ip6(Ipv6Addr),
	Tcp(u16),
	Udp(u16),
	Dns(String),
	Dns4(String),
	Dns6(String),
	Ws,
	Wss,
	QuicV1,
	P2pCircuit,
	P2p(PeerId),
	Memory(u64),
}

impl Protocol {
	/// The textual name of this component.
	pub fn name(&self) -> &'static str {
		match self {
			Protocol::Ip4(_) => "ip4",
			Protocol::Ip6(_) => "ip6",
			Protocol::Tcp(_) => "tcp",
			Protocol::Udp(_) => "udp",
			Protocol::Dns(_) => "dns",
			Protocol::Dns4(_) => "dns4",
			Protocol::Dns6(_) => "dns6",
			Protocol::Ws => "ws",
			Protocol::Wss => "wss",
			Protocol::QuicV1 => "quic-v1",
			Protocol::P2pCircuit => "p2p-circuit",
			Protocol::P2p(_) => "p2p",
			Protocol::Memory(_) => "memory",
		}
	}
}

impl fmt::Display for Protocol {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Protocol::Ip4(a) => write!(f, "/ip4/{a}"),
			Protocol::Ip6(a) => write!(f, "/ip6/{a}"),
			Protocol::Tcp(p) => write!(f, "/tcp/{p}"),
			Protocol::Udp(p) => write!(f, "/udp/{p}"),
			Protocol::Dns(h) => write!(f, "/dns/{h}"),
			Protocol::Dns4(h) => write!(f, "/dns4/{h}"),
			Protocol::Dns6(h) => write!(f, "/dns6/{h}"),
			Protocol::Ws => write!(f, "/ws"),
			Protocol::Wss => write!(f, "/wss"),
			Protocol::QuicV1 => write!(f, "/quic-v1"),
			Protocol::P2pCircuit => write!(f, "/p2p-circuit"),
			Protocol::P2p(id) => write!(f, "/p2p/{id}"),
			Protocol::Memory(id) => write!(f, "/memory/{id}"),
		}
	}
}

/// Error parsing a [`Multiaddr`] from text.
#[derive(Debug, thiserror::Error)]
pub enum MultiaddrError {
	#[error("multiaddr must start with '/'")]
	MissingLeadingSlash,
	#[error("unknown protocol `{0}`")]
	UnknownProtocol(String),
	#[error("protocol `{0}` is missing its value")]
	MissingValue(&'static str),
	#[error("invalid value for `{proto}`: {value}")]
	InvalidValue { proto: &'static str, value: String },
}

/// An ordered sequence of [`Protocol`] components.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Multiaddr {
	components: Vec<Protocol>,
}

impl Multiaddr {
	/// An address with no components.
	pub fn empty() -> Self {
		Multiaddr { components: Vec::new() }
	}

	/// Appends a component, returning the extended address.
	pub fn with(mut self, p: Protocol) -> Self {
		self.components.push(p);
		self
	}

	/// Appends a component in place.
	pub fn push(&mut self, p: Protocol) {
		self.components.push(p);
	}

	/// Iterates over the components in order.
	pub fn iter(&self) -> impl Iterator<Item = &Protocol> {
		self.components.iter()
	}

	pub fn is_empty(&self) -> bool {
		self.components.is_empty()
	}

	pub fn len(&self) -> usize {
		self.components.len()
	}

	/// The trailing `/p2p/<peer>` component, if present.
	pub fn peer_id(&self) -> Option<PeerId> {
		match self.components.last() {
			Some(Protocol::P2p(id)) => Some(*id),
			_ => None,
		}
	}

	/// This address without a trailing `/p2p/<peer>` component.
	pub fn without_peer_id(&self) -> Multiaddr {
		let mut components = self.components.clone();
		if let Some(Protocol::P2p(_)) = components.last() {
			components.pop();
		}
		Multiaddr { components }
	}

	/// This address with `/p2p/<peer>` appended, replacing any existing one.
	pub fn with_peer_id(&self, peer: PeerId) -> Multiaddr {
		self.without_peer_id().with(Protocol::P2p(peer))
	}

	/// Whether any component is `p2p-circuit`, i.e. the path crosses a relay.
	pub fn is_circuit(&self) -> bool {
		self.components.iter().any(|c| matches!(c, Protocol::P2pCircuit))
	}

	/// Whether the address starts with the components of `prefix`.
	pub fn starts_with(&self, prefix: &Multiaddr) -> bool {
		self.components.len() >= prefix.components.len() &&
			self.components[..prefix.components.len()] == prefix.components[..]
	}

	/// Whether the leading component binds an unspecified interface
	/// (`0.0.0.0` or `::`).
	pub fn is_unspecified(&self) -> bool {
		match self.components.first() {
			Some(Protocol::Ip4(a)) => a.is_unspecified(),
			Some(Protocol::Ip6(a)) => a.is_unspecified(),
			_ => false,
		}
	}

	/// Replaces the leading IP component, keeping the rest of the address.
	pub fn with_ip(&self, ip: std::net::IpAddr) -> Multiaddr {
		let mut components = self.components.clone();
		if !components.is_empty() {
			match ip {
				std::net::IpAddr::V4(a) => components[0] = Protocol::Ip4(a),
				std::net::IpAddr::V6(a) => components[0] = Protocol::Ip6(a),
			}
		}
		Multiaddr { components }
	}
}

impl fmt::Display for Multiaddr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for c in &self.components {
			write!(f, "{c}")?;
		}
		Ok(())
	}
}

impl fmt::Debug for Multiaddr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "\"{self}\"")
	}
}

impl FromIterator<Protocol> for Multiaddr {
	fn from_iter<T: IntoIterator<Item = Protocol>>(iter: T) -> Self {
		Multiaddr { components: iter.into_iter().collect() }
	}
}

impl From<Protocol> for Multiaddr {
	fn from(p: Protocol) -> Self {
		Multiaddr { components: vec![p] }
	}
}

impl FromStr for Multiaddr {
	type Err = MultiaddrError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.is_empty() {
			return Ok(Multiaddr::empty())
		}
		let mut parts = match s.strip_prefix('/') {
			Some(rest) => rest.split('/'),
			None => return Err(MultiaddrError::MissingLeadingSlash),
		};
		let mut components = Vec::new();

		fn value<'a>(
			parts: &mut std::str::Split<'a, char>,
			proto: &'static str,
		) -> Result<&'a str, MultiaddrError> {
			parts.next().filter(|v| !v.is_empty()).ok_or(MultiaddrError::MissingValue(proto))
		}

		fn parsed<T: FromStr>(proto: &'static str, value: &str) -> Result<T, MultiaddrError> {
			value.parse().map_err(|_| MultiaddrError::InvalidValue {
				proto,
				value: value.to_owned(),
			})
		}

		while let Some(name) = parts.next() {
			if name.is_empty() {
				continue
			}
			let component = match name {
				"ip4" => Protocol::Ip4(parsed("ip4", value(&mut parts, "ip4")?)?),
				"ip6" => Protocol::Ip6(parsed("ip6", value(&mut parts, "ip6")?)?),
				"tcp" => Protocol::Tcp(parsed("tcp", value(&mut parts, "tcp")?)?),
				"udp" => Protocol::Udp(parsed("udp", value(&mut parts, "udp")?)?),
				"dns" => Protocol::Dns(value(&mut parts, "dns")?.to_owned()),
				"dns4" => Protocol::Dns4(value(&mut parts, "dns4")?.to_owned()),
				"dns6" => Protocol::Dns6(value(&mut parts, "dns6")?.to_owned()),
				"ws" => Protocol::Ws,
				"wss" => Protocol::Wss,
				"quic-v1" => Protocol::QuicV1,
				"p2p-circuit" => Protocol::P2pCircuit,
				"p2p" => Protocol::P2p(parsed("p2p", value(&mut parts, "p2p")?)?),
				"memory" => Protocol::Memory(parsed("memory", value(&mut parts, "memory")?)?),
				other => return Err(MultiaddrError::UnknownProtocol(other.to_owned())),
			};
			components.push(component);
		}
		Ok(Multiaddr { components })
	}
}
