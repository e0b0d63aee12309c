//! Peer identity: `name@ipv4`, where the address doubles as the unicast target.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::ProtocolError;

/// A user identifier as carried in USER_ID / FROM / TO.
///
/// Identities arriving from the wire are kept verbatim (`from_wire`) so a
/// malformed address only matters when we try to reply. Identities entered
/// locally go through `parse`, which insists on a valid IPv4 segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(String);

impl UserId {
    pub fn parse(s: &str) -> Result<Self, ProtocolError> {
        let s = s.trim();
        let (name, ip) = s
            .rsplit_once('@')
            .ok_or_else(|| ProtocolError::InvalidUserId(s.to_string()))?;
        if name.is_empty() || ip.parse::<Ipv4Addr>().is_err() {
            return Err(ProtocolError::InvalidUserId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn from_wire(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part before `@`.
    pub fn name(&self) -> &str {
        self.0.rsplit_once('@').map(|(n, _)| n).unwrap_or(&self.0)
    }

    /// Unicast address of this peer, if the identity carries one.
    pub fn ip(&self) -> Option<Ipv4Addr> {
        self.0
            .rsplit_once('@')
            .and_then(|(_, ip)| ip.parse().ok())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UserId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
