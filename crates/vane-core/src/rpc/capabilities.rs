use std::fmt;
use std::str::FromStr;

use crate::error::ClientError;
use crate::types::ServerVersion;

/// An Electrum protocol version such as `1.4.2`. Missing components are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ProtocolVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for ProtocolVersion {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ClientError::Protocol(format!("invalid protocol version `{s}`"));

        let mut parts = [0u32; 3];
        let mut count = 0;
        for component in s.trim().split('.') {
            let slot = parts.get_mut(count).ok_or_else(invalid)?;
            *slot = component.parse().map_err(|_| invalid())?;
            count += 1;
        }
        Ok(Self::new(parts[0], parts[1], parts[2]))
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// What the server agreed to during `server.version` negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub server_software: String,
    pub protocol: ProtocolVersion,
}

impl Capabilities {
    /// First protocol version whose `get_history` takes a height range.
    pub const RANGED_HISTORY: ProtocolVersion = ProtocolVersion::new(1, 5, 0);

    pub fn from_server_version(version: &ServerVersion) -> Result<Self, ClientError> {
        Ok(Self {
            server_software: version.software().to_owned(),
            protocol: version.protocol().parse()?,
        })
    }

    /// Whether `blockchain.scripthash.get_history` accepts
    /// `from_height`/`to_height` arguments.
    pub fn ranged_history(&self) -> bool {
        self.protocol >= Self::RANGED_HISTORY
    }
}
