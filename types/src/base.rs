//! Fundamental types shared across the system: account addresses, object
//! identifiers, and primitive aliases for epochs and timestamps.

use std::fmt;
use std::str::FromStr;

use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::TidalError;

/// Timestamp in milliseconds.
pub type TimestampMs = u64;

/// The epoch counter. 32 bits covers centuries of epochs at the configured
/// epoch duration.
pub type EpochId = u32;

/// Stake, capacity, and payment amounts are all denominated in u64.
pub type StakeUnit = u64;

/// One TIDE in base units (drops).
pub const DROPS_PER_TIDE: u64 = 1_000_000_000;

/// A 32-byte account address. Addresses identify stakers, pool operators,
/// and payment recipients. Key material and signature verification live
/// outside this crate; an address here is an opaque, pre-validated identity.
#[derive(
    Eq, PartialEq, Ord, PartialOrd, Copy, Clone, Hash, Default, Serialize, Deserialize,
)]
pub struct TidalAddress([u8; Self::LENGTH]);

impl TidalAddress {
    pub const LENGTH: usize = 32;
    pub const ZERO: Self = Self([0u8; Self::LENGTH]);

    pub const fn new(bytes: [u8; Self::LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn random() -> Self {
        let mut bytes = [0u8; Self::LENGTH];
        OsRng.fill(&mut bytes);
        Self(bytes)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for TidalAddress {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for TidalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TidalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps epoch-change logs readable.
        write!(f, "0x{}..", hex::encode(&self.0[..4]))
    }
}

impl FromStr for TidalAddress {
    type Err = TidalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|_| TidalError::InvalidAddress)?;
        let bytes: [u8; Self::LENGTH] =
            bytes.try_into().map_err(|_| TidalError::InvalidAddress)?;
        Ok(Self(bytes))
    }
}

/// Identifier for a storage-node operator. A node is addressed by its
/// operator account throughout the committee and staking machinery.
pub type NodeId = TidalAddress;

/// Deterministic address for tests: byte `b` repeated in the low word.
pub fn dbg_addr(b: u8) -> TidalAddress {
    let mut bytes = [0u8; TidalAddress::LENGTH];
    bytes[TidalAddress::LENGTH - 1] = b;
    TidalAddress::new(bytes)
}

/// A 32-byte identifier for owned records (staking pools, storage
/// reservations).
#[derive(
    Eq, PartialEq, Ord, PartialOrd, Copy, Clone, Hash, Default, Serialize, Deserialize,
)]
pub struct ObjectID([u8; Self::LENGTH]);

impl ObjectID {
    pub const LENGTH: usize = 32;
    pub const ZERO: Self = Self([0u8; Self::LENGTH]);

    pub const fn new(bytes: [u8; Self::LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn random() -> Self {
        let mut bytes = [0u8; Self::LENGTH];
        OsRng.fill(&mut bytes);
        Self(bytes)
    }
}

impl fmt::Display for ObjectID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ObjectID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}..", hex::encode(&self.0[..4]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_hex_roundtrip() {
        let addr = TidalAddress::random();
        let parsed: TidalAddress = addr.to_string().parse().unwrap();
        assert_eq!(addr, parsed);
    }

    #[test]
    fn address_rejects_bad_hex() {
        assert!("0xzz".parse::<TidalAddress>().is_err());
        assert!("0x0011".parse::<TidalAddress>().is_err());
    }

    #[test]
    fn dbg_addr_is_stable() {
        assert_eq!(dbg_addr(7), dbg_addr(7));
        assert_ne!(dbg_addr(7), dbg_addr(8));
    }
}
