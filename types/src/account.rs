//! Account identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::hash::decode_32;
use crate::TypesError;

/// Human-readable prefix of an encoded account.
pub const ACCOUNT_PREFIX: &str = "lat_";

/// A 32-byte account identifier (the owner's public key).
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Account([u8; 32]);

impl Account {
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Encoded form: `lat_` followed by 64 lowercase hex characters.
    pub fn encode(&self) -> String {
        format!("{ACCOUNT_PREFIX}{}", hex::encode(self.0))
    }
}

impl From<u64> for Account {
    fn from(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }
}

impl FromStr for Account {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .strip_prefix(ACCOUNT_PREFIX)
            .ok_or_else(|| TypesError::InvalidAccount(s.to_string()))?;
        decode_32(body).map(Self)
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Account({}\u{2026})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
