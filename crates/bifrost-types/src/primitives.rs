// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::chain::Chain;

/// A chain-encoded address (bech32, hex or base58).
///
/// Only the character set is validated here; the chain adapters own the
/// actual encodings.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Validates and wraps an address.
    pub fn new(addr: &str) -> crate::Result<Self> {
        let addr = addr.trim();
        if addr.is_empty() {
            return Err(crate::Error::NoAddress);
        }
        if !addr.chars().all(|c| c.is_ascii_alphanumeric() || c == ':') {
            return Err(crate::Error::InvalidAddress(addr.to_string()));
        }
        Ok(Self(addr.to_string()))
    }

    /// The empty address.
    pub fn empty() -> Self {
        Self(String::new())
    }

    /// Whether the address is empty.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Whether the address is encoded for the given chain.
    pub fn is_chain(&self, chain: Chain) -> bool {
        chain.is_address_of(&self.0)
    }

    /// Case-insensitive comparison, hex addresses may differ in checksum
    /// casing.
    pub fn equals(&self, other: &Address) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }

    /// The underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// A bech32 encoded public key (`thorpub1...`).
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PubKey(String);

impl PubKey {
    /// Wraps a public key string.
    pub fn new(pk: impl Into<String>) -> Self {
        Self(pk.into())
    }

    /// The empty public key.
    pub fn empty() -> Self {
        Self(String::new())
    }

    /// Whether the key is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PubKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// The key pair components of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PubKeySet {
    /// secp256k1 component.
    #[serde(default)]
    pub secp256k1: PubKey,
    /// ed25519 component.
    #[serde(default)]
    pub ed25519: PubKey,
}

/// A transaction id, uniquely identifying a transaction on its chain.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TxId(String);

impl TxId {
    /// The all-zero transaction id.
    pub const BLANK: &'static str =
        "0000000000000000000000000000000000000000000000000000000000000000";

    /// Parses a 64 character hash, or a 66 character `0x` prefixed one.
    pub fn new(hash: &str) -> crate::Result<Self> {
        match hash.len() {
            64 => {}
            66 if hash.starts_with("0x") => {}
            66 => {
                return Err(crate::Error::InvalidTxId(format!(
                    "must be 66 characters (got {})",
                    hash.len()
                )))
            }
            n => {
                return Err(crate::Error::InvalidTxId(format!(
                    "must be 64 characters (got {n})"
                )))
            }
        }
        Ok(Self(hash.to_uppercase()))
    }

    /// The blank transaction id.
    pub fn blank() -> Self {
        Self(Self::BLANK.to_string())
    }

    /// Whether the id is empty.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Case-insensitive comparison.
    pub fn equals(&self, other: &TxId) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }

    /// The underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TxId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_validation() {
        assert_eq!(Address::new(""), Err(crate::Error::NoAddress));
        assert!(Address::new("bnb1abc!").is_err());
        assert!(Address::new("bitcoincash:qpm2qsznhks23z7629mms6s4cwef74vcwvy22gdx6a").is_ok());
    }

    #[test]
    fn tx_id_lengths() {
        let h = "a".repeat(64);
        assert_eq!(TxId::new(&h).unwrap().as_str(), "A".repeat(64));
        let eth = format!("0x{}", "b".repeat(64));
        assert!(TxId::new(&eth).is_ok());
        assert!(TxId::new(&"c".repeat(66)).is_err());
        assert!(TxId::new("abc").is_err());
    }
}
