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
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::asset::Asset;

/// A short tag identifying an external chain, or the home chain itself.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum Chain {
    /// Binance Chain (BFT, sub-second blocks).
    BNB,
    /// Binance Smart Chain.
    BSC,
    /// Ethereum.
    ETH,
    /// Bitcoin.
    BTC,
    /// Litecoin.
    LTC,
    /// Bitcoin Cash.
    BCH,
    /// Dogecoin.
    DOGE,
    /// The home chain.
    THOR,
    /// Terra.
    TERRA,
    /// Cosmos Hub.
    GAIA,
    /// Avalanche C-Chain.
    AVAX,
}

impl Chain {
    /// Every chain the daemon knows about.
    pub const ALL: [Chain; 11] = [
        Chain::BNB,
        Chain::BSC,
        Chain::ETH,
        Chain::BTC,
        Chain::LTC,
        Chain::BCH,
        Chain::DOGE,
        Chain::THOR,
        Chain::TERRA,
        Chain::GAIA,
        Chain::AVAX,
    ];

    /// The canonical upper-case tag.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Chain::BNB => "BNB",
            Chain::BSC => "BSC",
            Chain::ETH => "ETH",
            Chain::BTC => "BTC",
            Chain::LTC => "LTC",
            Chain::BCH => "BCH",
            Chain::DOGE => "DOGE",
            Chain::THOR => "THOR",
            Chain::TERRA => "TERRA",
            Chain::GAIA => "GAIA",
            Chain::AVAX => "AVAX",
        }
    }

    /// Whether this is the home chain.
    pub fn is_thor(&self) -> bool {
        matches!(self, Chain::THOR)
    }

    /// Whether this is the fast BFT chain whose observations may span
    /// consecutive blocks.
    pub fn is_bnb(&self) -> bool {
        matches!(self, Chain::BNB)
    }

    /// Account-model chains driven by smart contracts.
    pub fn is_evm(&self) -> bool {
        matches!(self, Chain::ETH | Chain::AVAX | Chain::BSC)
    }

    /// Chains following the unspent-output model.
    pub fn is_utxo(&self) -> bool {
        matches!(self, Chain::BTC | Chain::LTC | Chain::BCH | Chain::DOGE)
    }

    /// The asset used to pay fees on this chain.
    pub fn gas_asset(&self) -> Asset {
        let symbol = match self {
            Chain::THOR => "RUNE",
            Chain::BNB | Chain::BSC => "BNB",
            Chain::GAIA => "ATOM",
            Chain::TERRA => "LUNA",
            other => other.as_str(),
        };
        Asset::new(*self, symbol)
    }

    /// Amount below which a transfer is treated as dust.
    pub fn dust_threshold(&self) -> u128 {
        match self {
            Chain::BTC | Chain::LTC | Chain::BCH => 10_000,
            Chain::DOGE => 100_000_000,
            _ => 0,
        }
    }

    /// Maximum memo length accepted on this chain, `None` when unlimited.
    pub fn max_memo_length(&self) -> Option<usize> {
        self.is_utxo().then_some(80)
    }

    /// Nominal block time in milliseconds.
    pub fn approximate_block_millis(&self) -> u64 {
        match self {
            Chain::BTC | Chain::BCH => 600_000,
            Chain::LTC => 150_000,
            Chain::DOGE => 60_000,
            Chain::ETH => 12_000,
            Chain::AVAX | Chain::BSC => 3_000,
            Chain::BNB => 500,
            Chain::GAIA | Chain::TERRA | Chain::THOR => 6_000,
        }
    }

    /// Nominal block time.
    pub fn approximate_block_time(&self) -> Duration {
        Duration::from_millis(self.approximate_block_millis())
    }

    /// Whether the given address string is encoded for this chain.
    pub fn is_address_of(&self, addr: &str) -> bool {
        let lower = addr.to_lowercase();
        let has_prefix = |prefixes: &[&str]| {
            prefixes.iter().any(|p| lower.starts_with(p))
        };
        let base58_lead = |leads: &[char]| {
            addr.chars().next().map_or(false, |c| leads.contains(&c))
        };
        match self {
            Chain::ETH | Chain::AVAX | Chain::BSC => {
                lower.starts_with("0x") && addr.len() == 42
            }
            Chain::BNB => has_prefix(&["bnb1", "tbnb1"]),
            Chain::GAIA => has_prefix(&["cosmos1"]),
            Chain::TERRA => has_prefix(&["terra1"]),
            Chain::THOR => has_prefix(&["thor1", "tthor1", "sthor1"]),
            Chain::BTC => {
                has_prefix(&["bc1", "tb1", "bcrt1"])
                    || base58_lead(&['1', '3', 'm', 'n', '2'])
            }
            Chain::LTC => {
                has_prefix(&["ltc1", "tltc1", "rltc1"])
                    || base58_lead(&['L', 'M', '3', 'm', 'n', '2', 'Q'])
            }
            Chain::BCH => {
                has_prefix(&["bitcoincash:", "bchtest:", "bchreg:", "q", "p"])
                    || base58_lead(&['1', '3', 'm', 'n', '2'])
            }
            Chain::DOGE => base58_lead(&['D', 'A', '9', 'n', 'm', '2']),
        }
    }
}

impl Default for Chain {
    fn default() -> Self {
        Chain::THOR
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        Chain::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == upper)
            .ok_or_else(|| crate::Error::InvalidChain(s.to_string()))
    }
}

impl TryFrom<String> for Chain {
    type Error = crate::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Chain> for String {
    fn from(chain: Chain) -> Self {
        chain.as_str().to_string()
    }
}
