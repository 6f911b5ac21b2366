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

/// A chain-qualified token identifier.
///
/// Layer-1 assets are written `CHAIN.SYMBOL`, synthetic assets (home-chain
/// representations of external assets) `CHAIN/SYMBOL`. The ticker is the
/// part of the symbol before the first `-`, so `ETH.USDT-0XDAC17F` has
/// ticker `USDT`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Asset {
    /// The chain the asset lives on.
    pub chain: Chain,
    /// Full symbol, including any contract suffix.
    pub symbol: String,
    /// Short ticker.
    pub ticker: String,
    /// Whether this is the synthetic representation.
    pub synth: bool,
}

impl Default for Asset {
    fn default() -> Self {
        Self::empty()
    }
}

impl Asset {
    /// Creates a layer-1 asset.
    pub fn new(chain: Chain, symbol: &str) -> Self {
        let symbol = symbol.to_uppercase();
        let ticker = symbol.split('-').next().unwrap_or_default().to_string();
        Self {
            chain,
            symbol,
            ticker,
            synth: false,
        }
    }

    /// The empty asset, written `.`.
    pub fn empty() -> Self {
        Self {
            chain: Chain::THOR,
            symbol: String::new(),
            ticker: String::new(),
            synth: false,
        }
    }

    /// The home chain's native asset.
    pub fn rune() -> Self {
        Chain::THOR.gas_asset()
    }

    /// Whether this is the empty asset.
    pub fn is_empty(&self) -> bool {
        self.symbol.is_empty()
    }

    /// The synthetic representation of this asset.
    pub fn synthetic(&self) -> Self {
        Self {
            synth: true,
            ..self.clone()
        }
    }

    /// Whether the asset is a synthetic representation.
    pub fn is_synthetic(&self) -> bool {
        self.synth
    }

    /// The chain where this asset is held; synthetics live on the home
    /// chain.
    pub fn chain_of_record(&self) -> Chain {
        if self.synth {
            Chain::THOR
        } else {
            self.chain
        }
    }

    /// Whether this asset is the gas asset of its chain.
    pub fn is_gas_asset(&self) -> bool {
        !self.synth && *self == self.chain.gas_asset()
    }

    /// Whether this is the home chain's native asset.
    pub fn is_rune(&self) -> bool {
        !self.synth && *self == Self::rune()
    }

    /// Derived assets are internal home-chain assets that are neither the
    /// native asset nor synthetics.
    pub fn is_derived(&self) -> bool {
        self.chain.is_thor() && !self.synth && !self.is_rune()
    }

    /// Layer-1 assets are the only ones moving on external chains.
    pub fn is_layer1(&self) -> bool {
        !self.synth && !self.is_derived() && !self.is_empty()
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str(".");
        }
        let sep = if self.synth { '/' } else { '.' };
        write!(f, "{}{}{}", self.chain, sep, self.symbol)
    }
}

impl FromStr for Asset {
    type Err = crate::Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if input.is_empty() || input == "." {
            return Ok(Self::empty());
        }
        let (chain, symbol, synth) =
            match input.find(|c| c == '.' || c == '/') {
                Some(idx) => {
                    let synth = input.as_bytes()[idx] == b'/';
                    let chain = input[..idx].parse::<Chain>().map_err(
                        |_| crate::Error::InvalidAsset(input.to_string()),
                    )?;
                    (chain, &input[idx + 1..], synth)
                }
                None => (Chain::THOR, input, false),
            };
        let valid_symbol = !symbol.is_empty()
            && symbol
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "-._".contains(c));
        if !valid_symbol {
            return Err(crate::Error::InvalidAsset(input.to_string()));
        }
        let mut asset = Asset::new(chain, symbol);
        asset.synth = synth;
        Ok(asset)
    }
}

impl TryFrom<String> for Asset {
    type Error = crate::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Asset> for String {
    fn from(asset: Asset) -> Self {
        asset.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_layer1_and_synth() {
        let a: Asset = "btc.btc".parse().unwrap();
        assert_eq!(a.chain, Chain::BTC);
        assert_eq!(a.symbol, "BTC");
        assert!(a.is_gas_asset());
        assert!(a.is_layer1());

        let s: Asset = "BTC/BTC".parse().unwrap();
        assert!(s.is_synthetic());
        assert_eq!(s.chain_of_record(), Chain::THOR);
        assert_eq!(s.to_string(), "BTC/BTC");
        assert_eq!(a.synthetic(), s);
    }

    #[test]
    fn ticker_strips_contract_suffix() {
        let a: Asset = "ETH.USDT-0XDAC17F958D2EE523A2206206994597C13D831EC7"
            .parse()
            .unwrap();
        assert_eq!(a.ticker, "USDT");
        assert!(!a.is_gas_asset());
    }

    #[test]
    fn no_separator_means_home_chain() {
        let a: Asset = "rune".parse().unwrap();
        assert!(a.is_rune());
        assert!(!a.is_derived());
        let d: Asset = "THOR.BTC".parse().unwrap();
        assert!(d.is_derived());
    }

    #[test]
    fn empty_asset_json() {
        let json = serde_json::to_string(&Asset::empty()).unwrap();
        assert_eq!(json, "\".\"");
        let a: Asset = serde_json::from_str("\".\"").unwrap();
        assert!(a.is_empty());
    }

    #[test]
    fn rejects_garbage() {
        assert!("FOO.BAR".parse::<Asset>().is_err());
        assert!("BTC.".parse::<Asset>().is_err());
        assert!("BTC.B T C".parse::<Asset>().is_err());
    }
}
