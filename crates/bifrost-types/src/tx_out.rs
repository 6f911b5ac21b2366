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

use serde::{Deserialize, Serialize};

use crate::chain::Chain;
use crate::coin::{amount, Coin, Coins, Gas};
use crate::primitives::{Address, PubKey, TxId};

/// An outbound instruction retrieved from the home chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutItem {
    /// Target chain.
    pub chain: Chain,
    /// Target address on that chain.
    #[serde(rename = "to", default)]
    pub to_address: Address,
    /// The vault that must sign.
    #[serde(rename = "vault_pubkey", default)]
    pub vault_pub_key: PubKey,
    /// Coins to send, empty for a yggdrasil return.
    #[serde(default)]
    pub coins: Coins,
    /// Outbound memo.
    #[serde(default)]
    pub memo: String,
    /// Maximum gas the adapter may spend.
    #[serde(default)]
    pub max_gas: Gas,
    /// Gas rate to use.
    #[serde(default)]
    pub gas_rate: i64,
    /// Inbound hash this outbound answers.
    #[serde(default)]
    pub in_hash: TxId,
    /// Hash of the outbound once observed.
    #[serde(default)]
    pub out_hash: TxId,
    /// DEX aggregator contract.
    #[serde(default)]
    pub aggregator: String,
    /// DEX aggregator target asset.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aggregator_target_asset: String,
    /// DEX aggregator target limit.
    #[serde(
        default,
        with = "amount::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub aggregator_target_limit: Option<u128>,
    /// Adapter-owned bytes preserved across retries, never serialised.
    #[serde(skip)]
    pub checkpoint: Vec<u8>,
}

impl TxOutItem {
    /// Creates an item with only the routing fields set.
    pub fn new(
        chain: Chain,
        to_address: Address,
        vault_pub_key: PubKey,
        coins: Coins,
        memo: impl Into<String>,
    ) -> Self {
        Self {
            chain,
            to_address,
            vault_pub_key,
            coins,
            memo: memo.into(),
            max_gas: Gas::default(),
            gas_rate: 0,
            in_hash: TxId::default(),
            out_hash: TxId::default(),
            aggregator: String::new(),
            aggregator_target_asset: String::new(),
            aggregator_target_limit: None,
            checkpoint: Vec::new(),
        }
    }

    /// Upper-hex sha256 identifying the item for one vault.
    pub fn hash(&self) -> String {
        let data = format!(
            "{}|{}|{}|{}|{}|{}",
            self.chain,
            self.to_address,
            self.vault_pub_key,
            self.coins,
            self.memo,
            self.in_hash
        );
        crate::sha256_upper_hex(data.as_bytes())
    }

    /// Same as [`TxOutItem::hash`] without the vault, so identical
    /// instructions for different vaults collide.
    pub fn cache_hash(&self) -> String {
        let data = format!(
            "{}|{}|{}|{}|{}",
            self.chain, self.to_address, self.coins, self.memo, self.in_hash
        );
        crate::sha256_upper_hex(data.as_bytes())
    }

    /// Semantic equality used when re-checking the home chain's keysign
    /// queue.
    pub fn equals(&self, other: &TxOutItem) -> bool {
        self.chain == other.chain
            && self.vault_pub_key == other.vault_pub_key
            && self.to_address.equals(&other.to_address)
            && self.coins.equals_ex(&other.coins)
            && self.in_hash.equals(&other.in_hash)
            && self.memo.eq_ignore_ascii_case(&other.memo)
            && self.gas_rate == other.gas_rate
            && self.aggregator.eq_ignore_ascii_case(&other.aggregator)
            && self
                .aggregator_target_asset
                .eq_ignore_ascii_case(&other.aggregator_target_asset)
            && self.aggregator_target_limit == other.aggregator_target_limit
    }
}

/// The keysign wire form of an outbound: one coin per item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxArrayItem {
    /// Target chain.
    pub chain: Chain,
    /// Target address.
    #[serde(default)]
    pub to_address: Address,
    /// Signing vault.
    #[serde(default)]
    pub vault_pub_key: PubKey,
    /// The coin to send.
    #[serde(default)]
    pub coin: Coin,
    /// Outbound memo.
    #[serde(default)]
    pub memo: String,
    /// Maximum gas.
    #[serde(default)]
    pub max_gas: Gas,
    /// Gas rate.
    #[serde(default)]
    pub gas_rate: i64,
    /// Inbound hash.
    #[serde(default)]
    pub in_hash: TxId,
    /// Outbound hash.
    #[serde(default)]
    pub out_hash: TxId,
    /// DEX aggregator contract.
    #[serde(default)]
    pub aggregator: String,
    /// DEX aggregator target asset.
    #[serde(default)]
    pub aggregator_target_asset: String,
    /// DEX aggregator target limit.
    #[serde(
        default,
        with = "amount::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub aggregator_target_limit: Option<u128>,
}

impl TxArrayItem {
    /// Converts into the signer's representation.
    pub fn tx_out_item(&self) -> TxOutItem {
        let coins = if self.coin.asset.is_empty() {
            Coins::default()
        } else {
            Coins::new(vec![self.coin.clone()])
        };
        TxOutItem {
            chain: self.chain,
            to_address: self.to_address.clone(),
            vault_pub_key: self.vault_pub_key.clone(),
            coins,
            memo: self.memo.clone(),
            max_gas: self.max_gas.clone(),
            gas_rate: self.gas_rate,
            in_hash: self.in_hash.clone(),
            out_hash: self.out_hash.clone(),
            aggregator: self.aggregator.clone(),
            aggregator_target_asset: self.aggregator_target_asset.clone(),
            aggregator_target_limit: self.aggregator_target_limit,
            checkpoint: Vec::new(),
        }
    }
}

/// The outbound batch the home chain published at one height for one vault.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    /// Home-chain height.
    #[serde(default)]
    pub height: i64,
    /// The outbound items.
    #[serde(default)]
    pub tx_array: Vec<TxArrayItem>,
}
