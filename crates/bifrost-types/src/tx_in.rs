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
use crate::coin::{amount, Coins, Gas};
use crate::primitives::PubKey;

/// Observation of one inbound (or self-sent outbound) external
/// transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInItem {
    /// Source block height.
    #[serde(default)]
    pub block_height: i64,
    /// Chain-native transaction id.
    #[serde(default)]
    pub tx: String,
    /// Payload extracted from the transaction.
    #[serde(default)]
    pub memo: String,
    /// Sending address.
    #[serde(default)]
    pub sender: String,
    /// Receiving address.
    #[serde(default)]
    pub to: String,
    /// Coins transferred.
    #[serde(default)]
    pub coins: Coins,
    /// Gas paid.
    #[serde(default)]
    pub gas: Gas,
    /// Vault the observation concerns.
    #[serde(default)]
    pub observed_vault_pub_key: PubKey,
    /// DEX aggregator contract, if any.
    #[serde(default)]
    pub aggregator: String,
    /// DEX aggregator target asset.
    #[serde(default)]
    pub aggregator_target: String,
    /// DEX aggregator target limit.
    #[serde(
        default,
        with = "amount::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub aggregator_target_limit: Option<u128>,
}

impl TxInItem {
    /// True iff every field is zero-valued.
    pub fn is_empty(&self) -> bool {
        *self == TxInItem::default()
    }

    /// A vault-independent fingerprint used to match observed outbounds
    /// with the signed outbounds that produced them.
    pub fn cache_hash(&self, chain: Chain, in_hash: &str) -> String {
        let data = format!(
            "{}|{}|{}|{}|{}",
            chain, self.to, self.coins, self.memo, in_hash
        );
        crate::sha256_upper_hex(data.as_bytes())
    }

    /// Whether this item refers to the same transaction as `other`.
    pub fn same_tx(&self, other: &TxInItem) -> bool {
        self.tx.eq_ignore_ascii_case(&other.tx)
            && self.sender.eq_ignore_ascii_case(&other.sender)
            && self.to.eq_ignore_ascii_case(&other.to)
    }
}

/// A batch of observations emitted by a single scanner pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    /// Number of items, as a decimal string.
    #[serde(default)]
    pub count: String,
    /// Source chain.
    pub chain: Chain,
    /// Observed items.
    #[serde(rename = "txArray", default)]
    pub tx_array: Vec<TxInItem>,
    /// Whether the observer already filtered this batch.
    #[serde(default)]
    pub filtered: bool,
    /// Whether the items come from the mempool.
    #[serde(default)]
    pub mem_pool: bool,
    /// Whether a pre-confirmation attestation was already sent.
    #[serde(default)]
    pub sent_un_finalised: bool,
    /// Whether the batch reached its confirmation threshold.
    #[serde(default)]
    pub finalised: bool,
    /// Confirmations required before the batch is final.
    #[serde(default)]
    pub confirmation_required: i64,
}

impl TxIn {
    /// Creates an unfiltered, non-mempool batch.
    pub fn new(chain: Chain, tx_array: Vec<TxInItem>) -> Self {
        Self {
            count: tx_array.len().to_string(),
            chain,
            tx_array,
            filtered: false,
            mem_pool: false,
            sent_un_finalised: false,
            finalised: false,
            confirmation_required: 0,
        }
    }

    /// Creates a batch of `tx_array` carrying the flags of `self`.
    pub fn with_items(&self, tx_array: Vec<TxInItem>) -> Self {
        Self {
            count: tx_array.len().to_string(),
            tx_array,
            ..self.clone()
        }
    }

    /// Block height of the first item, `0` when empty.
    pub fn first_block_height(&self) -> i64 {
        self.tx_array.first().map(|t| t.block_height).unwrap_or(0)
    }

    /// Highest block height in the batch.
    pub fn max_block_height(&self) -> i64 {
        self.tx_array
            .iter()
            .map(|t| t.block_height)
            .max()
            .unwrap_or(0)
    }
}
