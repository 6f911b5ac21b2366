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
use crate::keygen::{Blame, KeygenType};
use crate::primitives::{Address, PubKey, TxId};

/// An external transaction in home-chain form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    /// Transaction id.
    pub id: TxId,
    /// Source chain.
    pub chain: Chain,
    /// Sender.
    pub from_address: Address,
    /// Recipient.
    pub to_address: Address,
    /// Coins moved.
    pub coins: Coins,
    /// Gas paid.
    pub gas: Gas,
    /// Memo.
    pub memo: String,
}

/// Observation status as tracked by the home chain.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ObservedTxStatus {
    /// Not yet processed.
    #[default]
    Incomplete,
    /// Fully processed.
    Done,
    /// Rolled back.
    Reverted,
}

/// A transaction observed by this node, ready to be attested.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedTx {
    /// The transaction.
    pub tx: Tx,
    /// Status.
    #[serde(default)]
    pub status: ObservedTxStatus,
    /// Outbound hashes linked to it.
    #[serde(default)]
    pub out_hashes: Vec<String>,
    /// Voting height.
    pub block_height: i64,
    /// Vault the observation concerns.
    pub observed_pub_key: PubKey,
    /// Height at which the observation becomes final.
    pub finalise_height: i64,
    /// DEX aggregator contract.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aggregator: String,
    /// DEX aggregator target asset.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aggregator_target: String,
    /// DEX aggregator target limit.
    #[serde(
        default,
        with = "amount::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub aggregator_target_limit: Option<u128>,
}

impl ObservedTx {
    /// Creates an observation.
    pub fn new(
        tx: Tx,
        block_height: i64,
        observed_pub_key: PubKey,
        finalise_height: i64,
    ) -> Self {
        Self {
            tx,
            status: ObservedTxStatus::Incomplete,
            out_hashes: Vec::new(),
            block_height,
            observed_pub_key,
            finalise_height,
            aggregator: String::new(),
            aggregator_target: String::new(),
            aggregator_target_limit: None,
        }
    }

    /// Whether the observation is final.
    pub fn is_final(&self) -> bool {
        self.block_height >= self.finalise_height
    }
}

/// A transaction rolled back on its external chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrataTx {
    /// Transaction id.
    pub tx_id: TxId,
    /// Chain it was on.
    pub chain: Chain,
}

/// Transactions rolled back at one external height.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrataBlock {
    /// External height.
    pub height: i64,
    /// The reverted transactions.
    pub txs: Vec<ErrataTx>,
}

/// A vault balance report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Solvency {
    /// External height.
    pub height: i64,
    /// Chain.
    pub chain: Chain,
    /// Vault.
    pub pub_key: PubKey,
    /// Balance held.
    pub coins: Coins,
}

impl Solvency {
    /// Reports missing a chain, vault or height are dropped.
    pub fn is_complete(&self) -> bool {
        self.height > 0 && !self.pub_key.is_empty()
    }
}

/// Messages the daemon submits to the home chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Msg {
    /// Inbound observations.
    ObservedTxIn {
        /// Observations.
        txs: Vec<ObservedTx>,
        /// Signer account.
        signer: String,
    },
    /// Outbound observations.
    ObservedTxOut {
        /// Observations.
        txs: Vec<ObservedTx>,
        /// Signer account.
        signer: String,
    },
    /// A rolled back transaction.
    Errata {
        /// Transaction id.
        tx_id: TxId,
        /// Chain.
        chain: Chain,
        /// Signer account.
        signer: String,
    },
    /// A vault balance report.
    Solvency {
        /// External height.
        height: i64,
        /// Chain.
        chain: Chain,
        /// Vault.
        pub_key: PubKey,
        /// Balance.
        coins: Coins,
        /// Signer account.
        signer: String,
    },
    /// Result of a keygen ceremony.
    TssPool {
        /// Keygen id.
        id: String,
        /// Resulting pool pubkey, empty on failure.
        pool_pub_key: PubKey,
        /// Encrypted keyshare backup.
        #[serde(default, with = "keyshares")]
        keyshares: Vec<u8>,
        /// Blame on failure.
        blame: Blame,
        /// Members.
        pub_keys: Vec<PubKey>,
        /// Vault kind.
        keygen_type: KeygenType,
        /// Chains the vault serves.
        chains: Vec<Chain>,
        /// Home-chain height of the request.
        height: i64,
        /// Ceremony duration in milliseconds.
        keygen_time: i64,
        /// Signer account.
        signer: String,
    },
    /// A failed keysign ceremony.
    TssKeysignFail {
        /// Failure id.
        id: TxId,
        /// Home-chain height.
        height: i64,
        /// Blame.
        blame: Blame,
        /// Outbound memo.
        memo: String,
        /// Outbound coins.
        coins: Coins,
        /// Vault.
        pub_key: PubKey,
        /// Signer account.
        signer: String,
    },
}

impl Msg {
    /// Short name used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::ObservedTxIn { .. } => "observed_txin",
            Msg::ObservedTxOut { .. } => "observed_txout",
            Msg::Errata { .. } => "errata",
            Msg::Solvency { .. } => "solvency",
            Msg::TssPool { .. } => "tss_pool",
            Msg::TssKeysignFail { .. } => "tss_keysign_fail",
        }
    }
}

mod keyshares {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &[u8],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msg_is_tagged() {
        let msg = Msg::Errata {
            tx_id: TxId::new(&"a".repeat(64)).unwrap(),
            chain: Chain::BTC,
            signer: "thor1signer".into(),
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "Errata");
        assert_eq!(v["value"]["chain"], "BTC");
        assert_eq!(msg.kind(), "errata");
    }

    #[test]
    fn incomplete_solvency() {
        assert!(!Solvency::default().is_complete());
        let s = Solvency {
            height: 10,
            chain: Chain::ETH,
            pub_key: PubKey::new("thorpub1v"),
            coins: Coins::default(),
        };
        assert!(s.is_complete());
    }
}
