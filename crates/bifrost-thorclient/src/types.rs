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

//! Response bodies of the home-chain REST API.

use std::collections::HashMap;

use bifrost_types::{Chain, ChainContract, KeygenBlock, PubKey, TxOut};
use serde::{Deserialize, Serialize};

/// One entry of `/thorchain/lastblock`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastBlockHeights {
    /// External chain.
    #[serde(default)]
    pub chain: Chain,
    /// Last observed inbound height on that chain.
    #[serde(default)]
    pub last_observed_in: i64,
    /// Last signed outbound height.
    #[serde(default)]
    pub last_signed_out: i64,
    /// Current home-chain height.
    #[serde(default)]
    pub thorchain: i64,
}

/// `/thorchain/keysign/<height>/<pubkey>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryKeysign {
    /// The keysign queue.
    #[serde(default)]
    pub keysign: TxOut,
    /// Signature of the node over the queue.
    #[serde(default)]
    pub signature: String,
}

/// `/thorchain/keygen/<height>/<pubkey>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryKeygenBlock {
    /// The keygen block.
    #[serde(default)]
    pub keygen_block: KeygenBlock,
    /// Signature of the node over the block.
    #[serde(default)]
    pub signature: String,
}

/// A vault in `/thorchain/vaults/pubkeys`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultInfo {
    /// Pool pubkey.
    pub pub_key: PubKey,
    /// Router contracts.
    #[serde(default)]
    pub routers: Vec<ChainContract>,
}

/// `/thorchain/vaults/pubkeys`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryVaultsPubKeys {
    /// Active vaults.
    #[serde(default)]
    pub asgard: Vec<VaultInfo>,
    /// Node vaults.
    #[serde(default)]
    pub yggdrasil: Vec<VaultInfo>,
    /// Retiring vaults.
    #[serde(default)]
    pub inactive: Vec<VaultInfo>,
}

/// `/thorchain/constants`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryConstants {
    /// Integer constants by name.
    #[serde(default)]
    pub int_64_values: HashMap<String, i64>,
}

/// Tendermint `/status`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeStatusResponse {
    /// Result.
    #[serde(default)]
    pub result: NodeStatusResult,
}

/// Result of `/status`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeStatusResult {
    /// Sync state.
    #[serde(default)]
    pub sync_info: SyncInfo,
}

/// Sync state of the node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncInfo {
    /// Whether the node is still syncing.
    #[serde(default)]
    pub catching_up: bool,
}

/// Body posted to the signer broadcast endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastRequest {
    /// Account signing the messages.
    pub signer: String,
    /// Messages to include in one transaction.
    pub msgs: Vec<bifrost_types::Msg>,
}

/// Answer of the signer broadcast endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BroadcastResponse {
    /// Hash of the transaction.
    #[serde(default)]
    pub txhash: String,
    /// Cosmos SDK result code, zero on success.
    #[serde(default)]
    pub code: u32,
    /// Raw log of a failure.
    #[serde(default)]
    pub raw_log: String,
}
