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

use crate::asset::Asset;
use crate::chain::Chain;
use crate::coin::Coins;
use crate::primitives::{Address, PubKey, PubKeySet};

/// Lifecycle status of a validator.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum NodeStatus {
    /// Unknown status.
    #[default]
    #[serde(alias = "unknown")]
    Unknown,
    /// Whitelisted but not bonded.
    #[serde(alias = "whitelisted")]
    Whitelisted,
    /// Bonded and waiting to churn in.
    #[serde(alias = "standby")]
    Standby,
    /// Ready to churn in.
    #[serde(alias = "ready")]
    Ready,
    /// Active validator; only active nodes attest.
    #[serde(alias = "active")]
    Active,
    /// Disabled.
    #[serde(alias = "disabled")]
    Disabled,
}

/// A validator as seen by the home chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAccount {
    /// Home-chain account address.
    #[serde(default)]
    pub node_address: String,
    /// Status.
    #[serde(default)]
    pub status: NodeStatus,
    /// Node keys.
    #[serde(default)]
    pub pub_key_set: PubKeySet,
    /// Vaults the node is a signer of.
    #[serde(default)]
    pub signer_membership: Vec<PubKey>,
}

impl NodeAccount {
    /// Whether the account is missing.
    pub fn is_empty(&self) -> bool {
        self.node_address.is_empty() || self.status == NodeStatus::Unknown
    }
}

/// Status of a vault.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum VaultStatus {
    /// Unset.
    #[default]
    InactiveVault,
    /// Active.
    ActiveVault,
    /// Retiring during a churn.
    RetiringVault,
    /// Freshly created, not yet funded.
    InitVault,
}

/// Kind of vault.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum VaultType {
    /// Unset.
    #[default]
    UnknownVault,
    /// Multi-party vault.
    AsgardVault,
    /// Single signer vault.
    YggdrasilVault,
}

/// The address a vault pubkey derives on one chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VaultAddress {
    /// The chain.
    pub chain: Chain,
    /// The derived address.
    pub address: Address,
}

/// Router contract of a vault on a smart-contract chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainContract {
    /// The chain.
    pub chain: Chain,
    /// Router address.
    pub router: Address,
}

/// A vault as reported by the home chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    /// Home-chain height the vault was created at.
    #[serde(default)]
    pub block_height: i64,
    /// Pool pubkey.
    #[serde(default)]
    pub pub_key: PubKey,
    /// Status.
    #[serde(default)]
    pub status: VaultStatus,
    /// Kind.
    #[serde(rename = "type", default)]
    pub vault_type: VaultType,
    /// Members' node pubkeys.
    #[serde(default)]
    pub membership: Vec<PubKey>,
    /// Funds held, per the home chain's bookkeeping.
    #[serde(default)]
    pub coins: Coins,
    /// Addresses derived from the pool pubkey.
    #[serde(default)]
    pub addresses: Vec<VaultAddress>,
    /// Router contracts.
    #[serde(default)]
    pub routers: Vec<ChainContract>,
}

impl Vault {
    /// The address of this vault on the given chain.
    pub fn address(&self, chain: Chain) -> Option<&Address> {
        self.addresses
            .iter()
            .find(|a| a.chain == chain)
            .map(|a| &a.address)
    }

    /// The router of this vault on the given chain.
    pub fn contract(&self, chain: Chain) -> Option<&ChainContract> {
        self.routers.iter().find(|c| c.chain == chain)
    }

    /// Whether `pk` is a member of the vault.
    pub fn has_member(&self, pk: &PubKey) -> bool {
        self.membership.contains(pk)
    }
}

/// Balance and sequencing information of an account on an external chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account sequence / nonce.
    #[serde(default)]
    pub sequence: i64,
    /// Account number, where the chain has one.
    #[serde(default)]
    pub account_number: i64,
    /// Live balance.
    #[serde(default)]
    pub coins: Coins,
    /// Whether the account refuses transfers without a memo.
    #[serde(default)]
    pub has_memo_flag: bool,
}

/// One chain address registered under a THORName.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThorNameAlias {
    /// The chain.
    pub chain: Chain,
    /// The address on that chain.
    pub address: Address,
}

/// A human readable name resolving to per-chain addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThorName {
    /// The name.
    #[serde(default)]
    pub name: String,
    /// Expiry height.
    #[serde(default)]
    pub expire_block_height: i64,
    /// Owner account.
    #[serde(default)]
    pub owner: String,
    /// Preferred asset.
    #[serde(default)]
    pub preferred_asset: Asset,
    /// Aliases.
    #[serde(default)]
    pub aliases: Vec<ThorNameAlias>,
}

impl ThorName {
    /// The alias registered for `chain`.
    pub fn alias(&self, chain: Chain) -> Option<&Address> {
        self.aliases
            .iter()
            .find(|a| a.chain == chain)
            .map(|a| &a.address)
    }
}
