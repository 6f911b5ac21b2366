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

#![warn(missing_docs)]
//! # Bifrost Types 🌈
//!
//! Shared data model of the bridge daemon: chains, assets, coins, addresses,
//! the inbound observation batches produced by the block scanners and the
//! outbound instructions retrieved from the home chain.

/// Chain-qualified token identifiers.
pub mod asset;
/// External chain tags and their per-chain constants.
pub mod chain;
/// Amounts of a given asset.
pub mod coin;
/// Keygen / keysign coordination types.
pub mod keygen;
/// Mimir keys and home-chain constant names.
pub mod mimir;
/// Node accounts, vaults, accounts and THORNames.
pub mod node;
/// Observations and messages sent to the home chain.
pub mod observed;
/// Address, public key and transaction id newtypes.
pub mod primitives;
/// Inbound observation batches.
pub mod tx_in;
/// Outbound instructions.
pub mod tx_out;

pub use asset::Asset;
pub use chain::Chain;
pub use coin::{Coin, Coins, Gas};
pub use keygen::{
    Blame, BlameNode, Keygen, KeygenBlock, KeygenType, KeysignError,
    KeysignFailure,
};
pub use node::{
    Account, ChainContract, NodeAccount, NodeStatus, ThorName, ThorNameAlias,
    Vault, VaultAddress, VaultStatus, VaultType,
};
pub use observed::{
    ErrataBlock, ErrataTx, Msg, ObservedTx, ObservedTxStatus, Solvency, Tx,
};
pub use primitives::{Address, PubKey, PubKeySet, TxId};
pub use tx_in::{TxIn, TxInItem};
pub use tx_out::{TxArrayItem, TxOut, TxOutItem};

/// Maximum size of a memo accepted by the home chain.
pub const MAX_MEMO_SIZE: usize = 250;

/// Maximum basis points value (100%).
pub const MAX_BASIS_POINTS: u64 = 10_000;

/// Errors raised while parsing or validating the shared types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Unknown or malformed chain tag.
    #[error("invalid chain: {0}")]
    InvalidChain(String),
    /// Malformed asset string.
    #[error("invalid asset: {0}")]
    InvalidAsset(String),
    /// Empty address.
    #[error("address is empty")]
    NoAddress,
    /// Address with invalid characters or encoding.
    #[error("address format not supported: {0}")]
    InvalidAddress(String),
    /// Transaction id of the wrong length or format.
    #[error("txid error: {0}")]
    InvalidTxId(String),
    /// Amount that is not a non-negative integer.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}

/// A type alias for results of this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Upper-case hex encoded sha256 of the given bytes.
pub fn sha256_upper_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode_upper(Sha256::digest(data))
}
