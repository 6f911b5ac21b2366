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
//! # Bifrost Client Traits 🔌
//!
//! The capability interfaces between the daemon and the outside world:
//!
//! * [`ChainClient`]: one adapter per external chain, scanning blocks,
//!   signing and broadcasting outbounds.
//! * [`Bridge`]: the home chain, which owns policy (mimir), keysign queues
//!   and keygen requests, and accepts attestations.
//! * [`KeyManager`]: the TSS engine.
//!
//! With the `mocks` feature, [`mocks`] provides in-memory implementations of
//! all three that count their calls and replay scripted failures.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bifrost_config::ChainConfig;
use bifrost_types::{
    sha256_upper_hex, Account, Blame, Chain, ChainContract, Coins,
    ErrataBlock, Keygen, KeygenBlock, KeysignFailure, Msg, NodeAccount,
    NodeStatus, ObservedTx, PubKey, Solvency, ThorName, TxId, TxIn, TxInItem,
    TxOut, TxOutItem, Vault,
};
use bifrost_utils::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

/// The queues a chain client feeds the observer through.
#[derive(Debug, Clone)]
pub struct ObserverQueues {
    /// Observed transactions.
    pub tx_in: mpsc::Sender<TxIn>,
    /// Rolled back blocks.
    pub errata: mpsc::Sender<ErrataBlock>,
    /// Vault balance reports.
    pub solvency: mpsc::Sender<Solvency>,
}

/// A successfully signed outbound.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignedTx {
    /// Raw transaction, ready to broadcast.
    pub raw: Vec<u8>,
    /// TSS checkpoint of the ceremony.
    pub checkpoint: Vec<u8>,
    /// The outbound as the observer should attest it, if the adapter can
    /// build it before the chain confirms the transaction.
    pub observation: Option<TxInItem>,
}

/// A failed signing, with the checkpoint to resume from.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct SignTxError {
    /// The cause.
    pub source: Error,
    /// TSS checkpoint of the failed ceremony, empty when there is none.
    pub checkpoint: Vec<u8>,
}

impl SignTxError {
    /// The keysign error, when the TSS ceremony failed.
    pub fn as_keysign(&self) -> Option<&bifrost_types::KeysignError> {
        self.source.as_keysign()
    }
}

impl From<Error> for SignTxError {
    fn from(source: Error) -> Self {
        Self {
            source,
            checkpoint: Vec::new(),
        }
    }
}

/// A vault pubkey and the router contracts registered for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubKeyContracts {
    /// The vault.
    pub pub_key: PubKey,
    /// Router contracts per chain.
    #[serde(default)]
    pub contracts: Vec<ChainContract>,
}

/// An adapter to one external chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Starts the adapter's scanners, feeding the observer.
    async fn start(&self, queues: ObserverQueues) -> Result<()>;
    /// Stops every task started by [`ChainClient::start`].
    async fn stop(&self);
    /// Whether the block scanner is close enough to the tip.
    fn is_block_scanner_healthy(&self) -> bool;
    /// Signs an outbound through TSS.
    async fn sign_tx(
        &self,
        item: &TxOutItem,
        height: i64,
    ) -> std::result::Result<SignedTx, SignTxError>;
    /// Broadcasts a signed outbound, returning the chain's tx hash.
    async fn broadcast_tx(
        &self,
        item: &TxOutItem,
        signed: &[u8],
    ) -> Result<String>;
    /// Current tip.
    async fn get_height(&self) -> Result<i64>;
    /// The address of a vault on this chain.
    async fn get_address(&self, pool_pub_key: &PubKey) -> Result<String>;
    /// The account of a vault, at `height` or the tip.
    async fn get_account(
        &self,
        pool_pub_key: &PubKey,
        height: Option<i64>,
    ) -> Result<Account>;
    /// The account at an address, at `height` or the tip.
    async fn get_account_by_address(
        &self,
        address: &str,
        height: Option<i64>,
    ) -> Result<Account>;
    /// The chain.
    fn get_chain(&self) -> Chain;
    /// The adapter's configuration.
    fn get_config(&self) -> &ChainConfig;
    /// Confirmations required before `tx_in` is final.
    async fn get_confirmation_count(&self, tx_in: &TxIn) -> i64;
    /// Whether `tx_in` has its confirmations.
    async fn confirmation_count_ready(&self, tx_in: &TxIn) -> bool;
    /// Called after an observation was attested.
    async fn on_observed_tx_in(&self, _item: &TxInItem, _block_height: i64) {}
    /// Whether a solvency report is due at `height`.
    async fn should_report_solvency(&self, _height: i64) -> bool {
        false
    }
    /// Reports the solvency of every vault at `height`.
    async fn report_solvency(&self, _height: i64) -> Result<()> {
        Ok(())
    }
}

/// The home chain, as seen by the daemon.
#[async_trait]
pub trait Bridge: Send + Sync {
    /// Account the daemon signs home-chain messages with.
    fn signer_address(&self) -> &str;
    /// A mimir value, `-1` when unset.
    async fn get_mimir(&self, key: &str) -> Result<i64>;
    /// A protocol constant.
    async fn get_constant(&self, name: &str) -> Result<i64>;
    /// Latest home-chain height.
    async fn get_block_height(&self) -> Result<i64>;
    /// Whether the home-chain node is still syncing.
    async fn is_catching_up(&self) -> Result<bool>;
    /// Last external height the home chain observed an inbound at.
    async fn get_last_observed_in_height(&self, chain: Chain) -> Result<i64>;
    /// The outbounds `pub_key` must sign at `height`.
    async fn get_keysign(&self, height: i64, pub_key: &PubKey) -> Result<TxOut>;
    /// The keygens `pub_key` takes part in at `height`.
    async fn get_keygen_block(
        &self,
        height: i64,
        pub_key: &PubKey,
    ) -> Result<KeygenBlock>;
    /// A node account.
    async fn get_node_account(&self, address: &str) -> Result<NodeAccount>;
    /// A THORName.
    async fn get_thorname(&self, name: &str) -> Result<ThorName>;
    /// Active asgard vaults.
    async fn get_asgards(&self) -> Result<Vec<Vault>>;
    /// One vault.
    async fn get_vault(&self, pub_key: &PubKey) -> Result<Vault>;
    /// Every vault pubkey with its router contracts.
    async fn get_pubkeys(&self) -> Result<Vec<PubKeyContracts>>;
    /// Signs and broadcasts messages, returning the home-chain tx id.
    async fn broadcast(&self, msgs: Vec<Msg>) -> Result<TxId>;

    /// Waits until the home-chain node is in sync.
    async fn wait_to_catch_up(&self) -> Result<()> {
        loop {
            if !self.is_catching_up().await? {
                return Ok(());
            }
            tracing::info!("thorchain is not caught up, waiting...");
            tokio::time::sleep(Chain::THOR.approximate_block_time()).await;
        }
    }

    /// Status of this node.
    async fn fetch_node_status(&self) -> Result<NodeStatus> {
        let node = self.get_node_account(self.signer_address()).await?;
        Ok(node.status)
    }

    /// Splits observations into inbound and outbound messages.
    ///
    /// An observation is inbound when it pays the observed vault, and
    /// outbound when the vault pays. A consolidation pays the vault itself
    /// and yields both.
    async fn get_observations_std_tx(
        &self,
        txs: Vec<ObservedTx>,
    ) -> Result<Vec<Msg>> {
        let mut inbound: Vec<ObservedTx> = Vec::new();
        let mut outbound: Vec<ObservedTx> = Vec::new();
        for mut tx in txs {
            let vault = self.get_vault(&tx.observed_pub_key).await?;
            let vault_address = vault
                .address(tx.tx.chain)
                .ok_or(Error::Generic("vault has no address on this chain"))?;
            if tx.tx.to_address.equals(vault_address)
                && !inbound.contains(&tx)
            {
                inbound.push(tx);
            } else if tx.tx.from_address.equals(vault_address)
                && !outbound.contains(&tx)
            {
                // outbounds need no confirmation counting
                tx.finalise_height = tx.block_height;
                outbound.push(tx);
            } else {
                return Err(Error::Generic(
                    "could not determine if this tx is inbound or outbound",
                ));
            }
        }
        let signer = self.signer_address().to_string();
        let mut msgs = Vec::new();
        if !inbound.is_empty() {
            msgs.push(Msg::ObservedTxIn {
                txs: inbound,
                signer: signer.clone(),
            });
        }
        if !outbound.is_empty() {
            msgs.push(Msg::ObservedTxOut {
                txs: outbound,
                signer,
            });
        }
        Ok(msgs)
    }

    /// An errata message for a rolled back transaction.
    fn get_errata_msg(&self, tx_id: TxId, chain: Chain) -> Msg {
        Msg::Errata {
            tx_id,
            chain,
            signer: self.signer_address().to_string(),
        }
    }

    /// A solvency message for a vault balance.
    fn get_solvency_msg(
        &self,
        height: i64,
        chain: Chain,
        pub_key: PubKey,
        coins: Coins,
    ) -> Msg {
        Msg::Solvency {
            height,
            chain,
            pub_key,
            coins,
            signer: self.signer_address().to_string(),
        }
    }

    /// The attestation of a keygen ceremony.
    #[allow(clippy::too_many_arguments)]
    fn get_keygen_std_tx(
        &self,
        keygen: &Keygen,
        pool_pub_key: PubKey,
        keyshares: Vec<u8>,
        blame: Blame,
        chains: Vec<Chain>,
        height: i64,
        keygen_time: i64,
    ) -> Msg {
        let id = if keygen.id.is_empty() {
            let members = keygen
                .members
                .iter()
                .map(PubKey::as_str)
                .collect::<Vec<_>>()
                .join(",");
            sha256_upper_hex(format!("{height}|{members}").as_bytes())
        } else {
            keygen.id.clone()
        };
        Msg::TssPool {
            id,
            pool_pub_key,
            keyshares,
            blame,
            pub_keys: keygen.members.clone(),
            keygen_type: keygen.keygen_type,
            chains,
            height,
            keygen_time,
            signer: self.signer_address().to_string(),
        }
    }

    /// Reports a failed keysign ceremony and who is to blame.
    async fn post_keysign_failure(
        &self,
        blame: Blame,
        height: i64,
        memo: String,
        coins: Coins,
        pub_key: PubKey,
    ) -> Result<TxId> {
        let failure = KeysignFailure {
            pub_key,
            height,
            memo,
            coins,
            blame,
        };
        let msg = Msg::TssKeysignFail {
            id: failure.id(),
            height: failure.height,
            blame: failure.blame,
            memo: failure.memo,
            coins: failure.coins,
            pub_key: failure.pub_key,
            signer: self.signer_address().to_string(),
        };
        self.broadcast(vec![msg]).await
    }
}

/// The TSS engine.
#[async_trait]
pub trait KeyManager: Send + Sync {
    /// Runs a keygen ceremony with `members`.
    ///
    /// A ceremony that fails with blame returns an empty pubkey and the
    /// blame, transport errors are returned as errors.
    async fn generate_new_key(
        &self,
        height: i64,
        members: &[PubKey],
    ) -> Result<(PubKey, Blame)>;
    /// Signs `payload` with the vault `pub_key`.
    async fn keysign(&self, pub_key: &PubKey, payload: &[u8]) -> Result<Vec<u8>>;
    /// The engine's local keyshare of `pub_key`.
    async fn keyshare(&self, pub_key: &PubKey) -> Result<Vec<u8>>;
}

/// Dispatch table from a chain to its adapter.
#[derive(Clone, Default)]
pub struct ChainClients {
    clients: HashMap<Chain, Arc<dyn ChainClient>>,
}

impl ChainClients {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter under its own chain, replacing any previous one.
    pub fn insert(&mut self, client: Arc<dyn ChainClient>) {
        self.clients.insert(client.get_chain(), client);
    }

    /// The adapter of `chain`.
    pub fn get(&self, chain: Chain) -> Option<Arc<dyn ChainClient>> {
        self.clients.get(&chain).cloned()
    }

    /// The adapter of `chain`, or [`Error::ChainNotFound`].
    pub fn client(&self, chain: Chain) -> Result<Arc<dyn ChainClient>> {
        self.get(chain).ok_or(Error::ChainNotFound { chain })
    }

    /// Registered chains, sorted.
    pub fn chains(&self) -> Vec<Chain> {
        let mut chains = self.clients.keys().copied().collect::<Vec<_>>();
        chains.sort();
        chains
    }

    /// Every adapter.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ChainClient>> {
        self.clients.values()
    }

    /// Number of adapters.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no adapter is registered.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl FromIterator<Arc<dyn ChainClient>> for ChainClients {
    fn from_iter<T: IntoIterator<Item = Arc<dyn ChainClient>>>(iter: T) -> Self {
        let mut clients = Self::new();
        for client in iter {
            clients.insert(client);
        }
        clients
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::{MockBridge, MockChainClient};
    use super::*;
    use bifrost_types::{Address, Tx, VaultAddress};

    fn vault(pk: &PubKey, addr: &str) -> Vault {
        Vault {
            pub_key: pk.clone(),
            addresses: vec![VaultAddress {
                chain: Chain::BTC,
                address: Address::new(addr).unwrap(),
            }],
            ..Default::default()
        }
    }

    fn observed(from: &str, to: &str, pk: &PubKey) -> ObservedTx {
        let tx = Tx {
            id: TxId::new(&"A".repeat(64)).unwrap(),
            chain: Chain::BTC,
            from_address: Address::new(from).unwrap(),
            to_address: Address::new(to).unwrap(),
            ..Default::default()
        };
        ObservedTx::new(tx, 10, pk.clone(), 16)
    }

    #[tokio::test]
    async fn observations_are_split_by_direction() {
        let pk = PubKey::new("thorpub1vault");
        let bridge = MockBridge::new("thor1signer");
        bridge.state().vaults.push(vault(&pk, "bc1vault"));

        let msgs = bridge
            .get_observations_std_tx(vec![
                observed("bc1user", "bc1vault", &pk),
                observed("bc1vault", "bc1user", &pk),
            ])
            .await
            .unwrap();
        assert_eq!(msgs.len(), 2);
        match &msgs[1] {
            Msg::ObservedTxOut { txs, signer } => {
                assert_eq!(signer, "thor1signer");
                assert_eq!(txs[0].finalise_height, txs[0].block_height);
            }
            other => panic!("unexpected message {other:?}"),
        }

        let unrelated = bridge
            .get_observations_std_tx(vec![observed("bc1a", "bc1b", &pk)])
            .await;
        assert!(unrelated.is_err());
    }

    #[tokio::test]
    async fn keysign_failure_is_broadcast() {
        let bridge = MockBridge::new("thor1signer");
        let blame = Blame {
            fail_reason: "timeout".into(),
            ..Default::default()
        };
        bridge
            .post_keysign_failure(
                blame,
                12,
                "OUT:ABC".into(),
                Coins::default(),
                PubKey::new("thorpub1vault"),
            )
            .await
            .unwrap();
        let sent = bridge.broadcasts();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0][0].kind(), "tss_keysign_fail");
    }

    #[tokio::test]
    async fn node_status_comes_from_the_node_account() {
        let bridge = MockBridge::new("thor1signer");
        bridge.state().node_status = NodeStatus::Active;
        assert_eq!(bridge.fetch_node_status().await.unwrap(), NodeStatus::Active);
        bridge.wait_to_catch_up().await.unwrap();
    }

    #[test]
    fn dispatch_by_chain() {
        let clients: ChainClients = [
            Arc::new(MockChainClient::new(Chain::BTC)) as Arc<dyn ChainClient>,
            Arc::new(MockChainClient::new(Chain::ETH)),
        ]
        .into_iter()
        .collect();
        assert_eq!(clients.len(), 2);
        assert_eq!(clients.chains(), vec![Chain::ETH, Chain::BTC]);
        assert_eq!(clients.client(Chain::BTC).unwrap().get_chain(), Chain::BTC);
        assert!(matches!(
            clients.client(Chain::DOGE),
            Err(Error::ChainNotFound { chain: Chain::DOGE })
        ));
    }
}
