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

use std::sync::Arc;

use async_trait::async_trait;
use bifrost_block_scanner::BlockScannerFetcher;
use bifrost_client_traits::Bridge;
use bifrost_pubkey_manager::PubKeyManager;
use bifrost_types::{Chain, KeygenBlock, TxIn, TxOut};
use bifrost_utils::metric::{Metrics, Module};
use bifrost_utils::{Error, Result};
use tokio::sync::mpsc;

const QUEUE_CAPACITY: usize = 128;

/// Reads, per home block, the outbounds our vaults must sign and the
/// keygens we take part in.
pub struct ThorchainBlockScanner {
    bridge: Arc<dyn Bridge>,
    pubkey_manager: Arc<PubKeyManager>,
    metrics: Arc<Metrics>,
    tx_out: mpsc::Sender<TxOut>,
    keygen: mpsc::Sender<KeygenBlock>,
}

impl ThorchainBlockScanner {
    /// Creates the scanner together with the receiving ends of its
    /// outbound and keygen queues.
    pub fn new(
        bridge: Arc<dyn Bridge>,
        pubkey_manager: Arc<PubKeyManager>,
        metrics: Arc<Metrics>,
    ) -> (Self, mpsc::Receiver<TxOut>, mpsc::Receiver<KeygenBlock>) {
        let (tx_out, tx_out_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (keygen, keygen_rx) = mpsc::channel(QUEUE_CAPACITY);
        let scanner = Self {
            bridge,
            pubkey_manager,
            metrics,
            tx_out,
            keygen,
        };
        (scanner, tx_out_rx, keygen_rx)
    }

    async fn process_tx_out_block(&self, height: i64) -> Result<()> {
        for pub_key in self.pubkey_manager.get_sign_pubkeys() {
            if pub_key.is_empty() {
                continue;
            }
            let tx_out = match self.bridge.get_keysign(height, &pub_key).await {
                Ok(tx_out) => tx_out,
                Err(e) if e.is_unavailable_block() => return Err(e),
                Err(e) => {
                    self.metrics.error(
                        Module::ThorchainBlockScanner,
                        Some(Chain::THOR),
                        "fail_to_get_keysign",
                    );
                    return Err(e);
                }
            };
            if tx_out.tx_array.is_empty() {
                tracing::debug!(block = height, %pub_key, "nothing to process");
                continue;
            }
            self.tx_out
                .send(tx_out)
                .await
                .map_err(|_| Error::ChannelClosed("tx out"))?;
        }
        Ok(())
    }

    async fn process_keygen_block(&self, height: i64) -> Result<()> {
        let Some(pub_key) = self.pubkey_manager.get_node_pubkey() else {
            return Ok(());
        };
        let keygen = self.bridge.get_keygen_block(height, &pub_key).await?;
        if keygen.height == 0 {
            return Err(Error::UnavailableBlock);
        }
        if !keygen.keygens.is_empty() {
            self.keygen
                .send(keygen)
                .await
                .map_err(|_| Error::ChannelClosed("keygen"))?;
        }
        Ok(())
    }
}

#[async_trait]
impl BlockScannerFetcher for ThorchainBlockScanner {
    async fn fetch_mem_pool(&self, _height: i64) -> Result<TxIn> {
        Ok(TxIn::new(Chain::THOR, Vec::new()))
    }

    async fn fetch_txs(&self, height: i64, _chain_height: i64) -> Result<TxIn> {
        self.process_tx_out_block(height).await?;
        self.process_keygen_block(height).await?;
        Ok(TxIn::new(Chain::THOR, Vec::new()))
    }

    async fn get_height(&self) -> Result<i64> {
        self.bridge.get_block_height().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bifrost_client_traits::mocks::MockBridge;
    use bifrost_types::{
        Address, Coin, Keygen, KeygenType, PubKey, TxArrayItem,
    };

    fn setup() -> (
        Arc<MockBridge>,
        Arc<PubKeyManager>,
        ThorchainBlockScanner,
        mpsc::Receiver<TxOut>,
        mpsc::Receiver<KeygenBlock>,
    ) {
        let bridge = Arc::new(MockBridge::new("thor1node"));
        let metrics = Arc::new(Metrics::new().unwrap());
        let pubkey_manager =
            Arc::new(PubKeyManager::new(bridge.clone(), metrics.clone()));
        let (scanner, tx_out, keygen) =
            ThorchainBlockScanner::new(bridge.clone(), pubkey_manager.clone(), metrics);
        (bridge, pubkey_manager, scanner, tx_out, keygen)
    }

    #[tokio::test]
    async fn forwards_keysigns_of_our_vaults() {
        let (bridge, pubkeys, scanner, mut tx_out, _keygen) = setup();
        let vault = PubKey::new("thorpub1vault");
        pubkeys.add_pubkey(vault.clone(), true);
        pubkeys.add_pubkey(PubKey::new("thorpub1other"), false);
        bridge.set_block_height(10);
        bridge.set_keysign(
            5,
            &vault,
            TxOut {
                height: 5,
                tx_array: vec![TxArrayItem {
                    chain: Chain::BTC,
                    to_address: Address::new("bc1quser").unwrap(),
                    vault_pub_key: vault.clone(),
                    coin: Coin::new(Chain::BTC.gas_asset(), 1_000),
                    memo: String::new(),
                    max_gas: Default::default(),
                    gas_rate: 0,
                    in_hash: Default::default(),
                    out_hash: Default::default(),
                    aggregator: String::new(),
                    aggregator_target_asset: String::new(),
                    aggregator_target_limit: None,
                }],
            },
        );

        let tx_in = scanner.fetch_txs(5, 10).await.unwrap();
        assert!(tx_in.tx_array.is_empty());
        let forwarded = tx_out.try_recv().unwrap();
        assert_eq!(forwarded.height, 5);
        assert!(tx_out.try_recv().is_err());
        // only the sign pubkey is queried
        assert_eq!(bridge.state().keysign_queries, 1);

        let err = scanner.fetch_txs(11, 10).await.unwrap_err();
        assert!(err.is_unavailable_block());
    }

    #[tokio::test]
    async fn forwards_keygens_of_the_node() {
        let (bridge, pubkeys, scanner, _tx_out, mut keygen) = setup();
        bridge.set_block_height(10);
        scanner.fetch_txs(3, 10).await.unwrap();
        assert!(keygen.try_recv().is_err());

        let node = PubKey::new("thorpub1node");
        pubkeys.add_node_pubkey(node.clone());
        bridge.state().keygen_blocks.insert(
            4,
            KeygenBlock {
                height: 4,
                keygens: vec![Keygen::new(
                    4,
                    vec![node, PubKey::new("thorpub1peer")],
                    KeygenType::Asgard,
                )],
            },
        );
        scanner.fetch_txs(3, 10).await.unwrap();
        assert!(keygen.try_recv().is_err());
        scanner.fetch_txs(4, 10).await.unwrap();
        assert_eq!(keygen.try_recv().unwrap().keygens.len(), 1);
    }
}
