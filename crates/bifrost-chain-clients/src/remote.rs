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

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bifrost_block_scanner::BlockScanner;
use bifrost_client_traits::{
    Bridge, ChainClient, KeyManager, ObserverQueues, SignTxError, SignedTx,
};
use bifrost_config::ChainConfig;
use bifrost_context::BifrostContext;
use bifrost_store::{KeyValueStore, ScannerStorage, SignerCache};
use bifrost_types::{
    Account, Chain, PubKey, Solvency, TxIn, TxInItem, TxOutItem,
};
use bifrost_utils::metric::Module;
use bifrost_utils::Result;
use tokio::sync::mpsc;

use crate::sidecar::SidecarApi;
use crate::solvency::is_vault_solvent;

/// A [`ChainClient`] backed by a chain sidecar.
pub struct RemoteChainClient {
    ctx: BifrostContext,
    config: ChainConfig,
    bridge: Arc<dyn Bridge>,
    key_manager: Arc<dyn KeyManager>,
    api: Arc<SidecarApi>,
    storage: ScannerStorage,
    signer_cache: SignerCache,
    scanner: parking_lot::Mutex<Option<Arc<BlockScanner>>>,
    vault_locks: parking_lot::Mutex<HashMap<PubKey, Arc<tokio::sync::Mutex<()>>>>,
    solvency_queue: parking_lot::Mutex<Option<mpsc::Sender<Solvency>>>,
    last_solvency_check_height: AtomicI64,
}

impl std::fmt::Debug for RemoteChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteChainClient")
            .field("chain", &self.config.chain_id)
            .field("api", &self.api)
            .finish()
    }
}

impl RemoteChainClient {
    /// Creates the adapter of `config.chain_id`, keeping its scan position
    /// and signer cache in `store`.
    pub fn new(
        ctx: BifrostContext,
        config: ChainConfig,
        bridge: Arc<dyn Bridge>,
        key_manager: Arc<dyn KeyManager>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        let api = SidecarApi::new(
            config.chain_id,
            &config.rpc_host,
            config.block_scanner.http_request_timeout(),
        )?;
        Ok(Self {
            ctx,
            config,
            bridge,
            key_manager,
            api: Arc::new(api),
            storage: ScannerStorage::new(store.clone()),
            signer_cache: SignerCache::new(store),
            scanner: parking_lot::Mutex::new(None),
            vault_locks: parking_lot::Mutex::new(HashMap::new()),
            solvency_queue: parking_lot::Mutex::new(None),
            last_solvency_check_height: AtomicI64::new(0),
        })
    }

    /// The sidecar API.
    pub fn api(&self) -> &SidecarApi {
        &self.api
    }

    /// Signings of one vault are serialised, they share its sequence.
    fn vault_lock(&self, pub_key: &PubKey) -> Arc<tokio::sync::Mutex<()>> {
        self.vault_locks
            .lock()
            .entry(pub_key.clone())
            .or_default()
            .clone()
    }

    fn sign_error(&self, source: bifrost_utils::Error, checkpoint: Vec<u8>) -> SignTxError {
        self.ctx.metrics.error(
            Module::Signer,
            Some(self.config.chain_id),
            "fail_sign_tx",
        );
        SignTxError { source, checkpoint }
    }
}

#[async_trait]
impl ChainClient for RemoteChainClient {
    async fn start(&self, queues: ObserverQueues) -> Result<()> {
        self.api.set_errata_queue(queues.errata.clone());
        *self.solvency_queue.lock() = Some(queues.solvency.clone());
        let scanner = BlockScanner::new(
            self.config.block_scanner.clone(),
            self.storage.clone(),
            self.bridge.clone(),
            self.api.clone(),
            self.ctx.metrics.clone(),
        )
        .await?;
        let scanner = Arc::new(scanner);
        scanner.start(queues.tx_in, self.ctx.shutdown_signal());
        *self.scanner.lock() = Some(scanner);
        tracing::info!(chain = %self.config.chain_id, "chain client started");
        Ok(())
    }

    async fn stop(&self) {
        let scanner = self.scanner.lock().take();
        if let Some(scanner) = scanner {
            scanner.stop().await;
        }
        if let Err(e) = self.storage.close() {
            tracing::error!(chain = %self.config.chain_id, error = %e, "fail to close scanner storage");
        }
    }

    fn is_block_scanner_healthy(&self) -> bool {
        self.scanner
            .lock()
            .as_ref()
            .map(|scanner| scanner.is_healthy())
            .unwrap_or(false)
    }

    #[tracing::instrument(
        skip_all,
        fields(chain = %item.chain, vault = %item.vault_pub_key, in_hash = %item.in_hash)
    )]
    async fn sign_tx(
        &self,
        item: &TxOutItem,
        height: i64,
    ) -> std::result::Result<SignedTx, SignTxError> {
        let cache_hash = item.cache_hash();
        if self.signer_cache.has_signed(&cache_hash)? {
            tracing::info!("transaction signed before, ignore");
            return Ok(SignedTx::default());
        }
        let lock = self.vault_lock(&item.vault_pub_key);
        let _guard = lock.lock().await;

        let unsigned = self
            .api
            .build(item, height, &item.checkpoint)
            .await
            .map_err(|e| self.sign_error(e, item.checkpoint.clone()))?;
        if unsigned.payload.is_empty() {
            tracing::info!("nothing to sign");
            return Ok(SignedTx::default());
        }
        let signature = self
            .key_manager
            .keysign(&item.vault_pub_key, &unsigned.payload)
            .await
            .map_err(|e| self.sign_error(e, unsigned.checkpoint.clone()))?;
        let assembled = self
            .api
            .assemble(item, &unsigned.checkpoint, &signature)
            .await
            .map_err(|e| self.sign_error(e, unsigned.checkpoint.clone()))?;
        Ok(SignedTx {
            raw: assembled.raw,
            checkpoint: unsigned.checkpoint,
            observation: assembled.observation,
        })
    }

    async fn broadcast_tx(
        &self,
        item: &TxOutItem,
        signed: &[u8],
    ) -> Result<String> {
        let tx_id = self.api.broadcast(item, signed).await?;
        if let Err(e) = self.signer_cache.set_signed(&item.cache_hash(), &tx_id) {
            tracing::error!(%tx_id, error = %e, "fail to mark tx out item as signed");
        }
        Ok(tx_id)
    }

    async fn get_height(&self) -> Result<i64> {
        self.api.height().await
    }

    async fn get_address(&self, pool_pub_key: &PubKey) -> Result<String> {
        self.api.address(pool_pub_key).await
    }

    async fn get_account(
        &self,
        pool_pub_key: &PubKey,
        height: Option<i64>,
    ) -> Result<Account> {
        self.api.account(pool_pub_key, height).await
    }

    async fn get_account_by_address(
        &self,
        address: &str,
        height: Option<i64>,
    ) -> Result<Account> {
        self.api.account_by_address(address, height).await
    }

    fn get_chain(&self) -> Chain {
        self.config.chain_id
    }

    fn get_config(&self) -> &ChainConfig {
        &self.config
    }

    async fn get_confirmation_count(&self, tx_in: &TxIn) -> i64 {
        if tx_in.tx_array.is_empty() || tx_in.mem_pool {
            return 0;
        }
        match self.api.confirmations(tx_in).await {
            Ok(required) => required.max(0),
            Err(e) => {
                tracing::error!(chain = %tx_in.chain, error = %e, "fail to get confirmation count");
                0
            }
        }
    }

    async fn confirmation_count_ready(&self, tx_in: &TxIn) -> bool {
        if tx_in.tx_array.is_empty()
            || tx_in.mem_pool
            || tx_in.confirmation_required == 0
        {
            return true;
        }
        let mut current = self.api.current_height();
        if current == 0 {
            current = match self.api.height().await {
                Ok(height) => height,
                Err(_) => return false,
            };
        }
        current - tx_in.first_block_height() >= tx_in.confirmation_required
    }

    async fn on_observed_tx_in(&self, item: &TxInItem, _block_height: i64) {
        let Ok(memo) = bifrost_memo::parse_memo(&item.memo) else {
            return;
        };
        if !memo.is_outbound() {
            return;
        }
        let Some(in_hash) = memo.tx_id() else {
            return;
        };
        let hash = item.cache_hash(self.config.chain_id, in_hash.as_str());
        if let Err(e) = self.signer_cache.set_signed(&hash, &item.tx) {
            tracing::error!(tx = %item.tx, error = %e, "fail to update signer cache");
        }
    }

    async fn should_report_solvency(&self, height: i64) -> bool {
        height - self.last_solvency_check_height.load(Ordering::SeqCst)
            >= self.config.solvency_blocks
    }

    #[tracing::instrument(skip(self), fields(chain = %self.config.chain_id))]
    async fn report_solvency(&self, height: i64) -> Result<()> {
        if !self.should_report_solvency(height).await {
            return Ok(());
        }
        let asgards = self.bridge.get_asgards().await?;
        let queue = self.solvency_queue.lock().clone();
        let Some(queue) = queue else {
            return Err(bifrost_utils::Error::Generic(
                "chain client is not started",
            ));
        };
        let healthy = self.is_block_scanner_healthy();
        for vault in asgards {
            let account = match self.get_account(&vault.pub_key, Some(height)).await
            {
                Ok(account) => account,
                Err(e) => {
                    tracing::error!(vault = %vault.pub_key, error = %e, "fail to get account balance");
                    continue;
                }
            };
            if healthy && is_vault_solvent(&account, &vault) {
                continue;
            }
            let report = Solvency {
                height,
                chain: self.config.chain_id,
                pub_key: vault.pub_key.clone(),
                coins: account.coins,
            };
            if queue.send(report).await.is_err() {
                return Err(bifrost_utils::Error::ChannelClosed("solvency"));
            }
        }
        self.last_solvency_check_height
            .store(height, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use bifrost_client_traits::mocks::{MockBridge, MockKeyManager};
    use bifrost_config::BifrostConfig;
    use bifrost_store::InMemoryStore;
    use bifrost_types::{Address, Coin, Coins, TxId, Vault};
    use serde_json::Value;
    use std::net::TcpListener;
    use std::time::Duration;

    const IN_HASH: &str =
        "2f84a5c33ab2a1a5f62c1cbc0e3e7e7bd09ce4b7dd42cf83c6ba0c5b9e6a0ca1";

    fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service());
        tokio::spawn(server);
        format!("http://{addr}")
    }

    fn account(amount: u128) -> Account {
        Account {
            coins: Coins::new(vec![Coin::new(Chain::BTC.gas_asset(), amount)]),
            ..Default::default()
        }
    }

    fn sidecar() -> Router {
        Router::new()
            .route("/height", get(|| async { Json(120i64) }))
            .route(
                "/block/:height",
                get(|Path(height): Path<i64>| async move {
                    if height > 120 {
                        return Err(StatusCode::NOT_FOUND);
                    }
                    Ok(Json(serde_json::json!({
                        "tx_in": { "chain": "BTC", "txArray": [] },
                        "errata": [{ "tx_id": IN_HASH, "chain": "BTC" }],
                    })))
                }),
            )
            .route(
                "/account/:pk",
                get(|Path(pk): Path<String>, Query(q): Query<HashMap<String, String>>| async move {
                    assert_eq!(q.get("height").map(String::as_str), Some("110"));
                    let amount = if pk == "thorpub1poor" { 10 } else { 1_000 };
                    Json(account(amount))
                }),
            )
            .route(
                "/address/:pk",
                get(|Path(pk): Path<String>| async move {
                    Json(serde_json::json!({ "address": format!("bc1{pk}") }))
                }),
            )
            .route("/confirmations", post(|| async { Json(3i64) }))
            .route(
                "/sign/build",
                post(|Json(body): Json<Value>| async move {
                    assert_eq!(body["height"], 77);
                    Json(serde_json::json!({
                        "payload": hex::encode(b"payload"),
                        "checkpoint": "cafe",
                    }))
                }),
            )
            .route(
                "/sign/assemble",
                post(|Json(body): Json<Value>| async move {
                    assert_eq!(body["checkpoint"], "cafe");
                    Json(serde_json::json!({ "raw": body["signature"] }))
                }),
            )
            .route(
                "/broadcast",
                post(|Json(body): Json<Value>| async move {
                    assert!(body["raw"].as_str().is_some());
                    Json(serde_json::json!({ "tx_id": "chain-hash-1" }))
                }),
            )
    }

    fn client(
        host: String,
        bridge: Arc<MockBridge>,
        key_manager: Arc<MockKeyManager>,
    ) -> RemoteChainClient {
        let ctx = BifrostContext::new(BifrostConfig::default()).unwrap();
        let mut config = ChainConfig::new(Chain::BTC, host);
        config.block_scanner.chain_id = Chain::BTC;
        config.block_scanner.start_block_height = 120;
        config.block_scanner.block_height_discover_back_off = 10;
        config.solvency_blocks = 5;
        RemoteChainClient::new(
            ctx,
            config,
            bridge,
            key_manager,
            Arc::new(InMemoryStore::default()),
        )
        .unwrap()
    }

    fn out_item() -> TxOutItem {
        let mut item = TxOutItem::new(
            Chain::BTC,
            Address::new("bc1user").unwrap(),
            PubKey::new("thorpub1vault"),
            Coins::new(vec![Coin::new(Chain::BTC.gas_asset(), 100)]),
            format!("OUT:{IN_HASH}"),
        );
        item.in_hash = TxId::new(IN_HASH).unwrap();
        item
    }

    fn queues() -> (
        ObserverQueues,
        mpsc::Receiver<TxIn>,
        mpsc::Receiver<bifrost_types::ErrataBlock>,
        mpsc::Receiver<Solvency>,
    ) {
        let (tx_in, tx_in_rx) = mpsc::channel(8);
        let (errata, errata_rx) = mpsc::channel(8);
        let (solvency, solvency_rx) = mpsc::channel(8);
        (
            ObserverQueues {
                tx_in,
                errata,
                solvency,
            },
            tx_in_rx,
            errata_rx,
            solvency_rx,
        )
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn signs_broadcasts_and_remembers_outbounds() {
        let host = serve(sidecar());
        let bridge = Arc::new(MockBridge::new("thor1node"));
        let key_manager = Arc::new(MockKeyManager::new());
        let client = client(host, bridge, key_manager.clone());
        let item = out_item();

        let signed = client.sign_tx(&item, 77).await.unwrap();
        assert_eq!(signed.checkpoint, vec![0xca, 0xfe]);
        let mut expected = b"thorpub1vault".to_vec();
        expected.extend_from_slice(b"payload");
        assert_eq!(signed.raw, expected);
        assert_eq!(key_manager.state().keysign_calls, 1);

        let tx_id = client.broadcast_tx(&item, &signed.raw).await.unwrap();
        assert_eq!(tx_id, "chain-hash-1");

        // the same instruction is never signed twice
        let again = client.sign_tx(&item, 77).await.unwrap();
        assert!(again.raw.is_empty());
        assert_eq!(key_manager.state().keysign_calls, 1);
    }

    #[tokio::test]
    async fn keysign_failure_keeps_the_checkpoint() {
        let host = serve(sidecar());
        let bridge = Arc::new(MockBridge::new("thor1node"));
        let key_manager = Arc::new(MockKeyManager::new());
        key_manager
            .state()
            .keysign_results
            .push_back(Err(bifrost_utils::Error::KeysignTimeout));
        let client = client(host, bridge, key_manager);

        let err = client.sign_tx(&out_item(), 77).await.unwrap_err();
        assert_eq!(err.checkpoint, vec![0xca, 0xfe]);
        assert!(matches!(err.source, bifrost_utils::Error::KeysignTimeout));
    }

    #[tokio::test]
    async fn observed_outbound_marks_instruction_signed() {
        let host = serve(sidecar());
        let bridge = Arc::new(MockBridge::new("thor1node"));
        let key_manager = Arc::new(MockKeyManager::new());
        let client = client(host, bridge, key_manager.clone());
        let item = out_item();
        let observed = TxInItem {
            block_height: 100,
            tx: String::from("chain-hash-2"),
            memo: item.memo.clone(),
            sender: String::from("bc1vault"),
            to: item.to_address.to_string(),
            coins: item.coins.clone(),
            ..Default::default()
        };

        client.on_observed_tx_in(&observed, 100).await;
        let signed = client.sign_tx(&item, 77).await.unwrap();
        assert_eq!(signed, SignedTx::default());
        assert_eq!(key_manager.state().keysign_calls, 0);
    }

    #[tokio::test]
    async fn confirmation_counting() {
        let host = serve(sidecar());
        let bridge = Arc::new(MockBridge::new("thor1node"));
        let client = client(host, bridge, Arc::new(MockKeyManager::new()));
        let item = TxInItem {
            block_height: 118,
            tx: IN_HASH.to_string(),
            ..Default::default()
        };
        let mut tx_in = TxIn::new(Chain::BTC, vec![item]);

        assert_eq!(client.get_confirmation_count(&tx_in).await, 3);
        tx_in.confirmation_required = 3;
        // tip 120, block 118
        assert!(!client.confirmation_count_ready(&tx_in).await);
        tx_in.confirmation_required = 2;
        assert!(client.confirmation_count_ready(&tx_in).await);

        tx_in.mem_pool = true;
        assert_eq!(client.get_confirmation_count(&tx_in).await, 0);
        assert!(client.confirmation_count_ready(&TxIn::new(Chain::BTC, vec![])).await);
    }

    #[tokio::test]
    async fn reports_insolvent_vaults_only() {
        let host = serve(sidecar());
        let bridge = Arc::new(MockBridge::new("thor1node"));
        for pk in ["thorpub1rich", "thorpub1poor"] {
            bridge.state().vaults.push(Vault {
                pub_key: PubKey::new(pk),
                coins: Coins::new(vec![Coin::new(Chain::BTC.gas_asset(), 500)]),
                ..Default::default()
            });
        }
        let client = client(host, bridge, Arc::new(MockKeyManager::new()));
        let (queues, _tx_in, mut errata, mut solvency) = queues();
        client.start(queues).await.unwrap();

        // the scanner starts at 120, the sidecar's block rolls one tx back
        let rolled_back = tokio::time::timeout(Duration::from_secs(10), errata.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rolled_back.height, 120);
        assert_eq!(rolled_back.txs[0].tx_id.as_str(), IN_HASH);

        tokio::time::timeout(Duration::from_secs(10), async {
            while !client.is_block_scanner_healthy() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert!(client.should_report_solvency(110).await);
        client.report_solvency(110).await.unwrap();
        let report = solvency.try_recv().unwrap();
        assert_eq!(report.pub_key.as_str(), "thorpub1poor");
        assert_eq!(report.height, 110);
        assert!(solvency.try_recv().is_err());
        assert!(!client.should_report_solvency(112).await);
        assert!(client.should_report_solvency(115).await);
        client.stop().await;
    }
}
