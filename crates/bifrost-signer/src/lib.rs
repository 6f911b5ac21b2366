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

//! # Bifrost Signer ✍️
//!
//! The signer follows the home chain block by block. Every outbound our
//! vaults are asked to send is stored, then signed through the TSS engine
//! and broadcast on its chain. Items of one `(chain, vault)` pair are
//! handled strictly in order, one at a time, so every node of a vault
//! works on the same item at the same moment.
//!
//! A keysign that fails in its last round keeps its checkpoint and blocks
//! its group until it succeeds, and a signed transaction whose broadcast
//! failed is broadcast again without being signed twice.

#![warn(missing_docs)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bifrost_block_scanner::BlockScanner;
use bifrost_client_traits::{
    Bridge, ChainClient, ChainClients, KeyManager, SignTxError,
};
use bifrost_config::SignerConfig;
use bifrost_context::{BifrostContext, Shutdown};
use bifrost_memo::Memo;
use bifrost_observer::Observer;
use bifrost_pubkey_manager::PubKeyManager;
use bifrost_store::{SignerStorage, TxOutStoreItem, TxStatus};
use bifrost_tss::keyshare;
use bifrost_types::{
    mimir, Blame, Coins, Gas, KeygenBlock, PubKey, TxIn, TxInItem,
    TxOut, TxOutItem,
};
use bifrost_utils::metric::Module;
use bifrost_utils::{probe, Error, Result};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

mod thorchain_scanner;

pub use thorchain_scanner::ThorchainBlockScanner;

/// Where signed outbounds go to be attested right away.
#[async_trait]
pub trait ObserveSigned: Send + Sync {
    /// Queues observations of outbounds that were just broadcast.
    async fn observe_signed(&self, tx_in: TxIn);
}

#[async_trait]
impl ObserveSigned for Observer {
    async fn observe_signed(&self, tx_in: TxIn) {
        Observer::observe_signed(self, tx_in).await
    }
}

struct Receivers {
    tx_out: mpsc::Receiver<TxOut>,
    keygen: mpsc::Receiver<KeygenBlock>,
}

/// Signs and broadcasts outbounds, and runs keygen ceremonies.
pub struct Signer {
    ctx: BifrostContext,
    config: SignerConfig,
    bridge: Arc<dyn Bridge>,
    key_manager: Arc<dyn KeyManager>,
    pubkey_manager: Arc<PubKeyManager>,
    chains: ChainClients,
    storage: SignerStorage,
    observer: Arc<dyn ObserveSigned>,
    fetcher: Arc<ThorchainBlockScanner>,
    scanner: parking_lot::Mutex<Option<Arc<BlockScanner>>>,
    receivers: parking_lot::Mutex<Option<Receivers>>,
    stopping: AtomicBool,
    notify_stop: broadcast::Sender<()>,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("chains", &self.chains.chains())
            .field("storage", &self.storage)
            .finish()
    }
}

impl Signer {
    /// Creates a signer over `storage`.
    pub fn new(
        ctx: BifrostContext,
        bridge: Arc<dyn Bridge>,
        key_manager: Arc<dyn KeyManager>,
        pubkey_manager: Arc<PubKeyManager>,
        chains: ChainClients,
        storage: SignerStorage,
        observer: Arc<dyn ObserveSigned>,
    ) -> Self {
        let (fetcher, tx_out, keygen) = ThorchainBlockScanner::new(
            bridge.clone(),
            pubkey_manager.clone(),
            ctx.metrics.clone(),
        );
        let (notify_stop, _) = broadcast::channel(1);
        Self {
            config: ctx.config.signer.clone(),
            ctx,
            bridge,
            key_manager,
            pubkey_manager,
            chains,
            storage,
            observer,
            fetcher: Arc::new(fetcher),
            scanner: parking_lot::Mutex::new(None),
            receivers: parking_lot::Mutex::new(Some(Receivers { tx_out, keygen })),
            stopping: AtomicBool::new(false),
            notify_stop,
            handles: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Waits up to `attempts` home blocks for the node account to have a
    /// pubkey, then registers it and the vaults it signs for.
    pub async fn register_node_account(&self, attempts: usize) -> Result<PubKey> {
        for _ in 0..attempts {
            let node = self
                .bridge
                .get_node_account(self.bridge.signer_address())
                .await?;
            let pub_key = node.pub_key_set.secp256k1;
            if !pub_key.is_empty() {
                for member in node.signer_membership {
                    self.pubkey_manager.add_pubkey(member, true);
                }
                self.pubkey_manager.add_node_pubkey(pub_key.clone());
                tracing::info!(%pub_key, "node account registered");
                return Ok(pub_key);
            }
            tracing::info!("waiting for node account to be registered...");
            tokio::time::sleep(self.ctx.home_block_time()).await;
        }
        Err(Error::Generic("unable to find pubkey for this node account"))
    }

    fn stop_signal(&self) -> Shutdown {
        Shutdown::new(self.notify_stop.subscribe())
    }

    /// Starts the home-chain scanner and the signer loops.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let receivers = self
            .receivers
            .lock()
            .take()
            .ok_or(Error::Generic("signer already started"))?;
        let scanner = BlockScanner::new(
            self.config.block_scanner.clone(),
            self.storage.scanner(),
            self.bridge.clone(),
            self.fetcher.clone(),
            self.ctx.metrics.clone(),
        )
        .await?;
        let scanner = Arc::new(scanner);
        // the home chain scanner hands its work over through the fetcher
        let (queue, _) = mpsc::channel(1);
        scanner.start(queue, self.ctx.shutdown_signal());
        *self.scanner.lock() = Some(scanner);

        let mut handles = self.handles.lock();
        handles.push(tokio::spawn(
            self.clone()
                .process_txn_out(receivers.tx_out, self.stop_signal()),
        ));
        handles.push(tokio::spawn(
            self.clone()
                .process_keygen(receivers.keygen, self.stop_signal()),
        ));
        handles.push(tokio::spawn(
            self.clone().sign_transactions(self.stop_signal()),
        ));
        let notify_stop = self.notify_stop.clone();
        let mut shutdown = self.ctx.shutdown_signal();
        let mut stopped = self.stop_signal();
        handles.push(tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.recv() => {
                    let _ = notify_stop.send(());
                }
                _ = stopped.recv() => {}
            }
        }));
        tracing::info!("signer started");
        Ok(())
    }

    /// Stops the home-chain scanner and the signer loops.
    pub async fn stop(&self) {
        tracing::info!("receive request to stop signer");
        self.stopping.store(true, Ordering::SeqCst);
        let scanner = self.scanner.lock().take();
        if let Some(scanner) = scanner {
            scanner.stop().await;
        }
        let _ = self.notify_stop.send(());
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "signer task panicked");
            }
        }
        if let Err(e) = self.storage.close() {
            tracing::error!(error = %e, "fail to close signer storage");
        }
        tracing::info!("signer stopped successfully");
    }

    async fn process_txn_out(
        self: Arc<Self>,
        mut queue: mpsc::Receiver<TxOut>,
        mut stop: Shutdown,
    ) {
        tracing::info!("start to process tx out");
        loop {
            tokio::select! {
                _ = stop.recv() => break,
                tx_out = queue.recv() => match tx_out {
                    Some(tx_out) => self.store_tx_out(tx_out),
                    None => break,
                },
            }
        }
        tracing::info!("stop to process tx out");
    }

    /// Stores every item of a published outbound batch.
    pub fn store_tx_out(&self, tx_out: TxOut) {
        tracing::info!(
            height = tx_out.height,
            count = tx_out.tx_array.len(),
            "received a tx out array from THORChain"
        );
        let items = tx_out
            .tx_array
            .iter()
            .enumerate()
            .map(|(index, item)| {
                TxOutStoreItem::new(tx_out.height, item.tx_out_item(), index as i64)
            })
            .collect::<Vec<_>>();
        if let Err(e) = self.storage.batch(&items) {
            tracing::error!(error = %e, "fail to save tx out items to storage");
        }
    }

    async fn process_keygen(
        self: Arc<Self>,
        mut queue: mpsc::Receiver<KeygenBlock>,
        mut stop: Shutdown,
    ) {
        tracing::info!("start to process keygen");
        loop {
            tokio::select! {
                _ = stop.recv() => break,
                block = queue.recv() => match block {
                    Some(block) => self.handle_keygen_block(block).await,
                    None => break,
                },
            }
        }
        tracing::info!("stop to process keygen");
    }

    /// Runs every keygen of a block and attests the outcome.
    pub async fn handle_keygen_block(&self, block: KeygenBlock) {
        tracing::info!(height = block.height, "received a keygen block");
        for keygen in &block.keygens {
            let started = Instant::now();
            self.ctx.metrics.keygen_total.inc();
            let generated = tokio::time::timeout(
                self.config.keygen_timeout(),
                self.key_manager.generate_new_key(block.height, &keygen.members),
            )
            .await;
            let (pool_pub_key, blame) = match generated {
                Ok(Ok(generated)) => generated,
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "fail to generate new pubkey");
                    self.ctx.metrics.error(
                        Module::Signer,
                        None,
                        "fail_to_keygen_pubkey",
                    );
                    (PubKey::default(), Blame::default())
                }
                Err(_) => {
                    tracing::error!("keygen timed out");
                    self.ctx.metrics.error(Module::Signer, None, "keygen_timeout");
                    (PubKey::default(), Blame::default())
                }
            };
            if !blame.is_empty() {
                tracing::error!(
                    reason = %blame.fail_reason,
                    nodes = ?blame.blamed_pubkeys(),
                    "keygen blame"
                );
            }
            let keygen_time = started.elapsed().as_millis() as i64;

            if !pool_pub_key.is_empty() {
                self.pubkey_manager.add_pubkey(pool_pub_key.clone(), true);
            }
            // any member may become a yggdrasil vault
            for member in &keygen.members {
                self.pubkey_manager.add_pubkey(member.clone(), false);
            }

            let keyshares = self.backup_keyshares(&pool_pub_key).await;
            let msg = self.bridge.get_keygen_std_tx(
                keygen,
                pool_pub_key.clone(),
                keyshares,
                blame,
                self.ctx.config.keygen_chains(),
                block.height,
                keygen_time,
            );
            match self.bridge.broadcast(vec![msg]).await {
                Ok(tx_id) => {
                    tracing::info!(
                        block = block.height,
                        %pool_pub_key,
                        %tx_id,
                        "sent keygen to THORChain"
                    );
                    tracing::event!(
                        target: probe::TARGET,
                        tracing::Level::TRACE,
                        kind = %probe::Kind::Keygen,
                        height = block.height,
                        %pool_pub_key,
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "fail to broadcast keygen");
                    self.ctx.metrics.error(
                        Module::Signer,
                        None,
                        "fail_to_broadcast_keygen",
                    );
                }
            }
        }
    }

    /// The key share of a new vault, encrypted with the node's seed
    /// phrase. Best effort, empty when disabled or failing.
    async fn backup_keyshares(&self, pool_pub_key: &PubKey) -> Vec<u8> {
        if !self.config.backup_keyshares || pool_pub_key.is_empty() {
            return Vec::new();
        }
        let encrypted = async {
            let seed_phrase = keyshare::seed_phrase_from_env()?;
            let share = self.key_manager.keyshare(pool_pub_key).await?;
            if !self.config.keyshare_backup_dir.is_empty() {
                keyshare::backup_keyshare(
                    Path::new(&self.config.keyshare_backup_dir),
                    pool_pub_key,
                    &share,
                    &seed_phrase,
                )?;
            }
            keyshare::encrypt_keyshare(&share, &seed_phrase)
        }
        .await;
        encrypted.unwrap_or_else(|e| {
            tracing::error!(error = %e, "fail to encrypt keyshares");
            Vec::new()
        })
    }

    async fn sign_transactions(self: Arc<Self>, mut stop: Shutdown) {
        tracing::info!("start to sign transactions");
        loop {
            let pause = match self.bridge.is_catching_up().await {
                Ok(false) => {
                    self.process_transactions().await;
                    self.config.retry_interval()
                }
                Ok(true) => {
                    tracing::info!("THORChain is catching up, pause signing");
                    self.ctx.home_block_time()
                }
                Err(e) => {
                    tracing::error!(error = %e, "fail to get THORChain sync status");
                    self.ctx.home_block_time()
                }
            };
            if !stop.sleep(pause).await {
                break;
            }
        }
        tracing::info!("stop to sign transactions");
    }

    /// One pass over the stored items, every `(chain, vault)` group in
    /// parallel.
    pub async fn process_transactions(&self) {
        let lists = match self.storage.ordered_lists() {
            Ok(lists) => lists,
            Err(e) => {
                tracing::error!(error = %e, "fail to list tx out items");
                return;
            }
        };
        futures::future::join_all(
            lists.into_values().map(|items| self.process_group(items)),
        )
        .await;
    }

    /// Works through one group in order, stopping at the first failure so
    /// that nodes restart the same list on the next pass.
    async fn process_group(&self, mut items: Vec<TxOutStoreItem>) {
        let Some(chain) = items.first().map(|item| item.tx_out_item.chain) else {
            return;
        };
        if items.iter().any(|item| item.tx_out_item.chain != chain) {
            tracing::error!(%chain, "tx out items for different chains in the same batch");
            return;
        }
        let retries = items
            .iter()
            .filter(|item| item.is_retry())
            .cloned()
            .collect::<Vec<_>>();
        if !retries.is_empty() {
            tracing::info!(%chain, count = retries.len(), "found retry items");
            if retries.len() > 1 {
                tracing::error!(
                    %chain,
                    count = retries.len(),
                    "found more than one retry item"
                );
            }
            items = retries;
        }

        let mut observations = Vec::new();
        for (num, item) in items.into_iter().enumerate() {
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }
            if item.status == TxStatus::Spent {
                continue;
            }
            tracing::info!(
                num,
                height = item.height,
                status = ?item.status,
                tx = ?item.tx_out_item,
                "signing transaction"
            );
            let signed = tokio::time::timeout(
                self.config.keysign_timeout(),
                self.sign_and_broadcast(&item, &mut observations),
            )
            .await;
            let Ok(signed) = signed else {
                // only a restart brings a stuck TSS committee back in sync
                panic!(
                    "tx out item: {:?}, keysign timeout: {}",
                    item.tx_out_item,
                    Error::KeysignTimeout
                );
            };
            if let Err(e) = signed {
                self.handle_sign_failure(item, e).await;
                break;
            }
            if let Err(e) = self.storage.remove(&item) {
                tracing::error!(error = %e, "fail to remove tx out store item");
            }
        }

        if !observations.is_empty() {
            let mut tx_in = TxIn::new(chain, observations);
            tx_in.mem_pool = true;
            tx_in.filtered = true;
            self.observer.observe_signed(tx_in).await;
        }
    }

    async fn handle_sign_failure(&self, mut item: TxOutStoreItem, e: SignTxError) {
        let chain = item.tx_out_item.chain;
        match e.as_keysign() {
            Some(keysign) if keysign.round7() => {
                tracing::error!(error = %e.source, tx = ?item.tx_out_item, "round 7 signing error");
                self.ctx
                    .metrics
                    .keysign_round7_retries
                    .with_label_values(&[chain.as_str()])
                    .inc();
                item.round7_retry = true;
                if !e.checkpoint.is_empty() {
                    item.checkpoint = e.checkpoint.clone();
                }
                if let Err(e) = self.storage.set(&item) {
                    tracing::error!(error = %e, "fail to update tx out store item with round 7 retry");
                }
                return;
            }
            Some(keysign) if !keysign.blame.blame_nodes.is_empty() => {
                let tx = &item.tx_out_item;
                let posted = self
                    .bridge
                    .post_keysign_failure(
                        keysign.blame.clone(),
                        item.height,
                        tx.memo.clone(),
                        tx.coins.clone(),
                        tx.vault_pub_key.clone(),
                    )
                    .await;
                if let Err(e) = posted {
                    tracing::error!(error = %e, "fail to post keysign failure");
                }
            }
            _ => {}
        }
        tracing::error!(%chain, error = %e.source, "fail to sign and broadcast tx out store item");
        self.ctx.metrics.error(
            Module::Signer,
            Some(chain),
            "fail_to_sign_and_broadcast",
        );
    }

    /// Signs and broadcasts one stored item.
    ///
    /// `Ok` means the item is done, including when it turned out there is
    /// nothing to do for it. A signing error carries the checkpoint to
    /// reuse on the next attempt. The observation of a broadcast outbound
    /// is pushed onto `observations` when auto observing.
    pub async fn sign_and_broadcast(
        &self,
        item: &TxOutStoreItem,
        observations: &mut Vec<TxInItem>,
    ) -> std::result::Result<(), SignTxError> {
        let height = item.height;
        let mut tx = item.tx_out_item.clone();
        if !item.checkpoint.is_empty() {
            tx.checkpoint = item.checkpoint.clone();
        }

        let block_height = self.bridge.get_block_height().await?;
        let signing_period = self
            .bridge
            .get_constant(mimir::SIGNING_TRANSACTION_PERIOD)
            .await?;
        if !item.round7_retry
            && block_height - signing_period
                > height - self.config.reschedule_buffer_blocks
        {
            tracing::error!(
                height,
                block_height,
                signing_period,
                "tx is older than its signing window, skip it"
            );
            return Ok(());
        }

        let client = self.chains.client(tx.chain)?;
        if self.bridge.get_mimir(mimir::HALT_SIGNING).await? > 0 {
            tracing::info!("signing has been halted globally");
            return Ok(());
        }
        if self
            .bridge
            .get_mimir(&mimir::halt_signing_chain(tx.chain))
            .await?
            > 0
        {
            tracing::info!(chain = %tx.chain, "signing is halted");
            return Ok(());
        }
        if !self.pubkey_manager.has_pubkey(&tx.vault_pub_key) {
            tracing::info!(vault = %tx.vault_pub_key, "different pool address, ignore");
            return Ok(());
        }
        if tx.to_address.is_empty() {
            tracing::info!("to address is empty, ignore");
            return Ok(());
        }
        // an outbound the network cannot observe could be rescheduled and
        // sent a second time
        if !client.is_block_scanner_healthy() {
            return Err(Error::ScannerUnhealthy { chain: tx.chain }.into());
        }
        if tx.coins.0.is_empty() {
            tx = self.handle_ygg_return(height, tx, &client).await?;
        }

        let _timer = self
            .ctx
            .metrics
            .sign_and_broadcast_duration
            .with_label_values(&[tx.chain.as_str()])
            .start_timer();

        if !tx.out_hash.is_empty() {
            tracing::info!(out_hash = %tx.out_hash, "tx had been sent out before");
            return Ok(());
        }
        let queued = self.bridge.get_keysign(height, &tx.vault_pub_key).await?;
        if queued
            .tx_array
            .iter()
            .any(|queued| queued.tx_out_item().equals(&tx) && !queued.out_hash.is_empty())
        {
            tracing::info!("already signed, skipping");
            return Ok(());
        }

        let mut observation = None;
        let signed = if !item.signed_tx.is_empty() {
            tracing::info!(memo = %tx.memo, "retrying broadcast of already signed tx");
            item.signed_tx.clone()
        } else {
            let signed = client.sign_tx(&tx, height).await?;
            self.ctx
                .metrics
                .signer_signed
                .with_label_values(&[tx.chain.as_str()])
                .inc();
            observation = signed.observation;
            signed.raw
        };
        if signed.is_empty() {
            tracing::warn!("signed transaction is empty");
            return Ok(());
        }

        match client.broadcast_tx(&tx, &signed).await {
            Ok(hash) => {
                tracing::info!(chain = %tx.chain, %hash, "broadcast tx to chain");
                self.ctx
                    .metrics
                    .signer_broadcast
                    .with_label_values(&[tx.chain.as_str()])
                    .inc();
                tracing::event!(
                    target: probe::TARGET,
                    tracing::Level::TRACE,
                    kind = %probe::Kind::Signer,
                    chain = %tx.chain,
                    %hash,
                );
                if self.config.auto_observe {
                    observations.extend(observation);
                }
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, memo = %tx.memo, "fail to broadcast tx to chain");
                let mut item = item.clone();
                item.signed_tx = signed;
                if let Err(e) = self.storage.set(&item) {
                    tracing::error!(error = %e, "fail to update tx out store item with signed tx");
                }
                Err(e.into())
            }
        }
    }

    /// Turns an empty-coins item into "send everything back to asgard".
    async fn handle_ygg_return(
        &self,
        height: i64,
        mut tx: TxOutItem,
        client: &Arc<dyn ChainClient>,
    ) -> Result<TxOutItem> {
        if self
            .pubkey_manager
            .is_valid_pool_address(tx.to_address.as_str(), tx.chain)
            .is_none()
        {
            tracing::error!(to = %tx.to_address, "invalid yggdrasil return address");
            return Err(Error::InvalidPoolAddress(tx.to_address.to_string()));
        }
        // the memo tells the chain client to keep gas behind
        tx.memo = Memo::YggdrasilReturn(height).to_string();
        let account = client.get_account(&tx.vault_pub_key, None).await?;
        tx.coins = Coins::new(
            account
                .coins
                .0
                .into_iter()
                .filter(|coin| coin.amount > 0)
                .map(|mut coin| {
                    coin.asset.chain = tx.chain;
                    coin
                })
                .collect(),
        );
        tx.max_gas = Gas::default();
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bifrost_client_traits::mocks::{
        MockBridge, MockChainClient, MockKeyManager,
    };
    use bifrost_config::BifrostConfig;
    use bifrost_store::InMemoryStore;
    use bifrost_types::keygen::KEYSIGN_ROUND_7;
    use bifrost_types::{
        Account, Address, BlameNode, Chain, Coin, Keygen, KeygenType,
        KeysignError, Msg, TxArrayItem, TxId,
    };

    const ASGARD: &str = "bc1qasgard";
    const USER: &str = "bc1quser";

    #[derive(Default)]
    struct RecordingObserver {
        observed: parking_lot::Mutex<Vec<TxIn>>,
    }

    #[async_trait]
    impl ObserveSigned for RecordingObserver {
        async fn observe_signed(&self, tx_in: TxIn) {
            self.observed.lock().push(tx_in);
        }
    }

    struct Harness {
        signer: Arc<Signer>,
        bridge: Arc<MockBridge>,
        btc: Arc<MockChainClient>,
        key_manager: Arc<MockKeyManager>,
        pubkey_manager: Arc<PubKeyManager>,
        storage: SignerStorage,
        observer: Arc<RecordingObserver>,
    }

    fn vault() -> PubKey {
        PubKey::new("thorpub1vault")
    }

    fn asgard() -> PubKey {
        PubKey::new("thorpub1asgard")
    }

    fn harness_with(config: BifrostConfig) -> Harness {
        let ctx = BifrostContext::new(config).unwrap();
        let bridge = Arc::new(MockBridge::new("thor1node"));
        {
            let mut state = bridge.state();
            state.block_height = 20;
            state
                .constants
                .insert(mimir::SIGNING_TRANSACTION_PERIOD.into(), 300);
        }
        let pubkey_manager =
            Arc::new(PubKeyManager::new(bridge.clone(), ctx.metrics.clone()));
        pubkey_manager.add_pubkey(vault(), true);
        pubkey_manager.add_pubkey(asgard(), false);
        pubkey_manager.set_addresses(
            &asgard(),
            [(Chain::BTC, Address::new(ASGARD).unwrap())].into(),
        );
        let btc = Arc::new(MockChainClient::new(Chain::BTC));
        let key_manager = Arc::new(MockKeyManager::new());
        let storage = SignerStorage::new(Arc::new(InMemoryStore::default()), "");
        let observer = Arc::new(RecordingObserver::default());
        let signer = Signer::new(
            ctx,
            bridge.clone(),
            key_manager.clone(),
            pubkey_manager.clone(),
            std::iter::once(btc.clone() as Arc<dyn ChainClient>).collect(),
            storage.clone(),
            observer.clone(),
        );
        Harness {
            signer: Arc::new(signer),
            bridge,
            btc,
            key_manager,
            pubkey_manager,
            storage,
            observer,
        }
    }

    fn harness() -> Harness {
        harness_with(BifrostConfig::default())
    }

    fn outbound(memo: &str) -> TxOutItem {
        TxOutItem::new(
            Chain::BTC,
            Address::new(USER).unwrap(),
            vault(),
            Coins::new(vec![Coin::new(Chain::BTC.gas_asset(), 10_000)]),
            memo,
        )
    }

    fn store(h: &Harness, height: i64, item: TxOutItem) {
        h.storage
            .set(&TxOutStoreItem::new(height, item, 0))
            .unwrap();
    }

    fn round7(checkpoint: &[u8]) -> SignTxError {
        SignTxError {
            source: KeysignError::new(Blame {
                round: KEYSIGN_ROUND_7.into(),
                ..Default::default()
            })
            .into(),
            checkpoint: checkpoint.to_vec(),
        }
    }

    fn signed_memos(h: &Harness) -> Vec<String> {
        h.btc
            .state()
            .signed_items
            .iter()
            .map(|item| item.memo.clone())
            .collect()
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn round7_failure_blocks_its_group_until_it_succeeds() {
        let h = harness();
        store(&h, 10, outbound("OUT:A"));
        store(&h, 11, outbound("OUT:B"));
        store(&h, 12, outbound("OUT:C"));
        for n in 0..4u8 {
            h.btc.push_sign_result(Err(round7(&[n])));
        }

        for _ in 0..5 {
            h.signer.process_transactions().await;
        }
        assert_eq!(signed_memos(&h), vec!["OUT:A"; 5]);
        // every retry resumes from the checkpoint of the previous one
        let checkpoints = h
            .btc
            .state()
            .signed_items
            .iter()
            .map(|item| item.checkpoint.clone())
            .collect::<Vec<_>>();
        assert_eq!(
            checkpoints,
            vec![vec![], vec![0], vec![1], vec![2], vec![3]]
        );

        h.signer.process_transactions().await;
        assert_eq!(
            signed_memos(&h),
            vec!["OUT:A", "OUT:A", "OUT:A", "OUT:A", "OUT:A", "OUT:B", "OUT:C"]
        );
        assert!(h.storage.list().unwrap().is_empty());
        assert!(logs_contain("round 7 signing error"));
    }

    #[tokio::test]
    async fn failed_broadcast_reuses_the_signed_tx() {
        let h = harness();
        store(&h, 10, outbound("OUT:A"));
        h.btc.state().fail_broadcasts = 2;

        h.signer.process_transactions().await;
        let stored = h.storage.list().unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].is_retry());

        h.signer.process_transactions().await;
        h.signer.process_transactions().await;
        assert_eq!(h.btc.sign_calls(), 1);
        assert_eq!(h.btc.broadcast_calls(), 3);
        assert_eq!(h.btc.state().broadcasts.len(), 1);
        assert!(h.storage.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn halted_chain_is_not_signed() {
        let h = harness();
        h.bridge.set_mimir(mimir::halt_signing_chain(Chain::BTC), 1);
        store(&h, 10, outbound("OUT:A"));

        h.signer.process_transactions().await;
        assert_eq!(h.btc.sign_calls(), 0);
        assert!(h.storage.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unhealthy_scanner_keeps_the_item() {
        let h = harness();
        h.btc.state().healthy = false;
        store(&h, 10, outbound("OUT:A"));

        h.signer.process_transactions().await;
        assert_eq!(h.btc.sign_calls(), 0);
        assert_eq!(h.storage.list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_items_are_dropped() {
        let h = harness();
        h.bridge.set_block_height(500);
        store(&h, 10, outbound("OUT:A"));

        h.signer.process_transactions().await;
        assert_eq!(h.btc.sign_calls(), 0);
        assert!(h.storage.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn already_sent_items_are_skipped() {
        let h = harness();
        let item = outbound("OUT:A");
        let mut queued = TxArrayItem {
            chain: item.chain,
            to_address: item.to_address.clone(),
            vault_pub_key: item.vault_pub_key.clone(),
            coin: item.coins.0[0].clone(),
            memo: item.memo.clone(),
            max_gas: Coins::default(),
            gas_rate: 0,
            in_hash: TxId::default(),
            out_hash: TxId::default(),
            aggregator: String::new(),
            aggregator_target_asset: String::new(),
            aggregator_target_limit: None,
        };
        queued.out_hash = TxId::new(&format!("{:064X}", 7)).unwrap();
        h.bridge.set_keysign(
            10,
            &vault(),
            TxOut {
                height: 10,
                tx_array: vec![queued],
            },
        );
        store(&h, 10, item);

        h.signer.process_transactions().await;
        assert_eq!(h.btc.sign_calls(), 0);
        assert!(h.storage.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn yggdrasil_return_sends_every_coin_back() {
        let h = harness();
        h.btc.state().account = Account {
            coins: Coins::new(vec![
                Coin::new(Chain::BTC.gas_asset(), 150_000),
                Coin::new(Chain::LTC.gas_asset(), 0),
            ]),
            ..Default::default()
        };
        let mut item = outbound("");
        item.to_address = Address::new(ASGARD).unwrap();
        item.coins = Coins::default();
        item.max_gas =
            Coins::new(vec![Coin::new(Chain::BTC.gas_asset(), 1_000)]);
        store(&h, 15, item);

        h.signer.process_transactions().await;
        let signed = h.btc.state().signed_items.clone();
        assert_eq!(signed.len(), 1);
        assert_eq!(signed[0].memo, "YGGDRASIL-:15");
        assert_eq!(
            signed[0].coins,
            Coins::new(vec![Coin::new(Chain::BTC.gas_asset(), 150_000)])
        );
        assert!(signed[0].max_gas.0.is_empty());
    }

    #[tokio::test]
    async fn yggdrasil_return_needs_an_asgard_address() {
        let h = harness();
        let mut item = outbound("");
        item.coins = Coins::default();
        store(&h, 15, item);

        h.signer.process_transactions().await;
        assert_eq!(h.btc.sign_calls(), 0);
        assert_eq!(h.storage.list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn blamed_keysign_failure_is_reported() {
        let h = harness();
        store(&h, 10, outbound("OUT:A"));
        let blame = Blame {
            fail_reason: "timeout".into(),
            round: "SignRound3Message".into(),
            blame_nodes: vec![BlameNode {
                pubkey: PubKey::new("thorpub1lazy"),
                ..Default::default()
            }],
            ..Default::default()
        };
        h.btc.push_sign_result(Err(SignTxError {
            source: KeysignError::new(blame).into(),
            checkpoint: Vec::new(),
        }));

        h.signer.process_transactions().await;
        let msgs = h.bridge.broadcasts().concat();
        assert_eq!(msgs.len(), 1);
        assert!(matches!(
            &msgs[0],
            Msg::TssKeysignFail { height: 10, memo, .. } if memo == "OUT:A"
        ));
        let stored = h.storage.list().unwrap();
        assert_eq!(stored.len(), 1);
        assert!(!stored[0].round7_retry);
    }

    #[tokio::test]
    async fn signed_outbounds_are_handed_to_the_observer() {
        let h = harness();
        store(&h, 10, outbound("OUT:A"));
        store(&h, 11, outbound("OUT:B"));

        h.signer.process_transactions().await;
        let observed = h.observer.observed.lock().clone();
        assert_eq!(observed.len(), 1);
        assert!(observed[0].mem_pool && observed[0].filtered);
        assert_eq!(observed[0].chain, Chain::BTC);
        assert_eq!(observed[0].tx_array.len(), 2);
    }

    #[tokio::test]
    async fn no_observation_without_auto_observe() {
        let mut config = BifrostConfig::default();
        config.signer.auto_observe = false;
        let h = harness_with(config);
        store(&h, 10, outbound("OUT:A"));

        h.signer.process_transactions().await;
        assert_eq!(h.btc.broadcast_calls(), 1);
        assert!(h.observer.observed.lock().is_empty());
    }

    #[tokio::test]
    async fn tx_out_batches_are_stored_in_order() {
        let h = harness();
        let item = |memo: &str| TxArrayItem {
            chain: Chain::BTC,
            to_address: Address::new(USER).unwrap(),
            vault_pub_key: vault(),
            coin: Coin::new(Chain::BTC.gas_asset(), 10_000),
            memo: memo.into(),
            max_gas: Coins::default(),
            gas_rate: 0,
            in_hash: TxId::default(),
            out_hash: TxId::default(),
            aggregator: String::new(),
            aggregator_target_asset: String::new(),
            aggregator_target_limit: None,
        };
        h.signer.store_tx_out(TxOut {
            height: 10,
            tx_array: vec![item("OUT:A"), item("OUT:B")],
        });

        let mut stored = h.storage.list().unwrap();
        stored.sort_by_key(|item| item.index);
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].tx_out_item.memo, "OUT:A");
        assert_eq!((stored[1].height, stored[1].index), (10, 1));
        assert_eq!(stored[1].status, TxStatus::Available);
    }

    #[tokio::test]
    async fn keygen_backs_up_and_attests_the_new_vault() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BifrostConfig::default();
        config.signer.backup_keyshares = true;
        config.signer.keyshare_backup_dir = dir.path().display().to_string();
        let h = harness_with(config);
        std::env::set_var(keyshare::SEED_PHRASE_ENV, "correct horse battery");
        h.key_manager.state().keyshare = b"local state".to_vec();
        let members = vec![PubKey::new("thorpub1a"), PubKey::new("thorpub1b")];

        h.signer
            .handle_keygen_block(KeygenBlock {
                height: 30,
                keygens: vec![Keygen::new(30, members.clone(), KeygenType::Asgard)],
            })
            .await;

        let new_vault = PubKey::new("thorpub1keygen30");
        assert!(h.pubkey_manager.get_sign_pubkeys().contains(&new_vault));
        assert!(h.pubkey_manager.has_pubkey(&members[0]));
        assert!(!h.pubkey_manager.get_sign_pubkeys().contains(&members[0]));

        let backup = dir.path().join(keyshare::backup_file_name(&new_vault));
        assert!(backup.exists());

        let msgs = h.bridge.broadcasts().concat();
        assert_eq!(msgs.len(), 1);
        let Msg::TssPool {
            pool_pub_key,
            keyshares,
            pub_keys,
            chains,
            height,
            ..
        } = &msgs[0]
        else {
            panic!("expected a tss pool message, got {:?}", msgs[0]);
        };
        assert_eq!(pool_pub_key, &new_vault);
        assert_eq!(pub_keys, &members);
        assert_eq!(chains, &vec![Chain::THOR]);
        assert_eq!(*height, 30);
        let share =
            keyshare::decrypt_keyshare(keyshares, "correct horse battery")
                .unwrap();
        assert_eq!(share, b"local state");
    }

    #[tokio::test]
    async fn failed_keygen_is_still_attested() {
        let h = harness();
        h.key_manager
            .state()
            .keygen_results
            .push_back(Err(Error::Generic("party timeout")));

        h.signer
            .handle_keygen_block(KeygenBlock {
                height: 30,
                keygens: vec![Keygen::new(
                    30,
                    vec![PubKey::new("thorpub1a")],
                    KeygenType::Asgard,
                )],
            })
            .await;

        let msgs = h.bridge.broadcasts().concat();
        assert!(matches!(
            &msgs[0],
            Msg::TssPool { pool_pub_key, keyshares, .. }
                if pool_pub_key.is_empty() && keyshares.is_empty()
        ));
        assert_eq!(h.signer.ctx.metrics.keygen_total.get(), 1);
    }

    #[tokio::test]
    async fn start_and_stop() {
        let h = harness();
        h.signer.start().await.unwrap();
        assert!(h.signer.start().await.is_err());
        h.signer.stop().await;
    }
}
