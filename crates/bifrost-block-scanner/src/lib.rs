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
//! # Bifrost Block Scanner 🔭
//!
//! Walks the blocks of one chain in order and hands every non-empty batch of
//! observed transactions to the observer queue.
//!
//! ## Overview
//!
//! A [`BlockScanner`] runs two loops. The block loop advances a monotonic
//! scan position, one block at a time, using a chain specific
//! [`BlockScannerFetcher`]. The mempool loop forwards unconfirmed
//! transactions, and keeps running while the chain is halted so outbounds
//! stay visible. Policy switches on the home chain (mimir) can halt the
//! block loop at any time.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bifrost_client_traits::Bridge;
use bifrost_config::BlockScannerConfig;
use bifrost_context::Shutdown;
use bifrost_store::{BlockScanStatus, ScannerStorage};
use bifrost_types::{mimir, Chain, TxIn};
use bifrost_utils::metric::{Metrics, Module};
use bifrost_utils::{probe, Result};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// A scanner considers itself healthy once it is this close to the tip.
pub const HEALTHY_GAP: i64 = 50;

/// The chain specific half of a block scanner.
#[async_trait]
pub trait BlockScannerFetcher: Send + Sync {
    /// Unconfirmed transactions, tagged with the next height to scan.
    async fn fetch_mem_pool(&self, height: i64) -> Result<TxIn>;
    /// The observed transactions of block `height`; `chain_height` is the
    /// current tip.
    ///
    /// Returns [`bifrost_utils::Error::UnavailableBlock`] when the block
    /// does not exist yet.
    async fn fetch_txs(&self, height: i64, chain_height: i64) -> Result<TxIn>;
    /// The current tip.
    async fn get_height(&self) -> Result<i64>;
}

/// Scans the blocks of one chain.
pub struct BlockScanner {
    config: BlockScannerConfig,
    storage: ScannerStorage,
    bridge: Arc<dyn Bridge>,
    fetcher: Arc<dyn BlockScannerFetcher>,
    metrics: Arc<Metrics>,
    previous_block: AtomicI64,
    healthy: AtomicBool,
    notify_stop: broadcast::Sender<()>,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for BlockScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockScanner")
            .field("chain", &self.config.chain_id)
            .field("previous_block", &self.previous_block)
            .field("healthy", &self.healthy)
            .finish()
    }
}

impl BlockScanner {
    /// Creates a scanner and resolves where it starts scanning from.
    #[tracing::instrument(skip_all, fields(chain = %config.chain_id))]
    pub async fn new(
        config: BlockScannerConfig,
        storage: ScannerStorage,
        bridge: Arc<dyn Bridge>,
        fetcher: Arc<dyn BlockScannerFetcher>,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let (notify_stop, _) = broadcast::channel(1);
        let scanner = Self {
            config,
            storage,
            bridge,
            fetcher,
            metrics,
            previous_block: AtomicI64::new(0),
            healthy: AtomicBool::new(false),
            notify_stop,
            handles: parking_lot::Mutex::new(Vec::new()),
        };
        let height = scanner.fetch_last_height().await?;
        tracing::info!(block_height = height, "block scanner last fetch height");
        scanner.previous_block.store(height, Ordering::SeqCst);
        Ok(scanner)
    }

    /// The scanned chain.
    pub fn chain(&self) -> Chain {
        self.config.chain_id
    }

    /// Whether the last scan attempt succeeded close to the tip.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// The last fully processed block.
    pub fn previous_block(&self) -> i64 {
        self.previous_block.load(Ordering::SeqCst)
    }

    fn module(&self) -> Module {
        if self.chain() == Chain::THOR {
            Module::ThorchainBlockScanner
        } else {
            Module::BlockScanner
        }
    }

    /// Where to start scanning:
    ///
    /// 1. the configured start height;
    /// 2. what the home chain last saw, once it is in sync;
    /// 3. the stored scan position;
    /// 4. the chain tip.
    pub async fn fetch_last_height(&self) -> Result<i64> {
        let current_pos = self.storage.get_scan_pos().unwrap_or_default();
        if self.config.start_block_height > 0 {
            return Ok(self.config.start_block_height);
        }
        self.bridge.wait_to_catch_up().await?;
        let height = if self.chain() == Chain::THOR {
            self.bridge.get_block_height().await
        } else {
            self.bridge.get_last_observed_in_height(self.chain()).await
        };
        match height {
            Ok(height) if height > 0 => return Ok(height),
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "thorchain has no height for us");
            }
        }
        if current_pos > 0 {
            return Ok(current_pos);
        }
        self.fetcher.get_height().await
    }

    fn stop_signal(&self) -> Shutdown {
        Shutdown::new(self.notify_stop.subscribe())
    }

    /// Spawns the block and mempool loops. They stop on [`Self::stop`] or
    /// on the process wide `shutdown`.
    pub fn start(
        self: &Arc<Self>,
        queue: mpsc::Sender<TxIn>,
        mut shutdown: Shutdown,
    ) {
        match self.storage.get_scan_pos() {
            Ok(pos) if pos > self.previous_block() => {
                self.previous_block.store(pos, Ordering::SeqCst);
            }
            Ok(_) => {}
            Err(e) => tracing::error!(
                chain = %self.chain(),
                error = %e,
                "fail to get current block scan pos, will start from {}",
                self.previous_block()
            ),
        }
        let mut handles = self.handles.lock();
        handles.push(tokio::spawn(
            self.clone().scan_blocks(queue.clone(), self.stop_signal()),
        ));
        handles.push(tokio::spawn(
            self.clone().scan_mempool(queue, self.stop_signal()),
        ));
        let notify_stop = self.notify_stop.clone();
        let mut stopped = self.stop_signal();
        handles.push(tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.recv() => {
                    let _ = notify_stop.send(());
                }
                _ = stopped.recv() => {}
            }
        }));
    }

    /// Stops both loops and waits for them.
    pub async fn stop(&self) {
        tracing::debug!(chain = %self.chain(), "receive stop request");
        let _ = self.notify_stop.send(());
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "block scanner task panicked");
            }
        }
        tracing::debug!(chain = %self.chain(), "block scanner stopped");
    }

    /// Reads the halt switches of this chain from the home chain.
    pub async fn is_chain_paused(&self) -> bool {
        let chain = self.chain();
        let read = |key: String| async move {
            match self.bridge.get_mimir(&key).await {
                Ok(value) => value,
                Err(e) => {
                    tracing::error!(error = %e, "fail to get mimir setting {key}");
                    0
                }
            }
        };
        let halt_height = read(mimir::halt_chain(chain)).await;
        let solvency_halt_height = read(mimir::solvency_halt_chain(chain)).await;
        let global_halt_height = read(mimir::HALT_CHAIN_GLOBAL.to_string()).await;
        let node_pause_height =
            read(mimir::NODE_PAUSE_CHAIN_GLOBAL.to_string()).await;
        let thor_height = match self.bridge.get_block_height().await {
            Ok(height) => height,
            Err(e) => {
                tracing::error!(error = %e, "fail to get THORChain block height");
                0
            }
        };
        let halt_height = halt_height.max(global_halt_height);
        (halt_height > 0 && thor_height > halt_height)
            || (solvency_halt_height > 0 && thor_height > solvency_halt_height)
            || node_pause_height > thor_height
    }

    async fn emit(
        &self,
        queue: &mpsc::Sender<TxIn>,
        tx_in: TxIn,
        stop: &mut Shutdown,
    ) -> bool {
        tokio::select! {
            _ = stop.recv() => false,
            sent = queue.send(tx_in) => match sent {
                Ok(()) => true,
                Err(_) => {
                    tracing::error!(chain = %self.chain(), "observer queue is closed");
                    false
                }
            },
        }
    }

    async fn scan_mempool(
        self: Arc<Self>,
        queue: mpsc::Sender<TxIn>,
        mut stop: Shutdown,
    ) {
        tracing::debug!(chain = %self.chain(), "start to scan mempool");
        let block_time = Chain::THOR.approximate_block_time();
        while !stop.is_shutdown() {
            let current_block = self.previous_block() + 1;
            let tx_in = match self.fetcher.fetch_mem_pool(current_block).await
            {
                Ok(tx_in) => tx_in,
                Err(e) => {
                    tracing::error!(chain = %self.chain(), error = %e, "fail to fetch MemPool");
                    TxIn::new(self.chain(), Vec::new())
                }
            };
            if !tx_in.tx_array.is_empty() {
                if !self.emit(&queue, tx_in, &mut stop).await {
                    break;
                }
            } else if !stop.sleep(block_time).await {
                break;
            }
        }
        tracing::debug!(chain = %self.chain(), "stop scan mempool");
    }

    fn record_failed_block(&self, height: i64) {
        if let Err(e) = self
            .storage
            .set_block_scan_status(height, BlockScanStatus::NotProcessed)
        {
            tracing::error!(error = %e, height, "fail to record failed block");
        }
        self.update_retry_gauge();
    }

    fn clear_failed_block(&self, height: i64) {
        if let Err(e) = self.storage.remove_block_status(height) {
            tracing::error!(error = %e, height, "fail to remove block status");
        }
        self.update_retry_gauge();
    }

    fn update_retry_gauge(&self) {
        if let Ok(blocks) = self.storage.get_blocks_for_retry(true) {
            self.metrics
                .total_retry_blocks
                .with_label_values(&[self.chain().as_str()])
                .set(blocks.len() as i64);
        }
    }

    async fn scan_blocks(
        self: Arc<Self>,
        queue: mpsc::Sender<TxIn>,
        mut stop: Shutdown,
    ) {
        let chain = self.chain();
        tracing::debug!(%chain, "start to scan blocks");
        let block_time = Chain::THOR.approximate_block_time();
        let discover_back_off = self.config.block_height_discover_back_off();
        let retry_interval = self.config.block_retry_interval();
        // progress is logged about once a minute
        let block_ms = (chain.approximate_block_time().as_millis() as i64).max(1);
        let log_every = (60_000 + block_ms - 1) / block_ms;

        let mut last_mimir_check: Option<Instant> = None;
        let mut paused = false;
        let mut discovery_started = Instant::now();

        while !stop.is_shutdown() {
            let current_block = self.previous_block() + 1;
            if last_mimir_check.map_or(true, |t| t.elapsed() >= block_time) {
                paused = self.is_chain_paused().await;
                last_mimir_check = Some(Instant::now());
            }
            if paused {
                self.healthy.store(false, Ordering::SeqCst);
                if !stop.sleep(block_time).await {
                    break;
                }
                continue;
            }

            let chain_height = match self.fetcher.get_height().await {
                Ok(height) => height,
                Err(e) => {
                    tracing::error!(%chain, error = %e, "fail to get chain block height");
                    if !stop.sleep(discover_back_off).await {
                        break;
                    }
                    continue;
                }
            };
            if chain_height < current_block {
                if !stop.sleep(discover_back_off).await {
                    break;
                }
                continue;
            }

            let tx_in = match self
                .fetcher
                .fetch_txs(current_block, chain_height)
                .await
            {
                Ok(tx_in) => tx_in,
                Err(e) if e.is_unavailable_block() => {
                    if !stop.sleep(discover_back_off).await {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    tracing::error!(
                        %chain,
                        block_height = current_block,
                        error = %e,
                        "fail to get RPCBlock"
                    );
                    self.healthy.store(false, Ordering::SeqCst);
                    self.metrics.error(self.module(), Some(chain), "fail_fetch_block");
                    self.record_failed_block(current_block);
                    if !stop.sleep(retry_interval).await {
                        break;
                    }
                    continue;
                }
            };

            if current_block % log_every == 0 || !self.is_healthy() {
                tracing::info!(
                    %chain,
                    block_height = current_block,
                    txs = tx_in.tx_array.len(),
                    gap = chain_height - current_block,
                    healthy = self.is_healthy(),
                    "scan block"
                );
            }
            self.previous_block.fetch_add(1, Ordering::SeqCst);
            if chain_height - current_block <= HEALTHY_GAP {
                self.healthy.store(true, Ordering::SeqCst);
            }

            let label = [chain.as_str()];
            self.metrics.total_block_scanned.with_label_values(&label).inc();
            self.metrics
                .current_position
                .with_label_values(&label)
                .set(current_block);
            self.metrics
                .block_discovery_duration
                .with_label_values(&label)
                .observe(discovery_started.elapsed().as_secs_f64());
            discovery_started = Instant::now();

            if let Err(e) = self.storage.set_scan_pos(current_block) {
                tracing::error!(%chain, error = %e, "fail to save block scan pos");
            }
            self.clear_failed_block(current_block);
            tracing::event!(
                target: probe::TARGET,
                tracing::Level::TRACE,
                kind = %probe::Kind::Sync,
                %chain,
                block_height = current_block,
                chain_height,
            );

            if !tx_in.tx_array.is_empty()
                && !self.emit(&queue, tx_in, &mut stop).await
            {
                break;
            }
        }
        tracing::debug!(%chain, "stop scan blocks");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bifrost_client_traits::mocks::MockBridge;
    use bifrost_store::InMemoryStore;
    use bifrost_types::TxInItem;
    use bifrost_utils::Error;
    use std::collections::{HashMap, VecDeque};
    use std::time::Duration;

    #[derive(Default)]
    struct FetcherState {
        tip: i64,
        failures: HashMap<i64, usize>,
        txs: HashMap<i64, usize>,
        mempool: VecDeque<TxIn>,
        fetched: Vec<i64>,
    }

    #[derive(Default)]
    struct ScriptedFetcher {
        state: parking_lot::Mutex<FetcherState>,
    }

    fn item(height: i64) -> TxInItem {
        TxInItem {
            block_height: height,
            tx: format!("{height:064}"),
            to: String::from("bc1vault"),
            ..Default::default()
        }
    }

    #[async_trait]
    impl BlockScannerFetcher for ScriptedFetcher {
        async fn fetch_mem_pool(&self, _height: i64) -> Result<TxIn> {
            let mut state = self.state.lock();
            Ok(state
                .mempool
                .pop_front()
                .unwrap_or_else(|| TxIn::new(Chain::BTC, Vec::new())))
        }

        async fn fetch_txs(&self, height: i64, _tip: i64) -> Result<TxIn> {
            let mut state = self.state.lock();
            if let Some(left) = state.failures.get_mut(&height) {
                if *left > 0 {
                    *left -= 1;
                    return Err(Error::Generic("rpc down"));
                }
            }
            if height > state.tip {
                return Err(Error::UnavailableBlock);
            }
            state.fetched.push(height);
            let count = state.txs.get(&height).copied().unwrap_or(0);
            Ok(TxIn::new(
                Chain::BTC,
                (0..count).map(|_| item(height)).collect(),
            ))
        }

        async fn get_height(&self) -> Result<i64> {
            Ok(self.state.lock().tip)
        }
    }

    fn config(start: i64) -> BlockScannerConfig {
        BlockScannerConfig {
            chain_id: Chain::BTC,
            start_block_height: start,
            block_height_discover_back_off: 10,
            block_retry_interval: 10,
            ..Default::default()
        }
    }

    async fn scanner(
        config: BlockScannerConfig,
        storage: ScannerStorage,
        bridge: Arc<MockBridge>,
        fetcher: Arc<ScriptedFetcher>,
    ) -> Arc<BlockScanner> {
        let metrics = Arc::new(Metrics::new().unwrap());
        Arc::new(
            BlockScanner::new(config, storage, bridge, fetcher, metrics)
                .await
                .unwrap(),
        )
    }

    fn never() -> (broadcast::Sender<()>, Shutdown) {
        let (tx, rx) = broadcast::channel(1);
        (tx, Shutdown::new(rx))
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn start_height_resolution_order() {
        let storage = ScannerStorage::new(Arc::new(InMemoryStore::default()));
        let bridge = Arc::new(MockBridge::new("thor1node"));
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.state.lock().tip = 900;

        let s = scanner(config(10), storage.clone(), bridge.clone(), fetcher.clone()).await;
        assert_eq!(s.previous_block(), 10);

        bridge
            .state()
            .last_observed_in_height
            .insert(Chain::BTC, 700);
        let s = scanner(config(0), storage.clone(), bridge.clone(), fetcher.clone()).await;
        assert_eq!(s.previous_block(), 700);

        bridge.state().last_observed_in_height.clear();
        storage.set_scan_pos(800).unwrap();
        let s = scanner(config(0), storage.clone(), bridge.clone(), fetcher.clone()).await;
        assert_eq!(s.previous_block(), 800);

        storage.set_scan_pos(0).unwrap();
        let s = scanner(config(0), storage, bridge, fetcher).await;
        assert_eq!(s.previous_block(), 900);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn scans_in_order_and_emits_non_empty_batches() {
        let storage = ScannerStorage::new(Arc::new(InMemoryStore::default()));
        let bridge = Arc::new(MockBridge::new("thor1node"));
        let fetcher = Arc::new(ScriptedFetcher::default());
        {
            let mut state = fetcher.state.lock();
            state.tip = 105;
            state.txs.insert(102, 2);
            state.txs.insert(104, 1);
        }
        let s = scanner(config(100), storage.clone(), bridge, fetcher.clone()).await;
        let (queue, mut rx) = mpsc::channel(16);
        let (_global, shutdown) = never();
        s.start(queue, shutdown);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.tx_array.len(), 2);
        assert_eq!(first.first_block_height(), 102);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.first_block_height(), 104);

        wait_until(|| s.previous_block() == 105).await;
        assert!(s.is_healthy());
        s.stop().await;
        assert_eq!(storage.get_scan_pos().unwrap(), 105);
        assert_eq!(fetcher.state.lock().fetched, vec![101, 102, 103, 104, 105]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_blocks_are_recorded_and_retried() {
        let storage = ScannerStorage::new(Arc::new(InMemoryStore::default()));
        let bridge = Arc::new(MockBridge::new("thor1node"));
        let fetcher = Arc::new(ScriptedFetcher::default());
        {
            let mut state = fetcher.state.lock();
            state.tip = 3;
            state.failures.insert(2, 2);
        }
        let s = scanner(config(1), storage.clone(), bridge, fetcher.clone()).await;
        let (queue, _rx) = mpsc::channel(16);
        let (_global, shutdown) = never();
        s.start(queue, shutdown);

        wait_until(|| s.previous_block() == 3).await;
        s.stop().await;
        assert_eq!(
            s.metrics
                .error_count(Module::BlockScanner, Some(Chain::BTC), "fail_fetch_block"),
            2
        );
        assert!(storage.get_blocks_for_retry(true).unwrap().is_empty());
        assert_eq!(fetcher.state.lock().fetched, vec![2, 3]);
    }

    #[tokio::test]
    async fn halted_chain_does_not_advance_but_mempool_flows() {
        let storage = ScannerStorage::new(Arc::new(InMemoryStore::default()));
        let bridge = Arc::new(MockBridge::new("thor1node"));
        bridge.set_block_height(10);
        bridge.set_mimir(&mimir::halt_chain(Chain::BTC), 5);
        let fetcher = Arc::new(ScriptedFetcher::default());
        {
            let mut state = fetcher.state.lock();
            state.tip = 50;
            state
                .mempool
                .push_back(TxIn::new(Chain::BTC, vec![item(0)]));
        }
        let s = scanner(config(20), storage, bridge, fetcher.clone()).await;
        assert!(s.is_chain_paused().await);

        let (queue, mut rx) = mpsc::channel(16);
        let (global, shutdown) = never();
        s.start(queue, shutdown);
        let mempool = rx.recv().await.unwrap();
        assert_eq!(mempool.tx_array.len(), 1);
        assert_eq!(s.previous_block(), 20);
        assert!(!s.is_healthy());
        assert!(fetcher.state.lock().fetched.is_empty());

        // the process wide shutdown stops the loops too
        global.send(()).unwrap();
        s.stop().await;
    }

    #[tokio::test]
    async fn node_pause_and_solvency_halt() {
        let storage = ScannerStorage::new(Arc::new(InMemoryStore::default()));
        let bridge = Arc::new(MockBridge::new("thor1node"));
        bridge.set_block_height(10);
        let fetcher = Arc::new(ScriptedFetcher::default());
        let s = scanner(config(1), storage, bridge.clone(), fetcher).await;
        assert!(!s.is_chain_paused().await);

        bridge.set_mimir(mimir::NODE_PAUSE_CHAIN_GLOBAL, 11);
        assert!(s.is_chain_paused().await);
        bridge.set_mimir(mimir::NODE_PAUSE_CHAIN_GLOBAL, 10);
        assert!(!s.is_chain_paused().await);

        bridge.set_mimir(&mimir::solvency_halt_chain(Chain::BTC), 9);
        assert!(s.is_chain_paused().await);
        bridge.set_mimir(&mimir::solvency_halt_chain(Chain::BTC), 0);
        bridge.set_mimir(mimir::HALT_CHAIN_GLOBAL, 10);
        assert!(!s.is_chain_paused().await);
        bridge.set_mimir(mimir::HALT_CHAIN_GLOBAL, 9);
        assert!(s.is_chain_paused().await);
    }
}
