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

//! # Bifrost Observer 🔭
//!
//! Everything the chain clients scan lands on the observer's deck. Once
//! per home block the deck is filtered down to what concerns our vaults,
//! attested to the home chain before finality, and attested again once
//! the chain reports enough confirmations.
//!
//! The observer also relays rolled back transactions (errata) and vault
//! balance reports (solvency), and skips outbounds the signer already
//! observed on its own.

#![warn(missing_docs)]

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use bifrost_client_traits::{Bridge, ChainClient, ChainClients, ObserverQueues};
use bifrost_context::{BifrostContext, Shutdown};
use bifrost_memo::TxType;
use bifrost_pubkey_manager::PubKeyManager;
use bifrost_store::ObserverStorage;
use bifrost_types::{
    Address, Chain, ErrataBlock, ErrataTx, NodeStatus, ObservedTx, Solvency,
    TxIn, TxInItem,
};
use bifrost_utils::metric::Module;
use bifrost_utils::{probe, retry, Error, Result};
use lru::LruCache;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

/// Deck bookkeeping, batch merging and conversion to observations.
pub mod deck;

const QUEUE_CAPACITY: usize = 1024;

struct DeckState {
    on_deck: Vec<TxIn>,
    /// Outbounds the signer observed right after broadcasting them.
    signed: LruCache<String, ()>,
}

struct Receivers {
    tx_in: mpsc::Receiver<TxIn>,
    errata: mpsc::Receiver<ErrataBlock>,
    solvency: mpsc::Receiver<Solvency>,
}

/// Attests external chain observations to the home chain.
pub struct Observer {
    ctx: BifrostContext,
    bridge: Arc<dyn Bridge>,
    pubkey_manager: Arc<PubKeyManager>,
    chains: ChainClients,
    storage: ObserverStorage,
    block_time: Duration,
    state: Mutex<DeckState>,
    queues: ObserverQueues,
    receivers: parking_lot::Mutex<Option<Receivers>>,
    notify_stop: broadcast::Sender<()>,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("chains", &self.chains.chains())
            .field("block_time", &self.block_time)
            .finish()
    }
}

impl Observer {
    /// Creates an observer and restores the deck left by a previous run.
    pub fn new(
        ctx: BifrostContext,
        bridge: Arc<dyn Bridge>,
        pubkey_manager: Arc<PubKeyManager>,
        chains: ChainClients,
        storage: ObserverStorage,
    ) -> Self {
        let on_deck = storage.get_on_deck_txs().unwrap_or_else(|e| {
            tracing::error!(error = %e, "fail to restore ondeck txs");
            Vec::new()
        });
        if !on_deck.is_empty() {
            tracing::info!(count = on_deck.len(), "restored ondeck txs");
        }
        let capacity =
            NonZeroUsize::new(ctx.config.observer.mempool_tx_id_cache_size)
                .unwrap_or(NonZeroUsize::MIN);
        let (tx_in, tx_in_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (errata, errata_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (solvency, solvency_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (notify_stop, _) = broadcast::channel(1);
        let block_time = ctx.home_block_time();
        Self {
            ctx,
            bridge,
            pubkey_manager,
            chains,
            storage,
            block_time,
            state: Mutex::new(DeckState {
                on_deck,
                signed: LruCache::new(capacity),
            }),
            queues: ObserverQueues {
                tx_in,
                errata,
                solvency,
            },
            receivers: parking_lot::Mutex::new(Some(Receivers {
                tx_in: tx_in_rx,
                errata: errata_rx,
                solvency: solvency_rx,
            })),
            notify_stop,
            handles: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Overrides the deck tick, which also bounds the retries of one
    /// attestation. Defaults to the home block time.
    pub fn with_block_time(mut self, block_time: Duration) -> Self {
        self.block_time = block_time;
        self
    }

    /// The queues the chain clients feed.
    pub fn queues(&self) -> ObserverQueues {
        self.queues.clone()
    }

    /// A copy of the current deck.
    pub async fn deck(&self) -> Vec<TxIn> {
        self.state.lock().await.on_deck.clone()
    }

    fn stop_signal(&self) -> Shutdown {
        Shutdown::new(self.notify_stop.subscribe())
    }

    /// Starts every chain client and the observer loops.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let receivers = self
            .receivers
            .lock()
            .take()
            .ok_or(Error::Generic("observer already started"))?;
        for client in self.chains.iter() {
            if let Err(e) = client.start(self.queues()).await {
                tracing::error!(
                    chain = %client.get_chain(),
                    error = %e,
                    "fail to start chain client"
                );
            }
        }
        let mut handles = self.handles.lock();
        handles.push(tokio::spawn(
            self.clone()
                .process_tx_ins(receivers.tx_in, self.stop_signal()),
        ));
        handles.push(tokio::spawn(
            self.clone()
                .process_errata(receivers.errata, self.stop_signal()),
        ));
        handles.push(tokio::spawn(
            self.clone()
                .process_solvency(receivers.solvency, self.stop_signal()),
        ));
        handles.push(tokio::spawn(
            self.clone().process_deck(self.stop_signal()),
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
        tracing::info!("observer started");
        Ok(())
    }

    /// Stops the loops after a last attempt to send the deck.
    pub async fn stop(&self) {
        tracing::debug!("receive stop request");
        let _ = self.notify_stop.send(());
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "observer task panicked");
            }
        }
        if let Err(e) = self.storage.close() {
            tracing::error!(error = %e, "fail to close observer storage");
        }
        tracing::info!("observer stopped");
    }

    /// Queues an outbound the signer just broadcast.
    ///
    /// The same transactions are skipped when a block scanner reports them
    /// again later on.
    pub async fn observe_signed(&self, tx_in: TxIn) {
        {
            let mut state = self.state.lock().await;
            for item in &tx_in.tx_array {
                state.signed.put(item.tx.to_uppercase(), ());
            }
        }
        if self.queues.tx_in.send(tx_in).await.is_err() {
            tracing::error!("observer tx in queue is closed");
        }
    }

    async fn process_tx_ins(
        self: Arc<Self>,
        mut queue: mpsc::Receiver<TxIn>,
        mut stop: Shutdown,
    ) {
        loop {
            tokio::select! {
                _ = stop.recv() => return,
                tx_in = queue.recv() => match tx_in {
                    Some(tx_in) => self.add_to_deck(tx_in).await,
                    None => return,
                },
            }
        }
    }

    async fn process_errata(
        self: Arc<Self>,
        mut queue: mpsc::Receiver<ErrataBlock>,
        mut stop: Shutdown,
    ) {
        loop {
            tokio::select! {
                _ = stop.recv() => return,
                block = queue.recv() => match block {
                    Some(block) => self.handle_errata_block(block).await,
                    None => return,
                },
            }
        }
    }

    async fn process_solvency(
        self: Arc<Self>,
        mut queue: mpsc::Receiver<Solvency>,
        mut stop: Shutdown,
    ) {
        loop {
            tokio::select! {
                _ = stop.recv() => return,
                solvency = queue.recv() => match solvency {
                    Some(solvency) => self.send_solvency(solvency).await,
                    None => return,
                },
            }
        }
    }

    async fn process_deck(self: Arc<Self>, mut stop: Shutdown) {
        loop {
            let running = stop.sleep(self.block_time).await;
            self.send_deck().await;
            if !running {
                return;
            }
        }
    }

    /// Merges a scanned batch into the deck and persists the deck.
    pub async fn add_to_deck(&self, tx_in: TxIn) {
        let mut state = self.state.lock().await;
        deck::merge(&mut state.on_deck, tx_in);
        if let Err(e) = self.storage.set_on_deck_txs(&state.on_deck) {
            tracing::error!(error = %e, "fail to save ondeck txs");
        }
    }

    /// Attests everything on deck.
    ///
    /// An entry is filtered once. Until its confirmations are in, its items
    /// are attested a single time as not final and kept on deck. Once
    /// ready they are attested as final and only the items that failed
    /// stay on deck.
    pub async fn send_deck(&self) {
        let mut state = self.state.lock().await;
        let entries = std::mem::take(&mut state.on_deck);
        let mut next_deck = Vec::with_capacity(entries.len());
        for mut entry in entries {
            let Some(client) = self.chains.get(entry.chain) else {
                tracing::error!(chain = %entry.chain, "no chain client, dropping txs");
                continue;
            };
            if !entry.filtered {
                let items = self.filter_observations(&state.signed, &entry);
                entry.tx_array =
                    self.filter_binance_memo_flag(entry.chain, items).await;
                entry.count = entry.tx_array.len().to_string();
                entry.filtered = true;
                entry.confirmation_required =
                    client.get_confirmation_count(&entry).await;
            }
            let mut next = entry.with_items(Vec::new());
            if !client.confirmation_count_ready(&entry).await {
                next.tx_array = entry.tx_array.clone();
                if !entry.sent_un_finalised {
                    let left = self.chunkify_and_send(&entry, &client, false).await;
                    next.sent_un_finalised = left.is_empty();
                }
            } else {
                next.tx_array =
                    self.chunkify_and_send(&entry, &client, true).await;
            }
            if !next.tx_array.is_empty() {
                next.count = next.tx_array.len().to_string();
                next_deck.push(next);
            }
        }
        if let Err(e) = self.storage.set_on_deck_txs(&next_deck) {
            tracing::error!(error = %e, "fail to save ondeck txs");
        }
        state.on_deck = next_deck;
    }

    /// Returns the items that could not be attested.
    async fn chunkify_and_send(
        &self,
        entry: &TxIn,
        client: &Arc<dyn ChainClient>,
        finalised: bool,
    ) -> Vec<TxInItem> {
        let mut entry = entry.clone();
        entry.finalised = finalised;
        let mut left = Vec::new();
        for chunk in deck::chunkify(&entry) {
            if let Err(e) = self.sign_and_send_to_thorchain(&chunk).await {
                tracing::error!(
                    chain = %chunk.chain,
                    finalised,
                    error = %e,
                    "fail to send to THORChain"
                );
                self.ctx.metrics.error(
                    Module::Observer,
                    Some(chunk.chain),
                    "fail_to_send_to_thorchain",
                );
                left.extend(chunk.tx_array);
                continue;
            }
            for item in &chunk.tx_array {
                client.on_observed_tx_in(item, item.block_height).await;
            }
        }
        left
    }

    /// Keeps the items moving funds of our vaults, tagged with the vault.
    ///
    /// A payment from a vault is an outbound, skipped when the signer
    /// already observed it. A payment to a vault is an inbound, skipped
    /// while in the mempool unless it is internal to the network.
    fn filter_observations(
        &self,
        signed: &LruCache<String, ()>,
        tx_in: &TxIn,
    ) -> Vec<TxInItem> {
        let chain = tx_in.chain;
        let mut items = Vec::new();
        for item in &tx_in.tx_array {
            let from_pool =
                self.pubkey_manager.is_valid_pool_address(&item.sender, chain);
            if let Some(pub_key) = &from_pool {
                if signed.contains(&item.tx.to_uppercase()) {
                    tracing::debug!(tx = %item.tx, "outbound already observed");
                } else {
                    let mut outbound = item.clone();
                    outbound.observed_vault_pub_key = pub_key.clone();
                    items.push(outbound);
                }
            }
            if let Some(pub_key) =
                self.pubkey_manager.is_valid_pool_address(&item.to, chain)
            {
                if !tx_in.mem_pool || from_pool.is_some() {
                    let mut inbound = item.clone();
                    inbound.observed_vault_pub_key = pub_key;
                    items.push(inbound);
                }
            }
        }
        items
    }

    /// Drops items paying a BNB account that requires a memo.
    async fn filter_binance_memo_flag(
        &self,
        chain: Chain,
        items: Vec<TxInItem>,
    ) -> Vec<TxInItem> {
        let Some(bnb) = self.chains.get(Chain::BNB) else {
            return items;
        };
        let mut kept = Vec::with_capacity(items.len());
        'items: for item in items {
            let mut addresses = Vec::new();
            if let Some(dest) = self.memo_destination(&item.memo).await {
                if dest.is_chain(Chain::BNB) {
                    addresses.push(dest.to_string());
                }
            }
            if chain == Chain::BNB {
                addresses.push(item.sender.clone());
            }
            for address in addresses {
                match bnb.get_account_by_address(&address, None).await {
                    Ok(account) if account.has_memo_flag => {
                        tracing::info!(
                            tx = %item.tx,
                            %address,
                            "dropping tx paying an account with memo flag"
                        );
                        continue 'items;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(%address, error = %e, "fail to get account");
                    }
                }
            }
            kept.push(item);
        }
        kept
    }

    /// Destination of a memo, resolving a THORName when needed.
    async fn memo_destination(&self, memo: &str) -> Option<Address> {
        // a bare THORName parses as an address of no chain
        if let Ok(parsed) = bifrost_memo::parse_memo(memo) {
            if let Some(dest) = parsed.destination() {
                if Chain::ALL.iter().any(|chain| dest.is_chain(*chain)) {
                    return Some(dest.clone());
                }
            }
        }
        let parts = memo.split(':').collect::<Vec<_>>();
        let tx_type = parts.first()?.trim().parse::<TxType>().ok()?;
        if !matches!(tx_type, TxType::Add | TxType::Swap | TxType::LimitOrder) {
            return None;
        }
        let name = parts.get(2)?.trim();
        if name.is_empty() {
            return None;
        }
        match self.bridge.get_thorname(name).await {
            Ok(thorname) => thorname.alias(Chain::BNB).cloned(),
            Err(e) => {
                tracing::debug!(%name, error = %e, "fail to get thorname");
                None
            }
        }
    }

    fn get_thorchain_tx_ins(&self, tx_in: &TxIn) -> Vec<ObservedTx> {
        tx_in
            .tx_array
            .iter()
            .filter_map(|item| match deck::observed_tx(tx_in, item) {
                Ok(observed) => observed,
                Err(e) => {
                    tracing::error!(tx = %item.tx, error = %e, "fail to parse tx");
                    self.ctx.metrics.error(
                        Module::Observer,
                        Some(tx_in.chain),
                        "fail_to_parse_tx",
                    );
                    None
                }
            })
            .collect()
    }

    async fn is_active(&self) -> Result<bool> {
        let status = self.bridge.fetch_node_status().await?;
        if status != NodeStatus::Active {
            tracing::debug!(?status, "node is not active, skipping");
        }
        Ok(status == NodeStatus::Active)
    }

    /// Attests a chunk, retrying for at most one home block.
    ///
    /// Inactive nodes attest nothing. A sequence collision means another
    /// broadcast of ours is in flight and counts as delivered.
    pub async fn sign_and_send_to_thorchain(&self, tx_in: &TxIn) -> Result<()> {
        if !self.is_active().await? {
            return Ok(());
        }
        let txs = self.get_thorchain_tx_ins(tx_in);
        if txs.is_empty() {
            return Ok(());
        }
        let msgs = self.bridge.get_observations_std_tx(txs).await?;
        if msgs.is_empty() {
            return Ok(());
        }
        let _timer = self.ctx.metrics.sign_to_thorchain_duration.start_timer();
        let bridge = &self.bridge;
        let task = || {
            let msgs = msgs.clone();
            async move {
                match bridge.broadcast(msgs).await {
                    Ok(tx_id) => {
                        tracing::info!(
                            chain = %tx_in.chain,
                            %tx_id,
                            "sent to THORChain"
                        );
                        Ok(())
                    }
                    Err(e) if e.is_sequence_collision() => {
                        tracing::debug!(error = %e, "sequence collision");
                        Ok(())
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "fail to send to THORChain");
                        Err(backoff::Error::transient(e))
                    }
                }
            }
        };
        backoff::future::retry(retry::bounded_exponential(self.block_time), task)
            .await?;
        self.ctx.metrics.observer_tx_to_thorchain.inc();
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::TRACE,
            kind = %probe::Kind::Observer,
            chain = %tx_in.chain,
            count = tx_in.tx_array.len(),
            finalised = tx_in.finalised,
        );
        Ok(())
    }

    async fn handle_errata_block(&self, block: ErrataBlock) {
        self.remove_from_deck(&block.txs).await;
        for tx in block.txs {
            if let Err(e) = self.send_errata(block.height, tx).await {
                tracing::error!(error = %e, "fail to send errata tx");
                self.ctx.metrics.error(
                    Module::Observer,
                    None,
                    "fail_to_broadcast_errata_tx",
                );
            }
        }
    }

    /// Drops rolled back transactions from the deck.
    async fn remove_from_deck(&self, txs: &[ErrataTx]) {
        let mut state = self.state.lock().await;
        for errata in txs {
            for entry in state
                .on_deck
                .iter_mut()
                .filter(|entry| entry.chain == errata.chain)
            {
                entry.tx_array.retain(|item| {
                    !item.tx.eq_ignore_ascii_case(errata.tx_id.as_str())
                });
                entry.count = entry.tx_array.len().to_string();
            }
        }
        if let Err(e) = self.storage.set_on_deck_txs(&state.on_deck) {
            tracing::error!(error = %e, "fail to save ondeck txs");
        }
    }

    async fn send_errata(&self, height: i64, tx: ErrataTx) -> Result<()> {
        let msg = self.bridge.get_errata_msg(tx.tx_id.clone(), tx.chain);
        let tx_id = self.bridge.broadcast(vec![msg]).await?;
        tracing::info!(
            chain = %tx.chain,
            height,
            errata = %tx.tx_id,
            %tx_id,
            "sent errata to THORChain"
        );
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::TRACE,
            kind = %probe::Kind::Errata,
            chain = %tx.chain,
            height,
        );
        Ok(())
    }

    /// Reports a vault balance to the home chain.
    pub async fn send_solvency(&self, solvency: Solvency) {
        if !solvency.is_complete() {
            tracing::debug!("ignoring incomplete solvency report");
            return;
        }
        match self.is_active().await {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                tracing::error!(error = %e, "fail to get node status");
                return;
            }
        }
        let chain = solvency.chain;
        let msg = self.bridge.get_solvency_msg(
            solvency.height,
            chain,
            solvency.pub_key,
            solvency.coins,
        );
        match self.bridge.broadcast(vec![msg]).await {
            Ok(tx_id) => {
                tracing::info!(%chain, %tx_id, "sent solvency to THORChain");
            }
            Err(e) => {
                tracing::error!(%chain, error = %e, "fail to send solvency");
                self.ctx.metrics.error(
                    Module::Observer,
                    Some(chain),
                    "fail_to_send_solvency",
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bifrost_client_traits::mocks::{MockBridge, MockChainClient};
    use bifrost_config::BifrostConfig;
    use bifrost_store::InMemoryStore;
    use bifrost_types::{
        Coin, Coins, Msg, PubKey, ThorName, ThorNameAlias, TxId, Vault,
        VaultAddress,
    };

    const VAULT: &str = "bc1qvault";
    const USER: &str = "bc1quser";

    struct Harness {
        observer: Arc<Observer>,
        bridge: Arc<MockBridge>,
        clients: Vec<Arc<MockChainClient>>,
        storage: ObserverStorage,
    }

    fn pub_key() -> PubKey {
        PubKey::new("thorpub1vault")
    }

    fn hash(n: u8) -> String {
        format!("{n:064X}")
    }

    fn item(n: u8, height: i64, from: &str, to: &str) -> TxInItem {
        TxInItem {
            block_height: height,
            tx: hash(n),
            sender: from.to_string(),
            to: to.to_string(),
            coins: Coins::new(vec![Coin::new(Chain::BTC.gas_asset(), 50_000)]),
            observed_vault_pub_key: pub_key(),
            ..Default::default()
        }
    }

    fn inbound(n: u8, height: i64) -> TxInItem {
        item(n, height, USER, VAULT)
    }

    fn outbound(n: u8, height: i64) -> TxInItem {
        let mut out = item(n, height, VAULT, USER);
        out.memo = format!("OUT:{}", hash(99));
        out
    }

    fn harness_with(chains: &[Chain], storage: ObserverStorage) -> Harness {
        let ctx = BifrostContext::new(BifrostConfig::default()).unwrap();
        let bridge = Arc::new(MockBridge::new("thor1node"));
        {
            let mut state = bridge.state();
            state.node_status = NodeStatus::Active;
            state.vaults = vec![Vault {
                pub_key: pub_key(),
                addresses: chains
                    .iter()
                    .map(|chain| VaultAddress {
                        chain: *chain,
                        address: Address::new(VAULT).unwrap(),
                    })
                    .collect(),
                ..Default::default()
            }];
        }
        let pubkey_manager =
            Arc::new(PubKeyManager::new(bridge.clone(), ctx.metrics.clone()));
        pubkey_manager.add_pubkey(pub_key(), true);
        pubkey_manager.set_addresses(
            &pub_key(),
            chains
                .iter()
                .map(|chain| (*chain, Address::new(VAULT).unwrap()))
                .collect(),
        );
        let clients = chains
            .iter()
            .map(|chain| Arc::new(MockChainClient::new(*chain)))
            .collect::<Vec<_>>();
        let observer = Observer::new(
            ctx,
            bridge.clone(),
            pubkey_manager,
            clients
                .iter()
                .map(|c| c.clone() as Arc<dyn ChainClient>)
                .collect(),
            storage.clone(),
        )
        .with_block_time(Duration::from_millis(100));
        Harness {
            observer: Arc::new(observer),
            bridge,
            clients,
            storage,
        }
    }

    fn harness(chains: &[Chain]) -> Harness {
        harness_with(
            chains,
            ObserverStorage::new(Arc::new(InMemoryStore::default())),
        )
    }

    fn observed_in(msgs: &[Msg]) -> Vec<ObservedTx> {
        msgs.iter()
            .flat_map(|msg| match msg {
                Msg::ObservedTxIn { txs, .. } => txs.clone(),
                _ => Vec::new(),
            })
            .collect()
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn inbound_is_attested_before_and_after_finality() {
        let h = harness(&[Chain::BTC]);
        let btc = &h.clients[0];
        {
            let mut state = btc.state();
            state.confirmation_ready = false;
            state.confirmation_count = 6;
        }
        h.observer
            .add_to_deck(TxIn::new(Chain::BTC, vec![inbound(1, 100)]))
            .await;

        h.observer.send_deck().await;
        let broadcasts = h.bridge.broadcasts();
        assert_eq!(broadcasts.len(), 1);
        let pre = observed_in(&broadcasts[0]);
        assert_eq!(pre.len(), 1);
        assert_eq!((pre[0].block_height, pre[0].finalise_height), (100, 106));
        let deck = h.observer.deck().await;
        assert_eq!(deck.len(), 1);
        assert!(deck[0].filtered && deck[0].sent_un_finalised);
        assert_eq!(deck[0].confirmation_required, 6);

        // not final yet and already attested once
        h.observer.send_deck().await;
        assert_eq!(h.bridge.broadcasts().len(), 1);

        btc.state().confirmation_ready = true;
        h.observer.send_deck().await;
        let broadcasts = h.bridge.broadcasts();
        assert_eq!(broadcasts.len(), 2);
        let last = observed_in(&broadcasts[1]);
        assert_eq!((last[0].block_height, last[0].finalise_height), (106, 106));
        assert!(h.observer.deck().await.is_empty());
        assert!(h.storage.get_on_deck_txs().unwrap().is_empty());
        assert_eq!(btc.state().observed.len(), 2);
    }

    #[tokio::test]
    async fn mempool_inbounds_wait_for_their_block() {
        let h = harness(&[Chain::BTC]);
        let mut mempool = TxIn::new(Chain::BTC, vec![inbound(1, 100)]);
        mempool.mem_pool = true;
        h.observer.add_to_deck(mempool).await;
        h.observer.send_deck().await;
        assert!(h.bridge.broadcasts().is_empty());
        assert!(h.observer.deck().await.is_empty());

        // internal transfers are attested from the mempool
        let mut internal = TxIn::new(Chain::BTC, vec![item(2, 100, VAULT, VAULT)]);
        internal.mem_pool = true;
        h.observer.add_to_deck(internal).await;
        h.observer.send_deck().await;
        let msgs = h.bridge.broadcasts().concat();
        assert_eq!(msgs.len(), 2);
        assert!(matches!(msgs[0], Msg::ObservedTxIn { .. }));
        assert!(matches!(msgs[1], Msg::ObservedTxOut { .. }));
    }

    fn observed_out(msgs: &[Msg]) -> Vec<ObservedTx> {
        msgs.iter()
            .flat_map(|msg| match msg {
                Msg::ObservedTxOut { txs, .. } => txs.clone(),
                _ => Vec::new(),
            })
            .collect()
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn mempool_outbound_is_finalised_once_its_block_arrives() {
        let h = harness(&[Chain::BTC]);
        let btc = &h.clients[0];
        {
            let mut state = btc.state();
            state.confirmation_ready = false;
            state.confirmation_count = 6;
        }
        let mut mempool = TxIn::new(Chain::BTC, vec![outbound(3, 100)]);
        mempool.mem_pool = true;
        h.observer.add_to_deck(mempool).await;
        h.observer.send_deck().await;
        let broadcasts = h.bridge.broadcasts();
        assert_eq!(broadcasts.len(), 1);
        let pre = observed_out(&broadcasts[0]);
        assert_eq!(pre.len(), 1);
        // outbounds are final on the home chain as soon as they are voted
        assert_eq!((pre[0].block_height, pre[0].finalise_height), (100, 100));

        // the block scanner reports the same tx
        h.observer
            .add_to_deck(TxIn::new(Chain::BTC, vec![outbound(3, 100)]))
            .await;
        let deck = h.observer.deck().await;
        assert_eq!(deck.len(), 1);
        assert!(deck[0].mem_pool && deck[0].sent_un_finalised);
        assert_eq!(deck[0].tx_array.len(), 1);

        h.observer.send_deck().await;
        assert_eq!(h.bridge.broadcasts().len(), 1);

        btc.state().confirmation_ready = true;
        h.observer.send_deck().await;
        let broadcasts = h.bridge.broadcasts();
        assert_eq!(broadcasts.len(), 2);
        let last = observed_out(&broadcasts[1]);
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].tx.id.as_str(), hash(3));
        assert_eq!((last[0].block_height, last[0].finalise_height), (106, 106));
        assert!(h.observer.deck().await.is_empty());
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn signed_outbounds_are_observed_once() {
        let h = harness(&[Chain::BTC]);
        let mut signed = TxIn::new(Chain::BTC, vec![outbound(2, 100)]);
        signed.mem_pool = true;
        signed.filtered = true;
        h.observer.observe_signed(signed.clone()).await;

        let mut receivers = h.observer.receivers.lock().take().unwrap();
        let queued = receivers.tx_in.recv().await.unwrap();
        assert_eq!(queued, signed);
        h.observer.add_to_deck(queued).await;

        // the block scanner reports the same outbound later on
        let mut scanned = outbound(2, 101);
        scanned.tx = scanned.tx.to_lowercase();
        h.observer
            .add_to_deck(TxIn::new(Chain::BTC, vec![scanned]))
            .await;
        assert_eq!(h.observer.deck().await.len(), 1);

        h.observer.send_deck().await;
        let msgs = h.bridge.broadcasts().concat();
        assert_eq!(msgs.len(), 1);
        match &msgs[0] {
            Msg::ObservedTxOut { txs, .. } => {
                assert_eq!(txs.len(), 1);
                assert_eq!(txs[0].block_height, 100);
            }
            other => panic!("unexpected message {other:?}"),
        }
        assert!(h.observer.deck().await.is_empty());
    }

    #[tokio::test]
    async fn errata_removes_txs_from_deck() {
        let h = harness(&[Chain::BTC]);
        h.clients[0].state().confirmation_ready = false;
        h.observer
            .add_to_deck(TxIn::new(
                Chain::BTC,
                vec![inbound(1, 100), inbound(2, 100)],
            ))
            .await;
        h.observer
            .handle_errata_block(ErrataBlock {
                height: 100,
                txs: vec![ErrataTx {
                    tx_id: TxId::new(&hash(1)).unwrap(),
                    chain: Chain::BTC,
                }],
            })
            .await;

        let deck = h.observer.deck().await;
        assert_eq!(deck[0].tx_array.len(), 1);
        assert_eq!(deck[0].tx_array[0].tx, hash(2));
        assert_eq!(h.storage.get_on_deck_txs().unwrap(), deck);
        let msgs = h.bridge.broadcasts().concat();
        assert!(matches!(
            &msgs[..],
            [Msg::Errata { chain: Chain::BTC, .. }]
        ));
    }

    #[tokio::test]
    async fn solvency_is_reported_by_active_nodes_only() {
        let h = harness(&[Chain::BTC]);
        let report = |height| Solvency {
            height,
            chain: Chain::BTC,
            pub_key: pub_key(),
            coins: Coins::new(vec![Coin::new(Chain::BTC.gas_asset(), 1)]),
        };
        h.observer.send_solvency(report(0)).await;
        h.bridge.state().node_status = NodeStatus::Standby;
        h.observer.send_solvency(report(10)).await;
        assert!(h.bridge.broadcasts().is_empty());

        h.bridge.state().node_status = NodeStatus::Active;
        h.observer.send_solvency(report(10)).await;
        let msgs = h.bridge.broadcasts().concat();
        assert!(matches!(&msgs[..], [Msg::Solvency { height: 10, .. }]));
    }

    #[tokio::test]
    async fn sequence_collision_counts_as_delivered() {
        let h = harness(&[Chain::BTC]);
        h.bridge.state().collide_broadcasts = 1;
        let mut tx_in = TxIn::new(Chain::BTC, vec![inbound(1, 100)]);
        tx_in.filtered = true;
        h.observer.sign_and_send_to_thorchain(&tx_in).await.unwrap();
        let state = h.bridge.state();
        assert_eq!(state.broadcast_attempts, 1);
        assert!(state.broadcasts.is_empty());
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn failed_attestations_stay_on_deck() {
        let h = harness(&[Chain::BTC]);
        h.bridge.state().fail_broadcasts = usize::MAX;
        h.observer
            .add_to_deck(TxIn::new(Chain::BTC, vec![inbound(1, 100)]))
            .await;
        h.observer.send_deck().await;
        let deck = h.observer.deck().await;
        assert_eq!(deck.len(), 1);
        assert!(deck[0].filtered);
        assert_eq!(
            h.observer.ctx.metrics.error_count(
                Module::Observer,
                Some(Chain::BTC),
                "fail_to_send_to_thorchain"
            ),
            1
        );

        h.bridge.state().fail_broadcasts = 0;
        h.observer.send_deck().await;
        assert_eq!(h.bridge.broadcasts().len(), 1);
        assert!(h.observer.deck().await.is_empty());
    }

    #[tokio::test]
    async fn memo_flag_accounts_are_not_paid() {
        let h = harness(&[Chain::BTC, Chain::BNB]);
        let bnb = &h.clients[1];
        bnb.state().account.has_memo_flag = true;
        h.observer
            .add_to_deck(TxIn::new(Chain::BNB, vec![inbound(1, 100)]))
            .await;
        h.observer
            .add_to_deck(TxIn::new(Chain::BTC, vec![inbound(2, 100)]))
            .await;
        h.observer.send_deck().await;
        let observed = observed_in(&h.bridge.broadcasts().concat());
        assert_eq!(observed.len(), 1);
        assert_eq!(observed[0].tx.chain, Chain::BTC);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn thorname_destinations_with_memo_flag_are_dropped() {
        const FLAGGED: &str = "bnb1flagged";
        let h = harness(&[Chain::BTC, Chain::BNB]);
        h.bridge.state().thornames.insert(
            "alice".to_string(),
            ThorName {
                name: "alice".to_string(),
                aliases: vec![ThorNameAlias {
                    chain: Chain::BNB,
                    address: Address::new(FLAGGED).unwrap(),
                }],
                ..Default::default()
            },
        );
        h.clients[1]
            .state()
            .memo_flagged
            .insert(FLAGGED.to_string());
        let mut to_alice = inbound(1, 100);
        to_alice.memo = "=:BNB.BNB:alice".to_string();
        let mut to_plain = inbound(2, 100);
        to_plain.memo = "=:BNB.BNB:bnb1plain".to_string();
        h.clients[0].state().confirmation_ready = false;
        h.observer
            .add_to_deck(TxIn::new(Chain::BTC, vec![to_alice, to_plain]))
            .await;

        h.observer.send_deck().await;
        let deck = h.observer.deck().await;
        assert_eq!(deck.len(), 1);
        assert_eq!(deck[0].tx_array.len(), 1);
        assert_eq!(deck[0].tx_array[0].tx, hash(2));
        let observed = observed_in(&h.bridge.broadcasts().concat());
        assert_eq!(observed.len(), 1);
        assert_eq!(observed[0].tx.id.as_str(), hash(2));
        assert!(logs_contain("dropping tx paying an account with memo flag"));
    }

    #[tokio::test]
    async fn deck_survives_a_restart() {
        let storage = ObserverStorage::new(Arc::new(InMemoryStore::default()));
        let first = harness_with(&[Chain::BTC], storage.clone());
        first.clients[0].state().confirmation_ready = false;
        first
            .observer
            .add_to_deck(TxIn::new(Chain::BTC, vec![inbound(1, 100)]))
            .await;
        first.observer.send_deck().await;

        let second = harness_with(&[Chain::BTC], storage);
        let deck = second.observer.deck().await;
        assert_eq!(deck, first.observer.deck().await);
        assert!(deck[0].sent_un_finalised);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn scanned_batches_flow_to_thorchain() {
        let h = harness(&[Chain::BTC]);
        h.observer.start().await.unwrap();
        let queues = h.clients[0].state().queues.clone().unwrap();
        queues
            .tx_in
            .send(TxIn::new(Chain::BTC, vec![inbound(1, 100)]))
            .await
            .unwrap();

        let mut attempts = 0;
        while h.bridge.broadcasts().is_empty() && attempts < 50 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            attempts += 1;
        }
        assert_eq!(h.bridge.broadcasts().len(), 1);
        h.observer.stop().await;
        assert!(h.observer.start().await.is_err());
    }
}
