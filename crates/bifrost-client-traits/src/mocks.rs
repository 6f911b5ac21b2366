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

//! In-memory test doubles of the client traits.
//!
//! Every double keeps its state behind a mutex that tests reach through
//! `state()`, to script answers before the call and read counters after.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use bifrost_config::ChainConfig;
use bifrost_types::{
    sha256_upper_hex, Account, Blame, Chain, KeygenBlock, Msg,
    NodeAccount, NodeStatus, PubKey, ThorName, TxId, TxIn, TxInItem, TxOut,
    TxOutItem, Vault,
};
use bifrost_utils::{Error, Result, CODE_UNAUTHORIZED};
use parking_lot::{Mutex, MutexGuard};

use crate::{
    Bridge, ChainClient, KeyManager, ObserverQueues, PubKeyContracts,
    SignTxError, SignedTx,
};

/// Scriptable state of a [`MockBridge`].
#[derive(Debug, Default)]
pub struct MockBridgeState {
    /// Mimir values, unset keys read `-1`.
    pub mimir: HashMap<String, i64>,
    /// Protocol constants, unset names read `0`.
    pub constants: HashMap<String, i64>,
    /// Home-chain height.
    pub block_height: i64,
    /// Whether the node is syncing.
    pub catching_up: bool,
    /// Last observed inbound height per chain.
    pub last_observed_in_height: HashMap<Chain, i64>,
    /// Keysign queues by `(height, vault)`.
    pub keysign: HashMap<(i64, PubKey), TxOut>,
    /// Keygen blocks by height.
    pub keygen_blocks: HashMap<i64, KeygenBlock>,
    /// Status of every node account.
    pub node_status: NodeStatus,
    /// Registered names.
    pub thornames: HashMap<String, ThorName>,
    /// Known vaults, asgards included.
    pub vaults: Vec<Vault>,
    /// Vault pubkeys with their contracts.
    pub pubkeys: Vec<PubKeyContracts>,
    /// Number of upcoming broadcasts that fail.
    pub fail_broadcasts: usize,
    /// Number of upcoming broadcasts rejected as sequence collisions.
    pub collide_broadcasts: usize,
    /// Every broadcast attempt, failed ones included.
    pub broadcast_attempts: usize,
    /// Messages of the successful broadcasts.
    pub broadcasts: Vec<Vec<Msg>>,
    /// Number of keysign queue queries.
    pub keysign_queries: usize,
}

/// A home chain held in memory.
#[derive(Debug)]
pub struct MockBridge {
    signer: String,
    state: Mutex<MockBridgeState>,
}

impl MockBridge {
    /// A bridge signing as `signer`, at home height 1.
    pub fn new(signer: impl Into<String>) -> Self {
        let state = MockBridgeState {
            block_height: 1,
            ..Default::default()
        };
        Self {
            signer: signer.into(),
            state: Mutex::new(state),
        }
    }

    /// Locks the state.
    pub fn state(&self) -> MutexGuard<'_, MockBridgeState> {
        self.state.lock()
    }

    /// Sets a mimir value.
    pub fn set_mimir(&self, key: impl Into<String>, value: i64) {
        self.state.lock().mimir.insert(key.into(), value);
    }

    /// Sets the home-chain height.
    pub fn set_block_height(&self, height: i64) {
        self.state.lock().block_height = height;
    }

    /// Queues outbounds for `vault` at `height`.
    pub fn set_keysign(&self, height: i64, vault: &PubKey, tx_out: TxOut) {
        self.state.lock().keysign.insert((height, vault.clone()), tx_out);
    }

    /// Messages of the successful broadcasts.
    pub fn broadcasts(&self) -> Vec<Vec<Msg>> {
        self.state.lock().broadcasts.clone()
    }

    fn check_height(&self, height: i64) -> Result<()> {
        if height > self.state.lock().block_height {
            return Err(Error::UnavailableBlock);
        }
        Ok(())
    }
}

#[async_trait]
impl Bridge for MockBridge {
    fn signer_address(&self) -> &str {
        &self.signer
    }

    async fn get_mimir(&self, key: &str) -> Result<i64> {
        Ok(self.state.lock().mimir.get(key).copied().unwrap_or(-1))
    }

    async fn get_constant(&self, name: &str) -> Result<i64> {
        Ok(self.state.lock().constants.get(name).copied().unwrap_or(0))
    }

    async fn get_block_height(&self) -> Result<i64> {
        Ok(self.state.lock().block_height)
    }

    async fn is_catching_up(&self) -> Result<bool> {
        Ok(self.state.lock().catching_up)
    }

    async fn get_last_observed_in_height(&self, chain: Chain) -> Result<i64> {
        let state = self.state.lock();
        Ok(state
            .last_observed_in_height
            .get(&chain)
            .copied()
            .unwrap_or(0))
    }

    async fn get_keysign(&self, height: i64, pub_key: &PubKey) -> Result<TxOut> {
        self.check_height(height)?;
        let mut state = self.state.lock();
        state.keysign_queries += 1;
        Ok(state
            .keysign
            .get(&(height, pub_key.clone()))
            .cloned()
            .unwrap_or(TxOut {
                height,
                tx_array: Vec::new(),
            }))
    }

    async fn get_keygen_block(
        &self,
        height: i64,
        _pub_key: &PubKey,
    ) -> Result<KeygenBlock> {
        self.check_height(height)?;
        Ok(self
            .state
            .lock()
            .keygen_blocks
            .get(&height)
            .cloned()
            .unwrap_or(KeygenBlock {
                height,
                keygens: Vec::new(),
            }))
    }

    async fn get_node_account(&self, address: &str) -> Result<NodeAccount> {
        Ok(NodeAccount {
            node_address: address.to_string(),
            status: self.state.lock().node_status,
            ..Default::default()
        })
    }

    async fn get_thorname(&self, name: &str) -> Result<ThorName> {
        self.state
            .lock()
            .thornames
            .get(&name.to_lowercase())
            .cloned()
            .ok_or(Error::Generic("thorname not found"))
    }

    async fn get_asgards(&self) -> Result<Vec<Vault>> {
        Ok(self.state.lock().vaults.clone())
    }

    async fn get_vault(&self, pub_key: &PubKey) -> Result<Vault> {
        self.state
            .lock()
            .vaults
            .iter()
            .find(|v| &v.pub_key == pub_key)
            .cloned()
            .ok_or(Error::Generic("vault not found"))
    }

    async fn get_pubkeys(&self) -> Result<Vec<PubKeyContracts>> {
        Ok(self.state.lock().pubkeys.clone())
    }

    async fn broadcast(&self, msgs: Vec<Msg>) -> Result<TxId> {
        let mut state = self.state.lock();
        state.broadcast_attempts += 1;
        if state.fail_broadcasts > 0 {
            state.fail_broadcasts -= 1;
            return Err(Error::Bridge {
                status: 500,
                body: "scripted failure".into(),
            });
        }
        if state.collide_broadcasts > 0 {
            state.collide_broadcasts -= 1;
            return Err(Error::BroadcastRejected {
                code: CODE_UNAUTHORIZED,
                log: "account sequence mismatch".into(),
            });
        }
        let id = sha256_upper_hex(format!("{msgs:?}").as_bytes());
        state.broadcasts.push(msgs);
        Ok(TxId::new(&id)?)
    }
}

/// Scriptable state of a [`MockChainClient`].
#[derive(Debug, Default)]
pub struct MockChainState {
    /// Tip.
    pub height: i64,
    /// Scanner health.
    pub healthy: bool,
    /// Account returned for every vault.
    pub account: Account,
    /// Addresses whose account requires a memo.
    pub memo_flagged: HashSet<String>,
    /// Vault addresses, the pubkey itself when missing.
    pub addresses: HashMap<PubKey, String>,
    /// Results of the upcoming `sign_tx` calls, success when exhausted.
    pub sign_results: VecDeque<std::result::Result<SignedTx, SignTxError>>,
    /// Number of `sign_tx` calls.
    pub sign_calls: usize,
    /// Items passed to `sign_tx`, checkpoints included.
    pub signed_items: Vec<TxOutItem>,
    /// Number of upcoming broadcasts that fail.
    pub fail_broadcasts: usize,
    /// Number of `broadcast_tx` calls.
    pub broadcast_calls: usize,
    /// Payloads of the successful broadcasts.
    pub broadcasts: Vec<Vec<u8>>,
    /// Confirmations required by every batch.
    pub confirmation_count: i64,
    /// Whether every batch is confirmed.
    pub confirmation_ready: bool,
    /// `on_observed_tx_in` calls.
    pub observed: Vec<(TxInItem, i64)>,
    /// Whether solvency reports are due.
    pub solvency_due: bool,
    /// Heights solvency was reported at.
    pub solvency_reports: Vec<i64>,
    /// Observer queues handed to `start`.
    pub queues: Option<ObserverQueues>,
    /// Whether `stop` was called.
    pub stopped: bool,
}

/// An external chain held in memory.
#[derive(Debug)]
pub struct MockChainClient {
    config: ChainConfig,
    state: Mutex<MockChainState>,
}

impl MockChainClient {
    /// A healthy, confirmed chain at height 1.
    pub fn new(chain: Chain) -> Self {
        let state = MockChainState {
            height: 1,
            healthy: true,
            confirmation_ready: true,
            ..Default::default()
        };
        Self {
            config: ChainConfig::new(chain, "http://127.0.0.1:0"),
            state: Mutex::new(state),
        }
    }

    /// Locks the state.
    pub fn state(&self) -> MutexGuard<'_, MockChainState> {
        self.state.lock()
    }

    /// Queues the result of an upcoming `sign_tx` call.
    pub fn push_sign_result(
        &self,
        result: std::result::Result<SignedTx, SignTxError>,
    ) {
        self.state.lock().sign_results.push_back(result);
    }

    /// Number of `sign_tx` calls.
    pub fn sign_calls(&self) -> usize {
        self.state.lock().sign_calls
    }

    /// Number of `broadcast_tx` calls.
    pub fn broadcast_calls(&self) -> usize {
        self.state.lock().broadcast_calls
    }

    fn signed(&self, item: &TxOutItem, height: i64) -> SignedTx {
        let observation = TxInItem {
            block_height: height,
            tx: item.hash(),
            memo: item.memo.clone(),
            to: item.to_address.to_string(),
            coins: item.coins.clone(),
            observed_vault_pub_key: item.vault_pub_key.clone(),
            ..Default::default()
        };
        SignedTx {
            raw: format!("signed:{}", item.hash()).into_bytes(),
            checkpoint: Vec::new(),
            observation: Some(observation),
        }
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn start(&self, queues: ObserverQueues) -> Result<()> {
        self.state.lock().queues = Some(queues);
        Ok(())
    }

    async fn stop(&self) {
        self.state.lock().stopped = true;
    }

    fn is_block_scanner_healthy(&self) -> bool {
        self.state.lock().healthy
    }

    async fn sign_tx(
        &self,
        item: &TxOutItem,
        height: i64,
    ) -> std::result::Result<SignedTx, SignTxError> {
        let next = {
            let mut state = self.state.lock();
            state.sign_calls += 1;
            state.signed_items.push(item.clone());
            state.sign_results.pop_front()
        };
        next.unwrap_or_else(|| Ok(self.signed(item, height)))
    }

    async fn broadcast_tx(
        &self,
        _item: &TxOutItem,
        signed: &[u8],
    ) -> Result<String> {
        let mut state = self.state.lock();
        state.broadcast_calls += 1;
        if state.fail_broadcasts > 0 {
            state.fail_broadcasts -= 1;
            return Err(Error::Generic("scripted broadcast failure"));
        }
        state.broadcasts.push(signed.to_vec());
        Ok(sha256_upper_hex(signed))
    }

    async fn get_height(&self) -> Result<i64> {
        Ok(self.state.lock().height)
    }

    async fn get_address(&self, pool_pub_key: &PubKey) -> Result<String> {
        let state = self.state.lock();
        Ok(state
            .addresses
            .get(pool_pub_key)
            .cloned()
            .unwrap_or_else(|| pool_pub_key.to_string()))
    }

    async fn get_account(
        &self,
        _pool_pub_key: &PubKey,
        _height: Option<i64>,
    ) -> Result<Account> {
        Ok(self.state.lock().account.clone())
    }

    async fn get_account_by_address(
        &self,
        address: &str,
        _height: Option<i64>,
    ) -> Result<Account> {
        let state = self.state.lock();
        let mut account = state.account.clone();
        account.has_memo_flag |= state.memo_flagged.contains(address);
        Ok(account)
    }

    fn get_chain(&self) -> Chain {
        self.config.chain_id
    }

    fn get_config(&self) -> &ChainConfig {
        &self.config
    }

    async fn get_confirmation_count(&self, _tx_in: &TxIn) -> i64 {
        self.state.lock().confirmation_count
    }

    async fn confirmation_count_ready(&self, _tx_in: &TxIn) -> bool {
        self.state.lock().confirmation_ready
    }

    async fn on_observed_tx_in(&self, item: &TxInItem, block_height: i64) {
        self.state.lock().observed.push((item.clone(), block_height));
    }

    async fn should_report_solvency(&self, _height: i64) -> bool {
        self.state.lock().solvency_due
    }

    async fn report_solvency(&self, height: i64) -> Result<()> {
        self.state.lock().solvency_reports.push(height);
        Ok(())
    }
}

/// Scriptable state of a [`MockKeyManager`].
#[derive(Debug, Default)]
pub struct MockKeyManagerState {
    /// Results of the upcoming keygens, a fresh key when exhausted.
    pub keygen_results: VecDeque<Result<(PubKey, Blame)>>,
    /// Keygen calls as `(height, members)`.
    pub keygen_calls: Vec<(i64, Vec<PubKey>)>,
    /// Results of the upcoming keysigns, a signature over the payload when
    /// exhausted.
    pub keysign_results: VecDeque<Result<Vec<u8>>>,
    /// Number of keysign calls.
    pub keysign_calls: usize,
    /// Keyshare returned for every vault.
    pub keyshare: Vec<u8>,
}

/// A TSS engine held in memory.
#[derive(Debug, Default)]
pub struct MockKeyManager {
    state: Mutex<MockKeyManagerState>,
}

impl MockKeyManager {
    /// An engine whose keygens succeed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the state.
    pub fn state(&self) -> MutexGuard<'_, MockKeyManagerState> {
        self.state.lock()
    }
}

#[async_trait]
impl KeyManager for MockKeyManager {
    async fn generate_new_key(
        &self,
        height: i64,
        members: &[PubKey],
    ) -> Result<(PubKey, Blame)> {
        let mut state = self.state.lock();
        state.keygen_calls.push((height, members.to_vec()));
        state.keygen_results.pop_front().unwrap_or_else(|| {
            Ok((PubKey::new(format!("thorpub1keygen{height}")), Blame::default()))
        })
    }

    async fn keysign(&self, pub_key: &PubKey, payload: &[u8]) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        state.keysign_calls += 1;
        if let Some(result) = state.keysign_results.pop_front() {
            return result;
        }
        let mut signature = pub_key.as_str().as_bytes().to_vec();
        signature.extend_from_slice(payload);
        Ok(signature)
    }

    async fn keyshare(&self, _pub_key: &PubKey) -> Result<Vec<u8>> {
        Ok(self.state.lock().keyshare.clone())
    }
}
