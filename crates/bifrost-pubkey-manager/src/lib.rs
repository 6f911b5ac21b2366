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
//! # Bifrost PubKey Manager 🔑
//!
//! Keeps an always up to date list of the vault pubkeys known to the home
//! chain, which of them this node signs for, their per-chain addresses and
//! their router contracts.

use std::collections::HashMap;
use std::sync::Arc;

use bifrost_client_traits::{Bridge, PubKeyContracts};
use bifrost_context::Shutdown;
use bifrost_types::{Address, Chain, PubKey};
use bifrost_utils::metric::{Metrics, Module};
use bifrost_utils::probe;
use parking_lot::RwLock;

/// Called with every pubkey the manager learns about.
pub type OnNewPubKey =
    Arc<dyn Fn(&PubKey) -> bifrost_utils::Result<()> + Send + Sync>;

/// Retired vaults are pruned every this many refreshes.
const PRUNE_EVERY: u64 = 100;

#[derive(Debug, Clone)]
struct PubKeyInfo {
    pub_key: PubKey,
    contracts: HashMap<Chain, Address>,
    addresses: HashMap<Chain, Address>,
    signer: bool,
    node_account: bool,
}

impl PubKeyInfo {
    fn new(pub_key: PubKey, signer: bool, node_account: bool) -> Self {
        Self {
            pub_key,
            contracts: HashMap::new(),
            addresses: HashMap::new(),
            signer,
            node_account,
        }
    }
}

/// Tracks vault pubkeys, refreshed from the home chain every block.
pub struct PubKeyManager {
    bridge: Arc<dyn Bridge>,
    metrics: Arc<Metrics>,
    pubkeys: RwLock<Vec<PubKeyInfo>>,
    callbacks: RwLock<Vec<OnNewPubKey>>,
}

impl PubKeyManager {
    /// Creates an empty manager.
    pub fn new(bridge: Arc<dyn Bridge>, metrics: Arc<Metrics>) -> Self {
        Self {
            bridge,
            metrics,
            pubkeys: RwLock::new(Vec::new()),
            callbacks: RwLock::new(Vec::new()),
        }
    }

    /// Loads the pubkeys and their contracts from the home chain.
    #[tracing::instrument(skip_all)]
    pub async fn start(&self) -> bifrost_utils::Result<()> {
        let pairs = self.bridge.get_pubkeys().await?;
        for pair in &pairs {
            self.add_pubkey(pair.pub_key.clone(), false);
        }
        self.update_contracts(&pairs);
        self.update_addresses().await;
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Lifecycle,
            pubkeys = pairs.len(),
            started = true,
        );
        Ok(())
    }

    /// Refreshes the pubkeys once per home block until shutdown.
    pub async fn run(&self, mut shutdown: Shutdown) {
        tracing::info!("start to update pub keys");
        let block_time = Chain::THOR.approximate_block_time();
        let mut round: u64 = 1;
        while shutdown.sleep(block_time).await {
            self.fetch_pubkeys(round % PRUNE_EVERY == 0).await;
            round += 1;
        }
        tracing::info!("stop to update pub keys");
    }

    /// One refresh: new pubkeys, contracts, vaults we are a member of and,
    /// when `prune`, removal of retired vaults.
    pub async fn fetch_pubkeys(&self, prune: bool) {
        let pairs = match self.bridge.get_pubkeys().await {
            Ok(pairs) => pairs,
            Err(e) => {
                tracing::error!(error = %e, "fail to get pubkeys from thorchain");
                self.metrics.error(Module::PubKeyManager, None, "get_pubkeys");
                return;
            }
        };
        let mut current = Vec::with_capacity(pairs.len());
        for pair in &pairs {
            self.add_pubkey(pair.pub_key.clone(), false);
            current.push(pair.pub_key.clone());
        }
        self.update_contracts(&pairs);

        match self.bridge.get_asgards().await {
            Ok(vaults) => {
                let node_pub_key = self.get_node_pubkey();
                for vault in vaults {
                    if let Some(info) = self
                        .pubkeys
                        .write()
                        .iter_mut()
                        .find(|info| info.pub_key == vault.pub_key)
                    {
                        for addr in &vault.addresses {
                            info.addresses
                                .insert(addr.chain, addr.address.clone());
                        }
                    }
                    if node_pub_key
                        .as_ref()
                        .map_or(false, |pk| vault.has_member(pk))
                    {
                        self.add_pubkey(vault.pub_key.clone(), true);
                        current.push(vault.pub_key);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "fail to get asgards from thorchain");
                self.metrics.error(Module::PubKeyManager, None, "get_asgards");
                return;
            }
        }
        self.update_addresses().await;

        if prune {
            let mut pubkeys = self.pubkeys.write();
            // the most recent pubkeys are never pruned
            let keep_from = pubkeys.len().saturating_sub(2);
            let mut idx = 0;
            pubkeys.retain(|info| {
                let keep = info.node_account
                    || idx >= keep_from
                    || current.contains(&info.pub_key);
                idx += 1;
                keep
            });
        }
    }

    fn update_contracts(&self, pairs: &[PubKeyContracts]) {
        let mut pubkeys = self.pubkeys.write();
        for pair in pairs {
            for info in pubkeys.iter_mut().filter(|i| i.pub_key == pair.pub_key)
            {
                info.contracts = pair
                    .contracts
                    .iter()
                    .map(|c| (c.chain, c.router.clone()))
                    .collect();
            }
        }
    }

    /// Fills the addresses of pubkeys that have none yet.
    async fn update_addresses(&self) {
        let missing = self
            .pubkeys
            .read()
            .iter()
            .filter(|info| info.addresses.is_empty() && !info.node_account)
            .map(|info| info.pub_key.clone())
            .collect::<Vec<_>>();
        for pub_key in missing {
            match self.bridge.get_vault(&pub_key).await {
                Ok(vault) => self.set_addresses(
                    &pub_key,
                    vault
                        .addresses
                        .into_iter()
                        .map(|a| (a.chain, a.address))
                        .collect(),
                ),
                Err(e) => {
                    tracing::debug!(%pub_key, error = %e, "fail to get vault");
                }
            }
        }
    }

    /// Records the per-chain addresses of a pubkey.
    pub fn set_addresses(
        &self,
        pub_key: &PubKey,
        addresses: HashMap<Chain, Address>,
    ) {
        if let Some(info) = self
            .pubkeys
            .write()
            .iter_mut()
            .find(|info| &info.pub_key == pub_key)
        {
            info.addresses.extend(addresses);
        }
    }

    /// Every known pubkey.
    pub fn get_pubkeys(&self) -> Vec<PubKey> {
        self.pubkeys
            .read()
            .iter()
            .map(|info| info.pub_key.clone())
            .collect()
    }

    /// Pubkeys this node is a signer of.
    pub fn get_sign_pubkeys(&self) -> Vec<PubKey> {
        self.pubkeys
            .read()
            .iter()
            .filter(|info| info.signer)
            .map(|info| info.pub_key.clone())
            .collect()
    }

    /// The node account's own pubkey.
    pub fn get_node_pubkey(&self) -> Option<PubKey> {
        self.pubkeys
            .read()
            .iter()
            .find(|info| info.node_account)
            .map(|info| info.pub_key.clone())
    }

    /// Whether the pubkey is known.
    pub fn has_pubkey(&self, pub_key: &PubKey) -> bool {
        self.pubkeys.read().iter().any(|info| &info.pub_key == pub_key)
    }

    /// Adds a pubkey, or upgrades a known one to signer.
    ///
    /// A known pubkey is never downgraded from signer.
    pub fn add_pubkey(&self, pub_key: PubKey, signer: bool) {
        {
            let mut pubkeys = self.pubkeys.write();
            if let Some(info) =
                pubkeys.iter_mut().find(|info| info.pub_key == pub_key)
            {
                info.signer |= signer;
                return;
            }
            pubkeys.push(PubKeyInfo::new(pub_key.clone(), signer, false));
        }
        self.fire_callbacks(&pub_key);
    }

    /// Adds the node account's own pubkey, always a signer.
    pub fn add_node_pubkey(&self, pub_key: PubKey) {
        {
            let mut pubkeys = self.pubkeys.write();
            if let Some(info) =
                pubkeys.iter_mut().find(|info| info.pub_key == pub_key)
            {
                info.signer = true;
                info.node_account = true;
                return;
            }
            pubkeys.push(PubKeyInfo::new(pub_key.clone(), true, true));
        }
        self.fire_callbacks(&pub_key);
    }

    /// Forgets a pubkey.
    pub fn remove_pubkey(&self, pub_key: &PubKey) {
        self.pubkeys.write().retain(|info| &info.pub_key != pub_key);
    }

    /// The vault owning `addr` on `chain`, if it is one of ours.
    pub fn is_valid_pool_address(
        &self,
        addr: &str,
        chain: Chain,
    ) -> Option<PubKey> {
        if addr.is_empty() {
            return None;
        }
        self.pubkeys
            .read()
            .iter()
            .find(|info| {
                info.addresses
                    .get(&chain)
                    .map_or(false, |a| a.as_str().eq_ignore_ascii_case(addr))
            })
            .map(|info| info.pub_key.clone())
    }

    /// The address of a vault on `chain`.
    pub fn get_address(&self, pub_key: &PubKey, chain: Chain) -> Option<Address> {
        self.pubkeys
            .read()
            .iter()
            .find(|info| &info.pub_key == pub_key)
            .and_then(|info| info.addresses.get(&chain).cloned())
    }

    /// Every router contract registered on `chain`.
    pub fn get_contracts(&self, chain: Chain) -> Vec<Address> {
        self.pubkeys
            .read()
            .iter()
            .filter_map(|info| info.contracts.get(&chain).cloned())
            .collect()
    }

    /// The router contract of a vault on `chain`.
    pub fn get_contract(&self, chain: Chain, pub_key: &PubKey) -> Option<Address> {
        self.pubkeys
            .read()
            .iter()
            .find(|info| &info.pub_key == pub_key)
            .and_then(|info| info.contracts.get(&chain).cloned())
    }

    /// Registers a callback fired for every new pubkey.
    pub fn register_callback(&self, callback: OnNewPubKey) {
        self.callbacks.write().push(callback);
    }

    fn fire_callbacks(&self, pub_key: &PubKey) {
        let callbacks = self.callbacks.read().clone();
        for callback in callbacks {
            if let Err(e) = callback(pub_key) {
                tracing::error!(%pub_key, error = %e, "fail to call callback");
            }
        }
    }
}
