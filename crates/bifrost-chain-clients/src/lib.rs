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
//! # Bifrost Chain Clients ⛓️
//!
//! Adapters between the daemon and the external chains.
//!
//! Every chain is served by a [`RemoteChainClient`], which speaks JSON over
//! HTTP to a per-chain sidecar. The sidecar owns everything chain specific
//! (address encodings, fee models, transaction building); the client owns
//! block scanning, TSS signing and the signer cache.

mod remote;
mod sidecar;
/// Solvency reporting while a chain is halted.
pub mod solvency;

use std::sync::Arc;

use bifrost_client_traits::{Bridge, ChainClient, ChainClients, KeyManager};
use bifrost_context::BifrostContext;
use bifrost_store::KeyValueStore;
use bifrost_types::Chain;

pub use remote::RemoteChainClient;
pub use sidecar::SidecarApi;

/// Builds a client for every enabled chain of the configuration.
///
/// `open_store` opens the store of a chain's scanner from its configured
/// path. A chain whose client can not be built is left out and logged.
pub fn load_chains<F>(
    ctx: &BifrostContext,
    bridge: Arc<dyn Bridge>,
    key_manager: Arc<dyn KeyManager>,
    open_store: F,
) -> ChainClients
where
    F: Fn(Chain, &str) -> Arc<dyn KeyValueStore>,
{
    let mut clients = ChainClients::new();
    for (name, chain_config) in &ctx.config.chains {
        if chain_config.disabled {
            tracing::info!(chain = %name, "chain is disabled by configuration");
            continue;
        }
        let chain = chain_config.chain_id;
        let store = open_store(chain, &chain_config.block_scanner.db_path);
        match RemoteChainClient::new(
            ctx.clone(),
            chain_config.clone(),
            bridge.clone(),
            key_manager.clone(),
            store,
        ) {
            Ok(client) => {
                let client: Arc<dyn ChainClient> = Arc::new(client);
                clients.insert(client);
            }
            Err(e) => {
                tracing::error!(%chain, error = %e, "fail to load chain");
            }
        }
    }
    clients
}
