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
//! # Bifrost THORChain Client 🌉
//!
//! [`HttpBridge`] implements [`Bridge`] against the home chain's REST API.
//! Queries go straight to the node, messages are posted as JSON to the
//! signer broadcast endpoint, which signs them with the node's key and
//! hands them to the home chain.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bifrost_client_traits::{Bridge, PubKeyContracts};
use bifrost_config::ThorchainConfig;
use bifrost_types::{
    Chain, KeygenBlock, Msg, NodeAccount, PubKey, ThorName, TxId, TxOut, Vault,
};
use bifrost_utils::metric::{Metrics, Module};
use bifrost_utils::{probe, Error, Result};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use url::Url;

/// Response bodies of the REST API.
pub mod types;

use types::*;

/// Endpoint paths.
pub mod endpoints {
    /// Last processed heights.
    pub const LAST_BLOCK: &str = "/thorchain/lastblock";
    /// Mimir values.
    pub const MIMIR: &str = "/thorchain/mimir/key";
    /// Keysign queues.
    pub const KEYSIGN: &str = "/thorchain/keysign";
    /// Keygen blocks.
    pub const KEYGEN: &str = "/thorchain/keygen";
    /// Node accounts.
    pub const NODE_ACCOUNT: &str = "/thorchain/node";
    /// Active vaults.
    pub const ASGARD_VAULTS: &str = "/thorchain/vaults/asgard";
    /// Vault pubkeys and routers.
    pub const PUB_KEYS: &str = "/thorchain/vaults/pubkeys";
    /// One vault.
    pub const VAULT: &str = "/thorchain/vault";
    /// Protocol constants.
    pub const CONSTANTS: &str = "/thorchain/constants";
    /// THORNames.
    pub const THORNAME: &str = "/thorchain/thorname";
    /// Tendermint status.
    pub const STATUS: &str = "/status";
}

/// Cosmos SDK code of a request the home chain does not know; such
/// transactions can never be accepted and are dropped silently.
const CODE_UNKNOWN_REQUEST: u32 = 6;

/// The home chain over HTTP.
pub struct HttpBridge {
    client: reqwest::Client,
    host: Url,
    rpc: Url,
    broadcast_endpoint: Url,
    signer: String,
    metrics: Arc<Metrics>,
    last_block: parking_lot::Mutex<Option<(Instant, i64)>>,
    constants: parking_lot::Mutex<Option<HashMap<String, i64>>>,
    broadcast_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for HttpBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBridge")
            .field("host", &self.host.as_str())
            .field("signer", &self.signer)
            .finish()
    }
}

impl HttpBridge {
    /// Creates a client from the `thorchain` configuration section.
    pub fn new(config: &ThorchainConfig, metrics: Arc<Metrics>) -> Result<Self> {
        let host = Url::parse(&config.chain_host)?;
        let rpc = if config.chain_rpc.is_empty() {
            host.clone()
        } else {
            Url::parse(&config.chain_rpc)?
        };
        let broadcast_endpoint = if config.signer_broadcast_endpoint.is_empty()
        {
            host.join("/txs")?
        } else {
            Url::parse(&config.signer_broadcast_endpoint)?
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            host,
            rpc,
            broadcast_endpoint,
            signer: config.signer_address.clone(),
            metrics,
            last_block: parking_lot::Mutex::new(None),
            constants: parking_lot::Mutex::new(None),
            broadcast_lock: tokio::sync::Mutex::new(()),
        })
    }

    async fn get<T: DeserializeOwned>(&self, base: &Url, path: &str) -> Result<T> {
        let url = base.join(path)?;
        tracing::trace!(%url, "GET");
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                self.metrics.error(
                    Module::ThorchainClient,
                    None,
                    "fail_get_from_thorchain",
                );
                return Err(e.into());
            }
        };
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Bridge {
                status: status.as_u16(),
                body,
            });
        }
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn get_with_path<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.get(&self.host, path).await
    }

    async fn get_last_block(
        &self,
        chain: Option<Chain>,
    ) -> Result<Vec<LastBlockHeights>> {
        let path = match chain {
            Some(chain) => format!("{}/{}", endpoints::LAST_BLOCK, chain),
            None => endpoints::LAST_BLOCK.to_string(),
        };
        self.get_with_path(&path).await
    }

    /// Every protocol constant, fetched once.
    pub async fn get_constants(&self) -> Result<HashMap<String, i64>> {
        let cached = self.constants.lock().clone();
        if let Some(constants) = cached {
            return Ok(constants);
        }
        let query: QueryConstants =
            self.get_with_path(endpoints::CONSTANTS).await?;
        *self.constants.lock() = Some(query.int_64_values.clone());
        Ok(query.int_64_values)
    }
}

/// Turns a 404 into [`Error::UnavailableBlock`].
fn not_found_as_unavailable(e: Error) -> Error {
    match e {
        Error::Bridge { status: 404, .. } => Error::UnavailableBlock,
        e => e,
    }
}

#[async_trait]
impl Bridge for HttpBridge {
    fn signer_address(&self) -> &str {
        &self.signer
    }

    async fn get_mimir(&self, key: &str) -> Result<i64> {
        self.get_with_path(&format!("{}/{}", endpoints::MIMIR, key))
            .await
    }

    async fn get_constant(&self, name: &str) -> Result<i64> {
        Ok(self.get_constants().await?.get(name).copied().unwrap_or(0))
    }

    async fn get_block_height(&self) -> Result<i64> {
        let cached = *self.last_block.lock();
        if let Some((at, height)) = cached {
            if at.elapsed() < Chain::THOR.approximate_block_time() && height > 0
            {
                return Ok(height);
            }
        }
        let heights = self.get_last_block(None).await?;
        let height = heights
            .first()
            .map(|h| h.thorchain)
            .ok_or(Error::Generic("thorchain reported no last block"))?;
        *self.last_block.lock() = Some((Instant::now(), height));
        Ok(height)
    }

    async fn is_catching_up(&self) -> Result<bool> {
        let status: NodeStatusResponse =
            self.get(&self.rpc, endpoints::STATUS).await?;
        Ok(status.result.sync_info.catching_up)
    }

    async fn get_last_observed_in_height(&self, chain: Chain) -> Result<i64> {
        self.get_last_block(Some(chain))
            .await?
            .into_iter()
            .find(|h| h.chain == chain)
            .map(|h| h.last_observed_in)
            .ok_or(Error::ChainNotFound { chain })
    }

    async fn get_keysign(&self, height: i64, pub_key: &PubKey) -> Result<TxOut> {
        let path = format!("{}/{}/{}", endpoints::KEYSIGN, height, pub_key);
        let query: QueryKeysign = self
            .get_with_path(&path)
            .await
            .map_err(not_found_as_unavailable)?;
        if query.keysign.tx_array.is_empty() {
            return Ok(query.keysign);
        }
        // a queue from another height would replay its outbounds
        if query.keysign.height != height {
            tracing::error!(
                requested = height,
                received = query.keysign.height,
                "keysign block height mismatch"
            );
            return Err(Error::Generic("invalid keysign: block height mismatch"));
        }
        Ok(query.keysign)
    }

    async fn get_keygen_block(
        &self,
        height: i64,
        pub_key: &PubKey,
    ) -> Result<KeygenBlock> {
        let path = format!("{}/{}/{}", endpoints::KEYGEN, height, pub_key);
        let query: QueryKeygenBlock = self
            .get_with_path(&path)
            .await
            .map_err(not_found_as_unavailable)?;
        Ok(query.keygen_block)
    }

    async fn get_node_account(&self, address: &str) -> Result<NodeAccount> {
        self.get_with_path(&format!("{}/{}", endpoints::NODE_ACCOUNT, address))
            .await
    }

    async fn get_thorname(&self, name: &str) -> Result<ThorName> {
        self.get_with_path(&format!("{}/{}", endpoints::THORNAME, name))
            .await
    }

    async fn get_asgards(&self) -> Result<Vec<Vault>> {
        self.get_with_path(endpoints::ASGARD_VAULTS).await
    }

    async fn get_vault(&self, pub_key: &PubKey) -> Result<Vault> {
        self.get_with_path(&format!("{}/{}", endpoints::VAULT, pub_key))
            .await
    }

    async fn get_pubkeys(&self) -> Result<Vec<PubKeyContracts>> {
        let query: QueryVaultsPubKeys =
            self.get_with_path(endpoints::PUB_KEYS).await?;
        Ok(query
            .asgard
            .into_iter()
            .chain(query.yggdrasil)
            .chain(query.inactive)
            .map(|v| PubKeyContracts {
                pub_key: v.pub_key,
                contracts: v.routers,
            })
            .collect())
    }

    #[tracing::instrument(skip_all, fields(msgs = msgs.len()))]
    async fn broadcast(&self, msgs: Vec<Msg>) -> Result<TxId> {
        let _guard = self.broadcast_lock.lock().await;
        let start = Instant::now();
        let request = BroadcastRequest {
            signer: self.signer.clone(),
            msgs,
        };
        let result = self
            .client
            .post(self.broadcast_endpoint.clone())
            .json(&request)
            .send()
            .await;
        self.metrics
            .send_to_thorchain_duration
            .observe(start.elapsed().as_secs_f64());
        let response = result?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            self.metrics.error(
                Module::ThorchainClient,
                None,
                "fail_broadcast_to_thorchain",
            );
            return Err(Error::Bridge {
                status: status.as_u16(),
                body,
            });
        }
        let commit: BroadcastResponse = response.json().await?;
        self.metrics.observer_tx_to_thorchain_signed.inc();
        let tx_id = TxId::new(&commit.txhash)?;
        if commit.code > 0 && commit.code != CODE_UNKNOWN_REQUEST {
            tracing::info!(
                code = commit.code,
                raw_log = %commit.raw_log,
                "failed tx"
            );
            return Err(Error::BroadcastRejected {
                code: commit.code,
                log: commit.raw_log,
            });
        }
        self.metrics.observer_tx_to_thorchain.inc();
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Sync,
            %tx_id,
            "broadcast to thorchain",
        );
        Ok(tx_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use bifrost_types::NodeStatus;
    use std::net::TcpListener;

    const HASH: &str =
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

    fn bridge(host: String) -> HttpBridge {
        let config = ThorchainConfig {
            chain_host: host,
            signer_address: String::from("thor1node"),
            ..Default::default()
        };
        HttpBridge::new(&config, Arc::new(Metrics::new().unwrap())).unwrap()
    }

    fn app() -> Router {
        Router::new()
            .route(
                "/thorchain/lastblock",
                get(|| async {
                    Json(serde_json::json!([
                        { "chain": "BTC", "last_observed_in": 700, "thorchain": 42 }
                    ]))
                }),
            )
            .route(
                "/thorchain/lastblock/:chain",
                get(|Path(chain): Path<String>| async move {
                    Json(serde_json::json!([
                        { "chain": chain, "last_observed_in": 700, "thorchain": 42 }
                    ]))
                }),
            )
            .route(
                "/thorchain/mimir/key/:key",
                get(|| async { Json(serde_json::json!(5)) }),
            )
            .route(
                "/thorchain/constants",
                get(|| async {
                    Json(serde_json::json!({
                        "int_64_values": { "SigningTransactionPeriod": 300 }
                    }))
                }),
            )
            .route(
                "/thorchain/keysign/:height/:pk",
                get(|Path((height, _pk)): Path<(i64, String)>| async move {
                    if height > 100 {
                        return Err(StatusCode::NOT_FOUND);
                    }
                    Ok(Json(serde_json::json!({
                        "keysign": { "height": height, "tx_array": [] },
                        "signature": ""
                    })))
                }),
            )
            .route(
                "/thorchain/node/:addr",
                get(|Path(addr): Path<String>| async move {
                    Json(serde_json::json!({
                        "node_address": addr,
                        "status": "Active"
                    }))
                }),
            )
            .route(
                "/thorchain/vaults/pubkeys",
                get(|| async {
                    Json(serde_json::json!({
                        "asgard": [{ "pub_key": "thorpub1a", "routers": [
                            { "chain": "ETH", "router": "0xrouter" }
                        ] }],
                        "yggdrasil": [{ "pub_key": "thorpub1y" }],
                        "inactive": []
                    }))
                }),
            )
            .route(
                "/status",
                get(|| async {
                    Json(serde_json::json!({
                        "result": { "sync_info": { "catching_up": true } }
                    }))
                }),
            )
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn queries_the_rest_api() {
        let bridge = bridge(serve(app()));
        assert_eq!(bridge.get_block_height().await.unwrap(), 42);
        assert_eq!(
            bridge.get_last_observed_in_height(Chain::BTC).await.unwrap(),
            700
        );
        assert_eq!(bridge.get_mimir("HaltBTCChain").await.unwrap(), 5);
        assert_eq!(
            bridge
                .get_constant("SigningTransactionPeriod")
                .await
                .unwrap(),
            300
        );
        assert_eq!(bridge.get_constant("Missing").await.unwrap(), 0);
        assert!(bridge.is_catching_up().await.unwrap());
        assert_eq!(
            bridge.fetch_node_status().await.unwrap(),
            NodeStatus::Active
        );

        let pubkeys = bridge.get_pubkeys().await.unwrap();
        assert_eq!(pubkeys.len(), 2);
        assert_eq!(pubkeys[0].contracts[0].chain, Chain::ETH);
    }

    #[tokio::test]
    async fn missing_keysign_is_an_unavailable_block() {
        let bridge = bridge(serve(app()));
        let pk = PubKey::new("thorpub1a");
        let out = bridge.get_keysign(10, &pk).await.unwrap();
        assert!(out.tx_array.is_empty());
        let err = bridge.get_keysign(101, &pk).await.unwrap_err();
        assert!(err.is_unavailable_block());
    }

    #[tokio::test]
    async fn broadcast_maps_result_codes() {
        let app = Router::new().route(
            "/txs",
            post(|Json(req): Json<BroadcastRequest>| async move {
                let code = match &req.msgs[0] {
                    Msg::Errata { .. } => 4,
                    Msg::Solvency { .. } => 6,
                    _ => 0,
                };
                Json(serde_json::json!({
                    "txhash": HASH,
                    "code": code,
                    "raw_log": "account sequence mismatch"
                }))
            }),
        );
        let bridge = bridge(serve(app));
        let errata = bridge.get_errata_msg(TxId::new(HASH).unwrap(), Chain::BTC);
        let err = bridge.broadcast(vec![errata]).await.unwrap_err();
        assert!(err.is_sequence_collision());

        let solvency = bridge.get_solvency_msg(
            1,
            Chain::BTC,
            PubKey::new("thorpub1a"),
            Default::default(),
        );
        let tx_id = bridge.broadcast(vec![solvency]).await.unwrap();
        assert_eq!(tx_id, TxId::new(HASH).unwrap());
        assert_eq!(bridge.metrics.observer_tx_to_thorchain.get(), 1);
        assert_eq!(bridge.metrics.observer_tx_to_thorchain_signed.get(), 2);
    }
}
