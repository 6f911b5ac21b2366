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

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bifrost_block_scanner::BlockScannerFetcher;
use bifrost_types::{
    Account, Chain, ErrataBlock, ErrataTx, PubKey, TxIn, TxInItem, TxOutItem,
};
use bifrost_utils::{Error, Result};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use url::Url;

/// Endpoint paths of the sidecar.
pub mod endpoints {
    /// Chain tip.
    pub const HEIGHT: &str = "/height";
    /// Finalised transactions of one block.
    pub const BLOCK: &str = "/block";
    /// Pending transactions.
    pub const MEMPOOL: &str = "/mempool";
    /// Address of a vault pubkey.
    pub const ADDRESS: &str = "/address";
    /// Account of a vault pubkey.
    pub const ACCOUNT: &str = "/account";
    /// Account at a raw address.
    pub const ACCOUNT_BY_ADDRESS: &str = "/account-by-address";
    /// Confirmations a batch needs.
    pub const CONFIRMATIONS: &str = "/confirmations";
    /// Unsigned payload of an outbound.
    pub const SIGN_BUILD: &str = "/sign/build";
    /// Raw transaction from a payload signature.
    pub const SIGN_ASSEMBLE: &str = "/sign/assemble";
    /// Broadcast of a raw transaction.
    pub const BROADCAST: &str = "/broadcast";
}

/// A scanned block, with the transactions the chain rolled back at it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Transactions of the block.
    pub tx_in: TxIn,
    /// Transactions reorged out.
    #[serde(default)]
    pub errata: Vec<ErrataTx>,
}

#[derive(Debug, Deserialize)]
struct AddressResponse {
    address: String,
}

#[derive(Debug, Serialize)]
struct BuildRequest<'a> {
    item: &'a TxOutItem,
    height: i64,
    checkpoint: String,
}

#[derive(Debug, Deserialize)]
struct BuildResponse {
    #[serde(default)]
    payload: String,
    #[serde(default)]
    checkpoint: String,
}

/// An outbound ready for the TSS engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnsignedTx {
    /// Bytes to sign, empty when there is nothing left to sign.
    pub payload: Vec<u8>,
    /// Checkpoint to resume the ceremony from.
    pub checkpoint: Vec<u8>,
}

#[derive(Debug, Serialize)]
struct AssembleRequest<'a> {
    item: &'a TxOutItem,
    checkpoint: String,
    signature: String,
}

#[derive(Debug, Deserialize)]
struct AssembleResponse {
    raw: String,
    #[serde(default)]
    observation: Option<TxInItem>,
}

/// A raw transaction assembled by the sidecar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssembledTx {
    /// Raw transaction.
    pub raw: Vec<u8>,
    /// The outbound as the observer should attest it.
    pub observation: Option<TxInItem>,
}

#[derive(Debug, Serialize)]
struct BroadcastRequest<'a> {
    item: &'a TxOutItem,
    raw: String,
}

#[derive(Debug, Deserialize)]
struct BroadcastResponse {
    tx_id: String,
}

fn decode_hex(value: &str) -> Result<Vec<u8>> {
    hex::decode(value.trim_start_matches("0x"))
        .map_err(|_| Error::Generic("sidecar returned invalid hex"))
}

/// JSON API of a chain sidecar.
///
/// The sidecar is the only component that knows the chain's wire formats:
/// it parses blocks into [`TxIn`] batches, builds the bytes TSS signs and
/// assembles the final transaction from the signature.
pub struct SidecarApi {
    chain: Chain,
    client: reqwest::Client,
    base: Url,
    current_height: AtomicI64,
    errata: parking_lot::Mutex<Option<mpsc::Sender<ErrataBlock>>>,
}

impl std::fmt::Debug for SidecarApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SidecarApi")
            .field("chain", &self.chain)
            .field("base", &self.base.as_str())
            .finish()
    }
}

impl SidecarApi {
    /// A client of the sidecar listening at `rpc_host`.
    pub fn new(chain: Chain, rpc_host: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(rpc_host)?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            chain,
            client,
            base,
            current_height: AtomicI64::new(0),
            errata: parking_lot::Mutex::new(None),
        })
    }

    /// Rolled back transactions found while scanning go to `errata`.
    pub fn set_errata_queue(&self, errata: mpsc::Sender<ErrataBlock>) {
        *self.errata.lock() = Some(errata);
    }

    /// The last tip seen.
    pub fn current_height(&self) -> i64 {
        self.current_height.load(Ordering::SeqCst)
    }

    async fn read<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::UnavailableBlock);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Bridge {
                status: status.as_u16(),
                body,
            });
        }
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        height: Option<i64>,
    ) -> Result<T> {
        let mut url = self.base.join(path)?;
        if let Some(height) = height {
            url.query_pairs_mut()
                .append_pair("height", &height.to_string());
        }
        tracing::trace!(chain = %self.chain, %url, "GET");
        let response = self.client.get(url).send().await?;
        Self::read(response).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.base.join(path)?;
        tracing::trace!(chain = %self.chain, %url, "POST");
        let response = self.client.post(url).json(body).send().await?;
        Self::read(response).await
    }

    /// The chain tip, remembered as the current height.
    pub async fn height(&self) -> Result<i64> {
        let height: i64 = self.get(endpoints::HEIGHT, None).await?;
        self.current_height.store(height, Ordering::SeqCst);
        Ok(height)
    }

    /// Block `height`. A block the chain does not have yet is
    /// [`Error::UnavailableBlock`].
    pub async fn block(&self, height: i64) -> Result<Block> {
        self.get(&format!("{}/{}", endpoints::BLOCK, height), None)
            .await
    }

    /// Address of `pub_key` on the chain.
    pub async fn address(&self, pub_key: &PubKey) -> Result<String> {
        let response: AddressResponse = self
            .get(&format!("{}/{}", endpoints::ADDRESS, pub_key), None)
            .await?;
        Ok(response.address)
    }

    /// Account of `pub_key`.
    pub async fn account(
        &self,
        pub_key: &PubKey,
        height: Option<i64>,
    ) -> Result<Account> {
        self.get(&format!("{}/{}", endpoints::ACCOUNT, pub_key), height)
            .await
    }

    /// Account at `address`.
    pub async fn account_by_address(
        &self,
        address: &str,
        height: Option<i64>,
    ) -> Result<Account> {
        self.get(
            &format!("{}/{}", endpoints::ACCOUNT_BY_ADDRESS, address),
            height,
        )
        .await
    }

    /// Confirmations `tx_in` needs before it is final.
    pub async fn confirmations(&self, tx_in: &TxIn) -> Result<i64> {
        self.post(endpoints::CONFIRMATIONS, tx_in).await
    }

    /// The bytes TSS signs for `item`.
    pub async fn build(
        &self,
        item: &TxOutItem,
        height: i64,
        checkpoint: &[u8],
    ) -> Result<UnsignedTx> {
        let request = BuildRequest {
            item,
            height,
            checkpoint: hex::encode(checkpoint),
        };
        let response: BuildResponse =
            self.post(endpoints::SIGN_BUILD, &request).await?;
        Ok(UnsignedTx {
            payload: decode_hex(&response.payload)?,
            checkpoint: decode_hex(&response.checkpoint)?,
        })
    }

    /// The raw transaction of `item` signed with `signature`.
    pub async fn assemble(
        &self,
        item: &TxOutItem,
        checkpoint: &[u8],
        signature: &[u8],
    ) -> Result<AssembledTx> {
        let request = AssembleRequest {
            item,
            checkpoint: hex::encode(checkpoint),
            signature: hex::encode(signature),
        };
        let response: AssembleResponse =
            self.post(endpoints::SIGN_ASSEMBLE, &request).await?;
        Ok(AssembledTx {
            raw: decode_hex(&response.raw)?,
            observation: response.observation,
        })
    }

    /// Broadcasts `raw`, returning the chain's tx hash.
    pub async fn broadcast(&self, item: &TxOutItem, raw: &[u8]) -> Result<String> {
        let request = BroadcastRequest {
            item,
            raw: hex::encode(raw),
        };
        let response: BroadcastResponse =
            self.post(endpoints::BROADCAST, &request).await?;
        Ok(response.tx_id)
    }
}

#[async_trait]
impl BlockScannerFetcher for SidecarApi {
    async fn fetch_mem_pool(&self, height: i64) -> Result<TxIn> {
        let mut tx_in: TxIn = self.get(endpoints::MEMPOOL, Some(height)).await?;
        tx_in.chain = self.chain;
        tx_in.mem_pool = true;
        Ok(tx_in)
    }

    async fn fetch_txs(&self, height: i64, chain_height: i64) -> Result<TxIn> {
        let block = self.block(height).await?;
        if chain_height > self.current_height() {
            self.current_height.store(chain_height, Ordering::SeqCst);
        }
        if !block.errata.is_empty() {
            let errata = self.errata.lock().clone();
            match errata {
                Some(queue) => {
                    let errata = ErrataBlock {
                        height,
                        txs: block.errata,
                    };
                    if queue.send(errata).await.is_err() {
                        tracing::error!(chain = %self.chain, "errata queue closed");
                    }
                }
                None => tracing::warn!(
                    chain = %self.chain,
                    height,
                    "dropping errata, adapter not started"
                ),
            }
        }
        let mut tx_in = block.tx_in;
        tx_in.chain = self.chain;
        tx_in.count = tx_in.tx_array.len().to_string();
        Ok(tx_in)
    }

    async fn get_height(&self) -> Result<i64> {
        self.height().await
    }
}
