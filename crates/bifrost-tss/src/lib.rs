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
//! # Bifrost TSS 🔑
//!
//! [`HttpKeyManager`] drives the local TSS engine over its HTTP API: keygen
//! ceremonies when the home chain asks for a new vault, keysign ceremonies
//! for every outbound. [`keyshare`] keeps encrypted backups of the engine's
//! key shares.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bifrost_client_traits::{Bridge, KeyManager};
use bifrost_config::TssConfig;
use bifrost_types::{Blame, KeysignError, PubKey};
use bifrost_utils::{Error, Result};
use num_bigint::BigUint;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

/// Encrypted key share backups.
pub mod keyshare;

/// Order of the secp256k1 group.
const SECP256K1_N: &str =
    "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEBAAEDCE6AF48A03BBFD25E8CD0364141";

/// Keysign parties are formed on home heights rounded down to this, so
/// every member picks the same leader.
const KEYSIGN_HEIGHT_ROUNDING: i64 = 20;

/// Status of a successful ceremony.
const STATUS_SUCCESS: u8 = 1;

#[derive(Debug, Serialize)]
struct KeygenRequest {
    keys: Vec<String>,
    block_height: i64,
}

#[derive(Debug, Deserialize)]
struct KeygenResponse {
    #[serde(default)]
    pub_key: String,
    #[serde(default)]
    status: u8,
    #[serde(default)]
    blame: Blame,
}

#[derive(Debug, Serialize)]
struct KeysignRequest {
    pool_pub_key: String,
    messages: Vec<String>,
    block_height: i64,
}

#[derive(Debug, Deserialize)]
struct Signature {
    msg: String,
    r: String,
    s: String,
    #[serde(default)]
    recovery_id: String,
}

#[derive(Debug, Deserialize)]
struct KeysignResponse {
    #[serde(default)]
    signatures: Vec<Signature>,
    #[serde(default)]
    status: u8,
    #[serde(default)]
    blame: Blame,
}

#[derive(Debug, Deserialize)]
struct KeyshareResponse {
    keyshare: String,
}

/// The TSS engine over HTTP.
pub struct HttpKeyManager {
    client: reqwest::Client,
    host: Url,
    bridge: Arc<dyn Bridge>,
}

impl std::fmt::Debug for HttpKeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpKeyManager")
            .field("host", &self.host.as_str())
            .finish()
    }
}

impl HttpKeyManager {
    /// A client of the engine configured in `config`. The home chain gives
    /// the height keysign parties are formed at.
    pub fn new(config: &TssConfig, bridge: Arc<dyn Bridge>) -> Result<Self> {
        let host = Url::parse(&config.host)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout))
            .build()?;
        Ok(Self {
            client,
            host,
            bridge,
        })
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
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

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.host.join(path)?;
        let response = self.client.post(url).json(body).send().await?;
        Self::read(response).await
    }
}

fn decode(value: &str) -> Result<Vec<u8>> {
    hex::decode(value).map_err(|_| Error::Generic("tss returned invalid hex"))
}

/// `r || s || v` with `s` in the lower half of the curve order, so the
/// signature is accepted by chains that reject malleable signatures.
fn normalize_signature(r: &[u8], s: &[u8], recovery_id: &[u8]) -> Result<Vec<u8>> {
    if r.len() > 32 || s.len() > 32 {
        return Err(Error::Generic("tss signature component too long"));
    }
    let n = BigUint::parse_bytes(SECP256K1_N.as_bytes(), 16)
        .ok_or(Error::Generic("invalid curve order"))?;
    let half_order = &n >> 1u32;
    let mut s = BigUint::from_bytes_be(s);
    if s > half_order {
        s = &n - s;
    }
    let r = BigUint::from_bytes_be(r).to_bytes_be();
    let s = s.to_bytes_be();
    let mut signature = vec![0u8; 64];
    // left pad both halves
    signature[32 - r.len()..32].copy_from_slice(&r);
    signature[64 - s.len()..].copy_from_slice(&s);
    signature.extend_from_slice(recovery_id);
    Ok(signature)
}

#[async_trait]
impl KeyManager for HttpKeyManager {
    #[tracing::instrument(skip(self, members), fields(members = members.len()))]
    async fn generate_new_key(
        &self,
        height: i64,
        members: &[PubKey],
    ) -> Result<(PubKey, Blame)> {
        if members.is_empty() {
            return Ok((PubKey::default(), Blame::default()));
        }
        let request = KeygenRequest {
            keys: members.iter().map(|pk| pk.to_string()).collect(),
            block_height: height,
        };
        let response: KeygenResponse = self.post("/keygen", &request).await?;
        if response.status == STATUS_SUCCESS && !response.pub_key.is_empty() {
            tracing::info!(pubkey = %response.pub_key, "tss keygen results success");
            return Ok((PubKey::new(response.pub_key), Blame::default()));
        }
        let mut blame = response.blame;
        if blame.is_empty() {
            blame.fail_reason = String::from("keygen failed without blame");
        }
        tracing::info!(round = %blame.round, reason = %blame.fail_reason, "tss keygen results blame");
        Ok((PubKey::default(), blame))
    }

    #[tracing::instrument(skip(self, payload), fields(vault = %pub_key))]
    async fn keysign(&self, pub_key: &PubKey, payload: &[u8]) -> Result<Vec<u8>> {
        let height = self.bridge.get_block_height().await?;
        let message = hex::encode(payload);
        let request = KeysignRequest {
            pool_pub_key: pub_key.to_string(),
            messages: vec![message.clone()],
            block_height: height / KEYSIGN_HEIGHT_ROUNDING * KEYSIGN_HEIGHT_ROUNDING,
        };
        let response: KeysignResponse = self.post("/keysign", &request).await?;
        if response.status != STATUS_SUCCESS || !response.blame.blame_nodes.is_empty()
        {
            return Err(KeysignError::new(response.blame).into());
        }
        let signature = response
            .signatures
            .iter()
            .find(|sig| sig.msg == message)
            .ok_or(Error::Generic("no signature for the message in the keysign result"))?;
        normalize_signature(
            &decode(&signature.r)?,
            &decode(&signature.s)?,
            &decode(&signature.recovery_id)?,
        )
    }

    async fn keyshare(&self, pub_key: &PubKey) -> Result<Vec<u8>> {
        let url = self.host.join(&format!("/keyshare/{pub_key}"))?;
        let response: KeyshareResponse =
            Self::read(self.client.get(url).send().await?).await?;
        decode(&response.keyshare)
    }
}
