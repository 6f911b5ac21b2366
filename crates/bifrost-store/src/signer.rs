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

use std::collections::BTreeMap;
use std::sync::Arc;

use bifrost_types::TxOutItem;
use bifrost_utils::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::crypto::{Cipher, SIGNER_STORE_SALT};
use super::scanner::ScannerStorage;
use super::KeyValueStore;

const TX_OUT_PREFIX: &str = "txout-v4-";

/// Lifecycle of a stored outbound item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    /// Unknown status.
    #[default]
    Unknown,
    /// Waiting to be signed.
    Available,
    /// Temporarily unavailable for signing.
    Unavailable,
    /// Already spent, never returned by [`SignerStorage::list`].
    Spent,
}

/// An outbound instruction together with its signing progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutStoreItem {
    /// The instruction.
    pub tx_out_item: TxOutItem,
    /// Status of the item.
    #[serde(default)]
    pub status: TxStatus,
    /// Home-chain height the instruction was published at.
    pub height: i64,
    /// Position of the instruction within its batch.
    pub index: i64,
    /// Whether the last keysign failed in its final round.
    #[serde(default)]
    pub round7_retry: bool,
    /// Adapter bytes to reuse when signing again.
    #[serde(default, with = "hex_bytes")]
    pub checkpoint: Vec<u8>,
    /// A signed transaction whose broadcast failed.
    #[serde(default, with = "hex_bytes")]
    pub signed_tx: Vec<u8>,
}

#[derive(Serialize)]
struct KeyMaterial<'a> {
    tx_out_item: &'a TxOutItem,
    height: i64,
    index: i64,
}

impl TxOutStoreItem {
    /// A new item, available for signing.
    pub fn new(height: i64, tx_out_item: TxOutItem, index: i64) -> Self {
        Self {
            tx_out_item,
            status: TxStatus::Available,
            height,
            index,
            round7_retry: false,
            checkpoint: Vec::new(),
            signed_tx: Vec::new(),
        }
    }

    /// The storage key, stable across retries of the same item.
    pub fn key(&self) -> Result<String> {
        let buf = serde_json::to_vec(&KeyMaterial {
            tx_out_item: &self.tx_out_item,
            height: self.height,
            index: self.index,
        })?;
        Ok(format!("{TX_OUT_PREFIX}{}", hex::encode(Sha256::digest(buf))))
    }

    /// Whether the item is waiting on a retry, either a round 7 keysign
    /// failure or a failed broadcast.
    pub fn is_retry(&self) -> bool {
        self.round7_retry || !self.signed_tx.is_empty()
    }

    /// The group this item is signed in, `"<CHAIN>-<vault>"`.
    pub fn group_key(&self) -> String {
        format!(
            "{}-{}",
            self.tx_out_item.chain, self.tx_out_item.vault_pub_key
        )
    }
}

/// Outbound items waiting to be signed.
///
/// The backend is shared with the home-chain scanner position, see
/// [`SignerStorage::scanner`].
#[derive(Clone)]
pub struct SignerStorage {
    db: Arc<dyn KeyValueStore>,
    cipher: Option<Cipher>,
}

impl std::fmt::Debug for SignerStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignerStorage")
            .field("encrypted", &self.cipher.is_some())
            .finish()
    }
}

impl SignerStorage {
    /// Wraps a backend; values are encrypted when `passphrase` is not empty.
    pub fn new(db: Arc<dyn KeyValueStore>, passphrase: &str) -> Self {
        let cipher = (!passphrase.is_empty())
            .then(|| Cipher::new(passphrase, SIGNER_STORE_SALT));
        Self { db, cipher }
    }

    /// The home-chain scanner storage living in the same backend.
    pub fn scanner(&self) -> ScannerStorage {
        ScannerStorage::new(self.db.clone())
    }

    fn encode(&self, item: &TxOutStoreItem) -> Result<Vec<u8>> {
        let buf = serde_json::to_vec(item)?;
        match &self.cipher {
            Some(cipher) => cipher.encrypt(&buf),
            None => Ok(buf),
        }
    }

    fn decode(&self, buf: &[u8]) -> Result<TxOutStoreItem> {
        let item = match &self.cipher {
            Some(cipher) => serde_json::from_slice(&cipher.decrypt(buf)?)?,
            None => serde_json::from_slice(buf)?,
        };
        Ok(item)
    }

    /// Stores an item, replacing the previous version.
    #[tracing::instrument(skip_all, fields(height = item.height, index = item.index))]
    pub fn set(&self, item: &TxOutStoreItem) -> Result<()> {
        let key = item.key()?;
        let buf = self.encode(item)?;
        self.db.set(key.as_bytes(), &buf)
    }

    /// Stores several items atomically.
    #[tracing::instrument(skip_all, fields(len = items.len()))]
    pub fn batch(&self, items: &[TxOutStoreItem]) -> Result<()> {
        let entries = items
            .iter()
            .map(|item| Ok((item.key()?.into_bytes(), self.encode(item)?)))
            .collect::<Result<Vec<_>>>()?;
        self.db.set_batch(entries)
    }

    /// Loads the item stored under `key`.
    #[tracing::instrument(skip(self))]
    pub fn get(&self, key: &str) -> Result<Option<TxOutStoreItem>> {
        match self.db.get(key.as_bytes())? {
            Some(buf) => self.decode(&buf).map(Some),
            None => Ok(None),
        }
    }

    /// Whether an item is stored under `key`.
    pub fn has(&self, key: &str) -> Result<bool> {
        self.db.has(key.as_bytes())
    }

    /// Removes an item.
    #[tracing::instrument(skip_all, fields(height = item.height, index = item.index))]
    pub fn remove(&self, item: &TxOutStoreItem) -> Result<()> {
        let key = item.key()?;
        self.db.remove(key.as_bytes())
    }

    /// Every item that is not spent, ordered by height and then by
    /// [`TxOutItem::hash`], so all nodes walk their items in the same order.
    ///
    /// Values that cannot be decoded are logged and skipped.
    pub fn list(&self) -> Result<Vec<TxOutStoreItem>> {
        let mut items = Vec::new();
        for (key, buf) in self.db.scan_prefix(TX_OUT_PREFIX.as_bytes())? {
            if buf.is_empty() {
                continue;
            }
            match self.decode(&buf) {
                Ok(item) if item.status == TxStatus::Spent => {}
                Ok(item) => items.push((item.tx_out_item.hash(), item)),
                Err(e) => {
                    tracing::error!(
                        key = %String::from_utf8_lossy(&key),
                        error = %e,
                        "Failed to decode txout item",
                    );
                }
            }
        }
        items.sort_by(|(ha, a), (hb, b)| {
            a.height.cmp(&b.height).then_with(|| ha.cmp(hb))
        });
        Ok(items.into_iter().map(|(_, item)| item).collect())
    }

    /// [`SignerStorage::list`] grouped by `"<CHAIN>-<vault>"`, each group
    /// keeping the list order.
    pub fn ordered_lists(
        &self,
    ) -> Result<BTreeMap<String, Vec<TxOutStoreItem>>> {
        let mut lists: BTreeMap<String, Vec<TxOutStoreItem>> = BTreeMap::new();
        for item in self.list()? {
            lists.entry(item.group_key()).or_default().push(item);
        }
        Ok(lists)
    }

    /// Flushes the backend.
    pub fn close(&self) -> Result<()> {
        self.db.flush()
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &[u8],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
