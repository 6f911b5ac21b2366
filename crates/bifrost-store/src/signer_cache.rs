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

use std::sync::Arc;

use bifrost_utils::Result;

use super::KeyValueStore;

const SIGNED_PREFIX: &str = "signed-v6-";
const TX_MAP_PREFIX: &str = "tx-map-v6-";

/// Remembers which outbound instructions this node signed, keyed by their
/// vault independent cache hash, and which chain transaction carried them.
#[derive(Clone)]
pub struct SignerCache {
    db: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for SignerCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignerCache").finish()
    }
}

fn signed_key(hash: &str) -> Vec<u8> {
    format!("{SIGNED_PREFIX}{hash}").into_bytes()
}

fn tx_map_key(tx_hash: &str) -> Vec<u8> {
    format!("{TX_MAP_PREFIX}{tx_hash}").into_bytes()
}

impl SignerCache {
    /// Wraps a backend.
    pub fn new(db: Arc<dyn KeyValueStore>) -> Self {
        Self { db }
    }

    /// Marks `tx_out_hash` as signed by the chain transaction `tx_hash`.
    #[tracing::instrument(skip(self))]
    pub fn set_signed(&self, tx_out_hash: &str, tx_hash: &str) -> Result<()> {
        self.db.set_batch(vec![
            (signed_key(tx_out_hash), vec![1]),
            (tx_map_key(tx_hash), tx_out_hash.as_bytes().to_vec()),
        ])
    }

    /// Whether `tx_out_hash` was signed.
    pub fn has_signed(&self, tx_out_hash: &str) -> Result<bool> {
        self.db.has(&signed_key(tx_out_hash))
    }

    /// Forgets the signing carried by the chain transaction `tx_hash`.
    #[tracing::instrument(skip(self))]
    pub fn remove_signed(&self, tx_hash: &str) -> Result<()> {
        let map_key = tx_map_key(tx_hash);
        let Some(tx_out_hash) = self.db.get(&map_key)? else {
            return Ok(());
        };
        let tx_out_hash = String::from_utf8_lossy(&tx_out_hash).into_owned();
        self.db.remove(&signed_key(&tx_out_hash))?;
        self.db.remove(&map_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStore;

    #[test]
    fn signed_lifecycle() {
        let cache = SignerCache::new(Arc::new(InMemoryStore::default()));
        assert!(!cache.has_signed("CACHEHASH").unwrap());
        cache.set_signed("CACHEHASH", "0xabc").unwrap();
        assert!(cache.has_signed("CACHEHASH").unwrap());

        cache.remove_signed("0xunknown").unwrap();
        assert!(cache.has_signed("CACHEHASH").unwrap());

        cache.remove_signed("0xabc").unwrap();
        assert!(!cache.has_signed("CACHEHASH").unwrap());
    }
}
