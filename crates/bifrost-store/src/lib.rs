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

//! # Bifrost Store Module 🕸️
//!
//! A module for managing the durable state of the bridge daemon.
//!
//! ## Overview
//!
//! Every logical store sits on top of a [`KeyValueStore`] backend, which is
//! either a [Sled](https://sled.rs) tree on disk or an ordered in-memory map.
//! Keys use stable textual prefixes and values are JSON, so keys and values
//! are byte-opaque to the backend.
//!
//! * [`ScannerStorage`] keeps a chain's scan position and the blocks that
//!   need a retry.
//! * [`ObserverStorage`] keeps the observer's deck.
//! * [`SignerStorage`] keeps the outbound items waiting to be signed,
//!   optionally encrypted with a passphrase.
//! * [`SignerCache`] remembers which outbound instructions were signed.
use std::path::Path;
use std::sync::Arc;

use bifrost_utils::Result;

/// Authenticated encryption of values at rest.
pub mod crypto;
/// A module for managing in-memory storage.
pub mod mem;
/// The observer's deck store.
pub mod observer;
/// Per-chain block scanner positions.
pub mod scanner;
/// The signer's outbound item store.
pub mod signer;
/// Signed outbound bookkeeping.
pub mod signer_cache;
/// A module for setting up and managing a [Sled](https://sled.rs)-based database.
#[cfg(feature = "sled")]
pub mod sled;

pub use crypto::Cipher;
pub use mem::InMemoryStore;
pub use observer::ObserverStorage;
pub use scanner::{BlockScanStatus, BlockStatusItem, ScannerStorage};
pub use signer::{SignerStorage, TxOutStoreItem, TxStatus};
pub use signer_cache::SignerCache;
/// A store that uses [`sled`](https://sled.rs) as the backend.
#[cfg(feature = "sled")]
pub use self::sled::SledStore;

/// An ordered, byte oriented key/value backend.
///
/// Every write is atomic per key, and `set_batch` is atomic as a whole.
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored under `key`.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;
    /// Removes `key`, a missing key is not an error.
    fn remove(&self, key: &[u8]) -> Result<()>;
    /// Whether `key` exists.
    fn has(&self, key: &[u8]) -> Result<bool> {
        self.get(key).map(|v| v.is_some())
    }
    /// All entries whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
    /// Writes all entries at once.
    fn set_batch(&self, entries: Vec<(Vec<u8>, Vec<u8>)>) -> Result<()>;
    /// Flushes pending writes to durable storage.
    fn flush(&self) -> Result<()>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        (**self).remove(key)
    }

    fn has(&self, key: &[u8]) -> Result<bool> {
        (**self).has(key)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        (**self).scan_prefix(prefix)
    }

    fn set_batch(&self, entries: Vec<(Vec<u8>, Vec<u8>)>) -> Result<()> {
        (**self).set_batch(entries)
    }

    fn flush(&self) -> Result<()> {
        (**self).flush()
    }
}

/// Opens the backend for a logical store.
///
/// An empty `path` (or `temporary`) selects a non-durable backend. When the
/// on-disk store cannot be opened the error is logged and an in-memory
/// store is returned instead, so the daemon can still start.
pub fn open_or_in_memory<P: AsRef<Path>>(
    path: P,
    temporary: bool,
) -> Arc<dyn KeyValueStore> {
    let path = path.as_ref();
    #[cfg(feature = "sled")]
    {
        let opened = if temporary {
            SledStore::temporary()
        } else if path.as_os_str().is_empty() {
            return Arc::new(InMemoryStore::default());
        } else {
            SledStore::open(path)
        };
        match opened {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to open the on-disk store, falling back to memory",
                );
                Arc::new(InMemoryStore::default())
            }
        }
    }
    #[cfg(not(feature = "sled"))]
    {
        let _ = (path, temporary);
        Arc::new(InMemoryStore::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_path_is_in_memory() {
        let store = open_or_in_memory("", false);
        store.set(b"k", b"v").unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[cfg(feature = "sled")]
    #[test]
    fn unusable_path_falls_back_to_memory() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        // a regular file cannot host a sled directory
        let store = open_or_in_memory(tmp.path().join("db"), false);
        store.set(b"k", b"v").unwrap();
        assert!(store.has(b"k").unwrap());
    }
}
