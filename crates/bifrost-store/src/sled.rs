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

use std::path::Path;
use std::sync::Arc;

use bifrost_utils::Result;

use super::KeyValueStore;

/// SledStore is a [`KeyValueStore`] backed by one tree of a
/// [Sled](https://sled.rs) database.
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
    tree: sled::Tree,
    // keeps the directory of a temporary store alive.
    tmp_dir: Option<Arc<tempfile::TempDir>>,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("tree", &String::from_utf8_lossy(&self.tree.name()))
            .finish()
    }
}

impl SledStore {
    /// Opens (or creates) the database at `path`, using its default tree.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::Config::new()
            .path(path)
            .mode(sled::Mode::HighThroughput)
            .open()?;
        let tree = (*db).clone();
        Ok(Self {
            db,
            tree,
            tmp_dir: None,
        })
    }

    /// Creates a temporary SledStore, removed on drop.
    pub fn temporary() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let mut store = Self::open(dir.path())?;
        store.tmp_dir = Some(Arc::new(dir));
        Ok(store)
    }

    /// Another logical store living in the same database.
    pub fn open_tree(&self, name: &str) -> Result<Self> {
        let tree = self.db.open_tree(name)?;
        Ok(Self {
            db: self.db.clone(),
            tree,
            tmp_dir: self.tmp_dir.clone(),
        })
    }

    /// Gets the total amount of data stored on disk
    pub fn get_data_stored_size(&self) -> u64 {
        self.db.size_on_disk().unwrap_or_default()
    }
}

impl KeyValueStore for SledStore {
    #[tracing::instrument(skip(self, key), fields(key = %String::from_utf8_lossy(key)))]
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.tree.get(key)?.map(|v| v.to_vec()))
    }

    #[tracing::instrument(skip(self, key, value), fields(key = %String::from_utf8_lossy(key)))]
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.tree.insert(key, value)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, key), fields(key = %String::from_utf8_lossy(key)))]
    fn remove(&self, key: &[u8]) -> Result<()> {
        self.tree.remove(key)?;
        Ok(())
    }

    fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.tree.contains_key(key)?)
    }

    #[tracing::instrument(skip(self, prefix), fields(prefix = %String::from_utf8_lossy(prefix)))]
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        for entry in self.tree.scan_prefix(prefix) {
            let (k, v) = entry?;
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }

    #[tracing::instrument(skip_all, fields(len = entries.len()))]
    fn set_batch(&self, entries: Vec<(Vec<u8>, Vec<u8>)>) -> Result<()> {
        let mut batch = sled::Batch::default();
        for (k, v) in entries {
            batch.insert(k, v);
        }
        self.tree.apply_batch(batch)?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.tree.flush()?;
        Ok(())
    }
}
