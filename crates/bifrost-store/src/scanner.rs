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
use serde::{Deserialize, Serialize};

use super::KeyValueStore;

const SCAN_POS_KEY: &[u8] = b"blockscanpos";
const BLOCK_STATUS_PREFIX: &str = "block-process-status-";

/// Processing state of a scanned block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockScanStatus {
    /// The block was fetched and forwarded.
    Processed,
    /// Fetching the block failed, it should be retried.
    NotProcessed,
}

/// Retry bookkeeping for one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStatusItem {
    /// Block height.
    pub height: i64,
    /// Last known status.
    pub status: BlockScanStatus,
}

/// Scan position and block retry records of one chain's scanner.
#[derive(Clone)]
pub struct ScannerStorage {
    db: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for ScannerStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScannerStorage").finish()
    }
}

fn block_status_key(height: i64) -> Vec<u8> {
    format!("{BLOCK_STATUS_PREFIX}{height}").into_bytes()
}

impl ScannerStorage {
    /// Wraps a backend.
    pub fn new(db: Arc<dyn KeyValueStore>) -> Self {
        Self { db }
    }

    /// The last block height that was fully processed, `0` if none.
    #[tracing::instrument(skip(self))]
    pub fn get_scan_pos(&self) -> Result<i64> {
        match self.db.get(SCAN_POS_KEY)? {
            Some(v) if v.len() == 8 => {
                let mut output = [0u8; 8];
                output.copy_from_slice(&v);
                Ok(i64::from_le_bytes(output))
            }
            _ => Ok(0),
        }
    }

    /// Persists the scan position.
    #[tracing::instrument(skip(self))]
    pub fn set_scan_pos(&self, height: i64) -> Result<()> {
        self.db.set(SCAN_POS_KEY, &height.to_le_bytes())
    }

    /// Records the processing status of a block.
    #[tracing::instrument(skip(self))]
    pub fn set_block_scan_status(
        &self,
        height: i64,
        status: BlockScanStatus,
    ) -> Result<()> {
        let item = BlockStatusItem { height, status };
        let buf = serde_json::to_vec(&item)?;
        self.db.set(&block_status_key(height), &buf)
    }

    /// Forgets the status record of a block.
    #[tracing::instrument(skip(self))]
    pub fn remove_block_status(&self, height: i64) -> Result<()> {
        self.db.remove(&block_status_key(height))
    }

    /// Blocks with a status record, ordered by height. With `failed_only`
    /// only the blocks that still need a retry are returned.
    pub fn get_blocks_for_retry(
        &self,
        failed_only: bool,
    ) -> Result<Vec<BlockStatusItem>> {
        let mut items = Vec::new();
        for (_, v) in self.db.scan_prefix(BLOCK_STATUS_PREFIX.as_bytes())? {
            let item: BlockStatusItem = match serde_json::from_slice(&v) {
                Ok(item) => item,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping corrupted block status");
                    continue;
                }
            };
            if failed_only && item.status == BlockScanStatus::Processed {
                continue;
            }
            items.push(item);
        }
        items.sort_by_key(|i| i.height);
        Ok(items)
    }

    /// Flushes the backend.
    pub fn close(&self) -> Result<()> {
        self.db.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStore;

    #[test]
    fn scan_pos_defaults_to_zero_and_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let db = crate::SledStore::open(tmp.path()).unwrap();
            let store = ScannerStorage::new(Arc::new(db));
            assert_eq!(store.get_scan_pos().unwrap(), 0);
            store.set_scan_pos(1024).unwrap();
            store.close().unwrap();
        }
        let db = crate::SledStore::open(tmp.path()).unwrap();
        let store = ScannerStorage::new(Arc::new(db));
        assert_eq!(store.get_scan_pos().unwrap(), 1024);
    }

    #[test]
    fn retry_blocks() {
        let store = ScannerStorage::new(Arc::new(InMemoryStore::default()));
        store
            .set_block_scan_status(12, BlockScanStatus::NotProcessed)
            .unwrap();
        store
            .set_block_scan_status(2, BlockScanStatus::NotProcessed)
            .unwrap();
        store
            .set_block_scan_status(7, BlockScanStatus::Processed)
            .unwrap();

        let all = store.get_blocks_for_retry(false).unwrap();
        let heights: Vec<_> = all.iter().map(|b| b.height).collect();
        assert_eq!(heights, vec![2, 7, 12]);

        let failed = store.get_blocks_for_retry(true).unwrap();
        assert_eq!(failed.len(), 2);

        store.remove_block_status(2).unwrap();
        let failed = store.get_blocks_for_retry(true).unwrap();
        assert_eq!(failed[0].height, 12);
    }
}
