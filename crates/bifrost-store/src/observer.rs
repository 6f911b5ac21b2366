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

use bifrost_types::TxIn;
use bifrost_utils::Result;

use super::KeyValueStore;

const ON_DECK_KEY: &[u8] = b"ondeck-tx";

/// Durable copy of the observer's deck.
#[derive(Clone)]
pub struct ObserverStorage {
    db: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for ObserverStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverStorage").finish()
    }
}

impl ObserverStorage {
    /// Wraps a backend.
    pub fn new(db: Arc<dyn KeyValueStore>) -> Self {
        Self { db }
    }

    /// The persisted deck, empty if none was saved.
    #[tracing::instrument(skip(self))]
    pub fn get_on_deck_txs(&self) -> Result<Vec<TxIn>> {
        match self.db.get(ON_DECK_KEY)? {
            Some(buf) if !buf.is_empty() => Ok(serde_json::from_slice(&buf)?),
            _ => Ok(Vec::new()),
        }
    }

    /// Replaces the persisted deck.
    #[tracing::instrument(skip_all, fields(len = deck.len()))]
    pub fn set_on_deck_txs(&self, deck: &[TxIn]) -> Result<()> {
        let buf = serde_json::to_vec(deck)?;
        self.db.set(ON_DECK_KEY, &buf)
    }

    /// Flushes the backend.
    pub fn close(&self) -> Result<()> {
        self.db.flush()
    }
}
