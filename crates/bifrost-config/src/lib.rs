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

//! # Bifrost Configuration Module 🕸️
//!
//! A module for configuring the bridge daemon.
//!
//! ## Overview
//!
//! The configuration is read from every `*.toml` and `*.json` file of the
//! config directory, then overridden by `BIFROST_*` environment variables.
//! Sections:
//! * `thorchain`: how to reach the home chain.
//! * `signer`: the signer store, its home-chain scanner and retry policy.
//! * `observer`: the observer store and its signed-tx cache.
//! * `tss`: the TSS engine.
//! * `metrics`: the metrics endpoint.
//! * `back-off`: the default retry policy shared by the chain clients.
//! * `chains`: one entry per external chain.

/// CLI configuration
#[cfg(feature = "cli")]
pub mod cli;
/// Default values of the configuration.
pub mod defaults;
/// Utils for processing configuration
pub mod utils;

use std::collections::HashMap;
use std::time::Duration;

use bifrost_types::Chain;
use serde::{Deserialize, Serialize};

/// BifrostConfig is the configuration of the bridge daemon.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct BifrostConfig {
    /// The home chain.
    #[serde(default)]
    pub thorchain: ThorchainConfig,
    /// The signer.
    #[serde(default)]
    pub signer: SignerConfig,
    /// The observer.
    #[serde(default)]
    pub observer: ObserverConfig,
    /// The TSS engine.
    #[serde(default)]
    pub tss: TssConfig,
    /// The metrics endpoint.
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Default retry policy, used by chains that do not set their own.
    #[serde(default)]
    pub back_off: BackOffConfig,
    /// External chains.
    ///
    /// a map between the chain tag and its configuration.
    #[serde(default)]
    pub chains: HashMap<String, ChainConfig>,
}

impl BifrostConfig {
    /// The configuration of `chain`, if it is configured and enabled.
    pub fn chain(&self, chain: Chain) -> Option<&ChainConfig> {
        self.chains.get(chain.as_str())
    }

    /// Chains that take part in new vaults, the home chain included.
    pub fn keygen_chains(&self) -> Vec<Chain> {
        let mut chains = vec![Chain::THOR];
        chains.extend(
            self.chains
                .values()
                .filter(|c| !c.opt_to_retire)
                .map(|c| c.chain_id),
        );
        chains.sort();
        chains.dedup();
        chains
    }
}

/// How to reach the home chain.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ThorchainConfig {
    /// The home chain id.
    #[serde(default = "defaults::thorchain_chain_id")]
    pub chain_id: String,
    /// REST endpoint.
    #[serde(default = "defaults::thorchain_host")]
    pub chain_host: String,
    /// Tendermint RPC endpoint.
    #[serde(default)]
    pub chain_rpc: String,
    /// Name of the key signing home-chain messages.
    #[serde(default)]
    pub signer_name: String,
    /// Bech32 address of this node on the home chain.
    #[serde(default)]
    pub signer_address: String,
    /// Endpoint that signs and broadcasts home-chain messages.
    ///
    /// defaults to `<chain-host>/txs`
    #[serde(default)]
    pub signer_broadcast_endpoint: String,
}

impl Default for ThorchainConfig {
    fn default() -> Self {
        Self {
            chain_id: defaults::thorchain_chain_id(),
            chain_host: defaults::thorchain_host(),
            chain_rpc: String::new(),
            signer_name: String::new(),
            signer_address: String::new(),
            signer_broadcast_endpoint: String::new(),
        }
    }
}

/// Configuration of the signer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SignerConfig {
    /// Directory of the signer store, empty for an in-memory store.
    #[serde(default)]
    pub signer_db_path: String,
    /// The home-chain block scanner.
    #[serde(default)]
    pub block_scanner: BlockScannerConfig,
    /// Milliseconds between two passes over the stored items.
    ///
    /// default to 1_000
    #[serde(default = "defaults::signer_retry_interval")]
    pub retry_interval: u64,
    /// Home blocks an outbound may wait past its signing period.
    #[serde(default = "defaults::reschedule_buffer_blocks")]
    pub reschedule_buffer_blocks: i64,
    /// Hand signed outbounds to the observer right away.
    #[serde(default = "defaults::auto_observe")]
    pub auto_observe: bool,
    /// Milliseconds a keygen may take.
    #[serde(default = "defaults::keygen_timeout")]
    pub keygen_timeout: u64,
    /// Milliseconds a keysign may take before the process gives up.
    #[serde(default = "defaults::keysign_timeout")]
    pub keysign_timeout: u64,
    /// Write an encrypted backup of every new keyshare.
    #[serde(default)]
    pub backup_keyshares: bool,
    /// Directory of the keyshare backups.
    #[serde(default)]
    pub keyshare_backup_dir: String,
}

impl SignerConfig {
    /// [`SignerConfig::retry_interval`] as a duration.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval)
    }

    /// [`SignerConfig::keysign_timeout`] as a duration.
    pub fn keysign_timeout(&self) -> Duration {
        Duration::from_millis(self.keysign_timeout)
    }

    /// [`SignerConfig::keygen_timeout`] as a duration.
    pub fn keygen_timeout(&self) -> Duration {
        Duration::from_millis(self.keygen_timeout)
    }
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            signer_db_path: String::new(),
            block_scanner: BlockScannerConfig {
                chain_id: Chain::THOR,
                ..Default::default()
            },
            retry_interval: defaults::signer_retry_interval(),
            reschedule_buffer_blocks: defaults::reschedule_buffer_blocks(),
            auto_observe: defaults::auto_observe(),
            keygen_timeout: defaults::keygen_timeout(),
            keysign_timeout: defaults::keysign_timeout(),
            backup_keyshares: false,
            keyshare_backup_dir: String::new(),
        }
    }
}

/// Configuration of the observer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ObserverConfig {
    /// Directory of the observer store, empty for an in-memory store.
    #[serde(default)]
    pub observer_db_path: String,
    /// Capacity of the signed-tx cache.
    ///
    /// default to 10_000
    #[serde(default = "defaults::mempool_tx_id_cache_size")]
    pub mempool_tx_id_cache_size: usize,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            observer_db_path: String::new(),
            mempool_tx_id_cache_size: defaults::mempool_tx_id_cache_size(),
        }
    }
}

/// Configuration of the TSS engine client.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TssConfig {
    /// Engine endpoint.
    #[serde(default = "defaults::tss_host")]
    pub host: String,
    /// Milliseconds an engine request may take.
    #[serde(default = "defaults::keysign_timeout")]
    pub timeout: u64,
}

impl Default for TssConfig {
    fn default() -> Self {
        Self {
            host: defaults::tss_host(),
            timeout: defaults::keysign_timeout(),
        }
    }
}

/// Configuration of the metrics endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct MetricsConfig {
    /// Serve `/metrics` and `/health`.
    #[serde(default = "defaults::metrics_enabled")]
    pub enabled: bool,
    /// Port of the endpoint.
    ///
    /// default to 9000
    #[serde(default = "defaults::metrics_listen_port")]
    pub listen_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::metrics_enabled(),
            listen_port: defaults::metrics_listen_port(),
        }
    }
}

/// An exponential retry policy, durations in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BackOffConfig {
    /// First retry delay.
    #[serde(default = "defaults::back_off_initial_interval")]
    pub initial_interval: u64,
    /// Jitter applied to every delay.
    #[serde(default = "defaults::back_off_randomization_factor")]
    pub randomization_factor: f64,
    /// Growth of the delay between two retries.
    #[serde(default = "defaults::back_off_multiplier")]
    pub multiplier: f64,
    /// Upper bound of one delay.
    #[serde(default = "defaults::back_off_max_interval")]
    pub max_interval: u64,
    /// Total retry budget.
    #[serde(default = "defaults::back_off_max_elapsed_time")]
    pub max_elapsed_time: u64,
}

impl Default for BackOffConfig {
    fn default() -> Self {
        Self {
            initial_interval: defaults::back_off_initial_interval(),
            randomization_factor: defaults::back_off_randomization_factor(),
            multiplier: defaults::back_off_multiplier(),
            max_interval: defaults::back_off_max_interval(),
            max_elapsed_time: defaults::back_off_max_elapsed_time(),
        }
    }
}

impl BackOffConfig {
    /// Builds the policy.
    pub fn to_backoff(&self) -> backoff::ExponentialBackoff {
        backoff::ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.initial_interval))
            .with_randomization_factor(self.randomization_factor)
            .with_multiplier(self.multiplier)
            .with_max_interval(Duration::from_millis(self.max_interval))
            .with_max_elapsed_time(Some(Duration::from_millis(
                self.max_elapsed_time,
            )))
            .build()
    }

    /// [`BackOffConfig::max_interval`] as a duration.
    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval)
    }
}

/// Configuration of one external chain.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChainConfig {
    /// The chain.
    pub chain_id: Chain,
    /// Endpoint of the chain's adapter.
    #[serde(default)]
    pub rpc_host: String,
    /// Ignore this chain.
    #[serde(default)]
    pub disabled: bool,
    /// Leave this chain out of new vaults.
    #[serde(default)]
    pub opt_to_retire: bool,
    /// Blocks between two solvency reports.
    ///
    /// default to 100
    #[serde(default = "defaults::solvency_blocks")]
    pub solvency_blocks: i64,
    /// The chain's block scanner.
    #[serde(default)]
    pub block_scanner: BlockScannerConfig,
    /// Retry policy, the global `back-off` when not set.
    #[serde(default)]
    pub back_off: Option<BackOffConfig>,
}

impl ChainConfig {
    /// A chain entry with every other field at its default.
    pub fn new(chain: Chain, rpc_host: impl Into<String>) -> Self {
        Self {
            chain_id: chain,
            rpc_host: rpc_host.into(),
            disabled: false,
            opt_to_retire: false,
            solvency_blocks: defaults::solvency_blocks(),
            block_scanner: BlockScannerConfig {
                chain_id: chain,
                ..Default::default()
            },
            back_off: None,
        }
    }

    /// The configured retry policy, or the default one.
    pub fn back_off(&self) -> BackOffConfig {
        self.back_off.unwrap_or_default()
    }
}

/// Configuration of a block scanner, durations in milliseconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BlockScannerConfig {
    /// The scanned chain, filled from the enclosing chain entry.
    #[serde(default)]
    pub chain_id: Chain,
    /// First block to scan, `0` to resume.
    #[serde(default)]
    pub start_block_height: i64,
    /// Directory of the scanner store, empty for an in-memory store.
    #[serde(default)]
    pub db_path: String,
    /// Timeout of one request to the adapter.
    #[serde(default = "defaults::http_request_timeout")]
    pub http_request_timeout: u64,
    /// Retries of a failed request to the adapter.
    #[serde(default = "defaults::max_http_request_retry")]
    pub max_http_request_retry: u32,
    /// Sleep between two polls of the chain tip.
    #[serde(default = "defaults::block_height_discover_back_off")]
    pub block_height_discover_back_off: u64,
    /// Sleep after a failed block fetch.
    #[serde(default = "defaults::block_retry_interval")]
    pub block_retry_interval: u64,
    /// How far behind the tip network fee and solvency reports may be.
    #[serde(default)]
    pub observation_flexibility_blocks: i64,
}

impl Default for BlockScannerConfig {
    fn default() -> Self {
        Self {
            chain_id: Chain::default(),
            start_block_height: 0,
            db_path: String::new(),
            http_request_timeout: defaults::http_request_timeout(),
            max_http_request_retry: defaults::max_http_request_retry(),
            block_height_discover_back_off:
                defaults::block_height_discover_back_off(),
            block_retry_interval: defaults::block_retry_interval(),
            observation_flexibility_blocks: 0,
        }
    }
}

impl BlockScannerConfig {
    /// [`BlockScannerConfig::http_request_timeout`] as a duration.
    pub fn http_request_timeout(&self) -> Duration {
        Duration::from_millis(self.http_request_timeout)
    }

    /// [`BlockScannerConfig::block_height_discover_back_off`] as a duration.
    pub fn block_height_discover_back_off(&self) -> Duration {
        Duration::from_millis(self.block_height_discover_back_off)
    }

    /// [`BlockScannerConfig::block_retry_interval`] as a duration.
    pub fn block_retry_interval(&self) -> Duration {
        Duration::from_millis(self.block_retry_interval)
    }
}
