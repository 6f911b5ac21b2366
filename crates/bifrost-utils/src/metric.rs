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


use bifrost_types::Chain;
use derive_more::Display;
use prometheus::{
    histogram_opts, opts, register_histogram_vec_with_registry,
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_vec_with_registry,
    Encoder, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec,
    Registry, TextEncoder,
};

/// The component an error metric is attributed to.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Module {
    /// Per-chain block scanner.
    #[display(fmt = "block_scanner")]
    BlockScanner,
    /// The signer's home-chain scanner.
    #[display(fmt = "thorchain_block_scanner")]
    ThorchainBlockScanner,
    /// The home-chain client.
    #[display(fmt = "thorchain_client")]
    ThorchainClient,
    /// The observer.
    #[display(fmt = "observer")]
    Observer,
    /// The signer.
    #[display(fmt = "signer")]
    Signer,
    /// The pubkey manager.
    #[display(fmt = "pubkey_manager")]
    PubKeyManager,
}

/// A struct definition for collecting metrics in the daemon.
///
/// Every instance owns its registry, so several daemons (or tests) can live
/// in one process.
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    /// Blocks scanned, per chain.
    pub total_block_scanned: IntCounterVec,
    /// Current scan position, per chain.
    pub current_position: IntGaugeVec,
    /// Blocks that failed and are waiting for a retry, per chain.
    pub total_retry_blocks: IntGaugeVec,
    /// Time spent discovering a new block, per chain.
    pub block_discovery_duration: HistogramVec,
    /// Observations sent to the home chain.
    pub observer_tx_to_thorchain: IntCounter,
    /// Observations signed for the home chain.
    pub observer_tx_to_thorchain_signed: IntCounter,
    /// Time spent building and signing an attestation.
    pub sign_to_thorchain_duration: Histogram,
    /// Time spent broadcasting an attestation.
    pub send_to_thorchain_duration: Histogram,
    /// Outbound items signed, per chain.
    pub signer_signed: IntCounterVec,
    /// Outbound items broadcast, per chain.
    pub signer_broadcast: IntCounterVec,
    /// Time spent signing and broadcasting an outbound, per chain.
    pub sign_and_broadcast_duration: HistogramVec,
    /// Keygen ceremonies run.
    pub keygen_total: IntCounter,
    /// Round-7 keysign failures, per chain.
    pub keysign_round7_retries: IntCounterVec,
    errors: IntCounterVec,
}

impl Metrics {
    /// Instantiates the various metrics and their counters, also creates a registry for the counters and
    /// registers the counters
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("bifrost".into()), None)?;

        let total_block_scanned = register_int_counter_vec_with_registry!(
            opts!("total_block_scanned", "Total number of blocks scanned"),
            &["chain"],
            registry
        )?;

        let current_position = register_int_gauge_vec_with_registry!(
            opts!("current_position", "The current scan position"),
            &["chain"],
            registry
        )?;

        let total_retry_blocks = register_int_gauge_vec_with_registry!(
            opts!(
                "total_retry_blocks",
                "Number of blocks waiting to be scanned again"
            ),
            &["chain"],
            registry
        )?;

        let block_discovery_duration = register_histogram_vec_with_registry!(
            histogram_opts!(
                "block_discovery_seconds",
                "How long it takes to discover a new block"
            ),
            &["chain"],
            registry
        )?;

        let observer_tx_to_thorchain = register_int_counter_with_registry!(
            opts!(
                "observer_tx_to_thorchain_total",
                "Number of observations sent to thorchain"
            ),
            registry
        )?;

        let observer_tx_to_thorchain_signed =
            register_int_counter_with_registry!(
                opts!(
                    "observer_tx_to_thorchain_signed_total",
                    "Number of observations signed for thorchain"
                ),
                registry
            )?;

        let sign_to_thorchain_duration = register_histogram_with_registry!(
            histogram_opts!(
                "sign_to_thorchain_duration_seconds",
                "Time to sign an attestation"
            ),
            registry
        )?;

        let send_to_thorchain_duration = register_histogram_with_registry!(
            histogram_opts!(
                "send_to_thorchain_duration_seconds",
                "Time to broadcast an attestation"
            ),
            registry
        )?;

        let signer_signed = register_int_counter_vec_with_registry!(
            opts!("signer_signed_total", "Outbound transactions signed"),
            &["chain"],
            registry
        )?;

        let signer_broadcast = register_int_counter_vec_with_registry!(
            opts!("signer_broadcast_total", "Outbound transactions broadcast"),
            &["chain"],
            registry
        )?;

        let sign_and_broadcast_duration =
            register_histogram_vec_with_registry!(
                histogram_opts!(
                    "sign_and_broadcast_duration_seconds",
                    "Time to sign and broadcast an outbound transaction"
                ),
                &["chain"],
                registry
            )?;

        let keygen_total = register_int_counter_with_registry!(
            opts!("keygen_total", "Keygen ceremonies"),
            registry
        )?;

        let keysign_round7_retries = register_int_counter_vec_with_registry!(
            opts!(
                "keysign_round7_retries_total",
                "Keysign failures at the last TSS round"
            ),
            &["chain"],
            registry
        )?;

        let errors = register_int_counter_vec_with_registry!(
            opts!("errors_total", "Errors by component and kind"),
            &["module", "chain", "kind"],
            registry
        )?;

        Ok(Self {
            registry,
            total_block_scanned,
            current_position,
            total_retry_blocks,
            block_discovery_duration,
            observer_tx_to_thorchain,
            observer_tx_to_thorchain_signed,
            sign_to_thorchain_duration,
            send_to_thorchain_duration,
            signer_signed,
            signer_broadcast,
            sign_and_broadcast_duration,
            keygen_total,
            keysign_round7_retries,
            errors,
        })
    }

    /// Counts one error of `kind` in `module`.
    pub fn error(&self, module: Module, chain: Option<Chain>, kind: &str) {
        let chain = chain.map(|c| c.as_str()).unwrap_or("");
        self.errors
            .with_label_values(&[&module.to_string(), chain, kind])
            .inc();
    }

    /// Current value of an error counter.
    pub fn error_count(
        &self,
        module: Module,
        chain: Option<Chain>,
        kind: &str,
    ) -> u64 {
        let chain = chain.map(|c| c.as_str()).unwrap_or("");
        self.errors
            .with_label_values(&[&module.to_string(), chain, kind])
            .get()
    }

    /// Gathers the whole daemon metrics
    pub fn gather(&self) -> Result<String, GatherMetricsError> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        // Gather the metrics.
        let metric_families = self.registry.gather();
        // Encode them to send.
        encoder.encode(&metric_families, &mut buffer)?;

        Ok(String::from_utf8(buffer)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatherMetricsError {
    #[error(transparent)]
    PrometheusError(#[from] prometheus::Error),
    #[error(transparent)]
    FromUtf8Error(#[from] std::string::FromUtf8Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instances_do_not_collide() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.keygen_total.inc();
        assert_eq!(a.keygen_total.get(), 1);
        assert_eq!(b.keygen_total.get(), 0);
    }

    #[test]
    fn gathers_labelled_errors() {
        let m = Metrics::new().unwrap();
        m.error(Module::BlockScanner, Some(Chain::BTC), "fail_to_fetch");
        assert_eq!(
            m.error_count(Module::BlockScanner, Some(Chain::BTC), "fail_to_fetch"),
            1
        );
        let text = m.gather().unwrap();
        assert!(text.contains("bifrost_errors_total"));
        assert!(text.contains("module=\"block_scanner\""));
    }
}
