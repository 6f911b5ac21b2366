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

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bifrost_types::Chain;
use bifrost_utils::Error;
use config::{Config, File};

use crate::BifrostConfig;

/// A helper function that will search for all config files in the given
/// directory and return them as a vec of the paths.
///
/// Supported file extensions are:
/// - `.toml`.
/// - `.json`.
pub fn search_config_files<P: AsRef<Path>>(
    base_dir: P,
) -> bifrost_utils::Result<Vec<PathBuf>> {
    // A pattern that covers all toml or json files in the config directory and subdirectories.
    let toml_pattern = format!("{}/**/*.toml", base_dir.as_ref().display());
    let json_pattern = format!("{}/**/*.json", base_dir.as_ref().display());
    tracing::trace!(
        "Loading config files from {} and {}",
        toml_pattern,
        json_pattern
    );
    let toml_files = glob::glob(&toml_pattern)?;
    let json_files = glob::glob(&json_pattern)?;
    toml_files
        .chain(json_files)
        .map(|v| v.map_err(Error::from))
        .collect()
}

/// Try to parse the [`BifrostConfig`] from the given config file(s).
pub fn parse_from_files(
    files: &[PathBuf],
) -> bifrost_utils::Result<BifrostConfig> {
    let mut builder = Config::builder();
    for config_file in files {
        tracing::trace!("Loading config file: {}", config_file.display());
        let ext = config_file
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        let format = match ext {
            "toml" => config::FileFormat::Toml,
            "json" => config::FileFormat::Json,
            _ => {
                tracing::warn!("Unknown file extension: {}", ext);
                continue;
            }
        };
        builder = builder
            .add_source(File::from(config_file.as_path()).format(format));
    }

    // also merge in the environment (with a prefix of BIFROST).
    let builder = builder
        .add_source(config::Environment::with_prefix("BIFROST").separator("_"));
    let cfg = builder.build()?;
    let config: Result<
        BifrostConfig,
        serde_path_to_error::Error<config::ConfigError>,
    > = serde_path_to_error::deserialize(cfg);
    match config {
        Ok(c) => postloading_process(c),
        Err(e) => {
            tracing::error!("{}", e);
            Err(e.into())
        }
    }
}

/// Load the configuration files from the given directory.
///
/// it is the same as using the [`search_config_files`] and [`parse_from_files`] functions combined.
pub fn load<P: AsRef<Path>>(path: P) -> bifrost_utils::Result<BifrostConfig> {
    parse_from_files(&search_config_files(path)?)
}

/// The postloading_process exists to validate configuration and standardize
/// the format of the configuration
pub fn postloading_process(
    mut config: BifrostConfig,
) -> bifrost_utils::Result<BifrostConfig> {
    tracing::trace!("Checking configration sanity ...");

    // 1. drain everything, and take enabled chains.
    let enabled = config
        .chains
        .drain()
        .filter(|(_, chain)| !chain.disabled)
        .collect::<HashMap<_, _>>();
    // 2. insert them again, keyed by their chain tag.
    for (_, mut chain) in enabled {
        if chain.chain_id == Chain::THOR {
            return Err(Error::Generic(
                "the home chain cannot be configured as an external chain",
            ));
        }
        if chain.rpc_host.is_empty() {
            tracing::error!(chain = %chain.chain_id, "rpc-host is required");
            return Err(Error::Generic("chain rpc-host is required"));
        }
        chain.block_scanner.chain_id = chain.chain_id;
        if chain.back_off.is_none() {
            chain.back_off = Some(config.back_off);
        }
        config.chains.insert(chain.chain_id.to_string(), chain);
    }

    config.signer.block_scanner.chain_id = Chain::THOR;
    if config.thorchain.signer_broadcast_endpoint.is_empty() {
        config.thorchain.signer_broadcast_endpoint = format!(
            "{}/txs",
            config.thorchain.chain_host.trim_end_matches('/')
        );
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(dir: &Path, name: &str, content: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn loads_toml_and_json_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "main.toml",
            r#"
            [thorchain]
            chain-host = "http://thornode:1317"
            signer-address = "thor1node"

            [signer]
            signer-db-path = "/tmp/signer"
            auto-observe = false

            [back-off]
            max-interval = 1000

            [chains.btc]
            chain-id = "BTC"
            rpc-host = "http://btc:8080"

            [chains.eth]
            chain-id = "ETH"
            rpc-host = "http://eth:8080"
            disabled = true
            "#,
        );
        write(
            dir.path(),
            "bnb.json",
            r#"{ "chains": { "bnb": {
                "chain-id": "bnb",
                "rpc-host": "http://bnb:8080",
                "opt-to-retire": true,
                "back-off": { "max-interval": 42 }
            } } }"#,
        );

        let files = search_config_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        let config = parse_from_files(&files).unwrap();

        assert_eq!(config.thorchain.chain_host, "http://thornode:1317");
        assert_eq!(
            config.thorchain.signer_broadcast_endpoint,
            "http://thornode:1317/txs"
        );
        assert!(!config.signer.auto_observe);
        assert_eq!(config.signer.retry_interval, 1_000);
        assert_eq!(config.signer.block_scanner.chain_id, Chain::THOR);
        assert_eq!(config.observer.mempool_tx_id_cache_size, 10_000);

        assert!(config.chain(Chain::ETH).is_none());
        let btc = config.chain(Chain::BTC).unwrap();
        assert_eq!(btc.block_scanner.chain_id, Chain::BTC);
        assert_eq!(btc.back_off.unwrap().max_interval, 1000);
        let bnb = config.chain(Chain::BNB).unwrap();
        assert_eq!(bnb.back_off.unwrap().max_interval, 42);

        assert_eq!(config.keygen_chains(), vec![Chain::BTC, Chain::THOR]);
    }

    #[test]
    fn missing_rpc_host_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "main.toml",
            r#"
            [chains.btc]
            chain-id = "BTC"
            "#,
        );
        assert!(load(dir.path()).is_err());
    }
}
