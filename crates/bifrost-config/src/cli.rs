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

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use bifrost_store::KeyValueStore;
use directories_next::ProjectDirs;
use structopt::StructOpt;

use crate::BifrostConfig;

/// Package identifier, where the default configuration & database are defined.
/// If the user does not start the daemon with the `--config-dir`
/// it will default to read from the default location depending on the OS.
pub const PACKAGE_ID: [&str; 3] = ["tools", "webb", "bifrost"];

/// The Bifrost Command-line tool
///
/// Start the bridge daemon from a config directory:
///
/// $ bifrost -vvv -c <CONFIG_DIR_PATH>
#[derive(StructOpt)]
#[structopt(name = "Bifrost")]
pub struct Opts {
    /// A level of verbosity, and can be used multiple times
    #[structopt(short, long, parse(from_occurrences))]
    pub verbose: i32,
    /// Directory that contains configration files.
    #[structopt(
        short = "c",
        long = "config-dir",
        value_name = "PATH",
        parse(from_os_str)
    )]
    pub config_dir: Option<PathBuf>,
    /// Keep every store in a temporary directory
    /// that is deleted when the process exits.
    #[structopt(long)]
    pub tmp: bool,
}

/// Loads the configuration from the given directory, or from the OS
/// specific config directory when none is given.
pub fn load_config<P>(
    config_dir: Option<P>,
) -> Result<BifrostConfig, anyhow::Error>
where
    P: AsRef<Path>,
{
    tracing::debug!("Getting default dirs for bifrost");
    let dirs = ProjectDirs::from(PACKAGE_ID[0], PACKAGE_ID[1], PACKAGE_ID[2])
        .context("failed to get config")?;
    let path = match config_dir {
        Some(p) => p.as_ref().to_path_buf(),
        None => dirs.config_dir().to_path_buf(),
    };
    // return an error if the path is not a directory.
    if !path.is_dir() {
        return Err(anyhow::anyhow!("{} is not a directory", path.display()));
    }
    tracing::trace!("Loading Config from {} ..", path.display());
    let v = crate::utils::load(path)?;
    tracing::trace!("Config loaded..");
    Ok(v)
}

/// Sets up the logger, based on the verbosity level passed in.
///
/// `filter` is the crate whose level the verbosity sets, other targets
/// follow `RUST_LOG`.
pub fn setup_logger(verbosity: i32, filter: &str) -> anyhow::Result<()> {
    use tracing::Level;
    let log_level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let directive = format!("{filter}={log_level}")
        .parse()
        .context("invalid log filter")?;
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(directive);
    let logger = tracing_subscriber::fmt()
        .with_target(true)
        .with_max_level(log_level)
        .with_env_filter(env_filter);
    // if we are not compiling for integration tests, we should use pretty logs
    #[cfg(not(feature = "integration-tests"))]
    let logger = logger.pretty();
    // otherwise, we should use json, which is easy to parse.
    #[cfg(feature = "integration-tests")]
    let logger = logger.json().flatten_event(true).with_current_span(false);

    logger.init();
    Ok(())
}

/// Opens the backend of a store configured with `path`.
///
/// With `--tmp` the store lives in a temporary directory. A relative path is
/// resolved against the OS specific data directory. On failure the store
/// falls back to memory.
pub fn create_store<P: AsRef<Path>>(
    opts: &Opts,
    path: P,
) -> Arc<dyn KeyValueStore> {
    if opts.tmp {
        tracing::debug!("Using temp dir for store");
        return bifrost_store::open_or_in_memory("", true);
    }
    let path = path.as_ref();
    if path.as_os_str().is_empty() || path.is_absolute() {
        return bifrost_store::open_or_in_memory(path, false);
    }
    let base = ProjectDirs::from(PACKAGE_ID[0], PACKAGE_ID[1], PACKAGE_ID[2])
        .map(|dirs| dirs.data_local_dir().to_path_buf())
        .unwrap_or_default();
    bifrost_store::open_or_in_memory(base.join(path), false)
}
