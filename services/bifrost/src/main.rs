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

//! Bifrost Binary.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use bifrost::service;
use bifrost_config::cli::{load_config, setup_logger, Opts};
use bifrost_context::BifrostContext;
use bifrost_utils::probe;
use tokio::signal::unix;

/// The main entry point for the daemon.
///
/// # Arguments
///
/// * `args` - The command line arguments.
#[paw::main]
#[tokio::main]
async fn main(args: Opts) -> anyhow::Result<()> {
    setup_logger(args.verbose, "bifrost")?;
    match dotenv::dotenv() {
        Ok(_) => {
            tracing::trace!("Loaded .env file");
        }
        Err(e) => {
            tracing::warn!("Failed to load .env file: {}", e);
        }
    }

    // a stuck keysign leaves the vault's committee out of sync, only a
    // restart brings it back
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("{}", info);
        default_hook(info);
        std::process::exit(1);
    }));

    // The configuration is validated and configured from the given directory
    let config = load_config(args.config_dir.clone())?;

    // The BifrostContext takes a configuration, and populates objects that
    // are needed throughout the lifetime of the daemon.
    let ctx = BifrostContext::new(config)?;

    // start all background services.
    let services = service::ignite(&ctx, &args).await?;
    tracing::event!(
        target: probe::TARGET,
        tracing::Level::DEBUG,
        kind = %probe::Kind::Lifecycle,
        started = true
    );

    // watch for signals
    let mut user_signal = unix::signal(unix::SignalKind::user_defined1())?;
    let mut ctrlc_signal = unix::signal(unix::SignalKind::interrupt())?;
    let mut termination_signal = unix::signal(unix::SignalKind::terminate())?;
    let mut quit_signal = unix::signal(unix::SignalKind::quit())?;
    tokio::select! {
        _ = user_signal.recv() => {
            tracing::warn!("Got user signal ...");
        },
        _ = ctrlc_signal.recv() => {
            tracing::warn!("Interrupted (Ctrl+C) ...");
        },
        _ = termination_signal.recv() => {
            tracing::warn!("Got Terminate signal ...");
        },
        _ = quit_signal.recv() => {
            tracing::warn!("Quitting ...");
        },
    }

    tracing::event!(
        target: probe::TARGET,
        tracing::Level::DEBUG,
        kind = %probe::Kind::Lifecycle,
        shutdown = true
    );
    tracing::warn!("Shutting down...");
    // send shutdown signal to all of the application.
    ctx.shutdown();
    services.stop().await;
    tracing::info!("Clean Exit ..");
    Ok(())
}
