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
//! # Bifrost Context Module 🕸️
//!
//! The process wide context handed to every long running task: the loaded
//! configuration, the shutdown broadcast and the metrics registry.

use std::sync::Arc;
use std::time::Duration;

use bifrost_config::BifrostConfig;
use bifrost_types::Chain;
use bifrost_utils::metric::Metrics;
use tokio::sync::broadcast;

/// BifrostContext contains the daemon's configuration and shutdown signal.
#[derive(Clone)]
pub struct BifrostContext {
    /// The configuration of the daemon.
    pub config: BifrostConfig,
    /// Broadcasts a shutdown signal to all active tasks.
    ///
    /// When a task is spawned, it is passed a broadcast receiver handle.
    /// When a graceful shutdown is initiated, a `()` value is sent via the
    /// broadcast::Sender. Each task receives it, reaches a safe terminal
    /// state, and completes.
    notify_shutdown: broadcast::Sender<()>,
    /// Represents the metrics of the daemon.
    pub metrics: Arc<Metrics>,
}

impl BifrostContext {
    /// Creates a new BifrostContext.
    pub fn new(config: BifrostConfig) -> bifrost_utils::Result<Self> {
        let (notify_shutdown, _) = broadcast::channel(2);
        let metrics = Arc::new(Metrics::new()?);
        tracing::debug!(
            chains = config.chains.len(),
            metrics = config.metrics.enabled,
            "bifrost context created"
        );
        Ok(Self {
            config,
            notify_shutdown,
            metrics,
        })
    }

    /// Returns a broadcast receiver handle for the shutdown signal.
    pub fn shutdown_signal(&self) -> Shutdown {
        Shutdown::new(self.notify_shutdown.subscribe())
    }

    /// Sends a shutdown signal to all subscribed tasks.
    pub fn shutdown(&self) {
        let receivers = self.notify_shutdown.receiver_count();
        tracing::info!(%receivers, "shutting down bifrost context");
        let _ = self.notify_shutdown.send(());
    }

    /// Nominal block time of the home chain, the cadence of most loops.
    pub fn home_block_time(&self) -> Duration {
        Chain::THOR.approximate_block_time()
    }
}

/// Listens for the server shutdown signal.
///
/// Shutdown is signalled using a `broadcast::Receiver`. Only a single value is
/// ever sent. Once a value has been sent via the broadcast channel, the task
/// should stop.
///
/// The `Shutdown` struct listens for the signal and tracks that the signal has
/// been received. Callers may query for whether the shutdown signal has been
/// received or not.
#[derive(Debug)]
pub struct Shutdown {
    /// `true` if the shutdown signal has been received
    shutdown: bool,

    /// The receive half of the channel used to listen for shutdown.
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    /// Create a new `Shutdown` backed by the given `broadcast::Receiver`.
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            shutdown: false,
            notify,
        }
    }

    /// Returns `true` if the shutdown signal has been received.
    pub fn is_shutdown(&mut self) -> bool {
        if !self.shutdown {
            // a closed sender counts as a shutdown too
            self.shutdown = !matches!(
                self.notify.try_recv(),
                Err(broadcast::error::TryRecvError::Empty)
            );
        }
        self.shutdown
    }

    /// Receive the shutdown notice, waiting if necessary.
    pub async fn recv(&mut self) {
        // If the shutdown signal has already been received, then return
        // immediately.
        if self.shutdown {
            return;
        }

        // Cannot receive a "lag error" as only one value is ever sent.
        let _ = self.notify.recv().await;

        // Remember that the signal has been received.
        self.shutdown = true;
    }

    /// Sleeps for `duration`, returning `false` early when the shutdown
    /// signal arrives first.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.recv() => false,
            _ = tokio::time::sleep(duration) => !self.shutdown,
        }
    }
}
