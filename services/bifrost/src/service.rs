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

//! # Bifrost Service Module 🕸️
//!
//! Services are the tasks the daemon runs throughout its lifetime. They
//! are started in dependency order by [`ignite`] and stopped in reverse by
//! [`Services::stop`].

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use bifrost_chain_clients::{load_chains, solvency::solvency_check_runner};
use bifrost_client_traits::{Bridge, ChainClients, KeyManager};
use bifrost_config::cli::{create_store, Opts};
use bifrost_context::BifrostContext;
use bifrost_observer::Observer;
use bifrost_pubkey_manager::PubKeyManager;
use bifrost_signer::Signer;
use bifrost_store::{ObserverStorage, SignerStorage};
use bifrost_thorclient::HttpBridge;
use bifrost_tss::HttpKeyManager;
use serde::Serialize;
use tokio::task::JoinHandle;

/// Environment variable holding the passphrase of the signer store.
pub const SIGNER_PASSPHRASE_ENV: &str = "SIGNER_PASSPHRASE";

/// Home blocks to wait for the node account to get its pubkey.
const NODE_ACCOUNT_ATTEMPTS: usize = 300;

/// The running daemon.
pub struct Services {
    signer: Arc<Signer>,
    observer: Arc<Observer>,
    chains: ChainClients,
    handles: Vec<JoinHandle<()>>,
}

impl Services {
    /// Stops the signer, then the observer, then every chain client.
    pub async fn stop(self) {
        self.signer.stop().await;
        self.observer.stop().await;
        for client in self.chains.iter() {
            client.stop().await;
        }
        for handle in self.handles {
            handle.abort();
        }
    }
}

/// Starts every service of the daemon.
///
/// This does not block, the services run on background tasks until
/// [`BifrostContext::shutdown`] is called.
pub async fn ignite(ctx: &BifrostContext, opts: &Opts) -> anyhow::Result<Services> {
    let config = &ctx.config;
    let bridge: Arc<dyn Bridge> =
        Arc::new(HttpBridge::new(&config.thorchain, ctx.metrics.clone())?);
    tracing::info!("waiting for THORChain to catch up");
    bridge.wait_to_catch_up().await?;

    let key_manager: Arc<dyn KeyManager> =
        Arc::new(HttpKeyManager::new(&config.tss, bridge.clone())?);

    let pubkey_manager =
        Arc::new(PubKeyManager::new(bridge.clone(), ctx.metrics.clone()));
    pubkey_manager.start().await?;
    let mut handles = Vec::new();
    {
        let pubkey_manager = pubkey_manager.clone();
        let shutdown = ctx.shutdown_signal();
        handles.push(tokio::spawn(async move {
            pubkey_manager.run(shutdown).await
        }));
    }

    let chains = load_chains(ctx, bridge.clone(), key_manager.clone(), |_, path| {
        create_store(opts, path)
    });
    if chains.is_empty() {
        tracing::warn!("no external chain is configured");
    }

    let observer_store =
        create_store(opts, Path::new(&config.observer.observer_db_path));
    let observer = Arc::new(Observer::new(
        ctx.clone(),
        bridge.clone(),
        pubkey_manager.clone(),
        chains.clone(),
        ObserverStorage::new(observer_store),
    ));

    let passphrase = std::env::var(SIGNER_PASSPHRASE_ENV).unwrap_or_default();
    if passphrase.is_empty() {
        tracing::warn!("{SIGNER_PASSPHRASE_ENV} is not set, the signer store is not encrypted");
    }
    let signer_store =
        create_store(opts, Path::new(&config.signer.signer_db_path));
    let signer = Arc::new(Signer::new(
        ctx.clone(),
        bridge.clone(),
        key_manager,
        pubkey_manager,
        chains.clone(),
        SignerStorage::new(signer_store, &passphrase),
        observer.clone(),
    ));
    signer.register_node_account(NODE_ACCOUNT_ATTEMPTS).await?;

    observer.start().await?;
    signer.start().await?;

    for client in chains.iter() {
        let interval = client
            .get_config()
            .block_scanner
            .block_height_discover_back_off();
        handles.push(tokio::spawn(solvency_check_runner(
            client.clone(),
            bridge.clone(),
            interval,
            ctx.shutdown_signal(),
        )));
    }

    log_startup_summary(ctx, &chains, !passphrase.is_empty());

    if config.metrics.enabled {
        let ctx = ctx.clone();
        let chains = chains.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = build_axum_services(ctx, chains).await {
                tracing::error!(error = %e, "metrics server stopped");
            }
        }));
    }

    Ok(Services {
        signer,
        observer,
        chains,
        handles,
    })
}

fn log_startup_summary(
    ctx: &BifrostContext,
    chains: &ChainClients,
    signer_store_encrypted: bool,
) {
    let chains = chains
        .iter()
        .map(|client| client.get_chain().to_string())
        .collect::<Vec<_>>()
        .join(",");
    tracing::info!(
        %chains,
        signer_store_encrypted,
        metrics = ctx.config.metrics.enabled,
        "bifrost started"
    );
}

#[derive(Clone)]
struct ServiceState {
    ctx: BifrostContext,
    chains: ChainClients,
}

/// Serves `/metrics` and `/health` on the configured metrics port.
pub async fn build_axum_services(
    ctx: BifrostContext,
    chains: ChainClients,
) -> anyhow::Result<()> {
    let port = ctx.config.metrics.listen_port;
    let app = router(ServiceState { ctx, chains });
    let socket_addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Starting the metrics server on {}", socket_addr);
    axum::Server::bind(&socket_addr)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}

fn router(state: ServiceState) -> Router {
    Router::new()
        .route("/metrics", get(handle_metrics))
        .route("/health", get(handle_health))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_metrics(State(state): State<ServiceState>) -> impl IntoResponse {
    match state.ctx.metrics.gather() {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "fail to gather metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Block scanner health of every chain.
#[derive(Debug, Serialize)]
struct HealthResponse {
    healthy: bool,
    chains: BTreeMap<String, bool>,
}

async fn handle_health(State(state): State<ServiceState>) -> impl IntoResponse {
    let chains = state
        .chains
        .iter()
        .map(|client| {
            (
                client.get_chain().to_string(),
                client.is_block_scanner_healthy(),
            )
        })
        .collect::<BTreeMap<_, _>>();
    let healthy = chains.values().all(|ok| *ok);
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(HealthResponse { healthy, chains }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bifrost_client_traits::mocks::MockChainClient;
    use bifrost_client_traits::ChainClient;
    use bifrost_config::BifrostConfig;
    use bifrost_types::Chain;

    fn state(clients: &[Arc<MockChainClient>]) -> ServiceState {
        ServiceState {
            ctx: BifrostContext::new(BifrostConfig::default()).unwrap(),
            chains: clients
                .iter()
                .map(|c| c.clone() as Arc<dyn ChainClient>)
                .collect(),
        }
    }

    async fn body(res: axum::response::Response) -> serde_json::Value {
        let bytes = hyper::body::to_bytes(res.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    #[tracing_test::traced_test]
    fn startup_summary_flags_an_unencrypted_signer_store() {
        let btc = Arc::new(MockChainClient::new(Chain::BTC));
        let state = state(&[btc]);
        log_startup_summary(&state.ctx, &state.chains, false);
        assert!(logs_contain("bifrost started"));
        assert!(logs_contain("chains=BTC"));
        assert!(logs_contain("signer_store_encrypted=false"));
    }

    #[tokio::test]
    async fn health_reports_every_scanner() {
        let btc = Arc::new(MockChainClient::new(Chain::BTC));
        let eth = Arc::new(MockChainClient::new(Chain::ETH));
        let state = state(&[btc.clone(), eth.clone()]);

        let res = handle_health(State(state.clone())).await.into_response();
        assert_eq!(res.status(), StatusCode::OK);

        eth.state().healthy = false;
        let res = handle_health(State(state)).await.into_response();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body(res).await;
        assert_eq!(json["healthy"], false);
        assert_eq!(json["chains"]["BTC"], true);
        assert_eq!(json["chains"]["ETH"], false);
    }

    #[tokio::test]
    async fn metrics_are_served_as_text() {
        let state = state(&[]);
        state.ctx.metrics.keygen_total.inc();
        let res = handle_metrics(State(state)).await.into_response();
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = hyper::body::to_bytes(res.into_body()).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("keygen"));
    }
}
