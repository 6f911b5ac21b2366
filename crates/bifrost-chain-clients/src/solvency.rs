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

//! While a chain is halted its scanner stops emitting, so vault balances
//! would go unreported exactly when the home chain needs them to decide
//! whether to resume. The runner here keeps reporting during such halts.

use std::sync::Arc;
use std::time::Duration;

use bifrost_client_traits::{Bridge, ChainClient};
use bifrost_context::Shutdown;
use bifrost_types::{mimir, Account, Vault};

/// Whether `account` holds at least what the home chain thinks `vault` has.
pub fn is_vault_solvent(account: &Account, vault: &Vault) -> bool {
    vault.coins.0.iter().all(|coin| {
        let held = account
            .coins
            .get(&coin.asset)
            .map(|c| c.amount)
            .unwrap_or_default();
        held >= coin.amount
    })
}

/// Reports the solvency of `client`'s vaults every `interval`, as long as
/// the chain is halted.
///
/// `Halt<C>Chain` of `1` is a manual halt, any larger value is the height an
/// automatic halt started at.
#[tracing::instrument(skip_all, fields(chain = %client.get_chain()))]
pub async fn solvency_check_runner(
    client: Arc<dyn ChainClient>,
    bridge: Arc<dyn Bridge>,
    interval: Duration,
    mut shutdown: Shutdown,
) {
    let chain = client.get_chain();
    tracing::info!("start solvency check runner");
    loop {
        if !shutdown.sleep(interval).await {
            tracing::info!("solvency check runner stopped");
            return;
        }
        let halt = match bridge.get_mimir(&mimir::halt_chain(chain)).await {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(error = %e, "fail to get chain halt height");
                continue;
            }
        };
        let solvency_halt =
            match bridge.get_mimir(&mimir::solvency_halt_chain(chain)).await {
                Ok(value) => value,
                Err(e) => {
                    tracing::error!(error = %e, "fail to get solvency halt height");
                    continue;
                }
            };
        if halt <= 1 && solvency_halt <= 0 {
            continue;
        }
        let height = match client.get_height().await {
            Ok(height) => height,
            Err(e) => {
                tracing::error!(error = %e, "fail to get chain height");
                continue;
            }
        };
        if !client.should_report_solvency(height).await {
            continue;
        }
        if let Err(e) = client.report_solvency(height).await {
            tracing::error!(height, error = %e, "fail to report solvency");
        }
    }
}
