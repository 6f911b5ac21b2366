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

//! Names of the home-chain policy keys read by the daemon.
//!
//! Mimir values are integers; `-1` means the key is unset.

use crate::chain::Chain;

/// Value returned for an unset mimir key.
pub const UNSET: i64 = -1;

/// Halts every external chain at the given home height.
pub const HALT_CHAIN_GLOBAL: &str = "HaltChainGlobal";
/// Operator pause of every chain until the given home height.
pub const NODE_PAUSE_CHAIN_GLOBAL: &str = "NodePauseChainGlobal";
/// Halts all outbound signing.
pub const HALT_SIGNING: &str = "HALTSIGNING";
/// Caps affiliate fees in basis points.
pub const MAX_AFFILIATE_FEE_BASIS_POINTS: &str = "MaxAffiliateFeeBasisPoints";

/// Constant: blocks an outbound stays assigned to a signer before it is
/// rescheduled.
pub const SIGNING_TRANSACTION_PERIOD: &str = "SigningTransactionPeriod";

/// `Halt<C>Chain`
pub fn halt_chain(chain: Chain) -> String {
    format!("Halt{chain}Chain")
}

/// `SolvencyHalt<C>Chain`
pub fn solvency_halt_chain(chain: Chain) -> String {
    format!("SolvencyHalt{chain}Chain")
}

/// `HALTSIGNING<C>`
pub fn halt_signing_chain(chain: Chain) -> String {
    format!("{HALT_SIGNING}{chain}")
}
