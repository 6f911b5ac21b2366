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

use std::fmt;
use std::str::FromStr;

use bifrost_utils::Error;

/// Kind of a memo, selected by its first `:` separated field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxType {
    /// Add liquidity to a pool.
    Add,
    /// Withdraw liquidity from a pool.
    Withdraw,
    /// Market swap.
    Swap,
    /// Swap that waits for its price limit.
    LimitOrder,
    /// Outbound paying an inbound.
    Outbound,
    /// Donate to a pool.
    Donate,
    /// Bond to a node.
    Bond,
    /// Unbond from a node.
    Unbond,
    /// Node leaving the network.
    Leave,
    /// Asgard funding a yggdrasil vault.
    YggdrasilFund,
    /// Yggdrasil returning its funds to asgard.
    YggdrasilReturn,
    /// Donation to the protocol reserve.
    Reserve,
    /// Refund of an invalid inbound.
    Refund,
    /// Funds moving between asgard vaults after a churn.
    Migrate,
    /// Chain shutdown payout.
    Ragnarok,
    /// Native asset upgrade.
    Switch,
    /// No operation.
    NoOp,
    /// UTXO consolidation.
    Consolidate,
    /// THORName registration.
    ThorName,
    /// Open a loan.
    LoanOpen,
    /// Repay a loan.
    LoanRepayment,
}

impl TxType {
    /// Every type, in declaration order.
    pub const ALL: [TxType; 21] = [
        TxType::Add,
        TxType::Withdraw,
        TxType::Swap,
        TxType::LimitOrder,
        TxType::Outbound,
        TxType::Donate,
        TxType::Bond,
        TxType::Unbond,
        TxType::Leave,
        TxType::YggdrasilFund,
        TxType::YggdrasilReturn,
        TxType::Reserve,
        TxType::Refund,
        TxType::Migrate,
        TxType::Ragnarok,
        TxType::Switch,
        TxType::NoOp,
        TxType::Consolidate,
        TxType::ThorName,
        TxType::LoanOpen,
        TxType::LoanRepayment,
    ];

    /// Long lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TxType::Add => "add",
            TxType::Withdraw => "withdraw",
            TxType::Swap => "swap",
            TxType::LimitOrder => "limito",
            TxType::Outbound => "out",
            TxType::Donate => "donate",
            TxType::Bond => "bond",
            TxType::Unbond => "unbond",
            TxType::Leave => "leave",
            TxType::YggdrasilFund => "yggdrasil+",
            TxType::YggdrasilReturn => "yggdrasil-",
            TxType::Reserve => "reserve",
            TxType::Refund => "refund",
            TxType::Migrate => "migrate",
            TxType::Ragnarok => "ragnarok",
            TxType::Switch => "switch",
            TxType::NoOp => "noop",
            TxType::Consolidate => "consolidate",
            TxType::ThorName => "thorname",
            TxType::LoanOpen => "$+",
            TxType::LoanRepayment => "$-",
        }
    }

    /// The prefix written by the canonical memo formatter.
    pub fn memo_prefix(&self) -> &'static str {
        match self {
            TxType::Add => "+",
            TxType::Withdraw => "-",
            TxType::Swap => "=",
            TxType::LimitOrder => "=<",
            TxType::Outbound => "OUT",
            TxType::Donate => "DONATE",
            TxType::Bond => "BOND",
            TxType::Unbond => "UNBOND",
            TxType::Leave => "LEAVE",
            TxType::YggdrasilFund => "YGGDRASIL+",
            TxType::YggdrasilReturn => "YGGDRASIL-",
            TxType::Reserve => "RESERVE",
            TxType::Refund => "REFUND",
            TxType::Migrate => "MIGRATE",
            TxType::Ragnarok => "RAGNAROK",
            TxType::Switch => "SWITCH",
            TxType::NoOp => "NOOP",
            TxType::Consolidate => "CONSOLIDATE",
            TxType::ThorName => "~",
            TxType::LoanOpen => "$+",
            TxType::LoanRepayment => "$-",
        }
    }

    /// Transactions users send to a vault.
    pub fn is_inbound(&self) -> bool {
        matches!(
            self,
            TxType::Add
                | TxType::Withdraw
                | TxType::Swap
                | TxType::LimitOrder
                | TxType::Donate
                | TxType::Bond
                | TxType::Unbond
                | TxType::Leave
                | TxType::Switch
                | TxType::Reserve
                | TxType::NoOp
                | TxType::ThorName
                | TxType::LoanOpen
                | TxType::LoanRepayment
        )
    }

    /// Transactions a vault pays out in response to an inbound.
    pub fn is_outbound(&self) -> bool {
        matches!(self, TxType::Outbound | TxType::Refund | TxType::Ragnarok)
    }

    /// Vault to vault bookkeeping.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            TxType::YggdrasilFund
                | TxType::YggdrasilReturn
                | TxType::Migrate
                | TxType::Consolidate
        )
    }

    /// Whether handling this type may schedule an outbound.
    pub fn has_outbound(&self) -> bool {
        !matches!(
            self,
            TxType::Add
                | TxType::Bond
                | TxType::Donate
                | TxType::YggdrasilReturn
                | TxType::Reserve
                | TxType::Migrate
                | TxType::Ragnarok
                | TxType::Switch
        )
    }
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ty = match s.trim().to_lowercase().as_str() {
            "add" | "a" | "+" => TxType::Add,
            "withdraw" | "wd" | "-" => TxType::Withdraw,
            "swap" | "s" | "=" => TxType::Swap,
            "limito" | "lo" | "=<" => TxType::LimitOrder,
            "out" => TxType::Outbound,
            "donate" | "d" => TxType::Donate,
            "bond" => TxType::Bond,
            "unbond" => TxType::Unbond,
            "leave" => TxType::Leave,
            "yggdrasil+" => TxType::YggdrasilFund,
            "yggdrasil-" => TxType::YggdrasilReturn,
            "reserve" => TxType::Reserve,
            "refund" => TxType::Refund,
            "migrate" => TxType::Migrate,
            "ragnarok" => TxType::Ragnarok,
            "switch" => TxType::Switch,
            "noop" => TxType::NoOp,
            "consolidate" => TxType::Consolidate,
            "thorname" | "name" | "n" | "~" => TxType::ThorName,
            "$+" | "loan+" => TxType::LoanOpen,
            "$-" | "loan-" => TxType::LoanRepayment,
            other => {
                return Err(Error::Memo(format!("invalid tx type: {other}")))
            }
        };
        Ok(ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_prefixes_parse_back() {
        for ty in TxType::ALL {
            assert_eq!(ty.as_str().parse::<TxType>().unwrap(), ty);
            assert_eq!(ty.memo_prefix().parse::<TxType>().unwrap(), ty);
        }
    }

    #[test]
    fn aliases_are_case_insensitive() {
        assert_eq!("SWAP".parse::<TxType>().unwrap(), TxType::Swap);
        assert_eq!("WD".parse::<TxType>().unwrap(), TxType::Withdraw);
        assert_eq!("Loan+".parse::<TxType>().unwrap(), TxType::LoanOpen);
        assert_eq!("LO".parse::<TxType>().unwrap(), TxType::LimitOrder);
        assert!("bogus".parse::<TxType>().is_err());
        assert!("".parse::<TxType>().is_err());
    }

    #[test]
    fn classification_is_a_partition() {
        for ty in TxType::ALL {
            let classes = [ty.is_inbound(), ty.is_outbound(), ty.is_internal()];
            assert_eq!(
                classes.iter().filter(|c| **c).count(),
                1,
                "{ty} must be in exactly one class"
            );
        }
        assert!(TxType::Swap.has_outbound());
        assert!(TxType::Outbound.has_outbound());
        assert!(!TxType::Add.has_outbound());
        assert!(!TxType::Ragnarok.has_outbound());
    }
}
