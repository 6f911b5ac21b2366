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

use bifrost_types::{Address, Asset, Chain, TxId};

use crate::TxType;

fn opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

fn nonzero(value: u128) -> String {
    if value == 0 {
        String::new()
    } else {
        value.to_string()
    }
}

fn write_fields(f: &mut fmt::Formatter<'_>, fields: &[String]) -> fmt::Result {
    f.write_str(&fields.join(":"))
}

/// An affiliate taking a cut of a swap, deposit or loan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Affiliate {
    /// Home-chain address paid the fee.
    pub address: Address,
    /// Fee in basis points, already clamped.
    pub basis_points: u64,
}

/// A DEX aggregator leg executed after the swap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregator {
    /// Aggregator contract.
    pub address: String,
    /// Final token.
    pub target_address: String,
    /// Minimum amount of the final token, zero when unset.
    pub target_limit: u128,
}

/// `+:<asset>[:<addr>][:<affAddr>:<affBps>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddMemo {
    /// Pool.
    pub asset: Asset,
    /// Paired address on the other side of the pool.
    pub address: Option<Address>,
    /// Affiliate.
    pub affiliate: Option<Affiliate>,
}

impl fmt::Display for AddMemo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields = vec![
            TxType::Add.memo_prefix().to_string(),
            self.asset.to_string(),
            opt(&self.address),
        ];
        if let Some(aff) = &self.affiliate {
            fields.push(aff.address.to_string());
            fields.push(aff.basis_points.to_string());
        } else if self.address.is_none() {
            fields.truncate(2);
        }
        write_fields(f, &fields)
    }
}

/// `-:<asset>:<bps>[:<asset>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawMemo {
    /// Pool.
    pub asset: Asset,
    /// Share of the position withdrawn.
    pub basis_points: u64,
    /// Single sided withdrawal asset.
    pub withdrawal_asset: Option<Asset>,
}

impl fmt::Display for WithdrawMemo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields = vec![
            TxType::Withdraw.memo_prefix().to_string(),
            self.asset.to_string(),
            self.basis_points.to_string(),
        ];
        if let Some(asset) = &self.withdrawal_asset {
            fields.push(asset.to_string());
        }
        write_fields(f, &fields)
    }
}

/// Market swaps and limit orders share one shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapMemo {
    /// [`TxType::Swap`] or [`TxType::LimitOrder`].
    pub tx_type: TxType,
    /// Target asset.
    pub asset: Asset,
    /// Receiver, the sender when unset.
    pub destination: Option<Address>,
    /// Minimum output, zero when unset.
    pub limit: u128,
    /// Affiliate.
    pub affiliate: Option<Affiliate>,
    /// Aggregator leg.
    pub aggregator: Option<Aggregator>,
}

impl fmt::Display for SwapMemo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (aff_address, aff_bps) = match &self.affiliate {
            Some(aff) => (aff.address.to_string(), aff.basis_points.to_string()),
            None => Default::default(),
        };
        let agg = self.aggregator.clone().unwrap_or_default();
        let mut fields = vec![
            self.tx_type.memo_prefix().to_string(),
            self.asset.to_string(),
            opt(&self.destination),
            nonzero(self.limit),
            aff_address,
            aff_bps,
            agg.address,
            agg.target_address,
            nonzero(agg.target_limit),
        ];
        let mut last = 3;
        if self.limit != 0 {
            last = 4;
        }
        if self.affiliate.is_some() {
            last = 6;
        }
        if self.aggregator.is_some() {
            last = 8;
        }
        if agg.target_limit != 0 {
            last = 9;
        }
        fields.truncate(last);
        write_fields(f, &fields)
    }
}

/// `BOND:<node>[:<provider>[:<fee>]]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BondMemo {
    /// Node account.
    pub node_address: Address,
    /// Bond provider whitelisted by the operator.
    pub provider: Option<Address>,
    /// Operator fee in basis points, `-1` when unset.
    pub operator_fee: i64,
}

impl fmt::Display for BondMemo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields = vec![
            TxType::Bond.memo_prefix().to_string(),
            self.node_address.to_string(),
        ];
        if self.provider.is_some() || self.operator_fee != -1 {
            fields.push(opt(&self.provider));
        }
        if self.operator_fee != -1 {
            fields.push(self.operator_fee.to_string());
        }
        write_fields(f, &fields)
    }
}

/// `UNBOND:<node>:<amount>[:<provider>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnbondMemo {
    /// Node account.
    pub node_address: Address,
    /// Amount of bond released.
    pub amount: u128,
    /// Bond provider.
    pub provider: Option<Address>,
}

impl fmt::Display for UnbondMemo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields = vec![
            TxType::Unbond.memo_prefix().to_string(),
            self.node_address.to_string(),
            self.amount.to_string(),
        ];
        if let Some(provider) = &self.provider {
            fields.push(provider.to_string());
        }
        write_fields(f, &fields)
    }
}

/// `$+:<asset>:<dest>[:<minOut>[:<affAddr>:<affBps>[:<agg>:<target>:<limit>]]]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanOpenMemo {
    /// Debt is paid out in this asset.
    pub target_asset: Asset,
    /// Receiver of the debt.
    pub target_address: Address,
    /// Minimum output, zero when unset.
    pub min_out: u128,
    /// Affiliate.
    pub affiliate: Option<Affiliate>,
    /// Aggregator leg.
    pub aggregator: Option<Aggregator>,
}

impl fmt::Display for LoanOpenMemo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (aff_address, aff_bps) = match &self.affiliate {
            Some(aff) => (aff.address.to_string(), aff.basis_points.to_string()),
            None => Default::default(),
        };
        let agg = self.aggregator.clone().unwrap_or_default();
        let mut fields = vec![
            TxType::LoanOpen.memo_prefix().to_string(),
            self.target_asset.to_string(),
            self.target_address.to_string(),
            nonzero(self.min_out),
            aff_address,
            aff_bps,
            agg.address,
            agg.target_address,
            nonzero(agg.target_limit),
        ];
        // trailing empty fields are dropped
        let last = fields
            .iter()
            .rposition(|field| !field.is_empty())
            .map_or(3, |idx| (idx + 1).max(3));
        fields.truncate(last);
        write_fields(f, &fields)
    }
}

/// `$-:<asset>:<owner>[:<minOut>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanRepaymentMemo {
    /// Collateral asset of the loan.
    pub asset: Asset,
    /// Loan owner.
    pub owner: Address,
    /// Minimum output, zero when unset.
    pub min_out: u128,
}

impl fmt::Display for LoanRepaymentMemo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields = vec![
            TxType::LoanRepayment.memo_prefix().to_string(),
            self.asset.to_string(),
            self.owner.to_string(),
        ];
        if self.min_out != 0 {
            fields.push(self.min_out.to_string());
        }
        write_fields(f, &fields)
    }
}

/// `~:<name>:<chain>:<addr>[:<owner>[:<asset>[:<expire>]]]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThorNameMemo {
    /// Registered name.
    pub name: String,
    /// Chain of the alias.
    pub chain: Chain,
    /// Alias address.
    pub address: Address,
    /// New owner.
    pub owner: Option<Address>,
    /// Preferred asset.
    pub preferred_asset: Option<Asset>,
    /// Expiry height, zero when unset.
    pub expire_block_height: i64,
}

impl fmt::Display for ThorNameMemo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields = vec![
            TxType::ThorName.memo_prefix().to_string(),
            self.name.clone(),
            self.chain.to_string(),
            self.address.to_string(),
            opt(&self.owner),
            opt(&self.preferred_asset),
        ];
        if self.expire_block_height != 0 {
            fields.push(self.expire_block_height.to_string());
        } else if self.preferred_asset.is_none() {
            fields.pop();
            if self.owner.is_none() {
                fields.pop();
            }
        }
        write_fields(f, &fields)
    }
}

/// A parsed memo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Memo {
    /// Add liquidity.
    Add(AddMemo),
    /// Withdraw liquidity.
    Withdraw(WithdrawMemo),
    /// Swap or limit order.
    Swap(SwapMemo),
    /// Donate to the pool of the asset.
    Donate(Asset),
    /// Bond.
    Bond(BondMemo),
    /// Unbond.
    Unbond(UnbondMemo),
    /// Node leaving.
    Leave(Address),
    /// Open a loan.
    LoanOpen(LoanOpenMemo),
    /// Repay a loan.
    LoanRepayment(LoanRepaymentMemo),
    /// Upgrade to native RUNE sent to the address.
    Switch(Address),
    /// Register or update a THORName.
    ThorName(ThorNameMemo),
    /// Reserve donation.
    Reserve,
    /// No operation, with an optional action.
    NoOp(Option<String>),
    /// Outbound of an inbound.
    Outbound(TxId),
    /// Refund of an inbound.
    Refund(TxId),
    /// Ragnarok at a home height.
    Ragnarok(i64),
    /// Migration requested at a home height.
    Migrate(i64),
    /// Yggdrasil funding requested at a home height.
    YggdrasilFund(i64),
    /// Yggdrasil return requested at a home height.
    YggdrasilReturn(i64),
    /// UTXO consolidation.
    Consolidate,
}

impl Memo {
    /// The kind of this memo.
    pub fn tx_type(&self) -> TxType {
        match self {
            Memo::Add(_) => TxType::Add,
            Memo::Withdraw(_) => TxType::Withdraw,
            Memo::Swap(m) => m.tx_type,
            Memo::Donate(_) => TxType::Donate,
            Memo::Bond(_) => TxType::Bond,
            Memo::Unbond(_) => TxType::Unbond,
            Memo::Leave(_) => TxType::Leave,
            Memo::LoanOpen(_) => TxType::LoanOpen,
            Memo::LoanRepayment(_) => TxType::LoanRepayment,
            Memo::Switch(_) => TxType::Switch,
            Memo::ThorName(_) => TxType::ThorName,
            Memo::Reserve => TxType::Reserve,
            Memo::NoOp(_) => TxType::NoOp,
            Memo::Outbound(_) => TxType::Outbound,
            Memo::Refund(_) => TxType::Refund,
            Memo::Ragnarok(_) => TxType::Ragnarok,
            Memo::Migrate(_) => TxType::Migrate,
            Memo::YggdrasilFund(_) => TxType::YggdrasilFund,
            Memo::YggdrasilReturn(_) => TxType::YggdrasilReturn,
            Memo::Consolidate => TxType::Consolidate,
        }
    }

    /// The pool or target asset, for memos that carry one.
    pub fn asset(&self) -> Option<&Asset> {
        match self {
            Memo::Add(m) => Some(&m.asset),
            Memo::Withdraw(m) => Some(&m.asset),
            Memo::Swap(m) => Some(&m.asset),
            Memo::Donate(asset) => Some(asset),
            Memo::LoanOpen(m) => Some(&m.target_asset),
            Memo::LoanRepayment(m) => Some(&m.asset),
            _ => None,
        }
    }

    /// Where the funds end up, for memos that name a receiver.
    pub fn destination(&self) -> Option<&Address> {
        match self {
            Memo::Add(m) => m.address.as_ref(),
            Memo::Swap(m) => m.destination.as_ref(),
            Memo::LoanOpen(m) => Some(&m.target_address),
            Memo::Switch(dest) => Some(dest),
            _ => None,
        }
    }

    /// The inbound an outbound or refund pays.
    pub fn tx_id(&self) -> Option<&TxId> {
        match self {
            Memo::Outbound(id) | Memo::Refund(id) => Some(id),
            _ => None,
        }
    }

    /// The home height carried by internal memos.
    pub fn block_height(&self) -> Option<i64> {
        match self {
            Memo::Ragnarok(h)
            | Memo::Migrate(h)
            | Memo::YggdrasilFund(h)
            | Memo::YggdrasilReturn(h) => Some(*h),
            _ => None,
        }
    }

    /// See [`TxType::is_inbound`].
    pub fn is_inbound(&self) -> bool {
        self.tx_type().is_inbound()
    }

    /// See [`TxType::is_outbound`].
    pub fn is_outbound(&self) -> bool {
        self.tx_type().is_outbound()
    }

    /// See [`TxType::is_internal`].
    pub fn is_internal(&self) -> bool {
        self.tx_type().is_internal()
    }
}

impl fmt::Display for Memo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = self.tx_type().memo_prefix();
        match self {
            Memo::Add(m) => fmt::Display::fmt(m, f),
            Memo::Withdraw(m) => fmt::Display::fmt(m, f),
            Memo::Swap(m) => fmt::Display::fmt(m, f),
            Memo::Bond(m) => fmt::Display::fmt(m, f),
            Memo::Unbond(m) => fmt::Display::fmt(m, f),
            Memo::LoanOpen(m) => fmt::Display::fmt(m, f),
            Memo::LoanRepayment(m) => fmt::Display::fmt(m, f),
            Memo::ThorName(m) => fmt::Display::fmt(m, f),
            Memo::Donate(asset) => write!(f, "{prefix}:{asset}"),
            Memo::Leave(node) => write!(f, "{prefix}:{node}"),
            Memo::Switch(dest) => write!(f, "{prefix}:{dest}"),
            Memo::Outbound(id) | Memo::Refund(id) => {
                write!(f, "{prefix}:{id}")
            }
            Memo::Ragnarok(h)
            | Memo::Migrate(h)
            | Memo::YggdrasilFund(h)
            | Memo::YggdrasilReturn(h) => write!(f, "{prefix}:{h}"),
            Memo::NoOp(Some(action)) => write!(f, "{prefix}:{action}"),
            Memo::NoOp(None) | Memo::Reserve | Memo::Consolidate => {
                f.write_str(prefix)
            }
        }
    }
}
