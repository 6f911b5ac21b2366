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

//! # Bifrost Memo 📝
//!
//! Parser and canonical formatter of the `:` separated memos carried by
//! inbound and outbound transactions.
//!
//! ```text
//! =:BTC.BTC:bc1qdest:87e7:thor1aff:30
//! ^ type
//!   ^ asset
//!           ^ destination
//!                    ^ limit (scientific notation accepted)
//!                         ^ affiliate
//!                                   ^ affiliate fee in basis points
//! ```
//!
//! Address fields may be THORNames, resolved through a [`MemoResolver`].

use std::collections::HashMap;

use bifrost_types::{mimir, Address, Asset, Chain, ThorName, TxId};
use bifrost_utils::{Error, Result};
use num_bigint::BigUint;

mod memo;
mod tx_type;

pub use memo::{
    AddMemo, Affiliate, Aggregator, BondMemo, LoanOpenMemo, LoanRepaymentMemo,
    Memo, SwapMemo, ThorNameMemo, UnbondMemo, WithdrawMemo,
};
pub use tx_type::TxType;

/// Basis points of a full position.
pub const MAX_BASIS_POINTS: u64 = 10_000;

/// Home-chain lookups needed while parsing.
pub trait MemoResolver {
    /// The THORName registered under `name`.
    fn thorname(&self, name: &str) -> Option<ThorName>;
    /// Current value of a mimir key, `None` when unset.
    fn mimir(&self, _key: &str) -> Option<i64> {
        None
    }
}

/// A resolver that knows no names and no mimir values.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoThorNames;

impl MemoResolver for NoThorNames {
    fn thorname(&self, _name: &str) -> Option<ThorName> {
        None
    }
}

impl MemoResolver for HashMap<String, ThorName> {
    fn thorname(&self, name: &str) -> Option<ThorName> {
        self.get(&name.to_lowercase()).cloned()
    }
}

impl<R: MemoResolver + ?Sized> MemoResolver for &R {
    fn thorname(&self, name: &str) -> Option<ThorName> {
        (**self).thorname(name)
    }

    fn mimir(&self, key: &str) -> Option<i64> {
        (**self).mimir(key)
    }
}

/// Parses a memo without THORName resolution.
pub fn parse_memo(memo: &str) -> Result<Memo> {
    parse_memo_with(memo, &NoThorNames)
}

/// Parses a memo, resolving THORNames and reading mimir through `resolver`.
pub fn parse_memo_with<R>(memo: &str, resolver: &R) -> Result<Memo>
where
    R: MemoResolver + ?Sized,
{
    if memo.trim().is_empty() {
        return Err(Error::Memo("memo can't be empty".into()));
    }
    let parts = memo.split(':').map(str::trim).collect::<Vec<_>>();
    let tx_type = parts[0].parse::<TxType>()?;
    let parser = Parser { parts, resolver };
    let memo = match tx_type {
        TxType::Add => Memo::Add(parser.add()?),
        TxType::Withdraw => Memo::Withdraw(parser.withdraw()?),
        TxType::Swap | TxType::LimitOrder => {
            Memo::Swap(parser.swap(tx_type)?)
        }
        TxType::Donate => Memo::Donate(parser.asset()?),
        TxType::Bond => Memo::Bond(parser.bond()?),
        TxType::Unbond => Memo::Unbond(parser.unbond()?),
        TxType::Leave => Memo::Leave(parser.node_address(1)?),
        TxType::LoanOpen => Memo::LoanOpen(parser.loan_open()?),
        TxType::LoanRepayment => {
            Memo::LoanRepayment(parser.loan_repayment()?)
        }
        TxType::Switch => Memo::Switch(parser.home_address(1)?),
        TxType::ThorName => Memo::ThorName(parser.thorname()?),
        TxType::Reserve => Memo::Reserve,
        TxType::NoOp => Memo::NoOp(
            parser.field(1).map(|action| action.to_lowercase()),
        ),
        TxType::Outbound => Memo::Outbound(parser.tx_id()?),
        TxType::Refund => Memo::Refund(parser.tx_id()?),
        TxType::Ragnarok => Memo::Ragnarok(parser.height()?),
        TxType::Migrate => Memo::Migrate(parser.height()?),
        TxType::YggdrasilFund => Memo::YggdrasilFund(parser.height()?),
        TxType::YggdrasilReturn => Memo::YggdrasilReturn(parser.height()?),
        TxType::Consolidate => Memo::Consolidate,
    };
    Ok(memo)
}

/// Parses a price limit or minimum output.
///
/// Decimal and scientific notations are accepted and truncated toward zero,
/// so `870000000`, `87e7` and `870000000.9` are all `870000000`.
pub fn parse_trade_target(value: &str) -> Result<u128> {
    let invalid = || Error::Memo(format!("trade target {value} is invalid"));
    let value = value.trim();
    let (mantissa, exponent) = match value.find(['e', 'E']) {
        Some(idx) => {
            let exp = value[idx + 1..].parse::<i64>().map_err(|_| invalid())?;
            (&value[..idx], exp)
        }
        None => (value, 0),
    };
    let mantissa = mantissa.strip_prefix('+').unwrap_or(mantissa);
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let digits = format!("{int_part}{frac_part}");
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let mut target =
        BigUint::parse_bytes(digits.as_bytes(), 10).ok_or_else(invalid)?;
    let scale = exponent - frac_part.len() as i64;
    let ten = BigUint::from(10u32);
    if scale >= 0 {
        // 10^39 already overflows u128
        if scale > 39 && target != BigUint::default() {
            return Err(invalid());
        }
        target *= ten.pow(scale.min(39) as u32);
    } else if -scale > digits.len() as i64 {
        target = BigUint::default();
    } else {
        target /= ten.pow((-scale) as u32);
    }
    u128::try_from(&target).map_err(|_| invalid())
}

struct Parser<'a, R: ?Sized> {
    parts: Vec<&'a str>,
    resolver: &'a R,
}

impl<'a, R: MemoResolver + ?Sized> Parser<'a, R> {
    /// A non-empty field.
    fn field(&self, idx: usize) -> Option<&'a str> {
        self.parts.get(idx).copied().filter(|p| !p.is_empty())
    }

    fn required(&self, idx: usize, what: &str) -> Result<&'a str> {
        self.field(idx).ok_or_else(|| {
            Error::Memo(format!("{}: {what} is required", self.parts[0]))
        })
    }

    fn asset(&self) -> Result<Asset> {
        let raw = self.required(1, "asset")?;
        raw.parse::<Asset>()
            .map_err(|_| Error::Memo(format!("{raw} is an invalid asset")))
    }

    /// Resolves an address, or a THORName optionally suffixed with the
    /// chain of the alias (`name.BTC`).
    fn fetch_address(&self, name: &str, chain: Chain) -> Result<Address> {
        let (lookup, chain) = match name.rsplit_once('.') {
            Some((n, suffix)) => match suffix.parse::<Chain>() {
                Ok(c) => (n, c),
                Err(_) => (name, chain),
            },
            None => (name, chain),
        };
        if let Some(alias) = self
            .resolver
            .thorname(lookup)
            .and_then(|tn| tn.alias(chain).cloned())
        {
            return Ok(alias);
        }
        Address::new(name)
            .map_err(|_| Error::Memo(format!("{name} is not recognizable")))
    }

    fn optional_address(
        &self,
        idx: usize,
        chain: Chain,
    ) -> Result<Option<Address>> {
        self.field(idx)
            .map(|raw| self.fetch_address(raw, chain))
            .transpose()
    }

    fn home_address(&self, idx: usize) -> Result<Address> {
        let raw = self.required(idx, "address")?;
        let addr = self.fetch_address(raw, Chain::THOR)?;
        if !addr.is_chain(Chain::THOR) {
            return Err(Error::Memo(format!("{raw} is an invalid address")));
        }
        Ok(addr)
    }

    fn node_address(&self, idx: usize) -> Result<Address> {
        let raw = self.required(idx, "node address")?;
        let addr = Address::new(raw)
            .ok()
            .filter(|a| a.is_chain(Chain::THOR))
            .ok_or_else(|| {
                Error::Memo(format!("{raw} is an invalid node address"))
            })?;
        Ok(addr)
    }

    fn affiliate(&self, addr_idx: usize) -> Result<Option<Affiliate>> {
        let (Some(raw), Some(bps)) =
            (self.field(addr_idx), self.field(addr_idx + 1))
        else {
            return Ok(None);
        };
        let address = self.fetch_address(raw, Chain::THOR)?;
        let bps = bps.parse::<u64>().map_err(|_| {
            Error::Memo(format!("affiliate basis points {bps} is invalid"))
        })?;
        let max = match self.resolver.mimir(mimir::MAX_AFFILIATE_FEE_BASIS_POINTS)
        {
            Some(v) if (0..=MAX_BASIS_POINTS as i64).contains(&v) => v as u64,
            _ => MAX_BASIS_POINTS,
        };
        Ok(Some(Affiliate {
            address,
            basis_points: bps.min(max),
        }))
    }

    fn aggregator(&self, idx: usize) -> Option<Aggregator> {
        let address = self.field(idx)?.to_string();
        let target_limit = match self.field(idx + 2) {
            Some(raw) => parse_trade_target(raw).unwrap_or_else(|e| {
                tracing::debug!(%raw, error = %e, "ignoring aggregator limit");
                0
            }),
            None => 0,
        };
        Some(Aggregator {
            address,
            target_address: self.field(idx + 1).unwrap_or_default().to_string(),
            target_limit,
        })
    }

    fn trade_target(&self, idx: usize) -> Result<u128> {
        self.field(idx).map_or(Ok(0), parse_trade_target)
    }

    fn add(&self) -> Result<AddMemo> {
        let asset = self.asset()?;
        let address = self.optional_address(2, asset.chain_of_record())?;
        let affiliate = self.affiliate(3)?;
        Ok(AddMemo {
            asset,
            address,
            affiliate,
        })
    }

    fn withdraw(&self) -> Result<WithdrawMemo> {
        let asset = self.asset()?;
        let basis_points = match self.field(2) {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                Error::Memo(format!("withdraw basis points {raw} is invalid"))
            })?,
            None => MAX_BASIS_POINTS,
        };
        let withdrawal_asset = self
            .field(3)
            .map(|raw| {
                raw.parse::<Asset>().map_err(|_| {
                    Error::Memo(format!("{raw} is an invalid asset"))
                })
            })
            .transpose()?;
        Ok(WithdrawMemo {
            asset,
            basis_points,
            withdrawal_asset,
        })
    }

    fn swap(&self, tx_type: TxType) -> Result<SwapMemo> {
        let asset = self.asset()?;
        let destination = self.optional_address(2, asset.chain_of_record())?;
        let limit = self.trade_target(3)?;
        let affiliate = self.affiliate(4)?;
        let aggregator = self.aggregator(6);
        Ok(SwapMemo {
            tx_type,
            asset,
            destination,
            limit,
            affiliate,
            aggregator,
        })
    }

    fn bond(&self) -> Result<BondMemo> {
        let node_address = self.node_address(1)?;
        let provider = match self.field(2) {
            Some(_) => Some(self.node_address(2)?),
            None => None,
        };
        let operator_fee = match self.field(3) {
            Some(raw) => raw.parse::<i64>().map_err(|_| {
                Error::Memo(format!("operator fee {raw} is invalid"))
            })?,
            None => -1,
        };
        Ok(BondMemo {
            node_address,
            provider,
            operator_fee,
        })
    }

    fn unbond(&self) -> Result<UnbondMemo> {
        let node_address = self.node_address(1)?;
        let raw = self.required(2, "amount")?;
        let amount = raw.parse::<u128>().map_err(|_| {
            Error::Memo(format!("unbond amount {raw} is invalid"))
        })?;
        let provider = match self.field(3) {
            Some(_) => Some(self.node_address(3)?),
            None => None,
        };
        Ok(UnbondMemo {
            node_address,
            amount,
            provider,
        })
    }

    fn loan_open(&self) -> Result<LoanOpenMemo> {
        let target_asset = self.asset()?;
        let raw = self.required(2, "target address")?;
        let target_address =
            self.fetch_address(raw, target_asset.chain_of_record())?;
        Ok(LoanOpenMemo {
            target_asset,
            target_address,
            min_out: self.trade_target(3)?,
            affiliate: self.affiliate(4)?,
            aggregator: self.aggregator(6),
        })
    }

    fn loan_repayment(&self) -> Result<LoanRepaymentMemo> {
        let asset = self.asset()?;
        let raw = self.required(2, "owner")?;
        let owner = self.fetch_address(raw, asset.chain_of_record())?;
        Ok(LoanRepaymentMemo {
            asset,
            owner,
            min_out: self.trade_target(3)?,
        })
    }

    fn thorname(&self) -> Result<ThorNameMemo> {
        let name = self.required(1, "name")?.to_lowercase();
        let raw_chain = self.required(2, "chain")?;
        let chain = raw_chain.parse::<Chain>().map_err(|_| {
            Error::Memo(format!("{raw_chain} is an invalid chain"))
        })?;
        let raw_addr = self.required(3, "address")?;
        let address = Address::new(raw_addr)?;
        let owner = match self.field(4) {
            Some(_) => Some(self.home_address(4)?),
            None => None,
        };
        let preferred_asset = self
            .field(5)
            .map(|raw| {
                raw.parse::<Asset>().map_err(|_| {
                    Error::Memo(format!("{raw} is an invalid asset"))
                })
            })
            .transpose()?;
        let expire_block_height = match self.field(6) {
            Some(raw) => raw.parse::<i64>().map_err(|_| {
                Error::Memo(format!("expiry {raw} is invalid"))
            })?,
            None => 0,
        };
        Ok(ThorNameMemo {
            name,
            chain,
            address,
            owner,
            preferred_asset,
            expire_block_height,
        })
    }

    fn tx_id(&self) -> Result<TxId> {
        let raw = self.required(1, "tx id")?;
        TxId::new(raw)
            .map_err(|_| Error::Memo(format!("{raw} is an invalid tx id")))
    }

    fn height(&self) -> Result<i64> {
        let raw = self.required(1, "block height")?;
        raw.parse::<i64>()
            .map_err(|_| Error::Memo(format!("block height {raw} is invalid")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bifrost_types::ThorNameAlias;

    const BNB_ADDR: &str = "bnb1lejrrtta9cgr49fuh7ktu3sddhe0ff7wenlpn6";
    const THOR_ADDR: &str = "thor1z83z5t9vqxys8nhpkxk5zp6zym0lalcp8ywhvj";
    const TX_ID: &str =
        "B6BD1A69831B9CCC0A1E9939E9AFBFCA144C0E3F1A8E9E5F3B5A4B4D1C0D2E3F";

    struct Mimir(i64);

    impl MemoResolver for Mimir {
        fn thorname(&self, _name: &str) -> Option<ThorName> {
            None
        }

        fn mimir(&self, key: &str) -> Option<i64> {
            (key == mimir::MAX_AFFILIATE_FEE_BASIS_POINTS).then_some(self.0)
        }
    }

    fn names() -> HashMap<String, ThorName> {
        let tn = ThorName {
            name: "alice".into(),
            aliases: vec![
                ThorNameAlias {
                    chain: Chain::BNB,
                    address: Address::new(BNB_ADDR).unwrap(),
                },
                ThorNameAlias {
                    chain: Chain::THOR,
                    address: Address::new(THOR_ADDR).unwrap(),
                },
            ],
            ..Default::default()
        };
        HashMap::from([("alice".to_string(), tn)])
    }

    #[test]
    fn canonical_form_parses_back() {
        let resolver = names();
        let memos = [
            "+:BNB.BNB".to_string(),
            format!("+:BNB.BNB:{BNB_ADDR}"),
            format!("+:BNB.BNB:{THOR_ADDR}:{THOR_ADDR}:1000"),
            "-:BNB.BNB:25".to_string(),
            "-:BNB.BNB:10000:BNB.BNB".to_string(),
            format!("=:BNB.BNB:{BNB_ADDR}"),
            format!("=:BNB.BNB:{BNB_ADDR}:870000000"),
            format!("=:BNB.BNB:{BNB_ADDR}:100:{THOR_ADDR}:30"),
            format!("=:ETH.ETH:{BNB_ADDR}:1:{THOR_ADDR}:30:0xagg:0xtoken:5"),
            format!("=<:BNB.BNB:{BNB_ADDR}:100"),
            "DONATE:BNB.BNB".to_string(),
            format!("BOND:{THOR_ADDR}"),
            format!("BOND:{THOR_ADDR}:{THOR_ADDR}:2000"),
            format!("BOND:{THOR_ADDR}:{THOR_ADDR}:-5"),
            format!("UNBOND:{THOR_ADDR}:300:{THOR_ADDR}"),
            format!("LEAVE:{THOR_ADDR}"),
            format!("$+:BNB.BNB:{BNB_ADDR}"),
            format!("$+:BNB.BNB:{BNB_ADDR}:10:{THOR_ADDR}:5"),
            format!("$-:BNB.BNB:{BNB_ADDR}:10"),
            format!("SWITCH:{THOR_ADDR}"),
            format!("~:alice:BNB:{BNB_ADDR}"),
            format!("~:alice:BNB:{BNB_ADDR}:{THOR_ADDR}:BNB.BNB:1000"),
            "RESERVE".to_string(),
            "NOOP".to_string(),
            "NOOP:novault".to_string(),
            format!("OUT:{TX_ID}"),
            format!("REFUND:{TX_ID}"),
            "RAGNAROK:1024".to_string(),
            "MIGRATE:100".to_string(),
            "YGGDRASIL+:30".to_string(),
            "YGGDRASIL-:30".to_string(),
            "CONSOLIDATE".to_string(),
        ];
        for raw in memos {
            let memo = parse_memo_with(&raw, &resolver)
                .unwrap_or_else(|e| panic!("{raw}: {e}"));
            assert_eq!(memo.to_string(), raw);
            let again = parse_memo_with(&memo.to_string(), &resolver).unwrap();
            assert_eq!(again, memo);
        }
    }

    #[test]
    fn negative_operator_fee_survives_formatting() {
        let raw = format!("BOND:{THOR_ADDR}:{THOR_ADDR}:-5");
        let first = parse_memo(&raw).unwrap();
        let second = parse_memo(&first.to_string()).unwrap();
        assert_eq!(first, second);
        match second {
            Memo::Bond(bond) => assert_eq!(bond.operator_fee, -5),
            other => panic!("unexpected memo {other:?}"),
        }
    }

    #[test]
    fn aliases_produce_canonical_output() {
        let memo = parse_memo("add:bnb.bnb").unwrap();
        assert_eq!(memo.to_string(), "+:BNB.BNB");
        let memo = parse_memo("wd:bnb.bnb").unwrap();
        assert_eq!(memo.to_string(), "-:BNB.BNB:10000");
        let memo = parse_memo("d:bnb.bnb").unwrap();
        assert_eq!(memo.to_string(), "DONATE:BNB.BNB");
        let memo = parse_memo("+:rune").unwrap();
        assert_eq!(memo.to_string(), "+:THOR.RUNE");
        let memo = parse_memo("lo:bnb.bnb::5").unwrap();
        assert_eq!(memo.tx_type(), TxType::LimitOrder);
        assert_eq!(memo.to_string(), "=<:BNB.BNB::5");
    }

    #[test]
    fn scientific_limits_truncate() {
        assert_eq!(parse_trade_target("87e7").unwrap(), 870_000_000);
        assert_eq!(parse_trade_target("870000000").unwrap(), 870_000_000);
        assert_eq!(parse_trade_target("8.7E8").unwrap(), 870_000_000);
        assert_eq!(parse_trade_target("5.6").unwrap(), 5);
        assert_eq!(parse_trade_target("1e-3").unwrap(), 0);
        assert!(parse_trade_target("five").is_err());
        assert!(parse_trade_target("-5").is_err());
        assert!(parse_trade_target("1e80").is_err());

        let a = parse_memo(&format!("=:BNB.BNB:{BNB_ADDR}:87e7")).unwrap();
        let b = parse_memo(&format!("=:BNB.BNB:{BNB_ADDR}:870000000")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn affiliate_fee_is_clamped() {
        let raw = format!("=:BNB.BNB:{BNB_ADDR}:100:{THOR_ADDR}:20000");
        let memo = parse_memo(&raw).unwrap();
        assert_eq!(
            memo.to_string(),
            format!("=:BNB.BNB:{BNB_ADDR}:100:{THOR_ADDR}:10000")
        );
        let memo = parse_memo_with(&raw, &Mimir(5000)).unwrap();
        assert_eq!(
            memo.to_string(),
            format!("=:BNB.BNB:{BNB_ADDR}:100:{THOR_ADDR}:5000")
        );
        // out of range mimir falls back to the full range
        let memo = parse_memo_with(&raw, &Mimir(20_000)).unwrap();
        assert!(memo.to_string().ends_with(":10000"));
    }

    #[test]
    fn thornames_resolve_per_chain() {
        let resolver = names();
        let memo = parse_memo_with("=:BNB.BNB:alice", &resolver).unwrap();
        assert_eq!(memo.destination().unwrap().as_str(), BNB_ADDR);
        let memo = parse_memo_with("=:BNB.BNB:alice.THOR", &resolver).unwrap();
        assert_eq!(memo.destination().unwrap().as_str(), THOR_ADDR);
        let memo = parse_memo_with("SWITCH:alice", &resolver).unwrap();
        assert_eq!(memo.destination().unwrap().as_str(), THOR_ADDR);
        assert!(parse_memo_with("=:BNB.BNB:bob-1", &resolver).is_err());
    }

    #[test]
    fn accessors() {
        let memo = parse_memo("withdraw:bnb").unwrap();
        assert_eq!(memo.asset().unwrap().to_string(), "THOR.BNB");
        assert!(memo.is_inbound());
        let memo = parse_memo(&format!("out:{TX_ID}")).unwrap();
        assert_eq!(memo.tx_id().unwrap().as_str(), TX_ID);
        assert!(memo.is_outbound());
        let memo = parse_memo("yggdrasil-:12").unwrap();
        assert_eq!(memo.block_height(), Some(12));
        assert!(memo.is_internal());
        let memo = parse_memo(&format!("bond:{THOR_ADDR}")).unwrap();
        let Memo::Bond(bond) = memo else {
            panic!("expected a bond memo")
        };
        assert_eq!(bond.operator_fee, -1);
    }

    #[test]
    fn invalid_memos_are_rejected() {
        let bad = [
            String::new(),
            "bogus".into(),
            "CREATE".into(),
            "withdraw".into(),
            "withdraw:bnb:twenty-two".into(),
            "swap".into(),
            "swap:bnb:PROVIDER-1:5.6".into(),
            "swap:bnb:bad_DES:5.6".into(),
            format!("swap:bnb:{BNB_ADDR}:five"),
            "migrate:abc".into(),
            "leave".into(),
            "out".into(),
            "out:notatxid".into(),
            "bond".into(),
            "bond:what".into(),
            "refund".into(),
            "yggdrasil+".into(),
            "yggdrasil+:A".into(),
            "yggdrasil-".into(),
            "yggdrasil-:B".into(),
            "ragnarok".into(),
            "ragnarok:what".into(),
            "switch:what".into(),
            "$+:BNB.BNB".into(),
            "$-:BNB.BNB".into(),
            "~:alice:BNB".into(),
            "whatever".into(),
        ];
        for raw in bad {
            assert!(parse_memo(&raw).is_err(), "{raw:?} should not parse");
        }
    }
}
