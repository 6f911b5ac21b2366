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

use bifrost_types::{
    Address, Chain, Coins, ObservedTx, Tx, TxId, TxIn, TxInItem,
    MAX_BASIS_POINTS, MAX_MEMO_SIZE,
};
use bifrost_utils::Result;

/// Most observations attested in a single message.
pub const MAX_TX_ARRAY_LEN: usize = 100;

/// Merges a scanned batch into the deck.
///
/// Batches of the same chain with the same flags share an entry, and so
/// do their first block heights except on BNB, where blocks are too fast
/// to be attested one by one. Items already on the deck are skipped, and
/// so are block items kept by an already filtered mempool entry, which
/// carries them through to finality.
pub fn merge(deck: &mut Vec<TxIn>, mut tx_in: TxIn) {
    if !tx_in.mem_pool && !tx_in.tx_array.is_empty() {
        let pending = deck
            .iter()
            .filter(|entry| {
                entry.mem_pool && entry.filtered && entry.chain == tx_in.chain
            })
            .flat_map(|entry| entry.tx_array.iter())
            .collect::<Vec<_>>();
        tx_in
            .tx_array
            .retain(|item| !pending.iter().any(|known| known.same_tx(item)));
        if tx_in.tx_array.is_empty() {
            return;
        }
        tx_in.count = tx_in.tx_array.len().to_string();
    }
    let by_height = !tx_in.chain.is_bnb();
    let slot = deck.iter_mut().find(|entry| {
        entry.chain == tx_in.chain
            && entry.mem_pool == tx_in.mem_pool
            && entry.filtered == tx_in.filtered
            && (!by_height
                || entry.tx_array.is_empty()
                || tx_in.tx_array.is_empty()
                || entry.first_block_height() == tx_in.first_block_height())
    });
    match slot {
        Some(entry) => {
            for item in tx_in.tx_array {
                if !entry.tx_array.iter().any(|known| known.same_tx(&item)) {
                    entry.tx_array.push(item);
                }
            }
            entry.count = entry.tx_array.len().to_string();
        }
        None => deck.push(tx_in),
    }
}

/// Splits a batch into chunks of at most [`MAX_TX_ARRAY_LEN`] items,
/// ordered by block height.
pub fn chunkify(tx_in: &TxIn) -> Vec<TxIn> {
    let mut items = tx_in.tx_array.clone();
    items.sort_by_key(|item| item.block_height);
    items
        .chunks(MAX_TX_ARRAY_LEN)
        .map(|chunk| tx_in.with_items(chunk.to_vec()))
        .collect()
}

/// The memo of a memo-less savers deposit or withdrawal.
///
/// A single gas asset coin above the dust threshold of its chain is a
/// savers action. Above dust by at most [`MAX_BASIS_POINTS`] it withdraws
/// that many basis points, otherwise it deposits.
pub fn savers_memo(chain: Chain, coins: &Coins) -> Option<String> {
    if chain.is_thor() || coins.0.len() != 1 {
        return None;
    }
    let coin = &coins.0[0];
    if !coin.asset.is_gas_asset() {
        return None;
    }
    let dust = chain.dust_threshold();
    if coin.amount <= dust {
        return None;
    }
    let synth = coin.asset.synthetic();
    let basis_points = coin.amount - dust;
    if basis_points <= u128::from(MAX_BASIS_POINTS) {
        Some(format!("-:{synth}:{basis_points}"))
    } else {
        Some(format!("+:{synth}"))
    }
}

/// Converts a scanned item to an observation of the home chain.
///
/// `Ok(None)` is an item the home chain would reject anyway: no coins, an
/// oversized memo or no recipient. An item whose ids do not parse is an
/// error.
pub fn observed_tx(tx_in: &TxIn, item: &TxInItem) -> Result<Option<ObservedTx>> {
    if item.coins.is_empty() {
        tracing::info!(tx = %item.tx, "ignoring a tx without coins");
        return Ok(None);
    }
    if item.memo.len() > MAX_MEMO_SIZE {
        tracing::info!(tx = %item.tx, "ignoring a tx with an oversized memo");
        return Ok(None);
    }
    if item.to.is_empty() {
        tracing::info!(tx = %item.tx, "ignoring a tx without a recipient");
        return Ok(None);
    }
    let memo = match item.memo.is_empty() {
        true => savers_memo(tx_in.chain, &item.coins).unwrap_or_default(),
        false => item.memo.clone(),
    };
    let id = TxId::new(&item.tx)?;
    let from_address = Address::new(&item.sender)?;
    let to_address = Address::new(&item.to)?;
    let coins = Coins::new(
        item.coins.0.iter().filter(|c| !c.is_empty()).cloned().collect(),
    );
    let tx = Tx {
        id,
        chain: tx_in.chain,
        from_address,
        to_address,
        coins,
        gas: item.gas.clone(),
        memo,
    };
    let finalise_height = item.block_height + tx_in.confirmation_required;
    let block_height = match tx_in.finalised {
        true => finalise_height,
        false => item.block_height,
    };
    let mut observed = ObservedTx::new(
        tx,
        block_height,
        item.observed_vault_pub_key.clone(),
        finalise_height,
    );
    observed.aggregator = item.aggregator.clone();
    observed.aggregator_target = item.aggregator_target.clone();
    observed.aggregator_target_limit = item.aggregator_target_limit;
    Ok(Some(observed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bifrost_types::{Asset, Coin, PubKey};

    fn item(tx: &str, height: i64) -> TxInItem {
        TxInItem {
            block_height: height,
            tx: tx.to_string(),
            sender: "bc1qsender".into(),
            to: "bc1qvault".into(),
            coins: Coins::new(vec![Coin::new(Chain::BTC.gas_asset(), 50_000)]),
            observed_vault_pub_key: PubKey::new("thorpub1vault"),
            ..Default::default()
        }
    }

    fn hash(n: usize) -> String {
        format!("{n:064X}")
    }

    #[test]
    fn block_copies_of_mempool_items_are_skipped() {
        let mut deck = Vec::new();
        let mut mempool = TxIn::new(Chain::BTC, vec![item(&hash(1), 100)]);
        mempool.mem_pool = true;
        mempool.filtered = true;
        merge(&mut deck, mempool);
        merge(
            &mut deck,
            TxIn::new(
                Chain::BTC,
                vec![item(&hash(1).to_lowercase(), 100), item(&hash(2), 100)],
            ),
        );
        merge(&mut deck, TxIn::new(Chain::BTC, vec![item(&hash(1), 101)]));
        assert_eq!(deck.len(), 2);
        assert!(deck[0].mem_pool);
        assert_eq!(deck[1].tx_array, vec![item(&hash(2), 100)]);
        assert_eq!(deck[1].count, "1");

        // other chains are left alone
        merge(&mut deck, TxIn::new(Chain::LTC, vec![item(&hash(1), 100)]));
        assert_eq!(deck.len(), 3);

        // unfiltered mempool items may still be dropped by the filters
        let mut deck = Vec::new();
        let mut mempool = TxIn::new(Chain::BTC, vec![item(&hash(1), 100)]);
        mempool.mem_pool = true;
        merge(&mut deck, mempool);
        merge(&mut deck, TxIn::new(Chain::BTC, vec![item(&hash(1), 100)]));
        assert_eq!(deck.len(), 2);
    }

    #[test]
    fn batches_merge_per_height_except_on_bnb() {
        let mut deck = Vec::new();
        merge(&mut deck, TxIn::new(Chain::BTC, vec![item(&hash(1), 100)]));
        merge(
            &mut deck,
            TxIn::new(
                Chain::BTC,
                vec![item(&hash(1).to_lowercase(), 100), item(&hash(2), 100)],
            ),
        );
        merge(&mut deck, TxIn::new(Chain::BTC, vec![item(&hash(3), 101)]));
        let mut mempool = TxIn::new(Chain::BTC, vec![item(&hash(4), 100)]);
        mempool.mem_pool = true;
        merge(&mut deck, mempool);
        assert_eq!(deck.len(), 3);
        assert_eq!(deck[0].tx_array.len(), 2);
        assert_eq!(deck[0].count, "2");

        let mut deck = Vec::new();
        merge(&mut deck, TxIn::new(Chain::BNB, vec![item(&hash(1), 100)]));
        merge(&mut deck, TxIn::new(Chain::BNB, vec![item(&hash(2), 101)]));
        assert_eq!(deck.len(), 1);
        assert_eq!(deck[0].tx_array.len(), 2);
    }

    #[test]
    fn chunks_are_bounded_and_sorted() {
        let items = (0..250)
            .map(|n| item(&hash(n), 1_000 - n as i64))
            .collect::<Vec<_>>();
        let chunks = chunkify(&TxIn::new(Chain::BTC, items));
        assert_eq!(
            chunks.iter().map(|c| c.tx_array.len()).collect::<Vec<_>>(),
            vec![100, 100, 50]
        );
        assert_eq!(chunks[2].count, "50");
        let heights = chunks
            .iter()
            .flat_map(|c| c.tx_array.iter().map(|i| i.block_height))
            .collect::<Vec<_>>();
        assert!(heights.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn savers_memo_from_amount() {
        let btc = Chain::BTC.gas_asset();
        let coins = |amount| Coins::new(vec![Coin::new(btc.clone(), amount)]);
        assert_eq!(savers_memo(Chain::BTC, &coins(10_000)), None);
        assert_eq!(
            savers_memo(Chain::BTC, &coins(10_500)).as_deref(),
            Some("-:BTC/BTC:500")
        );
        assert_eq!(
            savers_memo(Chain::BTC, &coins(20_000)).as_deref(),
            Some("-:BTC/BTC:10000")
        );
        assert_eq!(
            savers_memo(Chain::BTC, &coins(20_001)).as_deref(),
            Some("+:BTC/BTC")
        );
        let token = Coins::new(vec![Coin::new(Asset::new(Chain::ETH, "USDC"), 1)]);
        assert_eq!(savers_memo(Chain::ETH, &token), None);
        let two = Coins::new(vec![
            Coin::new(btc.clone(), 50_000),
            Coin::new(btc, 50_000),
        ]);
        assert_eq!(savers_memo(Chain::BTC, &two), None);
    }

    #[test]
    fn observation_heights_follow_finality() {
        let mut tx_in = TxIn::new(Chain::BTC, vec![item(&hash(7), 100)]);
        tx_in.confirmation_required = 6;
        let pre = observed_tx(&tx_in, &tx_in.tx_array[0]).unwrap().unwrap();
        assert_eq!((pre.block_height, pre.finalise_height), (100, 106));
        assert_eq!(pre.tx.memo, "+:BTC/BTC");

        tx_in.finalised = true;
        let last = observed_tx(&tx_in, &tx_in.tx_array[0]).unwrap().unwrap();
        assert_eq!((last.block_height, last.finalise_height), (106, 106));
        assert!(last.is_final());
    }

    #[test]
    fn unusable_items_are_skipped() {
        let tx_in = TxIn::new(Chain::BTC, Vec::new());
        let mut no_coins = item(&hash(1), 1);
        no_coins.coins = Coins::default();
        assert!(observed_tx(&tx_in, &no_coins).unwrap().is_none());
        let mut long_memo = item(&hash(1), 1);
        long_memo.memo = "x".repeat(MAX_MEMO_SIZE + 1);
        assert!(observed_tx(&tx_in, &long_memo).unwrap().is_none());
        let mut no_to = item(&hash(1), 1);
        no_to.to.clear();
        assert!(observed_tx(&tx_in, &no_to).unwrap().is_none());
        assert!(observed_tx(&tx_in, &item("not-a-hash", 1)).is_err());
    }
}
