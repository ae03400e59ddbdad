// Copyright 2024 Veil Labs
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

use std::collections::{BTreeMap, HashSet};

use veil_relay_types::{LiquidityEntry, MarketClass, MarketDelta, MarketId};

/// One market's cached order book: the live bid/ask queues, the previous
/// tick's copies (kept purely for change detection) and the set of order
/// ids referenced by the latest snapshot.
#[derive(Debug, Clone)]
pub struct OrderBook {
    market_id: MarketId,
    class: MarketClass,
    bid: Vec<LiquidityEntry>,
    ask: Vec<LiquidityEntry>,
    prev_bid: Vec<LiquidityEntry>,
    prev_ask: Vec<LiquidityEntry>,
    active_ids: HashSet<u64>,
}

impl OrderBook {
    /// Creates an empty book for a market.
    pub fn new(market_id: MarketId, class: MarketClass) -> Self {
        Self {
            market_id,
            class,
            bid: Vec::new(),
            ask: Vec::new(),
            prev_bid: Vec::new(),
            prev_ask: Vec::new(),
            active_ids: HashSet::new(),
        }
    }

    /// The market this book belongs to.
    pub fn market_id(&self) -> MarketId {
        self.market_id
    }

    /// Whether the market trades spot or perpetuals.
    pub fn class(&self) -> MarketClass {
        self.class
    }

    /// The live bid queue.
    pub fn bid(&self) -> &[LiquidityEntry] {
        &self.bid
    }

    /// The live ask queue.
    pub fn ask(&self) -> &[LiquidityEntry] {
        &self.ask
    }

    /// Replaces both sides with a fresh full snapshot from the engine and
    /// returns the ids that dropped out of the market's active set:
    /// orders that fully filled, were cancelled upstream or expired, and
    /// must be deleted from durable storage in the same update cycle.
    pub fn apply_snapshot(
        &mut self,
        bid: Vec<LiquidityEntry>,
        ask: Vec<LiquidityEntry>,
    ) -> Vec<u64> {
        let new_active: HashSet<u64> = bid
            .iter()
            .chain(ask.iter())
            .map(|entry| entry.order_id)
            .collect();
        let evicted = self
            .active_ids
            .iter()
            .filter(|id| !new_active.contains(id))
            .copied()
            .collect();
        self.active_ids = new_active;
        self.bid = bid;
        self.ask = ask;
        evicted
    }

    /// Consume-once change detection against the previous tick.
    ///
    /// Equality is structural over the full entry sequence, so a reorder
    /// within a queue counts as a change. After the comparison the
    /// previous snapshot is advanced, which is why a second call without
    /// an intervening [`OrderBook::apply_snapshot`] reports no change.
    pub fn poll_delta(&mut self) -> Option<MarketDelta> {
        let bid_changed = self.bid != self.prev_bid;
        let ask_changed = self.ask != self.prev_ask;
        self.prev_bid = self.bid.clone();
        self.prev_ask = self.ask.clone();
        if !bid_changed && !ask_changed {
            return None;
        }
        Some(MarketDelta {
            is_perp: self.class.is_perp(),
            market_id: self.market_id,
            bid_queue: bid_changed.then(|| self.bid.clone()),
            ask_queue: ask_changed.then(|| self.ask.clone()),
        })
    }
}

/// All cached books, one per configured market.
#[derive(Debug, Default)]
pub struct OrderBookRegistry {
    books: BTreeMap<MarketId, OrderBook>,
}

impl OrderBookRegistry {
    /// Creates a registry with an empty book per market.
    pub fn new<I>(markets: I) -> Self
    where
        I: IntoIterator<Item = (MarketId, MarketClass)>,
    {
        let books = markets
            .into_iter()
            .map(|(market_id, class)| {
                (market_id, OrderBook::new(market_id, class))
            })
            .collect();
        Self { books }
    }

    /// The book for a market, if the market is configured.
    pub fn book_mut(&mut self, market_id: MarketId) -> Option<&mut OrderBook> {
        self.books.get_mut(&market_id)
    }

    /// Polls every book, collecting the markets that changed since the
    /// previous tick, in market id order.
    pub fn poll_deltas(&mut self) -> Vec<MarketDelta> {
        self.books
            .values_mut()
            .filter_map(OrderBook::poll_delta)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(ids: &[u64]) -> Vec<LiquidityEntry> {
        ids.iter()
            .map(|id| (100 + id, 10, 1_700_000_000, *id).into())
            .collect()
    }

    #[test]
    fn no_structural_change_reports_no_delta() {
        let mut book = OrderBook::new(11, MarketClass::Spot);
        book.apply_snapshot(entries(&[1, 2]), entries(&[3]));
        assert!(book.poll_delta().is_some());
        // identical snapshot again
        book.apply_snapshot(entries(&[1, 2]), entries(&[3]));
        assert!(book.poll_delta().is_none());
    }

    #[test]
    fn a_change_reports_exactly_the_changed_side() {
        let mut book = OrderBook::new(11, MarketClass::Spot);
        book.apply_snapshot(entries(&[1, 2]), entries(&[3]));
        book.poll_delta();

        // entry added on the bid side only
        book.apply_snapshot(entries(&[1, 2, 4]), entries(&[3]));
        let delta = book.poll_delta().unwrap();
        assert!(delta.bid_queue.is_some());
        assert!(delta.ask_queue.is_none());

        // entry removed on the ask side only
        book.apply_snapshot(entries(&[1, 2, 4]), entries(&[]));
        let delta = book.poll_delta().unwrap();
        assert!(delta.bid_queue.is_none());
        assert_eq!(delta.ask_queue.unwrap(), entries(&[]));
    }

    #[test]
    fn a_reorder_within_a_queue_counts_as_a_change() {
        let mut book = OrderBook::new(21, MarketClass::Perpetual);
        book.apply_snapshot(entries(&[1, 2]), vec![]);
        book.poll_delta();

        book.apply_snapshot(entries(&[2, 1]), vec![]);
        let delta = book.poll_delta().unwrap();
        assert!(delta.is_perp);
        assert_eq!(delta.bid_queue.unwrap(), entries(&[2, 1]));
        assert!(delta.ask_queue.is_none());
    }

    #[test]
    fn poll_delta_consumes_the_change() {
        let mut book = OrderBook::new(11, MarketClass::Spot);
        book.apply_snapshot(entries(&[1]), entries(&[2]));
        assert!(book.poll_delta().is_some());
        assert!(book.poll_delta().is_none());
    }

    #[test]
    fn vanished_ids_are_reported_for_eviction() {
        let mut book = OrderBook::new(11, MarketClass::Spot);
        let evicted =
            book.apply_snapshot(entries(&[1, 2]), entries(&[3]));
        assert!(evicted.is_empty());

        let mut evicted =
            book.apply_snapshot(entries(&[2]), entries(&[3]));
        evicted.sort_unstable();
        assert_eq!(evicted, vec![1]);

        // an id that comes back is simply active again
        let evicted = book.apply_snapshot(entries(&[1, 2]), entries(&[3]));
        assert!(evicted.is_empty());
    }

    #[test]
    fn registry_polls_markets_in_id_order() {
        let mut registry = OrderBookRegistry::new([
            (12, MarketClass::Spot),
            (11, MarketClass::Spot),
            (21, MarketClass::Perpetual),
        ]);
        registry
            .book_mut(21)
            .unwrap()
            .apply_snapshot(entries(&[5]), vec![]);
        registry
            .book_mut(11)
            .unwrap()
            .apply_snapshot(entries(&[1]), vec![]);

        let deltas = registry.poll_deltas();
        let ids: Vec<_> = deltas.iter().map(|d| d.market_id).collect();
        assert_eq!(ids, vec![11, 21]);
        assert!(registry.book_mut(99).is_none());
    }
}
