//! Order-book state and depth math for binary markets.
//!
//! Prices are integer cents in [1, 99]. The YES and NO sides are
//! complementary: a resting NO bid at `p` is a YES ask at `100 - p`, and
//! vice versa.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// =============================================================================
// Level normalization
// =============================================================================

/// Parse raw order-book levels into `(price_cents, quantity)` pairs.
///
/// Accepts either `{"price": p, "quantity"|"qty": q}` objects or `[p, q]`
/// arrays; rows that fail to parse or carry non-positive quantity are
/// skipped.
pub fn normalize_levels(raw: &Value) -> Vec<(i64, i64)> {
    let rows = match raw.as_array() {
        Some(rows) => rows,
        None => return Vec::new(),
    };
    let mut output = Vec::with_capacity(rows.len());
    for row in rows {
        let (price, qty) = if let Some(object) = row.as_object() {
            let price = object.get("price").and_then(value_as_i64);
            let qty = object
                .get("quantity")
                .and_then(value_as_i64)
                .or_else(|| object.get("qty").and_then(value_as_i64));
            (price, qty)
        } else if let Some(pair) = row.as_array() {
            (
                pair.first().and_then(value_as_i64),
                pair.get(1).and_then(value_as_i64),
            )
        } else {
            (None, None)
        };
        match (price, qty) {
            (Some(price), Some(qty)) if qty > 0 => output.push((price, qty)),
            _ => {}
        }
    }
    output
}

fn value_as_i64(value: &Value) -> Option<i64> {
    if let Some(v) = value.as_i64() {
        return Some(v);
    }
    value.as_f64().map(|v| v as i64)
}

/// Best bid on a side plus the depth resting at that price.
pub fn best_bid_and_depth(levels: &[(i64, i64)]) -> Option<(i64, i64)> {
    let best_price = levels.iter().map(|(price, _)| *price).max()?;
    let depth: i64 = levels
        .iter()
        .filter(|(price, _)| *price == best_price)
        .map(|(_, qty)| *qty)
        .sum();
    if depth <= 0 {
        return None;
    }
    Some((best_price, depth))
}

// =============================================================================
// VWAP
// =============================================================================

/// Volume-weighted average price over the cheapest (or richest) levels
/// needed to fill `target_qty`.
///
/// Returns `(vwap_cents, filled_qty)`; `filled_qty` may be short of the
/// target when the book is thin.
pub fn compute_vwap(
    levels: &[(i64, i64)],
    target_qty: i64,
    ascending: bool,
) -> Option<(f64, i64)> {
    if target_qty <= 0 {
        return None;
    }
    let mut sorted: Vec<(i64, i64)> = levels.to_vec();
    if ascending {
        sorted.sort_by_key(|(price, _)| *price);
    } else {
        sorted.sort_by_key(|(price, _)| std::cmp::Reverse(*price));
    }
    let mut filled: i64 = 0;
    let mut total_cost: i64 = 0;
    for (price_cents, qty) in sorted {
        if qty <= 0 {
            continue;
        }
        let remaining = target_qty - filled;
        if remaining <= 0 {
            break;
        }
        let fill_qty = qty.min(remaining);
        total_cost += price_cents * fill_qty;
        filled += fill_qty;
    }
    if filled <= 0 {
        return None;
    }
    Some((total_cost as f64 / filled as f64, filled))
}

/// Effective cents to buy `qty` YES contracts, taken from the NO book by
/// the `100 - p` complement.
pub fn effective_yes_ask_vwap(book: &OrderBookLevels, qty: i64) -> Option<(f64, i64)> {
    if book.no.is_empty() {
        return None;
    }
    let yes_asks: Vec<(i64, i64)> = book
        .no
        .iter()
        .map(|(price, depth)| (100 - price, *depth))
        .collect();
    compute_vwap(&yes_asks, qty, true)
}

/// Effective cents to buy `qty` NO contracts, taken from the YES book.
pub fn effective_no_ask_vwap(book: &OrderBookLevels, qty: i64) -> Option<(f64, i64)> {
    if book.yes.is_empty() {
        return None;
    }
    let no_asks: Vec<(i64, i64)> = book
        .yes
        .iter()
        .map(|(price, depth)| (100 - price, *depth))
        .collect();
    compute_vwap(&no_asks, qty, true)
}

// =============================================================================
// OrderBookLevels - the wire/domain representation of a full book
// =============================================================================

/// Both sides of a market's book as `(price_cents, quantity)` levels.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBookLevels {
    #[serde(default)]
    pub yes: Vec<(i64, i64)>,
    #[serde(default)]
    pub no: Vec<(i64, i64)>,
}

impl OrderBookLevels {
    pub fn from_value(raw: &Value) -> Self {
        let root = raw.get("orderbook").unwrap_or(raw);
        Self {
            yes: normalize_levels(root.get("yes").unwrap_or(&Value::Null)),
            no: normalize_levels(root.get("no").unwrap_or(&Value::Null)),
        }
    }

    pub fn best_yes_bid(&self) -> Option<i64> {
        best_bid_and_depth(&self.yes).map(|(price, _)| price)
    }

    pub fn best_no_bid(&self) -> Option<i64> {
        best_bid_and_depth(&self.no).map(|(price, _)| price)
    }

    /// YES ask implied by the best NO bid.
    pub fn best_yes_ask(&self) -> Option<i64> {
        self.best_no_bid().map(|bid| 100 - bid)
    }

    /// NO ask implied by the best YES bid.
    pub fn best_no_ask(&self) -> Option<i64> {
        self.best_yes_bid().map(|bid| 100 - bid)
    }

    pub fn is_empty(&self) -> bool {
        self.yes.is_empty() && self.no.is_empty()
    }
}

// =============================================================================
// BookState - the mutable, seq-gated in-memory book behind the WS feed
// =============================================================================

/// In-memory book for one ticker, maintained from snapshot and delta
/// messages.
///
/// Ordering: deltas apply in receipt order; a message whose `seq` is not
/// greater than the current one is ignored, except snapshots with a `seq`
/// at least as new, which replace both sides atomically.
#[derive(Debug, Clone)]
pub struct BookState {
    yes: BTreeMap<i64, i64>,
    no: BTreeMap<i64, i64>,
    seq: Option<u64>,
    best_yes_bid: Option<i64>,
    best_yes_ask: Option<i64>,
    updated_at: DateTime<Utc>,
}

impl BookState {
    pub fn new() -> Self {
        Self {
            yes: BTreeMap::new(),
            no: BTreeMap::new(),
            seq: None,
            best_yes_bid: None,
            best_yes_ask: None,
            updated_at: Utc::now(),
        }
    }

    /// Replace both sides from a snapshot. Stale snapshots (seq older than
    /// current) are ignored.
    pub fn apply_snapshot(
        &mut self,
        yes_levels: &[(i64, i64)],
        no_levels: &[(i64, i64)],
        seq: Option<u64>,
        now: DateTime<Utc>,
    ) -> bool {
        if let (Some(incoming), Some(current)) = (seq, self.seq) {
            if incoming < current {
                return false;
            }
        }
        self.yes = yes_levels.iter().copied().collect();
        self.no = no_levels.iter().copied().collect();
        self.seq = seq;
        self.updated_at = now;
        self.refresh_best();
        true
    }

    /// Apply per-level changes. `delta` adjusts the resting quantity;
    /// `quantity` sets it absolutely. Zero or negative results remove the
    /// level. Non-increasing `seq` values are ignored.
    pub fn apply_delta(
        &mut self,
        yes_changes: &[LevelChange],
        no_changes: &[LevelChange],
        seq: Option<u64>,
        now: DateTime<Utc>,
    ) -> bool {
        if let (Some(incoming), Some(current)) = (seq, self.seq) {
            if incoming <= current {
                return false;
            }
        }
        apply_changes(&mut self.yes, yes_changes);
        apply_changes(&mut self.no, no_changes);
        if seq.is_some() {
            self.seq = seq;
        }
        self.updated_at = now;
        self.refresh_best();
        true
    }

    fn refresh_best(&mut self) {
        self.best_yes_bid = self.yes.keys().next_back().copied();
        self.best_yes_ask = self.no.keys().next_back().map(|no_bid| 100 - no_bid);
    }

    pub fn best_yes_bid(&self) -> Option<i64> {
        self.best_yes_bid
    }

    pub fn best_yes_ask(&self) -> Option<i64> {
        self.best_yes_ask
    }

    /// Override the best-price cache from a ticker message (no depth).
    pub fn set_best_prices(
        &mut self,
        yes_bid: Option<i64>,
        yes_ask: Option<i64>,
        now: DateTime<Utc>,
    ) {
        if yes_bid.is_some() {
            self.best_yes_bid = yes_bid;
        }
        if yes_ask.is_some() {
            self.best_yes_ask = yes_ask;
        }
        self.updated_at = now;
    }

    pub fn seq(&self) -> Option<u64> {
        self.seq
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn age_seconds(&self, now: DateTime<Utc>) -> f64 {
        (now - self.updated_at).num_milliseconds().max(0) as f64 / 1000.0
    }

    pub fn is_empty(&self) -> bool {
        self.yes.is_empty() && self.no.is_empty()
    }

    /// Materialize the book as sorted levels (best bid first per side).
    pub fn levels(&self) -> OrderBookLevels {
        OrderBookLevels {
            yes: self.yes.iter().rev().map(|(p, q)| (*p, *q)).collect(),
            no: self.no.iter().rev().map(|(p, q)| (*p, *q)).collect(),
        }
    }
}

impl Default for BookState {
    fn default() -> Self {
        Self::new()
    }
}

/// A single level mutation from a delta message
#[derive(Debug, Clone, Copy)]
pub struct LevelChange {
    pub price: i64,
    /// Relative change when present
    pub delta: Option<i64>,
    /// Absolute quantity when present (delta takes precedence)
    pub quantity: Option<i64>,
}

fn apply_changes(book: &mut BTreeMap<i64, i64>, changes: &[LevelChange]) {
    for change in changes {
        if let Some(delta) = change.delta {
            let updated = book.get(&change.price).copied().unwrap_or(0) + delta;
            if updated <= 0 {
                book.remove(&change.price);
            } else {
                book.insert(change.price, updated);
            }
            continue;
        }
        if let Some(quantity) = change.quantity {
            if quantity <= 0 {
                book.remove(&change.price);
            } else {
                book.insert(change.price, quantity);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_accepts_objects_and_pairs() {
        let raw = json!([
            {"price": 40, "quantity": 10},
            {"price": 41, "qty": 5},
            [42, 7],
            {"price": 43, "quantity": 0},
            "garbage"
        ]);
        assert_eq!(normalize_levels(&raw), vec![(40, 10), (41, 5), (42, 7)]);
        assert!(normalize_levels(&json!({"not": "a list"})).is_empty());
    }

    #[test]
    fn vwap_single_level() {
        let result = compute_vwap(&[(42, 10)], 5, true).unwrap();
        assert_eq!(result, (42.0, 5));
    }

    #[test]
    fn vwap_walks_multiple_levels() {
        let result = compute_vwap(&[(40, 2), (41, 3), (45, 10)], 5, true).unwrap();
        assert!((result.0 - 40.6).abs() < 1e-9);
        assert_eq!(result.1, 5);
    }

    #[test]
    fn vwap_reports_partial_fill() {
        let result = compute_vwap(&[(30, 2), (35, 1)], 10, true).unwrap();
        assert_eq!(result.1, 3);
        assert!((result.0 - (30.0 * 2.0 + 35.0) / 3.0).abs() < 1e-9);
    }

    #[test]
    fn yes_ask_vwap_from_no_bids() {
        let book = OrderBookLevels {
            yes: vec![],
            no: vec![(70, 2), (65, 3)],
        };
        // YES asks become 30 (qty 2) and 35 (qty 3); filling 4 costs
        // (30*2 + 35*2) / 4 = 32.5.
        let result = effective_yes_ask_vwap(&book, 4).unwrap();
        assert!((result.0 - 32.5).abs() < 1e-9);
        assert_eq!(result.1, 4);
    }

    #[test]
    fn no_ask_vwap_from_yes_bids() {
        let book = OrderBookLevels {
            yes: vec![(60, 1), (55, 4)],
            no: vec![],
        };
        let result = effective_no_ask_vwap(&book, 3).unwrap();
        assert!((result.0 - (40.0 + 45.0 * 2.0) / 3.0).abs() < 1e-9);
        assert_eq!(result.1, 3);
    }

    #[test]
    fn best_bid_sums_depth_at_top_level() {
        assert_eq!(
            best_bid_and_depth(&[(40, 5), (42, 3), (42, 4)]),
            Some((42, 7))
        );
        assert_eq!(best_bid_and_depth(&[]), None);
    }

    #[test]
    fn snapshot_seeds_both_sides() {
        let mut book = BookState::new();
        let now = Utc::now();
        assert!(book.apply_snapshot(&[(40, 10), (39, 5)], &[(55, 8)], Some(7), now));
        assert_eq!(book.best_yes_bid(), Some(40));
        assert_eq!(book.best_yes_ask(), Some(45));
        assert_eq!(book.seq(), Some(7));
    }

    #[test]
    fn stale_delta_is_ignored() {
        let mut book = BookState::new();
        let now = Utc::now();
        book.apply_snapshot(&[(40, 10)], &[(55, 8)], Some(10), now);
        let change = [LevelChange {
            price: 41,
            delta: Some(5),
            quantity: None,
        }];
        assert!(!book.apply_delta(&change, &[], Some(10), now));
        assert!(!book.apply_delta(&change, &[], Some(9), now));
        assert_eq!(book.best_yes_bid(), Some(40));
        assert!(book.apply_delta(&change, &[], Some(11), now));
        assert_eq!(book.best_yes_bid(), Some(41));
    }

    #[test]
    fn newer_snapshot_replaces_atomically() {
        let mut book = BookState::new();
        let now = Utc::now();
        book.apply_snapshot(&[(40, 10)], &[(55, 8)], Some(5), now);
        assert!(!book.apply_snapshot(&[(30, 1)], &[(60, 1)], Some(4), now));
        assert!(book.apply_snapshot(&[(45, 2)], &[(50, 2)], Some(5), now));
        assert_eq!(book.best_yes_bid(), Some(45));
        assert_eq!(book.best_yes_ask(), Some(50));
    }

    #[test]
    fn delta_removes_levels_at_zero() {
        let mut book = BookState::new();
        let now = Utc::now();
        book.apply_snapshot(&[(40, 3)], &[], Some(1), now);
        let drain = [LevelChange {
            price: 40,
            delta: Some(-3),
            quantity: None,
        }];
        assert!(book.apply_delta(&drain, &[], Some(2), now));
        assert_eq!(book.best_yes_bid(), None);

        let absolute = [LevelChange {
            price: 38,
            delta: None,
            quantity: Some(6),
        }];
        assert!(book.apply_delta(&absolute, &[], Some(3), now));
        assert_eq!(book.best_yes_bid(), Some(38));
        let clear = [LevelChange {
            price: 38,
            delta: None,
            quantity: Some(0),
        }];
        assert!(book.apply_delta(&clear, &[], Some(4), now));
        assert_eq!(book.best_yes_bid(), None);
    }
}
