//! Maker-only price selection against the top of book.

use crate::domain::models::{price_to_cents, MarketSnapshot, OrderSide};
use crate::infrastructure::client::as_f64;

/// Best bid/ask per side in cents, with complements filled in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BestBook {
    pub yes_bid: Option<i64>,
    pub yes_ask: Option<i64>,
    pub no_bid: Option<i64>,
    pub no_ask: Option<i64>,
}

/// Best prices from a snapshot's raw quote fields, completing missing
/// sides by the `100 - p` complement where possible.
pub fn best_book_prices(snapshot: &MarketSnapshot) -> BestBook {
    let raw = &snapshot.raw;
    let mut yes_bid = price_to_cents(as_f64(raw.get("yes_bid")));
    let mut yes_ask = price_to_cents(as_f64(raw.get("yes_ask")));
    let mut no_bid = price_to_cents(as_f64(raw.get("no_bid")));
    let mut no_ask = price_to_cents(as_f64(raw.get("no_ask")));

    if yes_bid.is_none() {
        yes_bid = price_to_cents(snapshot.yes_price);
    }
    if no_bid.is_none() {
        no_bid = price_to_cents(snapshot.no_price);
    }
    if yes_ask.is_none() {
        yes_ask = no_bid.map(|bid| 100 - bid);
    }
    if no_ask.is_none() {
        no_ask = yes_bid.map(|bid| 100 - bid);
    }
    if no_bid.is_none() {
        no_bid = yes_ask.map(|ask| 100 - ask);
    }
    if yes_bid.is_none() {
        yes_bid = no_ask.map(|ask| 100 - ask);
    }
    BestBook {
        yes_bid,
        yes_ask,
        no_bid,
        no_ask,
    }
}

/// Limit price for the chosen side.
///
/// Maker-only never meets or crosses the resting ask: with a locked or
/// one-tick spread the price stays at the bid, otherwise it improves the
/// bid by one tick capped at `ask - 1`. Returns `None` when the policy
/// cannot quote (no bid, or the clamp pushes past the ceiling).
pub fn maker_price_for_side(
    side: OrderSide,
    book: &BestBook,
    maker_only: bool,
    min_price_cents: i64,
    max_price_cents: i64,
) -> Option<i64> {
    let (bid, ask) = match side {
        OrderSide::Yes => (book.yes_bid, book.yes_ask),
        OrderSide::No => (book.no_bid, book.no_ask),
    };
    if bid.is_none() && ask.is_none() {
        return None;
    }
    if !maker_only {
        let raw_price = ask.or(bid)?;
        return Some(raw_price.clamp(min_price_cents, max_price_cents));
    }

    let bid = bid?;
    let ask = match ask {
        Some(ask) => ask,
        None => return Some(bid.clamp(min_price_cents, max_price_cents)),
    };

    let maker_ceiling = if ask <= bid || ask - bid <= 1 {
        bid
    } else {
        ask - 1
    };
    let preferred = (bid + 1).min(maker_ceiling);
    let clamped = preferred.clamp(min_price_cents, max_price_cents);
    if clamped > maker_ceiling {
        return None;
    }
    Some(clamped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn book(
        yes_bid: Option<i64>,
        yes_ask: Option<i64>,
        no_bid: Option<i64>,
        no_ask: Option<i64>,
    ) -> BestBook {
        BestBook {
            yes_bid,
            yes_ask,
            no_bid,
            no_ask,
        }
    }

    #[test]
    fn maker_price_normal_spread_improves_bid() {
        let price = maker_price_for_side(
            OrderSide::Yes,
            &book(Some(40), Some(45), Some(55), Some(60)),
            true,
            1,
            99,
        );
        assert_eq!(price, Some(41));
    }

    #[test]
    fn maker_price_locked_spread_stays_at_bid() {
        let price = maker_price_for_side(
            OrderSide::Yes,
            &book(Some(40), Some(41), Some(59), Some(60)),
            true,
            1,
            99,
        );
        assert_eq!(price, Some(40));
    }

    #[test]
    fn maker_price_declines_without_a_bid() {
        let price = maker_price_for_side(
            OrderSide::Yes,
            &book(None, Some(55), Some(45), None),
            true,
            1,
            99,
        );
        assert_eq!(price, None);
    }

    #[test]
    fn maker_price_wide_spread() {
        let price = maker_price_for_side(
            OrderSide::Yes,
            &book(Some(20), Some(50), Some(50), Some(80)),
            true,
            1,
            99,
        );
        assert_eq!(price, Some(21));
    }

    #[test]
    fn maker_price_missing_ask_uses_clamped_bid() {
        let price = maker_price_for_side(
            OrderSide::No,
            &book(Some(40), Some(45), Some(97), None),
            true,
            5,
            95,
        );
        assert_eq!(price, Some(95));
    }

    #[test]
    fn maker_price_declines_when_floor_exceeds_ceiling() {
        // Minimum price above the ceiling: cannot quote without crossing.
        let price = maker_price_for_side(
            OrderSide::Yes,
            &book(Some(3), Some(5), None, None),
            true,
            10,
            99,
        );
        assert_eq!(price, None);
    }

    #[test]
    fn taker_path_prices_at_ask() {
        let price = maker_price_for_side(
            OrderSide::Yes,
            &book(Some(40), Some(45), None, None),
            false,
            1,
            99,
        );
        assert_eq!(price, Some(45));
        let bid_only =
            maker_price_for_side(OrderSide::Yes, &book(Some(40), None, None, None), false, 1, 99);
        assert_eq!(bid_only, Some(40));
    }

    #[test]
    fn best_book_completes_complements() {
        let snapshot = MarketSnapshot {
            ticker: "T".to_string(),
            ts: Utc::now(),
            yes_price: Some(0.42),
            no_price: Some(0.58),
            volume: None,
            raw: json!({"yes_bid": 41, "no_bid": 57}),
        };
        let book = best_book_prices(&snapshot);
        assert_eq!(book.yes_bid, Some(41));
        assert_eq!(book.no_bid, Some(57));
        assert_eq!(book.yes_ask, Some(43));
        assert_eq!(book.no_ask, Some(59));
    }

    #[test]
    fn best_book_falls_back_to_snapshot_prices() {
        let snapshot = MarketSnapshot {
            ticker: "T".to_string(),
            ts: Utc::now(),
            yes_price: Some(0.42),
            no_price: Some(0.58),
            volume: None,
            raw: json!({}),
        };
        let book = best_book_prices(&snapshot);
        assert_eq!(book.yes_bid, Some(42));
        assert_eq!(book.no_bid, Some(58));
        assert_eq!(book.yes_ask, Some(42));
        assert_eq!(book.no_ask, Some(58));
    }
}
