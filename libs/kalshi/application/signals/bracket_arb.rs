//! Cross-bracket arbitrage inside one event's complementary markets.
//!
//! Brackets partition the outcome space, so buying YES on every bracket
//! pays exactly 100c per set, and buying NO on every bracket pays
//! `(n-1) * 100`. When the summed asks (plus taker fees) come in under
//! the payout, the event is free money up to the thinnest leg's depth.

use crate::domain::fees::FeeCalculator;
use crate::domain::models::OrderSide;
use crate::domain::orderbook::{best_bid_and_depth, OrderBookLevels};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// One leg of an arbitrage set
#[derive(Debug, Clone, Serialize)]
pub struct ArbLeg {
    pub ticker: String,
    pub side: OrderSide,
    pub price_cents: i64,
    pub depth: i64,
}

/// A profitable set purchase across an event's brackets
#[derive(Debug, Clone, Serialize)]
pub struct BracketArbOpportunity {
    pub detected_at: DateTime<Utc>,
    pub event_ticker: String,
    /// `all_yes` or `all_no`
    pub arb_type: String,
    pub legs: Vec<ArbLeg>,
    pub cost_cents: i64,
    pub payout_cents: i64,
    pub profit_cents: i64,
    pub max_sets: i64,
    pub total_profit_cents: i64,
    pub profit_after_fees_cents: i64,
}

enum ArbSide {
    AllYes,
    AllNo,
}

fn candidate(
    side: ArbSide,
    event_ticker: &str,
    bracket_tickers: &[String],
    orderbooks: &HashMap<String, OrderBookLevels>,
    now_utc: DateTime<Utc>,
) -> Option<BracketArbOpportunity> {
    let n_brackets = bracket_tickers.len();
    let (arb_type, payout) = match side {
        ArbSide::AllYes => ("all_yes", 100i64),
        ArbSide::AllNo => {
            if n_brackets < 2 {
                return None;
            }
            ("all_no", (n_brackets as i64 - 1) * 100)
        }
    };

    let mut legs = Vec::with_capacity(n_brackets);
    let mut total_cost = 0i64;
    let mut total_fees = 0i64;
    let mut min_depth: Option<i64> = None;
    for ticker in bracket_tickers {
        let book = orderbooks.get(ticker)?;
        // The ask on one side is implied by the best bid on the other.
        let (opposite_bid, depth, leg_side) = match side {
            ArbSide::AllYes => {
                let (no_bid, depth) = best_bid_and_depth(&book.no)?;
                (no_bid, depth, OrderSide::Yes)
            }
            ArbSide::AllNo => {
                let (yes_bid, depth) = best_bid_and_depth(&book.yes)?;
                (yes_bid, depth, OrderSide::No)
            }
        };
        let ask = (100 - opposite_bid).clamp(1, 99);
        legs.push(ArbLeg {
            ticker: ticker.clone(),
            side: leg_side,
            price_cents: ask,
            depth,
        });
        total_cost += ask;
        total_fees += FeeCalculator::taker_fee(ask);
        min_depth = Some(min_depth.map_or(depth, |current: i64| current.min(depth)));
    }

    if total_cost >= payout {
        return None;
    }
    let max_sets = min_depth.unwrap_or(0).max(0);
    if max_sets <= 0 {
        return None;
    }
    let profit_cents = payout - total_cost;
    let profit_after_fees_per_set = profit_cents - total_fees;
    if profit_after_fees_per_set <= 0 {
        return None;
    }
    Some(BracketArbOpportunity {
        detected_at: now_utc,
        event_ticker: event_ticker.to_string(),
        arb_type: arb_type.to_string(),
        legs,
        cost_cents: total_cost,
        payout_cents: payout,
        profit_cents,
        max_sets,
        total_profit_cents: profit_cents * max_sets,
        profit_after_fees_cents: profit_after_fees_per_set * max_sets,
    })
}

/// Scan one event for the better of the all-YES / all-NO candidates.
pub fn scan_bracket_arbitrage(
    event_ticker: &str,
    bracket_tickers: &[String],
    orderbooks: &HashMap<String, OrderBookLevels>,
    min_profit_after_fees_cents: i64,
    now_utc: DateTime<Utc>,
) -> Option<BracketArbOpportunity> {
    let tickers: Vec<String> = bracket_tickers
        .iter()
        .map(|ticker| ticker.trim().to_uppercase())
        .filter(|ticker| !ticker.is_empty())
        .collect();
    if tickers.len() < 2 {
        return None;
    }
    let candidates = [
        candidate(ArbSide::AllYes, event_ticker, &tickers, orderbooks, now_utc),
        candidate(ArbSide::AllNo, event_ticker, &tickers, orderbooks, now_utc),
    ];
    candidates
        .into_iter()
        .flatten()
        .filter(|opportunity| {
            opportunity.profit_after_fees_cents > min_profit_after_fees_cents
        })
        .max_by_key(|opportunity| opportunity.profit_after_fees_cents)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(yes_bid: Option<(i64, i64)>, no_bid: Option<(i64, i64)>) -> OrderBookLevels {
        OrderBookLevels {
            yes: yes_bid.map(|(p, q)| vec![(p, q)]).unwrap_or_default(),
            no: no_bid.map(|(p, q)| vec![(p, q)]).unwrap_or_default(),
        }
    }

    fn tickers(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn all_yes_arbitrage_detected() {
        let books = HashMap::from([
            ("KXHIGHNY-A".to_string(), book(None, Some((70, 15)))),
            ("KXHIGHNY-B".to_string(), book(None, Some((68, 12)))),
        ]);
        let opp = scan_bracket_arbitrage(
            "KXHIGHNY-TEST",
            &tickers(&["KXHIGHNY-A", "KXHIGHNY-B"]),
            &books,
            0,
            now(),
        )
        .unwrap();
        assert_eq!(opp.arb_type, "all_yes");
        // yes asks 30 + 32 = 62 < 100
        assert_eq!(opp.cost_cents, 62);
        assert_eq!(opp.payout_cents, 100);
        assert_eq!(opp.profit_cents, 38);
        assert_eq!(opp.max_sets, 12);
        assert!(opp.profit_after_fees_cents > 0);
        let leg_cost: i64 = opp.legs.iter().map(|leg| leg.price_cents).sum();
        assert!(leg_cost < opp.payout_cents);
    }

    #[test]
    fn no_arbitrage_when_cost_reaches_payout() {
        let books = HashMap::from([
            ("KXHIGHNY-A".to_string(), book(None, Some((49, 20)))),
            ("KXHIGHNY-B".to_string(), book(None, Some((49, 20)))),
        ]);
        let opp = scan_bracket_arbitrage(
            "KXHIGHNY-TEST",
            &tickers(&["KXHIGHNY-A", "KXHIGHNY-B"]),
            &books,
            0,
            now(),
        );
        assert!(opp.is_none());
    }

    #[test]
    fn all_no_arbitrage_detected() {
        let books = HashMap::from([
            ("KXHIGHNY-A".to_string(), book(Some((45, 30)), None)),
            ("KXHIGHNY-B".to_string(), book(Some((44, 20)), None)),
            ("KXHIGHNY-C".to_string(), book(Some((46, 18)), None)),
        ]);
        let opp = scan_bracket_arbitrage(
            "KXHIGHNY-TEST",
            &tickers(&["KXHIGHNY-A", "KXHIGHNY-B", "KXHIGHNY-C"]),
            &books,
            0,
            now(),
        )
        .unwrap();
        assert_eq!(opp.arb_type, "all_no");
        // no asks 55 + 56 + 54 = 165 < 200
        assert_eq!(opp.cost_cents, 165);
        assert_eq!(opp.payout_cents, 200);
        assert!(opp.profit_after_fees_cents > 0);
    }

    #[test]
    fn fees_can_eliminate_small_arbitrage() {
        let books = HashMap::from([
            ("KXHIGHNY-A".to_string(), book(None, Some((51, 15)))),
            ("KXHIGHNY-B".to_string(), book(None, Some((51, 15)))),
        ]);
        // Gross profit 2c, but two taker fees of 2c each swallow it.
        let opp = scan_bracket_arbitrage(
            "KXHIGHNY-TEST",
            &tickers(&["KXHIGHNY-A", "KXHIGHNY-B"]),
            &books,
            0,
            now(),
        );
        assert!(opp.is_none());
    }

    #[test]
    fn depth_limits_max_sets() {
        let books = HashMap::from([
            ("KXHIGHNY-A".to_string(), book(Some((45, 50)), None)),
            ("KXHIGHNY-B".to_string(), book(Some((45, 2)), None)),
            ("KXHIGHNY-C".to_string(), book(Some((45, 60)), None)),
        ]);
        let opp = scan_bracket_arbitrage(
            "KXHIGHNY-TEST",
            &tickers(&["KXHIGHNY-A", "KXHIGHNY-B", "KXHIGHNY-C"]),
            &books,
            0,
            now(),
        )
        .unwrap();
        assert_eq!(opp.max_sets, 2);
        assert!(opp.max_sets <= opp.legs.iter().map(|leg| leg.depth).min().unwrap());
    }

    #[test]
    fn missing_orderbook_returns_none() {
        let books = HashMap::from([(
            "KXHIGHNY-A".to_string(),
            book(None, Some((70, 10))),
        )]);
        let opp = scan_bracket_arbitrage(
            "KXHIGHNY-TEST",
            &tickers(&["KXHIGHNY-A", "KXHIGHNY-B"]),
            &books,
            0,
            now(),
        );
        assert!(opp.is_none());
    }

    #[test]
    fn single_bracket_returns_none() {
        let books = HashMap::from([(
            "KXHIGHNY-A".to_string(),
            book(None, Some((70, 10))),
        )]);
        let opp = scan_bracket_arbitrage(
            "KXHIGHNY-TEST",
            &tickers(&["KXHIGHNY-A"]),
            &books,
            0,
            now(),
        );
        assert!(opp.is_none());
    }

    #[test]
    fn min_profit_threshold_filters_marginal_sets() {
        let books = HashMap::from([
            ("KXHIGHNY-A".to_string(), book(None, Some((70, 1)))),
            ("KXHIGHNY-B".to_string(), book(None, Some((68, 1)))),
        ]);
        let names = tickers(&["KXHIGHNY-A", "KXHIGHNY-B"]);
        let accepted =
            scan_bracket_arbitrage("KXHIGHNY-TEST", &names, &books, 0, now()).unwrap();
        assert!(accepted.profit_after_fees_cents > 0);
        let rejected = scan_bracket_arbitrage(
            "KXHIGHNY-TEST",
            &names,
            &books,
            accepted.profit_after_fees_cents,
            now(),
        );
        assert!(rejected.is_none());
    }
}
