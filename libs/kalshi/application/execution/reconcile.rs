//! Pure reconciliation transitions and the reprice gate.
//!
//! The transition function maps `(prior status, API status, queue
//! position)` to the next status and the events to append; the engine
//! applies the result against the store. Terminal orders never move.

use crate::domain::models::OrderStatus;
use chrono::{DateTime, Duration, Utc};

/// What to append to the order's event log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderEventKind {
    /// The order reached a terminal (or different open) status
    StatusChanged(OrderStatus),
    /// Still open; queue position or open-status changed
    Resting { queue_position: Option<i64> },
}

/// Result of one reconcile step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub next: OrderStatus,
    pub events: Vec<OrderEventKind>,
}

/// Compute the next state for an open order given what the API reported.
///
/// Open→open transitions produce at most one `Resting` event, and only
/// when the status or queue position actually changed.
pub fn reconcile_transition(
    prior: OrderStatus,
    api_status: OrderStatus,
    prior_queue: Option<i64>,
    queue_position: Option<i64>,
) -> TransitionOutcome {
    if prior.is_terminal() {
        return TransitionOutcome {
            next: prior,
            events: Vec::new(),
        };
    }
    if api_status.is_terminal() {
        return TransitionOutcome {
            next: api_status,
            events: vec![OrderEventKind::StatusChanged(api_status)],
        };
    }
    let status_changed = api_status != prior;
    let queue_changed = queue_position.is_some() && queue_position != prior_queue;
    let mut events = Vec::new();
    if status_changed || queue_changed {
        events.push(OrderEventKind::Resting { queue_position });
    }
    TransitionOutcome {
        next: api_status,
        events,
    }
}

/// Knobs governing cancel-and-reprice of stale makers
#[derive(Debug, Clone)]
pub struct RepricePolicy {
    pub queue_max_depth: i64,
    pub stale_minutes: i64,
    pub cooldown_minutes: i64,
    pub max_per_window: usize,
    pub window_minutes: i64,
}

impl RepricePolicy {
    /// All reprice conditions: deep queue, allowed, stale order, a live
    /// signal in the same direction, per-market cooldown elapsed, and the
    /// per-window cap not exhausted.
    pub fn should_reprice(
        &self,
        queue_position: i64,
        order_created_at: DateTime<Utc>,
        now: DateTime<Utc>,
        allow_reprice: bool,
        signal_same_direction: bool,
        recent_reprices: &[DateTime<Utc>],
    ) -> bool {
        if !allow_reprice || !signal_same_direction {
            return false;
        }
        if queue_position <= self.queue_max_depth {
            return false;
        }
        if now - order_created_at < Duration::minutes(self.stale_minutes) {
            return false;
        }
        let window_start = now - Duration::minutes(self.window_minutes);
        let in_window = recent_reprices
            .iter()
            .filter(|at| **at >= window_start)
            .count();
        if in_window >= self.max_per_window {
            return false;
        }
        if let Some(last) = recent_reprices.iter().max() {
            if now - *last < Duration::minutes(self.cooldown_minutes) {
                return false;
            }
        }
        true
    }

    /// Drop window-expired entries from a reprice history, in place.
    pub fn prune(&self, history: &mut Vec<DateTime<Utc>>, now: DateTime<Utc>) {
        let window_start = now - Duration::minutes(self.window_minutes);
        history.retain(|at| *at >= window_start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RepricePolicy {
        RepricePolicy {
            queue_max_depth: 50,
            stale_minutes: 10,
            cooldown_minutes: 15,
            max_per_window: 2,
            window_minutes: 60,
        }
    }

    #[test]
    fn terminal_api_status_transitions_once() {
        let outcome = reconcile_transition(
            OrderStatus::Submitted,
            OrderStatus::Filled,
            None,
            None,
        );
        assert_eq!(outcome.next, OrderStatus::Filled);
        assert_eq!(
            outcome.events,
            vec![OrderEventKind::StatusChanged(OrderStatus::Filled)]
        );
    }

    #[test]
    fn terminal_prior_never_moves() {
        for terminal in [
            OrderStatus::Simulated,
            OrderStatus::Filled,
            OrderStatus::Canceled,
            OrderStatus::Failed,
        ] {
            let outcome =
                reconcile_transition(terminal, OrderStatus::Submitted, None, Some(3));
            assert_eq!(outcome.next, terminal);
            assert!(outcome.events.is_empty());
        }
    }

    #[test]
    fn open_to_open_emits_resting_only_on_change() {
        let unchanged = reconcile_transition(
            OrderStatus::Submitted,
            OrderStatus::Submitted,
            Some(7),
            Some(7),
        );
        assert!(unchanged.events.is_empty());

        let queue_moved = reconcile_transition(
            OrderStatus::Submitted,
            OrderStatus::Submitted,
            Some(7),
            Some(3),
        );
        assert_eq!(
            queue_moved.events,
            vec![OrderEventKind::Resting {
                queue_position: Some(3)
            }]
        );

        let partially = reconcile_transition(
            OrderStatus::Submitted,
            OrderStatus::PartiallyFilled,
            None,
            None,
        );
        assert_eq!(partially.next, OrderStatus::PartiallyFilled);
        assert_eq!(partially.events.len(), 1);
    }

    #[test]
    fn reprice_requires_every_condition() {
        let policy = policy();
        let now = Utc::now();
        let stale_order = now - Duration::minutes(30);
        let fresh_order = now - Duration::minutes(2);

        assert!(policy.should_reprice(60, stale_order, now, true, true, &[]));
        // Shallow queue
        assert!(!policy.should_reprice(50, stale_order, now, true, true, &[]));
        // Not allowed (paused)
        assert!(!policy.should_reprice(60, stale_order, now, false, true, &[]));
        // Signal gone or flipped
        assert!(!policy.should_reprice(60, stale_order, now, true, false, &[]));
        // Too young
        assert!(!policy.should_reprice(60, fresh_order, now, true, true, &[]));
    }

    #[test]
    fn reprice_cooldown_and_window_cap() {
        let policy = policy();
        let now = Utc::now();
        let stale_order = now - Duration::minutes(30);

        // Cooldown: a reprice 5 minutes ago blocks.
        let recent = vec![now - Duration::minutes(5)];
        assert!(!policy.should_reprice(60, stale_order, now, true, true, &recent));

        // Cooldown elapsed but window cap reached.
        let capped = vec![now - Duration::minutes(40), now - Duration::minutes(20)];
        assert!(!policy.should_reprice(60, stale_order, now, true, true, &capped));

        // One old reprice outside the cooldown, under the cap.
        let ok = vec![now - Duration::minutes(40)];
        assert!(policy.should_reprice(60, stale_order, now, true, true, &ok));
    }

    #[test]
    fn prune_drops_expired_entries() {
        let policy = policy();
        let now = Utc::now();
        let mut history = vec![
            now - Duration::minutes(90),
            now - Duration::minutes(30),
        ];
        policy.prune(&mut history, now);
        assert_eq!(history.len(), 1);
    }
}
