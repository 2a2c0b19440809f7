//! Normalization of vendor order payloads into typed lifecycle state.
//!
//! The exchange reports order status under several names and spellings;
//! everything is folded into [`OrderStatus`] here, at the boundary.

use crate::domain::models::OrderStatus;
use serde_json::Value;
use std::collections::HashMap;

/// Fold a vendor status string into an [`OrderStatus`].
///
/// Unknown or empty strings map to `Submitted`: an order we cannot
/// classify is treated as still open rather than silently terminal.
pub fn normalize_order_status(raw: &str) -> OrderStatus {
    match raw.trim().to_lowercase().as_str() {
        "" => OrderStatus::Submitted,
        "resting" | "open" | "pending" | "submitted" => OrderStatus::Submitted,
        "partially_filled" | "partially-filled" => OrderStatus::PartiallyFilled,
        "filled" | "executed" | "complete" | "completed" | "matched" => OrderStatus::Filled,
        "canceled" | "cancelled" | "expired" | "voided" => OrderStatus::Canceled,
        "failed" | "rejected" | "error" => OrderStatus::Failed,
        _ => OrderStatus::Submitted,
    }
}

/// Pull the order status out of a response payload, looking at
/// `status` / `order_status` at the top level and inside an `order` object.
pub fn extract_order_status(payload: &Value) -> OrderStatus {
    let candidates = [
        payload.get("status"),
        payload.get("order_status"),
        payload.get("order").and_then(|order| order.get("status")),
        payload
            .get("order")
            .and_then(|order| order.get("order_status")),
    ];
    for candidate in candidates.into_iter().flatten() {
        if let Some(text) = candidate.as_str() {
            if !text.trim().is_empty() {
                return normalize_order_status(text);
            }
        }
    }
    OrderStatus::Submitted
}

/// Pull the external order id out of a submission response
/// (`order_id` / `id`, top level or inside `order`).
pub fn extract_order_id(payload: &Value) -> Option<String> {
    let candidates = [
        payload.get("order_id"),
        payload.get("id"),
        payload.get("order").and_then(|order| order.get("order_id")),
        payload.get("order").and_then(|order| order.get("id")),
    ];
    for candidate in candidates.into_iter().flatten() {
        let text = match candidate {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => continue,
        };
        if !text.is_empty() {
            return Some(text);
        }
    }
    None
}

/// Collect queue positions from a queue-positions payload.
///
/// The payload may nest entries arbitrarily and key them by order id,
/// external order id, or market ticker; every alias found alongside a
/// `queue_position` (or `position`) value is recorded.
pub fn extract_queue_positions(payload: &Value) -> HashMap<String, i64> {
    let mut mapping = HashMap::new();
    let root = payload.get("queue_positions").unwrap_or(payload);
    visit_node(root, None, &mut mapping);
    mapping
}

fn visit_node(node: &Value, parent_key: Option<&str>, mapping: &mut HashMap<String, i64>) {
    match node {
        Value::Object(object) => {
            let queue_position = object
                .get("queue_position")
                .or_else(|| object.get("position"))
                .and_then(value_as_i64);
            if let Some(position) = queue_position {
                let aliases = [
                    parent_key.map(str::to_string),
                    object
                        .get("order_id")
                        .and_then(|v| value_as_key(v)),
                    object
                        .get("external_order_id")
                        .and_then(|v| value_as_key(v)),
                    object
                        .get("market_ticker")
                        .and_then(|v| value_as_key(v)),
                    object.get("ticker").and_then(|v| value_as_key(v)),
                ];
                for alias in aliases.into_iter().flatten() {
                    let alias = alias.trim().to_string();
                    if !alias.is_empty() {
                        mapping.insert(alias, position);
                    }
                }
            }
            for (key, value) in object {
                if value.is_object() || value.is_array() {
                    visit_node(value, Some(key), mapping);
                } else if (key == "queue_position" || key == "position")
                    && queue_position.is_none()
                {
                    if let (Some(parent), Some(position)) = (parent_key, value_as_i64(value)) {
                        mapping.insert(parent.to_string(), position);
                    }
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                visit_node(item, parent_key, mapping);
            }
        }
        _ => {}
    }
}

fn value_as_i64(value: &Value) -> Option<i64> {
    if let Some(v) = value.as_i64() {
        return Some(v);
    }
    if let Some(v) = value.as_f64() {
        return Some(v as i64);
    }
    value.as_str().and_then(|s| s.trim().parse().ok())
}

fn value_as_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_synonyms_normalize() {
        assert_eq!(
            normalize_order_status("partially_filled"),
            OrderStatus::PartiallyFilled
        );
        assert_eq!(
            normalize_order_status("partially-filled"),
            OrderStatus::PartiallyFilled
        );
        assert_eq!(normalize_order_status("resting"), OrderStatus::Submitted);
        assert_eq!(normalize_order_status("open"), OrderStatus::Submitted);
        assert_eq!(normalize_order_status("filled"), OrderStatus::Filled);
        assert_eq!(normalize_order_status("executed"), OrderStatus::Filled);
        assert_eq!(normalize_order_status("cancelled"), OrderStatus::Canceled);
        assert_eq!(normalize_order_status("expired"), OrderStatus::Canceled);
        assert_eq!(normalize_order_status("rejected"), OrderStatus::Failed);
        assert_eq!(normalize_order_status(""), OrderStatus::Submitted);
        assert_eq!(normalize_order_status("weird"), OrderStatus::Submitted);
    }

    #[test]
    fn status_found_in_nested_order_object() {
        let payload = json!({"order": {"order_status": "matched"}});
        assert_eq!(extract_order_status(&payload), OrderStatus::Filled);
        let top = json!({"status": "voided", "order": {"status": "filled"}});
        assert_eq!(extract_order_status(&top), OrderStatus::Canceled);
    }

    #[test]
    fn order_id_discovery() {
        assert_eq!(
            extract_order_id(&json!({"order_id": "abc-1"})),
            Some("abc-1".to_string())
        );
        assert_eq!(
            extract_order_id(&json!({"order": {"id": 42}})),
            Some("42".to_string())
        );
        assert_eq!(extract_order_id(&json!({"order": {"id": "  "}})), None);
    }

    #[test]
    fn queue_positions_from_nested_payload() {
        let payload = json!({
            "queue_positions": [
                {"order_id": "abc", "queue_position": 12},
                {"market_ticker": "KXBTC15M-TEST", "position": 9}
            ]
        });
        let result = extract_queue_positions(&payload);
        assert_eq!(result.get("abc"), Some(&12));
        assert_eq!(result.get("KXBTC15M-TEST"), Some(&9));
    }

    #[test]
    fn queue_positions_keyed_by_parent() {
        let payload = json!({
            "orders": {
                "ord-7": {"queue_position": 3},
                "ord-8": {"queue_position": "5"}
            }
        });
        let result = extract_queue_positions(&payload);
        assert_eq!(result.get("ord-7"), Some(&3));
        assert_eq!(result.get("ord-8"), Some(&5));
    }
}
