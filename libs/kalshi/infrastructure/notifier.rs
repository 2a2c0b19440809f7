//! Telegram notifier: outbound digests and inbound control commands.
//!
//! Delivery failures never propagate; every send attempt (success or not)
//! becomes one [`AlertEvent`] row for the store.

use crate::application::analysis::AccuracyReport;
use crate::domain::models::{AlertEvent, Direction, OrderStatus, PaperOrder, SignalRecord};
use crate::infrastructure::config::Settings;
use crate::infrastructure::database::{FillMetrics, OpenPosition, PaperOrderRow, SignalRow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

/// Runtime state snapshot shown by `/status`
#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub mode: String,
    pub paused: bool,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub last_metrics: String,
}

/// Control surface the notifier drives on behalf of chat commands.
///
/// Implemented by the pipeline; injected so command handling stays
/// testable without Telegram.
#[async_trait]
pub trait BotControl: Send + Sync {
    fn runtime_status(&self) -> RuntimeStatus;
    fn set_paused(&self, paused: bool);
    fn mode_name(&self) -> String;
    /// Two-phase for live modes: returns the confirmation prompt.
    fn request_mode_change(&self, requested_mode: &str) -> String;
    fn confirm_live_mode(&self) -> String;
    async fn open_positions(&self) -> Vec<OpenPosition>;
    async fn recent_orders(&self, limit: i64) -> Vec<PaperOrderRow>;
    async fn recent_signals(&self, limit: i64) -> Vec<SignalRow>;
    async fn accuracy_report(&self, days: i64) -> AccuracyReport;
    async fn fill_metrics(&self, days: i64) -> FillMetrics;
    async fn balance_snapshot(&self) -> Option<String>;
}

fn format_edge_bps(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded > 0.0 {
        format!("+{rounded} bps")
    } else {
        format!("{rounded} bps")
    }
}

fn format_prob(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}

fn format_pct(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.1}%", v * 100.0),
        None => "n/a".to_string(),
    }
}

fn format_opt(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.4}", v),
        None => "n/a".to_string(),
    }
}

fn signal_icon(signal: &SignalRecord) -> &'static str {
    match signal.signal_type {
        crate::domain::models::SignalType::Weather => "🌤️",
        crate::domain::models::SignalType::Btc => "₿",
        crate::domain::models::SignalType::Arb => "📊",
    }
}

fn direction_label(direction: Direction) -> String {
    match direction {
        Direction::BuyYes => "🟢 BUY YES".to_string(),
        Direction::BuyNo => "🔴 BUY NO".to_string(),
        other => other.as_str().replace('_', " ").to_uppercase(),
    }
}

fn order_status_icon(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Submitted => "✅",
        OrderStatus::Simulated => "🧪",
        OrderStatus::Failed => "❌",
        _ => "ℹ️",
    }
}

/// Telegram Bot API client
pub struct TelegramNotifier {
    settings: Settings,
    http: reqwest::Client,
    updates_offset: Mutex<i64>,
}

impl TelegramNotifier {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            http: reqwest::Client::new(),
            updates_offset: Mutex::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.telegram.enabled
            && !self.settings.telegram.bot_token.is_empty()
            && !self.settings.telegram.chat_id.is_empty()
    }

    /// Send the signal digest and (optionally) the execution digest.
    pub async fn notify(
        &self,
        now_utc: DateTime<Utc>,
        signals: &[SignalRecord],
        paper_orders: &[PaperOrder],
    ) -> Vec<AlertEvent> {
        if !self.is_enabled() {
            return Vec::new();
        }
        let mut events = Vec::new();
        if let Some(event) = self.send_signal_digest(now_utc, signals).await {
            events.push(event);
        }
        if self.settings.telegram.notify_execution_events && !paper_orders.is_empty() {
            if let Some(event) = self.send_execution_digest(now_utc, paper_orders).await {
                events.push(event);
            }
        }
        events
    }

    /// One alert event per operational message.
    pub async fn notify_operational_alerts(
        &self,
        now_utc: DateTime<Utc>,
        messages: &[String],
    ) -> Vec<AlertEvent> {
        if !self.is_enabled() || messages.is_empty() {
            return Vec::new();
        }
        let mut events = Vec::with_capacity(messages.len());
        for message in messages {
            let (status, metadata) = self.send_message(message).await;
            events.push(AlertEvent {
                channel: "telegram".to_string(),
                event_type: "operational_alert".to_string(),
                market_ticker: None,
                message: message.clone(),
                status,
                metadata,
                created_at: now_utc,
            });
        }
        events
    }

    /// Long-poll the bot for commands and dispatch them against the
    /// control surface.
    pub async fn poll_commands(&self, control: &dyn BotControl) -> Vec<AlertEvent> {
        if !self.is_enabled() {
            return Vec::new();
        }
        let updates = self.fetch_updates().await;
        if updates.is_empty() {
            return Vec::new();
        }
        let configured_chat = self.settings.telegram.chat_id.trim();
        let mut events = Vec::new();
        for update in updates {
            let message = match update.get("message") {
                Some(message) if message.is_object() => message,
                _ => continue,
            };
            let chat_id = message
                .get("chat")
                .and_then(|chat| chat.get("id"))
                .map(|id| id.to_string().trim_matches('"').to_string())
                .unwrap_or_default();
            if !configured_chat.is_empty() && chat_id != configured_chat {
                continue;
            }
            let text = message
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or("")
                .trim()
                .to_string();
            if text.is_empty() {
                continue;
            }
            let response_text = match self.handle_command(&text, control).await {
                Some(response) => response,
                None => continue,
            };
            let (status, metadata) = self.send_message(&response_text).await;
            events.push(AlertEvent {
                channel: "telegram".to_string(),
                event_type: "telegram_command".to_string(),
                market_ticker: None,
                message: response_text,
                status,
                metadata: json!({"request_text": text, "send": metadata}),
                created_at: Utc::now(),
            });
        }
        events
    }

    async fn handle_command(&self, text: &str, control: &dyn BotControl) -> Option<String> {
        let normalized = text.trim();
        let lower = normalized.to_lowercase();

        if lower == "confirm live" {
            return Some(control.confirm_live_mode());
        }
        if lower == "/status" {
            let status = control.runtime_status();
            return Some(format!(
                "📡 Bot Status\nmode={}\npaused={}\nlast_poll={}\nlast_metrics={}",
                status.mode,
                status.paused,
                status
                    .last_poll_at
                    .map(|ts| ts.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string()),
                status.last_metrics,
            ));
        }
        if lower == "/pause" {
            control.set_paused(true);
            return Some("⏸️ Trading paused. Data collection is still running.".to_string());
        }
        if lower == "/resume" {
            control.set_paused(false);
            return Some("▶️ Trading resumed.".to_string());
        }
        if lower.starts_with("/mode") {
            let mut parts = normalized.split_whitespace();
            parts.next();
            return Some(match parts.next() {
                None => format!("Current mode: {}", control.mode_name()),
                Some(requested) => control.request_mode_change(requested),
            });
        }
        if lower == "/positions" {
            let positions = control.open_positions().await;
            if positions.is_empty() {
                return Some("No open submitted positions.".to_string());
            }
            let mut lines = vec!["📦 Open Positions".to_string()];
            for row in positions.iter().take(10) {
                lines.push(format!(
                    "{} side={} contracts={} avg={:.2}c",
                    row.market_ticker,
                    row.side.to_uppercase(),
                    row.contracts,
                    row.avg_price_cents,
                ));
            }
            return Some(lines.join("\n"));
        }
        if lower == "/orders" {
            let orders = control.recent_orders(10).await;
            if orders.is_empty() {
                return Some("No recent paper orders.".to_string());
            }
            let mut lines = vec!["🧾 Recent Orders".to_string()];
            for row in orders.iter().take(10) {
                lines.push(format!(
                    "{} {} {} x{} @ {}c -> {}",
                    row.created_at.format("%m-%d %H:%M"),
                    row.market_ticker,
                    row.side.to_uppercase(),
                    row.count,
                    row.limit_price_cents,
                    row.status,
                ));
            }
            return Some(lines.join("\n"));
        }
        if lower == "/signals" {
            let signals = control.recent_signals(10).await;
            if signals.is_empty() {
                return Some("No recent signals.".to_string());
            }
            let mut lines = vec!["🧠 Recent Signals".to_string()];
            for row in signals.iter().take(10) {
                lines.push(format!(
                    "{} {} {} {} edge={:.2}bps conf={:.3}",
                    row.created_at.format("%m-%d %H:%M"),
                    row.signal_type,
                    row.market_ticker,
                    row.direction,
                    row.edge_bps,
                    row.confidence,
                ));
            }
            return Some(lines.join("\n"));
        }
        if lower.starts_with("/accuracy") {
            let days = parse_days_argument(normalized, 30);
            let report = control.accuracy_report(days).await;
            return Some(format!(
                "📈 Accuracy ({days}d)\nn_signals={}\nbrier={}\nmarket_brier={}\nlog_loss={}\nedge_reliability={}\nhit_rate={}\navg_pnl_per_contract={}\ntotal_pnl={}\nsharpe_proxy={}",
                report.n_signals,
                format_opt(report.brier_score),
                format_opt(report.market_brier_score),
                format_opt(report.log_loss),
                format_opt(report.edge_reliability),
                format_pct(report.hit_rate),
                format_opt(report.avg_pnl_per_contract),
                format_opt(report.total_pnl),
                format_opt(report.sharpe_proxy),
            ));
        }
        if lower.starts_with("/fills") {
            let days = parse_days_argument(normalized, 30);
            let metrics = control.fill_metrics(days).await;
            return Some(format!(
                "📦 Fill Metrics ({days}d)\ntotal_orders={}\nfilled_orders={}\nopen_orders={}\ncanceled_orders={}\nfailed_orders={}\nfill_rate={}\navg_fill_minutes={}",
                metrics.total_orders,
                metrics.filled_orders,
                metrics.open_orders,
                metrics.canceled_orders,
                metrics.failed_orders,
                format_pct(metrics.fill_rate),
                metrics
                    .avg_fill_minutes
                    .map(|v| format!("{v:.2}"))
                    .unwrap_or_else(|| "n/a".to_string()),
            ));
        }
        if lower == "/balance" {
            return Some(match control.balance_snapshot().await {
                Some(balance) => format!("💵 Balance\n{balance}"),
                None => "Balance unavailable for current mode.".to_string(),
            });
        }
        None
    }

    async fn send_signal_digest(
        &self,
        now_utc: DateTime<Utc>,
        signals: &[SignalRecord],
    ) -> Option<AlertEvent> {
        let mut selected: Vec<&SignalRecord> = if self.settings.telegram.notify_actionable_only {
            signals
                .iter()
                .filter(|signal| {
                    signal.is_actionable()
                        && signal.edge_bps.abs() >= self.settings.telegram.min_edge_bps as f64
                })
                .collect()
        } else {
            signals.iter().collect()
        };
        if selected.is_empty() {
            return None;
        }
        selected.sort_by(|a, b| {
            b.edge_bps
                .abs()
                .partial_cmp(&a.edge_bps.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut lines = vec![
            "🧠 Kalshi Bot Signal Digest".to_string(),
            format!("🕒 {}", now_utc.to_rfc3339()),
            format!(
                "📊 Total={} | Sent={} | MinEdge={} bps",
                signals.len(),
                selected.len(),
                self.settings.telegram.min_edge_bps
            ),
            String::new(),
        ];
        for (idx, signal) in selected.iter().take(5).enumerate() {
            lines.push(format!(
                "{}) {} {} • {}\n   {} | edge={}\n   🤖 model={} | 🏛️ market={}",
                idx + 1,
                signal_icon(signal),
                signal.signal_type.as_str().to_uppercase(),
                signal.market_ticker,
                direction_label(signal.direction),
                format_edge_bps(signal.edge_bps),
                format_prob(signal.model_probability),
                format_prob(signal.market_probability),
            ));
        }
        let message = lines.join("\n");
        let (status, metadata) = self.send_message(&message).await;
        Some(AlertEvent {
            channel: "telegram".to_string(),
            event_type: "signal_digest".to_string(),
            market_ticker: None,
            message,
            status,
            metadata,
            created_at: now_utc,
        })
    }

    async fn send_execution_digest(
        &self,
        now_utc: DateTime<Utc>,
        orders: &[PaperOrder],
    ) -> Option<AlertEvent> {
        let submitted = orders
            .iter()
            .filter(|o| o.status == OrderStatus::Submitted)
            .count();
        let simulated = orders
            .iter()
            .filter(|o| o.status == OrderStatus::Simulated)
            .count();
        let failed = orders
            .iter()
            .filter(|o| o.status == OrderStatus::Failed)
            .count();
        let mut lines = vec![
            "🤖 Kalshi Bot Paper Executions".to_string(),
            format!("🕒 {}", now_utc.to_rfc3339()),
            format!(
                "📦 Orders={} | ✅ Submitted={submitted} | 🧪 Simulated={simulated} | ❌ Failed={failed}",
                orders.len()
            ),
            String::new(),
        ];
        for (idx, order) in orders.iter().take(5).enumerate() {
            let reason_suffix = match (&order.status, &order.reason) {
                (OrderStatus::Failed, Some(reason)) => {
                    let mut reason_text = reason.replace('\n', " ").trim().to_string();
                    if reason_text.len() > 140 {
                        reason_text.truncate(137);
                        reason_text.push_str("...");
                    }
                    format!("\n   ⚠️ reason={reason_text}")
                }
                _ => String::new(),
            };
            lines.push(format!(
                "{}) {} {}\n   {} | side={} | qty={} | px={}c | status={}{}",
                idx + 1,
                order_status_icon(order.status),
                order.market_ticker,
                direction_label(order.direction),
                order.side.as_str().to_uppercase(),
                order.count,
                order.limit_price_cents,
                order.status.as_str().to_uppercase(),
                reason_suffix,
            ));
        }
        let message = lines.join("\n");
        let (status, metadata) = self.send_message(&message).await;
        Some(AlertEvent {
            channel: "telegram".to_string(),
            event_type: "paper_execution_digest".to_string(),
            market_ticker: None,
            message,
            status,
            metadata,
            created_at: now_utc,
        })
    }

    async fn fetch_updates(&self) -> Vec<Value> {
        let url = format!(
            "https://api.telegram.org/bot{}/getUpdates",
            self.settings.telegram.bot_token
        );
        let offset = *self.updates_offset.lock();
        let response = self
            .http
            .get(&url)
            .query(&[("timeout", "0"), ("offset", &offset.to_string())])
            .timeout(Duration::from_secs(10))
            .send()
            .await;
        let payload: Value = match response {
            Ok(response) if response.status().is_success() => {
                match response.json().await {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(error = %e, "telegram_get_updates_decode_failed");
                        return Vec::new();
                    }
                }
            }
            Ok(response) => {
                warn!(status = %response.status(), "telegram_get_updates_failed");
                return Vec::new();
            }
            Err(e) => {
                warn!(error = %e, "telegram_get_updates_failed");
                return Vec::new();
            }
        };
        let updates = payload
            .get("result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut offset_guard = self.updates_offset.lock();
        for update in &updates {
            if let Some(update_id) = update.get("update_id").and_then(Value::as_i64) {
                *offset_guard = (*offset_guard).max(update_id + 1);
            }
        }
        updates
            .into_iter()
            .filter(|update| update.is_object())
            .collect()
    }

    async fn send_message(&self, message: &str) -> (String, Value) {
        let url = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            self.settings.telegram.bot_token
        );
        let payload = json!({
            "chat_id": self.settings.telegram.chat_id,
            "text": message,
        });
        let response = self
            .http
            .post(&url)
            .json(&payload)
            .timeout(Duration::from_secs(15))
            .send()
            .await;
        match response {
            Ok(response) if response.status().is_success() => {
                let ok = response
                    .json::<Value>()
                    .await
                    .ok()
                    .and_then(|body| body.get("ok").and_then(Value::as_bool))
                    .unwrap_or(true);
                ("sent".to_string(), json!({"ok": ok}))
            }
            Ok(response) => {
                warn!(status = %response.status(), "telegram_send_failed");
                (
                    "failed".to_string(),
                    json!({"error": format!("http_{}", response.status().as_u16())}),
                )
            }
            Err(e) => {
                warn!(error = %e, "telegram_send_failed");
                ("failed".to_string(), json!({"error": "request_exception"}))
            }
        }
    }
}

fn parse_days_argument(text: &str, default: i64) -> i64 {
    text.split_whitespace()
        .nth(1)
        .and_then(|arg| arg.parse::<i64>().ok())
        .map(|days| days.max(1))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_without_token_or_chat() {
        let notifier = TelegramNotifier::new(Settings::default());
        assert!(!notifier.is_enabled());

        let mut settings = Settings::default();
        settings.telegram.enabled = true;
        settings.telegram.bot_token = "token".to_string();
        assert!(!TelegramNotifier::new(settings.clone()).is_enabled());
        settings.telegram.chat_id = "123".to_string();
        assert!(TelegramNotifier::new(settings).is_enabled());
    }

    #[tokio::test]
    async fn disabled_notifier_emits_no_events() {
        let notifier = TelegramNotifier::new(Settings::default());
        let events = notifier.notify(Utc::now(), &[], &[]).await;
        assert!(events.is_empty());
        let alerts = notifier
            .notify_operational_alerts(Utc::now(), &["alert".to_string()])
            .await;
        assert!(alerts.is_empty());
    }

    #[test]
    fn days_argument_parsing() {
        assert_eq!(parse_days_argument("/accuracy", 30), 30);
        assert_eq!(parse_days_argument("/accuracy 7", 30), 7);
        assert_eq!(parse_days_argument("/accuracy zero", 30), 30);
        assert_eq!(parse_days_argument("/fills -3", 30), 1);
    }

    #[test]
    fn edge_formatting_keeps_sign() {
        assert_eq!(format_edge_bps(123.456), "+123.46 bps");
        assert_eq!(format_edge_bps(-80.0), "-80 bps");
    }
}
