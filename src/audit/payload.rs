//! Kind-specific payload schemas.
//!
//! Each entry kind carries one fixed payload shape. Shape is enforced when a
//! payload is decoded (`EntryPayload::from_value`); value constraints such as
//! positive prices are enforced by the entry builder through
//! [`EntryPayload::validate`], so a stored entry whose numbers were edited on
//! disk still decodes and is caught by hash verification instead.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::LogError;

/// Closed set of entry kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Decision,
    Trade,
    Snapshot,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Decision => "decision",
            EntryKind::Trade => "trade",
            EntryKind::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "decision" => Ok(EntryKind::Decision),
            "trade" => Ok(EntryKind::Trade),
            "snapshot" => Ok(EntryKind::Snapshot),
            _ => Err(LogError::invalid_payload(s, "unknown entry kind")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    OpenPosition,
    ClosePosition,
    Hold,
    NoTrade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

/// A strategy decision, including decisions not to trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecisionPayload {
    pub symbol: String,
    pub action: DecisionAction,
    pub edge_bps: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_edge_bps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funding_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mark_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_leverage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// An executed fill. Closing trades carry `realized_pnl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TradePayload {
    pub symbol: String,
    pub side: Side,
    pub size: f64,
    pub price: f64,
    pub fee: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realized_pnl: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub size: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub unrealized_pnl: f64,
    pub leverage: f64,
}

/// Periodic account state sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotPayload {
    pub account_value: f64,
    pub margin_used: f64,
    #[serde(default)]
    pub open_positions: Vec<PositionSnapshot>,
    pub cumulative_pnl: f64,
    /// Fractional drawdown from peak over the window, in `[0, 1]`.
    pub drawdown: f64,
    pub window_hours: f64,
}

/// Tagged payload; the tag is the entry's `kind`.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryPayload {
    Decision(DecisionPayload),
    Trade(TradePayload),
    Snapshot(SnapshotPayload),
}

impl EntryPayload {
    pub fn kind(&self) -> EntryKind {
        match self {
            EntryPayload::Decision(_) => EntryKind::Decision,
            EntryPayload::Trade(_) => EntryKind::Trade,
            EntryPayload::Snapshot(_) => EntryKind::Snapshot,
        }
    }

    /// Decode a dynamic payload against the schema for `kind`.
    pub fn from_value(kind: EntryKind, value: Value) -> Result<Self, LogError> {
        let shape_error = |e: serde_json::Error| LogError::invalid_payload(kind, e.to_string());
        match kind {
            EntryKind::Decision => serde_json::from_value(value)
                .map(EntryPayload::Decision)
                .map_err(shape_error),
            EntryKind::Trade => serde_json::from_value(value)
                .map(EntryPayload::Trade)
                .map_err(shape_error),
            EntryKind::Snapshot => serde_json::from_value(value)
                .map(EntryPayload::Snapshot)
                .map_err(shape_error),
        }
    }

    pub fn to_value(&self) -> Value {
        let encoded = match self {
            EntryPayload::Decision(p) => serde_json::to_value(p),
            EntryPayload::Trade(p) => serde_json::to_value(p),
            EntryPayload::Snapshot(p) => serde_json::to_value(p),
        };
        // Plain structs with string keys and finite-or-null numbers cannot fail.
        encoded.unwrap_or(Value::Null)
    }

    /// Value constraints beyond shape.
    pub fn validate(&self) -> Result<(), LogError> {
        let kind = self.kind();
        let mut checks = Checks::new(kind);
        match self {
            EntryPayload::Decision(p) => {
                checks.symbol(&p.symbol);
                checks.finite("edge_bps", p.edge_bps);
                checks.optional_finite("target_edge_bps", p.target_edge_bps);
                checks.optional_finite("funding_rate", p.funding_rate);
                if let Some(price) = p.mark_price {
                    checks.positive("mark_price", price);
                }
                if let Some(leverage) = p.max_leverage {
                    checks.positive("max_leverage", leverage);
                }
            }
            EntryPayload::Trade(p) => {
                checks.symbol(&p.symbol);
                checks.positive("size", p.size);
                checks.positive("price", p.price);
                checks.non_negative("fee", p.fee);
                checks.optional_finite("realized_pnl", p.realized_pnl);
                if matches!(&p.order_id, Some(id) if id.trim().is_empty()) {
                    checks.fail("order_id must not be empty");
                }
            }
            EntryPayload::Snapshot(p) => {
                checks.non_negative("account_value", p.account_value);
                checks.non_negative("margin_used", p.margin_used);
                checks.finite("cumulative_pnl", p.cumulative_pnl);
                checks.finite("drawdown", p.drawdown);
                if !(0.0..=1.0).contains(&p.drawdown) {
                    checks.fail("drawdown must be a fraction in [0, 1]");
                }
                checks.positive("window_hours", p.window_hours);
                for position in &p.open_positions {
                    checks.symbol(&position.symbol);
                    checks.finite("open_positions.size", position.size);
                    checks.positive("open_positions.entry_price", position.entry_price);
                    checks.positive("open_positions.mark_price", position.mark_price);
                    checks.finite("open_positions.unrealized_pnl", position.unrealized_pnl);
                    checks.positive("open_positions.leverage", position.leverage);
                }
            }
        }
        checks.finish()
    }
}

impl From<DecisionPayload> for EntryPayload {
    fn from(payload: DecisionPayload) -> Self {
        EntryPayload::Decision(payload)
    }
}

impl From<TradePayload> for EntryPayload {
    fn from(payload: TradePayload) -> Self {
        EntryPayload::Trade(payload)
    }
}

impl From<SnapshotPayload> for EntryPayload {
    fn from(payload: SnapshotPayload) -> Self {
        EntryPayload::Snapshot(payload)
    }
}

/// Collects the first constraint violation.
struct Checks {
    kind: EntryKind,
    failure: Option<String>,
}

impl Checks {
    fn new(kind: EntryKind) -> Self {
        Self {
            kind,
            failure: None,
        }
    }

    fn fail(&mut self, reason: impl Into<String>) {
        if self.failure.is_none() {
            self.failure = Some(reason.into());
        }
    }

    fn symbol(&mut self, symbol: &str) {
        if symbol.trim().is_empty() {
            self.fail("symbol must not be empty");
        }
    }

    fn finite(&mut self, field: &str, value: f64) {
        if !value.is_finite() {
            self.fail(format!("{} must be finite", field));
        }
    }

    fn optional_finite(&mut self, field: &str, value: Option<f64>) {
        if let Some(value) = value {
            self.finite(field, value);
        }
    }

    fn positive(&mut self, field: &str, value: f64) {
        if !(value.is_finite() && value > 0.0) {
            self.fail(format!("{} must be positive, got {}", field, value));
        }
    }

    fn non_negative(&mut self, field: &str, value: f64) {
        if !(value.is_finite() && value >= 0.0) {
            self.fail(format!("{} must not be negative, got {}", field, value));
        }
    }

    fn finish(self) -> Result<(), LogError> {
        match self.failure {
            Some(reason) => Err(LogError::invalid_payload(self.kind, reason)),
            None => Ok(()),
        }
    }
}
