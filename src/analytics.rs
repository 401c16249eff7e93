//! PnL summary derived from closed trades in the log.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::audit::entry::LogEntry;
use crate::audit::payload::{EntryPayload, SnapshotPayload};
use crate::error::{LogError, Result};
use crate::store::LogStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PnlSummary {
    pub cumulative_pnl: f64,
    pub realized_pnl_window: f64,
    pub window_hours: f64,
    /// Largest peak-to-trough fall of cumulative realized PnL.
    pub max_drawdown: f64,
    pub closed_trades: usize,
    pub latest_snapshot: Option<SnapshotPayload>,
}

fn window_start(now: DateTime<Utc>, window_hours: f64) -> DateTime<Utc> {
    // Float to int casts saturate; an out-of-range delta yields None.
    Duration::try_milliseconds((window_hours * 3_600_000.0) as i64)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Summarize `entries` (ascending) as of `now`.
///
/// A trade counts as closed when it carries `realized_pnl`. The peak starts at
/// zero, so a losing first trade already counts as drawdown. A window reaching
/// past the earliest representable time covers the whole log.
pub fn compute_pnl_summary(entries: &[LogEntry], window_hours: f64, now: DateTime<Utc>) -> PnlSummary {
    let cutoff = window_start(now, window_hours);

    let mut cumulative = 0.0;
    let mut peak = 0.0_f64;
    let mut max_drawdown = 0.0_f64;
    let mut window = 0.0;
    let mut closed_trades = 0;
    let mut latest_snapshot = None;

    for entry in entries {
        match &entry.payload {
            EntryPayload::Trade(trade) => {
                let Some(pnl) = trade.realized_pnl else {
                    continue;
                };
                closed_trades += 1;
                cumulative += pnl;
                peak = peak.max(cumulative);
                max_drawdown = max_drawdown.max(peak - cumulative);
                if entry.timestamp >= cutoff {
                    window += pnl;
                }
            }
            EntryPayload::Snapshot(snapshot) => latest_snapshot = Some(snapshot.clone()),
            EntryPayload::Decision(_) => {}
        }
    }

    PnlSummary {
        cumulative_pnl: round4(cumulative),
        realized_pnl_window: round4(window),
        window_hours,
        max_drawdown: round4(max_drawdown),
        closed_trades,
        latest_snapshot,
    }
}

/// Summarize every committed entry in `store`.
pub async fn pnl_summary(store: &LogStore, window_hours: f64) -> Result<PnlSummary> {
    if !window_hours.is_finite() || window_hours <= 0.0 {
        return Err(LogError::ConfigError(format!(
            "window_hours must be positive, got {}",
            window_hours
        )));
    }
    let entries = store.read_range(1, store.len().await + 1).await?;
    Ok(compute_pnl_summary(&entries, window_hours, Utc::now()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::builder::EntryBuilder;
    use crate::audit::payload::{Side, TradePayload};
    use crate::store::TailCursor;

    fn close(pnl: f64) -> EntryPayload {
        EntryPayload::Trade(TradePayload {
            symbol: "BTC".to_string(),
            side: Side::Sell,
            size: 0.01,
            price: 70_000.0,
            fee: 0.3,
            order_id: None,
            realized_pnl: Some(pnl),
        })
    }

    fn build(payloads: Vec<(EntryPayload, DateTime<Utc>)>) -> Vec<LogEntry> {
        let builder = EntryBuilder::unsigned();
        let mut cursor = TailCursor::genesis();
        let mut out = Vec::new();
        for (payload, at) in payloads {
            let entry = builder.build_at(payload, &cursor, at).unwrap();
            cursor = TailCursor::of(&entry);
            out.push(entry);
        }
        out
    }

    #[test]
    fn test_drawdown_and_window() {
        let now = Utc::now();
        let old = now - Duration::hours(48);
        let entries = build(vec![
            (close(10.0), old),
            (close(-4.0), old),
            (close(-3.0), now - Duration::hours(1)),
            (close(5.0), now),
        ]);

        let summary = compute_pnl_summary(&entries, 24.0, now);
        assert_eq!(summary.closed_trades, 4);
        assert_eq!(summary.cumulative_pnl, 8.0);
        assert_eq!(summary.max_drawdown, 7.0);
        assert_eq!(summary.realized_pnl_window, 2.0);
        assert!(summary.latest_snapshot.is_none());
    }

    #[test]
    fn test_huge_window_covers_everything() {
        let now = Utc::now();
        let entries = build(vec![
            (close(10.0), now - Duration::days(3650)),
            (close(-4.0), now),
        ]);

        for hours in [1e15, f64::MAX] {
            let summary = compute_pnl_summary(&entries, hours, now);
            assert_eq!(summary.realized_pnl_window, 6.0);
        }
        assert_eq!(window_start(now, 1e15), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn test_open_trades_ignored() {
        let now = Utc::now();
        let mut open = close(0.0);
        if let EntryPayload::Trade(trade) = &mut open {
            trade.realized_pnl = None;
            trade.side = Side::Buy;
        }
        let entries = build(vec![(open, now), (close(-2.5), now)]);
        let summary = compute_pnl_summary(&entries, 24.0, now);
        assert_eq!(summary.closed_trades, 1);
        assert_eq!(summary.max_drawdown, 2.5);
    }
}
