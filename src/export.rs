//! NDJSON export of committed entries.
//!
//! Output is one entry per line in ascending sequence order, using the same
//! JSON form the file backend stores, so repeated exports of an unchanged log
//! are byte-identical.

use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::audit::entry::LogEntry;
use crate::error::{LogError, Result};
use crate::store::file::split_records;
use crate::store::recovery::{self, RecoveryReport};
use crate::store::LogStore;

pub fn to_ndjson(entries: &[LogEntry]) -> Result<String> {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&entry.to_json_line()?);
        out.push('\n');
    }
    Ok(out)
}

pub fn write_ndjson<W: Write>(entries: &[LogEntry], mut writer: W) -> Result<()> {
    writer.write_all(to_ndjson(entries)?.as_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Parse an export back into entries, skipping blank lines.
pub fn parse_ndjson(text: &str) -> Result<Vec<LogEntry>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| LogEntry::from_json_line(line, i as u64 + 1))
        .collect()
}

/// Parse a log file or export whose last records may be torn, dropping at
/// most `tolerance` damaged trailing records the way the store does at open.
pub fn parse_ndjson_recovering(bytes: &[u8], tolerance: usize) -> Result<(Vec<LogEntry>, RecoveryReport)> {
    let (records, _) = split_records(bytes);
    let report = recovery::plan(&records, records.len(), tolerance)?;

    let mut entries = Vec::with_capacity(report.kept);
    for record in &records[..report.kept] {
        let line = std::str::from_utf8(&record.bytes)
            .map_err(|e| LogError::corrupt(record.position, e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        entries.push(LogEntry::from_json_line(line, record.position)?);
    }
    Ok((entries, report))
}

/// The last `limit` entries of `store` as NDJSON.
pub async fn export_tail(store: &LogStore, limit: usize) -> Result<String> {
    let entries = store.tail(limit).await?;
    to_ndjson(&entries)
}

/// Write the last `limit` entries to `path`, replacing its contents.
pub async fn export_tail_to_file(store: &LogStore, limit: usize, path: &Path) -> Result<usize> {
    let entries = store.tail(limit).await?;
    let file = std::fs::File::create(path)?;
    write_ndjson(&entries, std::io::BufWriter::new(file))?;
    info!("Exported {} entries to {:?}", entries.len(), path);
    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::builder::EntryBuilder;
    use crate::audit::payload::EntryKind;
    use crate::store::TailCursor;
    use serde_json::json;

    #[test]
    fn test_ndjson_lines_and_parse() {
        let builder = EntryBuilder::unsigned();
        let first = builder
            .build(
                EntryKind::Trade,
                json!({"symbol": "ETH", "side": "sell", "size": 1.5, "price": 3400.0, "fee": 0.9}),
                &TailCursor::genesis(),
            )
            .unwrap();
        let second = builder
            .build(
                EntryKind::Decision,
                json!({"symbol": "ETH", "action": "hold", "edge_bps": 1.0}),
                &TailCursor::of(&first),
            )
            .unwrap();

        let entries = vec![first, second];
        let text = to_ndjson(&entries).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.ends_with('\n'));
        assert_eq!(text, to_ndjson(&entries).unwrap());

        let parsed = parse_ndjson(&text).unwrap();
        assert_eq!(parsed, entries);
    }

    #[test]
    fn test_torn_last_line_is_skipped() {
        let builder = EntryBuilder::unsigned();
        let first = builder
            .build(
                EntryKind::Decision,
                json!({"symbol": "SOL", "action": "no_trade", "edge_bps": 0.5}),
                &TailCursor::genesis(),
            )
            .unwrap();
        let second = builder
            .build(
                EntryKind::Decision,
                json!({"symbol": "SOL", "action": "no_trade", "edge_bps": 0.7}),
                &TailCursor::of(&first),
            )
            .unwrap();

        let mut text = to_ndjson(&[first.clone()]).unwrap();
        let line = second.to_json_line().unwrap();
        text.push_str(&line[..line.len() / 2]);

        assert!(parse_ndjson(&text).is_err());
        let (entries, report) = parse_ndjson_recovering(text.as_bytes(), 1).unwrap();
        assert_eq!(entries, vec![first.clone()]);
        assert_eq!(report.discarded, 1);

        let clean = to_ndjson(&[first, second]).unwrap();
        let (entries, report) = parse_ndjson_recovering(clean.as_bytes(), 1).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(report.is_clean());

        let two_torn = format!("{}garbage\n{}", to_ndjson(&entries[..1]).unwrap(), &line[..5]);
        assert!(matches!(
            parse_ndjson_recovering(two_torn.as_bytes(), 1),
            Err(LogError::RecoveryToleranceExceeded { .. })
        ));
    }

    #[test]
    fn test_empty_export() {
        assert_eq!(to_ndjson(&[]).unwrap(), "");
        assert!(parse_ndjson("\n\n").unwrap().is_empty());
    }
}
