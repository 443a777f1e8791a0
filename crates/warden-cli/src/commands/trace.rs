//! `warden trace tail`: read recent decisions from the NDJSON trace.

use anyhow::{Context, Result};

use warden_ledger::{read_tail, TraceRecord};
use warden_types::WardenConfig;

pub fn tail(config: &WardenConfig, last: usize, json: bool) -> Result<()> {
    let records = read_tail(&config.trace.path, last).context("failed to read decision trace")?;
    if records.is_empty() {
        println!("No decisions recorded.");
        return Ok(());
    }
    for record in &records {
        println!("{}", render_record(record, json)?);
    }
    Ok(())
}

fn render_record(record: &TraceRecord, json: bool) -> Result<String> {
    if json {
        return serde_json::to_string(record).context("failed to serialize trace record");
    }
    let rule = record
        .decision
        .matched_rule
        .as_ref()
        .map(|r| r.name.as_str())
        .unwrap_or("-");
    let outcome = record
        .result
        .as_ref()
        .map(|r| format!("{:?}{}", r.effect, if r.success { "" } else { " (failed)" }))
        .unwrap_or_else(|| "-".into());
    Ok(format!(
        "{} [{}] {} {} rule={} reason={} risk={}({}) -> {}",
        record.timestamp.format("%Y-%m-%d %H:%M:%S"),
        record.engine_mode,
        record.prompt_id,
        record.decision.action,
        rule,
        record.decision.reason,
        record.decision.risk.category,
        record.decision.risk.score,
        outcome,
    ))
}
