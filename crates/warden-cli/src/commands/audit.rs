//! `warden audit`: verify and inspect the audit chain.

use std::path::Path;

use anyhow::{bail, Context, Result};
use uuid::Uuid;

use warden_ledger::{verify_path, AuditChain, AuditEvent, VerificationReport, VerifyScope};
use warden_types::WardenConfig;

/// Run `warden audit verify`. Returns whether the chain is intact.
pub fn verify(config: &WardenConfig, session: Option<&str>, json: bool) -> Result<bool> {
    let scope = match session {
        Some(id) => VerifyScope::Session(
            Uuid::parse_str(id).with_context(|| format!("invalid session id: {id}"))?,
        ),
        None => VerifyScope::Full,
    };
    let report = verify_path(&config.ledger_path, scope, config.max_reported_errors)
        .context("failed to verify audit chain")?;
    println!("{}", render_report(&report, json)?);
    Ok(report.valid)
}

pub fn render_report(report: &VerificationReport, json: bool) -> Result<String> {
    if json {
        return serde_json::to_string_pretty(report).context("failed to serialize report");
    }
    Ok(report.to_human())
}

/// Run `warden audit tail`.
pub fn tail(config: &WardenConfig, last: usize, session: Option<&str>) -> Result<()> {
    let events = load_events(&config.ledger_path, last, session)?;
    if events.is_empty() {
        println!("No audit events found.");
        return Ok(());
    }
    print_table(&events);
    Ok(())
}

fn load_events(path: &Path, last: usize, session: Option<&str>) -> Result<Vec<AuditEvent>> {
    if !path.exists() {
        bail!("audit database not found: {}", path.display());
    }
    let chain = AuditChain::open(path).context("failed to open audit chain")?;
    let events = match session {
        Some(id) => {
            let id = Uuid::parse_str(id).with_context(|| format!("invalid session id: {id}"))?;
            let mut events = chain.events_for_session(id)?;
            let skip = events.len().saturating_sub(last);
            events.drain(..skip);
            events
        }
        None => chain.last(last)?,
    };
    Ok(events)
}

fn print_table(events: &[AuditEvent]) {
    println!(
        "{:<20} {:<18} {:<10} {:<14} PAYLOAD",
        "TIMESTAMP", "EVENT", "HASH", "PROMPT"
    );
    println!("{}", "-".repeat(96));
    for event in events {
        let prompt = event
            .prompt_id
            .as_ref()
            .map(|p| truncate(p.as_str(), 14))
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<20} {:<18} {:<10} {:<14} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.event_type,
            &event.hash[..event.hash.len().min(8)],
            prompt,
            truncate(&event.payload, 60),
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}
