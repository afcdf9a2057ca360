//! Print persisted motion events.

use std::path::PathBuf;

use stillwatch_common::config::AppConfig;
use stillwatch_engine::event_log::load_events;

pub fn run(config: &AppConfig, path: Option<PathBuf>, limit: usize, json: bool) -> anyhow::Result<()> {
    let path = path.unwrap_or_else(|| config.storage.event_log.clone());
    let events = load_events(&path)
        .map_err(|e| anyhow::anyhow!("Failed to read event log {}: {e}", path.display()))?;
    let recent = &events[events.len().saturating_sub(limit)..];

    if json {
        println!("{}", serde_json::to_string_pretty(recent)?);
        return Ok(());
    }

    println!("Event log: {} ({} events)", path.display(), events.len());
    for event in recent {
        match event.threshold {
            Some(threshold) => println!(
                "  {}  {:>7} pixels  (threshold {threshold})",
                event.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
                event.pixels_changed
            ),
            None => println!(
                "  {}  {:>7} pixels",
                event.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
                event.pixels_changed
            ),
        }
    }

    Ok(())
}
