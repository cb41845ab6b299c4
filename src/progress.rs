//! Build progress reporting.
//!
//! Renders the core's [`ProgressEvent`]s while `tdup build` pages the
//! tracker, normalizes tickets, and embeds batches. Progress goes to
//! **stderr** so stdout stays parseable for scripts.

use std::io::Write;
use std::sync::Arc;

use ticket_dedup_core::progress::{NoProgress, ProgressEvent, ProgressReporter};

/// Human-friendly progress on stderr: "build  normalizing  1,234 / 5,000 tickets".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = format!("{}\n", human_line(&event));
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

fn human_line(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::Fetching { fetched } => {
            format!("build  fetching  {} tickets", format_number(*fetched))
        }
        ProgressEvent::Normalizing { n, total } => format!(
            "build  normalizing  {} / {} tickets",
            format_number(*n),
            format_number(*total)
        ),
        ProgressEvent::Embedding { batch, batches } => format!(
            "build  embedding  batch {} / {}",
            format_number(*batch),
            format_number(*batches)
        ),
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        if let Ok(line) = serde_json::to_string(&json_event(&event)) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

fn json_event(event: &ProgressEvent) -> serde_json::Value {
    match event {
        ProgressEvent::Fetching { fetched } => serde_json::json!({
            "event": "progress",
            "phase": "fetching",
            "n": fetched
        }),
        ProgressEvent::Normalizing { n, total } => serde_json::json!({
            "event": "progress",
            "phase": "normalizing",
            "n": n,
            "total": total
        }),
        ProgressEvent::Embedding { batch, batches } => serde_json::json!({
            "event": "progress",
            "phase": "embedding",
            "n": batch,
            "total": batches
        }),
    }
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Arc<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn human_lines() {
        assert_eq!(
            human_line(&ProgressEvent::Normalizing { n: 1234, total: 5000 }),
            "build  normalizing  1,234 / 5,000 tickets"
        );
        assert_eq!(
            human_line(&ProgressEvent::Embedding { batch: 2, batches: 10 }),
            "build  embedding  batch 2 / 10"
        );
    }

    #[test]
    fn json_events() {
        let v = json_event(&ProgressEvent::Fetching { fetched: 300 });
        assert_eq!(v["phase"], "fetching");
        assert_eq!(v["n"], 300);
        assert!(v.get("total").is_none());
    }
}
