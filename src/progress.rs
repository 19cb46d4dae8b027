//! Refresh progress reporting.
//!
//! Reports observable progress during `flatstac refresh` so operators see
//! which partition is being copied and how many are left. Progress is
//! emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for a refresh.
#[derive(Clone, Debug)]
pub enum RefreshProgressEvent {
    /// Reading the collection registry and resolving partitions.
    Discovering { source: String },
    /// `n` of `total` partitions copied; `partition` is the one just read.
    Loading {
        partition: String,
        n: u64,
        total: u64,
    },
    /// Deriving domain results from `items` flat items.
    Extracting { items: u64 },
    /// Swapping the new version in.
    Publishing,
}

/// Reports refresh progress. Implementations write to stderr (human or JSON).
pub trait RefreshProgressReporter: Send + Sync {
    fn report(&self, event: RefreshProgressEvent);
}

/// Human-friendly progress on stderr: "refresh  loading  _items_3  3 / 12 partitions".
pub struct StderrProgress;

impl RefreshProgressReporter for StderrProgress {
    fn report(&self, event: RefreshProgressEvent) {
        let line = match &event {
            RefreshProgressEvent::Discovering { source } => {
                format!("refresh {}  discovering...\n", source)
            }
            RefreshProgressEvent::Loading {
                partition,
                n,
                total,
            } => format!(
                "refresh  loading  {}  {} / {} partitions\n",
                partition,
                format_number(*n),
                format_number(*total)
            ),
            RefreshProgressEvent::Extracting { items } => {
                format!("refresh  extracting  {} items\n", format_number(*items))
            }
            RefreshProgressEvent::Publishing => "refresh  publishing\n".to_string(),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl RefreshProgressReporter for JsonProgress {
    fn report(&self, event: RefreshProgressEvent) {
        let obj = match &event {
            RefreshProgressEvent::Discovering { source } => serde_json::json!({
                "event": "progress",
                "phase": "discovering",
                "source": source
            }),
            RefreshProgressEvent::Loading {
                partition,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "phase": "loading",
                "partition": partition,
                "n": n,
                "total": total
            }),
            RefreshProgressEvent::Extracting { items } => serde_json::json!({
                "event": "progress",
                "phase": "extracting",
                "items": items
            }),
            RefreshProgressEvent::Publishing => serde_json::json!({
                "event": "progress",
                "phase": "publishing"
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl RefreshProgressReporter for NoProgress {
    fn report(&self, _event: RefreshProgressEvent) {}
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

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    pub fn reporter(&self) -> Box<dyn RefreshProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
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
    fn parse_modes() {
        assert_eq!(ProgressMode::parse("json"), Some(ProgressMode::Json));
        assert_eq!(ProgressMode::parse("off"), Some(ProgressMode::Off));
        assert_eq!(ProgressMode::parse("loud"), None);
    }
}
