use chrono::SecondsFormat;
use serde_json::{Map, Value};

use super::{LogEntry, LogFormatter};

const RESERVED_KEYS: [&str; 3] = ["message", "level", "timestamp"];

/// Renders an entry as the JSON document stored in the remote backend.
#[derive(Default, Clone, Debug)]
pub struct JsonFormatter {}

impl JsonFormatter {
    pub fn new() -> Self {
        Self {}
    }
}

impl LogFormatter for JsonFormatter {
    fn format(&self, entry: &LogEntry) -> String {
        let mut event = Map::new();
        event.insert("message".into(), entry.message.clone().into());
        event.insert("level".into(), entry.level.clone().into());
        event.insert(
            "timestamp".into(),
            entry
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Secs, true)
                .into(),
        );

        for (key, value) in &entry.metadata {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            event.insert(key.clone(), Value::String(value.clone()));
        }

        Value::Object(event).to_string()
    }
}

/// Human readable single line format, used by the stderr sink.
#[derive(Clone, Debug)]
pub struct LineFormatter {
    datetime_format: String,
    use_ansi: bool,
}

impl LineFormatter {
    pub fn new(use_ansi: bool) -> Self {
        Self {
            datetime_format: "%Y-%m-%d %H:%M:%S".to_string(),
            use_ansi,
        }
    }

    fn timestamp(&self, entry: &LogEntry) -> String {
        let color = if self.use_ansi { "\x1b[0;90m" } else { "" };

        let time = entry.timestamp.format(&self.datetime_format);
        format!("{}[{}]{}", color, time, self.reset())
    }

    fn format_level(&self, level: &str) -> String {
        let short = match level.to_ascii_lowercase().as_str() {
            "error" => "ERR",
            "warn" | "warning" => "WRN",
            "info" => "INF",
            "debug" => "DEB",
            "trace" => "TRC",
            _ => "???",
        };

        if !self.use_ansi {
            return short.to_string();
        }

        let color = match short {
            "ERR" => "\x1b[0;31m",
            "WRN" => "\x1b[0;33m",
            "INF" => "\x1b[0;32m",
            "DEB" => "\x1b[0;34m",
            _ => "\x1b[0;37m",
        };
        format!("{}{}{}", color, short, self.reset())
    }

    fn reset(&self) -> &str {
        if self.use_ansi {
            "\x1b[0m"
        } else {
            ""
        }
    }
}

impl LogFormatter for LineFormatter {
    fn format(&self, entry: &LogEntry) -> String {
        let mut line = format!(
            "{} {}: {}",
            self.timestamp(entry),
            self.format_level(&entry.level),
            entry.message,
        );

        for (key, value) in &entry.metadata {
            line.push_str(&format!(" {}={}", key, value));
        }

        line
    }
}
