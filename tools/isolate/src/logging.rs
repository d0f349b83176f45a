use crate::config::LoggingConfig;
use crate::errors::IsolateError;
use crate::log_retention::enforce_total_budget;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEFAULT_DISK_BUDGET_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: 4096,
            budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
        }
    }

    /// `None` when the configuration does not name a log file.
    pub fn from_config(cfg: &LoggingConfig) -> Option<Self> {
        let path = cfg.path.as_ref()?;
        Some(Self {
            path: path.clone(),
            max_payload_bytes: cfg.max_payload_bytes,
            budget_bytes: cfg.budget_bytes,
        })
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), IsolateError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| IsolateError::Io(e.to_string()))?;
        }
        let truncated = truncate_json(event.payload.clone(), self.max_payload_bytes);
        let line = serde_json::to_string(&LogEvent {
            level: event.level,
            event_type: event.event_type,
            payload: truncated,
        })
        .map_err(|e| IsolateError::Encode(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| IsolateError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| IsolateError::Io(e.to_string()))?;
        file.write_all(b"\n")
            .map_err(|e| IsolateError::Io(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            let _ = enforce_total_budget(parent, self.budget_bytes, &self.path)?;
        }

        Ok(())
    }

    /// Appends an event, falling back to one stderr line if the log is unwritable.
    pub fn emit(&self, level: &str, event_type: &str, payload: Value) {
        let event = LogEvent {
            level,
            event_type,
            payload,
        };
        if let Err(err) = self.append(&event) {
            eprintln!(
                "{}",
                structured_fallback_line(event_type, level, &err.to_string())
            );
        }
    }
}

pub fn structured_fallback_line(event_type: &str, level: &str, message: &str) -> String {
    format!(
        "isolate event={event_type} level={level} message={} ",
        message.replace('\n', "\\n")
    )
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}
