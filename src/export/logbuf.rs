use std::collections::VecDeque;

use serde::Serialize;

pub const DEFAULT_LOG_CAP: usize = 300;
pub const PAYLOAD_LIMIT: usize = 2000;
pub const UNSERIALIZABLE: &str = "[unserializable]";

/// Serialize a log payload without ever failing. Output is cut to `limit` chars.
pub fn safe_serialize<T: Serialize + ?Sized>(value: &T, limit: usize) -> String {
    match serde_json::to_string(value) {
        Ok(text) if text.chars().count() > limit => {
            let mut cut: String = text.chars().take(limit).collect();
            cut.push('…');
            cut
        }
        Ok(text) => text,
        Err(_) => UNSERIALIZABLE.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// Epoch milliseconds.
    pub at: i64,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

/// Size-capped run log. When full, the oldest entry is evicted.
#[derive(Debug, Clone)]
pub struct RunLog {
    cap: usize,
    entries: VecDeque<LogEntry>,
}

impl Default for RunLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAP)
    }
}

impl RunLog {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, level: LogLevel, message: impl Into<String>, payload: Option<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => tracing::info!(payload = payload.as_deref(), "{message}"),
            LogLevel::Warn => tracing::warn!(payload = payload.as_deref(), "{message}"),
            LogLevel::Error => tracing::error!(payload = payload.as_deref(), "{message}"),
        }
        if self.entries.len() == self.cap {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            at: chrono::Utc::now().timestamp_millis(),
            level,
            message,
            payload,
        });
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Info, message, None);
    }

    pub fn warn<T: Serialize + ?Sized>(&mut self, message: impl Into<String>, payload: &T) {
        self.push(LogLevel::Warn, message, Some(safe_serialize(payload, PAYLOAD_LIMIT)));
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Error, message, None);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::ser::Error as _;
    use serde_json::json;

    struct Broken;

    impl Serialize for Broken {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("nope"))
        }
    }

    #[test]
    fn serialization_is_truncated_or_marked() {
        assert_eq!(safe_serialize(&json!({"a": 1}), 100), r#"{"a":1}"#);
        let long = safe_serialize(&"x".repeat(50), 10);
        assert_eq!(long.chars().count(), 11);
        assert_eq!(safe_serialize(&Broken, 100), UNSERIALIZABLE);
    }

    #[test]
    fn oldest_entries_are_evicted() {
        let mut log = RunLog::new(3);
        for i in 0..5 {
            log.info(format!("entry {i}"));
        }
        let messages: Vec<_> = log.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["entry 2", "entry 3", "entry 4"]);
    }
}
