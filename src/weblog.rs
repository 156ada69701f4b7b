//! Rolling in-memory log ring surfaced on the configuration panel.
//!
//! A bounded ring of formatted lines, fed by a `tracing` layer. Its
//! lifecycle is independent of any session.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

// 面板只展示最近这么多行
const MAX_ENTRIES: usize = 50;

#[derive(Clone)]
pub struct WebLog {
    entries: Arc<Mutex<VecDeque<String>>>,
}

impl WebLog {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(MAX_ENTRIES))),
        }
    }

    pub fn push(&self, line: String) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if entries.len() == MAX_ENTRIES {
            entries.pop_front();
        }
        entries.push_back(line);
    }

    pub fn lines(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

impl Default for WebLog {
    fn default() -> Self {
        Self::new()
    }
}

/// tracing 层：把 INFO 及以上级别的事件写进日志环
pub struct WebLogLayer {
    log: WebLog,
}

impl WebLogLayer {
    pub fn new(log: WebLog) -> Self {
        Self { log }
    }
}

impl<S: Subscriber> Layer<S> for WebLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() > Level::INFO {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        if let Some(message) = visitor.message {
            let timestamp = chrono::Local::now().format("%H:%M:%S");
            self.log.push(format!("[{}] {}", timestamp, message));
        }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: Option<String>,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_caps_at_bound_and_evicts_oldest() {
        let log = WebLog::new();
        for i in 0..60 {
            log.push(format!("line {}", i));
        }
        let lines = log.lines();
        assert_eq!(lines.len(), 50);
        assert_eq!(lines.first().unwrap(), "line 10");
        assert_eq!(lines.last().unwrap(), "line 59");
    }

    #[test]
    fn push_preserves_order() {
        let log = WebLog::new();
        log.push("a".into());
        log.push("b".into());
        assert_eq!(log.lines(), vec!["a".to_string(), "b".to_string()]);
    }
}
