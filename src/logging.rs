//! Subscriber setup plus an in-memory tail of recent log lines, served by
//! the control API.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

pub const LOG_TAIL_CAPACITY: usize = 50;

/// Ring buffer of the most recent formatted events.
#[derive(Clone, Debug)]
pub struct LogTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl LogTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, line: String) {
        if let Ok(mut lines) = self.lines.lock() {
            if lines.len() == self.capacity {
                lines.pop_front();
            }
            lines.push_back(line);
        }
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for LogTail {
    fn default() -> Self {
        Self::new(LOG_TAIL_CAPACITY)
    }
}

struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }
}

impl<S: Subscriber> Layer<S> for LogTail {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = LineVisitor {
            message: String::new(),
            fields: String::new(),
        };
        event.record(&mut visitor);
        let line = format!(
            "{} {:>5} {}{}",
            chrono::Local::now().format("%H:%M:%S"),
            event.metadata().level(),
            visitor.message,
            visitor.fields
        );
        self.push(line);
    }
}

/// Install the global subscriber. `RUST_LOG` filters; `LOG_FORMAT=json`
/// switches to machine-readable output.
pub fn init(tail: LogTail) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,leadcrawl=debug"));

    let json_format = std::env::var("LOG_FORMAT").as_deref() == Ok("json");
    if json_format {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(tail)
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(tail)
            .with(filter)
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_keeps_only_latest_lines() {
        let tail = LogTail::new(2);
        tail.push("a".into());
        tail.push("b".into());
        tail.push("c".into());
        assert_eq!(tail.snapshot(), vec!["b", "c"]);
    }

    #[test]
    fn test_tail_captures_events() {
        let tail = LogTail::new(10);
        let subscriber = tracing_subscriber::registry().with(tail.clone());
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(unit = "Sion_SEO", "unit completed");
        });
        let lines = tail.snapshot();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("INFO"));
        assert!(lines[0].contains("unit completed unit=Sion_SEO"));
    }
}
