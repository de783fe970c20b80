// Console capture
//
// Binds `console.log/error/warn/info` inside a sandbox. Each call is forwarded
// to tracing under the `console` target, appended to the shared output buffer
// and published as a `consoleOutput` event.

use crate::events::{EngineEvent, EventBus};
use crate::serializer::{coerce_string, describe_error, is_error_object, serialize};
use crate::types::{ConsoleEntry, ConsoleLevel};
use chrono::Utc;
use rquickjs::function::Rest;
use rquickjs::{Ctx, Function, Object, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// Nesting bound used when an object is printed
const CONSOLE_DEPTH: usize = 6;

/// Oldest entries are dropped past this many
pub const MAX_CONSOLE_ENTRIES: usize = 5_000;

#[derive(Debug, Clone)]
pub struct ConsoleCapture {
    entries: Arc<Mutex<Vec<ConsoleEntry>>>,
    events: EventBus,
}

impl ConsoleCapture {
    pub fn new(events: EventBus) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ConsoleEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, level: ConsoleLevel, message: String) -> ConsoleEntry {
        forward(level, &message);

        let entry = ConsoleEntry {
            level,
            message,
            timestamp: Utc::now(),
        };

        {
            let mut entries = self.lock();
            if entries.len() >= MAX_CONSOLE_ENTRIES {
                debug!("Console buffer full, dropping oldest entry");
                entries.remove(0);
            }
            entries.push(entry.clone());
        }

        self.events.emit(EngineEvent::ConsoleOutput {
            entry: entry.clone(),
        });
        entry
    }

    pub fn entries(&self) -> Vec<ConsoleEntry> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
        self.events.emit(EngineEvent::ConsoleCleared);
    }
}

/// The "real" output channel
fn forward(level: ConsoleLevel, message: &str) {
    match level {
        ConsoleLevel::Log | ConsoleLevel::Info => info!(target: "console", "{}", message),
        ConsoleLevel::Warn => warn!(target: "console", "{}", message),
        ConsoleLevel::Error => error!(target: "console", "{}", message),
    }
}

/// Where a sandbox's console output goes
#[derive(Debug, Clone)]
pub enum ConsoleSink {
    Capture(ConsoleCapture),
    /// Evaluator and replay sandboxes: output is discarded
    Muted,
}

impl ConsoleSink {
    fn write(&self, level: ConsoleLevel, message: String) {
        if let ConsoleSink::Capture(capture) = self {
            capture.record(level, message);
        }
    }
}

pub fn install_console<'js>(ctx: &Ctx<'js>, sink: ConsoleSink) -> rquickjs::Result<()> {
    let console = Object::new(ctx.clone())?;

    for level in ConsoleLevel::ALL {
        let sink = sink.clone();
        let method = Function::new(ctx.clone(), move |args: Rest<Value<'js>>| {
            if matches!(sink, ConsoleSink::Muted) {
                return;
            }
            sink.write(level, format_console_args(&args.0));
        })?;
        console.set(level.method_name(), method)?;
    }

    ctx.globals().set("console", console)?;
    Ok(())
}

/// Arguments joined by a space; objects are pretty-printed JSON, everything
/// else is stringified the way JS would.
pub fn format_console_args(args: &[Value<'_>]) -> String {
    args.iter().map(format_arg).collect::<Vec<_>>().join(" ")
}

fn format_arg(value: &Value<'_>) -> String {
    if let Some(s) = value.as_string() {
        return s.to_string().unwrap_or_default();
    }
    if is_error_object(value) {
        return describe_error(value);
    }
    if value.is_object() && !value.is_function() {
        let snapshot = serialize(value, CONSOLE_DEPTH);
        return serde_json::to_string_pretty(&snapshot).unwrap_or_else(|_| coerce_string(value));
    }
    coerce_string(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{CancellationToken, Sandbox, SandboxLimits};

    fn run_with_capture(source: &str) -> ConsoleCapture {
        let capture = ConsoleCapture::new(EventBus::new(64));
        let sandbox = Sandbox::new(
            SandboxLimits::new(1_000, 16 * 1024 * 1024),
            CancellationToken::new(),
            ConsoleSink::Capture(capture.clone()),
        )
        .unwrap();
        sandbox.run(source, 3).unwrap();
        capture
    }

    #[test]
    fn test_levels_are_recorded_in_order() {
        let capture = run_with_capture(
            "console.log('a'); console.warn('b'); console.error('c'); console.info('d');",
        );
        let levels: Vec<_> = capture.entries().iter().map(|e| e.level).collect();
        assert_eq!(
            levels,
            vec![
                ConsoleLevel::Log,
                ConsoleLevel::Warn,
                ConsoleLevel::Error,
                ConsoleLevel::Info
            ]
        );
    }

    #[test]
    fn test_arguments_are_joined_and_stringified() {
        let capture = run_with_capture("console.log('sum', 1 + 2, true, undefined, null)");
        assert_eq!(capture.entries()[0].message, "sum 3 true undefined null");
    }

    #[test]
    fn test_objects_are_pretty_printed() {
        let capture = run_with_capture("console.log({ a: 1 })");
        assert_eq!(capture.entries()[0].message, "{\n  \"a\": 1\n}");
    }

    #[test]
    fn test_errors_print_name_and_message() {
        let capture = run_with_capture("console.error(new Error('broken'))");
        assert_eq!(capture.entries()[0].message, "Error: broken");
    }

    #[tokio::test]
    async fn test_entries_are_published() {
        let bus = EventBus::new(16);
        let mut stream = bus.subscribe();
        let capture = ConsoleCapture::new(bus);

        capture.record(ConsoleLevel::Log, "hello".to_string());
        capture.clear();

        match stream.recv().await {
            Some(EngineEvent::ConsoleOutput { entry }) => assert_eq!(entry.message, "hello"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(stream.recv().await, Some(EngineEvent::ConsoleCleared));
        assert!(capture.is_empty());
    }

    #[test]
    fn test_muted_sink_records_nothing() {
        let sandbox = Sandbox::new(
            SandboxLimits::new(1_000, 16 * 1024 * 1024),
            CancellationToken::new(),
            ConsoleSink::Muted,
        )
        .unwrap();
        assert!(sandbox.run("console.log('quiet'); 1", 3).is_ok());
    }
}
