// QuickJS sandbox
//
// Every run, evaluation and variable replay gets a fresh runtime + context.
// The wall-clock budget and cancellation are both enforced from the QuickJS
// interrupt handler, so a busy loop is stopped from inside the engine.

use crate::console::{install_console, ConsoleSink};
use crate::serializer::{coerce_string, describe_error, is_error_object, serialize};
use crate::types::SerializedValue;
use rquickjs::{Context, Ctx, Runtime, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Extra time given to the blocking task after the budget before the outer
/// watchdog gives up on it
const TIMEOUT_GRACE: Duration = Duration::from_millis(250);

/// Thread-safe cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    pub timeout: Duration,
    pub memory_limit: usize,
}

impl SandboxLimits {
    pub fn new(timeout_ms: u64, memory_limit: usize) -> Self {
        Self {
            timeout: Duration::from_millis(timeout_ms),
            memory_limit,
        }
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }
}

/// Why a script did not produce a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptFailure {
    Timeout,
    /// A returned promise is pending with no jobs left to settle it
    Unsettled,
    Cancelled,
    Thrown(String),
    Init(String),
}

impl fmt::Display for ScriptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out"),
            Self::Unsettled => write!(f, "returned promise never settled"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Thrown(message) => write!(f, "{}", message),
            Self::Init(message) => write!(f, "runtime initialization failed: {}", message),
        }
    }
}

pub struct Sandbox {
    // Dropped before the runtime
    context: Context,
    _runtime: Runtime,
    started: Instant,
    limits: SandboxLimits,
    cancel: CancellationToken,
}

impl Sandbox {
    pub fn new(
        limits: SandboxLimits,
        cancel: CancellationToken,
        console: ConsoleSink,
    ) -> Result<Self, ScriptFailure> {
        let runtime = Runtime::new().map_err(|e| ScriptFailure::Init(e.to_string()))?;
        runtime.set_memory_limit(limits.memory_limit);

        let started = Instant::now();
        let budget = limits.timeout;
        let flag = cancel.clone();
        runtime.set_interrupt_handler(Some(Box::new(move || {
            flag.is_cancelled() || started.elapsed() > budget
        })));

        let context = Context::full(&runtime).map_err(|e| ScriptFailure::Init(e.to_string()))?;
        context
            .with(|ctx| install_console(&ctx, console))
            .map_err(|e| ScriptFailure::Init(e.to_string()))?;

        Ok(Self {
            context,
            _runtime: runtime,
            started,
            limits,
            cancel,
        })
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Classify an error raised while this sandbox was running.
    ///
    /// Always takes the pending exception off the context.
    pub fn failure(&self, ctx: &Ctx<'_>, err: rquickjs::Error) -> ScriptFailure {
        if matches!(err, rquickjs::Error::WouldBlock) {
            return ScriptFailure::Unsettled;
        }
        let message = error_message(ctx, err);
        if self.cancel.is_cancelled() {
            ScriptFailure::Cancelled
        } else if self.started.elapsed() > self.limits.timeout {
            ScriptFailure::Timeout
        } else {
            ScriptFailure::Thrown(message)
        }
    }

    /// Evaluate `source` as a script, await a returned promise, and snapshot
    /// the completion value.
    pub fn run(&self, source: &str, max_depth: usize) -> Result<SerializedValue, ScriptFailure> {
        self.context.with(|ctx| {
            let value = ctx
                .eval::<Value, _>(source)
                .map_err(|e| self.failure(&ctx, e))?;

            if let Some(promise) = value.as_promise() {
                let settled = promise
                    .finish::<Value>()
                    .map_err(|e| self.failure(&ctx, e))?;
                return Ok(serialize(&settled, max_depth));
            }

            Ok(serialize(&value, max_depth))
        })
    }
}

/// Human-readable message for an rquickjs error, taking the pending
/// exception off the context when there is one
pub fn error_message(ctx: &Ctx<'_>, err: rquickjs::Error) -> String {
    match err {
        rquickjs::Error::Exception => describe_thrown(&ctx.catch()),
        other => other.to_string(),
    }
}

/// `Name: message` for Error objects, `String(value)` for anything else thrown
pub fn describe_thrown(value: &Value<'_>) -> String {
    if is_error_object(value) {
        describe_error(value)
    } else {
        coerce_string(value)
    }
}

/// Run `source` on the blocking pool with a fresh sandbox.
///
/// The interrupt handler enforces the budget; the outer timeout only catches a
/// task that cannot be interrupted (a native call that never yields).
pub async fn run_script(
    source: String,
    limits: SandboxLimits,
    cancel: CancellationToken,
    console: ConsoleSink,
    max_depth: usize,
) -> Result<SerializedValue, ScriptFailure> {
    let watchdog = cancel.clone();
    let handle = tokio::task::spawn_blocking(move || {
        let sandbox = Sandbox::new(limits, cancel, console)?;
        sandbox.run(&source, max_depth)
    });

    match tokio::time::timeout(limits.timeout + TIMEOUT_GRACE, handle).await {
        Ok(Ok(result)) => {
            debug!("Script finished: ok={}", result.is_ok());
            result
        }
        Ok(Err(e)) => Err(ScriptFailure::Init(e.to_string())),
        Err(_) => {
            warn!(
                "Script ignored its {}ms budget, abandoning the blocking task",
                limits.timeout_ms()
            );
            watchdog.cancel();
            Err(ScriptFailure::Timeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn limits(timeout_ms: u64) -> SandboxLimits {
        SandboxLimits::new(timeout_ms, 16 * 1024 * 1024)
    }

    fn sandbox(timeout_ms: u64) -> Sandbox {
        Sandbox::new(limits(timeout_ms), CancellationToken::new(), ConsoleSink::Muted).unwrap()
    }

    #[test]
    fn test_cancellation_token() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.clone().cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_run_returns_completion_value() {
        assert_eq!(sandbox(1_000).run("let a = 2; a * 21", 3), Ok(json!(42)));
    }

    #[test]
    fn test_run_awaits_resolved_promise() {
        let out = sandbox(1_000).run("Promise.resolve({ done: true })", 3);
        assert_eq!(out, Ok(json!({ "done": true })));
    }

    #[test]
    fn test_rejected_promise_is_thrown() {
        let out = sandbox(1_000).run("Promise.reject(new RangeError('bad'))", 3);
        assert_eq!(out, Err(ScriptFailure::Thrown("RangeError: bad".to_string())));
    }

    #[test]
    fn test_pending_promise_is_unsettled() {
        let out = sandbox(1_000).run("new Promise(() => {})", 3);
        assert_eq!(out, Err(ScriptFailure::Unsettled));
    }

    #[test]
    fn test_thrown_error_message() {
        let out = sandbox(1_000).run("null.x", 3);
        match out {
            Err(ScriptFailure::Thrown(message)) => assert!(message.starts_with("TypeError")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_thrown_non_error_value() {
        let out = sandbox(1_000).run("throw 'plain'", 3);
        assert_eq!(out, Err(ScriptFailure::Thrown("plain".to_string())));
    }

    #[test]
    fn test_busy_loop_is_interrupted() {
        let started = Instant::now();
        let out = sandbox(50).run("while (true) {}", 3);
        assert_eq!(out, Err(ScriptFailure::Timeout));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_cancelled_before_run() {
        let token = CancellationToken::new();
        let sandbox = Sandbox::new(limits(5_000), token.clone(), ConsoleSink::Muted).unwrap();
        token.cancel();
        assert_eq!(sandbox.run("while (true) {}", 3), Err(ScriptFailure::Cancelled));
    }

    #[tokio::test]
    async fn test_run_script_on_blocking_pool() {
        let out = run_script(
            "[1, 2, 3].map(n => n * 2)".to_string(),
            limits(1_000),
            CancellationToken::new(),
            ConsoleSink::Muted,
            3,
        )
        .await;
        assert_eq!(out, Ok(json!([2, 4, 6])));
    }
}
