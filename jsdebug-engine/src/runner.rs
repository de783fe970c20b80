// Code runner
//
// Single entry point for "run this snippet": either a plain sandboxed run with
// a hard timeout, or a hand-off to the debug session. Only one run may be in
// flight; a second request fails fast instead of queueing.

use crate::config::EngineConfig;
use crate::console::{ConsoleCapture, ConsoleSink};
use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventBus};
use crate::sandbox::{run_script, CancellationToken, ScriptFailure, SandboxLimits};
use crate::session::{DebugOutcome, ExecutionSession, LaunchOptions};
use crate::types::{ConsoleEntry, Location, SerializedValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunOptions {
    pub debug: bool,
    /// Falls back to `EngineConfig::default_timeout_ms`
    pub timeout_ms: Option<u64>,
    /// Debug runs only; falls back to `EngineConfig::default_file_name`
    pub file_name: Option<String>,
    /// Debug runs only
    pub stop_on_entry: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunErrorKind {
    Timeout,
    Runtime,
    Cancelled,
    Init,
}

/// Why a run failed, as stored on the result and carried by `executionError`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub kind: RunErrorKind,
    pub message: String,
}

impl RunError {
    pub fn new(kind: RunErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A promise that can never settle counts as a timeout
    pub fn from_failure(failure: ScriptFailure, timeout_ms: u64) -> Self {
        match failure {
            ScriptFailure::Timeout | ScriptFailure::Unsettled => Self::new(
                RunErrorKind::Timeout,
                EngineError::Timeout(timeout_ms).to_string(),
            ),
            ScriptFailure::Cancelled => Self::new(RunErrorKind::Cancelled, "Execution cancelled"),
            ScriptFailure::Thrown(message) => Self::new(RunErrorKind::Runtime, message),
            ScriptFailure::Init(message) => Self::new(RunErrorKind::Init, message),
        }
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub debug: bool,
    pub value: Option<SerializedValue>,
    pub error: Option<RunError>,
    /// Console output captured during the run, up to the failure point
    pub output: Vec<ConsoleEntry>,
    /// Set when a debug run stopped at a breakpoint or on entry
    pub paused_at: Option<Location>,
    pub timeout_ms: u64,
    pub duration_ms: u64,
}

impl ExecutionResult {
    fn completed(debug: bool, value: Option<SerializedValue>, timeout_ms: u64) -> Self {
        Self {
            success: true,
            debug,
            value,
            error: None,
            output: Vec::new(),
            paused_at: None,
            timeout_ms,
            duration_ms: 0,
        }
    }

    fn failed(debug: bool, error: RunError, timeout_ms: u64) -> Self {
        Self {
            success: false,
            error: Some(error),
            ..Self::completed(debug, None, timeout_ms)
        }
    }

    fn from_outcome(outcome: DebugOutcome, timeout_ms: u64) -> Self {
        match outcome {
            DebugOutcome::Paused { location, .. } => Self {
                paused_at: Some(location),
                ..Self::completed(true, None, timeout_ms)
            },
            DebugOutcome::Completed { result } => Self::completed(true, result, timeout_ms),
            DebugOutcome::Failed { error } => Self::failed(true, error, timeout_ms),
            DebugOutcome::Running => Self::completed(true, None, timeout_ms),
            DebugOutcome::Detached => Self::failed(
                true,
                RunError::new(RunErrorKind::Cancelled, "Debug session ended before completion"),
                timeout_ms,
            ),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.error
            .as_ref()
            .is_some_and(|e| e.kind == RunErrorKind::Timeout)
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// The value, or the failure as an `EngineError`
    pub fn into_result(self) -> EngineResult<Option<SerializedValue>> {
        match self.error {
            None => Ok(self.value),
            Some(error) => Err(match error.kind {
                RunErrorKind::Timeout => EngineError::Timeout(self.timeout_ms),
                RunErrorKind::Runtime => EngineError::Script(error.message),
                RunErrorKind::Cancelled => EngineError::Cancelled,
                RunErrorKind::Init => EngineError::Init(error.message),
            }),
        }
    }
}

/// The one "execution in flight" marker, shared by plain runs and the final
/// execution of a debug session
#[derive(Debug, Clone, Default)]
pub struct RunSlot {
    active: Arc<AtomicU64>,
    next_id: Arc<AtomicU64>,
}

impl RunSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self) -> bool {
        self.active.load(Ordering::SeqCst) != 0
    }

    pub(crate) fn try_acquire(&self) -> Option<RunGuard> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.active
            .compare_exchange(0, id, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard {
                active: self.active.clone(),
                id,
            })
    }

    /// Forget the current holder. True if there was one.
    fn release(&self) -> bool {
        self.active.swap(0, Ordering::SeqCst) != 0
    }
}

/// Holds the slot; clears it on drop unless it was released and taken over
#[derive(Debug)]
pub(crate) struct RunGuard {
    active: Arc<AtomicU64>,
    id: u64,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let _ = self
            .active
            .compare_exchange(self.id, 0, Ordering::SeqCst, Ordering::SeqCst);
    }
}

pub struct CodeRunner {
    config: EngineConfig,
    events: EventBus,
    console: ConsoleCapture,
    session: ExecutionSession,
    slot: RunSlot,
    cancel: Mutex<Option<CancellationToken>>,
}

impl CodeRunner {
    pub fn new(
        config: EngineConfig,
        events: EventBus,
        console: ConsoleCapture,
        session: ExecutionSession,
        slot: RunSlot,
    ) -> Self {
        Self {
            config,
            events,
            console,
            session,
            slot,
            cancel: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.slot.is_held()
    }

    pub async fn execute_code(&self, code: &str, options: RunOptions) -> EngineResult<ExecutionResult> {
        let guard = self.slot.try_acquire().ok_or_else(|| {
            warn!("Run requested while another is in flight");
            EngineError::AlreadyRunning
        })?;

        let cancel = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = Some(cancel.clone());

        self.console.clear();
        info!("Executing snippet (debug={}, {} bytes)", options.debug, code.len());
        self.events.emit(EngineEvent::ExecutionStarted {
            code: code.to_string(),
            debug: options.debug,
        });

        let started = Instant::now();
        // Debug runs hand the slot to the session, which keeps it until the
        // program has executed or the scan has paused
        let mut result = if options.debug {
            self.run_debug(code, &options, guard).await
        } else {
            let result = self.run_plain(code, &options, cancel).await;
            drop(guard);
            result
        };
        result.duration_ms = started.elapsed().as_millis() as u64;
        result.output = self.console.entries();

        match &result.error {
            None => self.events.emit(EngineEvent::ExecutionCompleted {
                result: result.value.clone(),
                output: result.output.clone(),
            }),
            Some(error) => {
                info!("Execution failed: {}", error);
                self.events.emit(EngineEvent::ExecutionError {
                    error: error.clone(),
                    output: result.output.clone(),
                });
            }
        }
        Ok(result)
    }

    async fn run_plain(
        &self,
        code: &str,
        options: &RunOptions,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let timeout_ms = options.timeout_ms.unwrap_or(self.config.default_timeout_ms);
        let limits = SandboxLimits::new(timeout_ms, self.config.memory_limit);

        match run_script(
            code.to_string(),
            limits,
            cancel,
            ConsoleSink::Capture(self.console.clone()),
            self.config.max_depth,
        )
        .await
        {
            Ok(value) => ExecutionResult::completed(false, Some(value), timeout_ms),
            Err(failure) => {
                ExecutionResult::failed(false, RunError::from_failure(failure, timeout_ms), timeout_ms)
            }
        }
    }

    async fn run_debug(&self, code: &str, options: &RunOptions, guard: RunGuard) -> ExecutionResult {
        let timeout_ms = options.timeout_ms.unwrap_or(self.config.default_timeout_ms);
        let file_name = options
            .file_name
            .clone()
            .unwrap_or_else(|| self.config.default_file_name.clone());
        let launch = LaunchOptions {
            stop_on_entry: options.stop_on_entry,
            timeout_ms: Some(timeout_ms),
        };

        match self
            .session
            .launch(code, &file_name, launch, Some(guard))
            .await
        {
            Ok(outcome) => ExecutionResult::from_outcome(outcome, timeout_ms),
            Err(e) => ExecutionResult::failed(
                true,
                RunError::new(RunErrorKind::Runtime, e.to_string()),
                timeout_ms,
            ),
        }
    }

    /// Cancel the in-flight run, if any, and end the debug session
    pub async fn stop_execution(&self) -> bool {
        let token = self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(token) = token {
            token.cancel();
        }

        let was_running = self.slot.release();
        let session = self.session.stop_debug_session().await;

        if was_running || session.is_some() {
            info!("Execution stopped");
        } else {
            debug!("Stop requested with nothing running");
        }
        was_running || session.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breakpoints::BreakpointRegistry;
    use crate::events::EventChannel;
    use crate::stepper::LineStepper;
    use serde_json::json;
    use std::time::Duration;

    fn runner() -> (Arc<CodeRunner>, EventBus) {
        let config = EngineConfig::default();
        let events = EventBus::new(512);
        let console = ConsoleCapture::new(events.clone());
        let slot = RunSlot::new();
        let session = ExecutionSession::new(
            config.clone(),
            events.clone(),
            console.clone(),
            Arc::new(Mutex::new(BreakpointRegistry::new(events.clone()))),
            Arc::new(LineStepper),
            slot.clone(),
        );
        let runner = CodeRunner::new(config, events.clone(), console, session, slot);
        (Arc::new(runner), events)
    }

    #[test]
    fn test_run_slot_is_exclusive() {
        let slot = RunSlot::new();
        let first = slot.try_acquire().unwrap();
        assert!(slot.is_held());
        assert!(slot.try_acquire().is_none());

        // a released slot taken by a new holder survives the old guard
        assert!(slot.release());
        let second = slot.try_acquire().unwrap();
        drop(first);
        assert!(slot.is_held());
        drop(second);
        assert!(!slot.is_held());
    }

    #[tokio::test]
    async fn test_plain_run_returns_value_and_output() {
        let (runner, _) = runner();
        let result = runner
            .execute_code("console.log('hi'); 6 * 7", RunOptions::default())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.value, Some(json!(42)));
        assert_eq!(result.output.len(), 1);
        assert_eq!(result.output[0].message, "hi");
        assert!(!runner.is_running());
    }

    #[tokio::test]
    async fn test_runtime_error_keeps_partial_output() {
        let (runner, _) = runner();
        let result = runner
            .execute_code("console.log('before'); undefinedFn();", RunOptions::default())
            .await
            .unwrap();
        assert!(!result.success);
        let error = result.error.clone().unwrap();
        assert_eq!(error.kind, RunErrorKind::Runtime);
        assert!(error.message.starts_with("ReferenceError"));
        assert_eq!(result.output[0].message, "before");
        assert!(matches!(result.into_result(), Err(EngineError::Script(_))));
    }

    #[tokio::test]
    async fn test_unsettled_promise_times_out() {
        let (runner, _) = runner();
        let options = RunOptions {
            timeout_ms: Some(100),
            ..RunOptions::default()
        };
        let result = runner.execute_code("new Promise(() => {})", options).await.unwrap();
        assert!(result.is_timeout());
        assert_eq!(result.error.unwrap().message, "Execution timed out after 100ms");
    }

    #[tokio::test]
    async fn test_second_run_fails_fast() {
        let (runner, _) = runner();
        let background = runner.clone();
        let first = tokio::spawn(async move {
            background
                .execute_code(
                    "while (true) {}",
                    RunOptions {
                        timeout_ms: Some(300),
                        ..RunOptions::default()
                    },
                )
                .await
        });

        while !runner.is_running() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let second = runner.execute_code("1", RunOptions::default()).await;
        assert!(matches!(second, Err(EngineError::AlreadyRunning)));

        let first = first.await.unwrap().unwrap();
        assert!(first.is_timeout());
        assert!(!runner.is_running());
    }

    #[tokio::test]
    async fn test_stop_execution_cancels() {
        let (runner, _) = runner();
        let background = runner.clone();
        let run = tokio::spawn(async move {
            background
                .execute_code("while (true) {}", RunOptions::default())
                .await
        });

        while !runner.is_running() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(runner.stop_execution().await);

        let result = run.await.unwrap().unwrap();
        assert_eq!(result.error.unwrap().kind, RunErrorKind::Cancelled);
        assert!(!runner.is_running());
    }

    #[tokio::test]
    async fn test_events_wrap_the_run() {
        let (runner, events) = runner();
        let mut stream = events.subscribe_to(&[
            EventChannel::ExecutionStarted,
            EventChannel::ExecutionCompleted,
            EventChannel::ExecutionError,
        ]);

        runner.execute_code("1", RunOptions::default()).await.unwrap();
        runner.execute_code("throw new Error('x')", RunOptions::default()).await.unwrap();

        let channels: Vec<_> = stream.drain().iter().map(|e| e.channel()).collect();
        assert_eq!(
            channels,
            vec![
                EventChannel::ExecutionStarted,
                EventChannel::ExecutionCompleted,
                EventChannel::ExecutionStarted,
                EventChannel::ExecutionError,
            ]
        );
    }

    #[tokio::test]
    async fn test_debug_run_without_breakpoints_completes() {
        let (runner, _) = runner();
        let options = RunOptions {
            debug: true,
            file_name: Some("main.js".to_string()),
            ..RunOptions::default()
        };
        let result = runner
            .execute_code("let a = 2;\nconsole.log(a);\na * 3", options)
            .await
            .unwrap();
        assert!(result.debug);
        assert_eq!(result.value, Some(json!(6)));
        assert_eq!(result.output[0].message, "2");
    }
}
