// Execution engine
//
// One explicitly constructed engine per workbench. It owns the event bus,
// console capture, registries, debug session and code runner, and is the
// only way callers reach them.

use crate::breakpoints::{BreakpointChange, BreakpointRegistry};
use crate::config::EngineConfig;
use crate::console::ConsoleCapture;
use crate::error::{EngineError, EngineResult};
use crate::evaluator::Evaluator;
use crate::events::{EngineEvent, EventBus, EventChannel, EventStream};
use crate::runner::{CodeRunner, ExecutionResult, RunOptions, RunSlot};
use crate::session::{DebugOutcome, ExecutionSession, LaunchOptions, PendingStep};
use crate::stepper::{LineStepper, Stepper};
use crate::types::*;
use crate::watch::WatchRegistry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct ExecutionEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    events: EventBus,
    console: ConsoleCapture,
    evaluator: Evaluator,
    breakpoints: Arc<Mutex<BreakpointRegistry>>,
    /// Async lock: refreshes hold it for several evaluation budgets
    watches: Arc<tokio::sync::Mutex<WatchRegistry>>,
    session: ExecutionSession,
    runner: CodeRunner,
    initialized: AtomicBool,
    disposed: AtomicBool,
}

impl ExecutionEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_stepper(config, Arc::new(LineStepper))
    }

    pub fn with_stepper(config: EngineConfig, stepper: Arc<dyn Stepper>) -> Self {
        let events = EventBus::new(config.event_capacity);
        let console = ConsoleCapture::new(events.clone());
        let breakpoints = Arc::new(Mutex::new(BreakpointRegistry::new(events.clone())));
        let watches = Arc::new(tokio::sync::Mutex::new(WatchRegistry::new(events.clone())));
        let slot = RunSlot::new();

        let session = ExecutionSession::new(
            config.clone(),
            events.clone(),
            console.clone(),
            breakpoints.clone(),
            stepper,
            slot.clone(),
        );
        let runner = CodeRunner::new(
            config.clone(),
            events.clone(),
            console.clone(),
            session.clone(),
            slot,
        );

        Self {
            inner: Arc::new(EngineInner {
                evaluator: Evaluator::new(&config),
                config,
                events,
                console,
                breakpoints,
                watches,
                session,
                runner,
                initialized: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    fn ensure_live(&self) -> EngineResult<()> {
        if self.inner.disposed.load(Ordering::SeqCst) {
            Err(EngineError::Disposed)
        } else {
            Ok(())
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Emits `initialized` the first time only
    pub fn initialize(&self) -> EngineResult<()> {
        self.ensure_live()?;
        if !self.inner.initialized.swap(true, Ordering::SeqCst) {
            info!("Execution engine initialized");
            self.inner.events.emit(EngineEvent::Initialized);
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    /// Stop any run and session; every later operation fails with `Disposed`
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.runner.stop_execution().await;
        info!("Execution engine disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> EventStream {
        self.inner.events.subscribe()
    }

    pub fn subscribe_to(&self, channels: &[EventChannel]) -> EventStream {
        self.inner.events.subscribe_to(channels)
    }

    // Runs

    pub async fn execute_code(&self, code: &str, options: RunOptions) -> EngineResult<ExecutionResult> {
        self.ensure_live()?;
        self.inner.runner.execute_code(code, options).await
    }

    pub async fn stop_execution(&self) -> EngineResult<bool> {
        self.ensure_live()?;
        Ok(self.inner.runner.stop_execution().await)
    }

    pub fn is_running(&self) -> bool {
        self.inner.runner.is_running()
    }

    pub fn console_output(&self) -> Vec<ConsoleEntry> {
        self.inner.console.entries()
    }

    pub fn clear_console_output(&self) -> EngineResult<()> {
        self.ensure_live()?;
        self.inner.console.clear();
        Ok(())
    }

    // Breakpoints

    pub fn add_breakpoint(
        &self,
        file_name: &str,
        line_number: u32,
        condition: Option<String>,
    ) -> EngineResult<Breakpoint> {
        self.ensure_live()?;
        Ok(lock(&self.inner.breakpoints).add(file_name, line_number, condition))
    }

    pub fn remove_breakpoint(&self, id: &str) -> EngineResult<bool> {
        self.ensure_live()?;
        Ok(lock(&self.inner.breakpoints).remove(id))
    }

    pub fn toggle_breakpoint(&self, id: &str) -> EngineResult<Option<Breakpoint>> {
        self.ensure_live()?;
        Ok(lock(&self.inner.breakpoints).toggle(id))
    }

    pub fn toggle_breakpoint_at(&self, file_name: &str, line_number: u32) -> EngineResult<BreakpointChange> {
        self.ensure_live()?;
        Ok(lock(&self.inner.breakpoints).toggle_at(file_name, line_number))
    }

    pub fn set_breakpoint_condition(
        &self,
        id: &str,
        condition: Option<String>,
    ) -> EngineResult<Option<Breakpoint>> {
        self.ensure_live()?;
        Ok(lock(&self.inner.breakpoints).set_condition(id, condition))
    }

    pub fn clear_breakpoints(&self) -> EngineResult<usize> {
        self.ensure_live()?;
        Ok(lock(&self.inner.breakpoints).clear_all())
    }

    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        lock(&self.inner.breakpoints).list()
    }

    pub fn breakpoints_for_file(&self, file_name: &str) -> Vec<Breakpoint> {
        lock(&self.inner.breakpoints).for_file(file_name)
    }

    /// Hit check against the current captured variables
    pub async fn should_break(&self, file_name: &str, line_number: u32) -> bool {
        let context = self.inner.session.variables().await;
        self.inner
            .session
            .check_breakpoint(file_name, line_number, &context)
            .await
            .is_some()
    }

    // Watches

    async fn with_watches<R, F>(&self, f: F) -> EngineResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut WatchRegistry, &Evaluator, &VariableContext) -> R + Send + 'static,
    {
        self.ensure_live()?;
        let context = self.inner.session.variables().await;
        let mut registry = self.inner.watches.clone().lock_owned().await;
        let evaluator = self.inner.evaluator.clone();
        let result =
            tokio::task::spawn_blocking(move || f(&mut registry, &evaluator, &context)).await?;
        Ok(result)
    }

    pub async fn add_watch(&self, expression: &str) -> EngineResult<WatchExpression> {
        let expression = expression.to_string();
        self.with_watches(move |registry, evaluator, context| {
            registry.add(&expression, evaluator, context)
        })
        .await
    }

    pub async fn remove_watch(&self, id: &str) -> EngineResult<bool> {
        self.ensure_live()?;
        Ok(self.inner.watches.lock().await.remove(id))
    }

    pub async fn update_watch(&self, id: &str, expression: &str) -> EngineResult<Option<WatchExpression>> {
        let id = id.to_string();
        let expression = expression.to_string();
        self.with_watches(move |registry, evaluator, context| {
            registry.update(&id, &expression, evaluator, context)
        })
        .await
    }

    pub async fn refresh_watches(&self) -> EngineResult<Vec<WatchExpression>> {
        self.with_watches(|registry, evaluator, context| registry.refresh_all(evaluator, context))
            .await
    }

    pub async fn watches(&self) -> Vec<WatchExpression> {
        self.inner.watches.lock().await.list()
    }

    // Debug session

    pub async fn start_debug_session(&self, file_name: &str) -> EngineResult<DebugSession> {
        self.ensure_live()?;
        Ok(self.inner.session.start_debug_session(file_name).await)
    }

    pub async fn stop_debug_session(&self) -> EngineResult<Option<DebugSession>> {
        self.ensure_live()?;
        Ok(self.inner.session.stop_debug_session().await)
    }

    pub async fn execute_with_debugging(&self, code: &str, file_name: &str) -> EngineResult<DebugOutcome> {
        self.ensure_live()?;
        self.inner.session.execute_with_debugging(code, file_name).await
    }

    pub async fn execute_with_debugging_opts(
        &self,
        code: &str,
        file_name: &str,
        options: LaunchOptions,
    ) -> EngineResult<DebugOutcome> {
        self.ensure_live()?;
        self.inner
            .session
            .execute_with_debugging_opts(code, file_name, options)
            .await
    }

    pub async fn continue_execution(&self) -> EngineResult<DebugOutcome> {
        self.ensure_live()?;
        self.inner.session.continue_execution().await
    }

    pub async fn step_over(&self) -> EngineResult<PendingStep> {
        self.ensure_live()?;
        self.inner.session.step_over().await
    }

    pub async fn step_into(&self) -> EngineResult<PendingStep> {
        self.ensure_live()?;
        self.inner.session.step_into().await
    }

    pub async fn step_out(&self) -> EngineResult<PendingStep> {
        self.ensure_live()?;
        self.inner.session.step_out().await
    }

    pub async fn pause(&self) -> EngineResult<Location> {
        self.ensure_live()?;
        self.inner.session.pause().await
    }

    pub async fn select_frame(&self, index: usize) -> EngineResult<CallFrame> {
        self.ensure_live()?;
        self.inner.session.select_frame(index).await
    }

    pub async fn snapshot(&self) -> ExecutionSnapshot {
        self.inner.session.snapshot().await
    }

    pub async fn call_stack(&self) -> Vec<CallFrame> {
        self.inner.session.call_stack().await
    }

    pub async fn variables(&self) -> VariableContext {
        self.inner.session.variables().await
    }

    pub async fn set_variable_context(&self, context: VariableContext) -> EngineResult<()> {
        self.ensure_live()?;
        self.inner.session.set_variable_context(context).await;
        Ok(())
    }

    /// Debug console: evaluate against the current captured variables
    pub async fn evaluate(&self, expression: &str) -> EngineResult<SerializedValue> {
        self.ensure_live()?;
        let context = self.inner.session.variables().await;
        let evaluator = self.inner.evaluator.clone();
        let expression = expression.to_string();
        let value =
            tokio::task::spawn_blocking(move || evaluator.evaluate(&expression, &context)).await??;
        Ok(value)
    }
}
