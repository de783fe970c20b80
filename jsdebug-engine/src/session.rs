// Debug session state machine
//
// Drives a simulated debug session over one program:
//
//   stopped --start--> running --breakpoint/step/pause--> paused
//   paused --continue--> running --completion--> stopped
//   paused --step*--> stepping --(delay, next line)--> paused
//   any --stop--> stopped
//
// "Running" is a scan over the stepper's positions. The scan records each
// line, checks breakpoints and halts on step requests; it never executes the
// user's code. Once the scan runs off the end, the whole program is executed
// in a sandbox with console capture, and the session ends.

use crate::breakpoints::{condition_breaks, BreakpointRegistry};
use crate::config::EngineConfig;
use crate::console::{ConsoleCapture, ConsoleSink};
use crate::error::{EngineError, EngineResult, EvaluationError};
use crate::evaluator::Evaluator;
use crate::events::{EngineEvent, EventBus};
use crate::runner::{RunError, RunGuard, RunSlot};
use crate::sandbox::{run_script, CancellationToken, SandboxLimits};
use crate::stepper::{declared_names, Program, Stepper};
use crate::types::*;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Frame name for top-level code
const TOP_LEVEL_FRAME: &str = "(anonymous)";

/// Holds the names captured by a variable replay
const SCOPE_HOLDER: &str = "__jsdebug_scope";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepMode {
    Over,
    Into,
    Out,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LaunchOptions {
    /// Pause on the first line before anything else
    pub stop_on_entry: bool,
    /// Budget for executing the program once the scan completes
    pub timeout_ms: Option<u64>,
}

/// Where a launch, continue or step left the session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DebugOutcome {
    Paused {
        reason: PauseReason,
        location: Location,
    },
    Completed {
        result: Option<SerializedValue>,
    },
    Failed {
        error: RunError,
    },
    /// The session is live but has no program loaded
    Running,
    /// The session was stopped while the program was executing
    Detached,
}

/// A step that has entered `stepping` and will pause after the step delay
#[derive(Debug)]
pub struct PendingStep {
    handle: JoinHandle<EngineResult<Option<DebugOutcome>>>,
}

impl PendingStep {
    /// Wait for the step to land. `None` when it was superseded by a pause,
    /// a stop or a new session before it fired.
    pub async fn wait(self) -> EngineResult<Option<DebugOutcome>> {
        self.handle.await?
    }
}

#[derive(Debug)]
struct DebugState {
    state: ExecutionState,
    session: Option<DebugSession>,
    program: Option<Arc<Program>>,
    source_map: BTreeMap<u32, String>,
    current_line: Option<u32>,
    call_stack: Vec<CallFrame>,
    selected_frame: usize,
    variables: VariableContext,
    step_mode: Option<StepMode>,
    /// Bumped by every transition that invalidates a scheduled step
    generation: u64,
    timeout_ms: u64,
    /// Set while the program itself is executing
    completion: Option<CancellationToken>,
}

impl DebugState {
    fn new(timeout_ms: u64) -> Self {
        Self {
            state: ExecutionState::Stopped,
            session: None,
            program: None,
            source_map: BTreeMap::new(),
            current_line: None,
            call_stack: Vec::new(),
            selected_frame: 0,
            variables: VariableContext::new(),
            step_mode: None,
            generation: 0,
            timeout_ms,
            completion: None,
        }
    }

    fn is_debugging(&self) -> bool {
        self.session.as_ref().is_some_and(DebugSession::is_active)
    }

    fn file_name(&self) -> String {
        self.program
            .as_ref()
            .map(|p| p.file_name.clone())
            .or_else(|| self.session.as_ref().map(|s| s.file_name.clone()))
            .unwrap_or_default()
    }

    fn require_paused(&self, operation: &'static str) -> EngineResult<()> {
        if !self.is_debugging() {
            return Err(EngineError::invalid_state(
                operation,
                "an active debug session",
                self.state,
            ));
        }
        self.require_not_executing(operation)?;
        if self.state != ExecutionState::Paused {
            return Err(EngineError::invalid_state(
                operation,
                "a paused session",
                self.state,
            ));
        }
        Ok(())
    }

    fn require_not_executing(&self, operation: &'static str) -> EngineResult<()> {
        if self.completion.is_some() {
            return Err(EngineError::invalid_state(
                operation,
                "a session that is not executing its program",
                self.state,
            ));
        }
        Ok(())
    }

    /// Clear everything that belongs to one session
    fn reset(&mut self) {
        self.program = None;
        self.source_map.clear();
        self.current_line = None;
        self.call_stack.clear();
        self.selected_frame = 0;
        self.variables.clear();
        self.step_mode = None;
    }
}

enum ScanEnd {
    Paused(PauseReason, Location),
    Finished,
}

#[derive(Clone)]
pub struct ExecutionSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: EngineConfig,
    events: EventBus,
    console: ConsoleCapture,
    evaluator: Evaluator,
    breakpoints: Arc<Mutex<BreakpointRegistry>>,
    stepper: Arc<dyn Stepper>,
    base_context: Mutex<VariableContext>,
    slot: RunSlot,
    state: tokio::sync::Mutex<DebugState>,
}

impl ExecutionSession {
    pub fn new(
        config: EngineConfig,
        events: EventBus,
        console: ConsoleCapture,
        breakpoints: Arc<Mutex<BreakpointRegistry>>,
        stepper: Arc<dyn Stepper>,
        slot: RunSlot,
    ) -> Self {
        let evaluator = Evaluator::new(&config);
        let state = DebugState::new(config.default_timeout_ms);
        Self {
            inner: Arc::new(SessionInner {
                config,
                events,
                console,
                evaluator,
                breakpoints,
                stepper,
                base_context: Mutex::new(VariableContext::new()),
                slot,
                state: tokio::sync::Mutex::new(state),
            }),
        }
    }

    fn breakpoints(&self) -> MutexGuard<'_, BreakpointRegistry> {
        self.inner
            .breakpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn base_context(&self) -> MutexGuard<'_, VariableContext> {
        self.inner
            .base_context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot_of(&self, st: &DebugState) -> ExecutionSnapshot {
        ExecutionSnapshot {
            state: st.state,
            is_running: self.inner.slot.is_held(),
            is_debugging: st.is_debugging(),
            is_paused: st.state == ExecutionState::Paused,
            session: st.session.clone(),
            current_file: st
                .program
                .as_ref()
                .map(|p| p.file_name.clone())
                .or_else(|| st.session.as_ref().map(|s| s.file_name.clone())),
            current_line: st.current_line,
            call_stack: st.call_stack.clone(),
            selected_frame: st.selected_frame,
            variables: st.variables.clone(),
        }
    }

    fn emit_state(&self, st: &DebugState) {
        self.inner.events.emit(EngineEvent::ExecutionStateChanged {
            snapshot: self.snapshot_of(st),
        });
    }

    pub async fn snapshot(&self) -> ExecutionSnapshot {
        let st = self.inner.state.lock().await;
        self.snapshot_of(&st)
    }

    pub async fn state(&self) -> ExecutionState {
        self.inner.state.lock().await.state
    }

    pub async fn call_stack(&self) -> Vec<CallFrame> {
        self.inner.state.lock().await.call_stack.clone()
    }

    /// Variables visible to watches and the debug console: the capture from
    /// the last pause while a session is live, else the base context
    pub async fn variables(&self) -> VariableContext {
        let st = self.inner.state.lock().await;
        if st.is_debugging() && st.state != ExecutionState::Running {
            st.variables.clone()
        } else {
            self.base_context().clone()
        }
    }

    /// Replace the caller-supplied variables every capture starts from
    pub async fn set_variable_context(&self, context: VariableContext) {
        *self.base_context() = context;

        let mut st = self.inner.state.lock().await;
        if st.state == ExecutionState::Paused {
            let line = st.current_line.unwrap_or(0);
            st.variables = self.capture_variables(st.program.clone(), line).await;
            self.emit_state(&st);
        }
    }

    pub async fn start_debug_session(&self, file_name: &str) -> DebugSession {
        let mut st = self.inner.state.lock().await;
        self.start_locked(&mut st, file_name)
    }

    fn start_locked(&self, st: &mut DebugState, file_name: &str) -> DebugSession {
        if st.is_debugging() {
            info!("Replacing active debug session");
            self.teardown(st);
        }

        let session = DebugSession {
            id: Uuid::new_v4().to_string(),
            file_name: file_name.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            status: SessionStatus::Active,
        };

        st.reset();
        st.session = Some(session.clone());
        st.state = ExecutionState::Running;
        st.timeout_ms = self.inner.config.default_timeout_ms;

        info!("Debug session {} started for {}", session.id, file_name);
        self.inner.events.emit(EngineEvent::DebugSessionStarted {
            session: session.clone(),
        });
        self.emit_state(st);
        session
    }

    /// End the active session. Breakpoints and watches are kept.
    pub async fn stop_debug_session(&self) -> Option<DebugSession> {
        let mut st = self.inner.state.lock().await;
        self.teardown(&mut st)
    }

    fn teardown(&self, st: &mut DebugState) -> Option<DebugSession> {
        st.generation += 1;
        if let Some(token) = st.completion.take() {
            token.cancel();
        }

        let was_active = st.is_debugging();
        st.reset();
        st.state = ExecutionState::Stopped;

        if !was_active {
            return None;
        }

        let session = st.session.as_mut()?;
        session.status = SessionStatus::Stopped;
        session.ended_at = Some(Utc::now());
        let session = session.clone();

        info!("Debug session {} stopped", session.id);
        self.inner.events.emit(EngineEvent::DebugSessionStopped {
            session: session.clone(),
        });
        self.inner
            .events
            .emit(EngineEvent::CallStackUpdated { frames: Vec::new() });
        self.emit_state(st);
        Some(session)
    }

    pub async fn execute_with_debugging(
        &self,
        code: &str,
        file_name: &str,
    ) -> EngineResult<DebugOutcome> {
        self.execute_with_debugging_opts(code, file_name, LaunchOptions::default())
            .await
    }

    /// Load `code` and scan it from line 1.
    ///
    /// An active session for the same file that has not loaded a program yet
    /// is reused; otherwise a fresh session replaces whatever was running.
    pub async fn execute_with_debugging_opts(
        &self,
        code: &str,
        file_name: &str,
        options: LaunchOptions,
    ) -> EngineResult<DebugOutcome> {
        self.launch(code, file_name, options, None).await
    }

    /// Launch with the run slot already held by the caller
    pub(crate) async fn launch(
        &self,
        code: &str,
        file_name: &str,
        options: LaunchOptions,
        held: Option<RunGuard>,
    ) -> EngineResult<DebugOutcome> {
        let mut st = self.inner.state.lock().await;

        let reusable = st.program.is_none()
            && st
                .session
                .as_ref()
                .is_some_and(|s| s.is_active() && s.file_name == file_name);
        if !reusable {
            self.start_locked(&mut st, file_name);
        }

        let program = Program::new(file_name, code);
        st.call_stack = vec![CallFrame {
            function_name: TOP_LEVEL_FRAME.to_string(),
            file_name: file_name.to_string(),
            line_number: 1,
            column_number: 1,
            source: program.line(1).unwrap_or_default().to_string(),
        }];
        st.program = Some(program.clone());
        st.timeout_ms = options
            .timeout_ms
            .unwrap_or(self.inner.config.default_timeout_ms);
        st.state = ExecutionState::Running;

        info!(
            "Debugging {} ({} lines, {:?} stepping)",
            file_name,
            program.line_count(),
            self.inner.stepper.granularity()
        );
        self.inner.events.emit(EngineEvent::DebugStarted {
            file_name: file_name.to_string(),
        });
        self.inner.events.emit(EngineEvent::CallStackUpdated {
            frames: st.call_stack.clone(),
        });

        let halt = options.stop_on_entry.then_some(PauseReason::Entry);
        self.advance(st, 1, halt, held).await
    }

    /// Resume the scan after the current line
    pub async fn continue_execution(&self) -> EngineResult<DebugOutcome> {
        let mut st = self.inner.state.lock().await;
        st.require_paused("continue")?;

        st.step_mode = None;
        st.generation += 1;
        st.state = ExecutionState::Running;
        let from = st.current_line.unwrap_or(0) + 1;

        info!("Resuming from line {}", from);
        self.inner.events.emit(EngineEvent::DebugResumed);
        self.emit_state(&st);

        self.advance(st, from, None, None).await
    }

    pub async fn step_over(&self) -> EngineResult<PendingStep> {
        self.step(StepMode::Over, "stepOver").await
    }

    /// Like step over, but enters the callee when the current line makes a
    /// call: a frame named after it is pushed before the step lands.
    pub async fn step_into(&self) -> EngineResult<PendingStep> {
        self.step(StepMode::Into, "stepInto").await
    }

    /// Pop the innermost frame and land after the caller's line. With a
    /// single frame this is a step over.
    pub async fn step_out(&self) -> EngineResult<PendingStep> {
        self.step(StepMode::Out, "stepOut").await
    }

    async fn step(&self, mode: StepMode, operation: &'static str) -> EngineResult<PendingStep> {
        let mut st = self.inner.state.lock().await;
        st.require_paused(operation)?;

        let current = st.current_line.unwrap_or(0);
        let mut frames_changed = false;
        let from = match mode {
            StepMode::Over => current + 1,
            StepMode::Into => {
                let target = st
                    .program
                    .as_ref()
                    .and_then(|p| self.inner.stepper.call_target(p, current));
                match target {
                    Some(function_name) => {
                        debug!("Stepping into {} from line {}", function_name, current);
                        let file_name = st.file_name();
                        st.call_stack.insert(
                            0,
                            CallFrame {
                                function_name,
                                file_name,
                                line_number: current + 1,
                                column_number: 1,
                                source: String::new(),
                            },
                        );
                        frames_changed = true;
                    }
                    None => debug!("No call on line {}, stepping over", current),
                }
                current + 1
            }
            StepMode::Out if st.call_stack.len() > 1 => {
                let frame = st.call_stack.remove(0);
                debug!("Stepping out of {}", frame.function_name);
                frames_changed = true;
                st.call_stack[0].line_number + 1
            }
            StepMode::Out => current + 1,
        };

        st.step_mode = Some(mode);
        st.state = ExecutionState::Stepping;
        st.selected_frame = 0;
        st.generation += 1;
        let generation = st.generation;

        if frames_changed {
            self.inner.events.emit(EngineEvent::CallStackUpdated {
                frames: st.call_stack.clone(),
            });
        }
        self.emit_state(&st);
        drop(st);

        let session = self.clone();
        let delay = self.inner.config.step_delay();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            session.finish_step(generation, from).await
        });
        Ok(PendingStep { handle })
    }

    async fn finish_step(&self, generation: u64, from: u32) -> EngineResult<Option<DebugOutcome>> {
        let st = self.inner.state.lock().await;
        if st.generation != generation || st.state != ExecutionState::Stepping {
            debug!("Dropping superseded step (generation {})", generation);
            return Ok(None);
        }
        self.advance(st, from, None, None).await.map(Some)
    }

    /// Pause at the current line. Already paused: re-emits with fresh state.
    /// The program cannot be interrupted once it is executing.
    pub async fn pause(&self) -> EngineResult<Location> {
        let mut st = self.inner.state.lock().await;
        if !st.is_debugging() {
            return Err(EngineError::invalid_state(
                "pause",
                "an active debug session",
                st.state,
            ));
        }
        st.require_not_executing("pause")?;
        let Some(line) = st.current_line.filter(|_| st.program.is_some()) else {
            return Err(EngineError::invalid_state("pause", "a loaded program", st.state));
        };

        st.generation += 1;
        Ok(self
            .enter_pause(&mut st, line, PauseReason::Pause, None, None)
            .await)
    }

    pub async fn select_frame(&self, index: usize) -> EngineResult<CallFrame> {
        let mut st = self.inner.state.lock().await;
        st.require_paused("selectFrame")?;

        let frame = st
            .call_stack
            .get(index)
            .cloned()
            .ok_or(EngineError::FrameNotFound(index))?;
        st.selected_frame = index;

        self.inner.events.emit(EngineEvent::CallStackFrameSelected {
            frame: frame.clone(),
            index,
        });
        Ok(frame)
    }

    /// Hit check against an explicit variable context
    pub async fn check_breakpoint(
        &self,
        file_name: &str,
        line_number: u32,
        context: &VariableContext,
    ) -> Option<Breakpoint> {
        let candidate = self.breakpoints().matching(file_name, line_number).cloned()?;

        let outcome = match candidate.condition.clone() {
            None => Ok(true),
            Some(condition) => {
                let evaluator = self.inner.evaluator.clone();
                let context = context.clone();
                let expression = condition.clone();
                tokio::task::spawn_blocking(move || evaluator.test(&condition, &context))
                    .await
                    .unwrap_or_else(|e| Err(EvaluationError::new(expression, e.to_string())))
            }
        };

        // Decided against the breakpoint whose condition was evaluated
        condition_breaks(&candidate, |_| outcome).then_some(candidate)
    }

    /// Variables are only captured for a conditional breakpoint
    async fn breakpoint_hit(
        &self,
        program: &Arc<Program>,
        line: u32,
    ) -> Option<(Breakpoint, Option<VariableContext>)> {
        let candidate = self
            .breakpoints()
            .matching(&program.file_name, line)
            .cloned()?;
        if candidate.condition.is_none() {
            return Some((candidate, None));
        }

        let variables = self.capture_variables(Some(program.clone()), line).await;
        let hit = self
            .check_breakpoint(&program.file_name, line, &variables)
            .await?;
        Some((hit, Some(variables)))
    }

    /// Walk positions from `from`. Returns with the guard released once the
    /// session is paused or the program has finished.
    ///
    /// Executing the program takes the run slot (or uses `held`) and keeps it
    /// until the session ends. With the slot taken by another run the session
    /// pauses on the last scanned line instead and `AlreadyRunning` is returned.
    async fn advance(
        &self,
        mut st: tokio::sync::MutexGuard<'_, DebugState>,
        from: u32,
        halt: Option<PauseReason>,
        held: Option<RunGuard>,
    ) -> EngineResult<DebugOutcome> {
        match self.scan(&mut st, from, halt).await {
            ScanEnd::Paused(reason, location) => Ok(DebugOutcome::Paused { reason, location }),
            ScanEnd::Finished => {
                let Some(session) = st.session.clone() else {
                    return Ok(DebugOutcome::Detached);
                };
                let Some(program) = st.program.clone() else {
                    st.state = ExecutionState::Running;
                    self.emit_state(&st);
                    return Ok(DebugOutcome::Running);
                };
                st.require_not_executing("execute")?;

                let Some(guard) = held.or_else(|| self.inner.slot.try_acquire()) else {
                    warn!("{} is ready to execute but another run is in flight", program.file_name);
                    let last_line = st.current_line;
                    match last_line {
                        Some(line) => {
                            self.enter_pause(&mut st, line, PauseReason::Pause, None, None)
                                .await;
                        }
                        None => {
                            st.state = ExecutionState::Paused;
                            self.emit_state(&st);
                        }
                    }
                    return Err(EngineError::AlreadyRunning);
                };

                let token = CancellationToken::new();
                st.completion = Some(token.clone());
                st.state = ExecutionState::Running;
                let timeout_ms = st.timeout_ms;
                self.emit_state(&st);
                drop(st);

                self.complete(&session.id, program, timeout_ms, token, guard)
                    .await
            }
        }
    }

    async fn scan(&self, st: &mut DebugState, from: u32, mut halt: Option<PauseReason>) -> ScanEnd {
        let Some(program) = st.program.clone() else {
            return ScanEnd::Finished;
        };

        for line in self.inner.stepper.positions(&program, from) {
            let text = program.line(line).unwrap_or_default();
            st.source_map.insert(line, text.to_string());

            if let Some((breakpoint, variables)) = self.breakpoint_hit(&program, line).await {
                let location = self
                    .enter_pause(st, line, PauseReason::Breakpoint, Some(breakpoint), variables)
                    .await;
                return ScanEnd::Paused(PauseReason::Breakpoint, location);
            }

            st.current_line = Some(line);
            debug!("{}:{} {}", program.file_name, line, text.trim());
            self.inner.events.emit(EngineEvent::ExecutionLineChanged {
                file_name: program.file_name.clone(),
                line_number: line,
            });

            let reason = halt
                .take()
                .or_else(|| st.step_mode.take().map(|_| PauseReason::Step));
            if let Some(reason) = reason {
                let location = self.enter_pause(st, line, reason, None, None).await;
                return ScanEnd::Paused(reason, location);
            }
        }

        ScanEnd::Finished
    }

    async fn enter_pause(
        &self,
        st: &mut DebugState,
        line: u32,
        reason: PauseReason,
        hit: Option<Breakpoint>,
        variables: Option<VariableContext>,
    ) -> Location {
        let variables = match variables {
            Some(variables) => variables,
            None => self.capture_variables(st.program.clone(), line).await,
        };

        let file_name = st.file_name();
        let source = st.source_map.get(&line).cloned().unwrap_or_default();

        st.state = ExecutionState::Paused;
        st.current_line = Some(line);
        st.step_mode = None;
        st.selected_frame = 0;
        st.variables = variables.clone();
        if let Some(frame) = st.call_stack.first_mut() {
            frame.line_number = line;
            frame.source = source;
        }

        let location = Location {
            file_name,
            line_number: line,
            column_number: 1,
        };

        if let Some(breakpoint) = hit {
            let breakpoint = self
                .breakpoints()
                .record_hit(&breakpoint.id)
                .unwrap_or(breakpoint);
            self.inner.events.emit(EngineEvent::BreakpointHit {
                breakpoint,
                variables: variables.clone(),
                call_stack: st.call_stack.clone(),
            });
        }

        info!(
            "Paused at {}:{} ({})",
            location.file_name, location.line_number, reason
        );
        self.inner.events.emit(EngineEvent::DebugPaused {
            reason,
            location: location.clone(),
            call_stack: st.call_stack.clone(),
            variables,
        });
        self.inner.events.emit(EngineEvent::CallStackUpdated {
            frames: st.call_stack.clone(),
        });
        self.emit_state(st);
        location
    }

    /// Base context overlaid by the top-level names the lines before `line`
    /// declare, read back from a muted replay of those lines
    async fn capture_variables(&self, program: Option<Arc<Program>>, line: u32) -> VariableContext {
        let mut variables = self.base_context().clone();
        let Some(program) = program else {
            return variables;
        };

        let names = declared_names(program.lines_before(line));
        if names.is_empty() {
            return variables;
        }

        let reads: Vec<String> = names
            .iter()
            .map(|name| {
                format!(
                    "try {{ if (typeof {name} !== 'undefined') {h}[{name:?}] = {name}; }} catch (_) {{}}",
                    name = name,
                    h = SCOPE_HOLDER
                )
            })
            .collect();
        let source = format!(
            "{prefix}\n;(() => {{ const {h} = {{}}; {reads} return {h}; }})()",
            prefix = program.prefix(line),
            h = SCOPE_HOLDER,
            reads = reads.join(" ")
        );

        let limits = SandboxLimits::new(
            self.inner.config.replay_timeout_ms,
            self.inner.config.memory_limit,
        );
        // The holder object takes one level of the depth budget
        let depth = self.inner.config.max_depth + 1;

        match run_script(source, limits, CancellationToken::new(), ConsoleSink::Muted, depth).await {
            Ok(SerializedValue::Object(captured)) => {
                debug!("Captured {} variable(s) before line {}", captured.len(), line);
                variables.extend(captured);
            }
            Ok(other) => debug!("Replay returned a non-object: {}", other),
            Err(failure) => debug!("Replay before line {} failed: {}", line, failure),
        }
        variables
    }

    /// Execute the whole program for real and end the session
    async fn complete(
        &self,
        session_id: &str,
        program: Arc<Program>,
        timeout_ms: u64,
        token: CancellationToken,
        guard: RunGuard,
    ) -> EngineResult<DebugOutcome> {
        debug!("Scan of {} finished, executing", program.file_name);
        let limits = SandboxLimits::new(timeout_ms, self.inner.config.memory_limit);
        let result = run_script(
            program.code.clone(),
            limits,
            token,
            ConsoleSink::Capture(self.inner.console.clone()),
            self.inner.config.max_depth,
        )
        .await;

        let mut st = self.inner.state.lock().await;
        let same_session = st
            .session
            .as_ref()
            .is_some_and(|s| s.id == session_id && s.is_active());
        if !same_session {
            debug!("Session {} ended during execution", session_id);
            return Ok(DebugOutcome::Detached);
        }
        st.completion = None;

        let file_name = program.file_name.clone();
        let outcome = match result {
            Ok(value) => {
                info!("Debug run of {} completed", file_name);
                self.inner.events.emit(EngineEvent::DebugCompleted {
                    file_name,
                    result: Some(value.clone()),
                });
                DebugOutcome::Completed {
                    result: Some(value),
                }
            }
            Err(failure) => {
                let error = RunError::from_failure(failure, timeout_ms);
                info!("Debug run of {} failed: {}", file_name, error.message);
                self.inner.events.emit(EngineEvent::DebugError {
                    file_name,
                    error: error.message.clone(),
                });
                DebugOutcome::Failed { error }
            }
        };

        drop(guard);
        self.teardown(&mut st);
        Ok(outcome)
    }
}
