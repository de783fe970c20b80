// JavaScript execution and debug-simulation engine
//
// Runs user snippets inside an isolated QuickJS sandbox and drives a simulated,
// line-granular debug session over a single source buffer:
// - Console capture
// - Depth-bounded value snapshots
// - Expression and breakpoint-condition evaluation
// - Breakpoint and watch registries
// - Session state machine (stopped/running/paused/stepping)
// - Code runner with timeouts and cancellation

pub mod breakpoints;
pub mod config;
pub mod console;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod events;
pub mod runner;
pub mod sandbox;
pub mod serializer;
pub mod session;
pub mod stepper;
pub mod types;
pub mod watch;

pub use breakpoints::BreakpointChange;
pub use config::EngineConfig;
pub use engine::ExecutionEngine;
pub use error::{EngineError, EngineResult, EvaluationError};
pub use events::{EngineEvent, EventBus, EventChannel, EventStream};
pub use runner::{ExecutionResult, RunError, RunErrorKind, RunOptions, RunSlot};
pub use session::{DebugOutcome, ExecutionSession, LaunchOptions, PendingStep, StepMode};
pub use stepper::{LineStepper, Program, StepGranularity, Stepper};
pub use types::*;
