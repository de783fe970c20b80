// Engine data model
//
// Records shared between the registries, the session state machine and the
// event stream. All of them serialize with camelCase field names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Depth- and size-bounded structural copy of a runtime value
pub type SerializedValue = serde_json::Value;

/// Variable name -> captured value, as seen by the evaluator
pub type VariableContext = BTreeMap<String, SerializedValue>;

pub type BreakpointId = String;
pub type WatchId = String;
pub type SessionId = String;

/// Breakpoint identity is the `file:line` pair.
pub fn breakpoint_id(file_name: &str, line_number: u32) -> BreakpointId {
    format!("{}:{}", file_name, line_number)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    pub id: BreakpointId,
    pub file_name: String,
    pub line_number: u32,
    pub condition: Option<String>,
    pub enabled: bool,
    pub hit_count: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchExpression {
    pub id: WatchId,
    pub expression: String,
    /// `None` until evaluated, and whenever `error` is set
    pub value: Option<SerializedValue>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    pub function_name: String,
    pub file_name: String,
    pub line_number: u32,
    pub column_number: u32,
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Stopped,
    Running,
    Paused,
    Stepping,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Stepping => write!(f, "stepping"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Error,
    Warn,
    Info,
}

impl ConsoleLevel {
    pub const ALL: [ConsoleLevel; 4] = [
        ConsoleLevel::Log,
        ConsoleLevel::Error,
        ConsoleLevel::Warn,
        ConsoleLevel::Info,
    ];

    pub fn method_name(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleEntry {
    #[serde(rename = "type")]
    pub level: ConsoleLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugSession {
    pub id: SessionId,
    pub file_name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
}

impl DebugSession {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PauseReason {
    Breakpoint,
    Step,
    Pause,
    Entry,
}

impl fmt::Display for PauseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Breakpoint => write!(f, "breakpoint"),
            Self::Step => write!(f, "step"),
            Self::Pause => write!(f, "pause"),
            Self::Entry => write!(f, "entry"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub file_name: String,
    pub line_number: u32,
    pub column_number: u32,
}

/// Everything an observer needs to redraw the debug panels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSnapshot {
    pub state: ExecutionState,
    pub is_running: bool,
    pub is_debugging: bool,
    pub is_paused: bool,
    pub session: Option<DebugSession>,
    pub current_file: Option<String>,
    pub current_line: Option<u32>,
    pub call_stack: Vec<CallFrame>,
    pub selected_frame: usize,
    pub variables: VariableContext,
}
