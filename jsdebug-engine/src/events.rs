// Engine event stream
//
// Every observable change is published on a broadcast bus as a typed
// `EngineEvent`. Observers subscribe to all channels or to a subset.

use crate::runner::RunError;
use crate::types::*;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EngineEvent {
    Initialized,
    ExecutionStarted {
        code: String,
        debug: bool,
    },
    ExecutionCompleted {
        result: Option<SerializedValue>,
        output: Vec<ConsoleEntry>,
    },
    ExecutionError {
        error: RunError,
        output: Vec<ConsoleEntry>,
    },
    ConsoleOutput {
        entry: ConsoleEntry,
    },
    ConsoleCleared,
    BreakpointAdded {
        breakpoint: Breakpoint,
    },
    BreakpointRemoved {
        breakpoint: Breakpoint,
    },
    BreakpointToggled {
        breakpoint: Breakpoint,
    },
    AllBreakpointsCleared {
        count: usize,
    },
    WatchExpressionAdded {
        watch: WatchExpression,
    },
    WatchExpressionRemoved {
        id: WatchId,
    },
    WatchExpressionUpdated {
        watch: WatchExpression,
    },
    WatchExpressionsRefreshed {
        items: Vec<WatchExpression>,
    },
    DebugSessionStarted {
        session: DebugSession,
    },
    DebugSessionStopped {
        session: DebugSession,
    },
    DebugPaused {
        reason: PauseReason,
        location: Location,
        call_stack: Vec<CallFrame>,
        variables: VariableContext,
    },
    DebugResumed,
    DebugStarted {
        file_name: String,
    },
    DebugCompleted {
        file_name: String,
        result: Option<SerializedValue>,
    },
    DebugError {
        file_name: String,
        error: String,
    },
    ExecutionLineChanged {
        file_name: String,
        line_number: u32,
    },
    CallStackUpdated {
        frames: Vec<CallFrame>,
    },
    CallStackFrameSelected {
        frame: CallFrame,
        index: usize,
    },
    BreakpointHit {
        breakpoint: Breakpoint,
        variables: VariableContext,
        call_stack: Vec<CallFrame>,
    },
    ExecutionStateChanged {
        snapshot: ExecutionSnapshot,
    },
}

/// Channel discriminant, one per event shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventChannel {
    Initialized,
    ExecutionStarted,
    ExecutionCompleted,
    ExecutionError,
    ConsoleOutput,
    ConsoleCleared,
    BreakpointAdded,
    BreakpointRemoved,
    BreakpointToggled,
    AllBreakpointsCleared,
    WatchExpressionAdded,
    WatchExpressionRemoved,
    WatchExpressionUpdated,
    WatchExpressionsRefreshed,
    DebugSessionStarted,
    DebugSessionStopped,
    DebugPaused,
    DebugResumed,
    DebugStarted,
    DebugCompleted,
    DebugError,
    ExecutionLineChanged,
    CallStackUpdated,
    CallStackFrameSelected,
    BreakpointHit,
    ExecutionStateChanged,
}

impl EngineEvent {
    pub fn channel(&self) -> EventChannel {
        match self {
            Self::Initialized => EventChannel::Initialized,
            Self::ExecutionStarted { .. } => EventChannel::ExecutionStarted,
            Self::ExecutionCompleted { .. } => EventChannel::ExecutionCompleted,
            Self::ExecutionError { .. } => EventChannel::ExecutionError,
            Self::ConsoleOutput { .. } => EventChannel::ConsoleOutput,
            Self::ConsoleCleared => EventChannel::ConsoleCleared,
            Self::BreakpointAdded { .. } => EventChannel::BreakpointAdded,
            Self::BreakpointRemoved { .. } => EventChannel::BreakpointRemoved,
            Self::BreakpointToggled { .. } => EventChannel::BreakpointToggled,
            Self::AllBreakpointsCleared { .. } => EventChannel::AllBreakpointsCleared,
            Self::WatchExpressionAdded { .. } => EventChannel::WatchExpressionAdded,
            Self::WatchExpressionRemoved { .. } => EventChannel::WatchExpressionRemoved,
            Self::WatchExpressionUpdated { .. } => EventChannel::WatchExpressionUpdated,
            Self::WatchExpressionsRefreshed { .. } => EventChannel::WatchExpressionsRefreshed,
            Self::DebugSessionStarted { .. } => EventChannel::DebugSessionStarted,
            Self::DebugSessionStopped { .. } => EventChannel::DebugSessionStopped,
            Self::DebugPaused { .. } => EventChannel::DebugPaused,
            Self::DebugResumed => EventChannel::DebugResumed,
            Self::DebugStarted { .. } => EventChannel::DebugStarted,
            Self::DebugCompleted { .. } => EventChannel::DebugCompleted,
            Self::DebugError { .. } => EventChannel::DebugError,
            Self::ExecutionLineChanged { .. } => EventChannel::ExecutionLineChanged,
            Self::CallStackUpdated { .. } => EventChannel::CallStackUpdated,
            Self::CallStackFrameSelected { .. } => EventChannel::CallStackFrameSelected,
            Self::BreakpointHit { .. } => EventChannel::BreakpointHit,
            Self::ExecutionStateChanged { .. } => EventChannel::ExecutionStateChanged,
        }
    }

    /// Wire name, identical to the serialized `type` tag
    pub fn name(&self) -> &'static str {
        self.channel().name()
    }
}

impl EventChannel {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::ExecutionStarted => "executionStarted",
            Self::ExecutionCompleted => "executionCompleted",
            Self::ExecutionError => "executionError",
            Self::ConsoleOutput => "consoleOutput",
            Self::ConsoleCleared => "consoleCleared",
            Self::BreakpointAdded => "breakpointAdded",
            Self::BreakpointRemoved => "breakpointRemoved",
            Self::BreakpointToggled => "breakpointToggled",
            Self::AllBreakpointsCleared => "allBreakpointsCleared",
            Self::WatchExpressionAdded => "watchExpressionAdded",
            Self::WatchExpressionRemoved => "watchExpressionRemoved",
            Self::WatchExpressionUpdated => "watchExpressionUpdated",
            Self::WatchExpressionsRefreshed => "watchExpressionsRefreshed",
            Self::DebugSessionStarted => "debugSessionStarted",
            Self::DebugSessionStopped => "debugSessionStopped",
            Self::DebugPaused => "debugPaused",
            Self::DebugResumed => "debugResumed",
            Self::DebugStarted => "debugStarted",
            Self::DebugCompleted => "debugCompleted",
            Self::DebugError => "debugError",
            Self::ExecutionLineChanged => "executionLineChanged",
            Self::CallStackUpdated => "callStackUpdated",
            Self::CallStackFrameSelected => "callStackFrameSelected",
            Self::BreakpointHit => "breakpointHit",
            Self::ExecutionStateChanged => "executionStateChanged",
        }
    }
}

/// Publishing side of the event stream, cheap to clone
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: EngineEvent) {
        debug!("Emitting {}", event.name());
        if self.tx.send(event).is_err() {
            trace!("No subscribers, event dropped");
        }
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            rx: self.tx.subscribe(),
            filter: None,
        }
    }

    /// Receive only the listed channels
    pub fn subscribe_to(&self, channels: &[EventChannel]) -> EventStream {
        EventStream {
            rx: self.tx.subscribe(),
            filter: Some(channels.to_vec()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Receiving side of the event stream
#[derive(Debug)]
pub struct EventStream {
    rx: broadcast::Receiver<EngineEvent>,
    filter: Option<Vec<EventChannel>>,
}

impl EventStream {
    fn accepts(&self, event: &EngineEvent) -> bool {
        match &self.filter {
            Some(channels) => channels.contains(&event.channel()),
            None => true,
        }
    }

    /// Wait for the next event; `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<EngineEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event subscriber lagged, {} events skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next buffered event without waiting
    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("Event subscriber lagged, {} events skipped", skipped);
                }
                Err(_) => return None,
            }
        }
    }

    /// Drain everything currently buffered
    pub fn drain(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_tag_matches_name() {
        let event = EngineEvent::ExecutionLineChanged {
            file_name: "main.js".to_string(),
            line_number: 3,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.name());
        assert_eq!(json["fileName"], "main.js");
        assert_eq!(json["lineNumber"], 3);
    }

    #[test]
    fn test_unit_variant_serializes_tag_only() {
        let json = serde_json::to_value(EngineEvent::ConsoleCleared).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "consoleCleared" }));
    }

    #[tokio::test]
    async fn test_filtered_subscription() {
        let bus = EventBus::new(16);
        let mut paused_only = bus.subscribe_to(&[EventChannel::DebugResumed]);
        let mut all = bus.subscribe();

        bus.emit(EngineEvent::ConsoleCleared);
        bus.emit(EngineEvent::DebugResumed);

        assert_eq!(paused_only.recv().await, Some(EngineEvent::DebugResumed));
        assert!(paused_only.try_recv().is_none());
        assert_eq!(all.drain().len(), 2);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        bus.emit(EngineEvent::Initialized);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
