// Engine event buffer
//
// MCP has no push channel for tool servers, so engine events are buffered on a
// subscription opened at startup and handed out by `events.poll`.

use jsdebug_engine::{EngineEvent, ExecutionEngine, EventStream};
use tokio::sync::Mutex;
use tracing::debug;

pub struct EventLog {
    stream: Mutex<EventStream>,
}

impl EventLog {
    pub fn new(engine: &ExecutionEngine) -> Self {
        Self {
            stream: Mutex::new(engine.subscribe()),
        }
    }

    /// Up to `limit` events published since the last poll, oldest first
    pub async fn poll(&self, limit: usize) -> Vec<EngineEvent> {
        let mut stream = self.stream.lock().await;
        let mut events = Vec::new();
        while events.len() < limit {
            match stream.try_recv() {
                Some(event) => events.push(event),
                None => break,
            }
        }
        debug!("Polled {} event(s)", events.len());
        events
    }
}
