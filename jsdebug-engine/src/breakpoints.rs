// Breakpoint registry
//
// Breakpoints are keyed by `file:line` and outlive debug sessions. Every
// mutation is published so gutter and breakpoint-list views stay in sync.

use crate::error::EvaluationError;
use crate::events::{EngineEvent, EventBus};
use crate::types::{breakpoint_id, Breakpoint, BreakpointId};
use chrono::Utc;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Result of toggling at an editor position
#[derive(Debug, Clone, PartialEq)]
pub enum BreakpointChange {
    Added(Breakpoint),
    Removed(Breakpoint),
}

#[derive(Debug)]
pub struct BreakpointRegistry {
    breakpoints: HashMap<BreakpointId, Breakpoint>,
    events: EventBus,
}

fn normalize_condition(condition: Option<String>) -> Option<String> {
    condition
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

impl BreakpointRegistry {
    pub fn new(events: EventBus) -> Self {
        Self {
            breakpoints: HashMap::new(),
            events,
        }
    }

    /// Add a breakpoint, or update the one already at `file_name:line_number`
    pub fn add(
        &mut self,
        file_name: &str,
        line_number: u32,
        condition: Option<String>,
    ) -> Breakpoint {
        let id = breakpoint_id(file_name, line_number);
        let condition = normalize_condition(condition);

        let breakpoint = match self.breakpoints.get_mut(&id) {
            Some(existing) => {
                debug!("Updating breakpoint {}", id);
                existing.condition = condition;
                existing.enabled = true;
                existing.clone()
            }
            None => {
                info!("Breakpoint set at {}", id);
                let breakpoint = Breakpoint {
                    id: id.clone(),
                    file_name: file_name.to_string(),
                    line_number,
                    condition,
                    enabled: true,
                    hit_count: 0,
                    created_at: Utc::now(),
                };
                self.breakpoints.insert(id, breakpoint.clone());
                breakpoint
            }
        };

        self.events.emit(EngineEvent::BreakpointAdded {
            breakpoint: breakpoint.clone(),
        });
        breakpoint
    }

    pub fn remove(&mut self, id: &str) -> bool {
        match self.breakpoints.remove(id) {
            Some(breakpoint) => {
                info!("Breakpoint removed: {}", id);
                self.events.emit(EngineEvent::BreakpointRemoved { breakpoint });
                true
            }
            None => false,
        }
    }

    /// Flip `enabled`
    pub fn toggle(&mut self, id: &str) -> Option<Breakpoint> {
        let breakpoint = self.breakpoints.get_mut(id)?;
        breakpoint.enabled = !breakpoint.enabled;
        let breakpoint = breakpoint.clone();

        debug!("Breakpoint {} enabled={}", id, breakpoint.enabled);
        self.events.emit(EngineEvent::BreakpointToggled {
            breakpoint: breakpoint.clone(),
        });
        Some(breakpoint)
    }

    /// Gutter click: remove the breakpoint at this line, or add one
    pub fn toggle_at(&mut self, file_name: &str, line_number: u32) -> BreakpointChange {
        let id = breakpoint_id(file_name, line_number);
        match self.breakpoints.get(&id).cloned() {
            Some(existing) => {
                self.remove(&id);
                BreakpointChange::Removed(existing)
            }
            None => BreakpointChange::Added(self.add(file_name, line_number, None)),
        }
    }

    pub fn set_condition(&mut self, id: &str, condition: Option<String>) -> Option<Breakpoint> {
        let breakpoint = self.breakpoints.get_mut(id)?;
        breakpoint.condition = normalize_condition(condition);
        let breakpoint = breakpoint.clone();

        self.events.emit(EngineEvent::BreakpointAdded {
            breakpoint: breakpoint.clone(),
        });
        Some(breakpoint)
    }

    pub fn clear_all(&mut self) -> usize {
        let count = self.breakpoints.len();
        self.breakpoints.clear();
        info!("Cleared {} breakpoint(s)", count);
        self.events.emit(EngineEvent::AllBreakpointsCleared { count });
        count
    }

    pub fn get(&self, id: &str) -> Option<&Breakpoint> {
        self.breakpoints.get(id)
    }

    /// All breakpoints ordered by file, then line
    pub fn list(&self) -> Vec<Breakpoint> {
        let mut list: Vec<Breakpoint> = self.breakpoints.values().cloned().collect();
        list.sort_by(|a, b| {
            a.file_name
                .cmp(&b.file_name)
                .then(a.line_number.cmp(&b.line_number))
        });
        list
    }

    pub fn for_file(&self, file_name: &str) -> Vec<Breakpoint> {
        self.list()
            .into_iter()
            .filter(|bp| bp.file_name == file_name)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.breakpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }

    /// The enabled breakpoint at this exact position, if any
    pub fn matching(&self, file_name: &str, line_number: u32) -> Option<&Breakpoint> {
        self.breakpoints
            .get(&breakpoint_id(file_name, line_number))
            .filter(|bp| bp.enabled)
    }

    /// Hit check.
    ///
    /// A condition that fails to evaluate still breaks: a malformed condition
    /// must never make a breakpoint silently disappear.
    pub fn should_break<F>(&self, file_name: &str, line_number: u32, evaluate_condition: F) -> bool
    where
        F: FnOnce(&str) -> Result<bool, EvaluationError>,
    {
        self.matching(file_name, line_number)
            .is_some_and(|breakpoint| condition_breaks(breakpoint, evaluate_condition))
    }

    /// Count a pause on this breakpoint
    pub fn record_hit(&mut self, id: &str) -> Option<Breakpoint> {
        let breakpoint = self.breakpoints.get_mut(id)?;
        breakpoint.hit_count += 1;
        Some(breakpoint.clone())
    }
}

/// Condition policy for one breakpoint: no condition breaks, an evaluation
/// error breaks, otherwise the condition's truthiness decides
pub fn condition_breaks<F>(breakpoint: &Breakpoint, evaluate_condition: F) -> bool
where
    F: FnOnce(&str) -> Result<bool, EvaluationError>,
{
    match &breakpoint.condition {
        None => true,
        Some(condition) => match evaluate_condition(condition) {
            Ok(truthy) => truthy,
            Err(e) => {
                warn!(
                    "Condition on {} failed ({}), breaking anyway",
                    breakpoint.id, e.message
                );
                true
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventChannel;

    fn registry() -> BreakpointRegistry {
        BreakpointRegistry::new(EventBus::new(64))
    }

    fn always_error(condition: &str) -> Result<bool, EvaluationError> {
        Err(EvaluationError::new(condition, "ReferenceError: undefinedVar is not defined"))
    }

    #[test]
    fn test_readd_updates_instead_of_duplicating() {
        let mut reg = registry();
        reg.add("main.js", 4, Some("a > 1".to_string()));
        let updated = reg.add("main.js", 4, Some("a > 2".to_string()));

        assert_eq!(reg.len(), 1);
        assert_eq!(updated.condition.as_deref(), Some("a > 2"));
        assert_eq!(reg.get("main.js:4").unwrap().condition.as_deref(), Some("a > 2"));
    }

    #[test]
    fn test_readd_reenables_and_keeps_hits() {
        let mut reg = registry();
        reg.add("main.js", 4, None);
        reg.record_hit("main.js:4");
        reg.toggle("main.js:4");

        let updated = reg.add("main.js", 4, None);
        assert!(updated.enabled);
        assert_eq!(updated.hit_count, 1);
    }

    #[test]
    fn test_blank_condition_is_none() {
        let mut reg = registry();
        let bp = reg.add("a.js", 1, Some("   ".to_string()));
        assert_eq!(bp.condition, None);
    }

    #[test]
    fn test_failing_condition_breaks() {
        let mut reg = registry();
        reg.add("main.js", 2, Some("undefinedVar.prop".to_string()));
        assert!(reg.should_break("main.js", 2, always_error));
    }

    #[test]
    fn test_condition_result_decides() {
        let mut reg = registry();
        reg.add("main.js", 2, Some("x > 1".to_string()));
        assert!(reg.should_break("main.js", 2, |_| Ok(true)));
        assert!(!reg.should_break("main.js", 2, |_| Ok(false)));
    }

    #[test]
    fn test_decision_uses_the_evaluated_breakpoint() {
        let mut reg = registry();
        let candidate = reg.add("main.js", 2, Some("x > 1".to_string()));
        reg.set_condition("main.js:2", Some("x > 100".to_string()));
        reg.toggle("main.js:2");

        let mut seen = None;
        let hit = condition_breaks(&candidate, |condition| {
            seen = Some(condition.to_string());
            Ok(true)
        });
        assert!(hit);
        assert_eq!(seen.as_deref(), Some("x > 1"));
    }

    #[test]
    fn test_disabled_breakpoint_never_breaks() {
        let mut reg = registry();
        reg.add("main.js", 2, Some("undefinedVar.prop".to_string()));
        reg.toggle("main.js:2");

        assert!(!reg.should_break("main.js", 2, always_error));
        assert!(!reg.should_break("main.js", 2, |_| Ok(true)));
    }

    #[test]
    fn test_no_breakpoint_no_break() {
        let reg = registry();
        assert!(!reg.should_break("main.js", 2, |_| Ok(true)));
    }

    #[test]
    fn test_toggle_at_adds_then_removes() {
        let mut reg = registry();
        assert!(matches!(reg.toggle_at("a.js", 3), BreakpointChange::Added(_)));
        assert!(matches!(reg.toggle_at("a.js", 3), BreakpointChange::Removed(_)));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_list_is_ordered() {
        let mut reg = registry();
        reg.add("b.js", 1, None);
        reg.add("a.js", 10, None);
        reg.add("a.js", 2, None);

        let ids: Vec<_> = reg.list().into_iter().map(|bp| bp.id).collect();
        assert_eq!(ids, vec!["a.js:2", "a.js:10", "b.js:1"]);
        assert_eq!(reg.for_file("a.js").len(), 2);
    }

    #[test]
    fn test_remove_missing_returns_false() {
        let mut reg = registry();
        assert!(!reg.remove("nope.js:1"));
        assert!(reg.toggle("nope.js:1").is_none());
    }

    #[tokio::test]
    async fn test_mutations_are_published() {
        let bus = EventBus::new(64);
        let mut stream = bus.subscribe();
        let mut reg = BreakpointRegistry::new(bus);

        reg.add("a.js", 1, None);
        reg.toggle("a.js:1");
        reg.remove("a.js:1");
        reg.add("a.js", 2, None);
        reg.clear_all();

        let channels: Vec<_> = stream.drain().iter().map(|e| e.channel()).collect();
        assert_eq!(
            channels,
            vec![
                EventChannel::BreakpointAdded,
                EventChannel::BreakpointToggled,
                EventChannel::BreakpointRemoved,
                EventChannel::BreakpointAdded,
                EventChannel::AllBreakpointsCleared,
            ]
        );
    }
}
