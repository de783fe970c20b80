// Watch registry
//
// Watch expressions are identified by an opaque id, so the same text may be
// watched twice. `value` and `error` are always written together.

use crate::error::EvaluationError;
use crate::evaluator::Evaluator;
use crate::events::{EngineEvent, EventBus};
use crate::types::{SerializedValue, VariableContext, WatchExpression};
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug)]
pub struct WatchRegistry {
    watches: Vec<WatchExpression>,
    events: EventBus,
}

fn apply(watch: &mut WatchExpression, result: Result<SerializedValue, EvaluationError>) {
    match result {
        Ok(value) => {
            watch.value = Some(value);
            watch.error = None;
        }
        Err(e) => {
            watch.value = None;
            watch.error = Some(e.message);
        }
    }
}

impl WatchRegistry {
    pub fn new(events: EventBus) -> Self {
        Self {
            watches: Vec::new(),
            events,
        }
    }

    /// Add and immediately evaluate
    pub fn add(
        &mut self,
        expression: &str,
        evaluator: &Evaluator,
        context: &VariableContext,
    ) -> WatchExpression {
        let mut watch = WatchExpression {
            id: Uuid::new_v4().to_string(),
            expression: expression.to_string(),
            value: None,
            error: None,
            created_at: Utc::now(),
        };
        apply(&mut watch, evaluator.evaluate(expression, context));

        debug!("Watch {} added: {}", watch.id, watch.expression);
        self.watches.push(watch.clone());
        self.events.emit(EngineEvent::WatchExpressionAdded {
            watch: watch.clone(),
        });
        watch
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.watches.len();
        self.watches.retain(|w| w.id != id);
        let removed = self.watches.len() != before;
        if removed {
            self.events.emit(EngineEvent::WatchExpressionRemoved { id: id.to_string() });
        }
        removed
    }

    /// Replace the expression text and re-evaluate
    pub fn update(
        &mut self,
        id: &str,
        expression: &str,
        evaluator: &Evaluator,
        context: &VariableContext,
    ) -> Option<WatchExpression> {
        let watch = self.watches.iter_mut().find(|w| w.id == id)?;
        watch.expression = expression.to_string();
        apply(watch, evaluator.evaluate(expression, context));

        let watch = watch.clone();
        self.events.emit(EngineEvent::WatchExpressionUpdated {
            watch: watch.clone(),
        });
        Some(watch)
    }

    /// Re-evaluate every watch; failures stay on their own entry
    pub fn refresh_all(
        &mut self,
        evaluator: &Evaluator,
        context: &VariableContext,
    ) -> Vec<WatchExpression> {
        for watch in self.watches.iter_mut() {
            let result = evaluator.evaluate(&watch.expression, context);
            apply(watch, result);
        }

        let items = self.watches.clone();
        self.events.emit(EngineEvent::WatchExpressionsRefreshed {
            items: items.clone(),
        });
        items
    }

    pub fn get(&self, id: &str) -> Option<&WatchExpression> {
        self.watches.iter().find(|w| w.id == id)
    }

    pub fn list(&self) -> Vec<WatchExpression> {
        self.watches.clone()
    }

    pub fn len(&self) -> usize {
        self.watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }
}
