// Expression evaluator
//
// Evaluates an expression with every context variable bound as a parameter of
// a wrapper function:
//
//   (function (x, y) { return (<expression>); })(<x as JSON>, <y as JSON>)
//
// The wrapper runs in a fresh muted sandbox, so an expression can neither see
// nor disturb anything outside its own parameters. Assigning to a parameter
// (`x = 5`) only changes the sandbox copy.

use crate::config::EngineConfig;
use crate::console::ConsoleSink;
use crate::error::EvaluationError;
use crate::sandbox::{CancellationToken, Sandbox, SandboxLimits};
use crate::types::{SerializedValue, VariableContext};
use tracing::{debug, warn};

const RESERVED_WORDS: &[&str] = &[
    "arguments", "await", "break", "case", "catch", "class", "const", "continue", "debugger",
    "default", "delete", "do", "else", "enum", "eval", "export", "extends", "false", "finally",
    "for", "function", "if", "implements", "import", "in", "instanceof", "interface", "let",
    "new", "null", "package", "private", "protected", "public", "return", "static", "super",
    "switch", "this", "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield",
];

pub fn is_reserved_word(name: &str) -> bool {
    RESERVED_WORDS.contains(&name)
}

/// True if `name` can be used as a parameter name
pub fn is_bindable_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_' || first == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        && !is_reserved_word(name)
}

#[derive(Debug, Clone)]
pub struct Evaluator {
    limits: SandboxLimits,
    max_depth: usize,
}

impl Evaluator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            limits: SandboxLimits::new(config.evaluation_timeout_ms, config.memory_limit),
            max_depth: config.max_depth,
        }
    }

    /// Evaluate `expression` and snapshot its value
    pub fn evaluate(
        &self,
        expression: &str,
        context: &VariableContext,
    ) -> Result<SerializedValue, EvaluationError> {
        let source = wrap(expression, context, false);
        self.run(expression, &source)
    }

    /// Evaluate `expression` for its JS truthiness
    pub fn test(&self, expression: &str, context: &VariableContext) -> Result<bool, EvaluationError> {
        let source = wrap(expression, context, true);
        match self.run(expression, &source)? {
            SerializedValue::Bool(truthy) => Ok(truthy),
            other => Err(EvaluationError::new(
                expression,
                format!("expected a boolean, got {}", other),
            )),
        }
    }

    fn run(&self, expression: &str, source: &str) -> Result<SerializedValue, EvaluationError> {
        let sandbox = Sandbox::new(self.limits, CancellationToken::new(), ConsoleSink::Muted)
            .map_err(|e| EvaluationError::new(expression, e.to_string()))?;

        sandbox.run(source, self.max_depth).map_err(|failure| {
            debug!("Evaluation of {:?} failed: {}", expression, failure);
            EvaluationError::new(expression, failure.to_string())
        })
    }
}

fn wrap(expression: &str, context: &VariableContext, truthiness: bool) -> String {
    let mut params = Vec::with_capacity(context.len());
    let mut args = Vec::with_capacity(context.len());

    for (name, value) in context {
        if !is_bindable_identifier(name) {
            warn!("Variable {:?} cannot be bound as a parameter, skipping", name);
            continue;
        }
        params.push(name.as_str());
        args.push(value.to_string());
    }

    // The newline keeps a trailing `//` comment from swallowing the `)`
    let body = if truthiness {
        format!("return !!({}\n);", expression)
    } else {
        format!("return ({}\n);", expression)
    };

    format!(
        "(function ({}) {{ {} }})({})",
        params.join(", "),
        body,
        args.join(", ")
    )
}
