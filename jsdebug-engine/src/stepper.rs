// Stepping strategy
//
// The session state machine drives a scan over "positions" of a program and
// asks the stepper which positions exist and what a step-into would enter.
// Only line granularity exists: every source line is a position, and a step
// runs exactly one line before pausing again.
//
// The lexical helpers below are deliberately shallow. They see identifiers,
// brackets and punctuation with strings and comments blanked out, which is
// enough to find top-level declarations and call sites on a line.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepGranularity {
    Line,
}

/// A source buffer loaded into a debug session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub file_name: String,
    pub code: String,
    lines: Vec<String>,
}

impl Program {
    pub fn new(file_name: impl Into<String>, code: impl Into<String>) -> Arc<Self> {
        let code = code.into();
        let lines = if code.is_empty() {
            Vec::new()
        } else {
            code.split('\n')
                .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
                .collect()
        };
        Arc::new(Self {
            file_name: file_name.into(),
            code,
            lines,
        })
    }

    pub fn line_count(&self) -> u32 {
        self.lines.len() as u32
    }

    /// 1-based line text
    pub fn line(&self, line_number: u32) -> Option<&str> {
        let index = line_number.checked_sub(1)? as usize;
        self.lines.get(index).map(String::as_str)
    }

    /// Lines `1..line_number`, joined, i.e. everything that ran before it
    pub fn prefix(&self, line_number: u32) -> String {
        let end = (line_number.saturating_sub(1) as usize).min(self.lines.len());
        self.lines[..end].join("\n")
    }

    pub fn lines_before(&self, line_number: u32) -> &[String] {
        let end = (line_number.saturating_sub(1) as usize).min(self.lines.len());
        &self.lines[..end]
    }
}

pub trait Stepper: Send + Sync {
    fn granularity(&self) -> StepGranularity;

    /// Positions a scan starting at `from` visits, in order
    fn positions(&self, program: &Program, from: u32) -> Vec<u32>;

    /// Callee a step-into at `line` would enter, if the line makes a call
    fn call_target(&self, program: &Program, line: u32) -> Option<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LineStepper;

impl Stepper for LineStepper {
    fn granularity(&self) -> StepGranularity {
        StepGranularity::Line
    }

    fn positions(&self, program: &Program, from: u32) -> Vec<u32> {
        (from.max(1)..=program.line_count()).collect()
    }

    fn call_target(&self, program: &Program, line: u32) -> Option<String> {
        let text = program.line(line)?;
        first_call(&tokenize(&[text.to_string()]))
    }
}

const NON_CALL_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "function", "return", "typeof", "with", "do",
    "else", "await", "void", "delete", "in", "of", "instanceof", "yield", "super", "import",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Ident(String),
    Punct(char),
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: usize,
}

impl Token {
    fn ident(&self) -> Option<&str> {
        match &self.tok {
            Tok::Ident(s) => Some(s),
            Tok::Punct(_) => None,
        }
    }

    fn is(&self, c: char) -> bool {
        self.tok == Tok::Punct(c)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lex {
    Code,
    Str(char),
    BlockComment,
}

/// Identifiers and punctuation, skipping string contents and comments.
/// Block comments and template literals may span lines.
fn tokenize(lines: &[String]) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut state = Lex::Code;

    for (line, text) in lines.iter().enumerate() {
        let chars: Vec<char> = text.chars().collect();
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            match state {
                Lex::BlockComment => {
                    if c == '*' && chars.get(i + 1) == Some(&'/') {
                        state = Lex::Code;
                        i += 1;
                    }
                }
                Lex::Str(quote) => {
                    if c == '\\' {
                        i += 1;
                    } else if c == quote {
                        state = Lex::Code;
                    }
                }
                Lex::Code => {
                    if c == '/' && chars.get(i + 1) == Some(&'/') {
                        break;
                    } else if c == '/' && chars.get(i + 1) == Some(&'*') {
                        state = Lex::BlockComment;
                        i += 1;
                    } else if c == '"' || c == '\'' || c == '`' {
                        state = Lex::Str(c);
                    } else if c.is_alphanumeric() || c == '_' || c == '$' {
                        let start = i;
                        while i < chars.len()
                            && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                        {
                            i += 1;
                        }
                        tokens.push(Token {
                            tok: Tok::Ident(chars[start..i].iter().collect()),
                            line,
                        });
                        continue;
                    } else if !c.is_whitespace() {
                        tokens.push(Token {
                            tok: Tok::Punct(c),
                            line,
                        });
                    }
                }
            }
            i += 1;
        }

        // Plain quotes cannot continue onto the next line
        if matches!(state, Lex::Str('"') | Lex::Str('\'')) {
            state = Lex::Code;
        }
    }

    tokens
}

fn is_open(t: &Token) -> bool {
    t.is('(') || t.is('[') || t.is('{')
}

fn is_close(t: &Token) -> bool {
    t.is(')') || t.is(']') || t.is('}')
}

fn is_name(s: &str) -> bool {
    s.chars()
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && !crate::evaluator::is_reserved_word(s)
}

/// Top-level names declared in `lines` (`let`, `const`, `var`, `function`,
/// `class`), in declaration order without duplicates
pub fn declared_names(lines: &[String]) -> Vec<String> {
    let tokens = tokenize(lines);
    let mut names: Vec<String> = Vec::new();
    let mut push = |name: &str| {
        if is_name(name) && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    };

    let mut depth = 0usize;
    let mut i = 0;
    while i < tokens.len() {
        let t = &tokens[i];
        if is_open(t) {
            depth += 1;
        } else if is_close(t) {
            depth = depth.saturating_sub(1);
        } else if depth == 0 {
            match t.ident() {
                Some("let") | Some("const") | Some("var") => {
                    i = declarators(&tokens, i + 1, &mut push);
                    continue;
                }
                Some("function") | Some("class") if starts_statement(&tokens, i) => {
                    let mut j = i + 1;
                    if tokens.get(j).is_some_and(|t| t.is('*')) {
                        j += 1;
                    }
                    if let Some(name) = tokens.get(j).and_then(Token::ident) {
                        push(name);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }

    names
}

/// A `function`/`class` keyword in declaration position
fn starts_statement(tokens: &[Token], i: usize) -> bool {
    let mut j = i;
    while j > 0 && matches!(tokens[j - 1].ident(), Some("async") | Some("export")) {
        j -= 1;
    }
    match j.checked_sub(1).map(|p| &tokens[p]) {
        None => true,
        Some(prev) => prev.is(';') || prev.is('}') || prev.line != tokens[i].line,
    }
}

/// Parse a declarator list starting at `i`; returns the index after it
fn declarators(tokens: &[Token], mut i: usize, push: &mut impl FnMut(&str)) -> usize {
    loop {
        let Some(t) = tokens.get(i) else {
            return i;
        };
        if let Some(name) = t.ident() {
            push(name);
            i += 1;
        } else if t.is('{') || t.is('[') {
            i = pattern(tokens, i, push);
        } else {
            return i;
        }

        // Skip an initializer up to `,` or `;` at this level, or a line
        // break once all brackets are closed
        let mut depth = 0usize;
        let mut last_line = tokens.get(i.saturating_sub(1)).map(|t| t.line);
        while let Some(t) = tokens.get(i) {
            if depth == 0 {
                if t.is(',') {
                    i += 1;
                    break;
                }
                if t.is(';') {
                    return i + 1;
                }
                if is_close(t) {
                    return i;
                }
                if last_line.is_some_and(|l| l != t.line) && !t.is('=') {
                    return i;
                }
            }
            if is_open(t) {
                depth += 1;
            } else if is_close(t) {
                depth -= 1;
            }
            last_line = Some(t.line);
            i += 1;
        }
        if i >= tokens.len() {
            return i;
        }
    }
}

/// Binding names inside a destructuring pattern opening at `i`
fn pattern(tokens: &[Token], mut i: usize, push: &mut impl FnMut(&str)) -> usize {
    let mut depth = 0usize;
    let mut in_default = false;
    let mut default_depth = 0usize;

    while let Some(t) = tokens.get(i) {
        if is_open(t) {
            depth += 1;
        } else if is_close(t) {
            depth -= 1;
            if in_default && depth < default_depth {
                in_default = false;
            }
            if depth == 0 {
                return i + 1;
            }
        } else if t.is('=') {
            in_default = true;
            default_depth = depth;
        } else if t.is(',') && in_default && depth == default_depth {
            in_default = false;
        } else if let Some(name) = t.ident() {
            let is_key = tokens.get(i + 1).is_some_and(|n| n.is(':'));
            if !in_default && !is_key {
                push(name);
            }
        }
        i += 1;
    }
    i
}

/// First call site in `tokens`, as a dotted name (`obj.method`)
fn first_call(tokens: &[Token]) -> Option<String> {
    for (i, t) in tokens.iter().enumerate() {
        let Some(name) = t.ident() else {
            continue;
        };
        if !tokens.get(i + 1).is_some_and(|n| n.is('(')) {
            continue;
        }
        if NON_CALL_KEYWORDS.contains(&name) || name.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if i > 0 && tokens[i - 1].ident() == Some("function") {
            continue;
        }

        let mut parts = vec![name.to_string()];
        let mut j = i;
        while j >= 2 && tokens[j - 1].is('.') {
            match tokens[j - 2].ident() {
                Some(owner) => parts.push(owner.to_string()),
                None => break,
            }
            j -= 2;
        }
        parts.reverse();
        return Some(parts.join("."));
    }
    None
}
