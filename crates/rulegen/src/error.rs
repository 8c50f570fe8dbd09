use std::{borrow::Cow, cell::RefCell, fmt::Display};

use serde::Serialize;

use crate::span::{LineCol, Spanned};

pub type Message = Cow<'static, str>;

/// A malformed spec file. Parsing never continues past one of these.
#[derive(Clone, PartialEq, Eq, Debug, thiserror::Error)]
#[error("{pos}: expected {expected}, found {found}")]
pub struct SyntaxError {
    pub pos: LineCol,
    pub expected: Message,
    pub found: String,
}

impl SyntaxError {
    pub fn new(pos: LineCol, expected: impl Into<Message>, found: impl Into<String>) -> Self {
        Self {
            pos,
            expected: expected.into(),
            found: found.into(),
        }
    }
    pub fn line(&self) -> u32 {
        self.pos.line
    }
    pub fn column(&self) -> u32 {
        self.pos.column
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct UnresolvedRef {
    pub category: String,
    pub name: String,
}

impl Display for UnresolvedRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.category, self.name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("{category}:{error}")]
    Syntax {
        category: String,
        error: SyntaxError,
    },
    #[error("{category}:{pos}: rule `{name}` is declared twice")]
    DuplicateRule {
        category: String,
        name: String,
        pos: LineCol,
    },
    #[error("category `{0}` is registered twice")]
    DuplicateCategory(String),
    #[error("unknown category `{0}`")]
    UnknownCategory(String),
    #[error("reserved category `{0}` must be parsed before any other category")]
    ReservedTooLate(String),
    #[error("unresolved rule references: {}", display_list(.names))]
    Unresolved { names: Vec<UnresolvedRef> },
    #[error("{category}:{pos}: operand %{index} of rule `{rule}` is out of range, the rule has {len} operands")]
    OperandOutOfRange {
        category: String,
        rule: String,
        index: u32,
        len: usize,
        pos: LineCol,
    },
    #[error("{category}:{pos}: action `{action}` takes at most {max} operands")]
    TooManyActionArgs {
        category: String,
        action: String,
        max: usize,
        pos: LineCol,
    },
    #[error("cannot {operation} in phase {found:?}, expected {expected:?}")]
    PhaseOrder {
        operation: &'static str,
        expected: crate::context::Phase,
        found: crate::context::Phase,
    },
}

fn display_list(names: &[UnresolvedRef]) -> String {
    let mut out = String::new();
    for (i, name) in names.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&name.to_string());
    }
    out
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub enum Severity {
    Warning,
    Note,
}

#[derive(Clone, Debug, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub category: String,
    pub pos: Option<LineCol>,
    pub message: String,
}

/// Collects the problems that are reported without aborting the run.
#[derive(Default)]
pub struct Diagnostics {
    items: RefCell<Vec<Diagnostic>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn warning(&self, category: &str, pos: Option<LineCol>, message: impl ToString) {
        self.push(Severity::Warning, category, pos, message.to_string());
    }
    pub fn note(&self, category: &str, pos: Option<LineCol>, message: impl ToString) {
        self.push(Severity::Note, category, pos, message.to_string());
    }
    pub fn warning_at(&self, category: &str, message: Spanned<impl ToString>) {
        self.push(
            Severity::Warning,
            category,
            Some(message.pos),
            message.inner.to_string(),
        );
    }
    fn push(&self, severity: Severity, category: &str, pos: Option<LineCol>, message: String) {
        match severity {
            Severity::Warning => log::warn!("{category}: {message}"),
            Severity::Note => log::debug!("{category}: {message}"),
        }
        self.items.borrow_mut().push(Diagnostic {
            severity,
            category: category.to_owned(),
            pos,
            message,
        });
    }
    pub fn warnings(&self) -> usize {
        self.items
            .borrow()
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count()
    }
    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.items.borrow_mut())
    }
}
