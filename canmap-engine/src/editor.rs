//! Field value editor
//!
//! Local edit buffer for one value. Primitive values (string, number,
//! boolean, null) are edited as plain text; structured values (object, array)
//! as pretty-printed JSON. Typing only changes the buffer. The authoritative
//! value changes on [`FieldEditor::commit`], and a structured buffer that does
//! not parse is flagged locally and never propagated.

use serde_json::{Number, Value};

/// Editor variant, chosen from the value's runtime shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorKind {
    Primitive,
    Structured,
}

impl EditorKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Object(_) | Value::Array(_) => EditorKind::Structured,
            _ => EditorKind::Primitive,
        }
    }
}

/// Edit buffer for a single field or cell
#[derive(Debug, Clone)]
pub struct FieldEditor {
    kind: EditorKind,
    value: Value,
    buffer: String,
    error: Option<String>,
}

impl FieldEditor {
    pub fn new(value: Value) -> Self {
        let kind = EditorKind::of(&value);
        let buffer = render(kind, &value);
        Self {
            kind,
            value,
            buffer,
            error: None,
        }
    }

    pub fn kind(&self) -> EditorKind {
        self.kind
    }

    /// Last committed (authoritative) value
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Validation message from the last failed commit
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_invalid(&self) -> bool {
        self.error.is_some()
    }

    /// Buffer differs from the authoritative value
    pub fn is_dirty(&self) -> bool {
        self.buffer != render(self.kind, &self.value)
    }

    /// Replace the buffer text. Does not touch the authoritative value.
    pub fn input(&mut self, text: impl Into<String>) {
        self.buffer = text.into();
    }

    /// Commit the buffer (explicit confirm or focus loss).
    ///
    /// Returns the new value when it differs from the authoritative one. A
    /// structured buffer that fails to parse sets the validation error and
    /// returns `None`; the previous value stays authoritative.
    pub fn commit(&mut self) -> Option<Value> {
        let next = match self.kind {
            EditorKind::Primitive => coerce_primitive(&self.value, &self.buffer),
            EditorKind::Structured => match serde_json::from_str::<Value>(&self.buffer) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::debug!(error = %e, "Structured value did not parse");
                    self.error = Some(format!("Invalid JSON: {}", e));
                    return None;
                }
            },
        };

        if next == self.value {
            self.reset(next);
            return None;
        }

        self.reset(next.clone());
        Some(next)
    }

    /// Follow an authoritative value that changed elsewhere.
    ///
    /// Any uncommitted text is discarded and the variant is re-selected.
    pub fn sync(&mut self, value: &Value) {
        if *value != self.value {
            self.reset(value.clone());
        }
    }

    fn reset(&mut self, value: Value) {
        *self = Self::new(value);
    }
}

/// Buffer text for a value
fn render(kind: EditorKind, value: &Value) -> String {
    match (kind, value) {
        (EditorKind::Structured, _) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
        (EditorKind::Primitive, Value::Null) => String::new(),
        (EditorKind::Primitive, Value::String(text)) => text.clone(),
        (EditorKind::Primitive, other) => other.to_string(),
    }
}

/// Text → value, keeping the previous value's type where the text allows.
///
/// Numbers and booleans stay numbers and booleans when the text parses as
/// one; cleared text on a non-string value becomes `null`. Anything else is
/// committed as a string.
fn coerce_primitive(previous: &Value, text: &str) -> Value {
    let trimmed = text.trim();
    match previous {
        Value::String(_) => Value::String(text.to_string()),
        _ if trimmed.is_empty() => Value::Null,
        Value::Number(_) => parse_number(trimmed).unwrap_or_else(|| Value::String(text.to_string())),
        Value::Bool(_) => match trimmed.to_ascii_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(text.to_string()),
        },
        _ => Value::String(text.to_string()),
    }
}

fn parse_number(text: &str) -> Option<Value> {
    if let Ok(int) = text.parse::<i64>() {
        return Some(Value::Number(int.into()));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}
