use crate::core::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A bound of a keyset scan range.
///
/// Integer keys compare numerically, text keys compare by the target
/// collation (the database does the ordering, we only carry the value).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum KeyBound {
    Integer(i64),
    Unsigned(u64),
    Text(String),
}

impl KeyBound {
    /// Builds a bound from a value read out of the unique key column.
    /// Returns `None` for values that cannot drive pagination.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(v) => Some(KeyBound::Integer(*v)),
            Value::Uint(v) => Some(KeyBound::Unsigned(*v)),
            Value::String(v) => Some(KeyBound::Text(v.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            KeyBound::Integer(v) => Value::Int(*v),
            KeyBound::Unsigned(v) => Value::Uint(*v),
            KeyBound::Text(v) => Value::String(v.clone()),
        }
    }
}

impl fmt::Display for KeyBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyBound::Integer(v) => write!(f, "{v}"),
            KeyBound::Unsigned(v) => write!(f, "{v}"),
            KeyBound::Text(v) => write!(f, "'{v}'"),
        }
    }
}

/// Durable cursor describing how far a task has progressed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Position {
    /// No progress yet, or a table without a usable unique key.
    #[default]
    Placeholder,

    /// Bounded keyset range. `begin` is moved forward as the scan advances;
    /// `None` on either side means unbounded.
    PrimaryKey {
        begin: Option<KeyBound>,
        end: Option<KeyBound>,
    },

    /// Opaque log position defined by the change-capture adapter.
    Stream { value: String },

    /// Terminal. A finished position never regresses.
    Finished,
}

impl Position {
    pub fn range(begin: Option<KeyBound>, end: Option<KeyBound>) -> Self {
        Position::PrimaryKey { begin, end }
    }

    pub fn stream(value: impl Into<String>) -> Self {
        Position::Stream {
            value: value.into(),
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Position::Finished)
    }

    pub fn begin(&self) -> Option<&KeyBound> {
        match self {
            Position::PrimaryKey { begin, .. } => begin.as_ref(),
            _ => None,
        }
    }

    pub fn end(&self) -> Option<&KeyBound> {
        match self {
            Position::PrimaryKey { end, .. } => end.as_ref(),
            _ => None,
        }
    }

    /// Moves the position forward. Ignored once finished.
    pub fn advance(&mut self, next: Position) {
        if self.is_finished() {
            return;
        }
        *self = next;
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Placeholder => f.write_str("placeholder"),
            Position::PrimaryKey { begin, end } => {
                let show = |b: &Option<KeyBound>| b.as_ref().map_or("-".to_string(), |b| b.to_string());
                write!(f, "pk[{}, {}]", show(begin), show(end))
            }
            Position::Stream { value } => write!(f, "stream({value})"),
            Position::Finished => f.write_str("finished"),
        }
    }
}
