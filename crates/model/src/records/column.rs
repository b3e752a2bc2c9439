use crate::core::value::Value;
use serde::{Deserialize, Serialize};

/// One column of a captured change.
///
/// Inserts carry only `value`; deletes carry only `old_value`; updates carry
/// both when the capture layer can provide the before image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub old_value: Option<Value>,
    pub value: Option<Value>,
    /// True only when the value actually changed.
    pub updated: bool,
    pub unique_key: bool,
}

impl Column {
    /// Column of an inserted (or dumped) row.
    pub fn new(name: impl Into<String>, value: Value, updated: bool, unique_key: bool) -> Self {
        Self {
            name: name.into(),
            old_value: None,
            value: Some(value),
            updated,
            unique_key,
        }
    }

    /// Column of an updated row with both images.
    pub fn changed(
        name: impl Into<String>,
        old_value: Value,
        value: Value,
        unique_key: bool,
    ) -> Self {
        let updated = old_value != value;
        Self {
            name: name.into(),
            old_value: Some(old_value),
            value: Some(value),
            updated,
            unique_key,
        }
    }

    /// Column of a deleted row.
    pub fn deleted(name: impl Into<String>, old_value: Value, unique_key: bool) -> Self {
        Self {
            name: name.into(),
            old_value: Some(old_value),
            value: None,
            updated: false,
            unique_key,
        }
    }

    /// Before image, falling back to the after image for columns the capture
    /// layer did not report as changed.
    pub fn before(&self) -> &Value {
        self.old_value
            .as_ref()
            .or(self.value.as_ref())
            .unwrap_or(&Value::Null)
    }

    /// After image, falling back to the before image.
    pub fn after(&self) -> &Value {
        self.value
            .as_ref()
            .or(self.old_value.as_ref())
            .unwrap_or(&Value::Null)
    }
}
