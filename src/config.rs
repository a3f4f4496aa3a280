use educe::Educe;
use serde::{Deserialize, Serialize};

use crate::value::Value;

#[inline]
fn is_false(v: &bool) -> bool {
    !v
}

/// A starting previous value for one field, applied when a session is created and again after
/// every reset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Preset {
    /// Id of the template holding the field.
    pub template: u32,
    /// Dotted path of field names from the template down to the field.
    pub field: String,
    pub value: Value,
}

/// Settings for an encoder or decoder session.
///
/// # Defaults
///
/// Fields that aren't specified use their defaults instead:
///
/// - initial_capacity: 1024
/// - max_depth: 32
/// - max_sequence_len: 65536
/// - reset_on_error: false
/// - presets: empty
///
#[derive(Educe, Clone, Debug, Serialize, Deserialize)]
#[educe(PartialEq, Default)]
#[serde(deny_unknown_fields, default)]
pub struct SessionConfig {
    /// Starting capacity of the encoder's output buffer.
    #[educe(Default = 1024)]
    pub initial_capacity: usize,
    /// How deeply groups, sequences, and template references may nest.
    #[educe(Default = 32)]
    pub max_depth: usize,
    /// The longest sequence a decoder will accept.
    #[educe(Default = 65536)]
    pub max_sequence_len: u32,
    /// After a failed message, forget every previous value instead of only undoing that
    /// message's changes.
    #[serde(skip_serializing_if = "is_false")]
    pub reset_on_error: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub presets: Vec<Preset>,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initial_capacity(mut self, initial_capacity: usize) -> Self {
        self.initial_capacity = initial_capacity;
        self
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn max_sequence_len(mut self, max_sequence_len: u32) -> Self {
        self.max_sequence_len = max_sequence_len;
        self
    }

    pub fn reset_on_error(mut self, reset_on_error: bool) -> Self {
        self.reset_on_error = reset_on_error;
        self
    }

    /// Add a starting previous value for the field at `field` in template `template`.
    pub fn preset(mut self, template: u32, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.presets.push(Preset {
            template,
            field: field.into(),
            value: value.into(),
        });
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let c = SessionConfig::default();
        assert_eq!(c.initial_capacity, 1024);
        assert_eq!(c.max_depth, 32);
        assert_eq!(c.max_sequence_len, 65536);
        assert!(!c.reset_on_error);
        assert!(c.presets.is_empty());
    }

    #[test]
    fn serde_fills_defaults() {
        let c: SessionConfig = serde_json::from_str(r#"{ "max_depth": 4 }"#).unwrap();
        assert_eq!(c, SessionConfig::new().max_depth(4));
        assert!(serde_json::from_str::<SessionConfig>(r#"{ "depth": 4 }"#).is_err());

        let c = SessionConfig::new().preset(1, "Seq", 7u32);
        let json = serde_json::to_string(&c).unwrap();
        let back: SessionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.presets[0].value, Value::UInt32(7));
    }
}
