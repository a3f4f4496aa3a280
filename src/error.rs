use std::fmt;

use serde::{de, ser};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Occurs when a message doesn't fit the template it is being coded against: a mandatory field
    /// has no value, an operator needs a previous value that doesn't exist, a template id is
    /// unknown, or a template itself is malformed.
    SchemaViolation { field: String, reason: String },
    /// Occurs when decoding runs out of bytes partway through a primitive.
    TruncatedInput {
        field: String,
        step: &'static str,
        needed: usize,
    },
    /// Occurs when the bytes on the wire can't be a valid encoding: an over-wide stop-bit integer,
    /// a value outside its type's range, or a bad string.
    InvalidEncoding { field: String, reason: String },
    /// Occurs when serde serialization or deserialization of a template or config fails
    SerdeFail(String),
}

impl Error {
    pub(crate) fn schema(reason: impl Into<String>) -> Self {
        Error::SchemaViolation {
            field: String::new(),
            reason: reason.into(),
        }
    }

    pub(crate) fn truncated(step: &'static str, needed: usize) -> Self {
        Error::TruncatedInput {
            field: String::new(),
            step,
            needed,
        }
    }

    pub(crate) fn encoding(reason: impl Into<String>) -> Self {
        Error::InvalidEncoding {
            field: String::new(),
            reason: reason.into(),
        }
    }

    /// Prefix the field path of this error with `name`. Called as the error unwinds through each
    /// enclosing field, so the final path reads outermost first.
    pub(crate) fn at(mut self, name: &str) -> Self {
        match self {
            Error::SchemaViolation { ref mut field, .. }
            | Error::TruncatedInput { ref mut field, .. }
            | Error::InvalidEncoding { ref mut field, .. } => {
                if field.is_empty() {
                    *field = name.to_string();
                } else {
                    *field = format!("{}.{}", name, field);
                }
            }
            Error::SerdeFail(_) => (),
        }
        self
    }

    /// The dotted path of the field that triggered the error, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            Error::SchemaViolation { field, .. }
            | Error::TruncatedInput { field, .. }
            | Error::InvalidEncoding { field, .. } => Some(field.as_str()),
            Error::SerdeFail(_) => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::SchemaViolation {
                ref field,
                ref reason,
            } => write!(f, "Schema violation at [{}]: {}", field, reason),
            Error::TruncatedInput {
                ref field,
                step,
                needed,
            } => write!(
                f,
                "Input ended early at [{}]: needed at least {} more byte(s) on step [{}]",
                field, needed, step
            ),
            Error::InvalidEncoding {
                ref field,
                ref reason,
            } => write!(f, "Invalid encoding at [{}]: {}", field, reason),
            Error::SerdeFail(ref msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for Error {}

impl ser::Error for Error {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Error::SerdeFail(msg.to_string())
    }
}

impl de::Error for Error {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Error::SerdeFail(msg.to_string())
    }
}
