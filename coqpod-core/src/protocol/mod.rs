//! Command/answer vocabulary spoken with the proof kernel.
//!
//! # Wire shape
//!
//! Every value is a JSON array whose first element is a string tag and whose
//! remaining elements are the variant's positional fields:
//!
//! ```text
//! ["Add", null, 3, "Lemma foo : True.", false]
//! ["Added", 4, {"bp": 0, "ep": 17, "line_nb": 1, "bol_pos": 0}]
//! ```
//!
//! Absent optional fields are encoded as `null`. Decoding is strict: an unknown
//! tag, a wrong number of fields or a field of the wrong type is a
//! [`CodecError`], never a partially filled value.

/// Implements text encoding and serde support on top of `to_value`/`from_value`.
macro_rules! tagged_wire {
    ($ty:ty) => {
        impl $ty {
            /// Encode as a single line of JSON.
            pub fn encode(&self) -> String {
                self.to_value().to_string()
            }

            /// Decode from JSON text.
            pub fn decode(text: &str) -> Result<Self, $crate::protocol::CodecError> {
                let value: serde_json::Value = serde_json::from_str(text)?;
                Self::from_value(&value)
            }
        }

        impl serde::Serialize for $ty {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serde::Serialize::serialize(&self.to_value(), serializer)
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let value = <serde_json::Value as serde::Deserialize>::deserialize(deserializer)?;
                Self::from_value(&value).map_err(serde::de::Error::custom)
            }
        }
    };
}

mod answer;
mod command;
mod host;
mod types;

pub use answer::*;
pub use command::*;
pub use host::*;
pub use types::*;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Errors raised while encoding or decoding wire values.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a tagged array")]
    NotAnArray,

    #[error("missing string tag")]
    MissingTag,

    #[error("unknown tag '{0}'")]
    UnknownTag(String),

    #[error("'{tag}' expects {expected} field(s), found {found}")]
    Arity {
        tag: String,
        expected: usize,
        found: usize,
    },

    #[error("'{tag}' field {index}: {message}")]
    Field {
        tag: String,
        index: usize,
        message: String,
    },

    #[error("Add cannot carry both an edit point and an explicit parent")]
    Ambiguous,
}

/// A decoded tag plus the positional fields that follow it.
pub(crate) struct Fields<'a> {
    pub tag: &'a str,
    items: &'a [Value],
}

impl<'a> Fields<'a> {
    pub fn split(value: &'a Value) -> Result<Self, CodecError> {
        let items = value.as_array().ok_or(CodecError::NotAnArray)?;
        let (head, items) = items.split_first().ok_or(CodecError::MissingTag)?;
        let tag = head.as_str().ok_or(CodecError::MissingTag)?;
        Ok(Self { tag, items })
    }

    pub fn arity(&self, expected: usize) -> Result<(), CodecError> {
        if self.items.len() == expected {
            Ok(())
        } else {
            Err(CodecError::Arity {
                tag: self.tag.to_string(),
                expected,
                found: self.items.len(),
            })
        }
    }

    pub fn field<T: DeserializeOwned>(&self, index: usize) -> Result<T, CodecError> {
        let value = self.items.get(index).ok_or_else(|| CodecError::Arity {
            tag: self.tag.to_string(),
            expected: index + 1,
            found: self.items.len(),
        })?;
        T::deserialize(value).map_err(|e| CodecError::Field {
            tag: self.tag.to_string(),
            index,
            message: e.to_string(),
        })
    }

    pub fn unknown(&self) -> CodecError {
        CodecError::UnknownTag(self.tag.to_string())
    }
}
