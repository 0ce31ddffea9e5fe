use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{CodecError, Fields};

/// Opaque identifier for one point in the document's edit history.
///
/// Identifiers are issued in increasing order and never reused, so comparing
/// two ids compares their creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(pub u64);

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-chosen tag used to demultiplex feedback from concurrent queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteId(pub u32);

impl RouteId {
    /// Route used for feedback not tied to any query.
    pub const DEFAULT: RouteId = RouteId(0);
}

/// Source span of a sentence, in bytes relative to the submitted text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    /// Begin offset.
    pub bp: usize,
    /// End offset (exclusive).
    pub ep: usize,
    #[serde(default)]
    pub line_nb: u32,
    #[serde(default)]
    pub bol_pos: usize,
}

impl Span {
    pub fn of_text(text: &str) -> Self {
        Self {
            bp: 0,
            ep: text.len(),
            line_nb: 1,
            bol_pos: 0,
        }
    }
}

/// Severity of a feedback message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
}

/// Asynchronous diagnostic or progress notification from the kernel.
///
/// Feedback is ordered relative to other feedback on the same `route` only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackMsg {
    /// State the message is about.
    pub span_id: StateId,
    pub route: RouteId,
    pub level: Level,
    /// Kernel-defined payload; rendered by the host, never interpreted here.
    pub contents: Value,
}

/// Structured proof-state snapshot. Produced by the kernel and passed through
/// untouched.
pub type Goals = Value;

/// Search performed by an `Inspect` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQuery {
    All,
    CurrentFile,
    Locals,
    ModulePrefix(Vec<String>),
    Keyword(String),
}

impl SearchQuery {
    pub fn to_value(&self) -> Value {
        match self {
            Self::All => json!(["All"]),
            Self::CurrentFile => json!(["CurrentFile"]),
            Self::Locals => json!(["Locals"]),
            Self::ModulePrefix(path) => json!(["ModulePrefix", path]),
            Self::Keyword(word) => json!(["Keyword", word]),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self, CodecError> {
        let f = Fields::split(value)?;
        match f.tag {
            "All" => f.arity(0).map(|_| Self::All),
            "CurrentFile" => f.arity(0).map(|_| Self::CurrentFile),
            "Locals" => f.arity(0).map(|_| Self::Locals),
            "ModulePrefix" => {
                f.arity(1)?;
                Ok(Self::ModulePrefix(f.field(0)?))
            }
            "Keyword" => {
                f.arity(1)?;
                Ok(Self::Keyword(f.field(0)?))
            }
            _ => Err(f.unknown()),
        }
    }
}

tagged_wire!(SearchQuery);

/// File payload carried by `Put`: JSON strings are text, JSON arrays of
/// numbers are raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Bytes(Vec<u8>),
}

impl Content {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Bytes(bytes) => bytes,
        }
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u8>> for Content {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}
