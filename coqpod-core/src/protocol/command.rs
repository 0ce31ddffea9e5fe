use serde_json::{json, Value};

use super::{CodecError, Fields, RouteId, SearchQuery, StateId};

/// A command forwarded to the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Establish the root state.
    Init,
    /// Append a sentence.
    ///
    /// With `edit_at`, every state from `edit_at` onward is discarded first and
    /// the sentence is attached where `edit_at` was. Without it, the sentence is
    /// attached to `parent`, or to the current tip when `parent` is absent.
    Add {
        edit_at: Option<StateId>,
        parent: Option<StateId>,
        text: String,
        verbose: bool,
    },
    /// Check the document up to and including `id`.
    Exec(StateId),
    /// Discard `id` and all of its descendants.
    Cancel(StateId),
    /// Request the proof-state snapshot at `id`.
    Goals(StateId),
    /// Run a read-only query whose output streams as feedback on `route`.
    Query {
        id: StateId,
        route: RouteId,
        text: String,
    },
    /// Search the environment at `id`; results stream as feedback on `route`.
    Inspect {
        id: StateId,
        route: RouteId,
        query: SearchQuery,
    },
    /// Rescan installed packages.
    RefreshLoadPath,
}

impl Command {
    pub fn add(text: impl Into<String>) -> Self {
        Self::Add {
            edit_at: None,
            parent: None,
            text: text.into(),
            verbose: false,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Init => "Init",
            Self::Add { .. } => "Add",
            Self::Exec(_) => "Exec",
            Self::Cancel(_) => "Cancel",
            Self::Goals(_) => "Goals",
            Self::Query { .. } => "Query",
            Self::Inspect { .. } => "Inspect",
            Self::RefreshLoadPath => "RefreshLoadPath",
        }
    }

    /// Reject commands that must never reach the kernel.
    pub fn validate(&self) -> Result<(), CodecError> {
        match self {
            Self::Add {
                edit_at: Some(_),
                parent: Some(_),
                ..
            } => Err(CodecError::Ambiguous),
            _ => Ok(()),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Init => json!(["Init"]),
            Self::Add {
                edit_at,
                parent,
                text,
                verbose,
            } => json!(["Add", edit_at, parent, text, verbose]),
            Self::Exec(id) => json!(["Exec", id]),
            Self::Cancel(id) => json!(["Cancel", id]),
            Self::Goals(id) => json!(["Goals", id]),
            Self::Query { id, route, text } => json!(["Query", id, route, text]),
            Self::Inspect { id, route, query } => {
                json!(["Inspect", id, route, query.to_value()])
            }
            Self::RefreshLoadPath => json!(["RefreshLoadPath"]),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self, CodecError> {
        let f = Fields::split(value)?;
        let command = match f.tag {
            "Init" => {
                f.arity(0)?;
                Self::Init
            }
            "Add" => {
                f.arity(4)?;
                Self::Add {
                    edit_at: f.field(0)?,
                    parent: f.field(1)?,
                    text: f.field(2)?,
                    verbose: f.field(3)?,
                }
            }
            "Exec" => {
                f.arity(1)?;
                Self::Exec(f.field(0)?)
            }
            "Cancel" => {
                f.arity(1)?;
                Self::Cancel(f.field(0)?)
            }
            "Goals" => {
                f.arity(1)?;
                Self::Goals(f.field(0)?)
            }
            "Query" => {
                f.arity(3)?;
                Self::Query {
                    id: f.field(0)?,
                    route: f.field(1)?,
                    text: f.field(2)?,
                }
            }
            "Inspect" => {
                f.arity(3)?;
                Self::Inspect {
                    id: f.field(0)?,
                    route: f.field(1)?,
                    query: f.field(2)?,
                }
            }
            "RefreshLoadPath" => {
                f.arity(0)?;
                Self::RefreshLoadPath
            }
            _ => return Err(f.unknown()),
        };
        Ok(command)
    }
}

tagged_wire!(Command);
