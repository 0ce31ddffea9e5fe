use serde_json::{json, Value};

use super::{CodecError, FeedbackMsg, Fields, Goals, Span, StateId};

/// An answer emitted by the kernel.
#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    /// The root state was established.
    Ready(StateId),
    Added(StateId, Option<Span>),
    /// New tip after a cancel.
    BackTo(StateId),
    /// Proof state at a state; `None` outside an open proof.
    ///
    /// A JSON `null` snapshot is indistinguishable from no snapshot on the
    /// wire: `Some(Value::Null)` encodes as `null` and decodes as `None`. Use
    /// [`Answer::goal_info`] to build the normalized form.
    GoalInfo(StateId, Option<Goals>),
    Feedback(FeedbackMsg),
    /// Execution failure.
    ///
    /// `rollback` is the `(last_good, failing)` pair; the document is
    /// implicitly rolled back to `last_good`.
    CoqExn {
        loc: Option<Span>,
        rollback: Option<(StateId, StateId)>,
        msg: String,
    },
    /// Kernel output that could not be decoded, kept verbatim.
    JsonExn(String),
}

impl Answer {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Ready(_) => "Ready",
            Self::Added(..) => "Added",
            Self::BackTo(_) => "BackTo",
            Self::GoalInfo(..) => "GoalInfo",
            Self::Feedback(_) => "Feedback",
            Self::CoqExn { .. } => "CoqExn",
            Self::JsonExn(_) => "JsonExn",
        }
    }

    /// `GoalInfo` with a `null` snapshot folded into `None`.
    pub fn goal_info(id: StateId, goals: Option<Goals>) -> Self {
        Self::GoalInfo(id, goals.filter(|g| !g.is_null()))
    }

    /// Decode one line of kernel output, turning anything undecodable into
    /// [`Answer::JsonExn`].
    pub fn decode_or_exn(line: &str) -> Self {
        Self::decode(line).unwrap_or_else(|_| Self::JsonExn(line.to_string()))
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Ready(id) => json!(["Ready", id]),
            Self::Added(id, span) => json!(["Added", id, span]),
            Self::BackTo(id) => json!(["BackTo", id]),
            Self::GoalInfo(id, goals) => json!(["GoalInfo", id, goals]),
            Self::Feedback(msg) => json!(["Feedback", msg]),
            Self::CoqExn { loc, rollback, msg } => json!(["CoqExn", loc, rollback, msg]),
            Self::JsonExn(raw) => json!(["JsonExn", raw]),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self, CodecError> {
        let f = Fields::split(value)?;
        let answer = match f.tag {
            "Ready" => {
                f.arity(1)?;
                Self::Ready(f.field(0)?)
            }
            "Added" => {
                f.arity(2)?;
                Self::Added(f.field(0)?, f.field(1)?)
            }
            "BackTo" => {
                f.arity(1)?;
                Self::BackTo(f.field(0)?)
            }
            "GoalInfo" => {
                f.arity(2)?;
                Self::GoalInfo(f.field(0)?, f.field(1)?)
            }
            "Feedback" => {
                f.arity(1)?;
                Self::Feedback(f.field(0)?)
            }
            "CoqExn" => {
                f.arity(3)?;
                Self::CoqExn {
                    loc: f.field(0)?,
                    rollback: f.field(1)?,
                    msg: f.field(2)?,
                }
            }
            "JsonExn" => {
                f.arity(1)?;
                Self::JsonExn(f.field(0)?)
            }
            _ => return Err(f.unknown()),
        };
        Ok(answer)
    }
}

tagged_wire!(Answer);
