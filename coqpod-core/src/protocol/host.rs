use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{Answer, CodecError, Command, Content, Fields};

/// Interrupt channel configuration carried by `InterruptSetup`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptConfig {
    /// Virtual path of a marker file mirroring the flag, for kernels that
    /// cannot share memory with the host.
    #[serde(default)]
    pub marker: Option<String>,
}

/// A message sent by the host to the session.
///
/// Administrative messages are handled by the session itself and never reach
/// the kernel; everything else is a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostMessage {
    LoadPkg(Vec<String>),
    Put(String, Content),
    Get(String),
    InterruptSetup(InterruptConfig),
    Kernel(Command),
}

impl HostMessage {
    pub fn is_administrative(&self) -> bool {
        !matches!(self, Self::Kernel(_))
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::LoadPkg(uris) => json!(["LoadPkg", uris]),
            Self::Put(path, content) => json!(["Put", path, content]),
            Self::Get(path) => json!(["Get", path]),
            Self::InterruptSetup(config) => json!(["InterruptSetup", config]),
            Self::Kernel(command) => command.to_value(),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self, CodecError> {
        let f = Fields::split(value)?;
        match f.tag {
            "LoadPkg" => {
                f.arity(1)?;
                Ok(Self::LoadPkg(f.field(0)?))
            }
            "Put" => {
                f.arity(2)?;
                Ok(Self::Put(f.field(0)?, f.field(1)?))
            }
            "Get" => {
                f.arity(1)?;
                Ok(Self::Get(f.field(0)?))
            }
            "InterruptSetup" => {
                f.arity(1)?;
                Ok(Self::InterruptSetup(f.field(0)?))
            }
            _ => Command::from_value(value).map(Self::Kernel),
        }
    }
}

tagged_wire!(HostMessage);

impl From<Command> for HostMessage {
    fn from(command: Command) -> Self {
        Self::Kernel(command)
    }
}

/// Notification produced by the session itself rather than by the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// One package finished installing.
    LibLoaded(String),
    /// One package failed to install.
    LibError(String, String),
    /// A batch of installs settled; lists the packages that succeeded.
    LoadedPkg(Vec<String>),
    /// Reply to `Get`; `None` when the file does not exist.
    Got(String, Option<Vec<u8>>),
}

impl Notice {
    pub fn to_value(&self) -> Value {
        match self {
            Self::LibLoaded(uri) => json!(["LibLoaded", uri]),
            Self::LibError(uri, msg) => json!(["LibError", uri, msg]),
            Self::LoadedPkg(uris) => json!(["LoadedPkg", uris]),
            Self::Got(path, content) => json!(["Got", path, content]),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self, CodecError> {
        let f = Fields::split(value)?;
        match f.tag {
            "LibLoaded" => {
                f.arity(1)?;
                Ok(Self::LibLoaded(f.field(0)?))
            }
            "LibError" => {
                f.arity(2)?;
                Ok(Self::LibError(f.field(0)?, f.field(1)?))
            }
            "LoadedPkg" => {
                f.arity(1)?;
                Ok(Self::LoadedPkg(f.field(0)?))
            }
            "Got" => {
                f.arity(2)?;
                Ok(Self::Got(f.field(0)?, f.field(1)?))
            }
            _ => Err(f.unknown()),
        }
    }
}

tagged_wire!(Notice);

/// Payload of a "message" event: a kernel answer or a session notice.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Answer(Answer),
    Notice(Notice),
}

impl Message {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Answer(answer) => answer.to_value(),
            Self::Notice(notice) => notice.to_value(),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self, CodecError> {
        match Notice::from_value(value) {
            Ok(notice) => Ok(Self::Notice(notice)),
            Err(CodecError::UnknownTag(_)) => Answer::from_value(value).map(Self::Answer),
            Err(e) => Err(e),
        }
    }

    pub fn as_answer(&self) -> Option<&Answer> {
        match self {
            Self::Answer(answer) => Some(answer),
            Self::Notice(_) => None,
        }
    }
}

tagged_wire!(Message);

impl From<Answer> for Message {
    fn from(answer: Answer) -> Self {
        Self::Answer(answer)
    }
}

impl From<Notice> for Message {
    fn from(notice: Notice) -> Self {
        Self::Notice(notice)
    }
}
