use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// Two placeholders in one document share a name.
    #[error("variable names must be unique: `{name}` is declared more than once")]
    DuplicateVariable { name: String },

    /// A placeholder without a usable name field.
    #[error("malformed placeholder `{token}`: expected `{{{{type:name:data}}}}`")]
    MalformedPlaceholder { token: String },

    #[error("sandbox is not ready")]
    SandboxNotReady,

    /// The sandbox never reached the ready state.
    #[error("sandbox failed to start: {message}")]
    SandboxFailed { message: String },

    #[error("unknown entry point `{name}`")]
    UnknownEntryPoint { name: String },

    /// The same entry point was triggered again before its previous call returned.
    #[error("entry point `{name}` is already running")]
    InvocationInFlight { name: String },

    #[error("no element with id `{id}`")]
    MissingElement { id: String },

    /// Error raised by the sandboxed logic.
    #[error("{message}")]
    Guest { message: String },

    /// Internal runtime failure (worker thread gone, value conversion, etc).
    #[error("runtime error: {0}")]
    Runtime(#[source] anyhow::Error),

    /// A host binding returned an error.
    #[error("host error: {0}")]
    Host(#[source] BoxError),
}

impl Error {
    pub(crate) fn runtime(message: impl std::fmt::Display) -> Self {
        Self::Runtime(anyhow::anyhow!("{message}"))
    }

    /// Whether this error was raised while parsing the document.
    #[must_use]
    pub const fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateVariable { .. } | Self::MalformedPlaceholder { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Runtime(value.into())
    }
}
