use thiserror::Error;

pub type PqvResult<T> = Result<T, PqvError>;

#[derive(Debug, Error)]
pub enum PqvError {
    #[error("user already exists: {0}")]
    UserExists(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    /// Wrong password, or a record that does not authenticate under it.
    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("archive not loaded")]
    NotLoaded,

    #[error("archive already exists: {0}")]
    AlreadyExists(String),

    #[error("entry not found: {0}")]
    EntryNotFound(String),

    #[error("entry name '{0}' matches more than one entry case-insensitively")]
    AmbiguousName(String),

    #[error("entry has no data: {0}")]
    EmptyEntry(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PqvError {
    /// True for errors caused by a wrong password rather than by the environment.
    pub fn is_authentication(&self) -> bool {
        matches!(self, PqvError::AuthenticationFailed)
    }
}
