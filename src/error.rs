use thiserror::Error;

/// Server error code returned for a killed or timed-out cursor.
pub const CURSOR_NOT_FOUND: i32 = 43;

#[derive(Error, Debug)]
pub enum Error {
    #[error("document store error: {0}")]
    Store(#[from] mongodb::error::Error),
    #[error("cursor is no longer valid on the server")]
    CursorExpired,
    #[error("doc_count must be a non-negative integer, got {0:?}")]
    InvalidDocCount(String),
    #[error("unknown cursor strategy {0:?}")]
    UnknownStrategy(String),
    #[error("MONGODB_URI is not set")]
    Unconfigured,
    #[error("result store error: {0}")]
    Results(#[from] rusqlite::Error),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Maps a driver error to `CursorExpired` when the server reports the
    /// cursor as gone.
    pub fn from_cursor(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;

        let expired = matches!(
            err.kind.as_ref(),
            ErrorKind::Command(cmd) if cmd.code == CURSOR_NOT_FOUND
        );
        if expired {
            Error::CursorExpired
        } else {
            Error::Store(err)
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Error::InvalidDocCount(_) | Error::UnknownStrategy(_))
    }
}
