use thiserror::Error;

use crate::tournaments::Position;

/// The broad classes of failure. Everything except [`ErrorKind::Transient`]
/// is terminal and should be shown to the caller as-is.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    InvalidState,
    Forbidden,
    NotFound,
    Conflict,
    WindowExpired,
    Transient,
}

#[derive(Debug, Error)]
pub enum ArenaError {
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    InvalidState(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("this debate has already been appealed")]
    AlreadyAppealed,
    #[error("the appeal window of {hours} hours has expired")]
    WindowExpired { hours: i64 },
    #[error("already registered for this tournament")]
    AlreadyRegistered,
    #[error("the tournament is full")]
    TournamentFull,
    #[error("a position (PRO or CON) must be selected for this tournament")]
    PositionRequired,
    #[error("the {side} side is full, please join as {suggested}")]
    PositionFull { side: Position, suggested: Position },
    #[error("a rating of at least {required} is required (yours is {actual})")]
    EloTooLow { required: i64, actual: i64 },
    #[error("a statement has already been submitted for this round")]
    StatementExists,
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
    #[error("migration error: {0}")]
    Migration(String),
    #[error("{0}")]
    Notify(#[from] crate::notify::NotifyError),
}

impl ArenaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArenaError::Validation(_) | ArenaError::PositionRequired => {
                ErrorKind::Validation
            }
            ArenaError::NotFound(_) => ErrorKind::NotFound,
            ArenaError::InvalidState(_) => ErrorKind::InvalidState,
            ArenaError::Forbidden(_) | ArenaError::EloTooLow { .. } => {
                ErrorKind::Forbidden
            }
            ArenaError::AlreadyAppealed
            | ArenaError::AlreadyRegistered
            | ArenaError::TournamentFull
            | ArenaError::PositionFull { .. }
            | ArenaError::StatementExists => ErrorKind::Conflict,
            ArenaError::WindowExpired { .. } => ErrorKind::WindowExpired,
            ArenaError::Database(_)
            | ArenaError::Pool(_)
            | ArenaError::Migration(_)
            | ArenaError::Notify(_) => ErrorKind::Transient,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        ArenaError::Validation(msg.into())
    }

    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        ArenaError::InvalidState(msg.into())
    }

    pub(crate) fn forbidden(msg: impl Into<String>) -> Self {
        ArenaError::Forbidden(msg.into())
    }
}

pub type ArenaResult<T> = Result<T, ArenaError>;
