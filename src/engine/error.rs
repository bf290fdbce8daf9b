use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug)]
pub enum EngineError {
    /// Entity kind and id.
    NotFound(&'static str, Ulid),
    AlreadyExists(Ulid),
    InvalidRequest(String),
    /// The requested dates overlap this booking.
    Unavailable(Ulid),
    Duplicate(String),
    /// `entity` is "booking" or "payment".
    IllegalTransition {
        entity: &'static str,
        from: &'static str,
        to: &'static str,
    },
    Forbidden(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        EngineError::InvalidRequest(msg.into())
    }

    pub(crate) fn booking_transition(from: BookingStatus, to: BookingStatus) -> Self {
        EngineError::IllegalTransition {
            entity: "booking",
            from: from.as_str(),
            to: to.as_str(),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(kind, id) => write!(f, "{kind} not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            EngineError::Unavailable(id) => {
                write!(f, "dates unavailable: overlaps booking {id}")
            }
            EngineError::Duplicate(what) => write!(f, "duplicate {what}"),
            EngineError::IllegalTransition { entity, from, to } => {
                write!(f, "illegal {entity} status transition: {from} -> {to}")
            }
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
