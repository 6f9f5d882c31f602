use thiserror::Error;

/// A write that was refused before touching the course record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("unknown or read-only path: {0}")]
    UnknownPath(String),
    #[error("invalid position: {0}")]
    Position(String),
    #[error("invalid arrival circle: {0}")]
    ArrivalCircle(String),
    #[error("invalid start time: {0}")]
    StartTime(String),
    #[error("invalid route reference: {0}")]
    Href(String),
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("record {0} not found")]
    NotFound(String),
    #[error("revision conflict on {0}")]
    Conflict(String),
    #[error("store closed")]
    Closed,
    #[error("store i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("record codec: {0}")]
    Codec(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EmitError {
    #[error("no receivers attached")]
    NoReceivers,
    #[error("sink closed")]
    Closed,
}
