use thiserror::Error;

use super::events::TransportDirection;
use crate::media::engine::{EngineError, MediaKind};

/// Typed failure for a signaling event.
///
/// `code()` is the machine code placed in the error event's `error` field;
/// the Display impl supplies the human-readable `details`.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("peer has not joined that room")]
    NotJoined,
    #[error("peer is already in room {0}")]
    AlreadyJoined(String),
    #[error("unknown room {0}")]
    UnknownRoom(String),
    #[error("unknown transport {0}")]
    UnknownTransport(String),
    #[error("unknown producer {0}")]
    UnknownProducer(String),
    #[error("unknown consumer {0}")]
    UnknownConsumer(String),
    #[error("transport {0} has the wrong direction for this operation")]
    WrongDirection(String),
    #[error("transport {0} is not connected")]
    NotConnected(String),
    #[error("transport {0} is already connected")]
    AlreadyConnected(String),
    #[error("peer already has a live {0} producer")]
    DuplicateKind(MediaKind),
    #[error("peer already has a {0} transport")]
    DuplicateTransport(TransportDirection),
    #[error("cannot consume producer {0}")]
    CannotConsume(String),
    #[error("resource is not owned by the requesting peer")]
    NotOwner,
    #[error("consumer {0} is already resumed")]
    AlreadyResumed(String),
    #[error("consumer {0} is already paused")]
    AlreadyPaused(String),
    #[error("media engine failure: {0}")]
    Engine(#[from] EngineError),
    #[error("media engine call timed out")]
    Timeout,
}

impl SignalError {
    pub fn code(&self) -> &'static str {
        match self {
            SignalError::NotJoined => "not-joined",
            SignalError::AlreadyJoined(_) => "already-joined",
            SignalError::UnknownRoom(_) => "unknown-room",
            SignalError::UnknownTransport(_) => "unknown-transport",
            SignalError::UnknownProducer(_) => "unknown-producer",
            SignalError::UnknownConsumer(_) => "unknown-consumer",
            SignalError::WrongDirection(_) => "wrong-direction",
            SignalError::NotConnected(_) => "not-connected",
            SignalError::AlreadyConnected(_) => "already-connected",
            SignalError::DuplicateKind(_) => "duplicate-kind",
            SignalError::DuplicateTransport(_) => "duplicate-transport",
            SignalError::CannotConsume(_) => "cannot-consume",
            SignalError::NotOwner => "not-owner",
            SignalError::AlreadyResumed(_) => "already-resumed",
            SignalError::AlreadyPaused(_) => "already-paused",
            SignalError::Engine(_) => "engine-failure",
            SignalError::Timeout => "timeout",
        }
    }
}
