//! Endpoint errors
//!
//! Every error escaping the endpoint falls in one [`ErrorKind`], so callers
//! can branch on the category without looking at messages.

use std::fmt;

use thiserror::Error;

use super::EndpointState;
use crate::network::TransportError;
use crate::protocol::{CallFailure, MessageError};
use crate::serialization::CodecError;

/// Faults raised while establishing or re-joining a session
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("Transport fault during handshake: {0}")]
    Transport(#[from] TransportError),

    #[error("Undecodable handshake message: {0}")]
    Malformed(#[from] CodecError),

    #[error("Session refused by server ({code}): {description}")]
    Rejected { code: i32, description: String },

    #[error("Expected {expected}, received {received}")]
    UnexpectedMessage {
        expected: &'static str,
        received: &'static str,
    },

    #[error("Requested session {requested}, server assigned {assigned}")]
    SessionMismatch { requested: String, assigned: String },
}

impl From<MessageError> for HandshakeError {
    fn from(e: MessageError) -> Self {
        match e {
            MessageError::Transport(e) => HandshakeError::Transport(e),
            MessageError::Codec(e) => HandshakeError::Malformed(e),
        }
    }
}

/// Operation not allowed in the endpoint's current state
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Endpoint is {0}, not running")]
    NotRunning(EndpointState),

    #[error("Endpoint is {0}; a session can only be established once")]
    AlreadyConnected(EndpointState),

    #[error("Endpoint was never connected")]
    NeverConnected,
}

/// Why a call ended without a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterruptReason {
    /// The server ended the session
    SessionEnded,
    /// The server reported a session-level error
    SessionRejected { code: i32, description: String },
    /// The connection failed on the final attempt of the call
    SessionLost,
    /// Every recovery step failed
    Unrecoverable,
    /// The endpoint was stopped locally
    Stopped,
}

impl fmt::Display for InterruptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterruptReason::SessionEnded => write!(f, "session ended by server"),
            InterruptReason::SessionRejected { code, description } => {
                write!(f, "session error {}: {}", code, description)
            }
            InterruptReason::SessionLost => write!(f, "session lost"),
            InterruptReason::Unrecoverable => write!(f, "session lost, unrecoverable"),
            InterruptReason::Stopped => write!(f, "endpoint stopped"),
        }
    }
}

/// Category of an [`EndpointError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Protocol,
    Serialization,
    Application,
    State,
    Interrupted,
}

/// Errors surfaced by [`Endpoint`](super::Endpoint)
#[derive(Error, Debug)]
pub enum EndpointError {
    #[error("Transport fault: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol fault: {0}")]
    Protocol(HandshakeError),

    #[error("Serialization fault: {0}")]
    Serialization(#[from] CodecError),

    #[error(transparent)]
    Application(#[from] CallFailure),

    #[error("Invalid state: {0}")]
    State(#[from] StateError),

    #[error("Call interrupted: {reason}")]
    Interrupted {
        reason: InterruptReason,
        #[source]
        source: Option<Box<EndpointError>>,
    },
}

impl EndpointError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EndpointError::Transport(_) => ErrorKind::Transport,
            EndpointError::Protocol(_) => ErrorKind::Protocol,
            EndpointError::Serialization(_) => ErrorKind::Serialization,
            EndpointError::Application(_) => ErrorKind::Application,
            EndpointError::State(_) => ErrorKind::State,
            EndpointError::Interrupted { .. } => ErrorKind::Interrupted,
        }
    }

    pub(crate) fn interrupted(reason: InterruptReason, source: Option<EndpointError>) -> Self {
        EndpointError::Interrupted {
            reason,
            source: source.map(Box::new),
        }
    }

    /// Server-reported failure, if this is an application error
    pub fn call_failure(&self) -> Option<&CallFailure> {
        match self {
            EndpointError::Application(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn interrupt_reason(&self) -> Option<&InterruptReason> {
        match self {
            EndpointError::Interrupted { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// The error that caused an interruption
    pub fn original(&self) -> Option<&EndpointError> {
        match self {
            EndpointError::Interrupted { source, .. } => source.as_deref(),
            _ => None,
        }
    }
}

impl From<HandshakeError> for EndpointError {
    fn from(error: HandshakeError) -> Self {
        match error {
            HandshakeError::Transport(transport) => EndpointError::Transport(transport),
            other => EndpointError::Protocol(other),
        }
    }
}

pub type EndpointResult<T> = Result<T, EndpointError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_transport_fault_stays_transport() {
        let error: EndpointError = HandshakeError::Transport(TransportError::Closed).into();
        assert_eq!(error.kind(), ErrorKind::Transport);

        let error: EndpointError = HandshakeError::SessionMismatch {
            requested: "S1".into(),
            assigned: "S2".into(),
        }
        .into();
        assert_eq!(error.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_interrupted_carries_original() {
        let error = EndpointError::interrupted(
            InterruptReason::Unrecoverable,
            Some(EndpointError::Transport(TransportError::Closed)),
        );
        assert_eq!(error.kind(), ErrorKind::Interrupted);
        assert_eq!(error.interrupt_reason(), Some(&InterruptReason::Unrecoverable));
        assert_eq!(error.original().map(EndpointError::kind), Some(ErrorKind::Transport));
        assert_eq!(error.to_string(), "Call interrupted: session lost, unrecoverable");
    }

    #[test]
    fn test_application_error_exposes_failure() {
        let error = EndpointError::from(CallFailure::new(3, "out of range"));
        assert_eq!(error.kind(), ErrorKind::Application);
        assert_eq!(error.call_failure().map(|f| f.code), Some(3));
    }
}
