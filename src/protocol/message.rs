//! Protocol message definitions
//!
//! The closed set of messages exchanged between client and server.

/// All protocol messages
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Ask the server for a session
    SessionInquiry,

    /// Server proposes a session id
    SessionOffer { offered_session_id: String },

    /// Client asks to join a session (the offered one, or its previous one
    /// when recovering)
    SessionJoinRequest { desired_session_id: String },

    /// Server confirms the joined session
    SessionJoinResponse { assigned_session_id: String },

    /// Session-level failure reported by the server
    SessionError {
        session_id: String,
        code: i32,
        description: String,
    },

    /// Session closed by either side
    SessionEnd,

    /// Method invocation
    CallRequest {
        session_id: String,
        call_id: u32,
        attempt_number: u8,
        object_id: String,
        method_name: String,
        /// Encoded parameter block
        parameters: Vec<u8>,
    },

    /// Successful call outcome
    CallResult {
        session_id: String,
        call_id: u32,
        /// One self-describing value
        result: Vec<u8>,
    },

    /// Failed call outcome
    CallError {
        session_id: String,
        call_id: u32,
        error_code: i32,
        description: String,
        /// Encoded optional-field block
        optional_fields: Vec<u8>,
    },

    /// Liveness ping
    KeepAlive,
}

impl Message {
    /// Get the message type identifier
    pub fn type_id(&self) -> u8 {
        match self {
            Message::CallRequest { .. } => message_types::CALL_REQUEST,
            Message::CallResult { .. } => message_types::CALL_RESULT,
            Message::CallError { .. } => message_types::CALL_ERROR,
            Message::SessionInquiry => message_types::SESSION_INQUIRY,
            Message::SessionOffer { .. } => message_types::SESSION_OFFER,
            Message::SessionError { .. } => message_types::SESSION_ERROR,
            Message::SessionJoinRequest { .. } => message_types::SESSION_JOIN_REQUEST,
            Message::SessionJoinResponse { .. } => message_types::SESSION_JOIN_RESPONSE,
            Message::SessionEnd => message_types::SESSION_END,
            Message::KeepAlive => message_types::KEEP_ALIVE,
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Message::SessionInquiry => "SessionInquiry",
            Message::SessionOffer { .. } => "SessionOffer",
            Message::SessionJoinRequest { .. } => "SessionJoinRequest",
            Message::SessionJoinResponse { .. } => "SessionJoinResponse",
            Message::SessionError { .. } => "SessionError",
            Message::SessionEnd => "SessionEnd",
            Message::CallRequest { .. } => "CallRequest",
            Message::CallResult { .. } => "CallResult",
            Message::CallError { .. } => "CallError",
            Message::KeepAlive => "KeepAlive",
        }
    }

    /// Call id of a call response, if this is one
    pub fn response_call_id(&self) -> Option<u32> {
        match self {
            Message::CallResult { call_id, .. } | Message::CallError { call_id, .. } => Some(*call_id),
            _ => None,
        }
    }

    /// Messages that end the session from the server's side
    pub fn is_session_termination(&self) -> bool {
        matches!(self, Message::SessionError { .. } | Message::SessionEnd)
    }
}

/// Message discriminant bytes
pub mod message_types {
    pub const CALL_REQUEST: u8 = 0x21;
    pub const CALL_RESULT: u8 = 0x22;
    pub const CALL_ERROR: u8 = 0x23;
    pub const SESSION_INQUIRY: u8 = 0x51;
    pub const SESSION_OFFER: u8 = 0x52;
    pub const SESSION_ERROR: u8 = 0x53;
    pub const SESSION_JOIN_REQUEST: u8 = 0x54;
    pub const SESSION_JOIN_RESPONSE: u8 = 0x55;
    pub const SESSION_END: u8 = 0x58;
    pub const KEEP_ALIVE: u8 = 0x99;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_ids() {
        assert_eq!(Message::KeepAlive.type_id(), 0x99);
        assert_eq!(Message::SessionEnd.type_id(), 0x58);
        assert_eq!(
            Message::SessionOffer {
                offered_session_id: "S1".into()
            }
            .type_id(),
            0x52
        );
    }

    #[test]
    fn test_response_call_id() {
        let result = Message::CallResult {
            session_id: "S1".into(),
            call_id: 7,
            result: vec![],
        };
        assert_eq!(result.response_call_id(), Some(7));
        assert_eq!(Message::KeepAlive.response_call_id(), None);
        assert!(Message::SessionEnd.is_session_termination());
    }
}
