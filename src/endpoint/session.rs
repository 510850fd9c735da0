//! Session handshake
//!
//! `SessionInquiry -> SessionOffer -> SessionJoinRequest -> SessionJoinResponse`.
//! A first connect joins the offered session; a recovery asks for the session
//! it was bound to before.

use super::HandshakeError;
use crate::network::FramedConnection;
use crate::protocol::{receive_message, send_message, Message};

/// Run the handshake on a fresh connection; returns the bound session id
pub async fn handshake(
    connection: &mut FramedConnection,
    previous_session: Option<&str>,
) -> Result<String, HandshakeError> {
    send_message(&mut connection.writer, &Message::SessionInquiry).await?;

    let offered = match next_message(connection).await? {
        Message::SessionOffer { offered_session_id } => offered_session_id,
        Message::SessionError { code, description, .. } => {
            return Err(HandshakeError::Rejected { code, description })
        }
        other => {
            return Err(HandshakeError::UnexpectedMessage {
                expected: "SessionOffer",
                received: other.name(),
            })
        }
    };

    let desired = previous_session.map_or(offered, str::to_string);
    send_message(
        &mut connection.writer,
        &Message::SessionJoinRequest {
            desired_session_id: desired.clone(),
        },
    )
    .await?;

    match next_message(connection).await? {
        Message::SessionJoinResponse { assigned_session_id } if assigned_session_id == desired => {
            tracing::debug!("Joined session {} via {}", desired, connection.peer);
            Ok(desired)
        }
        Message::SessionJoinResponse { assigned_session_id } => Err(HandshakeError::SessionMismatch {
            requested: desired,
            assigned: assigned_session_id,
        }),
        Message::SessionError { code, description, .. } => Err(HandshakeError::Rejected { code, description }),
        other => Err(HandshakeError::UnexpectedMessage {
            expected: "SessionJoinResponse",
            received: other.name(),
        }),
    }
}

async fn next_message(connection: &mut FramedConnection) -> Result<Message, HandshakeError> {
    Ok(receive_message(&mut connection.reader).await?.message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::SequenceGenerator;
    use std::sync::Arc;

    /// Server side that answers the handshake with the given replies
    fn scripted_server(replies: Vec<Message>) -> (FramedConnection, tokio::task::JoinHandle<Vec<Message>>) {
        let (client, server) = tokio::io::duplex(1024);
        let sequence = Arc::new(SequenceGenerator::new());
        let client = FramedConnection::from_stream(client, sequence.clone(), "client");
        let mut server = FramedConnection::from_stream(server, sequence, "server");

        let task = tokio::spawn(async move {
            let mut received = Vec::new();
            for reply in replies {
                let Ok(envelope) = receive_message(&mut server.reader).await else {
                    break;
                };
                received.push(envelope.message);
                send_message(&mut server.writer, &reply).await.unwrap();
            }
            received
        });
        (client, task)
    }

    #[tokio::test]
    async fn test_first_connect_joins_offered_session() {
        let (mut client, server) = scripted_server(vec![
            Message::SessionOffer {
                offered_session_id: "S1".into(),
            },
            Message::SessionJoinResponse {
                assigned_session_id: "S1".into(),
            },
        ]);

        assert_eq!(handshake(&mut client, None).await.unwrap(), "S1");
        let received = server.await.unwrap();
        assert_eq!(received[0], Message::SessionInquiry);
        assert_eq!(
            received[1],
            Message::SessionJoinRequest {
                desired_session_id: "S1".into()
            }
        );
    }

    #[tokio::test]
    async fn test_recovery_requests_previous_session() {
        let (mut client, server) = scripted_server(vec![
            Message::SessionOffer {
                offered_session_id: "S9".into(),
            },
            Message::SessionJoinResponse {
                assigned_session_id: "S1".into(),
            },
        ]);

        assert_eq!(handshake(&mut client, Some("S1")).await.unwrap(), "S1");
        let received = server.await.unwrap();
        assert_eq!(
            received[1],
            Message::SessionJoinRequest {
                desired_session_id: "S1".into()
            }
        );
    }

    #[tokio::test]
    async fn test_mismatched_assignment_fails() {
        let (mut client, _server) = scripted_server(vec![
            Message::SessionOffer {
                offered_session_id: "S1".into(),
            },
            Message::SessionJoinResponse {
                assigned_session_id: "S2".into(),
            },
        ]);

        assert!(matches!(
            handshake(&mut client, None).await,
            Err(HandshakeError::SessionMismatch { requested, assigned }) if requested == "S1" && assigned == "S2"
        ));
    }

    #[tokio::test]
    async fn test_session_error_aborts() {
        let (mut client, _server) = scripted_server(vec![Message::SessionError {
            session_id: String::new(),
            code: 2,
            description: "server busy".into(),
        }]);

        assert!(matches!(
            handshake(&mut client, None).await,
            Err(HandshakeError::Rejected { code: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_unexpected_message_aborts() {
        let (mut client, _server) = scripted_server(vec![Message::KeepAlive]);

        assert!(matches!(
            handshake(&mut client, None).await,
            Err(HandshakeError::UnexpectedMessage {
                expected: "SessionOffer",
                received: "KeepAlive"
            })
        ));
    }
}
