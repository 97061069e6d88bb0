//! JSON text-frame codec for Courier events.

use crate::events::{ClientEvent, ServerEvent};
use thiserror::Error;

/// Codec errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame is not valid JSON or does not match any known event.
    #[error("Malformed event frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Decode an inbound text frame into a client event.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] if the frame is not valid JSON or
/// names an unknown event.
pub fn decode_client(frame: &str) -> Result<ClientEvent, ProtocolError> {
    Ok(serde_json::from_str(frame)?)
}

/// Encode a server event as an outbound text frame.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] if serialization fails.
pub fn encode_server(event: &ServerEvent) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(event)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_decode_send_message() {
        let receiver = Uuid::new_v4();
        let frame = format!(
            r#"{{"event":"send_message","data":{{"receiverId":"{receiver}","content":"hello"}}}}"#
        );

        let event = decode_client(&frame).unwrap();
        assert_eq!(
            event,
            ClientEvent::SendMessage {
                receiver_id: Some(receiver),
                content: "hello".to_string(),
            }
        );
    }

    #[test]
    fn test_decode_rejects_unknown_event() {
        let result = decode_client(r#"{"event":"join_room","data":{}}"#);
        assert!(matches!(result, Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_decode_rejects_non_json() {
        assert!(decode_client("not json").is_err());
    }

    #[test]
    fn test_encode_round_trip() {
        let event = ServerEvent::UserTyping {
            user_id: Uuid::new_v4(),
        };

        let frame = encode_server(&event).unwrap();
        let back: ServerEvent = serde_json::from_str(&frame).unwrap();
        assert_eq!(back, event);
    }
}
