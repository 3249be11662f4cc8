use serde::{Deserialize, Serialize};

use crate::db::{Message, User};

/// Commands a client sends over its socket.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    #[serde(alias = "init")]
    Register { identity: String },
    FindPartner,
    SendMessage { content: String },
    NextPartner,
    Heartbeat,
    GetMessages,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Partner {
    pub external_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    PartnerLeft,
    PartnerTimedOut,
}

/// Events pushed to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Registered { user: User },
    Searching,
    ChatStarted { partner: Partner, messages: Vec<Message> },
    Message {
        #[serde(flatten)]
        message: Message,
        is_own: bool,
    },
    Messages { messages: Vec<Message> },
    ChatEnded { reason: EndReason },
    PartnerDisconnected,
    PartnerReconnected { partner: Partner },
    Error { reason: String },
}

impl ServerEvent {
    pub fn chat_started(partner: &str, messages: Vec<Message>) -> Self {
        ServerEvent::ChatStarted {
            partner: Partner { external_id: partner.to_owned() },
            messages,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_commands() {
        let register: ClientCommand =
            serde_json::from_value(json!({"type": "register", "identity": "42"})).unwrap();
        assert_eq!(register, ClientCommand::Register { identity: "42".to_owned() });

        let init: ClientCommand =
            serde_json::from_value(json!({"type": "init", "identity": "42"})).unwrap();
        assert_eq!(init, register);

        let find: ClientCommand = serde_json::from_value(json!({"type": "find_partner"})).unwrap();
        assert_eq!(find, ClientCommand::FindPartner);

        let send: ClientCommand =
            serde_json::from_value(json!({"type": "send_message", "content": "hey"})).unwrap();
        assert_eq!(send, ClientCommand::SendMessage { content: "hey".to_owned() });

        assert!(serde_json::from_value::<ClientCommand>(json!({"type": "dance"})).is_err());
    }

    #[test]
    fn message_event_is_flat() {
        let event = ServerEvent::Message {
            message: Message {
                id: 7,
                sender_id: "a".to_owned(),
                receiver_id: "b".to_owned(),
                content: "yo".to_owned(),
                timestamp: 1000,
            },
            is_own: false,
        };

        assert_eq!(serde_json::to_value(&event).unwrap(), json!({
            "type": "message",
            "id": 7,
            "sender_id": "a",
            "receiver_id": "b",
            "content": "yo",
            "timestamp": 1000,
            "is_own": false,
        }));
    }

    #[test]
    fn chat_ended_carries_reason() {
        let event = ServerEvent::ChatEnded { reason: EndReason::PartnerTimedOut };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "chat_ended", "reason": "partner_timed_out"})
        );
    }
}
