use serde::{Deserialize, Serialize};

use crate::ids::{UserId, VisitId};
use crate::models::{Message, VisitStatus};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: UserId, username: String },

    /// A chat message was posted on a visit the recipient takes part in
    MessageCreate { message: Message },

    /// The recipient's messages on a visit were read by the counter-party
    MessagesRead { visit_id: VisitId, reader_id: UserId },

    /// A visit changed status
    VisitUpdate {
        visit_id: VisitId,
        status: VisitStatus,
        actor_id: UserId,
    },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged() {
        let event = GatewayEvent::VisitUpdate {
            visit_id: VisitId::new(),
            status: VisitStatus::Refused,
            actor_id: UserId::new(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "VisitUpdate");
        assert_eq!(json["data"]["status"], "refused");
    }

    #[test]
    fn identify_parses() {
        let cmd: GatewayCommand =
            serde_json::from_str(r#"{"type":"Identify","data":{"token":"abc"}}"#).unwrap();
        assert!(matches!(cmd, GatewayCommand::Identify { token } if token == "abc"));
    }
}
