use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::MessageId;
use crate::roster::Participant;

/// Separator the backend expects between a speaker label and their text.
pub const SPEAKER_SEPARATOR: &str = "：";

/// One entry of the rendered conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender: Participant,
    pub content: String,
    #[serde(rename = "isAIResponse")]
    pub is_ai_response: bool,
    pub is_error: bool,
    /// Delivery in progress: the persona is still streaming into this entry.
    pub is_streaming: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(id: MessageId, sender: Participant, content: impl Into<String>) -> Self {
        Self {
            id,
            sender,
            content: content.into(),
            is_ai_response: false,
            is_error: false,
            is_streaming: false,
            created_at: Utc::now(),
        }
    }

    /// Empty placeholder a persona streams into.
    pub fn placeholder(id: MessageId, sender: Participant) -> Self {
        Self {
            id,
            sender,
            content: String::new(),
            is_ai_response: true,
            is_error: false,
            is_streaming: true,
            created_at: Utc::now(),
        }
    }

    /// The transcript line for this message as later speakers see it.
    pub fn to_context_entry(&self, user_label: &str) -> ContextEntry {
        let label = if self.is_ai_response {
            self.sender.display_name.as_str()
        } else {
            user_label
        };
        ContextEntry::spoken(label, &self.sender.display_name, &self.content)
    }
}

/// One line of the rolling transcript sent with every persona and scheduler call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub role: String,
    pub content: String,
    #[serde(rename = "name")]
    pub speaker_name: String,
}

impl ContextEntry {
    /// Build an entry whose content is `"<label>：<text>"`.
    pub fn spoken(label: &str, speaker_name: &str, text: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: format!("{label}{SPEAKER_SEPARATOR}{text}"),
            speaker_name: speaker_name.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_uses_user_label() {
        let msg = Message::user(1, Participant::new("user", "Dana"), "hi all");
        let entry = msg.to_context_entry("user");
        assert_eq!(entry.role, "user");
        assert_eq!(entry.content, "user：hi all");
        assert_eq!(entry.speaker_name, "Dana");
    }

    #[test]
    fn ai_message_uses_display_name() {
        let mut msg = Message::placeholder(2, Participant::new(7, "Alice"));
        msg.content = "hello".into();
        let entry = msg.to_context_entry("user");
        assert_eq!(entry.content, "Alice：hello");
    }

    #[test]
    fn placeholder_is_streaming_and_empty() {
        let msg = Message::placeholder(5, Participant::new(1, "Bob"));
        assert!(msg.is_streaming);
        assert!(msg.is_ai_response);
        assert!(msg.content.is_empty());
        assert!(!msg.is_error);
    }

    #[test]
    fn wire_field_names() {
        let entry = ContextEntry::spoken("Bob", "Bob", "yo");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["name"], "Bob");
        assert_eq!(json["content"], "Bob：yo");

        let msg = Message::user(1, Participant::new("user", "Dana"), "x");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["isAIResponse"], false);
        assert_eq!(json["isStreaming"], false);
    }
}
