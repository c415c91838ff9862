use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, ParticipantId, TurnId};
use crate::messages::Message;

/// Why the scheduler's answer was not used for a turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    SchedulerFailed { error: String },
    EmptySelection,
}

/// Change notifications for the render sink. Subscribers apply them to their
/// own copy of the message list, or re-read a snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConversationEvent {
    #[serde(rename = "message_appended")]
    MessageAppended { message: Message },

    /// Full accumulated content of a streaming message after a frame.
    #[serde(rename = "message_updated")]
    MessageUpdated { id: MessageId, content: String },

    #[serde(rename = "message_finalized")]
    MessageFinalized { message: Message },

    #[serde(rename = "turn_started")]
    TurnStarted { turn_id: TurnId },

    #[serde(rename = "selection_resolved")]
    SelectionResolved {
        turn_id: TurnId,
        responders: Vec<ParticipantId>,
    },

    #[serde(rename = "scheduler_fallback")]
    SchedulerFallback {
        turn_id: TurnId,
        reason: FallbackReason,
    },

    /// Closes a turn; nothing about that turn is sent after it.
    #[serde(rename = "turn_finished")]
    TurnFinished {
        turn_id: TurnId,
        responded: usize,
        cancelled: bool,
    },

    #[serde(rename = "cleared")]
    Cleared,
}

impl ConversationEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageAppended { .. } => "message_appended",
            Self::MessageUpdated { .. } => "message_updated",
            Self::MessageFinalized { .. } => "message_finalized",
            Self::TurnStarted { .. } => "turn_started",
            Self::SelectionResolved { .. } => "selection_resolved",
            Self::SchedulerFallback { .. } => "scheduler_fallback",
            Self::TurnFinished { .. } => "turn_finished",
            Self::Cleared => "cleared",
        }
    }
}
