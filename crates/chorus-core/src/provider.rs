use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;
use crate::ids::ParticipantId;
use crate::messages::ContextEntry;
use crate::roster::{Group, Persona};

/// Raw response body of a persona call, read chunk by chunk.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, GatewayError>> + Send>>;

/// Which backend route serves a persona.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersonaEndpoint {
    Chat,
    /// Knowledge-augmented personas.
    Rag,
}

impl PersonaEndpoint {
    pub fn path(self) -> &'static str {
        match self {
            Self::Chat => "/api/chat",
            Self::Rag => "/rag/query",
        }
    }
}

/// Body of a persona response call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaRequest {
    pub model: String,
    pub message: String,
    /// Same text as `message`; the RAG route reads this field.
    pub query: String,
    pub personality: String,
    pub history: Vec<ContextEntry>,
    pub index: usize,
    #[serde(rename = "aiName")]
    pub ai_name: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub rag: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge: Option<String>,
    pub custom_prompt: String,
}

impl PersonaRequest {
    pub fn new(
        persona: &Persona,
        group: &Group,
        message: &str,
        history: Vec<ContextEntry>,
        index: usize,
    ) -> Self {
        Self {
            model: persona.model.clone(),
            message: message.to_string(),
            query: message.to_string(),
            personality: persona.personality.clone(),
            history,
            index,
            ai_name: persona.name().to_string(),
            rag: persona.rag,
            knowledge: persona.knowledge.clone(),
            custom_prompt: persona.prompt_for(group),
        }
    }

    pub fn endpoint(&self) -> PersonaEndpoint {
        if self.rag {
            PersonaEndpoint::Rag
        } else {
            PersonaEndpoint::Chat
        }
    }
}

/// Body of a scheduler call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub message: String,
    pub history: Vec<ContextEntry>,
    #[serde(rename = "availableAIs")]
    pub available: Vec<Persona>,
}

/// Scheduler answer: persona ids in speaking order.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScheduleResponse {
    #[serde(rename = "selectedAIs", default)]
    pub selected: Vec<ParticipantId>,
}

/// What a turn does when the scheduler fails or picks nobody it knows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SchedulerFallback {
    /// Every persona of the roster answers.
    #[default]
    FullRoster,
    /// Nobody answers; the turn ends after the user message.
    Nobody,
}

/// Opens the streaming response of one persona.
#[async_trait]
pub trait PersonaClient: Send + Sync {
    async fn open(&self, request: &PersonaRequest) -> Result<ByteStream, GatewayError>;
}

/// Remote policy deciding which personas answer a message.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn select(&self, request: &ScheduleRequest) -> Result<Vec<ParticipantId>, GatewayError>;
}
