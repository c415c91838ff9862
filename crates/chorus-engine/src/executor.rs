use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use chorus_core::errors::GatewayError;
use chorus_core::messages::{ContextEntry, Message};
use chorus_core::provider::{PersonaClient, PersonaRequest};
use chorus_core::roster::{Group, Persona};
use chorus_llm::frame::{FrameDecoder, FramePayload};

use crate::config::EngineConfig;
use crate::conversation::MessageSlot;
use crate::prefix::NamePrefixStripper;

/// One persona's share of a turn.
pub struct SubTurn<'a> {
    pub persona: &'a Persona,
    pub group: &'a Group,
    /// The user text that opened the turn.
    pub message: &'a str,
    /// Transcript as this persona sees it, predecessors included.
    pub history: Vec<ContextEntry>,
    pub index: usize,
    pub stripper: &'a NamePrefixStripper,
}

#[derive(Clone, Debug)]
pub enum SubTurnStatus {
    Completed,
    /// The stream ended without text; the fallback text was shown.
    Fallback,
    Failed(GatewayError),
}

/// Terminal state of a sub-turn.
#[derive(Clone, Debug)]
pub struct SubTurnOutcome {
    pub message: Message,
    pub status: SubTurnStatus,
    /// Line to add to the turn's transcript before the next persona speaks.
    pub context_entry: ContextEntry,
    pub timed_out: bool,
    pub cancelled: bool,
}

enum StreamEnd {
    Finished,
    TimedOut,
    Cancelled,
}

/// Runs a single persona call: open → pump frames into the slot → finalize.
pub struct TurnExecutor {
    client: Arc<dyn PersonaClient>,
    config: Arc<EngineConfig>,
}

impl TurnExecutor {
    pub fn new(client: Arc<dyn PersonaClient>, config: Arc<EngineConfig>) -> Self {
        Self { client, config }
    }

    #[instrument(skip_all, fields(persona = %job.persona.name(), index = job.index, message_id = slot.id()))]
    pub async fn execute(
        &self,
        job: SubTurn<'_>,
        mut slot: MessageSlot,
        cancel: &CancellationToken,
    ) -> SubTurnOutcome {
        let started = Instant::now();
        let request = PersonaRequest::new(job.persona, job.group, job.message, job.history, job.index);
        let mut text = AccumulatedText::new(job.stripper);

        let pumped = self.pump(&request, &mut text, &mut slot, cancel).await;

        let (message, status, end) = match pumped {
            Ok(end) if text.is_blank() => {
                let message = slot.finalize(self.config.fallback_text.clone(), false);
                (message, SubTurnStatus::Fallback, end)
            }
            Ok(end) => {
                let message = slot.finalize(text.into_string(), false);
                (message, SubTurnStatus::Completed, end)
            }
            Err(e) => {
                warn!(error = %e, error_kind = e.error_kind(), "persona call failed");
                let message = slot.finalize(self.config.error_text(&e.to_string()), true);
                (message, SubTurnStatus::Failed(e), StreamEnd::Finished)
            }
        };

        let name = job.persona.name();
        let context_entry = ContextEntry::spoken(name, name, &message.content);
        let timed_out = matches!(end, StreamEnd::TimedOut);
        let cancelled = matches!(end, StreamEnd::Cancelled);

        info!(
            chars = message.content.chars().count(),
            is_error = message.is_error,
            timed_out,
            cancelled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sub-turn finished"
        );

        SubTurnOutcome {
            message,
            status,
            context_entry,
            timed_out,
            cancelled,
        }
    }

    /// Read the persona stream until it ends, goes silent, or the turn is aborted.
    /// Every wait (the call itself and each read) is bounded by the read timeout.
    async fn pump(
        &self,
        request: &PersonaRequest,
        text: &mut AccumulatedText<'_>,
        slot: &mut MessageSlot,
        cancel: &CancellationToken,
    ) -> Result<StreamEnd, GatewayError> {
        let read_timeout = self.config.read_timeout;

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
            r = tokio::time::timeout(read_timeout, self.client.open(request)) => r,
        };
        let mut stream = match opened {
            Ok(result) => result?,
            Err(_) => {
                debug!(timeout_ms = read_timeout.as_millis() as u64, "no response before timeout");
                return Ok(StreamEnd::TimedOut);
            }
        };

        let mut decoder = FrameDecoder::new();
        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("read abandoned on abort");
                    return Ok(StreamEnd::Cancelled);
                }
                r = tokio::time::timeout(read_timeout, stream.next()) => r,
            };

            match read {
                Err(_) => {
                    debug!(timeout_ms = read_timeout.as_millis() as u64, "stream silent, closing");
                    return Ok(StreamEnd::TimedOut);
                }
                Ok(None) => {
                    if let Some(payload) = decoder.finish() {
                        text.apply(&payload, slot);
                    }
                    if decoder.malformed_count() > 0 {
                        debug!(malformed = decoder.malformed_count(), "stream had malformed frames");
                    }
                    return Ok(StreamEnd::Finished);
                }
                Ok(Some(Err(e))) => return Err(e),
                Ok(Some(Ok(chunk))) => {
                    for payload in decoder.push(&chunk) {
                        text.apply(&payload, slot);
                    }
                }
            }
        }
    }
}

/// Text received so far for one sub-turn, kept free of echoed speaker labels.
struct AccumulatedText<'a> {
    text: String,
    stripper: &'a NamePrefixStripper,
}

impl<'a> AccumulatedText<'a> {
    fn new(stripper: &'a NamePrefixStripper) -> Self {
        Self {
            text: String::new(),
            stripper,
        }
    }

    fn apply(&mut self, payload: &FramePayload, slot: &mut MessageSlot) {
        let Some(fragment) = payload.text() else {
            return;
        };
        self.text.push_str(fragment);
        let stripped = self.stripper.strip(&self.text);
        if stripped.len() != self.text.len() {
            self.text = stripped.to_string();
        }
        slot.write(&self.text);
    }

    fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    fn into_string(self) -> String {
        self.text
    }
}
