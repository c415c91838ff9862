use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use chorus_core::events::{ConversationEvent, FallbackReason};
use chorus_core::ids::{ParticipantId, TurnId};
use chorus_core::messages::{ContextEntry, Message};
use chorus_core::provider::{PersonaClient, ScheduleRequest, Scheduler, SchedulerFallback};
use chorus_core::roster::{Persona, Roster};
use chorus_llm::backend::{BackendConfig, ChatBackend};

use crate::config::EngineConfig;
use crate::conversation::ConversationLog;
use crate::error::EngineError;
use crate::executor::{SubTurn, SubTurnOutcome, TurnExecutor};
use crate::prefix::NamePrefixStripper;

/// Where the sequencer is in the current turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    AwaitingSchedule,
    /// Sub-turn `index` of `of` is streaming.
    RunningTurn { index: usize, of: usize },
}

/// Summary of a finished turn.
#[derive(Clone, Debug)]
pub struct TurnReport {
    pub turn_id: TurnId,
    pub user_message: Message,
    /// Personas chosen to answer, mutes already removed.
    pub responders: Vec<ParticipantId>,
    pub outcomes: Vec<SubTurnOutcome>,
    pub fallback: Option<FallbackReason>,
    pub cancelled: bool,
    /// Transcript as it stood after the last sub-turn.
    pub context: Vec<ContextEntry>,
}

/// Drives one conversation: a single turn at a time, personas strictly in order.
pub struct TurnSequencer {
    roster: Roster,
    log: Arc<ConversationLog>,
    executor: TurnExecutor,
    scheduler: Arc<dyn Scheduler>,
    config: Arc<EngineConfig>,
    muted: RwLock<HashSet<ParticipantId>>,
    all_respond: AtomicBool,
    phase: Mutex<TurnPhase>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl TurnSequencer {
    pub fn new(
        roster: Roster,
        client: Arc<dyn PersonaClient>,
        scheduler: Arc<dyn Scheduler>,
        config: EngineConfig,
    ) -> Self {
        let config = Arc::new(config);
        let all_respond = roster.group.all_respond;
        Self {
            roster,
            log: ConversationLog::new(),
            executor: TurnExecutor::new(client, config.clone()),
            scheduler,
            config,
            muted: RwLock::new(HashSet::new()),
            all_respond: AtomicBool::new(all_respond),
            phase: Mutex::new(TurnPhase::Idle),
            cancel: Mutex::new(None),
        }
    }

    /// Sequencer backed by the HTTP chat backend for both personas and scheduling.
    pub fn connect(
        roster: Roster,
        backend: BackendConfig,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let backend = Arc::new(ChatBackend::new(backend)?);
        Ok(Self::new(roster, backend.clone(), backend, config))
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn log(&self) -> &Arc<ConversationLog> {
        &self.log
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ConversationEvent> {
        self.log.subscribe()
    }

    pub fn phase(&self) -> TurnPhase {
        *self.phase.lock()
    }

    // ── Mutes ──

    pub fn mute(&self, id: &ParticipantId) -> bool {
        self.muted.write().insert(id.clone())
    }

    pub fn unmute(&self, id: &ParticipantId) -> bool {
        self.muted.write().remove(id)
    }

    /// Flip the mute state; returns whether the persona is now muted.
    pub fn toggle_mute(&self, id: &ParticipantId) -> bool {
        let mut muted = self.muted.write();
        if muted.remove(id) {
            false
        } else {
            muted.insert(id.clone());
            true
        }
    }

    pub fn is_muted(&self, id: &ParticipantId) -> bool {
        self.muted.read().contains(id)
    }

    // ── Discussion mode ──

    pub fn set_all_respond(&self, enabled: bool) {
        self.all_respond.store(enabled, Ordering::Relaxed);
    }

    pub fn all_respond(&self) -> bool {
        self.all_respond.load(Ordering::Relaxed)
    }

    /// Cancel the running turn. Returns false when nothing was running.
    pub fn abort(&self) -> bool {
        match self.cancel.lock().as_ref() {
            Some(token) => {
                info!("aborting turn");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Empty the conversation, e.g. when switching to another one.
    ///
    /// A running turn is left alone: it finishes against the transcript it
    /// started with, and none of its messages land in the emptied log.
    pub fn clear(&self) {
        if self.phase() != TurnPhase::Idle {
            debug!("clearing conversation under a running turn");
        }
        self.log.clear();
    }

    /// Run one full turn for `text`.
    #[instrument(skip_all, fields(group = %self.roster.group.name))]
    pub async fn submit(&self, text: &str) -> Result<TurnReport, EngineError> {
        if text.trim().is_empty() {
            return Err(EngineError::EmptyInput);
        }
        let (guard, cancel) = self.begin_turn()?;
        let turn_id = TurnId::new();
        info!(turn_id = %turn_id, "turn started");
        self.emit(ConversationEvent::TurnStarted {
            turn_id: turn_id.clone(),
        });

        // 1. Seed the transcript from everything said before this message
        let generation = self.log.generation();
        let mut history = self.log.context_entries(&self.config.user_label);
        let user_message = self.log.append_user(self.roster.user.clone(), text);

        // 2. Pick the responders
        let (selected, fallback) = self
            .select_responders(&turn_id, text, &history, &cancel)
            .await;
        let responders: Vec<&Persona> = {
            let muted = self.muted.read();
            selected
                .into_iter()
                .filter(|p| !muted.contains(p.id()))
                .collect()
        };
        let responder_ids: Vec<ParticipantId> = responders.iter().map(|p| p.id().clone()).collect();
        debug!(responders = ?responder_ids, "selection resolved");
        self.emit(ConversationEvent::SelectionResolved {
            turn_id: turn_id.clone(),
            responders: responder_ids.clone(),
        });

        // 3. Run each persona in order
        let stripper = NamePrefixStripper::new(
            self.roster
                .participants()
                .map(|p| p.display_name.as_str())
                .chain([self.config.user_label.as_str()]),
        );
        let total = responders.len();
        let mut outcomes = Vec::with_capacity(total);
        let mut cancelled = cancel.is_cancelled();

        for (index, persona) in responders.iter().copied().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            self.set_phase(TurnPhase::RunningTurn { index, of: total });

            let slot = self.log.open_slot_in(generation, persona.participant.clone());
            let job = SubTurn {
                persona,
                group: &self.roster.group,
                message: text,
                history: history.clone(),
                index,
                stripper: &stripper,
            };
            let outcome = self.executor.execute(job, slot, &cancel).await;
            history.push(outcome.context_entry.clone());
            let stop = outcome.cancelled;
            outcomes.push(outcome);

            if stop {
                cancelled = true;
                break;
            }
            if index + 1 < total && !self.config.pacing.is_zero() {
                tokio::time::sleep(self.config.pacing).await;
            }
        }

        drop(guard);
        info!(
            turn_id = %turn_id,
            responded = outcomes.len(),
            cancelled,
            "turn finished"
        );
        self.emit(ConversationEvent::TurnFinished {
            turn_id: turn_id.clone(),
            responded: outcomes.len(),
            cancelled,
        });

        Ok(TurnReport {
            turn_id,
            user_message,
            responders: responder_ids,
            outcomes,
            fallback,
            cancelled,
            context: history,
        })
    }

    /// Ask the scheduler who answers, falling back per configuration when it
    /// fails or names nobody on the roster.
    async fn select_responders(
        &self,
        turn_id: &TurnId,
        text: &str,
        history: &[ContextEntry],
        cancel: &CancellationToken,
    ) -> (Vec<&Persona>, Option<FallbackReason>) {
        if self.all_respond() {
            return (self.roster.personas.iter().collect(), None);
        }
        self.set_phase(TurnPhase::AwaitingSchedule);

        let request = ScheduleRequest {
            message: text.to_string(),
            history: history.to_vec(),
            available: self.roster.personas.clone(),
        };
        let answer = tokio::select! {
            biased;
            _ = cancel.cancelled() => return (Vec::new(), None),
            r = self.scheduler.select(&request) => r,
        };

        let reason = match answer {
            Ok(ids) => {
                let picked = self.map_selection(&ids);
                if !picked.is_empty() {
                    return (picked, None);
                }
                FallbackReason::EmptySelection
            }
            Err(e) => {
                warn!(error = %e, error_kind = e.error_kind(), "scheduler failed");
                FallbackReason::SchedulerFailed {
                    error: e.to_string(),
                }
            }
        };

        let policy = self.config.scheduler_fallback;
        warn!(?reason, ?policy, "using scheduler fallback");
        self.emit(ConversationEvent::SchedulerFallback {
            turn_id: turn_id.clone(),
            reason: reason.clone(),
        });
        let personas = match policy {
            SchedulerFallback::FullRoster => self.roster.personas.iter().collect(),
            SchedulerFallback::Nobody => Vec::new(),
        };
        (personas, Some(reason))
    }

    /// Resolve scheduler ids against the roster, keeping scheduler order.
    fn map_selection(&self, ids: &[ParticipantId]) -> Vec<&Persona> {
        let mut seen = HashSet::new();
        let mut picked = Vec::new();
        for id in ids {
            if !seen.insert(id) {
                continue;
            }
            match self.roster.persona(id) {
                Some(persona) => picked.push(persona),
                None => warn!(id = %id, "scheduler selected unknown persona"),
            }
        }
        picked
    }

    fn begin_turn(&self) -> Result<(PhaseGuard<'_>, CancellationToken), EngineError> {
        let mut phase = self.phase.lock();
        if *phase != TurnPhase::Idle {
            return Err(EngineError::TurnInProgress);
        }
        // Running from here on; `select_responders` refines the phase.
        *phase = TurnPhase::AwaitingSchedule;
        let token = CancellationToken::new();
        *self.cancel.lock() = Some(token.clone());
        Ok((PhaseGuard { sequencer: self }, token))
    }

    fn set_phase(&self, phase: TurnPhase) {
        *self.phase.lock() = phase;
    }

    fn emit(&self, event: ConversationEvent) {
        self.log.emit(event);
    }
}

/// Returns the sequencer to Idle however the turn ends, including when the
/// `submit` future is dropped mid-turn.
struct PhaseGuard<'a> {
    sequencer: &'a TurnSequencer,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        *self.sequencer.cancel.lock() = None;
        *self.sequencer.phase.lock() = TurnPhase::Idle;
    }
}
