use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::trace;

use chorus_core::events::ConversationEvent;
use chorus_core::ids::MessageId;
use chorus_core::messages::{ContextEntry, Message};
use chorus_core::roster::Participant;

const EVENT_CAPACITY: usize = 1024;

#[derive(Default)]
struct LogState {
    messages: Vec<Message>,
    next_id: MessageId,
    /// Bumped by `clear`; slots opened before a clear stop writing.
    generation: u64,
}

/// The ordered message list of one group conversation.
///
/// Shared behind an `Arc`: the sequencer appends, slots write their own entry,
/// and render sinks read snapshots or follow the event channel.
pub struct ConversationLog {
    state: RwLock<LogState>,
    events: broadcast::Sender<ConversationEvent>,
}

impl ConversationLog {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            state: RwLock::new(LogState {
                next_id: 1,
                ..LogState::default()
            }),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.subscribe()
    }

    pub fn append_user(&self, sender: Participant, content: impl Into<String>) -> Message {
        let message = {
            let mut state = self.state.write();
            let id = state.allocate_id();
            let message = Message::user(id, sender, content);
            state.messages.push(message.clone());
            message
        };
        self.emit(ConversationEvent::MessageAppended {
            message: message.clone(),
        });
        message
    }

    /// Append an empty streaming placeholder and hand out the only writer for it.
    pub fn open_slot(self: &Arc<Self>, sender: Participant) -> MessageSlot {
        self.open_slot_at(None, sender)
    }

    /// Like `open_slot`, but for a turn that started in `generation`. After a
    /// clear the slot is detached from the start and never enters the log.
    pub fn open_slot_in(self: &Arc<Self>, generation: u64, sender: Participant) -> MessageSlot {
        self.open_slot_at(Some(generation), sender)
    }

    fn open_slot_at(self: &Arc<Self>, pinned: Option<u64>, sender: Participant) -> MessageSlot {
        let (message, index, generation, attached) = {
            let mut state = self.state.write();
            let id = state.allocate_id();
            let message = Message::placeholder(id, sender);
            let generation = pinned.unwrap_or(state.generation);
            if generation == state.generation {
                state.messages.push(message.clone());
                (message, state.messages.len() - 1, generation, true)
            } else {
                (message, usize::MAX, generation, false)
            }
        };
        if attached {
            self.emit(ConversationEvent::MessageAppended {
                message: message.clone(),
            });
        } else {
            trace!(id = message.id, "slot opened after clear, detached");
        }
        MessageSlot {
            log: Arc::clone(self),
            index,
            generation,
            draft: message,
            done: false,
        }
    }

    /// Bumped by every `clear`.
    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.state.read().messages.clone()
    }

    pub fn get(&self, id: MessageId) -> Option<Message> {
        self.state.read().messages.iter().find(|m| m.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.read().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Transcript of every message so far, as sent to the backend.
    pub fn context_entries(&self, user_label: &str) -> Vec<ContextEntry> {
        self.state
            .read()
            .messages
            .iter()
            .map(|m| m.to_context_entry(user_label))
            .collect()
    }

    /// Drop every message. Identifiers keep increasing.
    pub fn clear(&self) {
        {
            let mut state = self.state.write();
            state.messages.clear();
            state.generation += 1;
        }
        self.emit(ConversationEvent::Cleared);
    }

    pub(crate) fn emit(&self, event: ConversationEvent) {
        if self.events.send(event).is_err() {
            trace!("no conversation subscribers");
        }
    }

    /// Apply `f` to the slot's entry if it still lives at `index`.
    fn with_entry<R>(&self, index: usize, generation: u64, f: impl FnOnce(&mut Message) -> R) -> Option<R> {
        let mut state = self.state.write();
        if state.generation != generation {
            return None;
        }
        state.messages.get_mut(index).map(f)
    }
}

impl LogState {
    fn allocate_id(&mut self) -> MessageId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// Exclusive write handle to one streaming message.
///
/// Holds the entry's position directly, so writes never search by id. Finalizing
/// consumes the slot. A slot dropped without finalizing still clears the
/// streaming flag.
pub struct MessageSlot {
    log: Arc<ConversationLog>,
    index: usize,
    generation: u64,
    draft: Message,
    done: bool,
}

impl MessageSlot {
    pub fn id(&self) -> MessageId {
        self.draft.id
    }

    /// Replace the visible content with the accumulated text so far.
    pub fn write(&mut self, content: &str) {
        self.draft.content.clear();
        self.draft.content.push_str(content);
        let written = self
            .log
            .with_entry(self.index, self.generation, |m| {
                m.content.clear();
                m.content.push_str(content);
            })
            .is_some();
        if written {
            self.log.emit(ConversationEvent::MessageUpdated {
                id: self.draft.id,
                content: content.to_string(),
            });
        }
    }

    /// Store the final content, end streaming, and return the finished message.
    pub fn finalize(mut self, content: String, is_error: bool) -> Message {
        self.draft.content = content;
        self.draft.is_error = is_error;
        self.draft.is_streaming = false;
        self.done = true;
        self.commit();
        self.draft.clone()
    }

    fn commit(&self) {
        let message = self.draft.clone();
        let stored = self
            .log
            .with_entry(self.index, self.generation, |m| *m = message.clone())
            .is_some();
        if stored {
            self.log.emit(ConversationEvent::MessageFinalized { message });
        }
    }
}

impl Drop for MessageSlot {
    fn drop(&mut self) {
        if !self.done {
            self.draft.is_streaming = false;
            self.commit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Participant {
        Participant::new("alice", "Alice")
    }

    fn dana() -> Participant {
        Participant::new("user", "Dana")
    }

    #[test]
    fn ids_are_unique_and_ordered() {
        let log = ConversationLog::new();
        let a = log.append_user(dana(), "one");
        let slot = log.open_slot(alice());
        let b = log.append_user(dana(), "two");
        assert!(a.id < slot.id() && slot.id() < b.id);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn slot_writes_only_its_entry() {
        let log = ConversationLog::new();
        log.append_user(dana(), "hi");
        let mut slot = log.open_slot(alice());
        slot.write("Hel");
        slot.write("Hello");

        let snapshot = log.snapshot();
        assert_eq!(snapshot[0].content, "hi");
        assert_eq!(snapshot[1].content, "Hello");
        assert!(snapshot[1].is_streaming);

        let done = slot.finalize("Hello".into(), false);
        assert!(!done.is_streaming);
        assert_eq!(log.get(done.id).unwrap(), done);
    }

    #[test]
    fn dropped_slot_stops_streaming() {
        let log = ConversationLog::new();
        let mut slot = log.open_slot(alice());
        let id = slot.id();
        slot.write("partial");
        drop(slot);
        let msg = log.get(id).unwrap();
        assert!(!msg.is_streaming);
        assert_eq!(msg.content, "partial");
    }

    #[test]
    fn events_follow_the_slot_lifecycle() {
        let log = ConversationLog::new();
        let mut rx = log.subscribe();
        let mut slot = log.open_slot(alice());
        slot.write("x");
        slot.finalize("x".into(), false);

        let kinds: Vec<&str> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.event_type())
            .collect();
        assert_eq!(kinds, vec!["message_appended", "message_updated", "message_finalized"]);
    }

    #[test]
    fn clear_detaches_open_slots() {
        let log = ConversationLog::new();
        let mut slot = log.open_slot(alice());
        log.clear();
        assert!(log.is_empty());

        slot.write("late");
        let msg = slot.finalize("late".into(), false);
        assert_eq!(msg.content, "late");
        assert!(log.is_empty());

        let next = log.append_user(dana(), "again");
        assert!(next.id > msg.id);
    }

    #[test]
    fn slot_pinned_before_clear_stays_out_of_the_log() {
        let log = ConversationLog::new();
        log.append_user(dana(), "old topic");
        let generation = log.generation();
        log.clear();
        let mut rx = log.subscribe();

        let mut slot = log.open_slot_in(generation, alice());
        slot.write("still about the old topic");
        let msg = slot.finalize("still about the old topic".into(), false);
        assert!(!msg.is_streaming);
        assert!(log.is_empty());
        assert!(rx.try_recv().is_err());

        let fresh = log.open_slot_in(log.generation(), alice());
        assert_eq!(log.len(), 1);
        assert!(fresh.id() > msg.id);
    }

    #[test]
    fn context_entries_label_speakers() {
        let log = ConversationLog::new();
        log.append_user(dana(), "hi");
        let slot = log.open_slot(alice());
        slot.finalize("Hello".into(), false);

        let entries = log.context_entries("user");
        let contents: Vec<&str> = entries.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["user：hi", "Alice：Hello"]);
    }
}
