pub mod config;
pub mod conversation;
pub mod error;
pub mod executor;
pub mod prefix;
pub mod sequencer;

pub use config::EngineConfig;
pub use conversation::{ConversationLog, MessageSlot};
pub use error::EngineError;
pub use executor::{SubTurn, SubTurnOutcome, SubTurnStatus, TurnExecutor};
pub use sequencer::{TurnPhase, TurnReport, TurnSequencer};
