pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;
pub mod provider;
pub mod roster;
