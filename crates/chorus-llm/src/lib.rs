pub mod backend;
pub mod frame;

pub mod mock;

pub use backend::{BackendConfig, ChatBackend};
pub use frame::{FrameDecoder, FramePayload};
