pub mod message_chunk;
pub mod messages;

pub use message_chunk::{FinishReason, MessageChunk};
pub use messages::Message;
