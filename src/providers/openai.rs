pub mod client;
pub mod stream;
pub mod types;

pub use client::OpenAIClient;
pub use stream::{collect_turn, reassemble, Turn};
