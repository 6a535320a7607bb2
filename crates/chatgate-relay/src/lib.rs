pub mod relay;
pub mod sse;
mod upstream;

pub use relay::{stream_events, HttpRelay};
pub use sse::{SseEvent, SseParser};
