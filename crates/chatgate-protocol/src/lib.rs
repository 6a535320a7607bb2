pub mod error;
pub mod event;
pub mod message;

pub use error::{ErrorKind, GatewayError};
pub use event::{StreamEvent, Usage};
pub use message::{sanitize_text, Message, Role};
