use uuid::Uuid;

use chatgate_protocol::Message;

/// One finished exchange queued for the persistence writer. Idempotent at
/// the storage layer, keyed by conversation and ordinal, so a retried write
/// cannot duplicate a message.
#[derive(Debug, Clone)]
pub struct WriteJob {
    pub conversation_id: Uuid,
    pub user_id: Option<i64>,
    pub user_ordinal: i32,
    pub user_message: Message,
    pub assistant_message: Message,
}
