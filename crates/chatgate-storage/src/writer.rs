use tokio::sync::mpsc;
use tracing::{debug, warn};

use chatgate_core::WriteJob;

use crate::store::ChatStorage;

/// Spawns the background persistence task. The request path sends jobs and
/// never joins them; failures are logged, not surfaced, since the
/// user-visible exchange already succeeded.
pub fn spawn_writer(storage: ChatStorage) -> mpsc::UnboundedSender<WriteJob> {
    let (tx, mut rx) = mpsc::unbounded_channel::<WriteJob>();
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            let conversation_id = job.conversation_id;
            if let Err(err) = persist_exchange(&storage, job).await {
                warn!(%conversation_id, error = %err, "exchange write failed");
            }
        }
        debug!("persistence writer stopped");
    });
    tx
}

async fn persist_exchange(storage: &ChatStorage, job: WriteJob) -> Result<(), sea_orm::DbErr> {
    storage
        .touch_conversation(job.conversation_id, job.user_id, job.assistant_message.created_at)
        .await?;
    storage
        .insert_message(job.conversation_id, job.user_ordinal, &job.user_message)
        .await?;
    storage
        .insert_message(job.conversation_id, job.user_ordinal + 1, &job.assistant_message)
        .await?;
    Ok(())
}
