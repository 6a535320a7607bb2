use async_trait::async_trait;
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveValue, ColumnTrait, Database, DatabaseConnection, DbErr, QueryFilter, Schema};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use chatgate_core::{QuotaStore, RemoteQuota};
use chatgate_protocol::{GatewayError, Message};

use crate::entities;

#[derive(Clone)]
pub struct ChatStorage {
    db: DatabaseConnection,
    default_daily_limit: i64,
}

impl ChatStorage {
    pub async fn connect(database_url: &str, default_daily_limit: i64) -> Result<Self, DbErr> {
        let db = Database::connect(database_url).await?;
        Ok(Self { db, default_daily_limit })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub async fn sync(&self) -> Result<(), DbErr> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::Conversations)
            .register(entities::Messages)
            .register(entities::UsageCounters)
            .sync(&self.db)
            .await
    }

    /// Upserts the conversation row. `updated_at` only moves forward, so a
    /// late write cannot roll the timestamp back.
    pub async fn touch_conversation(
        &self,
        conversation_id: Uuid,
        user_id: Option<i64>,
        at: OffsetDateTime,
    ) -> Result<(), DbErr> {
        let existing = entities::Conversations::find_by_id(conversation_id)
            .one(&self.db)
            .await?;
        match existing {
            Some(row) if row.updated_at < at => {
                let mut active: entities::conversations::ActiveModel = row.into();
                active.updated_at = ActiveValue::Set(at);
                active.update(&self.db).await?;
                Ok(())
            }
            Some(_) => Ok(()),
            None => {
                let active = entities::conversations::ActiveModel {
                    id: ActiveValue::Set(conversation_id),
                    user_id: ActiveValue::Set(user_id),
                    created_at: ActiveValue::Set(at),
                    updated_at: ActiveValue::Set(at),
                };
                active.insert(&self.db).await?;
                Ok(())
            }
        }
    }

    /// Idempotent keyed by conversation + ordinal; a retried write cannot
    /// duplicate a message.
    pub async fn insert_message(
        &self,
        conversation_id: Uuid,
        ordinal: i32,
        message: &Message,
    ) -> Result<(), DbErr> {
        use entities::messages::Column;

        let active = entities::messages::ActiveModel {
            id: ActiveValue::Set(message.id),
            conversation_id: ActiveValue::Set(conversation_id),
            ordinal: ActiveValue::Set(ordinal),
            role: ActiveValue::Set(message.role.as_str().to_string()),
            content: ActiveValue::Set(message.content.clone()),
            model: ActiveValue::Set(message.model.clone()),
            created_at: ActiveValue::Set(message.created_at),
        };
        let insert = entities::Messages::insert(active).on_conflict(
            OnConflict::columns([Column::ConversationId, Column::Ordinal])
                .do_nothing()
                .to_owned(),
        );
        match insert.exec(&self.db).await {
            Ok(_) => Ok(()),
            Err(DbErr::RecordNotInserted) => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub async fn fetch_counter(&self, user_id: i64, day: Date) -> Result<RemoteQuota, DbErr> {
        use entities::usage_counters::Column;

        let row = entities::UsageCounters::find()
            .filter(Column::UserId.eq(user_id))
            .filter(Column::Day.eq(day))
            .one(&self.db)
            .await?;
        Ok(match row {
            Some(row) => RemoteQuota {
                count: row.count.max(0) as u32,
                limit: row.limit_override.unwrap_or(self.default_daily_limit).max(0) as u32,
                tier: row.tier,
            },
            None => RemoteQuota {
                count: 0,
                limit: self.default_daily_limit.max(0) as u32,
                tier: "free".to_string(),
            },
        })
    }

    pub async fn increment_counter(&self, user_id: i64, day: Date) -> Result<(), DbErr> {
        use entities::usage_counters::Column;

        let row = entities::UsageCounters::find()
            .filter(Column::UserId.eq(user_id))
            .filter(Column::Day.eq(day))
            .one(&self.db)
            .await?;
        match row {
            Some(row) => {
                let count = row.count;
                let mut active: entities::usage_counters::ActiveModel = row.into();
                active.count = ActiveValue::Set(count + 1);
                active.update(&self.db).await?;
            }
            None => {
                let active = entities::usage_counters::ActiveModel {
                    id: ActiveValue::NotSet,
                    user_id: ActiveValue::Set(user_id),
                    day: ActiveValue::Set(day),
                    count: ActiveValue::Set(1),
                    limit_override: ActiveValue::Set(None),
                    tier: ActiveValue::Set("free".to_string()),
                };
                active.insert(&self.db).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl QuotaStore for ChatStorage {
    async fn fetch(&self, user_id: i64) -> Result<RemoteQuota, GatewayError> {
        let day = OffsetDateTime::now_utc().date();
        self.fetch_counter(user_id, day)
            .await
            .map_err(|err| GatewayError::UpstreamUnavailable(err.to_string()))
    }

    async fn increment(&self, user_id: i64) -> Result<(), GatewayError> {
        let day = OffsetDateTime::now_utc().date();
        self.increment_counter(user_id, day)
            .await
            .map_err(|err| GatewayError::UpstreamUnavailable(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    async fn storage() -> ChatStorage {
        let storage = ChatStorage::connect("sqlite::memory:", 10).await.unwrap();
        storage.sync().await.unwrap();
        storage
    }

    #[tokio::test]
    async fn duplicate_ordinal_write_is_idempotent() {
        let storage = storage().await;
        let conversation = Uuid::new_v4();
        let at = datetime!(2024-03-10 12:00:00 UTC);
        storage.touch_conversation(conversation, Some(1), at).await.unwrap();

        let first = Message::user("hello");
        let retry = Message::user("hello again");
        storage.insert_message(conversation, 0, &first).await.unwrap();
        storage.insert_message(conversation, 0, &retry).await.unwrap();

        let rows = entities::Messages::find().all(storage.connection()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content, "hello");
    }

    #[tokio::test]
    async fn updated_at_is_monotonic() {
        let storage = storage().await;
        let conversation = Uuid::new_v4();
        let later = datetime!(2024-03-10 13:00:00 UTC);
        let earlier = datetime!(2024-03-10 12:00:00 UTC);
        storage.touch_conversation(conversation, None, later).await.unwrap();
        storage.touch_conversation(conversation, None, earlier).await.unwrap();

        let row = entities::Conversations::find_by_id(conversation)
            .one(storage.connection())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.updated_at, later);
    }

    #[tokio::test]
    async fn counters_accumulate_per_day() {
        let storage = storage().await;
        let day = date!(2024 - 03 - 10);

        assert_eq!(storage.fetch_counter(7, day).await.unwrap().count, 0);
        storage.increment_counter(7, day).await.unwrap();
        storage.increment_counter(7, day).await.unwrap();
        let quota = storage.fetch_counter(7, day).await.unwrap();
        assert_eq!(quota.count, 2);
        assert_eq!(quota.limit, 10);

        // A different day starts from zero.
        assert_eq!(storage.fetch_counter(7, date!(2024 - 03 - 11)).await.unwrap().count, 0);
    }
}
