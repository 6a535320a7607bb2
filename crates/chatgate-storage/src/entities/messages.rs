use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "messages")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique_key = "conversation_ordinal")]
    pub conversation_id: Uuid,
    #[sea_orm(unique_key = "conversation_ordinal")]
    pub ordinal: i32,
    pub role: String,
    pub content: String,
    pub model: Option<String>,
    pub created_at: OffsetDateTime,
    #[sea_orm(belongs_to, from = "conversation_id", to = "id")]
    pub conversation: HasOne<super::conversations::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
