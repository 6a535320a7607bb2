use sea_orm::entity::prelude::*;
use time::Date;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "usage_counters")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "user_day")]
    pub user_id: i64,
    #[sea_orm(unique_key = "user_day")]
    pub day: Date,
    pub count: i64,
    pub limit_override: Option<i64>,
    pub tier: String,
}

impl ActiveModelBehavior for ActiveModel {}
