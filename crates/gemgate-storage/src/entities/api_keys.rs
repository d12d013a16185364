use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "api_keys")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "api_key_value")]
    pub key_value: String,
    pub enabled: bool,
    pub fail_count: i32,
    pub disabled_until: Option<OffsetDateTime>,
    pub last_used: Option<OffsetDateTime>,
    pub last_checked: Option<OffsetDateTime>,
    pub last_failed_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
