use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "request_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub trace_id: String,
    pub at: OffsetDateTime,
    pub key_id: i64,
    pub masked_key: String,
    pub model: String,
    pub method: String,
    pub status: Option<i32>,
    pub success: bool,
    pub latency_ms: i64,
    pub attempt: i32,
}

impl ActiveModelBehavior for ActiveModel {}
