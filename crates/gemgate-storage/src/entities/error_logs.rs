use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "error_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub trace_id: String,
    pub at: OffsetDateTime,
    pub key_id: Option<i64>,
    pub masked_key: Option<String>,
    pub model: String,
    pub status: Option<i32>,
    pub error_type: String,
    pub message: String,
    pub details: Option<Json>,
}

impl ActiveModelBehavior for ActiveModel {}
