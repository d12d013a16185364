use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "model_mappings")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub source_name: String,
    /// `openai`, `anthropic` or `gemini`.
    pub source_protocol: String,
    pub priority: i32,
    pub target_name: String,
    /// `generateContent` or `streamGenerateContent`.
    pub target_method: String,
    pub capabilities: Option<Json>,
    pub constraints: Option<Json>,
    pub created_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
