use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "request_metrics")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Trace id of the request; re-recording the same id overwrites the row.
    #[sea_orm(unique)]
    pub request_id: String,
    pub model: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub started_at: OffsetDateTime,
    pub completed_at: OffsetDateTime,
    pub duration_ms: f64,
    pub status: String,
    pub error_message: Option<String>,
    pub token_index: Option<i64>,
    pub client_ip: Option<String>,
}

impl ActiveModelBehavior for ActiveModel {}
