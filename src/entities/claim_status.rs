use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "claim_status")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub namespace: String,

    #[sea_orm(primary_key, auto_increment = false)]
    pub name: String,

    pub phase: String,

    pub active_username: Option<String>,

    pub credential_version: i64,

    /// RFC 3339
    pub last_rotated_at: Option<String>,

    pub last_action: Option<String>,

    pub last_error: Option<String>,

    pub error_category: Option<String>,

    pub consecutive_failures: i32,

    pub updated_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
