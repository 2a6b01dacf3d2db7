use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ClaimStatus::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(ClaimStatus::Namespace).string().not_null())
                    .col(ColumnDef::new(ClaimStatus::Name).string().not_null())
                    .col(ColumnDef::new(ClaimStatus::Phase).string().not_null())
                    .col(ColumnDef::new(ClaimStatus::ActiveUsername).string().null())
                    .col(
                        ColumnDef::new(ClaimStatus::CredentialVersion)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(ClaimStatus::LastRotatedAt).string().null())
                    .col(ColumnDef::new(ClaimStatus::LastAction).string().null())
                    .col(ColumnDef::new(ClaimStatus::LastError).string().null())
                    .col(ColumnDef::new(ClaimStatus::ErrorCategory).string().null())
                    .col(
                        ColumnDef::new(ClaimStatus::ConsecutiveFailures)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(ClaimStatus::UpdatedAt).string().not_null())
                    .primary_key(
                        Index::create()
                            .col(ClaimStatus::Namespace)
                            .col(ClaimStatus::Name),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_claim_status_phase")
                    .table(ClaimStatus::Table)
                    .col(ClaimStatus::Phase)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ClaimStatus::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum ClaimStatus {
    Table,
    Namespace,
    Name,
    Phase,
    ActiveUsername,
    CredentialVersion,
    LastRotatedAt,
    LastAction,
    LastError,
    ErrorCategory,
    ConsecutiveFailures,
    UpdatedAt,
}
