//! Migration to create the keys table.
//!
//! Each row is one unit of activation material with its lifecycle status and
//! the vendor correlation ids needed for compensating cancellation.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Keys::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Keys::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Keys::ProviderId).text().null())
                    .col(ColumnDef::new(Keys::ProductId).text().not_null())
                    .col(ColumnDef::new(Keys::ProviderProductId).text().null())
                    .col(ColumnDef::new(Keys::Value).text().not_null())
                    .col(
                        ColumnDef::new(Keys::Status)
                            .text()
                            .not_null()
                            .default("new"),
                    )
                    .col(ColumnDef::new(Keys::CustomerPhone).text().null())
                    .col(ColumnDef::new(Keys::OrderId).text().null())
                    .col(ColumnDef::new(Keys::ProviderOrderId).text().null())
                    .col(ColumnDef::new(Keys::ProviderTransactionId).text().null())
                    .col(
                        ColumnDef::new(Keys::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Keys::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_keys_value")
                    .table(Keys::Table)
                    .col(Keys::Value)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // One key per order; unassigned keys carry NULL, which never collides
        manager
            .create_index(
                Index::create()
                    .name("uq_keys_order_id")
                    .table(Keys::Table)
                    .col(Keys::OrderId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Pool lookups: oldest `new` key per product
        manager
            .create_index(
                Index::create()
                    .name("idx_keys_product_status_created")
                    .table(Keys::Table)
                    .col(Keys::ProductId)
                    .col(Keys::Status)
                    .col(Keys::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in [
            "idx_keys_product_status_created",
            "uq_keys_order_id",
            "uq_keys_value",
        ] {
            manager
                .drop_index(Index::drop().name(name).table(Keys::Table).to_owned())
                .await?;
        }

        manager
            .drop_table(Table::drop().table(Keys::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Keys {
    Table,
    Id,
    ProviderId,
    ProductId,
    ProviderProductId,
    Value,
    Status,
    CustomerPhone,
    OrderId,
    ProviderOrderId,
    ProviderTransactionId,
    CreatedAt,
    UpdatedAt,
}
