//! Database migrations for the keyhub service.

pub use sea_orm_migration::prelude::*;

mod m2025_11_10_090000_create_keys;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m2025_11_10_090000_create_keys::Migration)]
    }
}
