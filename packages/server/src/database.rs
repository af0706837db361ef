use std::time::Duration;

use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, EntityTrait, Schema,
};
use tracing::{info, warn};

use crate::config::DatabaseConfig;
use crate::entity::{file_record, storage_statistics};

pub async fn init_db(config: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(config.url.to_owned());

    // Set connection pool options
    opt.max_connections(pool_size(config))
        .min_connections(1)
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(8))
        .max_lifetime(Duration::from_secs(8))
        .sqlx_logging(false);

    let db = Database::connect(opt).await?;
    create_schema(&db).await?;

    Ok(db)
}

/// Connections to open for `config`.
///
/// SQLite admits one writer at a time: a transaction that read on one
/// connection fails with `SQLITE_BUSY` when it tries to write after another
/// connection committed. SQLite pools are therefore capped at one connection.
fn pool_size(config: &DatabaseConfig) -> u32 {
    if is_sqlite(&config.url) && config.max_connections > 1 {
        warn!(
            configured = config.max_connections,
            "SQLite database: limiting pool to a single connection"
        );
        return 1;
    }
    config.max_connections.max(1)
}

fn is_sqlite(url: &str) -> bool {
    url.starts_with("sqlite:")
}

/// Create every table and entity-declared index that does not exist yet.
pub async fn create_schema<C: ConnectionTrait>(db: &C) -> Result<(), DbErr> {
    create_entity(db, file_record::Entity).await?;
    create_entity(db, storage_statistics::Entity).await?;
    Ok(())
}

async fn create_entity<C, E>(db: &C, entity: E) -> Result<(), DbErr>
where
    C: ConnectionTrait,
    E: EntityTrait,
{
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut table = schema.create_table_from_entity(entity);
    table.if_not_exists();
    db.execute_raw(backend.build(&table)).await?;

    for mut index in schema.create_index_from_entity(entity) {
        index.if_not_exists();
        db.execute_raw(backend.build(&index)).await?;
    }

    info!(table = entity.table_name(), "Ensured table exists");
    Ok(())
}
