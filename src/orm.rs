use sea_orm::{ConnectionTrait, DbConn, DbErr};
use tracing::{info, instrument};

#[allow(warnings, clippy::all)]
pub(crate) mod url_record {
    use sea_orm::entity::prelude::*;

    #[sea_orm::model]
    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "urls")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        #[sea_orm(column_type = "Text")]
        pub original_url: String,
        #[sea_orm(column_type = "Text", unique)]
        pub short_code: String,
        pub expiry_date: TimeDateTimeWithTimeZone,
        pub clicks: i64,
    }

    impl ActiveModelBehavior for ActiveModel {}
}

const CREATE_URLS_TABLE: &str = "CREATE TABLE IF NOT EXISTS urls (
    id SERIAL PRIMARY KEY,
    original_url TEXT NOT NULL,
    short_code TEXT NOT NULL UNIQUE,
    expiry_date TIMESTAMPTZ NOT NULL,
    clicks BIGINT NOT NULL DEFAULT 0
)";

const CREATE_ORIGINAL_URL_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS urls_original_url_idx ON urls (original_url)";

/// Creates the `urls` table and its indexes when they are missing.
///
/// # Errors
/// Will return [`Err`] if any of the DDL statements fail.
#[instrument(skip(db))]
pub async fn ensure_schema(db: &DbConn) -> Result<(), DbErr> {
    db.execute_unprepared(CREATE_URLS_TABLE).await?;
    db.execute_unprepared(CREATE_ORIGINAL_URL_INDEX).await?;
    info!("Database schema is up to date");
    Ok(())
}
