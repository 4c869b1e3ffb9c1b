use std::env::{self, VarError};

use rearch::{CData, CapsuleHandle, Container};
use sea_orm::{ConnectOptions, Database, DbConn};
use tracing::{info, instrument, warn};

use crate::orm::ensure_schema;

/// Builds the [`Container`] shared by the binaries: reads the configuration,
/// opens the database pool and makes sure the schema exists.
///
/// The pool lives as long as the container; close it through
/// [`db_conn_capsule`] on shutdown.
///
/// # Errors
/// Will return [`Err`] if the connection to the database or the schema setup fails.
#[instrument]
pub async fn init_container() -> anyhow::Result<Container> {
    info!("Initializing container");
    let container = Container::new();

    let (db_connection_options, set_db_conn) =
        container.read((db_connection_options_capsule, db_conn_init_action));

    info!("Connecting to database");
    let db = Database::connect(db_connection_options).await?;
    ensure_schema(&db).await?;
    set_db_conn(db);

    info!("Container initialized");
    Ok(container)
}

/// # Panics
/// Panics when the environment variable holds invalid unicode.
fn read_env_var(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => Some(value),
        Err(VarError::NotPresent) => None,
        Err(VarError::NotUnicode(actual)) => {
            panic!("{name} environment variable is invalid: {}", actual.display());
        }
    }
}

/// # Panics
/// Panics when `DB_URL` is not set, or either variable is invalid.
#[must_use]
pub fn db_connection_options_capsule(_: CapsuleHandle) -> ConnectOptions {
    const DB_URL: &str = "DB_URL";
    const DB_MAX_CONNECTIONS: &str = "DB_MAX_CONNECTIONS";

    let mut options =
        ConnectOptions::new(read_env_var(DB_URL).unwrap_or_else(|| panic!("{DB_URL} is not set")));

    if let Some(max_connections) = read_env_var(DB_MAX_CONNECTIONS) {
        let max_connections = max_connections
            .parse::<u32>()
            .ok()
            .filter(|max| *max > 0)
            .unwrap_or_else(|| {
                panic!("{DB_MAX_CONNECTIONS} must be a positive integer, got {max_connections}")
            });
        info!(max_connections, "{DB_MAX_CONNECTIONS} environment variable set");
        options.max_connections(max_connections);
    }

    options
}

fn db_conn_manager(
    CapsuleHandle { register, .. }: CapsuleHandle,
) -> (Option<DbConn>, impl use<> + CData + Fn(Option<DbConn>)) {
    register.register(rearch_effects::state::<rearch_effects::Cloned<_>>(None))
}

pub fn db_conn_init_action(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> impl use<> + CData + Fn(DbConn) {
    let set_db_conn = get.as_ref(db_conn_manager).1.clone();
    move |db| set_db_conn(Some(db))
}

/// # Panics
/// Panics when the [`DbConn`] was not set via [`db_conn_init_action`].
pub fn db_conn_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> DbConn {
    let db_conn = get.as_ref(db_conn_manager).0.clone();
    db_conn.expect("DbConn should've been set via db_conn_init_action!")
}

/// # Panics
/// Panics when environment variable is invalid.
pub fn addr_capsule(_: CapsuleHandle) -> String {
    const ENV_VAR_NAME: &str = "ADDR";
    const DEFAULT_ADDR: &str = "127.0.0.1:0";

    read_env_var(ENV_VAR_NAME).map_or_else(
        || {
            warn!(
                addr = DEFAULT_ADDR,
                "{ENV_VAR_NAME} environment variable not set; defaulting to {DEFAULT_ADDR}"
            );
            DEFAULT_ADDR.to_owned()
        },
        |addr| {
            info!(addr, "{ENV_VAR_NAME} environment variable set");
            addr
        },
    )
}

/// Where the redirect path sends visitors whose link is unknown, expired or broken.
///
/// # Panics
/// Panics when environment variable is invalid.
pub fn error_page_url_capsule(_: CapsuleHandle) -> String {
    const ENV_VAR_NAME: &str = "ERROR_PAGE_URL";
    const DEFAULT_ERROR_PAGE_URL: &str = "/errorPage";

    read_env_var(ENV_VAR_NAME).map_or_else(
        || DEFAULT_ERROR_PAGE_URL.to_owned(),
        |error_page_url| {
            info!(error_page_url, "{ENV_VAR_NAME} environment variable set");
            error_page_url
        },
    )
}
