use super::{
    Backend, config_error, decode_cell, describe_columns, fetch_statements, parse_key_values,
    parse_port, undescribed,
};
use crate::normalize::RawStatement;
use serde_json::Value;
use sqlx::ConnectOptions;
use sqlx::Connection as _;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgQueryResult, PgRow};
use std::str::FromStr;

pub struct Driver;

impl Backend for Driver {
    type Conn = PgConnection;

    async fn connect(dsn: &str) -> Result<PgConnection, sqlx::Error> {
        let options = connect_options(dsn)?;
        options.connect().await
    }

    async fn execute(
        conn: &mut PgConnection,
        sql: &str,
        describe_empty: bool,
    ) -> Result<Vec<RawStatement>, sqlx::Error> {
        let mut statements =
            fetch_statements(&mut *conn, sql, cell, PgQueryResult::rows_affected).await?;
        if describe_empty {
            for (index, text) in undescribed(sql, &statements) {
                if let Some(columns) = describe_columns(&mut *conn, text).await {
                    statements[index].columns = Some(columns);
                }
            }
        }
        Ok(statements)
    }

    async fn close(conn: PgConnection) -> Result<(), sqlx::Error> {
        conn.close().await
    }
}

/// `postgres://` URLs, or the `Host=..;Database=..;Username=..;Password=..` form.
pub(crate) fn connect_options(dsn: &str) -> Result<PgConnectOptions, sqlx::Error> {
    let dsn = dsn.trim();
    if dsn.contains("://") {
        return PgConnectOptions::from_str(dsn);
    }
    let pairs = parse_key_values(dsn).ok_or_else(|| {
        config_error(format!("unrecognised PostgreSQL connection string `{dsn}`"))
    })?;

    let mut options = PgConnectOptions::new();
    for (key, value) in pairs {
        match key.as_str() {
            "host" | "server" | "data source" | "datasource" => options = options.host(&value),
            "port" => options = options.port(parse_port(&value)?),
            "database" | "initial catalog" => options = options.database(&value),
            "username" | "user id" | "userid" | "user" | "uid" => {
                options = options.username(&value)
            }
            "password" | "pwd" => options = options.password(&value),
            "application name" | "application_name" => options = options.application_name(&value),
            other => tracing::debug!(key = other, "ignoring PostgreSQL connection string key"),
        }
    }
    Ok(options)
}

// Raw SQL runs over the simple query protocol, so every value arrives as text
// and decodes by the column's declared type.
fn cell(row: &PgRow, index: usize) -> Value {
    decode_cell(row, index)
}
