use super::{
    Backend, config_error, decode_cell, describe_columns, fetch_statements, parse_key_values,
    parse_port, undescribed,
};
use crate::normalize::RawStatement;
use serde_json::Value;
use sqlx::ConnectOptions;
use sqlx::Connection as _;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlQueryResult, MySqlRow};
use std::str::FromStr;

pub struct Driver;

impl Backend for Driver {
    type Conn = MySqlConnection;

    async fn connect(dsn: &str) -> Result<MySqlConnection, sqlx::Error> {
        let options = connect_options(dsn)?;
        options.connect().await
    }

    async fn execute(
        conn: &mut MySqlConnection,
        sql: &str,
        describe_empty: bool,
    ) -> Result<Vec<RawStatement>, sqlx::Error> {
        let mut statements =
            fetch_statements(&mut *conn, sql, cell, MySqlQueryResult::rows_affected).await?;
        if describe_empty {
            for (index, text) in undescribed(sql, &statements) {
                if let Some(columns) = describe_columns(&mut *conn, text).await {
                    statements[index].columns = Some(columns);
                }
            }
        }
        Ok(statements)
    }

    async fn close(conn: MySqlConnection) -> Result<(), sqlx::Error> {
        conn.close().await
    }
}

/// `mysql://` URLs, or the `Server=..;Database=..;Uid=..;Pwd=..` form.
pub(crate) fn connect_options(dsn: &str) -> Result<MySqlConnectOptions, sqlx::Error> {
    let dsn = dsn.trim();
    if dsn.contains("://") {
        return MySqlConnectOptions::from_str(dsn);
    }
    let pairs = parse_key_values(dsn)
        .ok_or_else(|| config_error(format!("unrecognised MySQL connection string `{dsn}`")))?;

    let mut options = MySqlConnectOptions::new();
    for (key, value) in pairs {
        match key.as_str() {
            "server" | "host" | "data source" | "datasource" | "address" => {
                options = options.host(&value)
            }
            "port" => options = options.port(parse_port(&value)?),
            "database" | "initial catalog" => options = options.database(&value),
            "uid" | "user id" | "userid" | "user" | "username" => {
                options = options.username(&value)
            }
            "pwd" | "password" => options = options.password(&value),
            "charset" | "character set" => options = options.charset(&value),
            other => tracing::debug!(key = other, "ignoring MySQL connection string key"),
        }
    }
    Ok(options)
}

fn cell(row: &MySqlRow, index: usize) -> Value {
    decode_cell(row, index)
}
