use super::{Backend, decode_cell, describe_columns, fetch_statements, undescribed};
use crate::normalize::RawStatement;
use serde_json::Value;
use sqlx::ConnectOptions;
use sqlx::Connection as _;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteQueryResult, SqliteRow};
use std::str::FromStr;

pub struct Driver;

impl Backend for Driver {
    type Conn = SqliteConnection;

    async fn connect(dsn: &str) -> Result<SqliteConnection, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(&normalize_url(dsn))?;
        options.connect().await
    }

    async fn execute(
        conn: &mut SqliteConnection,
        sql: &str,
        describe_empty: bool,
    ) -> Result<Vec<RawStatement>, sqlx::Error> {
        let before = total_changes(conn).await?;
        let mut statements =
            fetch_statements(&mut *conn, sql, cell, SqliteQueryResult::rows_affected).await?;
        let after = total_changes(conn).await?;
        settle_changes(&mut statements, after.saturating_sub(before));

        if describe_empty {
            for (index, text) in undescribed(sql, &statements) {
                if let Some(columns) = describe_columns(&mut *conn, text).await {
                    statements[index].columns = Some(columns);
                }
            }
        }
        Ok(statements)
    }

    async fn close(conn: SqliteConnection) -> Result<(), sqlx::Error> {
        conn.close().await
    }
}

// Accept plain paths and :memory: besides sqlite: URLs
fn normalize_url(dsn: &str) -> String {
    let dsn = dsn.trim();
    if dsn.starts_with("sqlite:") {
        dsn.to_string()
    } else if dsn == ":memory:" {
        "sqlite::memory:".to_string()
    } else {
        format!("sqlite:{}", dsn)
    }
}

async fn total_changes(conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
    let total: i64 = sqlx::query_scalar("select total_changes()")
        .fetch_one(conn)
        .await?;
    Ok(u64::try_from(total).unwrap_or_default())
}

// SQLite reports its last DML count for every statement, DDL and selects
// included, so per-statement counts are replaced by the connection's own
// change total for the whole text. It is booked on the last statement that
// returned no rows.
fn settle_changes(statements: &mut [RawStatement], changed: u64) {
    for statement in statements.iter_mut() {
        statement.rows_affected = 0;
    }
    if let Some(last) = statements.iter_mut().rev().find(|s| !s.produced_rows()) {
        last.rows_affected = changed;
    }
}

// SQLite values carry their storage class, so the type name is per value.
fn cell(row: &SqliteRow, index: usize) -> Value {
    decode_cell(row, index)
}
