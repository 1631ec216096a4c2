pub mod mysql;
pub mod postgres;
pub mod sqlite;

use crate::normalize::{CellKind, RawStatement};
use base64::Engine as _;
use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::mysql::MySqlConnection;
use sqlx::postgres::PgConnection;
use sqlx::sqlite::SqliteConnection;
use sqlx::{Column, ColumnIndex, Database, Decode, Either, Executor, Row, TypeInfo, ValueRef};
use std::future::Future;
use std::str::FromStr;
use thiserror::Error;

/// Backend dialect selected by the request's `driver` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum DriverKind {
    Sqlite,
    MySql,
    Postgres,
}

#[derive(Debug, Error)]
#[error("unknown driver `{0}` (expected sqlite, mysql or postgres)")]
pub struct UnknownDriver(pub String);

impl DriverKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DriverKind::Sqlite => "sqlite",
            DriverKind::MySql => "mysql",
            DriverKind::Postgres => "postgres",
        }
    }
}

impl FromStr for DriverKind {
    type Err = UnknownDriver;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(DriverKind::Sqlite),
            "mysql" | "mariadb" => Ok(DriverKind::MySql),
            "postgres" | "postgresql" | "pg" => Ok(DriverKind::Postgres),
            _ => Err(UnknownDriver(s.to_string())),
        }
    }
}

impl TryFrom<String> for DriverKind {
    type Error = UnknownDriver;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One backend: how to connect, run raw SQL and disconnect.
pub trait Backend: Send + Sync + 'static {
    type Conn: Send + 'static;

    fn connect(dsn: &str) -> impl Future<Output = Result<Self::Conn, sqlx::Error>> + Send;

    /// Run `sql`, which may hold several statements, and report each one.
    /// With `describe_empty`, row-returning statements that returned no rows
    /// still get their column names.
    fn execute(
        conn: &mut Self::Conn,
        sql: &str,
        describe_empty: bool,
    ) -> impl Future<Output = Result<Vec<RawStatement>, sqlx::Error>> + Send;

    fn close(conn: Self::Conn) -> impl Future<Output = Result<(), sqlx::Error>> + Send;
}

/// A live connection of any supported backend.
pub enum Connection {
    Sqlite(SqliteConnection),
    MySql(MySqlConnection),
    Postgres(PgConnection),
}

impl Connection {
    pub async fn open(kind: DriverKind, dsn: &str) -> Result<Self, sqlx::Error> {
        let conn = match kind {
            DriverKind::Sqlite => Connection::Sqlite(sqlite::Driver::connect(dsn).await?),
            DriverKind::MySql => Connection::MySql(mysql::Driver::connect(dsn).await?),
            DriverKind::Postgres => Connection::Postgres(postgres::Driver::connect(dsn).await?),
        };
        Ok(conn)
    }

    pub fn kind(&self) -> DriverKind {
        match self {
            Connection::Sqlite(_) => DriverKind::Sqlite,
            Connection::MySql(_) => DriverKind::MySql,
            Connection::Postgres(_) => DriverKind::Postgres,
        }
    }

    pub async fn execute(
        &mut self,
        sql: &str,
        describe_empty: bool,
    ) -> Result<Vec<RawStatement>, sqlx::Error> {
        match self {
            Connection::Sqlite(conn) => sqlite::Driver::execute(conn, sql, describe_empty).await,
            Connection::MySql(conn) => mysql::Driver::execute(conn, sql, describe_empty).await,
            Connection::Postgres(conn) => {
                postgres::Driver::execute(conn, sql, describe_empty).await
            }
        }
    }

    pub async fn close(self) -> Result<(), sqlx::Error> {
        match self {
            Connection::Sqlite(conn) => sqlite::Driver::close(conn).await,
            Connection::MySql(conn) => mysql::Driver::close(conn).await,
            Connection::Postgres(conn) => postgres::Driver::close(conn).await,
        }
    }
}

/// Send `sql` as raw (unprepared) text and split the `fetch_many` stream into
/// statements: rows accumulate until the backend reports the statement done.
pub(crate) async fn fetch_statements<'c, DB, E>(
    executor: E,
    sql: &'c str,
    cell: fn(&DB::Row, usize) -> Value,
    rows_affected: fn(&DB::QueryResult) -> u64,
) -> Result<Vec<RawStatement>, sqlx::Error>
where
    DB: Database,
    E: Executor<'c, Database = DB>,
{
    let mut stream = executor.fetch_many(sqlx::raw_sql(sql));
    let mut statements = Vec::new();
    let mut pending: Option<RawStatement> = None;

    while let Some(step) = stream.try_next().await? {
        match step {
            Either::Left(done) => {
                let mut statement = pending.take().unwrap_or_default();
                statement.rows_affected = rows_affected(&done);
                statements.push(statement);
            }
            Either::Right(row) => {
                let statement = pending.get_or_insert_with(|| {
                    RawStatement::with_columns(
                        row.columns().iter().map(|c| c.name().to_string()).collect(),
                    )
                });
                statement
                    .rows
                    .push((0..row.len()).map(|i| cell(&row, i)).collect());
            }
        }
    }
    // rows with no completion marker still form a statement
    statements.extend(pending);
    Ok(statements)
}

/// Column names of a single statement, from the backend's own description.
/// `None` when the statement returns no result set or cannot be described.
pub(crate) async fn describe_columns<'c, DB, E>(
    executor: E,
    statement: &'c str,
) -> Option<Vec<String>>
where
    DB: Database,
    E: Executor<'c, Database = DB>,
{
    match executor.describe(statement).await {
        Ok(described) => {
            let columns: Vec<String> = described
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect();
            (!columns.is_empty()).then_some(columns)
        }
        Err(e) => {
            tracing::debug!(error = %e, "statement could not be described");
            None
        }
    }
}

/// Statements of `sql` that returned no rows but may still carry a result
/// set, paired with their index in `statements`. Empty when the local split
/// does not line up with what the backend executed.
pub(crate) fn undescribed<'s>(sql: &'s str, statements: &[RawStatement]) -> Vec<(usize, &'s str)> {
    let texts = split_statements(sql);
    if texts.len() != statements.len() {
        tracing::debug!(
            local = texts.len(),
            executed = statements.len(),
            "statement split does not match the backend; skipping describe"
        );
        return Vec::new();
    }
    texts
        .into_iter()
        .enumerate()
        .filter(|(i, text)| !statements[*i].produced_rows() && returns_rows(text))
        .collect()
}

const ROW_KEYWORDS: &[&str] = &[
    "select", "with", "values", "table", "show", "pragma", "explain", "describe", "desc",
];

fn returns_rows(statement: &str) -> bool {
    let word: String = skip_comments(statement)
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    ROW_KEYWORDS.iter().any(|k| word.eq_ignore_ascii_case(k))
}

/// `text` with leading whitespace and comments removed.
fn skip_comments(mut text: &str) -> &str {
    loop {
        text = text.trim_start();
        if let Some(rest) = text.strip_prefix("--") {
            text = rest.find('\n').map_or("", |i| &rest[i + 1..]);
        } else if let Some(rest) = text.strip_prefix("/*") {
            text = rest.find("*/").map_or("", |i| &rest[i + 2..]);
        } else {
            return text;
        }
    }
}

/// Split `sql` on `;` outside quotes, comments and `$tag$` bodies. Pieces
/// holding only whitespace or comments are dropped.
pub(crate) fn split_statements(sql: &str) -> Vec<&str> {
    let bytes = sql.as_bytes();
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == quote {
                        // doubled quote is an escaped quote
                        if bytes.get(i + 1) == Some(&quote) {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = sql[i..].find('\n').map_or(bytes.len(), |n| i + n + 1);
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = sql[i + 2..].find("*/").map_or(bytes.len(), |n| i + 2 + n + 2);
            }
            b'$' => match dollar_tag(&sql[i..]) {
                Some(tag) => {
                    let body = i + tag.len();
                    i = sql[body..].find(tag).map_or(bytes.len(), |n| body + n + tag.len());
                }
                None => i += 1,
            },
            b';' => {
                pieces.push(&sql[start..=i]);
                i += 1;
                start = i;
            }
            _ => i += 1,
        }
    }
    pieces.push(&sql[start.min(sql.len())..]);

    pieces
        .into_iter()
        .map(str::trim)
        .filter(|piece| !skip_comments(piece).trim_start_matches(';').trim().is_empty())
        .collect()
}

// `$$` or `$name$` at the start of `text`.
fn dollar_tag(text: &str) -> Option<&str> {
    let rest = &text[1..];
    let end = rest.find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))?;
    (rest[end..].starts_with('$') && !rest[..end].starts_with(|c: char| c.is_ascii_digit()))
        .then(|| &text[..end + 2])
}

/// Decode one cell by the backend's own type for the value.
pub(crate) fn decode_cell<'r, R>(row: &'r R, index: usize) -> Value
where
    R: Row,
    usize: ColumnIndex<R>,
    bool: Decode<'r, R::Database>,
    i64: Decode<'r, R::Database>,
    f64: Decode<'r, R::Database>,
    String: Decode<'r, R::Database>,
    Vec<u8>: Decode<'r, R::Database>,
{
    let kind = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => CellKind::of(raw.type_info().name()),
        Err(_) => return Value::Null,
    };

    match kind {
        CellKind::Null => Value::Null,
        CellKind::Bool => row
            .try_get_unchecked::<bool, _>(index)
            .map(Value::Bool)
            .unwrap_or_else(|_| text_cell(row, index)),
        CellKind::Integer => row
            .try_get_unchecked::<i64, _>(index)
            .map(Value::from)
            .unwrap_or_else(|_| text_cell(row, index)),
        CellKind::Float => row
            .try_get_unchecked::<f64, _>(index)
            .map(Value::from)
            .unwrap_or_else(|_| text_cell(row, index)),
        CellKind::Decimal => match row.try_get_unchecked::<String, _>(index) {
            Ok(text) => crate::normalize::decimal_value(&text),
            Err(_) => Value::Null,
        },
        CellKind::Json => match row.try_get_unchecked::<String, _>(index) {
            Ok(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
            Err(_) => Value::Null,
        },
        CellKind::Bytes => row
            .try_get_unchecked::<Vec<u8>, _>(index)
            .map(|bytes| Value::String(base64::engine::general_purpose::STANDARD.encode(bytes)))
            .unwrap_or(Value::Null),
        CellKind::Text => text_cell(row, index),
    }
}

fn text_cell<'r, R>(row: &'r R, index: usize) -> Value
where
    R: Row,
    usize: ColumnIndex<R>,
    String: Decode<'r, R::Database>,
{
    row.try_get_unchecked::<String, _>(index)
        .map(Value::String)
        .unwrap_or(Value::Null)
}

/// Split an ADO-style `Key=Value;Key=Value` connection string into
/// lowercased keys and trimmed values. `None` if any segment lacks `=`.
pub(crate) fn parse_key_values(dsn: &str) -> Option<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    for segment in dsn.split(';') {
        if segment.trim().is_empty() {
            continue;
        }
        let (key, value) = segment.split_once('=')?;
        pairs.push((key.trim().to_ascii_lowercase(), value.trim().to_string()));
    }
    if pairs.is_empty() { None } else { Some(pairs) }
}

pub(crate) fn config_error(message: String) -> sqlx::Error {
    sqlx::Error::Configuration(message.into())
}

pub(crate) fn parse_port(value: &str) -> Result<u16, sqlx::Error> {
    value
        .parse()
        .map_err(|_| config_error(format!("invalid port `{value}` in connection string")))
}
