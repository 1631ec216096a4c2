//! Result normalizer: turns driver output into the two reply shapes callers
//! understand. Everything here is pure computation over already-fetched data.

use crate::command::{CommandKind, Handle};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// What one statement produced on the backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawStatement {
    /// Column names; `Some` when the statement returned a result set, even an
    /// empty one.
    pub columns: Option<Vec<String>>,
    pub rows: Vec<Vec<Value>>,
    pub rows_affected: u64,
}

impl RawStatement {
    pub fn with_columns(columns: Vec<String>) -> Self {
        Self {
            columns: Some(columns),
            ..Default::default()
        }
    }

    pub fn produced_rows(&self) -> bool {
        self.columns.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub meta: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Reply to a dispatched command.
///
/// Serializes untagged, matching what callers of the request map expect:
/// a bare integer for `open`, `null` for `close`, `{"rowcount": n}` for
/// `nonquery` and a list of `{"meta", "rows"}` objects for queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Handle(Handle),
    Closed,
    NonQuery { rowcount: u64 },
    Query(Vec<ResultSet>),
}

impl Reply {
    pub fn handle(&self) -> Option<Handle> {
        match self {
            Reply::Handle(h) => Some(*h),
            _ => None,
        }
    }

    pub fn rowcount(&self) -> Option<u64> {
        match self {
            Reply::NonQuery { rowcount } => Some(*rowcount),
            _ => None,
        }
    }

    pub fn result_sets(&self) -> Option<&[ResultSet]> {
        match self {
            Reply::Query(sets) => Some(sets),
            _ => None,
        }
    }

    pub fn into_result_sets(self) -> Option<Vec<ResultSet>> {
        match self {
            Reply::Query(sets) => Some(sets),
            _ => None,
        }
    }
}

/// Shape raw statements into the reply for `kind`.
///
/// Non-queries sum the affected rows of statements that returned no rows.
/// Queries keep one result set per statement with columns and fall back to
/// a single empty set when no statement had any.
pub fn normalize(kind: CommandKind, statements: Vec<RawStatement>) -> Reply {
    if kind == CommandKind::NonQuery {
        let rowcount = statements
            .iter()
            .filter(|s| !s.produced_rows())
            .map(|s| s.rows_affected)
            .sum();
        return Reply::NonQuery { rowcount };
    }

    let mut sets: Vec<ResultSet> = statements
        .into_iter()
        .filter_map(|s| {
            s.columns.map(|meta| ResultSet {
                meta,
                rows: s.rows,
            })
        })
        .collect();
    if sets.is_empty() {
        sets.push(ResultSet::default());
    }
    Reply::Query(sets)
}

/// How a backend type name is decoded into a JSON value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Null,
    Bool,
    Integer,
    Float,
    Decimal,
    Json,
    Bytes,
    Text,
}

impl CellKind {
    pub fn of(type_name: &str) -> Self {
        let upper = type_name.trim().to_ascii_uppercase();
        let base = upper.strip_suffix(" UNSIGNED").unwrap_or(&upper);
        let base = base.split('(').next().unwrap_or(base).trim();
        match base {
            "NULL" => CellKind::Null,
            "BOOL" | "BOOLEAN" => CellKind::Bool,
            "INT" | "INTEGER" | "INT2" | "INT4" | "INT8" | "TINYINT" | "SMALLINT" | "MEDIUMINT"
            | "BIGINT" | "SMALLSERIAL" | "SERIAL" | "BIGSERIAL" | "YEAR" | "OID" => {
                CellKind::Integer
            }
            "REAL" | "FLOAT" | "FLOAT4" | "FLOAT8" | "DOUBLE" | "DOUBLE PRECISION" => {
                CellKind::Float
            }
            "NUMERIC" | "DECIMAL" => CellKind::Decimal,
            "JSON" | "JSONB" => CellKind::Json,
            "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" | "BYTEA" => {
                CellKind::Bytes
            }
            _ => CellKind::Text,
        }
    }
}

/// Decimal text as a JSON number when it fits, otherwise kept verbatim.
pub(crate) fn decimal_value(text: &str) -> Value {
    let text = text.trim();
    if let Ok(int) = text.parse::<i64>() {
        return Value::from(int);
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(text.to_string()))
}
