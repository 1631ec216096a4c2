//! Validated form of the loosely typed request map callers send.
//!
//! The wire map carries `cmd`, `driver`, `connectionString`, `handler`,
//! `source` and `timeout`. [`Command::from_config`] checks that the fields the
//! selected `cmd` needs are present and well formed, so the dispatcher only
//! ever sees complete commands.

use crate::drivers::DriverKind;
use crate::error::{EdgeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Opaque reference to a live backend connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(i32);

impl Handle {
    pub fn get(self) -> i32 {
        self.0
    }
}

impl From<i32> for Handle {
    fn from(id: i32) -> Self {
        Handle(id)
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Open,
    Close,
    NonQuery,
    Query,
}

impl CommandKind {
    /// Anything that is not `open`, `close` or `nonquery`, including a
    /// missing `cmd`, selects a query.
    pub fn from_cmd(cmd: Option<&Value>) -> Self {
        match cmd.and_then(Value::as_str) {
            Some(s) if s.eq_ignore_ascii_case("open") => CommandKind::Open,
            Some(s) if s.eq_ignore_ascii_case("close") => CommandKind::Close,
            Some(s) if s.eq_ignore_ascii_case("nonquery") => CommandKind::NonQuery,
            _ => CommandKind::Query,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Open => "open",
            CommandKind::Close => "close",
            CommandKind::NonQuery => "nonquery",
            CommandKind::Query => "query",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Open {
        driver: DriverKind,
        connection_string: String,
        timeout: Option<Duration>,
    },
    Close {
        driver: DriverKind,
        handle: Handle,
    },
    NonQuery {
        driver: DriverKind,
        handle: Handle,
        source: String,
    },
    Query {
        driver: DriverKind,
        handle: Handle,
        source: String,
    },
}

impl Command {
    pub fn open(driver: DriverKind, connection_string: impl Into<String>) -> Self {
        Command::Open {
            driver,
            connection_string: connection_string.into(),
            timeout: None,
        }
    }

    pub fn close(driver: DriverKind, handle: Handle) -> Self {
        Command::Close { driver, handle }
    }

    pub fn non_query(driver: DriverKind, handle: Handle, source: impl Into<String>) -> Self {
        Command::NonQuery {
            driver,
            handle,
            source: source.into(),
        }
    }

    pub fn query(driver: DriverKind, handle: Handle, source: impl Into<String>) -> Self {
        Command::Query {
            driver,
            handle,
            source: source.into(),
        }
    }

    /// Set the connect timeout of an `Open`; other commands are returned unchanged.
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        if let Command::Open { timeout, .. } = &mut self {
            *timeout = Some(limit);
        }
        self
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Open { .. } => CommandKind::Open,
            Command::Close { .. } => CommandKind::Close,
            Command::NonQuery { .. } => CommandKind::NonQuery,
            Command::Query { .. } => CommandKind::Query,
        }
    }

    pub fn driver(&self) -> DriverKind {
        match self {
            Command::Open { driver, .. }
            | Command::Close { driver, .. }
            | Command::NonQuery { driver, .. }
            | Command::Query { driver, .. } => *driver,
        }
    }

    pub fn handle(&self) -> Option<Handle> {
        match self {
            Command::Open { .. } => None,
            Command::Close { handle, .. }
            | Command::NonQuery { handle, .. }
            | Command::Query { handle, .. } => Some(*handle),
        }
    }

    /// Validate a request map into a command.
    pub fn from_config(config: &Value) -> Result<Self> {
        let map = config
            .as_object()
            .ok_or_else(|| EdgeError::validation("request must be a map"))?;
        let kind = CommandKind::from_cmd(map.get("cmd"));
        let driver = required_str(map, "driver", kind)?
            .parse::<DriverKind>()
            .map_err(|e| EdgeError::validation(e.to_string()))?;

        let command = match kind {
            CommandKind::Open => Command::Open {
                driver,
                connection_string: required_str(map, "connectionString", kind)?.to_string(),
                timeout: timeout_field(map)?,
            },
            CommandKind::Close => Command::Close {
                driver,
                handle: handle_field(map, kind)?,
            },
            CommandKind::NonQuery => Command::NonQuery {
                driver,
                handle: handle_field(map, kind)?,
                source: source_field(map, kind)?,
            },
            CommandKind::Query => Command::Query {
                driver,
                handle: handle_field(map, kind)?,
                source: source_field(map, kind)?,
            },
        };
        Ok(command)
    }
}

impl TryFrom<&Value> for Command {
    type Error = EdgeError;

    fn try_from(config: &Value) -> Result<Self> {
        Command::from_config(config)
    }
}

fn required_str<'m>(map: &'m Map<String, Value>, key: &str, kind: CommandKind) -> Result<&'m str> {
    match map.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.as_str()),
        Some(Value::String(_)) => Err(EdgeError::validation(format!(
            "`{key}` must not be empty for {}",
            kind.as_str()
        ))),
        Some(_) => Err(EdgeError::validation(format!("`{key}` must be a string"))),
        None => Err(EdgeError::validation(format!(
            "`{key}` is required for {}",
            kind.as_str()
        ))),
    }
}

fn handle_field(map: &Map<String, Value>, kind: CommandKind) -> Result<Handle> {
    let raw = map.get("handler").ok_or_else(|| {
        EdgeError::validation(format!("`handler` is required for {}", kind.as_str()))
    })?;
    raw.as_i64()
        .and_then(|id| i32::try_from(id).ok())
        .map(Handle)
        .ok_or_else(|| {
            EdgeError::validation(format!("`handler` must be an integer handle, got {raw}"))
        })
}

fn source_field(map: &Map<String, Value>, kind: CommandKind) -> Result<String> {
    required_str(map, "source", kind).map(str::to_string)
}

fn timeout_field(map: &Map<String, Value>) -> Result<Option<Duration>> {
    match map.get("timeout") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            let secs = n.as_f64().unwrap_or(f64::NAN);
            if !(secs.is_finite() && secs > 0.0) {
                return Err(EdgeError::validation(format!(
                    "`timeout` must be a positive number of seconds, got {n}"
                )));
            }
            Duration::try_from_secs_f64(secs)
                .map(Some)
                .map_err(|e| EdgeError::validation(format!("`timeout` out of range: {e}")))
        }
        Some(other) => Err(EdgeError::validation(format!(
            "`timeout` must be a number of seconds, got {other}"
        ))),
    }
}
