#![allow(dead_code)]

use edgesql_engine::{Command, Dispatcher, DriverKind, Handle, Reply};
use serde_json::{Value, json};
use std::path::Path;
use tempfile::TempDir;

pub const SETUP_SQL: &str = include_str!("../fixtures/setup.sql");

/// A file-backed SQLite database that lives as long as the value.
pub struct TestDb {
    _dir: TempDir,
    pub url: String,
}

impl TestDb {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = sqlite_url(&dir.path().join("edge.db"));
        Self { _dir: dir, url }
    }
}

pub fn sqlite_url(path: &Path) -> String {
    format!("sqlite:{}?mode=rwc", path.display())
}

pub async fn open(dispatcher: &Dispatcher, url: &str) -> Handle {
    match dispatcher
        .dispatch(Command::open(DriverKind::Sqlite, url))
        .await
        .expect("open")
    {
        Reply::Handle(handle) => handle,
        other => panic!("open replied {other:?}"),
    }
}

/// Open a fresh database with the fixture tables loaded.
pub async fn open_with_fixture(dispatcher: &Dispatcher, db: &TestDb) -> Handle {
    let handle = open(dispatcher, &db.url).await;
    dispatcher
        .run_script(DriverKind::Sqlite, handle, SETUP_SQL)
        .await
        .expect("setup script");
    handle
}

pub fn request(cmd: Option<&str>, handle: Handle, source: &str) -> Value {
    let mut req = json!({
        "driver": "sqlite",
        "handler": handle.get(),
        "source": source,
    });
    if let Some(cmd) = cmd {
        req["cmd"] = json!(cmd);
    }
    req
}
