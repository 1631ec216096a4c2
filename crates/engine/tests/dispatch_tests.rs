mod common;

use common::{SETUP_SQL, TestDb, open, open_with_fixture, request};
use edgesql_engine::{
    Command, Dispatcher, DriverKind, EdgeError, EngineConfig, ErrorKind, Handle, Reply,
};
use futures_util::future::join_all;
use serde_json::{Value, json};
use std::time::{Duration, Instant};

#[tokio::test]
async fn open_returns_distinct_handles() {
    let dispatcher = Dispatcher::default();
    let db = TestDb::new();

    let mut handles = Vec::new();
    for _ in 0..6 {
        handles.push(open(&dispatcher, &db.url).await);
    }
    let mut unique = handles.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), handles.len());
    assert_eq!(dispatcher.registry().len(), 6);
}

#[tokio::test]
async fn open_reply_is_a_bare_integer() {
    let dispatcher = Dispatcher::default();
    let reply = dispatcher
        .dispatch_config(&json!({
            "cmd": "open",
            "driver": "sqlite",
            "connectionString": ":memory:",
        }))
        .await
        .unwrap();
    assert!(serde_json::to_value(&reply).unwrap().is_i64());
}

#[tokio::test]
async fn closed_handle_is_rejected() {
    let dispatcher = Dispatcher::default();
    let db = TestDb::new();
    let handle = open(&dispatcher, &db.url).await;

    let reply = dispatcher
        .dispatch_config(&json!({"cmd": "close", "driver": "sqlite", "handler": handle.get()}))
        .await
        .unwrap();
    assert_eq!(reply, Reply::Closed);
    assert_eq!(serde_json::to_value(&reply).unwrap(), Value::Null);

    for cmd in [Some("nonquery"), None, Some("close")] {
        let err = dispatcher
            .dispatch_config(&request(cmd, handle, "select 1;"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Handle, "{cmd:?}");
    }
    assert!(dispatcher.registry().is_empty());
}

#[tokio::test]
async fn never_issued_handle_is_rejected() {
    let dispatcher = Dispatcher::default();
    let err = dispatcher
        .dispatch(Command::query(DriverKind::Sqlite, Handle::from(77), "select 1"))
        .await
        .unwrap_err();
    assert!(matches!(err, EdgeError::UnknownHandle(h) if h.get() == 77));
}

#[tokio::test]
async fn nonquery_reports_affected_rows() {
    let dispatcher = Dispatcher::default();
    let db = TestDb::new();
    let handle = open_with_fixture(&dispatcher, &db).await;

    let reply = dispatcher
        .dispatch_config(&request(Some("nonquery"), handle, "update sellerkind set rnd=rnd+1;"))
        .await
        .unwrap();
    assert_eq!(serde_json::to_value(&reply).unwrap(), json!({"rowcount": 20}));
}

#[tokio::test]
async fn earlier_changes_do_not_leak_into_later_rowcounts() {
    let dispatcher = Dispatcher::default();
    let db = TestDb::new();
    let handle = open_with_fixture(&dispatcher, &db).await;

    for (source, rowcount) in [
        ("update sellerkind set rnd=rnd+1;", 20),
        ("create table extra_t (x int);", 0),
        ("select * from customerkind where 1=0;", 0),
        ("insert into extra_t values (1), (2); create index extra_x on extra_t (x);", 2),
        ("drop index extra_x;", 0),
    ] {
        let reply = dispatcher
            .dispatch_config(&request(Some("nonquery"), handle, source))
            .await
            .unwrap();
        assert_eq!(reply, Reply::NonQuery { rowcount }, "{source}");
    }
}

#[tokio::test]
async fn query_without_cmd_returns_result_sets() {
    let dispatcher = Dispatcher::default();
    let db = TestDb::new();
    let handle = open_with_fixture(&dispatcher, &db).await;

    let reply = dispatcher
        .dispatch_config(&request(None, handle, "select * from customerkind;"))
        .await
        .unwrap();
    let sets = reply.result_sets().expect("query reply");
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].meta, vec!["idcustomerkind", "name", "rnd"]);
    assert_eq!(sets[0].rows.len(), 40);
    for (i, row) in sets[0].rows.iter().enumerate() {
        let id = (i * 3) as i64;
        assert_eq!(row[0], json!(id));
        assert_eq!(row[1], json!(format!("name{id}")));
        assert!(row[2].is_i64(), "rnd should stay an integer: {}", row[2]);
    }
}

#[tokio::test]
async fn empty_select_keeps_its_columns() {
    let dispatcher = Dispatcher::default();
    let db = TestDb::new();
    let handle = open_with_fixture(&dispatcher, &db).await;

    let reply = dispatcher
        .dispatch(Command::query(
            DriverKind::Sqlite,
            handle,
            "select * from customerkind where idcustomerkind < 0;",
        ))
        .await
        .unwrap();
    assert_eq!(
        serde_json::to_value(&reply).unwrap(),
        json!([{"meta": ["idcustomerkind", "name", "rnd"], "rows": []}])
    );
}

#[tokio::test]
async fn empty_select_keeps_its_place_among_result_sets() {
    let dispatcher = Dispatcher::default();
    let db = TestDb::new();
    let handle = open_with_fixture(&dispatcher, &db).await;

    let reply = dispatcher
        .dispatch_config(&request(
            None,
            handle,
            "select name from sellerkind where 1=0; select count(*) as n from customerkind;",
        ))
        .await
        .unwrap();
    assert_eq!(
        serde_json::to_value(&reply).unwrap(),
        json!([{"meta": ["name"], "rows": []}, {"meta": ["n"], "rows": [[40]]}])
    );
}

#[tokio::test]
async fn query_without_result_sets_yields_one_empty_set() {
    let dispatcher = Dispatcher::default();
    let handle = open(&dispatcher, ":memory:").await;

    let reply = dispatcher
        .dispatch(Command::query(
            DriverKind::Sqlite,
            handle,
            "create table x (a int); insert into x values (1);",
        ))
        .await
        .unwrap();
    assert_eq!(
        serde_json::to_value(&reply).unwrap(),
        json!([{"meta": [], "rows": []}])
    );
}

#[tokio::test]
async fn multi_statement_query_yields_a_set_per_select() {
    let dispatcher = Dispatcher::default();
    let db = TestDb::new();
    let handle = open_with_fixture(&dispatcher, &db).await;

    let reply = dispatcher
        .dispatch(Command::query(
            DriverKind::Sqlite,
            handle,
            "create table scratch (x integer);\n\
             select count(*) as n from customerkind;\n\
             insert into scratch values (1);\n\
             select name, 1.5 as ratio, null as missing from sellerkind where idsellerkind = 1;",
        ))
        .await
        .unwrap();
    let sets = reply.into_result_sets().unwrap();
    assert_eq!(sets.len(), 2);
    assert_eq!(sets[0].meta, vec!["n"]);
    assert_eq!(sets[0].rows, vec![vec![json!(40)]]);
    assert_eq!(sets[1].meta, vec!["name", "ratio", "missing"]);
    assert_eq!(sets[1].rows, vec![vec![json!("seller1"), json!(1.5), Value::Null]]);
}

#[tokio::test]
async fn duplicate_column_names_are_kept() {
    let dispatcher = Dispatcher::default();
    let handle = open(&dispatcher, ":memory:").await;
    let reply = dispatcher
        .dispatch(Command::query(DriverKind::Sqlite, handle, "select 1 as a, 2 as A, 3 as a"))
        .await
        .unwrap();
    let sets = reply.result_sets().unwrap();
    assert_eq!(sets[0].meta, vec!["a", "A", "a"]);
    assert_eq!(sets[0].rows, vec![vec![json!(1), json!(2), json!(3)]]);
}

#[tokio::test]
async fn blobs_are_base64() {
    let dispatcher = Dispatcher::default();
    let handle = open(&dispatcher, ":memory:").await;
    let reply = dispatcher
        .dispatch(Command::query(DriverKind::Sqlite, handle, "select x'00ff10' as b"))
        .await
        .unwrap();
    assert_eq!(reply.result_sets().unwrap()[0].rows[0][0], json!("AP8Q"));
}

#[tokio::test]
async fn bad_sqlite_connection_allocates_nothing() {
    let dispatcher = Dispatcher::default();
    let err = dispatcher
        .dispatch_config(&json!({
            "cmd": "open",
            "driver": "sqlite",
            "connectionString": "bad connection/does/not/exist.db",
            "timeout": 3,
        }))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(dispatcher.registry().is_empty());
}

#[tokio::test]
async fn bad_mysql_connection_string_fails_fast() {
    let dispatcher = Dispatcher::default();
    let started = Instant::now();
    let err = dispatcher
        .dispatch_config(&json!({
            "cmd": "open",
            "driver": "mysql",
            "connectionString": "bad connection",
            "timeout": 3,
        }))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(dispatcher.registry().is_empty());
}

#[tokio::test]
async fn silent_server_honours_timeout() {
    // accepts the TCP connection but never sends a handshake
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let dispatcher = Dispatcher::default();
    let started = Instant::now();
    let err = dispatcher
        .dispatch(
            Command::open(
                DriverKind::MySql,
                format!("Server=127.0.0.1;Port={port};Uid=u;Pwd=p;Database=d"),
            )
            .with_timeout(Duration::from_millis(300)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(err.to_string().contains("timed out"), "{err}");
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(dispatcher.registry().is_empty());
    drop(listener);
}

#[tokio::test]
async fn invalid_requests_touch_nothing() {
    let dispatcher = Dispatcher::default();
    let db = TestDb::new();
    let handle = open(&dispatcher, &db.url).await;

    let cases = [
        json!({"cmd": "open", "driver": "sqlite"}),
        json!({"cmd": "nonquery", "driver": "sqlite", "handler": handle.get()}),
        json!({"driver": "sqlite", "source": "select 1"}),
        json!({"handler": handle.get(), "source": "select 1"}),
        json!("select 1"),
    ];
    for case in cases {
        let err = dispatcher.dispatch_config(&case).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "{case}");
        assert_eq!(dispatcher.registry().len(), 1);
    }
}

#[tokio::test]
async fn driver_must_match_the_handle() {
    let dispatcher = Dispatcher::default();
    let handle = open(&dispatcher, ":memory:").await;

    let err = dispatcher
        .dispatch(Command::query(DriverKind::Postgres, handle, "select 1"))
        .await
        .unwrap_err();
    assert!(matches!(err, EdgeError::DriverMismatch { .. }));
    assert_eq!(err.kind(), ErrorKind::Handle);

    let err = dispatcher
        .dispatch(Command::close(DriverKind::MySql, handle))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Handle);
    assert!(dispatcher.registry().contains(handle));
}

#[tokio::test]
async fn sql_errors_are_execution_errors() {
    let dispatcher = Dispatcher::default();
    let handle = open(&dispatcher, ":memory:").await;

    let err = dispatcher
        .dispatch(Command::non_query(DriverKind::Sqlite, handle, "update nowhere set x = 1;"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Execution);

    // the handle stays usable
    let reply = dispatcher
        .dispatch(Command::query(DriverKind::Sqlite, handle, "select 2 as two"))
        .await
        .unwrap();
    assert_eq!(reply.result_sets().unwrap()[0].rows, vec![vec![json!(2)]]);
}

#[tokio::test]
async fn handles_do_not_share_state() {
    let dispatcher = Dispatcher::default();
    let first = open(&dispatcher, ":memory:").await;
    let second = open(&dispatcher, ":memory:").await;

    dispatcher
        .dispatch(Command::non_query(DriverKind::Sqlite, first, "create table only_here (x int);"))
        .await
        .unwrap();
    let err = dispatcher
        .dispatch(Command::query(DriverKind::Sqlite, second, "select * from only_here"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Execution);
}

#[tokio::test]
async fn concurrent_operations_on_one_handle_are_serialized() {
    let dispatcher = Dispatcher::default();
    let db = TestDb::new();
    let handle = open_with_fixture(&dispatcher, &db).await;

    let updates = (0..10).map(|_| {
        dispatcher.dispatch(Command::non_query(
            DriverKind::Sqlite,
            handle,
            "update sellerkind set rnd = rnd + 1;",
        ))
    });
    for reply in join_all(updates).await {
        assert_eq!(reply.unwrap().rowcount(), Some(20));
    }
}

#[tokio::test]
async fn concurrent_operations_across_handles() {
    let dispatcher = Dispatcher::default();
    let mut handles = Vec::new();
    for _ in 0..4 {
        handles.push(open(&dispatcher, ":memory:").await);
    }
    let queries = handles.iter().map(|&h| {
        let sql = format!("select {} as id", h.get());
        dispatcher.dispatch(Command::query(DriverKind::Sqlite, h, sql))
    });
    for (reply, handle) in join_all(queries).await.into_iter().zip(&handles) {
        let reply = reply.unwrap();
        assert_eq!(reply.result_sets().unwrap()[0].rows, vec![vec![json!(handle.get())]]);
    }
}

#[tokio::test]
async fn end_to_end_scenario() {
    let dispatcher = Dispatcher::new(EngineConfig::default());
    let db = TestDb::new();

    let handle = dispatcher
        .dispatch_config(&json!({
            "cmd": "open",
            "driver": "sqlite",
            "connectionString": db.url,
        }))
        .await
        .unwrap()
        .handle()
        .unwrap();

    let report = dispatcher
        .run_script(DriverKind::Sqlite, handle, SETUP_SQL)
        .await
        .unwrap();
    assert_eq!(report.batches, 4);

    let nonquery = dispatcher
        .dispatch_config(&request(Some("nonquery"), handle, "update sellerkind set rnd=rnd+1;"))
        .await
        .unwrap();
    assert_eq!(nonquery, Reply::NonQuery { rowcount: 20 });

    let query = dispatcher
        .dispatch_config(&request(None, handle, "select * from customerkind;"))
        .await
        .unwrap();
    let sets = query.result_sets().unwrap();
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].rows.len(), 40);

    let closed = dispatcher
        .dispatch_config(&json!({"cmd": "close", "driver": "sqlite", "handler": handle.get()}))
        .await
        .unwrap();
    assert_eq!(closed, Reply::Closed);
    assert!(dispatcher.registry().is_empty());
}

#[test]
fn fixture_has_four_batches() {
    let batches = edgesql_script::split(SETUP_SQL);
    assert_eq!(batches.iter().filter(|b| !b.is_blank()).count(), 4);
}
