//! Native extension exposing the edgesql dispatcher over the v1 C ABI.
//!
//! Every call takes a JSON object and returns JSON. Replies have the same
//! shapes as [`Dispatcher::dispatch`]; failures come back with `ok = false`,
//! the error kind's code and an `{"error", "kind"}` payload.

use edgesql_abi::{EdgeBuf, EdgeCallResult, err_json, ok_json, parse_request};
use edgesql_engine::{Command, Dispatcher, EdgeError, ErrorKind};
use once_cell::sync::Lazy;
use serde_json::Value;
use tokio::runtime::Runtime;

static RT: Lazy<std::io::Result<Runtime>> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("edgesql-ext")
        .enable_all()
        .build()
});

static DISPATCHER: Lazy<Dispatcher> = Lazy::new(Dispatcher::default);

fn edge_error(e: &EdgeError) -> EdgeCallResult {
    let kind = e.kind();
    tracing::debug!(kind = %kind, error = %e, "call failed");
    err_json(kind.as_str(), &e.to_string(), kind.code())
}

/// Decode the request and run `f` to completion on the extension runtime.
fn call<F, Fut, T>(buf: EdgeBuf, f: F) -> EdgeCallResult
where
    F: FnOnce(Value) -> Fut,
    Fut: Future<Output = Result<T, EdgeError>>,
    T: serde::Serialize,
{
    // SAFETY: hosts pass a buffer valid for the duration of the call
    let request = match unsafe { parse_request(&buf) } {
        Ok(v) => v,
        Err(e) => {
            let kind = ErrorKind::Validation;
            return err_json(kind.as_str(), &e.to_string(), kind.code());
        }
    };
    let rt = match RT.as_ref() {
        Ok(rt) => rt,
        Err(e) => {
            let kind = ErrorKind::Execution;
            return err_json(kind.as_str(), &format!("runtime unavailable: {e}"), kind.code());
        }
    };
    match rt.block_on(f(request)) {
        Ok(reply) => ok_json(&reply),
        Err(e) => edge_error(&e),
    }
}

/// Dispatch one request map (`cmd`, `driver`, `connectionString`, `handler`,
/// `source`, `timeout`).
pub extern "C" fn edge_invoke(buf: EdgeBuf) -> EdgeCallResult {
    call(buf, |request| async move { DISPATCHER.dispatch_config(&request).await })
}

/// Run a `GO`-separated script on an open handle. Takes `driver`, `handler`
/// and `source`; replies `{"batches": n, "rowcount": n}`.
pub extern "C" fn edge_run_script(buf: EdgeBuf) -> EdgeCallResult {
    call(buf, |mut request| async move {
        if let Value::Object(map) = &mut request {
            map.insert("cmd".into(), Value::from("nonquery"));
        }
        match Command::from_config(&request)? {
            Command::NonQuery {
                driver,
                handle,
                source,
            } => DISPATCHER.run_script(driver, handle, &source).await,
            other => Err(EdgeError::Validation(format!(
                "expected a script request, got {}",
                other.kind().as_str()
            ))),
        }
    })
}

edgesql_abi::export_edge_v1! {
    "edge_invoke" => edge_invoke,
    "edge_run_script" => edge_run_script,
}
