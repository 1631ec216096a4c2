#![deny(unsafe_op_in_unsafe_fn)]
//! edgesql_abi: the JSON-in/JSON-out C ABI spoken by edgesql native extensions.
//! - v1 buffer and call-result types shared with hosts
//! - helpers to return JSON payloads or error envelopes and to free them
//! - a macro exporting the function table

pub use libc as __libc;
use libc::c_uchar;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[repr(C)]
pub struct EdgeBuf {
    pub ptr: *const c_uchar,
    pub len: usize,
}

impl EdgeBuf {
    /// Borrowed view over `bytes`; the slice must outlive every use of the buffer.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            ptr: bytes.as_ptr(),
            len: bytes.len(),
        }
    }
}

#[repr(C)]
pub struct EdgeCallResult {
    pub ok: bool,
    pub data: EdgeBuf,
    pub code: i32,
}

pub type ExtCallV1 = extern "C" fn(EdgeBuf) -> EdgeCallResult;
pub type ExtFreeV1 = extern "C" fn(*const c_uchar, usize);

#[repr(C)]
pub struct EdgeFunctionDescV1 {
    pub name: *const libc::c_char,
    pub call: ExtCallV1,
}

#[repr(C)]
pub struct EdgeRegisterV1 {
    pub abi_version: u32,
    pub funcs: *const EdgeFunctionDescV1,
    pub len: usize,
    pub free_fn: ExtFreeV1,
}

#[derive(Debug, Error)]
pub enum AbiError {
    #[error("empty request buffer")]
    Empty,
    #[error("request is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("request must be a JSON object")]
    NotAnObject,
}

fn into_result(bytes: Vec<u8>, ok: bool, code: i32) -> EdgeCallResult {
    let len = bytes.len();
    let ptr = Box::into_raw(bytes.into_boxed_slice()) as *const c_uchar;
    EdgeCallResult {
        ok,
        data: EdgeBuf { ptr, len },
        code,
    }
}

/// Allocate a JSON payload from any Serialize value.
pub fn ok_json<T: Serialize>(val: &T) -> EdgeCallResult {
    let bytes = match serde_json::to_vec(val) {
        Ok(b) => b,
        Err(e) => return err_json("validation", &format!("unserializable reply: {e}"), 1),
    };
    into_result(bytes, true, 0)
}

/// Error envelope: `{"error": message, "kind": kind}` with `ok = false`.
pub fn err_json(kind: &str, message: &str, code: i32) -> EdgeCallResult {
    #[derive(Serialize)]
    struct Err<'a> {
        error: &'a str,
        kind: &'a str,
    }
    let bytes = serde_json::to_vec(&Err {
        error: message,
        kind,
    })
    .unwrap_or_default();
    into_result(bytes, false, code)
}

/// Free function to release buffers allocated by ok_json/err_json
pub extern "C" fn free_v1(ptr: *const c_uchar, len: usize) {
    if !ptr.is_null() && len > 0 {
        // SAFETY: caller guarantees ptr/len from Box<[u8]> allocation
        unsafe {
            drop(Box::from_raw(std::slice::from_raw_parts_mut(
                ptr as *mut u8,
                len,
            )))
        }
    }
}

/// Parse an incoming request buffer as a JSON object.
///
/// # Safety
/// `buf.ptr` must point to `buf.len` readable bytes for the duration of the call.
pub unsafe fn parse_request(buf: &EdgeBuf) -> Result<Value, AbiError> {
    if buf.ptr.is_null() || buf.len == 0 {
        return Err(AbiError::Empty);
    }
    // SAFETY: upheld by the caller
    let slice = unsafe { std::slice::from_raw_parts(buf.ptr, buf.len) };
    match serde_json::from_slice::<Value>(slice)? {
        obj @ Value::Object(_) => Ok(obj),
        _ => Err(AbiError::NotAnObject),
    }
}

/// Decode the JSON payload of a call result without freeing it.
///
/// # Safety
/// `res` must come from this ABI and must not have been freed yet.
pub unsafe fn read_result(res: &EdgeCallResult) -> Option<Value> {
    if res.data.ptr.is_null() || res.data.len == 0 {
        return None;
    }
    // SAFETY: upheld by the caller
    let slice = unsafe { std::slice::from_raw_parts(res.data.ptr, res.data.len) };
    serde_json::from_slice(slice).ok()
}

/// Decode and free a call result produced in this process.
pub fn take_result(res: EdgeCallResult) -> (bool, i32, Option<Value>) {
    // SAFETY: the result is consumed here, so it is read exactly once before release
    let payload = unsafe { read_result(&res) };
    free_v1(res.data.ptr, res.data.len);
    (res.ok, res.code, payload)
}

/// Create a NUL-terminated static C string from a Rust &'static str.
#[macro_export]
macro_rules! cstr {
    ($s:expr) => {{ concat!($s, "\0").as_ptr() as *const $crate::__libc::c_char }};
}

/// Export a v1 extension registry with the given function table.
/// Usage: export_edge_v1!(
///   "name" => extern "C" fn(EdgeBuf) -> EdgeCallResult,
///   ...
/// )
#[macro_export]
macro_rules! export_edge_v1 {
    ($($name:expr => $func:path),+ $(,)?) => {
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn edge_register_v1() -> $crate::EdgeRegisterV1 {
            let boxed: Box<[$crate::EdgeFunctionDescV1]> = vec![
                $( $crate::EdgeFunctionDescV1 { name: $crate::cstr!($name), call: $func }, )+
            ].into_boxed_slice();
            let len = boxed.len();
            let ptr = Box::into_raw(boxed) as *const $crate::EdgeFunctionDescV1;
            $crate::EdgeRegisterV1 { abi_version: 1, funcs: ptr, len, free_fn: $crate::free_v1 }
        }
    };
}
