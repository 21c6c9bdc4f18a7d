// SHMSEG C FFI - Handle-based API over shared segments
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::CStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use libc::c_char;

use shmseg_core::{generate_id, ErrorKind, SegmentError, SharedSegment};

// Handle management
static NEXT_HANDLE: AtomicU32 = AtomicU32::new(1);

lazy_static::lazy_static! {
    static ref SEGMENTS: Mutex<HashMap<u32, SharedSegment>> = Mutex::new(HashMap::new());
}

thread_local! {
    static LAST_ERROR: RefCell<Option<(ErrorKind, String)>> = const { RefCell::new(None) };
}

/// Status code for success; failures use the `ErrorKind` values
pub const SHMSEG_OK: i32 = 0;

/// Status code for an unknown handle
pub const SHMSEG_BAD_HANDLE: i32 = -1;

// Generate unique handle
fn next_handle() -> u32 {
    NEXT_HANDLE.fetch_add(1, Ordering::Relaxed)
}

fn segments() -> MutexGuard<'static, HashMap<u32, SharedSegment>> {
    // A panic while holding the lock leaves the map itself intact
    SEGMENTS.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn set_last_error(err: &SegmentError) -> i32 {
    log::debug!("shmseg_c: {}", err);
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some((err.kind(), err.to_string())));
    err.kind() as i32
}

fn bad_handle(handle: u32) -> i32 {
    LAST_ERROR.with(|slot| {
        *slot.borrow_mut() = Some((
            ErrorKind::InvalidArgument,
            format!("unknown segment handle {}", handle),
        ))
    });
    SHMSEG_BAD_HANDLE
}

unsafe fn str_arg<'a>(ptr: *const c_char, what: &str) -> Result<&'a str, SegmentError> {
    if ptr.is_null() {
        return Err(SegmentError::invalid_argument(format!("{} is null", what)));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| SegmentError::invalid_argument(format!("{} is not valid UTF-8", what)))
}

/// Copy `bytes` plus a NUL into `out` as far as it fits; returns `bytes.len()`
unsafe fn copy_c_string(bytes: &[u8], out: *mut c_char, out_len: usize) -> i64 {
    if !out.is_null() && out_len > 0 {
        let n = bytes.len().min(out_len - 1);
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), out as *mut u8, n);
        *out.add(n) = 0;
    }
    bytes.len() as i64
}

/// Create (`host`) or attach to a segment
///
/// Returns a handle, or 0 on failure (see `shmseg_last_error`).
///
/// # Safety
///
/// `name` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn shmseg_open(name: *const c_char, size: i64, global: bool, host: bool) -> u32 {
    let result = str_arg(name, "name").and_then(|name| {
        if size <= 0 {
            return Err(SegmentError::invalid_argument(format!(
                "size must be greater than zero, got {}",
                size
            )));
        }
        SharedSegment::new(name, size as usize, global, host)
    });

    match result {
        Ok(segment) => {
            let handle = next_handle();
            segments().insert(handle, segment);
            handle
        }
        Err(e) => {
            set_last_error(&e);
            0
        }
    }
}

/// Dispose a segment and release its handle
///
/// The handle is released even when disposal reports an error.
#[no_mangle]
pub extern "C" fn shmseg_close(handle: u32) -> i32 {
    let Some(mut segment) = segments().remove(&handle) else {
        return bad_handle(handle);
    };
    match segment.dispose() {
        Ok(()) => SHMSEG_OK,
        Err(e) => set_last_error(&e),
    }
}

/// Segment size in bytes, or -1 for an unknown handle
#[no_mangle]
pub extern "C" fn shmseg_size(handle: u32) -> i64 {
    match segments().get(&handle) {
        Some(segment) => segment.size() as i64,
        None => bad_handle(handle) as i64,
    }
}

#[no_mangle]
pub extern "C" fn shmseg_is_host(handle: u32) -> bool {
    segments().get(&handle).is_some_and(|s| s.is_host())
}

#[no_mangle]
pub extern "C" fn shmseg_is_global(handle: u32) -> bool {
    segments().get(&handle).is_some_and(|s| s.is_global())
}

/// Write a NUL-terminated string with text semantics
///
/// Returns the number of bytes copied, or a negative status.
///
/// # Safety
///
/// `text` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn shmseg_write_text(handle: u32, text: *const c_char) -> i64 {
    let text = match str_arg(text, "text") {
        Ok(t) => t,
        Err(e) => return -(set_last_error(&e) as i64),
    };
    let mut map = segments();
    let Some(segment) = map.get_mut(&handle) else {
        return bad_handle(handle) as i64;
    };
    match segment.write_text(text) {
        Ok(n) => n as i64,
        Err(e) => -(set_last_error(&e) as i64),
    }
}

/// Write `len` raw bytes with buffer semantics
///
/// Returns the number of bytes copied, or a negative status.
///
/// # Safety
///
/// `data` must be valid for reads of `len` bytes (or null with `len == 0`).
#[no_mangle]
pub unsafe extern "C" fn shmseg_write_buffer(handle: u32, data: *const u8, len: usize) -> i64 {
    let bytes: &[u8] = if len == 0 {
        &[]
    } else if data.is_null() {
        return -(set_last_error(&SegmentError::invalid_argument("data is null")) as i64);
    } else {
        std::slice::from_raw_parts(data, len)
    };

    let mut map = segments();
    let Some(segment) = map.get_mut(&handle) else {
        return bad_handle(handle) as i64;
    };
    match segment.write_buffer(bytes) {
        Ok(n) => n as i64,
        Err(e) => -(set_last_error(&e) as i64),
    }
}

/// Read text into `out` (always NUL-terminated when `out_len > 0`)
///
/// Returns the full text length in bytes, which may exceed `out_len - 1`.
///
/// # Safety
///
/// `out` must be null or valid for writes of `out_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn shmseg_read_text(handle: u32, out: *mut c_char, out_len: usize) -> i64 {
    let map = segments();
    let Some(segment) = map.get(&handle) else {
        return bad_handle(handle) as i64;
    };
    match segment.read() {
        Ok(text) => copy_c_string(text.as_bytes(), out, out_len),
        Err(e) => -(set_last_error(&e) as i64),
    }
}

/// Copy up to `out_len` bytes of the segment into `out`
///
/// Returns the segment size.
///
/// # Safety
///
/// `out` must be null or valid for writes of `out_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn shmseg_read_buffer(handle: u32, out: *mut u8, out_len: usize) -> i64 {
    let map = segments();
    let Some(segment) = map.get(&handle) else {
        return bad_handle(handle) as i64;
    };
    let view = match segment.view() {
        Ok(view) => view,
        Err(e) => return -(set_last_error(&e) as i64),
    };
    if !out.is_null() && out_len > 0 {
        view.read_into(std::slice::from_raw_parts_mut(out, out_len));
    }
    view.size() as i64
}

/// Generate a fresh segment name into `out`
///
/// Returns the name length.
///
/// # Safety
///
/// `out` must be null or valid for writes of `out_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn shmseg_generate_id(global: bool, out: *mut c_char, out_len: usize) -> i64 {
    let id = generate_id(global);
    copy_c_string(id.name().as_bytes(), out, out_len)
}

/// Segment attributes as a JSON object into `out`
///
/// Returns the JSON length, or a negative status.
///
/// # Safety
///
/// `out` must be null or valid for writes of `out_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn shmseg_info_json(handle: u32, out: *mut c_char, out_len: usize) -> i64 {
    let map = segments();
    let Some(segment) = map.get(&handle) else {
        return bad_handle(handle) as i64;
    };
    match serde_json::to_string(&segment.info()) {
        Ok(json) => copy_c_string(json.as_bytes(), out, out_len),
        Err(e) => -(set_last_error(&SegmentError::internal(e.to_string())) as i64),
    }
}

/// Kind of the last error on this thread, 0 if none
#[no_mangle]
pub extern "C" fn shmseg_last_error() -> i32 {
    LAST_ERROR.with(|slot| slot.borrow().as_ref().map_or(SHMSEG_OK, |(kind, _)| *kind as i32))
}

/// Message of the last error on this thread into `out`
///
/// Returns the message length, 0 if there was no error.
///
/// # Safety
///
/// `out` must be null or valid for writes of `out_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn shmseg_last_error_message(out: *mut c_char, out_len: usize) -> i64 {
    LAST_ERROR.with(|slot| match slot.borrow().as_ref() {
        Some((_, message)) => copy_c_string(message.as_bytes(), out, out_len),
        None => copy_c_string(&[], out, out_len),
    })
}
