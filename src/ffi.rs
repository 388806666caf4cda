//! FFI bindings for the HRV relay
//!
//! C-compatible entry points for the native watch and phone shells. Strings
//! are null-terminated UTF-8 JSON; returned strings are allocated here and must
//! be freed with `hrv_free_string`. On failure a function returns NULL (or a
//! negative status) and records a message readable with `hrv_last_error`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::error::RelayError;
use crate::types::{HrvEntry, HrvReceipt};
use crate::window::{self, MeasurementWindow, SampleOutcome, SensorReading};

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Serialize a result to an owned C string, recording any error
fn json_result<T: serde::Serialize>(result: Result<T, RelayError>) -> *mut c_char {
    match result.and_then(|value| Ok(serde_json::to_string(&value)?)) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&format!("{}: {}", e.code(), e));
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Compute HRV from a JSON array of beat intervals in milliseconds.
///
/// Intervals outside the valid range are dropped before computing.
///
/// # Safety
/// - `json` must be a valid null-terminated C string.
/// - Returns a newly allocated `HrvResult` JSON string that must be freed with
///   `hrv_free_string`.
/// - Returns NULL on error (including too few valid intervals); call
///   `hrv_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn hrv_compute(json: *const c_char) -> *mut c_char {
    clear_last_error();

    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return ptr::null_mut();
        }
    };

    json_result(
        serde_json::from_str::<Vec<f64>>(&json_str)
            .map_err(RelayError::from)
            .and_then(|intervals| window::compute_recorded(&intervals)),
    )
}

/// Decode an HRV datagram into the entry the host would persist.
///
/// # Safety
/// - `json` must be a valid null-terminated C string.
/// - Returns a newly allocated JSON string that must be freed with
///   `hrv_free_string`.
/// - Returns NULL on error; call `hrv_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn hrv_decode_datagram(json: *const c_char) -> *mut c_char {
    clear_last_error();

    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return ptr::null_mut();
        }
    };

    json_result(
        serde_json::from_str::<HrvReceipt>(&json_str)
            .map_err(RelayError::from)
            .and_then(|receipt| HrvEntry::from_receipt(&receipt)),
    )
}

// ============================================================================
// Measurement Window API
// ============================================================================

/// Opaque handle to an open measurement window
pub struct HrvWindowHandle {
    window: Option<MeasurementWindow>,
}

fn outcome_status(outcome: SampleOutcome) -> i32 {
    match outcome {
        SampleOutcome::Accepted(_) => 1,
        SampleOutcome::Rejected(_) | SampleOutcome::NoSignal => 0,
        SampleOutcome::Closed => {
            set_last_error("Window already closed");
            -1
        }
    }
}

unsafe fn push_reading(handle: *mut HrvWindowHandle, reading: SensorReading) -> i32 {
    if handle.is_null() {
        set_last_error("Null window pointer");
        return -1;
    }

    let handle = &mut *handle;
    match handle.window.as_mut() {
        Some(window) => outcome_status(window.push(reading)),
        None => outcome_status(SampleOutcome::Closed),
    }
}

/// Open a new, empty measurement window.
///
/// # Safety
/// - Returns a pointer to a newly allocated window.
/// - Must be freed with `hrv_window_free`.
#[no_mangle]
pub unsafe extern "C" fn hrv_window_new() -> *mut HrvWindowHandle {
    clear_last_error();
    Box::into_raw(Box::new(HrvWindowHandle {
        window: Some(MeasurementWindow::open()),
    }))
}

/// Offer a reading that carries a measured inter-beat interval.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `hrv_window_new`.
/// - Returns 1 if the interval was kept, 0 if it was out of range, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn hrv_window_push_interval(
    handle: *mut HrvWindowHandle,
    bpm: f64,
    ibi_ms: f64,
) -> i32 {
    clear_last_error();
    push_reading(handle, SensorReading::with_interval(bpm, ibi_ms))
}

/// Offer a rate-only reading; the interval is derived as `60000 / bpm`.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `hrv_window_new`.
/// - Returns 1 if the derived interval was kept, 0 if it was out of range or
///   the rate was not positive, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn hrv_window_push_bpm(handle: *mut HrvWindowHandle, bpm: f64) -> i32 {
    clear_last_error();
    push_reading(handle, SensorReading::from_bpm(bpm))
}

/// Number of intervals kept so far.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `hrv_window_new`.
/// - Returns -1 for a NULL or closed window.
#[no_mangle]
pub unsafe extern "C" fn hrv_window_len(handle: *const HrvWindowHandle) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null window pointer");
        return -1;
    }

    match &(*handle).window {
        Some(window) => i32::try_from(window.len()).unwrap_or(i32::MAX),
        None => {
            set_last_error("Window already closed");
            -1
        }
    }
}

/// Close the window and compute its result.
///
/// The handle stays allocated but accepts no further readings.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `hrv_window_new`.
/// - Returns a newly allocated `HrvResult` JSON string that must be freed with
///   `hrv_free_string`.
/// - Returns NULL when the window holds too few intervals or was already
///   closed; call `hrv_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn hrv_window_close(handle: *mut HrvWindowHandle) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null window pointer");
        return ptr::null_mut();
    }

    let handle = &mut *handle;
    let window = match handle.window.take() {
        Some(window) => window,
        None => {
            set_last_error("Window already closed");
            return ptr::null_mut();
        }
    };

    let kept = window.len();
    json_result(window.close().ok_or(RelayError::InsufficientSamples(kept)))
}

/// Free a measurement window.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `hrv_window_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn hrv_window_free(handle: *mut HrvWindowHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by an `hrv_*` function.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by an `hrv_*` function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn hrv_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message, prefixed with its error code.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next `hrv_*` call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn hrv_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn hrv_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
