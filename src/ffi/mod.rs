//! C ABI surface
//!
//! Conventions shared by every `fb_*` function:
//! - handles are opaque pointers checked against a registry before use
//! - fallible calls return `0` or a negative status, or NULL for handles
//! - on failure the message is left in the calling thread's error slot
//! - panics never cross the boundary

pub mod builder;
pub mod error;
mod handles;
pub mod session;
mod trampoline;
pub mod types;

use std::any::Any;
use std::ffi::{c_char, c_int, CStr};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use tracing::debug;

use crate::error::{BridgeError, Result, STATUS_OK};
use crate::logging;

pub use error::{fb_last_error, last_error};

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Run `body` behind the boundary: clear the error slot, catch panics, and
/// record the failure message
fn guard<T>(op: &'static str, body: impl FnOnce() -> Result<T>) -> Result<T> {
    error::clear_error();
    let outcome = match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(result) => result,
        Err(payload) => Err(BridgeError::Internal {
            op,
            message: panic_message(&*payload),
        }),
    };
    if let Err(e) = &outcome {
        debug!(op, error = %e, "boundary call failed");
        error::record_error(e);
    }
    outcome
}

pub(crate) fn status(op: &'static str, body: impl FnOnce() -> Result<()>) -> c_int {
    match guard(op, body) {
        Ok(()) => STATUS_OK,
        Err(e) => e.status_code(),
    }
}

pub(crate) fn handle<T>(op: &'static str, body: impl FnOnce() -> Result<*mut T>) -> *mut T {
    guard(op, body).unwrap_or(ptr::null_mut())
}

/// For calls whose only failure channel is the error slot
pub(crate) fn void(op: &'static str, body: impl FnOnce() -> Result<()>) {
    let _ = guard(op, body);
}

/// Borrow a NUL-terminated UTF-8 argument
pub(crate) unsafe fn c_str<'a>(ptr: *const c_char, name: &'static str) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(BridgeError::NullArgument(name));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| BridgeError::InvalidArgument(format!("{name} is not valid UTF-8")))
}

/// Install the stock log formatter. NULL reads `RUST_LOG`.
#[no_mangle]
pub unsafe extern "C" fn fb_logging_init(filter: *const c_char) -> c_int {
    status("fb_logging_init", || {
        let filter = if filter.is_null() {
            None
        } else {
            Some(c_str(filter, "filter")?)
        };
        logging::init(filter)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::STATUS_INTERNAL;

    #[test]
    fn test_guard_converts_panic() {
        let code = status("test_op", || panic!("boom"));
        assert_eq!(code, STATUS_INTERNAL);
        let message = last_error().unwrap();
        assert!(message.contains("test_op"));
        assert!(message.contains("boom"));
    }

    #[test]
    fn test_success_clears_previous_error() {
        status("failing", || Err(BridgeError::NullArgument("api_key")));
        assert_eq!(last_error().as_deref(), Some("api_key pointer is null"));
        assert_eq!(status("ok", || Ok(())), STATUS_OK);
        assert_eq!(last_error(), None);
    }
}
