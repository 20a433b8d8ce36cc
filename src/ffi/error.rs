//! Per-thread last-error slot
//!
//! Every boundary call clears the slot of the calling thread on entry and
//! fills it when the call fails, so a message never leaks across threads.

use std::cell::RefCell;
use std::ffi::{c_char, CString};
use std::fmt::Display;
use std::ptr;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

pub(crate) fn record_error(message: impl Display) {
    let text = message.to_string().replace('\0', " ");
    let stored = CString::new(text).ok();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = stored);
}

pub(crate) fn clear_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// Copy of the calling thread's last error message
pub fn last_error() -> Option<String> {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map(|msg| msg.to_string_lossy().into_owned())
    })
}

/// Message of the last failed call on this thread, or NULL.
/// The pointer stays valid until the next `fb_*` call on the same thread.
#[no_mangle]
pub extern "C" fn fb_last_error() -> *const c_char {
    LAST_ERROR.with(|slot| slot.borrow().as_ref().map_or(ptr::null(), |msg| msg.as_ptr()))
}
