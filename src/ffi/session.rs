//! `fb_session_*`: live session handles

use std::ffi::{c_char, c_int, c_void};
use std::ptr;
use std::time::Duration;

use super::handles::{self, HandleKind};
use super::trampoline::{
    EventTrampoline, ExceptionTrampoline, ForeignCallbacks, MetadataTrampoline, RecordTrampoline,
    UserData,
};
use super::types::{
    FbEventCallback, FbExceptionCallback, FbMetadataCallback, FbRecordCallback, FbSessionStats,
};
use super::{c_str, status, void};
use crate::engine::{StartPoint, Subscription};
use crate::enums::{SType, Schema};
use crate::error::{BridgeError, Result};
use crate::session::LiveSession;

pub struct FbSession {
    session: LiveSession,
}

impl FbSession {
    pub(crate) fn into_raw(session: LiveSession) -> *mut FbSession {
        let ptr = Box::into_raw(Box::new(FbSession { session }));
        handles::register(ptr, HandleKind::Session);
        ptr
    }
}

unsafe fn session_ref<'a>(ptr: *mut FbSession) -> Result<&'a LiveSession> {
    handles::check(ptr, HandleKind::Session)?;
    Ok(&(*ptr).session)
}

unsafe fn write_out<T>(out: *mut T, name: &'static str, value: T) -> Result<()> {
    if out.is_null() {
        return Err(BridgeError::NullArgument(name));
    }
    ptr::write(out, value);
    Ok(())
}

/// Release a session. A running delivery loop is asked to stop and given
/// the configured shutdown timeout to drain. NULL is ignored.
#[no_mangle]
pub unsafe extern "C" fn fb_session_free(session: *mut FbSession) {
    void("fb_session_free", || {
        if session.is_null() {
            return Ok(());
        }
        handles::release(session, HandleKind::Session)?;
        drop(Box::from_raw(session));
        Ok(())
    })
}

unsafe fn symbol_list(symbols: *const *const c_char, count: usize) -> Result<Vec<String>> {
    if count == 0 {
        return Err(BridgeError::InvalidArgument("at least one symbol is required".into()));
    }
    if symbols.is_null() {
        return Err(BridgeError::NullArgument("symbols"));
    }
    let mut list = Vec::with_capacity(count);
    for i in 0..count {
        let entry = *symbols.add(i);
        if entry.is_null() {
            return Err(BridgeError::InvalidArgument(format!(
                "symbol list contains a null entry at index {i}"
            )));
        }
        list.push(c_str(entry, "symbol")?.to_string());
    }
    Ok(list)
}

unsafe fn subscription(
    symbols: *const *const c_char,
    count: usize,
    schema: u32,
    stype_in: u32,
) -> Result<Subscription> {
    let list = symbol_list(symbols, count)?;
    let schema = Schema::from_u32(schema)
        .ok_or_else(|| BridgeError::InvalidArgument(format!("unknown schema {schema}")))?;
    let stype_in = SType::from_u32(stype_in)
        .ok_or_else(|| BridgeError::InvalidArgument(format!("unknown symbology type {stype_in}")))?;
    Subscription::new(&list, schema, stype_in)
}

#[no_mangle]
pub unsafe extern "C" fn fb_session_subscribe(
    session: *mut FbSession,
    symbols: *const *const c_char,
    symbol_count: usize,
    schema: u32,
    stype_in: u32,
) -> c_int {
    status("fb_session_subscribe", || {
        let session = session_ref(session)?;
        session.subscribe(subscription(symbols, symbol_count, schema, stype_in)?)
    })
}

/// Subscribe with intraday replay from a UNIX nanosecond timestamp
#[no_mangle]
pub unsafe extern "C" fn fb_session_subscribe_from_unix(
    session: *mut FbSession,
    symbols: *const *const c_char,
    symbol_count: usize,
    schema: u32,
    stype_in: u32,
    start_unix_nanos: u64,
) -> c_int {
    status("fb_session_subscribe_from_unix", || {
        let session = session_ref(session)?;
        let sub = subscription(symbols, symbol_count, schema, stype_in)?
            .starting_at(StartPoint::UnixNanos(start_unix_nanos))?;
        session.subscribe(sub)
    })
}

/// Subscribe with intraday replay from a textual start time
#[no_mangle]
pub unsafe extern "C" fn fb_session_subscribe_from_str(
    session: *mut FbSession,
    symbols: *const *const c_char,
    symbol_count: usize,
    schema: u32,
    stype_in: u32,
    start: *const c_char,
) -> c_int {
    status("fb_session_subscribe_from_str", || {
        let session = session_ref(session)?;
        let start = c_str(start, "start")?;
        let sub = subscription(symbols, symbol_count, schema, stype_in)?
            .starting_at(StartPoint::Text(start.to_string()))?;
        session.subscribe(sub)
    })
}

/// Subscribe requesting an initial snapshot
#[no_mangle]
pub unsafe extern "C" fn fb_session_subscribe_with_snapshot(
    session: *mut FbSession,
    symbols: *const *const c_char,
    symbol_count: usize,
    schema: u32,
    stype_in: u32,
) -> c_int {
    status("fb_session_subscribe_with_snapshot", || {
        let session = session_ref(session)?;
        session.subscribe(subscription(symbols, symbol_count, schema, stype_in)?.with_snapshot())
    })
}

fn required<T>(callback: Option<T>, name: &'static str) -> Result<T> {
    callback.ok_or(BridgeError::NullArgument(name))
}

/// Start delivering raw records
#[no_mangle]
pub unsafe extern "C" fn fb_session_start(
    session: *mut FbSession,
    record_callback: Option<FbRecordCallback>,
    user_data: *mut c_void,
) -> c_int {
    status("fb_session_start", || {
        let session = session_ref(session)?;
        let record = required(record_callback, "record_callback")?;
        let callbacks = ForeignCallbacks {
            record: Some(RecordTrampoline::new(record, UserData::new(user_data))),
            ..ForeignCallbacks::default()
        };
        session.start(callbacks.into_callbacks())
    })
}

/// Start delivering raw records, with metadata first. A NULL metadata
/// callback is allowed.
#[no_mangle]
pub unsafe extern "C" fn fb_session_start_with_metadata(
    session: *mut FbSession,
    metadata_callback: Option<FbMetadataCallback>,
    metadata_user_data: *mut c_void,
    record_callback: Option<FbRecordCallback>,
    record_user_data: *mut c_void,
) -> c_int {
    fb_session_start_with_exceptions(
        session,
        metadata_callback,
        metadata_user_data,
        record_callback,
        record_user_data,
        None,
        ptr::null_mut(),
    )
}

/// Start with all three callbacks. A NULL exception callback stops the
/// session on the first engine fault.
#[no_mangle]
pub unsafe extern "C" fn fb_session_start_with_exceptions(
    session: *mut FbSession,
    metadata_callback: Option<FbMetadataCallback>,
    metadata_user_data: *mut c_void,
    record_callback: Option<FbRecordCallback>,
    record_user_data: *mut c_void,
    exception_callback: Option<FbExceptionCallback>,
    exception_user_data: *mut c_void,
) -> c_int {
    status("fb_session_start_with_exceptions", || {
        let session = session_ref(session)?;
        let record = required(record_callback, "record_callback")?;
        let callbacks = ForeignCallbacks {
            record: Some(RecordTrampoline::new(record, UserData::new(record_user_data))),
            metadata: metadata_callback
                .map(|cb| MetadataTrampoline::new(cb, UserData::new(metadata_user_data))),
            exception: exception_callback
                .map(|cb| ExceptionTrampoline::new(cb, UserData::new(exception_user_data))),
            event: None,
        };
        session.start(callbacks.into_callbacks())
    })
}

/// Start delivering routed events instead of raw records. Heartbeats are
/// suppressed; trades carry the resolved symbol.
#[no_mangle]
pub unsafe extern "C" fn fb_session_start_events(
    session: *mut FbSession,
    event_callback: Option<FbEventCallback>,
    event_user_data: *mut c_void,
    exception_callback: Option<FbExceptionCallback>,
    exception_user_data: *mut c_void,
) -> c_int {
    status("fb_session_start_events", || {
        let session = session_ref(session)?;
        let event = required(event_callback, "event_callback")?;
        let callbacks = ForeignCallbacks {
            event: Some(EventTrampoline::new(event, UserData::new(event_user_data))),
            exception: exception_callback
                .map(|cb| ExceptionTrampoline::new(cb, UserData::new(exception_user_data))),
            ..ForeignCallbacks::default()
        };
        session.start(callbacks.into_callbacks())
    })
}

/// Reopen the connection. Requires an idle session with subscriptions.
#[no_mangle]
pub unsafe extern "C" fn fb_session_reconnect(session: *mut FbSession) -> c_int {
    status("fb_session_reconnect", || session_ref(session)?.reconnect())
}

/// Resend all registered subscriptions. Requires an idle session.
#[no_mangle]
pub unsafe extern "C" fn fb_session_resubscribe(session: *mut FbSession) -> c_int {
    status("fb_session_resubscribe", || session_ref(session)?.resubscribe())
}

/// Wait without bound for the delivery loop to exit
#[no_mangle]
pub unsafe extern "C" fn fb_session_block_for_stop(session: *mut FbSession) -> c_int {
    status("fb_session_block_for_stop", || {
        session_ref(session)?.block_for_stop(None);
        Ok(())
    })
}

/// Wait up to `timeout_millis` for the delivery loop to exit. `result`
/// receives `FB_KEEP_GOING_STOP` if it has exited, else `FB_KEEP_GOING_CONTINUE`.
#[no_mangle]
pub unsafe extern "C" fn fb_session_block_for_stop_with_timeout(
    session: *mut FbSession,
    timeout_millis: u64,
    result: *mut u32,
) -> c_int {
    status("fb_session_block_for_stop_with_timeout", || {
        let session = session_ref(session)?;
        if result.is_null() {
            return Err(BridgeError::NullArgument("result"));
        }
        let verdict = session.block_for_stop(Some(Duration::from_millis(timeout_millis)));
        write_out(result, "result", verdict as u32)
    })
}

/// Request a stop and wait up to `timeout_millis` for the loop to exit.
/// `result` may be NULL.
#[no_mangle]
pub unsafe extern "C" fn fb_session_stop(session: *mut FbSession, timeout_millis: u64, result: *mut u32) -> c_int {
    status("fb_session_stop", || {
        let verdict = session_ref(session)?.stop(Some(Duration::from_millis(timeout_millis)));
        if !result.is_null() {
            ptr::write(result, verdict as u32);
        }
        Ok(())
    })
}

/// Current lifecycle state code, or a negative status
#[no_mangle]
pub unsafe extern "C" fn fb_session_state(session: *mut FbSession) -> c_int {
    let mut state = 0;
    let code = status("fb_session_state", || {
        state = session_ref(session)?.state() as c_int;
        Ok(())
    });
    if code < 0 {
        code
    } else {
        state
    }
}

/// Copy the symbol mapped to `instrument_id` into `buffer`, truncated and
/// NUL terminated. Returns the full symbol length in bytes, `0` when no
/// mapping has been seen, or a negative status. `buffer` may be NULL when
/// `buffer_len` is zero.
#[no_mangle]
pub unsafe extern "C" fn fb_session_resolve_symbol(
    session: *mut FbSession,
    instrument_id: u32,
    buffer: *mut c_char,
    buffer_len: usize,
) -> c_int {
    let mut len = 0;
    let code = status("fb_session_resolve_symbol", || {
        let session = session_ref(session)?;
        if buffer.is_null() && buffer_len > 0 {
            return Err(BridgeError::NullArgument("buffer"));
        }
        let symbol = session.resolve_symbol(instrument_id).unwrap_or_default();
        if buffer_len > 0 {
            let n = symbol.len().min(buffer_len - 1);
            ptr::copy_nonoverlapping(symbol.as_ptr().cast::<c_char>(), buffer, n);
            *buffer.add(n) = 0;
        }
        len = c_int::try_from(symbol.len()).unwrap_or(c_int::MAX);
        Ok(())
    });
    if code < 0 {
        code
    } else {
        len
    }
}

#[no_mangle]
pub unsafe extern "C" fn fb_session_stats(session: *mut FbSession, out: *mut FbSessionStats) -> c_int {
    status("fb_session_stats", || {
        let snapshot = session_ref(session)?.stats();
        write_out(out, "out", FbSessionStats::from(snapshot))
    })
}
