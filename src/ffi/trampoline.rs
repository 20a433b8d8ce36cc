//! Adapters from foreign function pointers to session callbacks
//!
//! Each trampoline translates the Rust-side view into C types, invokes the
//! foreign function with the caller's context pointer, and maps the raw
//! verdict code back. A foreign callback that unwinds is caught here.

use std::ffi::{c_void, CString};
use std::panic::{self, AssertUnwindSafe};

use tracing::warn;

use super::types::{
    FbEventCallback, FbExceptionCallback, FbMetadataCallback, FbRecordCallback, FbRecordHeader,
};
use crate::decoder::Record;
use crate::engine::Metadata;
use crate::enums::{ExceptionAction, KeepGoing};
use crate::error::EngineError;
use crate::router::Event;
use crate::session::Callbacks;

/// Foreign context pointer. Whatever it points at is owned by the caller,
/// who guarantees it may be used from the delivery thread.
#[derive(Clone, Copy)]
pub(crate) struct UserData(*mut c_void);

unsafe impl Send for UserData {}

impl UserData {
    pub(crate) fn new(ptr: *mut c_void) -> Self {
        UserData(ptr)
    }
}

fn to_cstring(text: &str) -> CString {
    CString::new(text.replace('\0', " ")).unwrap_or_default()
}

pub(crate) struct RecordTrampoline {
    callback: FbRecordCallback,
    user_data: UserData,
}

impl RecordTrampoline {
    pub(crate) fn new(callback: FbRecordCallback, user_data: UserData) -> Self {
        RecordTrampoline { callback, user_data }
    }

    fn invoke(&self, record: &Record<'_>) -> KeepGoing {
        let header = FbRecordHeader::from(record.header());
        let body = record.body();
        let user_data = self.user_data.0;
        let callback = self.callback;

        match panic::catch_unwind(AssertUnwindSafe(|| {
            callback(user_data, &header, body.as_ptr(), body.len())
        })) {
            Ok(code) => KeepGoing::from_code(code),
            Err(_) => {
                warn!(rtype = header.rtype, "foreign record callback unwound, stopping");
                KeepGoing::Stop
            }
        }
    }
}

pub(crate) struct MetadataTrampoline {
    callback: FbMetadataCallback,
    user_data: UserData,
}

impl MetadataTrampoline {
    pub(crate) fn new(callback: FbMetadataCallback, user_data: UserData) -> Self {
        MetadataTrampoline { callback, user_data }
    }

    fn invoke(&self, metadata: &Metadata) {
        let json = match serde_json::to_string(metadata) {
            Ok(json) => to_cstring(&json),
            Err(e) => {
                warn!(error = %e, "metadata serialization failed");
                return;
            }
        };
        let user_data = self.user_data.0;
        let callback = self.callback;
        if panic::catch_unwind(AssertUnwindSafe(|| callback(user_data, json.as_ptr()))).is_err() {
            warn!("foreign metadata callback unwound");
        }
    }
}

pub(crate) struct ExceptionTrampoline {
    callback: FbExceptionCallback,
    user_data: UserData,
}

impl ExceptionTrampoline {
    pub(crate) fn new(callback: FbExceptionCallback, user_data: UserData) -> Self {
        ExceptionTrampoline { callback, user_data }
    }

    fn invoke(&self, fault: &EngineError) -> ExceptionAction {
        let message = to_cstring(&fault.to_string());
        let user_data = self.user_data.0;
        let callback = self.callback;
        match panic::catch_unwind(AssertUnwindSafe(|| callback(user_data, message.as_ptr()))) {
            Ok(code) => ExceptionAction::from_code(code),
            Err(_) => {
                warn!("foreign exception callback unwound, stopping");
                ExceptionAction::Stop
            }
        }
    }
}

pub(crate) struct EventTrampoline {
    callback: FbEventCallback,
    user_data: UserData,
}

impl EventTrampoline {
    pub(crate) fn new(callback: FbEventCallback, user_data: UserData) -> Self {
        EventTrampoline { callback, user_data }
    }

    fn invoke(&self, event: &Event) {
        let kind = to_cstring(event.kind.as_str());
        let symbol = to_cstring(&event.symbol);
        let text = to_cstring(&event.text);
        let user_data = self.user_data.0;
        let callback = self.callback;
        let unwound = panic::catch_unwind(AssertUnwindSafe(|| {
            callback(user_data, kind.as_ptr(), event.instrument_id, symbol.as_ptr(), text.as_ptr())
        }))
        .is_err();
        if unwound {
            warn!(kind = %event.kind, "foreign event callback unwound");
        }
    }
}

/// Foreign sinks for one `fb_session_start*` call
#[derive(Default)]
pub(crate) struct ForeignCallbacks {
    pub record: Option<RecordTrampoline>,
    pub event: Option<EventTrampoline>,
    pub metadata: Option<MetadataTrampoline>,
    pub exception: Option<ExceptionTrampoline>,
}

impl ForeignCallbacks {
    pub(crate) fn into_callbacks(self) -> Callbacks {
        let mut callbacks = Callbacks::new();
        if let Some(t) = self.record {
            callbacks = callbacks.on_record(move |record| t.invoke(record));
        }
        if let Some(t) = self.event {
            callbacks = callbacks.on_event(move |event| t.invoke(event));
        }
        if let Some(t) = self.metadata {
            callbacks = callbacks.on_metadata(move |metadata| t.invoke(metadata));
        }
        if let Some(t) = self.exception {
            callbacks = callbacks.on_exception(move |fault| t.invoke(fault));
        }
        callbacks
    }
}
